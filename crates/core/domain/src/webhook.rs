use crate::Spec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP 调用配置（Webhook 变量、评估器、处理器、HTTP 网关共用）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    /// 为空时按调用方默认（变量 GET、评估器 POST）。
    pub method: String,
    pub insecure: bool,
    pub headers: BTreeMap<String, String>,
    pub query_parameters: Spec,
    /// 期望响应码；0 表示接受任意 2xx。
    pub response_code: u16,
}

impl WebhookConfig {
    pub fn method_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.method.trim().is_empty() {
            default
        } else {
            self.method.as_str()
        }
    }
}
