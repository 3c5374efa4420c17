use crate::labels::Labels;
use crate::webhook::WebhookConfig;
use serde::{Deserialize, Serialize};

/// 变量定义：名称 → 取值方式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableSpec {
    /// 模板渲染后的字面值。
    String {
        #[serde(default)]
        value: String,
    },
    /// HTTP 调用，响应体按 JSON 解析。
    Webhook(WebhookConfig),
    /// 通过 Quick-ID 取实体（可带键路径）。
    #[serde(rename_all = "camelCase")]
    ResourceByQuickId {
        quick_id: String,
        #[serde(default)]
        key_path: String,
    },
    /// 按标签过滤取第一个实体。
    #[serde(rename_all = "camelCase")]
    ResourceByLabels {
        resource_type: String,
        #[serde(default)]
        labels: Labels,
        #[serde(default)]
        key_path: String,
    },
}

impl VariableSpec {
    pub fn literal(value: impl Into<String>) -> Self {
        VariableSpec::String {
            value: value.into(),
        }
    }

    pub fn quick_id(quick_id: impl Into<String>) -> Self {
        VariableSpec::ResourceByQuickId {
            quick_id: quick_id.into(),
            key_path: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_variants() {
        let spec: VariableSpec = serde_json::from_value(serde_json::json!({
            "type": "resource_by_quick_id",
            "quickId": "sf:g1.n1.s1.f1.current.value"
        }))
        .expect("decode");
        assert_eq!(spec, VariableSpec::quick_id("sf:g1.n1.s1.f1.current.value"));

        let spec: VariableSpec = serde_json::from_value(serde_json::json!({
            "type": "webhook",
            "url": "http://localhost/api",
            "headers": {"x-token": "abc"}
        }))
        .expect("decode");
        assert!(matches!(spec, VariableSpec::Webhook(cfg) if cfg.url == "http://localhost/api"));
    }
}
