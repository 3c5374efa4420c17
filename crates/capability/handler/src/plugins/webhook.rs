//! Webhook 处理器。
//!
//! 每个结构化参数 `{type: webhook, data, url?, method?, headers?, queryParameters?}` 发一次请求；
//! 纯字符串参数合并为一个 JSON 对象作为请求体。
//! 只有 `allowOverwrite` 开启时参数才能覆盖 url/method/headers/queryParameters。

use crate::error::HandlerError;
use crate::plugin::{Handler, RoutedParams, TYPE_WEBHOOK};
use async_trait::async_trait;
use domain::{Spec, WebhookConfig};
use mc_script::{RequestBody, WebhookClient};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookHandlerConfig {
    #[serde(flatten)]
    pub webhook: WebhookConfig,
    pub allow_overwrite: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WebhookData {
    url: String,
    method: String,
    headers: BTreeMap<String, String>,
    query_parameters: Spec,
    data: Value,
}

pub struct WebhookHandler {
    id: String,
    config: WebhookHandlerConfig,
    client: WebhookClient,
}

impl WebhookHandler {
    pub fn new(id: &str, config: WebhookHandlerConfig, client: WebhookClient) -> Self {
        Self {
            id: id.to_string(),
            config,
            client,
        }
    }

    fn effective(&self, data: &WebhookData) -> WebhookConfig {
        let mut config = self.config.webhook.clone();
        if !self.config.allow_overwrite {
            return config;
        }
        if !data.url.is_empty() {
            config.url = data.url.clone();
        }
        if !data.method.is_empty() {
            config.method = data.method.clone();
        }
        config.headers.extend(data.headers.clone());
        for (key, value) in &data.query_parameters {
            config.query_parameters.insert(key.clone(), value.clone());
        }
        config
    }
}

fn body_of(data: &Value) -> Option<RequestBody> {
    match data {
        Value::Null => None,
        Value::String(text) => Some(RequestBody::Text(text.clone())),
        other => Some(RequestBody::Json(other.clone())),
    }
}

#[async_trait]
impl Handler for WebhookHandler {
    fn handler_type(&self) -> &'static str {
        TYPE_WEBHOOK
    }

    async fn start(&self) -> Result<(), HandlerError> {
        if self.config.webhook.url.trim().is_empty() {
            return Err(HandlerError::Config("webhook url is empty".to_string()));
        }
        Ok(())
    }

    async fn post(&self, params: &RoutedParams) -> Result<(), HandlerError> {
        for (name, data) in params.decode_typed::<WebhookData>()? {
            let config = self.effective(&data);
            let response = self
                .client
                .call(&config, "POST", body_of(&data.data))
                .await?;
            debug!(target: "mc.handler", handler_id = %self.id, parameter = %name, status = response.status, "webhook_handler_called");
        }
        if !params.plain.is_empty() {
            let body = Value::Object(params.plain_map());
            let response = self
                .client
                .call(&self.config.webhook, "POST", Some(RequestBody::Json(body)))
                .await?;
            debug!(target: "mc.handler", handler_id = %self.id, status = response.status, "webhook_handler_called");
        }
        Ok(())
    }

    async fn close(&self) {}
}
