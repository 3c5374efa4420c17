//! 通用 HTTP provider。
//!
//! - `nodes`：`nodeId → 端点`，下发消息时请求对应端点；可选脚本把消息
//!   （全局变量 `data`）转换为请求体 `dataOut`
//! - `pollers`：按 `executionInterval` 周期请求；可选脚本读取 `dataIn`、
//!   `response`、`responseBytes`，输出 `dataOut`（规范化消息或消息数组），
//!   结果封装为原始帧交回接收管线

use crate::error::GatewayError;
use crate::provider::{Provider, ProviderContext, json_or_text, messages_from_value};
use async_trait::async_trait;
use domain::{Message, RawMessage, WebhookConfig};
use mc_protocol::RxHandler;
use mc_script::{RequestBody, WebhookClient, execute_script, script_timeout};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

const OTHER_ENDPOINT: &str = "endpoint";

/// 节点端点。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpNodeConfig {
    #[serde(flatten)]
    pub webhook: WebhookConfig,
    pub disabled: bool,
    pub script: String,
}

/// 周期请求端点。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpPollConfig {
    #[serde(flatten)]
    pub webhook: WebhookConfig,
    pub disabled: bool,
    pub execution_interval: String,
    /// 请求体，同时作为脚本的 `dataIn`
    pub body: Value,
    pub script: String,
}

impl Default for HttpPollConfig {
    fn default() -> Self {
        Self {
            webhook: WebhookConfig::default(),
            disabled: false,
            execution_interval: "1m".to_string(),
            body: Value::Null,
            script: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub nodes: BTreeMap<String, HttpNodeConfig>,
    pub pollers: BTreeMap<String, HttpPollConfig>,
}

pub struct HttpProvider {
    ctx: ProviderContext,
    config: HttpProviderConfig,
    script_timeout: Duration,
    rx: RwLock<Option<RxHandler>>,
    /// 本实例安装的调度作业；关闭时逐个移除。
    jobs: RwLock<Vec<String>>,
}

impl HttpProvider {
    pub fn new(ctx: ProviderContext, config: HttpProviderConfig) -> Self {
        Self {
            script_timeout: script_timeout(&ctx.gateway.labels),
            ctx,
            config,
            rx: RwLock::new(None),
            jobs: RwLock::new(Vec::new()),
        }
    }
}

pub fn poll_job_name(gateway_id: &str, endpoint: &str) -> String {
    format!("http_poll_{gateway_id}_{endpoint}")
}

#[async_trait]
impl Provider for HttpProvider {
    fn provider_type(&self) -> &'static str {
        crate::provider::PROVIDER_HTTP
    }

    async fn start(&self, rx: RxHandler) -> Result<(), GatewayError> {
        *self.rx.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(rx.clone());
        for (name, poll) in &self.config.pollers {
            if poll.disabled {
                continue;
            }
            let interval =
                domain::duration::parse_duration_or(&poll.execution_interval, Duration::from_secs(60));
            let job = PollJob {
                gateway_id: self.ctx.gateway_id().to_string(),
                name: name.clone(),
                config: poll.clone(),
                webhook: self.ctx.webhook.clone(),
                script_timeout: self.script_timeout,
                rx: rx.clone(),
            };
            let job_name = poll_job_name(self.ctx.gateway_id(), name);
            self.ctx.scheduler.add(
                &job_name,
                &format!("@every {}ms", interval.as_millis().max(1)),
                Arc::new(move || {
                    let job = job.clone();
                    tokio::spawn(async move { job.run().await });
                }),
            )?;
            self.jobs
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(job_name);
        }
        Ok(())
    }

    async fn post(&self, message: &Message) -> Result<(), GatewayError> {
        let endpoint = self
            .config
            .nodes
            .get(&message.node_id)
            .filter(|endpoint| !endpoint.disabled)
            .ok_or_else(|| {
                GatewayError::Config(format!("no http endpoint for node `{}`", message.node_id))
            })?;
        let data = serde_json::to_value(message).map_err(|err| GatewayError::Encode(err.to_string()))?;
        let body = if endpoint.script.trim().is_empty() {
            data
        } else {
            let mut globals = serde_json::Map::new();
            globals.insert("data".to_string(), data);
            execute_script(&endpoint.script, &globals, Some("dataOut"), self.script_timeout).await?
        };
        let mut raw = RawMessage::new(false, body.to_string());
        raw.set_other(OTHER_ENDPOINT, endpoint.webhook.url.clone());
        self.ctx.logger.log(&raw);
        let body = match body {
            Value::String(text) => RequestBody::Text(text),
            other => RequestBody::Json(other),
        };
        self.ctx.webhook.call(&endpoint.webhook, "POST", Some(body)).await?;
        mc_telemetry::record_message_sent();
        Ok(())
    }

    async fn process_received(&self, raw: RawMessage) -> Result<Vec<Message>, GatewayError> {
        messages_from_value(self.ctx.gateway_id(), json_or_text(&raw.data))
    }

    async fn close(&self) {
        let jobs = std::mem::take(
            &mut *self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for name in &jobs {
            self.ctx.scheduler.remove(name);
        }
        self.rx.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    }
}

#[derive(Clone)]
struct PollJob {
    gateway_id: String,
    name: String,
    config: HttpPollConfig,
    webhook: WebhookClient,
    script_timeout: Duration,
    rx: RxHandler,
}

impl PollJob {
    async fn run(&self) {
        match self.execute().await {
            Ok(Some(raw)) => (self.rx)(raw),
            Ok(None) => {}
            Err(err) => warn!(
                target: "mc.gateway",
                gateway_id = %self.gateway_id,
                endpoint = %self.name,
                error = %err,
                "http_poll_failed"
            ),
        }
    }

    async fn execute(&self) -> Result<Option<RawMessage>, GatewayError> {
        let body = match &self.config.body {
            Value::Null => None,
            Value::String(text) => Some(RequestBody::Text(text.clone())),
            other => Some(RequestBody::Json(other.clone())),
        };
        let response = self.webhook.call(&self.config.webhook, "GET", body).await?;
        let data_out = if self.config.script.trim().is_empty() {
            json_or_text(&response.body)
        } else {
            let mut globals = serde_json::Map::new();
            globals.insert("dataIn".to_string(), self.config.body.clone());
            globals.insert(
                "response".to_string(),
                serde_json::json!({
                    "statusCode": response.status,
                    "body": json_or_text(&response.body),
                }),
            );
            globals.insert(
                "responseBytes".to_string(),
                Value::Array(response.body.iter().map(|byte| Value::from(*byte)).collect()),
            );
            execute_script(&self.config.script, &globals, Some("dataOut"), self.script_timeout).await?
        };
        if data_out.is_null() {
            debug!(target: "mc.gateway", gateway_id = %self.gateway_id, endpoint = %self.name, "http_poll_no_data");
            return Ok(None);
        }
        let mut raw = RawMessage::new(true, data_out.to_string());
        raw.set_other(OTHER_ENDPOINT, self.name.clone());
        Ok(Some(raw))
    }
}
