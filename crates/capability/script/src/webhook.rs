//! Webhook HTTP 客户端（变量、评估器、处理器、HTTP 网关共用）。

use crate::ScriptError;
use domain::WebhookConfig;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 请求体。
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Text(String),
}

/// 响应：状态码与原始字节。
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl WebhookResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 响应体按 JSON 解析；空响应体为 `null`。
    pub fn json(&self) -> Result<Value, ScriptError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body).map_err(|err| ScriptError::Decode(err.to_string()))
    }

    /// 响应体解析为 JSON 对象；非对象值以 `response` 键包装。
    pub fn json_map(&self) -> Result<serde_json::Map<String, Value>, ScriptError> {
        match self.json()? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(serde_json::Map::new()),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("response".to_string(), other);
                Ok(map)
            }
        }
    }
}

/// 基于 reqwest 的客户端；`insecure` 不同的配置使用不同的底层连接池。
#[derive(Clone)]
pub struct WebhookClient {
    secure: reqwest::Client,
    insecure: reqwest::Client,
}

impl WebhookClient {
    pub fn new() -> Result<Self, ScriptError> {
        Ok(Self {
            secure: build_client(false)?,
            insecure: build_client(true)?,
        })
    }

    /// 按配置发起请求。`default_method` 在配置未指定方法时使用。
    ///
    /// `responseCode` 为 0 时接受任意 2xx，否则必须完全一致。
    pub async fn call(
        &self,
        config: &WebhookConfig,
        default_method: &str,
        body: Option<RequestBody>,
    ) -> Result<WebhookResponse, ScriptError> {
        if config.url.trim().is_empty() {
            return Err(ScriptError::Http("webhook url is empty".to_string()));
        }
        let method = Method::from_bytes(config.method_or(default_method).to_uppercase().as_bytes())
            .map_err(|err| ScriptError::Http(format!("invalid method: {err}")))?;
        let client = if config.insecure {
            &self.insecure
        } else {
            &self.secure
        };

        let mut request = client.request(method.clone(), &config.url);
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !config.query_parameters.is_empty() {
            let query: Vec<(String, String)> = config
                .query_parameters
                .iter()
                .map(|(key, value)| (key.clone(), domain::key_path::value_to_string(value)))
                .collect();
            request = request.query(&query);
        }
        request = match body {
            Some(RequestBody::Json(value)) => request.json(&value),
            Some(RequestBody::Text(text)) => request.body(text),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|err| ScriptError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ScriptError::Http(err.to_string()))?
            .to_vec();
        debug!(
            target: "mc.script",
            method = %method,
            url = %config.url,
            status = status.as_u16(),
            "webhook_called"
        );

        let accepted = if config.response_code == 0 {
            status.is_success()
        } else {
            status.as_u16() == config.response_code
        };
        if !accepted {
            return Err(ScriptError::Http(format!(
                "unexpected response code {} from {}",
                status.as_u16(),
                config.url
            )));
        }
        Ok(WebhookResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn build_client(insecure: bool) -> Result<reqwest::Client, ScriptError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(|err| ScriptError::Http(err.to_string()))
}
