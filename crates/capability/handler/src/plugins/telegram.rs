//! Telegram Bot 处理器。
//!
//! 结构化参数 `{type: telegram, chatIds, parseMode, text}`；纯字符串参数逐条发送到默认会话。

use crate::error::HandlerError;
use crate::plugin::{Handler, RoutedParams, TYPE_TELEGRAM};
use async_trait::async_trait;
use domain::WebhookConfig;
use mc_script::{RequestBody, WebhookClient};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

pub const DEFAULT_TELEGRAM_SERVER: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelegramConfig {
    pub token: String,
    pub chat_ids: Vec<String>,
    /// `Markdown`、`MarkdownV2`、`HTML` 或空
    pub parse_mode: String,
    pub server: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_ids: Vec::new(),
            parse_mode: String::new(),
            server: DEFAULT_TELEGRAM_SERVER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TelegramData {
    chat_ids: Vec<String>,
    parse_mode: String,
    text: String,
}

pub struct TelegramHandler {
    id: String,
    config: TelegramConfig,
    client: WebhookClient,
}

impl TelegramHandler {
    pub fn new(id: &str, config: TelegramConfig, client: WebhookClient) -> Self {
        Self {
            id: id.to_string(),
            config,
            client,
        }
    }

    fn endpoint(&self, method: &str) -> WebhookConfig {
        WebhookConfig {
            url: format!(
                "{}/bot{}/{}",
                self.config.server.trim_end_matches('/'),
                self.config.token,
                method
            ),
            method: "POST".to_string(),
            ..Default::default()
        }
    }

    async fn send(&self, chat_ids: &[String], parse_mode: &str, text: &str) -> Result<(), HandlerError> {
        let endpoint = self.endpoint("sendMessage");
        for chat_id in chat_ids {
            let mut body = json!({ "chat_id": chat_id, "text": text });
            if !parse_mode.is_empty() {
                body["parse_mode"] = json!(parse_mode);
            }
            self.client
                .call(&endpoint, "POST", Some(RequestBody::Json(body)))
                .await?;
            debug!(target: "mc.handler", handler_id = %self.id, chat_id = %chat_id, "telegram_message_sent");
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for TelegramHandler {
    fn handler_type(&self) -> &'static str {
        TYPE_TELEGRAM
    }

    /// 用 `getMe` 校验 token。
    async fn start(&self) -> Result<(), HandlerError> {
        if self.config.token.is_empty() {
            return Err(HandlerError::Config("telegram token is empty".to_string()));
        }
        let response = self
            .client
            .call(&self.endpoint("getMe"), "POST", None)
            .await?;
        let me = response.json()?;
        if me.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            return Err(HandlerError::Transport(format!(
                "telegram getMe rejected: {}",
                response.text()
            )));
        }
        info!(
            target: "mc.handler",
            handler_id = %self.id,
            bot = %me["result"]["username"].as_str().unwrap_or_default(),
            "telegram_bot_verified"
        );
        Ok(())
    }

    async fn post(&self, params: &RoutedParams) -> Result<(), HandlerError> {
        for (_, data) in params.decode_typed::<TelegramData>()? {
            let chat_ids = if data.chat_ids.is_empty() {
                &self.config.chat_ids
            } else {
                &data.chat_ids
            };
            let parse_mode = if data.parse_mode.is_empty() {
                &self.config.parse_mode
            } else {
                &data.parse_mode
            };
            self.send(chat_ids, parse_mode, &data.text).await?;
        }
        for (_, text) in &params.plain {
            self.send(&self.config.chat_ids, &self.config.parse_mode, text)
                .await?;
        }
        Ok(())
    }

    async fn close(&self) {}
}
