//! 内置处理器插件。

mod backup;
mod email;
mod mqtt;
mod noop;
mod resource;
mod telegram;
mod webhook;

pub use backup::{BackupConfig, BackupHandler};
pub use email::{EmailConfig, EmailHandler};
pub use mqtt::MqttHandler;
pub use noop::NoopHandler;
pub use resource::ResourceHandler;
pub use telegram::{TelegramConfig, TelegramHandler};
pub use webhook::{WebhookHandler, WebhookHandlerConfig};

use crate::error::HandlerError;
use crate::plugin::{
    Handler, HandlerContext, TYPE_BACKUP, TYPE_EMAIL, TYPE_MQTT, TYPE_NOOP, TYPE_RESOURCE,
    TYPE_TELEGRAM, TYPE_WEBHOOK, parse_spec,
};
use domain::HandlerConfig;
use std::sync::Arc;

/// 按 `type` 构造插件（`spec` 须已解密）。
pub fn create_handler(
    config: &HandlerConfig,
    ctx: &HandlerContext,
) -> Result<Arc<dyn Handler>, HandlerError> {
    let handler: Arc<dyn Handler> = match config.handler_type.as_str() {
        TYPE_NOOP => Arc::new(NoopHandler::new(&config.id)),
        TYPE_RESOURCE => Arc::new(ResourceHandler::new(&config.id, ctx.bus.clone())),
        TYPE_EMAIL => Arc::new(EmailHandler::new(&config.id, parse_spec(&config.spec)?)?),
        TYPE_TELEGRAM => Arc::new(TelegramHandler::new(
            &config.id,
            parse_spec(&config.spec)?,
            ctx.webhook.clone(),
        )),
        TYPE_MQTT => Arc::new(MqttHandler::new(&config.id, parse_spec(&config.spec)?)),
        TYPE_WEBHOOK => Arc::new(WebhookHandler::new(
            &config.id,
            parse_spec(&config.spec)?,
            ctx.webhook.clone(),
        )),
        TYPE_BACKUP => {
            let api = ctx.api.clone().ok_or_else(|| {
                HandlerError::Config("backup handler requires storage access".to_string())
            })?;
            Arc::new(BackupHandler::new(&config.id, parse_spec(&config.spec)?, api))
        }
        other => return Err(HandlerError::Unsupported(other.to_string())),
    };
    Ok(handler)
}
