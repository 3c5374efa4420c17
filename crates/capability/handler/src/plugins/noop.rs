use crate::error::HandlerError;
use crate::plugin::{Handler, RoutedParams, TYPE_NOOP};
use async_trait::async_trait;
use tracing::info;

/// 只记录日志的处理器。
pub struct NoopHandler {
    id: String,
}

impl NoopHandler {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait]
impl Handler for NoopHandler {
    fn handler_type(&self) -> &'static str {
        TYPE_NOOP
    }

    async fn start(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn post(&self, params: &RoutedParams) -> Result<(), HandlerError> {
        info!(
            target: "mc.handler",
            handler_id = %self.id,
            plain = params.plain.len(),
            typed = params.typed.len(),
            "noop_handler_post"
        );
        Ok(())
    }

    async fn close(&self) {}
}
