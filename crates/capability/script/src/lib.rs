//! 脚本能力：模板渲染、内嵌 JavaScript 与 Webhook 调用。

pub mod javascript;
pub mod template;
pub mod webhook;

pub use javascript::{DEFAULT_SCRIPT_TIMEOUT, execute_script, script_timeout, truthy};
pub use template::{TemplateEngine, render_yaml_map};
pub use webhook::{RequestBody, WebhookClient, WebhookResponse};

use contract::ErrorKind;

/// 脚本层错误。
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("template error: {0}")]
    Template(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("script timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::Template(_) | ScriptError::Script(_) => ErrorKind::Internal,
            ScriptError::Timeout(_) => ErrorKind::Timeout,
            ScriptError::Http(_) => ErrorKind::Transport,
            ScriptError::Decode(_) => ErrorKind::Decode,
        }
    }
}
