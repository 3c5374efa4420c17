//! SMTP 邮件处理器（lettre）。

use crate::error::HandlerError;
use crate::plugin::{Handler, RoutedParams, TYPE_EMAIL};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::info;

const DEFAULT_SUBJECT: &str = "MyController notification";

/// 处理器 `spec`。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    /// 逗号分隔的默认收件人
    pub to_emails: String,
    /// true 时使用 STARTTLS，否则直接 TLS（465）
    pub start_tls: bool,
    /// 仅用于本地测试服务器：明文无认证
    pub insecure: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_email: String::new(),
            to_emails: String::new(),
            start_tls: true,
            insecure: false,
        }
    }
}

/// 结构化参数 `{type: email, from, to, subject, body}`。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct EmailData {
    from: String,
    to: String,
    subject: String,
    body: String,
}

pub struct EmailHandler {
    id: String,
    config: EmailConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailHandler {
    pub fn new(id: &str, config: EmailConfig) -> Result<Self, HandlerError> {
        if config.host.is_empty() {
            return Err(HandlerError::Config("email host is empty".to_string()));
        }
        let builder = if config.insecure {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host.as_str())
        } else if config.start_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|err| HandlerError::Config(err.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|err| HandlerError::Config(err.to_string()))?
        };
        let mut builder = builder.port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        Ok(Self {
            id: id.to_string(),
            mailer: builder.build(),
            config,
        })
    }

    async fn send(&self, data: &EmailData) -> Result<(), HandlerError> {
        let from = if data.from.is_empty() {
            &self.config.from_email
        } else {
            &data.from
        };
        let to = if data.to.is_empty() {
            &self.config.to_emails
        } else {
            &data.to
        };
        let mut builder = Message::builder()
            .from(parse_mailbox(from)?)
            .subject(if data.subject.is_empty() {
                DEFAULT_SUBJECT
            } else {
                data.subject.as_str()
            })
            .header(content_type(&data.body));
        let mut recipients = 0;
        for address in to.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            builder = builder.to(parse_mailbox(address)?);
            recipients += 1;
        }
        if recipients == 0 {
            return Err(HandlerError::Config("email without recipients".to_string()));
        }
        let message = builder
            .body(data.body.clone())
            .map_err(|err| HandlerError::Config(err.to_string()))?;
        self.mailer
            .send(message)
            .await
            .map_err(|err| HandlerError::Transport(err.to_string()))?;
        info!(target: "mc.handler", handler_id = %self.id, recipients, "email_sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, HandlerError> {
    address
        .parse::<Mailbox>()
        .map_err(|err| HandlerError::Config(format!("invalid address `{address}`: {err}")))
}

fn content_type(body: &str) -> ContentType {
    if body.trim_start().starts_with('<') {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    }
}

#[async_trait]
impl Handler for EmailHandler {
    fn handler_type(&self) -> &'static str {
        TYPE_EMAIL
    }

    async fn start(&self) -> Result<(), HandlerError> {
        parse_mailbox(&self.config.from_email)?;
        let reachable = self
            .mailer
            .test_connection()
            .await
            .map_err(|err| HandlerError::Transport(err.to_string()))?;
        if !reachable {
            return Err(HandlerError::Transport(format!(
                "smtp server {}:{} not reachable",
                self.config.host, self.config.port
            )));
        }
        Ok(())
    }

    async fn post(&self, params: &RoutedParams) -> Result<(), HandlerError> {
        for (_, data) in params.decode_typed::<EmailData>()? {
            self.send(&data).await?;
        }
        if !params.plain.is_empty() {
            let body = params
                .plain
                .iter()
                .map(|(name, text)| format!("{name}: {text}"))
                .collect::<Vec<_>>()
                .join("\n");
            self.send(&EmailData {
                body,
                ..Default::default()
            })
            .await?;
        }
        Ok(())
    }

    async fn close(&self) {}
}
