//! 应用运行配置加载。
//!
//! 先加载 `.env`，再解析 YAML 配置文件，最后应用环境变量覆盖
//! （`MC_SECRET`、`MC_BUS_TOPIC_PREFIX`、`MC_LOG_LEVEL`、`MC_BUS_QUEUE_CAPACITY`）。

pub mod model;

pub use model::*;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("failed to read {0}: {1}")]
    Read(String, String),
    #[error("failed to parse {0}: {1}")]
    Parse(String, String),
}

/// 密钥最大长度（字节）。
pub const SECRET_LENGTH: usize = 32;

pub const DEFAULT_SERVER_CONFIG_FILE: &str = "./mycontroller.yaml";
pub const DEFAULT_GATEWAY_CONFIG_FILE: &str = "./gateway.yaml";
pub const DEFAULT_HANDLER_CONFIG_FILE: &str = "./handler.yaml";

pub const DOCUMENTATION_URL: &str = "https://v2.mycontroller.org";

/// `config` 子命令输出的默认服务端配置。
pub const DEFAULT_SERVER_YAML: &str = r#"secret: change-me-to-a-32-char-secret
telemetry:
  enabled: false
web:
  web_directory: /ui
  http:
    enabled: true
    bind_address: 0.0.0.0
    port: 8080
  https_ssl:
    enabled: false
    bind_address: 0.0.0.0
    port: 8443
    cert_dir: /mc_home/certs/https_ssl
  https_acme:
    enabled: false
    bind_address: 0.0.0.0
    port: 9443
    cache_dir: /mc_home/certs/https_acme
    acme_directory: ""
    email: ""
    domains: []
logger:
  mode: record_all
  encoding: console
  enable_stacktrace: false
  level:
    core: info
    web_handler: info
    storage: info
    metric: warn
directories:
  data: /mc_home/data
  logs: /mc_home/logs
  tmp: /mc_home/tmp
  secure_share: /mc_home/secure_share
  insecure_share: /mc_home/insecure_share
bus:
  type: embedded
  topic_prefix: mc_server
  server_url: ""
  insecure: false
  connection_timeout: 10s
  queue_capacity: 1000
gateway:
  disabled: false
  types: []
  ids: []
  labels:
    location: server
handler:
  disabled: false
  types: []
  ids: []
  labels:
    location: server
task:
  disabled: false
schedule:
  disabled: false
virtual_assistant:
  disabled: true
database:
  storage:
    type: memory
  metric:
    type: memory
system:
  location:
    latitude: 0.0
    longitude: 0.0
  jobs:
    sunrise_update: "0 15 1 * * *"
    node_state:
      execution_interval: 5m
      inactive_duration: 15m
    telemetry_interval: 1h
"#;

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config: ServerConfig = load_yaml(path.as_ref())?;
        apply_common_overrides(&mut config.secret, &mut config.bus, &mut config.logger)?;
        Ok(config)
    }

    pub fn default_yaml() -> &'static str {
        DEFAULT_SERVER_YAML
    }

    /// 导出给子进程与脚本使用的环境变量。
    pub fn exported_env(&self, running_since: DateTime<Utc>) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        vars.insert("MC_DOCUMENTATION_URL".to_string(), DOCUMENTATION_URL.to_string());
        vars.insert(
            "MC_METRIC_DB_DISABLED".to_string(),
            self.database.metric_disabled().to_string(),
        );
        vars.insert(
            "MC_TELEMETRY_ENABLED".to_string(),
            self.telemetry.enabled.to_string(),
        );
        let dirs = &self.directories;
        for (key, value) in [
            ("MC_DIR_DATA", &dirs.data),
            ("MC_DIR_LOGS", &dirs.logs),
            ("MC_DIR_TMP", &dirs.tmp),
            ("MC_DIR_SECURE_SHARE", &dirs.secure_share),
            ("MC_DIR_INSECURE_SHARE", &dirs.insecure_share),
        ] {
            vars.insert(key.to_string(), value.clone());
        }
        vars.insert("MC_LOG_MODE".to_string(), self.logger.mode.clone());
        vars.insert("MC_LOG_ENCODING".to_string(), self.logger.encoding.clone());
        vars.insert("MC_LOG_LEVEL".to_string(), self.logger.level.core.clone());
        vars.insert(
            "MC_LOG_ENABLE_STACKTRACE".to_string(),
            self.logger.enable_stacktrace.to_string(),
        );
        vars.insert("MC_RUNNING_SINCE".to_string(), running_since.to_rfc3339());
        vars
    }
}

impl GatewayServiceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config: GatewayServiceConfig = load_yaml(path.as_ref())?;
        apply_common_overrides(&mut config.secret, &mut config.bus, &mut config.logger)?;
        Ok(config)
    }
}

impl HandlerServiceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config: HandlerServiceConfig = load_yaml(path.as_ref())?;
        apply_common_overrides(&mut config.secret, &mut config.bus, &mut config.logger)?;
        Ok(config)
    }
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    // .env 缺失不是错误
    let _ = dotenvy::dotenv();
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|err| ConfigError::Read(display.clone(), err.to_string()))?;
    parse_yaml(&display, &text)
}

/// 解析 YAML 文本（空文本按全部默认处理）。
pub fn parse_yaml<T: DeserializeOwned>(name: &str, text: &str) -> Result<T, ConfigError> {
    let text = if text.trim().is_empty() { "{}" } else { text };
    serde_yaml::from_str(text).map_err(|err| ConfigError::Parse(name.to_string(), err.to_string()))
}

fn apply_common_overrides(
    secret: &mut String,
    bus: &mut BusConfig,
    logger: &mut LoggerConfig,
) -> Result<(), ConfigError> {
    if let Some(value) = read_optional("MC_SECRET") {
        *secret = value;
    }
    if let Some(value) = read_optional("MC_BUS_TOPIC_PREFIX") {
        bus.topic_prefix = value;
    }
    if let Some(value) = read_optional("MC_LOG_LEVEL") {
        logger.level.core = value;
    }
    bus.queue_capacity = read_usize_with_default("MC_BUS_QUEUE_CAPACITY", bus.queue_capacity)?;
    *secret = pad_secret(secret)?;
    Ok(())
}

/// 校验密钥（非空、不超过 32 字节）并右侧补 `0` 到 32 字节。
pub fn pad_secret(secret: &str) -> Result<String, ConfigError> {
    if secret.is_empty() {
        return Err(ConfigError::Missing("secret".to_string()));
    }
    if secret.len() > SECRET_LENGTH {
        return Err(ConfigError::Invalid(
            "secret".to_string(),
            format!("longer than {SECRET_LENGTH} bytes"),
        ));
    }
    let mut padded = secret.to_string();
    while padded.len() < SECRET_LENGTH {
        padded.push('0');
    }
    Ok(padded)
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
