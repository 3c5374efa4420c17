//! 配置文件结构（YAML）。缺省字段取默认值。

use contract::ServiceFilter;
use domain::{Location, Spec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpsSslConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub cert_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpsAcmeConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub email: String,
    pub domains: Vec<String>,
    pub cache_dir: String,
    pub acme_directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub web_directory: String,
    pub enable_profiling: bool,
    pub http: HttpConfig,
    pub https_ssl: HttpsSslConfig,
    pub https_acme: HttpsAcmeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLevelConfig {
    pub core: String,
    pub web_handler: String,
    pub storage: String,
    pub metric: String,
}

impl Default for LogLevelConfig {
    fn default() -> Self {
        Self {
            core: "info".to_string(),
            web_handler: "info".to_string(),
            storage: "info".to_string(),
            metric: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// `record_all` 或 `sampled`
    pub mode: String,
    /// `console` 或 `json`
    pub encoding: String,
    pub enable_stacktrace: bool,
    pub level: LogLevelConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            mode: "record_all".to_string(),
            encoding: "console".to_string(),
            enable_stacktrace: false,
            level: LogLevelConfig::default(),
        }
    }
}

impl LoggerConfig {
    pub fn is_json(&self) -> bool {
        self.encoding.eq_ignore_ascii_case("json")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesConfig {
    pub data: String,
    pub logs: String,
    pub tmp: String,
    pub secure_share: String,
    pub insecure_share: String,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            data: "/mc_home/data".to_string(),
            logs: "/mc_home/logs".to_string(),
            tmp: "/mc_home/tmp".to_string(),
            secure_share: "/mc_home/secure_share".to_string(),
            insecure_share: "/mc_home/insecure_share".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// `embedded` 或 `natsio`
    #[serde(rename = "type")]
    pub bus_type: String,
    pub topic_prefix: String,
    pub server_url: String,
    pub insecure: bool,
    pub connection_timeout: String,
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_type: "embedded".to_string(),
            topic_prefix: "mc_server".to_string(),
            server_url: String::new(),
            insecure: false,
            connection_timeout: "10s".to_string(),
            queue_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub storage: Spec,
    pub metric: Spec,
}

impl DatabaseConfig {
    /// 时序库是否关闭（`metric.disabled: true` 或类型为空）。
    pub fn metric_disabled(&self) -> bool {
        let disabled = self
            .metric
            .get("disabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let kind = self
            .metric
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        disabled || kind.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStateJobConfig {
    pub execution_interval: String,
    pub inactive_duration: String,
}

impl Default for NodeStateJobConfig {
    fn default() -> Self {
        Self {
            execution_interval: "5m".to_string(),
            inactive_duration: "15m".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemJobsConfig {
    pub sunrise_update: String,
    pub node_state: NodeStateJobConfig,
    pub telemetry_interval: String,
}

impl Default for SystemJobsConfig {
    fn default() -> Self {
        Self {
            sunrise_update: "0 15 1 * * *".to_string(),
            node_state: NodeStateJobConfig::default(),
            telemetry_interval: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub location: Option<Location>,
    /// IANA 时区名；为空使用系统时区。
    pub timezone: String,
    pub jobs: SystemJobsConfig,
}

/// 服务端配置（`server` 二进制）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub secret: String,
    pub jwt_seed: String,
    pub telemetry: TelemetryConfig,
    pub web: WebConfig,
    pub logger: LoggerConfig,
    pub directories: DirectoriesConfig,
    pub bus: BusConfig,
    pub gateway: ServiceFilter,
    pub handler: ServiceFilter,
    pub task: ServiceFilter,
    pub schedule: ServiceFilter,
    pub virtual_assistant: ServiceFilter,
    pub database: DatabaseConfig,
    pub system: SystemConfig,
}

/// 独立网关服务配置（`gateway` 二进制）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayServiceConfig {
    pub secret: String,
    pub logger: LoggerConfig,
    pub directories: DirectoriesConfig,
    pub bus: BusConfig,
    pub gateway: ServiceFilter,
}

/// 独立处理器服务配置（`handler` 二进制）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerServiceConfig {
    pub secret: String,
    pub logger: LoggerConfig,
    pub directories: DirectoriesConfig,
    pub bus: BusConfig,
    pub handler: ServiceFilter,
}
