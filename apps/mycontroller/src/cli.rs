//! 命令行参数与启动前的进程级准备（环境变量、日志）。

use clap::{Parser, Subcommand};
use mc_config::LoggerConfig;
use mc_telemetry::LogSettings;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// `server` 命令行。
#[derive(Debug, Parser)]
#[command(name = "server", about = "MyController server")]
pub struct ServerCli {
    /// 配置文件路径
    #[arg(short, long, default_value = mc_config::DEFAULT_SERVER_CONFIG_FILE)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Option<ServerCommand>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ServerCommand {
    /// 打印版本信息（JSON）
    Version,
    /// 打印默认配置（YAML）
    Config,
}

/// `gateway` / `handler` 命令行；缺省配置路径由各二进制决定。
#[derive(Debug, Parser)]
pub struct ComponentCli {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<ComponentCommand>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ComponentCommand {
    /// 打印版本信息（JSON）
    Version,
}

impl ComponentCli {
    pub fn config_path(&self, default: &str) -> PathBuf {
        self.config.clone().unwrap_or_else(|| PathBuf::from(default))
    }
}

pub fn log_settings(logger: &LoggerConfig) -> LogSettings {
    LogSettings {
        core: logger.level.core.clone(),
        storage: logger.level.storage.clone(),
        metric: logger.level.metric.clone(),
        web_handler: logger.level.web_handler.clone(),
        json: logger.is_json(),
    }
}

/// 写入进程环境；必须在异步运行时启动前调用。
pub fn export_env(vars: &BTreeMap<String, String>) {
    for (key, value) in vars {
        // SAFETY: 运行时尚未启动，此时只有主线程。
        unsafe { std::env::set_var(key, value) };
    }
}

/// `system.timezone` 非空时设置 `TZ`，本地时间计算随之生效。
pub fn export_timezone(timezone: &str) {
    let timezone = timezone.trim();
    if !timezone.is_empty() {
        // SAFETY: 同上，只在运行时启动前调用。
        unsafe { std::env::set_var("TZ", timezone) };
    }
}
