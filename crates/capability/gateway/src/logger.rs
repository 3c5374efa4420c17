//! 网关报文日志。
//!
//! `none` 不记录；`file_logger` 为每个网关写 `<logs>/gateway_logs/<id>.log`，
//! 每行 `<rfc3339>\t<rx|tx>\t<data>`。写入由单独任务串行完成，
//! 文件超过 `maxSize` 后滚动为 `<id>-<时间戳>.log`，按 `maxBackup` 与 `maxAge` 清理旧文件。

use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use domain::{RawMessage, Spec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const LOGGER_NONE: &str = "none";
pub const LOGGER_FILE: &str = "file_logger";

const LOG_DIR: &str = "gateway_logs";

/// 报文日志接口。
#[async_trait]
pub trait MessageLogger: Send + Sync {
    fn log(&self, message: &RawMessage);

    async fn close(&self);
}

/// 不记录。
pub struct VoidLogger;

#[async_trait]
impl MessageLogger for VoidLogger {
    fn log(&self, _message: &RawMessage) {}

    async fn close(&self) {}
}

/// 文件日志配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileLoggerConfig {
    #[serde(rename = "type")]
    pub logger_type: String,
    /// 单个文件上限（字节）
    pub max_size: u64,
    /// 滚动文件保留时长，Go 风格
    pub max_age: String,
    pub max_backup: usize,
}

impl Default for FileLoggerConfig {
    fn default() -> Self {
        Self {
            logger_type: LOGGER_FILE.to_string(),
            max_size: 1024 * 1024,
            max_age: "168h".to_string(),
            max_backup: 3,
        }
    }
}

/// 按配置创建日志器；类型为空或 `none` 时返回 [`VoidLogger`]。
pub async fn create_logger(
    gateway_id: &str,
    logs_dir: &Path,
    spec: &Spec,
) -> Result<Arc<dyn MessageLogger>, GatewayError> {
    let logger_type = spec
        .get("type")
        .and_then(|value| value.as_str())
        .unwrap_or_default();
    match logger_type {
        "" | LOGGER_NONE => Ok(Arc::new(VoidLogger)),
        LOGGER_FILE => {
            let config: FileLoggerConfig = mc_protocol::parse_config(spec)?;
            Ok(Arc::new(FileLogger::start(gateway_id, logs_dir, config).await?))
        }
        other => Err(GatewayError::Unsupported(format!("message logger {other}"))),
    }
}

/// 单网关滚动文件日志。
pub struct FileLogger {
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl FileLogger {
    pub async fn start(
        gateway_id: &str,
        logs_dir: &Path,
        config: FileLoggerConfig,
    ) -> Result<Self, GatewayError> {
        let dir = logs_dir.join(LOG_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let mut writer = RollingWriter {
            path: dir.join(format!("{gateway_id}.log")),
            dir,
            gateway_id: gateway_id.to_string(),
            max_size: config.max_size.max(1),
            max_age: domain::duration::parse_duration_or(
                &config.max_age,
                Duration::from_secs(7 * 24 * 3600),
            ),
            max_backup: config.max_backup,
            file: None,
            size: 0,
        };
        writer.open().await?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let handle = tokio::spawn(async move {
            while let Some(line) = receiver.recv().await {
                if let Err(err) = writer.write_line(&line).await {
                    warn!(target: "mc.gateway", gateway_id = %writer.gateway_id, error = %err, "message_log_write_failed");
                }
            }
            writer.flush().await;
        });
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl MessageLogger for FileLogger {
    fn log(&self, message: &RawMessage) {
        let direction = if message.is_received { "rx" } else { "tx" };
        let timestamp = message
            .timestamp
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut data = message.data_as_string();
        if let Some(topic) = message.other_str(mc_protocol::OTHER_TOPIC) {
            data = format!("{topic} {data}");
        }
        let line = format!("{}\t{}\t{}\n", timestamp, direction, data.trim_end());
        let sender = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = sender.as_ref() {
            let _ = sender.send(line);
        }
    }

    /// 停止接收并等待已排队的行写完。
    async fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

struct RollingWriter {
    dir: PathBuf,
    path: PathBuf,
    gateway_id: String,
    max_size: u64,
    max_age: Duration,
    max_backup: usize,
    file: Option<tokio::fs::File>,
    size: u64,
}

impl RollingWriter {
    async fn open(&mut self) -> Result<(), std::io::Error> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.size = file.metadata().await?.len();
        self.file = Some(file);
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), std::io::Error> {
        if self.size > 0 && self.size + line.len() as u64 > self.max_size {
            self.rotate().await?;
        }
        if self.file.is_none() {
            self.open().await?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes()).await?;
            self.size += line.len() as u64;
        }
        Ok(())
    }

    async fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush().await;
        }
    }

    async fn rotate(&mut self) -> Result<(), std::io::Error> {
        self.flush().await;
        self.file = None;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let rotated = self.dir.join(format!("{}-{}.log", self.gateway_id, stamp));
        tokio::fs::rename(&self.path, &rotated).await?;
        debug!(target: "mc.gateway", gateway_id = %self.gateway_id, file = %rotated.display(), "message_log_rotated");
        self.prune().await?;
        self.open().await
    }

    /// 删除超出数量或超过保留时长的滚动文件。
    async fn prune(&self) -> Result<(), std::io::Error> {
        let prefix = format!("{}-", self.gateway_id);
        let mut backups = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".log") {
                let modified = entry.metadata().await?.modified().unwrap_or(SystemTime::now());
                backups.push((name, modified));
            }
        }
        // 时间戳在文件名中，按名称倒序即从新到旧
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        let now = SystemTime::now();
        for (index, (name, modified)) in backups.iter().enumerate() {
            let expired = now
                .duration_since(*modified)
                .map(|age| age > self.max_age)
                .unwrap_or(false);
            if index >= self.max_backup || expired {
                tokio::fs::remove_file(self.dir.join(name)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_lines_and_rotates_with_backup_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = FileLoggerConfig {
            max_size: 64,
            max_backup: 2,
            ..Default::default()
        };
        let logger = FileLogger::start("gw1", dir.path(), config)
            .await
            .expect("start");
        for index in 0..12 {
            let mut message = RawMessage::new(index % 2 == 0, format!("1;1;1;0;2;{index}\n"));
            message.timestamp = Some(Utc::now());
            logger.log(&message);
            // 滚动文件名精确到毫秒
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        logger.close().await;

        let log_dir = dir.path().join(LOG_DIR);
        let current = std::fs::read_to_string(log_dir.join("gw1.log")).expect("current log");
        let last = current.lines().last().expect("line");
        assert!(last.ends_with("\t1;1;1;0;2;11"), "{last}");
        assert!(last.contains("\ttx\t"));

        let backups = std::fs::read_dir(&log_dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("gw1-"))
            .count();
        assert_eq!(backups, 2);
    }

    #[tokio::test]
    async fn unknown_logger_type_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spec = Spec::new();
        assert!(create_logger("gw1", dir.path(), &spec).await.is_ok());
        spec.insert("type".into(), "syslog".into());
        assert!(matches!(
            create_logger("gw1", dir.path(), &spec).await,
            Err(GatewayError::Unsupported(_))
        ));
    }
}
