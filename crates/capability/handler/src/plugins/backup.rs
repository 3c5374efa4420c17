//! 备份处理器：把全部实体导出为 JSON 文件，并只保留最近 N 份。

use crate::error::HandlerError;
use crate::plugin::{Handler, RoutedParams, TYPE_BACKUP};
use async_trait::async_trait;
use chrono::Utc;
use mc_storage::EntityApi;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupConfig {
    pub target_directory: String,
    pub prefix: String,
    /// 0 表示全部保留
    pub retain_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            target_directory: String::new(),
            prefix: "mc_backup".to_string(),
            retain_backups: 3,
        }
    }
}

pub struct BackupHandler {
    id: String,
    config: BackupConfig,
    api: EntityApi,
}

impl BackupHandler {
    pub fn new(id: &str, config: BackupConfig, api: EntityApi) -> Self {
        Self {
            id: id.to_string(),
            config,
            api,
        }
    }

    fn directory(&self) -> &Path {
        Path::new(&self.config.target_directory)
    }

    /// 写出一份备份，返回文件路径。
    pub async fn backup_now(&self) -> Result<PathBuf, HandlerError> {
        let export = self.api.export().await?;
        let content = serde_json::to_vec_pretty(&export)
            .map_err(|err| HandlerError::Config(err.to_string()))?;
        let name = format!(
            "{}_{}.json",
            self.config.prefix,
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        );
        let path = self.directory().join(name);
        tokio::fs::write(&path, content).await?;
        info!(target: "mc.handler", handler_id = %self.id, path = %path.display(), "backup_written");
        self.prune().await?;
        Ok(path)
    }

    async fn prune(&self) -> Result<(), HandlerError> {
        if self.config.retain_backups == 0 {
            return Ok(());
        }
        let prefix = format!("{}_", self.config.prefix);
        let mut entries = tokio::fs::read_dir(self.directory()).await?;
        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".json") {
                backups.push(entry.path());
            }
        }
        // 文件名带时间戳，字典序即时间序
        backups.sort();
        let excess = backups.len().saturating_sub(self.config.retain_backups);
        for path in backups.into_iter().take(excess) {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(target: "mc.handler", handler_id = %self.id, path = %path.display(), error = %err, "backup_remove_failed");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for BackupHandler {
    fn handler_type(&self) -> &'static str {
        TYPE_BACKUP
    }

    async fn start(&self) -> Result<(), HandlerError> {
        if self.config.target_directory.is_empty() {
            return Err(HandlerError::Config("backup targetDirectory is empty".to_string()));
        }
        tokio::fs::create_dir_all(self.directory()).await?;
        Ok(())
    }

    /// 任意参数都触发一次备份。
    async fn post(&self, _params: &RoutedParams) -> Result<(), HandlerError> {
        self.backup_now().await.map(|_| ())
    }

    async fn close(&self) {}
}
