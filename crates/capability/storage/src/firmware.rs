//! 目录存储的固件内容：`<data>/firmware/<internalName>`。

use crate::error::StorageError;
use crate::traits::FirmwareBlobStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct DirFirmwareStore {
    root: PathBuf,
}

impl DirFirmwareStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("firmware"),
        }
    }

    fn path_of(&self, internal_name: &str) -> Result<PathBuf, StorageError> {
        let name = Path::new(internal_name);
        match name.file_name() {
            Some(file) if file == name.as_os_str() => Ok(self.root.join(file)),
            _ => Err(StorageError::InvalidQuery(format!(
                "invalid firmware file name {internal_name}"
            ))),
        }
    }
}

#[async_trait]
impl FirmwareBlobStore for DirFirmwareStore {
    async fn read(&self, internal_name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_of(internal_name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(
                format!("firmware file {internal_name}"),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, internal_name: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_of(internal_name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, data).await?;
        debug!(target: "mc.storage", file = %path.display(), size = data.len(), "firmware_file_written");
        Ok(())
    }

    async fn remove(&self, internal_name: &str) -> Result<(), StorageError> {
        let path = self.path_of(internal_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
