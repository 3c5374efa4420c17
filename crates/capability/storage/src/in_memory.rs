//! 内存存储实现
//!
//! 使用 `RwLock<BTreeMap>` 提供线程安全的存储，适用于单节点运行与测试。

use crate::error::StorageError;
use crate::query::matches_filters;
use crate::traits::{EntityStore, FirmwareBlobStore, MetricSample, MetricStore};
use async_trait::async_trait;
use contract::QueryFilter;
use domain::Entity;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// 实体内存存储
pub struct InMemoryEntityStore<T: Entity> {
    entities: RwLock<BTreeMap<String, T>>,
}

impl<T: Entity> InMemoryEntityStore<T> {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Entity> Default for InMemoryEntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> EntityStore<T> for InMemoryEntityStore<T> {
    async fn list(&self, filters: &[QueryFilter]) -> Result<Vec<T>, StorageError> {
        let snapshot: Vec<T> = self
            .entities
            .read()
            .map(|entities| entities.values().cloned().collect())
            .unwrap_or_default();
        let mut items = Vec::with_capacity(snapshot.len());
        for entity in snapshot {
            if matches_filters(&entity, filters)? {
                items.push(entity);
            }
        }
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<Option<T>, StorageError> {
        Ok(self
            .entities
            .read()
            .map(|entities| entities.get(id).cloned())
            .unwrap_or_default())
    }

    async fn save(&self, entity: T) -> Result<bool, StorageError> {
        if entity.id().is_empty() {
            return Err(StorageError::InvalidQuery("entity id is empty".to_string()));
        }
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entities.insert(entity.id().to_string(), entity).is_some())
    }

    async fn delete(&self, ids: &[String]) -> Result<Vec<T>, StorageError> {
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(ids.iter().filter_map(|id| entities.remove(id)).collect())
    }
}

/// 时序内存存储：每个字段保留最近 `capacity` 个样本。
pub struct InMemoryMetricStore {
    capacity: usize,
    samples: RwLock<HashMap<String, Vec<MetricSample>>>,
}

impl InMemoryMetricStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: RwLock::new(HashMap::new()),
        }
    }

    /// 按字段读取样本（用于测试与状态查询）
    pub fn samples(&self, id: &str) -> Vec<MetricSample> {
        self.samples
            .read()
            .map(|samples| samples.get(id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn write(&self, sample: &MetricSample) -> Result<(), StorageError> {
        let mut samples = self
            .samples
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let series = samples.entry(sample.id.clone()).or_default();
        series.push(sample.clone());
        if series.len() > self.capacity {
            let overflow = series.len() - self.capacity;
            series.drain(..overflow);
        }
        Ok(())
    }

    async fn purge(&self, id: &str) -> Result<(), StorageError> {
        let mut samples = self
            .samples
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        samples.remove(id);
        Ok(())
    }
}

/// 丢弃全部写入（时序库关闭时使用）
#[derive(Default)]
pub struct VoidMetricStore;

#[async_trait]
impl MetricStore for VoidMetricStore {
    async fn write(&self, _sample: &MetricSample) -> Result<(), StorageError> {
        Ok(())
    }

    async fn purge(&self, _id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// 固件内容内存存储
#[derive(Default)]
pub struct InMemoryFirmwareStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryFirmwareStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FirmwareBlobStore for InMemoryFirmwareStore {
    async fn read(&self, internal_name: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .read()
            .map(|blobs| blobs.get(internal_name).cloned())
            .unwrap_or_default()
            .ok_or_else(|| StorageError::NotFound(format!("firmware file {internal_name}")))
    }

    async fn write(&self, internal_name: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut blobs = self
            .blobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs.insert(internal_name.to_string(), data.to_vec());
        Ok(())
    }

    async fn remove(&self, internal_name: &str) -> Result<(), StorageError> {
        let mut blobs = self
            .blobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs.remove(internal_name);
        Ok(())
    }
}
