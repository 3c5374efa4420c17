//! 存储接口 Trait 定义
//!
//! - EntityStore：按实体类型的 K/V 存储，支持过滤查询
//! - MetricStore：字段时序写入
//! - FirmwareBlobStore：固件文件内容
//!
//! 所有接口返回 StorageError，使用 async_trait 支持动态分发。

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contract::QueryFilter;
use domain::{Entity, MetricType};
use serde::{Deserialize, Serialize};

/// 实体存储接口
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    /// 列出满足全部过滤条件的实体（按 id 排序）
    async fn list(&self, filters: &[QueryFilter]) -> Result<Vec<T>, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<T>, StorageError>;

    /// 返回第一个满足条件的实体
    async fn find_one(&self, filters: &[QueryFilter]) -> Result<Option<T>, StorageError> {
        Ok(self.list(filters).await?.into_iter().next())
    }

    /// 写入实体；返回写入前是否已存在
    async fn save(&self, entity: T) -> Result<bool, StorageError>;

    /// 删除实体；返回被删除的实体
    async fn delete(&self, ids: &[String]) -> Result<Vec<T>, StorageError>;
}

/// 时序样本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub id: String,
    pub metric_type: MetricType,
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// 时序写入接口
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn write(&self, sample: &MetricSample) -> Result<(), StorageError>;

    /// 按字段 id 删除全部样本
    async fn purge(&self, id: &str) -> Result<(), StorageError>;
}

/// 固件内容存储接口
#[async_trait]
pub trait FirmwareBlobStore: Send + Sync {
    async fn read(&self, internal_name: &str) -> Result<Vec<u8>, StorageError>;

    async fn write(&self, internal_name: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn remove(&self, internal_name: &str) -> Result<(), StorageError>;
}
