//! 实体 API：存储 + 实体事件。
//!
//! 每次持久化变更（created/updated/deleted）恰好发布一次 `event.<entityType>`。
//! 先持久化再发布；事件发布失败只记录日志。

use crate::error::StorageError;
use crate::in_memory::{InMemoryEntityStore, InMemoryFirmwareStore, VoidMetricStore};
use crate::query::label_filters;
use crate::traits::{EntityStore, FirmwareBlobStore, MetricStore};
use chrono::Utc;
use contract::{QueryFilter, topics};
use domain::{
    DataRepository, Entity, EntityEvent, EventType, Field, Firmware, Gateway, HandlerConfig,
    Labels, Node, QuickId, ResourceType, ScheduleConfig, Source, TaskConfig,
};
use mc_bus::{Bus, BusExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// 单一实体类型的仓库。
pub struct Repository<T: Entity> {
    store: Arc<dyn EntityStore<T>>,
    bus: Arc<dyn Bus>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(store: Arc<dyn EntityStore<T>>, bus: Arc<dyn Bus>) -> Self {
        Self { store, bus }
    }

    pub async fn list(&self, filters: &[QueryFilter]) -> Result<Vec<T>, StorageError> {
        self.store.list(filters).await
    }

    pub async fn list_by_labels(&self, labels: &Labels) -> Result<Vec<T>, StorageError> {
        self.store.list(&label_filters(labels)).await
    }

    pub async fn find(&self, id: &str) -> Result<Option<T>, StorageError> {
        self.store.get(id).await
    }

    /// 取实体，缺失时返回 NotFound。
    pub async fn get(&self, id: &str) -> Result<T, StorageError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("{} {}", T::ENTITY_TYPE, id)))
    }

    pub async fn find_one(&self, filters: &[QueryFilter]) -> Result<Option<T>, StorageError> {
        self.store.find_one(filters).await
    }

    /// 刷新 `modifiedOn` 后写入，并发布 created 或 updated 事件。
    pub async fn save(&self, mut entity: T) -> Result<T, StorageError> {
        entity.set_modified_on(Utc::now());
        let existed = self.store.save(entity.clone()).await?;
        let event_type = if existed {
            EventType::Updated
        } else {
            EventType::Created
        };
        self.emit(event_type, &entity);
        Ok(entity)
    }

    /// 删除并为每个被删除的实体发布 deleted 事件；返回删除数量。
    pub async fn delete(&self, ids: &[String]) -> Result<usize, StorageError> {
        let removed = self.store.delete(ids).await?;
        for entity in &removed {
            self.emit(EventType::Deleted, entity);
        }
        Ok(removed.len())
    }

    fn emit(&self, event_type: EventType, entity: &T) {
        let event = EntityEvent::from_entity(event_type, entity);
        if let Err(err) = self.bus.publish(&topics::entity_event(T::ENTITY_TYPE), &event) {
            warn!(
                target: "mc.storage",
                entity_type = %T::ENTITY_TYPE,
                entity_id = %entity.id(),
                error = %err,
                "entity_event_publish_failed"
            );
        }
    }
}

/// 各实体类型仓库与附属存储的集合。
#[derive(Clone)]
pub struct EntityApi {
    pub gateway: Repository<Gateway>,
    pub node: Repository<Node>,
    pub source: Repository<Source>,
    pub field: Repository<Field>,
    pub firmware: Repository<Firmware>,
    pub handler: Repository<HandlerConfig>,
    pub task: Repository<TaskConfig>,
    pub schedule: Repository<ScheduleConfig>,
    pub data_repository: Repository<DataRepository>,
    pub metric: Arc<dyn MetricStore>,
    pub firmware_blobs: Arc<dyn FirmwareBlobStore>,
}

impl EntityApi {
    /// 全部使用内存存储。
    pub fn in_memory(bus: Arc<dyn Bus>) -> Self {
        Self::with_stores(
            bus,
            Arc::new(VoidMetricStore),
            Arc::new(InMemoryFirmwareStore::new()),
        )
    }

    /// 内存实体存储，外部提供时序与固件存储。
    pub fn with_stores(
        bus: Arc<dyn Bus>,
        metric: Arc<dyn MetricStore>,
        firmware_blobs: Arc<dyn FirmwareBlobStore>,
    ) -> Self {
        fn repo<T: Entity>(bus: &Arc<dyn Bus>) -> Repository<T> {
            Repository::new(Arc::new(InMemoryEntityStore::<T>::new()), bus.clone())
        }
        Self {
            gateway: repo(&bus),
            node: repo(&bus),
            source: repo(&bus),
            field: repo(&bus),
            firmware: repo(&bus),
            handler: repo(&bus),
            task: repo(&bus),
            schedule: repo(&bus),
            data_repository: repo(&bus),
            metric,
            firmware_blobs,
        }
    }

    /// 按 Quick-ID 的组合键取实体（序列化为 JSON，不应用键路径）。
    pub async fn get_by_quick_id(&self, quick_id: &QuickId) -> Result<Value, StorageError> {
        let filters: Vec<QueryFilter> = quick_id
            .key_map()
            .into_iter()
            .map(|(key, value)| QueryFilter::eq(key, value))
            .collect();
        let found = match quick_id.resource_type {
            ResourceType::Gateway => to_value(self.gateway.find_one(&filters).await?)?,
            ResourceType::Node => to_value(self.node.find_one(&filters).await?)?,
            ResourceType::Source => to_value(self.source.find_one(&filters).await?)?,
            ResourceType::Field => to_value(self.field.find_one(&filters).await?)?,
            ResourceType::Task => to_value(self.task.find_one(&filters).await?)?,
            ResourceType::Schedule => to_value(self.schedule.find_one(&filters).await?)?,
            ResourceType::Handler => to_value(self.handler.find_one(&filters).await?)?,
            ResourceType::DataRepository => {
                to_value(self.data_repository.find_one(&filters).await?)?
            }
            ResourceType::Firmware => to_value(self.firmware.find_one(&filters).await?)?,
        };
        found.ok_or_else(|| StorageError::NotFound(quick_id.to_string()))
    }

    /// 按标签列出实体（序列化为 JSON）。
    pub async fn list_by_labels(
        &self,
        resource_type: ResourceType,
        labels: &Labels,
    ) -> Result<Vec<Value>, StorageError> {
        let filters = label_filters(labels);
        let items = match resource_type {
            ResourceType::Gateway => to_values(self.gateway.list(&filters).await?)?,
            ResourceType::Node => to_values(self.node.list(&filters).await?)?,
            ResourceType::Source => to_values(self.source.list(&filters).await?)?,
            ResourceType::Field => to_values(self.field.list(&filters).await?)?,
            ResourceType::Task => to_values(self.task.list(&filters).await?)?,
            ResourceType::Schedule => to_values(self.schedule.list(&filters).await?)?,
            ResourceType::Handler => to_values(self.handler.list(&filters).await?)?,
            ResourceType::DataRepository => to_values(self.data_repository.list(&filters).await?)?,
            ResourceType::Firmware => to_values(self.firmware.list(&filters).await?)?,
        };
        Ok(items)
    }

    /// 导出全部实体：`实体类型 → 实体列表`（备份使用）。
    pub async fn export(&self) -> Result<serde_json::Map<String, Value>, StorageError> {
        let mut out = serde_json::Map::new();
        out.insert("gateway".into(), Value::Array(to_values(self.gateway.list(&[]).await?)?));
        out.insert("node".into(), Value::Array(to_values(self.node.list(&[]).await?)?));
        out.insert("source".into(), Value::Array(to_values(self.source.list(&[]).await?)?));
        out.insert("field".into(), Value::Array(to_values(self.field.list(&[]).await?)?));
        out.insert("firmware".into(), Value::Array(to_values(self.firmware.list(&[]).await?)?));
        out.insert("handler".into(), Value::Array(to_values(self.handler.list(&[]).await?)?));
        out.insert("task".into(), Value::Array(to_values(self.task.list(&[]).await?)?));
        out.insert("schedule".into(), Value::Array(to_values(self.schedule.list(&[]).await?)?));
        out.insert(
            "data_repository".into(),
            Value::Array(to_values(self.data_repository.list(&[]).await?)?),
        );
        Ok(out)
    }
}

fn to_value<T: Entity>(entity: Option<T>) -> Result<Option<Value>, StorageError> {
    entity
        .map(|entity| serde_json::to_value(entity).map_err(StorageError::from))
        .transpose()
}

fn to_values<T: Entity>(entities: Vec<T>) -> Result<Vec<Value>, StorageError> {
    entities
        .into_iter()
        .map(|entity| serde_json::to_value(entity).map_err(StorageError::from))
        .collect()
}
