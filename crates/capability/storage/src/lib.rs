//! # 存储模块
//!
//! 统一的数据存储抽象层：
//!
//! 1. **接口抽象层** (`traits.rs`)：实体、时序、固件内容的异步 Trait
//! 2. **查询** (`query.rs`)：按键路径与运算符过滤实体
//! 3. **实现层**：
//!    - `in_memory`：`RwLock` 内存实现，单节点运行与测试使用
//!    - `firmware`：目录存储的固件文件
//! 4. **实体 API** (`entity_api.rs`)：持久化后发布实体事件，
//!    并提供按 Quick-ID / 标签的动态查询
//!
//! 所有组件只在 worker 中调用存储，不在总线回调里直接调用。

pub mod entity_api;
pub mod error;
pub mod firmware;
pub mod in_memory;
pub mod query;
pub mod traits;

pub use entity_api::{EntityApi, Repository};
pub use error::StorageError;
pub use firmware::DirFirmwareStore;
pub use in_memory::{InMemoryEntityStore, InMemoryFirmwareStore, InMemoryMetricStore, VoidMetricStore};
pub use query::{label_filters, matches_filters};
pub use traits::{EntityStore, FirmwareBlobStore, MetricSample, MetricStore};
