//! 总线契约：topic 约定、服务事件信封与跨组件报文。

pub mod error;
pub mod service;
pub mod topics;

pub use error::{ContractError, ErrorKind};
pub use service::{
    EntityState, FirmwareBlock, HandlerMessage, LabelUpdate, ListQuery, QueryFilter,
    ResourceAction, ScheduleStateUpdate, ServiceEvent, ServiceFilter, TaskStateUpdate,
    FIRMWARE_BLOCK_SIZE,
};
