//! 由运行时服务加载的实体（网关、处理器、任务、计划）。

use contract::service::kind;
use contract::topics;
use domain::{Entity, Gateway, HandlerConfig, ScheduleConfig, TaskConfig};

/// 可启用 / 停用并由某个服务承载的实体。
pub trait Managed: Entity {
    /// `ServiceEvent.type`。
    const SERVICE_TYPE: &'static str;
    /// 承载服务监听的 topic。
    const SERVICE_TOPIC: &'static str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);
}

impl Managed for Gateway {
    const SERVICE_TYPE: &'static str = kind::GATEWAY;
    const SERVICE_TOPIC: &'static str = topics::SERVICE_GATEWAY;

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Managed for HandlerConfig {
    const SERVICE_TYPE: &'static str = kind::HANDLER;
    const SERVICE_TOPIC: &'static str = topics::SERVICE_HANDLER;

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Managed for TaskConfig {
    const SERVICE_TYPE: &'static str = kind::TASK;
    const SERVICE_TOPIC: &'static str = topics::SERVICE_TASK;

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Managed for ScheduleConfig {
    const SERVICE_TYPE: &'static str = kind::SCHEDULER;
    const SERVICE_TOPIC: &'static str = topics::SERVICE_SCHEDULER;

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}
