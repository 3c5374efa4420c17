//! 资源处理器：把参数转换为资源动作，交给资源服务执行。
//!
//! 结构化参数 `{type: resource, quickId|resourceType+labels, payload, preDelay}`；
//! 纯字符串参数按 `<quickId>=<payload>` 解析。

use crate::error::HandlerError;
use crate::plugin::{Handler, RoutedParams, TYPE_RESOURCE};
use async_trait::async_trait;
use contract::service::{command, kind};
use contract::{ResourceAction, ServiceEvent, topics};
use mc_bus::{Bus, BusExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ResourceHandler {
    id: String,
    bus: Arc<dyn Bus>,
}

impl ResourceHandler {
    pub fn new(id: &str, bus: Arc<dyn Bus>) -> Self {
        Self {
            id: id.to_string(),
            bus,
        }
    }

    fn dispatch(&self, name: &str, action: &ResourceAction) -> Result<(), HandlerError> {
        let event = ServiceEvent::new(kind::RESOURCE_ACTION, command::SET)
            .with_id(action.quick_id.clone())
            .with_data(action)
            .map_err(|err| HandlerError::Config(err.to_string()))?;
        self.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)?;
        debug!(
            target: "mc.handler",
            handler_id = %self.id,
            parameter = %name,
            quick_id = %action.quick_id,
            resource_type = %action.resource_type,
            "resource_action_dispatched"
        );
        Ok(())
    }
}

fn parse_plain(text: &str) -> Option<ResourceAction> {
    let (quick_id, payload) = text.split_once('=')?;
    let quick_id = quick_id.trim();
    if quick_id.is_empty() || !quick_id.contains(':') {
        return None;
    }
    Some(ResourceAction {
        quick_id: quick_id.to_string(),
        payload: payload.trim().to_string(),
        ..Default::default()
    })
}

#[async_trait]
impl Handler for ResourceHandler {
    fn handler_type(&self) -> &'static str {
        TYPE_RESOURCE
    }

    async fn start(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn post(&self, params: &RoutedParams) -> Result<(), HandlerError> {
        for (name, action) in params.decode_typed::<ResourceAction>()? {
            self.dispatch(&name, &action)?;
        }
        for (name, text) in &params.plain {
            match parse_plain(text) {
                Some(action) => self.dispatch(name, &action)?,
                None => warn!(
                    target: "mc.handler",
                    handler_id = %self.id,
                    parameter = %name,
                    "resource_parameter_invalid"
                ),
            }
        }
        Ok(())
    }

    async fn close(&self) {}
}
