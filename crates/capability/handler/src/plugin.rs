//! 处理器插件抽象与参数路由。

use crate::error::HandlerError;
use async_trait::async_trait;
use domain::Spec;
use mc_bus::Bus;
use mc_script::WebhookClient;
use mc_storage::EntityApi;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const TYPE_NOOP: &str = "noop";
pub const TYPE_RESOURCE: &str = "resource";
pub const TYPE_EMAIL: &str = "email";
pub const TYPE_TELEGRAM: &str = "telegram";
pub const TYPE_MQTT: &str = "mqtt";
pub const TYPE_WEBHOOK: &str = "webhook";
pub const TYPE_BACKUP: &str = "backup";

/// 通知处理器插件。
#[async_trait]
pub trait Handler: Send + Sync {
    fn handler_type(&self) -> &'static str;

    /// 建立连接或校验配置；失败时实例状态记为 down。
    async fn start(&self) -> Result<(), HandlerError>;

    async fn post(&self, params: &RoutedParams) -> Result<(), HandlerError>;

    async fn close(&self);
}

/// 插件构造所需的共享依赖。
#[derive(Clone)]
pub struct HandlerContext {
    pub bus: Arc<dyn Bus>,
    pub webhook: WebhookClient,
    /// 独立 handler 进程没有存储；备份插件需要。
    pub api: Option<EntityApi>,
}

/// 按处理器类型筛选后的参数。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedParams {
    /// 纯字符串参数：`名称 → 文本`，发给所有处理器。
    pub plain: Vec<(String, String)>,
    /// 带 `type` 的结构化参数，仅包含与本处理器类型一致的条目。
    pub typed: Vec<(String, Spec)>,
}

impl RoutedParams {
    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.typed.is_empty()
    }

    /// 把结构化参数解码为插件自己的类型。
    pub fn decode_typed<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>, HandlerError> {
        self.typed
            .iter()
            .map(|(name, spec)| {
                serde_json::from_value(Value::Object(spec.clone()))
                    .map(|data| (name.clone(), data))
                    .map_err(|err| HandlerError::Config(format!("parameter `{name}`: {err}")))
            })
            .collect()
    }

    /// 纯字符串参数组成的 JSON 对象。
    pub fn plain_map(&self) -> Spec {
        self.plain
            .iter()
            .map(|(name, text)| (name.clone(), Value::String(text.clone())))
            .collect()
    }
}

/// 拆分参数：对象（或可解析为对象的 JSON 文本）按其 `type` 字段路由，
/// 类型不匹配的条目丢弃并记录；其余值转为文本发给所有处理器。
pub fn route_params(handler_id: &str, handler_type: &str, data: &Spec) -> RoutedParams {
    let mut routed = RoutedParams::default();
    for (name, value) in data {
        let typed = match value {
            Value::Object(map) => Some(map.clone()),
            Value::String(text) if text.trim_start().starts_with('{') => {
                serde_json::from_str::<Spec>(text).ok()
            }
            _ => None,
        };
        match typed {
            Some(spec) if spec.contains_key("type") => {
                let target = spec.get("type").and_then(Value::as_str).unwrap_or_default();
                if target == handler_type {
                    routed.typed.push((name.clone(), spec));
                } else {
                    debug!(
                        target: "mc.handler",
                        handler_id = %handler_id,
                        handler_type = %handler_type,
                        parameter = %name,
                        parameter_type = %target,
                        "handler_parameter_dropped"
                    );
                }
            }
            _ => routed
                .plain
                .push((name.clone(), domain::key_path::value_to_string(value))),
        }
    }
    routed
}

/// 从处理器 `spec` 解析插件配置。
pub fn parse_spec<T: DeserializeOwned>(spec: &Spec) -> Result<T, HandlerError> {
    serde_json::from_value(Value::Object(spec.clone()))
        .map_err(|err| HandlerError::Config(err.to_string()))
}
