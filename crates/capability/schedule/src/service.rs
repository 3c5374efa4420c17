//! 计划服务：计划存储、调度安装与执行。

use crate::error::ScheduleError;
use crate::trigger::{derive_spec, is_valid_at, on_date_window};
use chrono::{Local, Utc};
use contract::service::{command, kind};
use contract::{HandlerMessage, ScheduleStateUpdate, ServiceEvent, ServiceFilter, topics};
use domain::schedule::CustomVariableType;
use domain::sun::Location;
use domain::{Frequency, ScheduleConfig, ScheduleState, ScheduleType, Spec};
use mc_bus::{Bus, BusData, BusError, BusExt, QueueListener, queue_callback};
use mc_scheduler::CoreScheduler;
use mc_script::{RequestBody, WebhookClient, execute_script, render_yaml_map, script_timeout};
use mc_variable::VariableEngine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// 用户计划在核心调度器中的作业名前缀。
pub const SCHEDULE_PREFIX: &str = "mc_user_schedule_";

pub fn job_name(id: &str) -> String {
    format!("{SCHEDULE_PREFIX}{id}")
}

/// 计划服务依赖。
#[derive(Clone)]
pub struct ScheduleContext {
    pub bus: Arc<dyn Bus>,
    pub scheduler: Arc<CoreScheduler>,
    pub variables: VariableEngine,
    pub webhook: WebhookClient,
    /// 日出日落计划使用的地理位置。
    pub location: Option<Location>,
}

/// 计划服务。
pub struct ScheduleService {
    ctx: ScheduleContext,
    filter: ServiceFilter,
    store: RwLock<HashMap<String, ScheduleConfig>>,
}

impl ScheduleService {
    pub fn new(ctx: ScheduleContext, filter: ServiceFilter) -> Self {
        Self {
            ctx,
            filter,
            store: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.store
            .read()
            .map(|store| store.contains_key(id))
            .unwrap_or_default()
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .store
            .read()
            .map(|store| store.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<ScheduleConfig> {
        self.store.read().ok().and_then(|store| store.get(id).cloned())
    }

    /// 安装（或替换）计划；未启用的计划只做卸载。
    pub fn add(self: &Arc<Self>, mut config: ScheduleConfig) -> Result<(), ScheduleError> {
        if !self.filter.matches(&config.id, "", &config.labels) {
            debug!(target: "mc.schedule", schedule_id = %config.id, "schedule_filtered_out");
            return Ok(());
        }
        self.remove(&config.id);
        if !config.enabled {
            return Ok(());
        }
        if config.schedule_type == ScheduleType::Simple && config.spec.frequency == Frequency::OnDate {
            config.validity.date = on_date_window(&config)?;
        }
        let spec = derive_spec(&config, self.ctx.location, Local::now().date_naive())?;

        let service = Arc::downgrade(self);
        let id = config.id.clone();
        self.ctx.scheduler.add(
            &job_name(&config.id),
            &spec,
            Arc::new(move || {
                let Some(service) = service.upgrade() else {
                    return;
                };
                let id = id.clone();
                tokio::spawn(async move {
                    if let Err(err) = service.execute(&id).await {
                        warn!(target: "mc.schedule", schedule_id = %id, error = %err, "schedule_execution_failed");
                    }
                });
            }),
        )?;
        info!(
            target: "mc.schedule",
            schedule_id = %config.id,
            schedule_type = ?config.schedule_type,
            spec = %spec,
            "schedule_loaded"
        );
        self.store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(config.id.clone(), config);
        Ok(())
    }

    /// 卸载计划；返回此前是否已加载。
    pub fn remove(&self, id: &str) -> bool {
        self.ctx.scheduler.remove(&job_name(id));
        let removed = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
            .is_some();
        if removed {
            info!(target: "mc.schedule", schedule_id = %id, "schedule_unloaded");
        }
        removed
    }

    pub fn unload_all(&self) {
        for id in self.loaded_ids() {
            self.remove(&id);
        }
    }

    /// 请求资源服务下发全部计划（逐个以 `add` 回到 `service.scheduler`）。
    pub fn load_all(&self) -> Result<(), BusError> {
        let event = ServiceEvent::new(kind::SCHEDULER, command::LOAD_ALL);
        self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)
    }

    /// 按当天日出日落重新安装 sunrise / sunset 计划；返回重装数量。
    pub fn reload_sunrise(self: &Arc<Self>) -> usize {
        let configs: Vec<ScheduleConfig> = self
            .store
            .read()
            .map(|store| {
                store
                    .values()
                    .filter(|config| {
                        matches!(config.schedule_type, ScheduleType::Sunrise | ScheduleType::Sunset)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let mut reloaded = 0;
        for config in configs {
            let id = config.id.clone();
            match self.add(config) {
                Ok(()) => reloaded += 1,
                Err(err) => warn!(target: "mc.schedule", schedule_id = %id, error = %err, "schedule_sunrise_reload_failed"),
            }
        }
        info!(target: "mc.schedule", reloaded, "schedule_sunrise_reloaded");
        reloaded
    }

    /// 执行一次计划；有效期外或已停用时返回 `Ok(false)`。
    pub async fn execute(&self, id: &str) -> Result<bool, ScheduleError> {
        let config = self
            .get(id)
            .ok_or_else(|| ScheduleError::NotLoaded(id.to_string()))?;
        if !config.enabled {
            return Ok(false);
        }
        let now = Utc::now();
        if !is_valid_at(&config.validity, now) {
            debug!(target: "mc.schedule", schedule_id = %id, "schedule_outside_validity");
            return Ok(false);
        }

        // 先在锁内记账，保证 executedCount 不超过 repeatCount。
        let reserved = {
            let mut store = self
                .store
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            store.get_mut(id).filter(|entry| entry.enabled).map(|entry| {
                entry.state.executed_count += 1;
                entry.state.last_run = Some(now);
                let finished = is_finished(entry);
                if finished {
                    entry.enabled = false;
                }
                finished
            })
        };
        let Some(finished) = reserved else {
            return Ok(false);
        };
        if finished {
            self.ctx.scheduler.remove(&job_name(id));
        }
        mc_telemetry::record_schedule_executed();

        let result = self.notify(&config).await;
        let state = self.finish(id, &result);
        self.persist_state(id, state);
        if finished {
            info!(target: "mc.schedule", schedule_id = %id, "schedule_auto_disabled");
            self.publish_resource(ServiceEvent::new(kind::SCHEDULER, command::DISABLE).with_id(id));
        }
        result.map(|()| true)
    }

    fn finish(&self, id: &str, result: &Result<(), ScheduleError>) -> ScheduleState {
        let mut store = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(entry) = store.get_mut(id) else {
            return ScheduleState::default();
        };
        entry.state.last_status = result.is_ok();
        entry.state.message = match result {
            Ok(()) => String::new(),
            Err(err) => format!("error: {err}"),
        };
        entry.state.clone()
    }

    async fn notify(&self, config: &ScheduleConfig) -> Result<(), ScheduleError> {
        let mut scope = Spec::new();
        scope.insert("scheduleId".to_string(), Value::String(config.id.clone()));
        let mut variables = self.ctx.variables.load(&config.variables, &scope).await?;
        self.apply_custom_variables(config, &mut variables).await?;

        if config.handlers.is_empty() {
            debug!(target: "mc.schedule", schedule_id = %config.id, "schedule_without_handlers");
            return Ok(());
        }
        let data = render_yaml_map(self.ctx.variables.templates(), &config.handler_parameters, &variables)?;
        for handler in &config.handlers {
            let message = HandlerMessage {
                id: handler.clone(),
                data: data.clone(),
            };
            self.ctx.bus.publish(topics::MESSAGE_NOTIFY_HANDLER, &message)?;
        }
        info!(
            target: "mc.schedule",
            schedule_id = %config.id,
            handlers = config.handlers.len(),
            "schedule_handlers_notified"
        );
        Ok(())
    }

    /// 自定义变量：脚本返回映射或 webhook 响应映射合并到变量。
    async fn apply_custom_variables(
        &self,
        config: &ScheduleConfig,
        variables: &mut Spec,
    ) -> Result<(), ScheduleError> {
        let custom = &config.custom_variable_config;
        let extra = match config.custom_variable_type {
            CustomVariableType::None => return Ok(()),
            CustomVariableType::Javascript => {
                let mut globals = serde_json::Map::new();
                globals.insert("variables".to_string(), Value::Object(variables.clone()));
                match execute_script(&custom.javascript, &globals, None, script_timeout(&config.labels)).await? {
                    Value::Object(map) => map,
                    other => {
                        debug!(target: "mc.schedule", schedule_id = %config.id, result = %other, "custom_variables_not_a_map");
                        return Ok(());
                    }
                }
            }
            CustomVariableType::Webhook => self
                .ctx
                .webhook
                .call(
                    &custom.webhook,
                    "POST",
                    Some(RequestBody::Json(Value::Object(variables.clone()))),
                )
                .await?
                .json_map()?,
        };
        variables.extend(extra);
        Ok(())
    }

    fn persist_state(&self, id: &str, state: ScheduleState) {
        let payload = ScheduleStateUpdate {
            id: id.to_string(),
            state,
        };
        match ServiceEvent::new(kind::SCHEDULER, command::UPDATE_STATE)
            .with_id(id)
            .with_data(&payload)
        {
            Ok(event) => self.publish_resource(event),
            Err(err) => warn!(target: "mc.schedule", schedule_id = %id, error = %err, "schedule_state_encode_failed"),
        }
    }

    fn publish_resource(&self, event: ServiceEvent) {
        if let Err(err) = self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event) {
            warn!(target: "mc.schedule", id = %event.id, error = %err, "schedule_event_publish_failed");
        }
    }

    /// 处理 `service.scheduler` 上的命令。
    pub async fn handle_service_event(self: &Arc<Self>, event: &ServiceEvent) {
        let result = match event.command.as_str() {
            command::LOAD_ALL => self.load_all().map_err(ScheduleError::from),
            command::UNLOAD_ALL => {
                self.unload_all();
                Ok(())
            }
            command::ADD | command::START | command::RELOAD => {
                decode_config(event).and_then(|config| self.add(config))
            }
            command::REMOVE | command::STOP => {
                let id = match decode_config(event) {
                    Ok(config) if !config.id.is_empty() => config.id,
                    _ => event.id.clone(),
                };
                self.remove(&id);
                Ok(())
            }
            command::RELOAD_SUNRISE => {
                self.reload_sunrise();
                Ok(())
            }
            other => {
                warn!(target: "mc.schedule", command = %other, "schedule_command_unsupported");
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(
                target: "mc.schedule",
                command = %event.command,
                id = %event.id,
                error = %err,
                "schedule_command_failed"
            );
        }
    }

    /// 订阅 `service.scheduler`。
    pub fn start_listener(self: &Arc<Self>, capacity: usize) -> Result<QueueListener, BusError> {
        let service = self.clone();
        QueueListener::start(
            self.ctx.bus.clone(),
            topics::SERVICE_SCHEDULER,
            "schedule_service",
            capacity,
            1,
            queue_callback(move |data: BusData| {
                let service = service.clone();
                async move {
                    match data.decode::<ServiceEvent>() {
                        Ok(event) => service.handle_service_event(&event).await,
                        Err(err) => warn!(target: "mc.schedule", error = %err, "schedule_service_event_invalid"),
                    }
                }
            }),
        )
    }
}

/// repeat 达到次数或 on_date 已执行时计划结束。
fn is_finished(config: &ScheduleConfig) -> bool {
    match config.schedule_type {
        ScheduleType::Repeat => {
            config.spec.repeat_count > 0 && config.state.executed_count >= config.spec.repeat_count
        }
        ScheduleType::Simple => config.spec.frequency == Frequency::OnDate,
        _ => false,
    }
}

fn decode_config(event: &ServiceEvent) -> Result<ScheduleConfig, ScheduleError> {
    event
        .decode_data::<ScheduleConfig>()
        .map_err(|err| ScheduleError::Decode(err.to_string()))
}
