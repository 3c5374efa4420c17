//! 任务引擎：任务存储、事件匹配、轮询调度与评估执行。
//!
//! 两级队列：
//! - pre-event（`event.>`，多 worker）：还原实体、筛选候选任务
//! - post-event（单 worker）：变量解析、评估、防抖、通知处理器
//!
//! 轮询任务由核心调度器按 `executionInterval` 投递到 post-event 队列。

use crate::dampening::{self, ExecutionHistory, Verdict};
use crate::error::TaskError;
use crate::evaluator;
use chrono::{DateTime, Utc};
use contract::service::{command, kind};
use contract::{HandlerMessage, ServiceEvent, ServiceFilter, TaskStateUpdate, topics};
use domain::key_path::value_to_string;
use domain::{
    DataRepository, Entity, EntityEvent, EntityType, EventType, Field, Firmware, Gateway, HandlerConfig, Node,
    ScheduleConfig, Source, Spec, TaskConfig, TaskState, get_by_key_path,
};
use mc_bus::{Bus, BusData, BusError, BusExt, BoundedQueue, QueueListener, queue_callback};
use mc_scheduler::CoreScheduler;
use mc_script::{WebhookClient, render_yaml_map};
use mc_variable::VariableEngine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 任务调度作业名前缀。
pub const SCHEDULE_PREFIX: &str = "mc_task_schedule_";

const PRE_EVENT_WORKERS: usize = 5;

pub fn polling_job_name(id: &str) -> String {
    format!("{SCHEDULE_PREFIX}{id}_polling")
}

fn recheck_job_name(id: &str) -> String {
    format!("{SCHEDULE_PREFIX}{id}_active_duration")
}

/// 任务引擎依赖。
#[derive(Clone)]
pub struct TaskContext {
    pub bus: Arc<dyn Bus>,
    pub scheduler: Arc<CoreScheduler>,
    pub variables: VariableEngine,
    pub webhook: WebhookClient,
}

/// 一次待执行的评估。
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub task_id: String,
    /// 触发事件的实体；轮询时为空。
    pub entity: Option<Value>,
}

impl Evaluation {
    pub fn polling(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            entity: None,
        }
    }
}

struct TaskEntry {
    config: TaskConfig,
    history: ExecutionHistory,
    /// 最近一次见到的存储版本（`modifiedOn`），用于丢弃过期的实体事件。
    revision: DateTime<Utc>,
}

type EvaluationSlot = Arc<OnceLock<Arc<BoundedQueue<Evaluation>>>>;

/// 任务引擎。
pub struct TaskEngine {
    ctx: TaskContext,
    filter: ServiceFilter,
    store: RwLock<HashMap<String, TaskEntry>>,
    evaluations: EvaluationSlot,
}

impl TaskEngine {
    pub fn new(ctx: TaskContext, filter: ServiceFilter) -> Self {
        Self {
            ctx,
            filter,
            store: RwLock::new(HashMap::new()),
            evaluations: Arc::new(OnceLock::new()),
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

    /// 任务当前运行状态（引擎内存中的最新值）。
    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.store
            .read()
            .ok()
            .and_then(|store| store.get(id).map(|entry| entry.config.state.clone()))
    }

    fn config(&self, id: &str) -> Option<TaskConfig> {
        self.store
            .read()
            .ok()
            .and_then(|store| store.get(id).map(|entry| entry.config.clone()))
    }

    /// 加载（或替换）任务；未启用的任务只做卸载。
    pub fn add(&self, config: TaskConfig) -> Result<(), TaskError> {
        if !self.filter.matches(&config.id, "", &config.labels) {
            debug!(target: "mc.task", task_id = %config.id, "task_filtered_out");
            return Ok(());
        }
        self.remove(&config.id);
        if !config.enabled {
            return Ok(());
        }
        if !config.trigger_on_event {
            self.schedule_polling(&config)?;
        }
        info!(
            target: "mc.task",
            task_id = %config.id,
            trigger_on_event = config.trigger_on_event,
            handlers = config.handlers.len(),
            "task_loaded"
        );
        let entry = TaskEntry {
            history: ExecutionHistory::for_dampening(&config.dampening),
            revision: config.modified_on,
            config,
        };
        self.store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(entry.config.id.clone(), entry);
        Ok(())
    }

    fn schedule_polling(&self, config: &TaskConfig) -> Result<(), TaskError> {
        let interval = config.execution_interval.trim();
        if interval.is_empty() {
            return Err(TaskError::Config(format!(
                "task `{}` needs executionInterval when not triggered on events",
                config.id
            )));
        }
        let spec = if interval.starts_with('@') || interval.contains(' ') {
            interval.to_string()
        } else {
            format!("@every {interval}")
        };
        let slot = self.evaluations.clone();
        let task_id = config.id.clone();
        self.ctx.scheduler.add(
            &polling_job_name(&config.id),
            &spec,
            Arc::new(move || enqueue(&slot, Evaluation::polling(task_id.clone()))),
        )?;
        Ok(())
    }

    /// 卸载任务；返回此前是否已加载。
    pub fn remove(&self, id: &str) -> bool {
        self.ctx.scheduler.remove(&polling_job_name(id));
        self.ctx.scheduler.remove(&recheck_job_name(id));
        let removed = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
            .is_some();
        if removed {
            info!(target: "mc.task", task_id = %id, "task_unloaded");
        }
        removed
    }

    pub fn unload_all(&self) {
        for id in self.loaded_ids() {
            self.remove(&id);
        }
    }

    /// 请求资源服务下发全部任务（逐个以 `add` 回到 `service.task`）。
    pub fn load_all(&self) -> Result<(), BusError> {
        let event = ServiceEvent::new(kind::TASK, command::LOAD_ALL);
        self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)
    }

    /// 已加载任务在存储中被改写或删除时刷新缓存；返回是否刷新。
    ///
    /// 只有运行状态与 `modifiedOn` 变化（例如状态回写）不算改写。
    pub fn refresh_cached(&self, event: &EntityEvent) -> Result<bool, TaskError> {
        if event.entity_type != EntityType::Task.as_str() || !self.is_loaded(&event.entity_id) {
            return Ok(false);
        }
        if event.event_type == EventType::Deleted {
            return Ok(self.remove(&event.entity_id));
        }
        let incoming: TaskConfig = event
            .decode_entity()
            .map_err(|err| TaskError::Decode(err.to_string()))?;
        let changed = {
            let mut store = self
                .store
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(entry) = store.get_mut(&incoming.id) else {
                return Ok(false);
            };
            if incoming.modified_on < entry.revision {
                return Ok(false);
            }
            entry.revision = incoming.modified_on;
            definition_changed(&entry.config, &incoming)
        };
        if !changed {
            return Ok(false);
        }
        info!(
            target: "mc.task",
            task_id = %incoming.id,
            enabled = incoming.enabled,
            "task_config_changed"
        );
        self.add(incoming)?;
        Ok(true)
    }

    /// pre-event：还原实体并为每个候选任务排入一次评估。
    pub fn handle_entity_event(&self, event: &EntityEvent) -> Result<usize, TaskError> {
        if let Err(err) = self.refresh_cached(event) {
            warn!(target: "mc.task", task_id = %event.entity_id, error = %err, "task_refresh_failed");
        }
        let entity = materialize(event)?;
        let candidates: Vec<String> = self
            .store
            .read()
            .map(|store| {
                store
                    .values()
                    .filter(|entry| is_candidate(&entry.config, event, &entity))
                    .map(|entry| entry.config.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        for task_id in &candidates {
            enqueue(
                &self.evaluations,
                Evaluation {
                    task_id: task_id.clone(),
                    entity: Some(entity.clone()),
                },
            );
        }
        if !candidates.is_empty() {
            debug!(
                target: "mc.task",
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                candidates = candidates.len(),
                "task_candidates_matched"
            );
        }
        Ok(candidates.len())
    }

    /// post-event：执行一次评估，返回是否通知了处理器。
    pub async fn execute(&self, evaluation: Evaluation) -> Result<bool, TaskError> {
        let task = self
            .config(&evaluation.task_id)
            .ok_or_else(|| TaskError::NotLoaded(evaluation.task_id.clone()))?;
        if !task.enabled {
            return Ok(false);
        }
        let now = Utc::now();

        let mut scope = Spec::new();
        scope.insert("taskId".to_string(), Value::String(task.id.clone()));
        if let Some(entity) = evaluation.entity {
            scope.insert("entity".to_string(), entity);
        }
        let (triggered, variables, failure) = match self.evaluate(&task, &scope).await {
            Ok((triggered, variables)) => (triggered, variables, None),
            Err(err) => {
                warn!(target: "mc.task", task_id = %task.id, error = %err, "task_evaluation_failed");
                (false, Spec::new(), Some(err.to_string()))
            }
        };
        mc_telemetry::record_task_evaluated(triggered);

        let Some((verdict, previous_status, mut state)) = self.apply_dampening(&task.id, triggered, now)
        else {
            return Ok(false);
        };
        state.last_evaluation = Some(now);
        state.last_status = verdict == Verdict::Fire && failure.is_none();
        state.message = failure
            .map(|text| format!("error: {text}"))
            .unwrap_or_default();

        match verdict {
            Verdict::Pending { remaining } => self.schedule_recheck(&task.id, remaining, &state),
            _ => self.ctx.scheduler.remove(&recheck_job_name(&task.id)),
        }

        let duplicate = task.ignore_duplicate && previous_status;
        let mut notified = false;
        if verdict == Verdict::Fire && !duplicate {
            match self.notify(&task, &variables) {
                Ok(()) => {
                    state.executed_count += 1;
                    state.last_success = Some(now);
                    notified = true;
                }
                Err(err) => {
                    warn!(target: "mc.task", task_id = %task.id, error = %err, "task_notify_failed");
                    state.message = format!("error: {err}");
                }
            }
        } else if verdict == Verdict::Fire {
            debug!(target: "mc.task", task_id = %task.id, "task_duplicate_ignored");
        }

        let disable = notified && task.auto_disable;
        self.store_state(&task.id, &state, disable);
        self.persist_state(&task.id, state);
        if disable {
            self.request_disable(&task.id);
        }
        Ok(notified)
    }

    async fn evaluate(&self, task: &TaskConfig, scope: &Spec) -> Result<(bool, Spec), TaskError> {
        let mut variables = self.ctx.variables.load(&task.variables, scope).await?;
        let triggered = evaluator::evaluate(
            task,
            &mut variables,
            self.ctx.variables.templates(),
            &self.ctx.webhook,
        )
        .await?;
        Ok((triggered, variables))
    }

    /// 在存储锁内记录结果并折算防抖；返回 (判定, 上次 lastStatus, 新状态草稿)。
    fn apply_dampening(
        &self,
        id: &str,
        triggered: bool,
        now: chrono::DateTime<Utc>,
    ) -> Option<(Verdict, bool, TaskState)> {
        let mut store = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = store.get_mut(id)?;
        let previous = entry.config.state.last_status;
        let mut state = entry.config.state.clone();
        let verdict = dampening::apply(
            &entry.config.dampening,
            &mut entry.history,
            &mut state,
            triggered,
            now,
        );
        Some((verdict, previous, state))
    }

    fn store_state(&self, id: &str, state: &TaskState, disable: bool) {
        let mut store = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = store.get_mut(id) {
            entry.config.state = state.clone();
            if disable {
                entry.config.enabled = false;
            }
        }
    }

    /// active_duration 未满时，到期再评估一次。
    fn schedule_recheck(&self, id: &str, remaining: Duration, state: &TaskState) {
        let name = recheck_job_name(id);
        let slot = self.evaluations.clone();
        let scheduler = self.ctx.scheduler.clone();
        let task_id = id.to_string();
        let job_name = name.clone();
        let spec = format!("@every {}ms", remaining.as_millis().max(1));
        let result = self.ctx.scheduler.add(
            &name,
            &spec,
            Arc::new(move || {
                scheduler.remove(&job_name);
                enqueue(&slot, Evaluation::polling(task_id.clone()));
            }),
        );
        match result {
            Ok(()) => {
                if let Some(since) = state.active_since {
                    debug!(
                        target: "mc.task",
                        task_id = %id,
                        deadline = %dampening::deadline(since, remaining),
                        "task_active_duration_pending"
                    );
                }
            }
            Err(err) => warn!(target: "mc.task", task_id = %id, error = %err, "task_recheck_schedule_failed"),
        }
    }

    /// 渲染处理器参数并逐个发到 `message.notify_handler`。
    fn notify(&self, task: &TaskConfig, variables: &Spec) -> Result<(), TaskError> {
        if task.handlers.is_empty() {
            debug!(target: "mc.task", task_id = %task.id, "task_without_handlers");
            return Ok(());
        }
        let data = render_yaml_map(self.ctx.variables.templates(), &task.handler_parameters, variables)?;
        for handler in &task.handlers {
            let message = HandlerMessage {
                id: handler.clone(),
                data: data.clone(),
            };
            self.ctx.bus.publish(topics::MESSAGE_NOTIFY_HANDLER, &message)?;
        }
        info!(
            target: "mc.task",
            task_id = %task.id,
            handlers = task.handlers.len(),
            "task_handlers_notified"
        );
        Ok(())
    }

    fn persist_state(&self, id: &str, state: TaskState) {
        let payload = TaskStateUpdate {
            id: id.to_string(),
            state,
        };
        self.publish_resource(ServiceEvent::new(kind::TASK, command::UPDATE_STATE), id, Some(&payload));
    }

    fn request_disable(&self, id: &str) {
        info!(target: "mc.task", task_id = %id, "task_auto_disabled");
        self.publish_resource::<()>(ServiceEvent::new(kind::TASK, command::DISABLE), id, None);
    }

    fn publish_resource<T: serde::Serialize>(&self, event: ServiceEvent, id: &str, data: Option<&T>) {
        let mut event = event.with_id(id);
        if let Some(data) = data {
            if let Err(err) = event.set_data(data) {
                warn!(target: "mc.task", task_id = %id, error = %err, "task_event_encode_failed");
                return;
            }
        }
        if let Err(err) = self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event) {
            warn!(target: "mc.task", task_id = %id, error = %err, "task_event_publish_failed");
        }
    }

    /// 处理 `service.task` 上的命令。
    pub async fn handle_service_event(&self, event: &ServiceEvent) {
        let result = match event.command.as_str() {
            command::LOAD_ALL => self.load_all().map_err(TaskError::from),
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
            other => {
                warn!(target: "mc.task", command = %other, "task_command_unsupported");
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(
                target: "mc.task",
                command = %event.command,
                id = %event.id,
                error = %err,
                "task_command_failed"
            );
        }
    }

    /// 启动 post-event 队列，并订阅 `event.>` 与 `service.task`。
    pub fn start_listeners(self: &Arc<Self>, capacity: usize) -> Result<TaskListeners, BusError> {
        let engine = self.clone();
        let evaluations = Arc::new(BoundedQueue::new(
            "task_post_event",
            capacity,
            1,
            queue_callback(move |evaluation: Evaluation| {
                let engine = engine.clone();
                async move {
                    let task_id = evaluation.task_id.clone();
                    if let Err(err) = engine.execute(evaluation).await {
                        debug!(target: "mc.task", task_id = %task_id, error = %err, "task_execution_skipped");
                    }
                }
            }),
        ));
        if self.evaluations.set(evaluations.clone()).is_err() {
            warn!(target: "mc.task", "task_listeners_already_started");
        }

        let engine = self.clone();
        let events = QueueListener::start(
            self.ctx.bus.clone(),
            topics::EVENT_ALL,
            "task_pre_event",
            capacity,
            PRE_EVENT_WORKERS,
            queue_callback(move |data: BusData| {
                let engine = engine.clone();
                async move {
                    let event = match data.decode::<EntityEvent>() {
                        Ok(event) => event,
                        Err(err) => {
                            debug!(target: "mc.task", topic = %data.topic, error = %err, "entity_event_invalid");
                            return;
                        }
                    };
                    if let Err(err) = engine.handle_entity_event(&event) {
                        debug!(target: "mc.task", entity_type = %event.entity_type, error = %err, "entity_event_skipped");
                    }
                }
            }),
        )?;

        let engine = self.clone();
        let commands = QueueListener::start(
            self.ctx.bus.clone(),
            topics::SERVICE_TASK,
            "task_service",
            capacity,
            1,
            queue_callback(move |data: BusData| {
                let engine = engine.clone();
                async move {
                    match data.decode::<ServiceEvent>() {
                        Ok(event) => engine.handle_service_event(&event).await,
                        Err(err) => warn!(target: "mc.task", error = %err, "task_service_event_invalid"),
                    }
                }
            }),
        )?;
        Ok(TaskListeners {
            commands,
            events,
            evaluations,
        })
    }
}

fn enqueue(slot: &EvaluationSlot, evaluation: Evaluation) {
    match slot.get() {
        Some(queue) => {
            queue.produce(evaluation);
        }
        None => {
            debug!(target: "mc.task", task_id = %evaluation.task_id, "task_queue_not_started");
        }
    }
}

fn decode_config(event: &ServiceEvent) -> Result<TaskConfig, TaskError> {
    event
        .decode_data::<TaskConfig>()
        .map_err(|err| TaskError::Decode(err.to_string()))
}

/// 按 `entityType` 把事件实体解码为具体类型，再转回 JSON 供键路径访问。
pub fn materialize(event: &EntityEvent) -> Result<Value, TaskError> {
    let kind = EntityType::parse(&event.entity_type)
        .ok_or_else(|| TaskError::EntityType(event.entity_type.clone()))?;
    match kind {
        EntityType::Gateway => typed::<Gateway>(event),
        EntityType::Node => typed::<Node>(event),
        EntityType::Source => typed::<Source>(event),
        EntityType::Field => typed::<Field>(event),
        EntityType::Firmware => typed::<Firmware>(event),
        EntityType::Handler => typed::<HandlerConfig>(event),
        EntityType::Task => typed::<TaskConfig>(event),
        EntityType::Schedule => typed::<ScheduleConfig>(event),
        EntityType::DataRepository => typed::<DataRepository>(event),
        EntityType::ForwardPayload | EntityType::VirtualDevice | EntityType::VirtualAssistant => {
            Ok(event.entity.clone())
        }
    }
}

fn typed<T: Entity>(event: &EntityEvent) -> Result<Value, TaskError> {
    let entity: T = event
        .decode_entity()
        .map_err(|err| TaskError::Decode(err.to_string()))?;
    serde_json::to_value(&entity).map_err(|err| TaskError::Decode(err.to_string()))
}

/// 缓存的任务与存储中的版本是否在定义上不同。
///
/// 忽略 `state` 与 `modifiedOn`；引擎自行停用（autoDisable）后，
/// 存储里仍为启用的旧版本不算变化。
fn definition_changed(cached: &TaskConfig, incoming: &TaskConfig) -> bool {
    let definition = |task: &TaskConfig| TaskConfig {
        enabled: true,
        state: TaskState::default(),
        modified_on: DateTime::<Utc>::default(),
        ..task.clone()
    };
    (cached.enabled && !incoming.enabled) || definition(cached) != definition(incoming)
}

/// 事件驱动任务的候选判断；任务自身的实体事件（如状态回写）不参与。
pub fn is_candidate(task: &TaskConfig, event: &EntityEvent, entity: &Value) -> bool {
    let filter = &task.event_filter;
    let own_event = event.entity_type == EntityType::Task.as_str() && event.entity_id == task.id;
    task.enabled
        && task.trigger_on_event
        && !own_event
        && (filter.event_types.is_empty() || filter.event_types.contains(&event.event_type))
        && (filter.entity_types.is_empty()
            || filter
                .entity_types
                .iter()
                .any(|kind| kind == &event.entity_type))
        && filter.filters.iter().all(|(path, expected)| {
            get_by_key_path(entity, path).is_some_and(|actual| value_to_string(actual) == *expected)
        })
}

/// 运行中的监听器与评估队列。
pub struct TaskListeners {
    commands: QueueListener,
    events: QueueListener,
    evaluations: Arc<BoundedQueue<Evaluation>>,
}

impl TaskListeners {
    pub async fn close(&self) {
        self.commands.close().await;
        self.events.close().await;
        self.evaluations.close().await;
    }
}
