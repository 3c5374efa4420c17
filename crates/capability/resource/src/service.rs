//! 资源服务：`service.resource_server` 的唯一入口。
//!
//! 按 `type` + `command` 分发：
//! - `get` / `list` / `save`：代理到存储并应答；受管实体保存后通知运行时重载或卸载
//! - `update_state` / `set_label`：持久化运行状态与标签
//! - `load_all` / `enable` / `disable` / `reload` / `start` / `stop`：改写配置后通知对应运行时
//! - `firmware` / `blocks`：按块推送固件内容
//! - `resource_action`：解析目标并下发载荷
//! - `system_jobs`：转发到 `internal.system_jobs`
//!
//! 带 `replyTopic` 的请求总会收到应答，失败时 `error` 为 `<kind>: <text>`。

use crate::action::{Target, Toggle, payload_value, set_by_path};
use crate::error::ResourceError;
use crate::firmware::split_blocks;
use crate::managed::Managed;
use crate::reconnect::ReconnectStore;
use contract::service::{command, kind};
use contract::{
    EntityState, LabelUpdate, ListQuery, ResourceAction, ScheduleStateUpdate, ServiceEvent,
    TaskStateUpdate, topics,
};
use domain::duration::parse_duration;
use domain::{Entity, Message, MessageType, Payload, QuickId, ResourceType, Status};
use mc_bus::{Bus, BusData, BusError, BusExt, QueueListener, queue_callback};
use mc_scheduler::CoreScheduler;
use mc_storage::{EntityApi, Repository};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// 资源服务依赖。
pub struct ResourceContext {
    pub bus: Arc<dyn Bus>,
    pub api: EntityApi,
    pub scheduler: Arc<CoreScheduler>,
}

pub struct ResourceService {
    ctx: ResourceContext,
    reconnect: ReconnectStore,
}

impl ResourceService {
    pub fn new(ctx: ResourceContext) -> Self {
        let reconnect = ReconnectStore::new(ctx.scheduler.clone());
        Self { ctx, reconnect }
    }

    pub fn api(&self) -> &EntityApi {
        &self.ctx.api
    }

    /// 等待重连的网关。
    pub fn pending_reconnects(&self) -> Vec<String> {
        self.reconnect.pending_ids()
    }

    /// 处理一条服务事件，并按需应答。
    pub async fn handle_service_event(self: &Arc<Self>, event: &ServiceEvent) {
        let streaming = event.service_type == kind::FIRMWARE && event.command == command::BLOCKS;
        let result = self.dispatch(event).await;
        let mut response = event.reply();
        match result {
            Ok(data) => {
                if let Some(data) = data {
                    if let Err(err) = response.set_data(&data) {
                        response.set_error(contract::ErrorKind::Decode, err);
                    }
                }
            }
            Err(err) => {
                warn!(
                    target: "mc.resource",
                    service_type = %event.service_type,
                    command = %event.command,
                    id = %event.id,
                    error = %err,
                    "resource_command_failed"
                );
                response.set_error(err.kind(), &err);
            }
        }
        if streaming {
            return;
        }
        if let Err(err) = mc_bus::reply(self.ctx.bus.as_ref(), event, &response) {
            warn!(target: "mc.resource", reply_topic = %event.reply_topic, error = %err, "resource_reply_failed");
        }
    }

    async fn dispatch(self: &Arc<Self>, event: &ServiceEvent) -> Result<Option<Value>, ResourceError> {
        let api = &self.ctx.api;
        match event.service_type.as_str() {
            kind::GATEWAY => self.gateway_command(event).await,
            kind::NODE => match event.command.as_str() {
                command::UPDATE_STATE => {
                    let update: EntityState = decode(event)?;
                    let mut node = api.node.get(&update.id).await?;
                    node.state.transition(update.state);
                    api.node.save(node).await?;
                    Ok(None)
                }
                command::SET_LABEL => {
                    let update: LabelUpdate = decode(event)?;
                    let id = if update.id.is_empty() { event.id.clone() } else { update.id };
                    let mut node = api.node.get(&id).await?;
                    for (key, value) in update.labels.iter() {
                        if value.is_empty() {
                            node.labels.remove(key);
                        } else {
                            node.labels.set(key.clone(), value.clone());
                        }
                    }
                    api.node.save(node).await?;
                    Ok(None)
                }
                _ => crud(&api.node, event).await,
            },
            kind::SOURCE => crud(&api.source, event).await,
            kind::FIELD => crud(&api.field, event).await,
            kind::DATA_REPOSITORY => crud(&api.data_repository, event).await,
            kind::HANDLER => match event.command.as_str() {
                command::UPDATE_STATE => {
                    let update: EntityState = decode(event)?;
                    let mut handler = api.handler.get(&update.id).await?;
                    handler.state.transition(update.state);
                    api.handler.save(handler).await?;
                    Ok(None)
                }
                _ => self.managed_command(&api.handler, event).await,
            },
            kind::TASK => match event.command.as_str() {
                command::UPDATE_STATE => {
                    let update: TaskStateUpdate = decode(event)?;
                    let mut task = api.task.get(&update.id).await?;
                    task.state = update.state;
                    api.task.save(task).await?;
                    Ok(None)
                }
                _ => self.managed_command(&api.task, event).await,
            },
            kind::SCHEDULER => match event.command.as_str() {
                command::UPDATE_STATE => {
                    let update: ScheduleStateUpdate = decode(event)?;
                    let mut schedule = api.schedule.get(&update.id).await?;
                    schedule.state = update.state;
                    api.schedule.save(schedule).await?;
                    Ok(None)
                }
                _ => self.managed_command(&api.schedule, event).await,
            },
            kind::FIRMWARE => match event.command.as_str() {
                command::BLOCKS => {
                    self.stream_firmware(event).await?;
                    Ok(None)
                }
                _ => crud(&api.firmware, event).await,
            },
            kind::SYSTEM_JOBS => {
                self.ctx.bus.publish(topics::INTERNAL_SYSTEM_JOBS, event)?;
                Ok(None)
            }
            kind::RESOURCE_ACTION => {
                let action: ResourceAction = decode(event)?;
                self.schedule_action(action).await.map(|_| None)
            }
            other => Err(ResourceError::Unsupported(format!("service type `{other}`"))),
        }
    }

    async fn gateway_command(self: &Arc<Self>, event: &ServiceEvent) -> Result<Option<Value>, ResourceError> {
        match event.command.as_str() {
            command::UPDATE_STATE => {
                let update: EntityState = decode(event)?;
                self.update_gateway_state(update).await.map(|_| None)
            }
            command::DISABLE | command::STOP => {
                self.reconnect.cancel(&event.id);
                self.managed_command(&self.ctx.api.gateway, event).await
            }
            _ => self.managed_command(&self.ctx.api.gateway, event).await,
        }
    }

    /// 记录网关状态：up 时取消重连；down / error 时按 `reconnectDelay` 登记一次重连。
    async fn update_gateway_state(self: &Arc<Self>, update: EntityState) -> Result<(), ResourceError> {
        let repo = &self.ctx.api.gateway;
        let mut gateway = repo.get(&update.id).await?;
        let status = update.state.status;
        gateway.state.transition(update.state);
        let gateway = repo.save(gateway).await?;
        match status {
            Status::Up => {
                if self.reconnect.cancel(&gateway.id) {
                    info!(target: "mc.resource", gateway_id = %gateway.id, "gateway_reconnect_cancelled");
                }
            }
            Status::Down | Status::Error
                if gateway.enabled && !gateway.reconnect_delay.trim().is_empty() =>
            {
                let service = Arc::downgrade(self);
                let id = gateway.id.clone();
                self.reconnect.schedule(
                    &gateway.id,
                    &gateway.reconnect_delay,
                    Arc::new(move || fire_reconnect(&service, &id)),
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    /// 重连计时器触发：移除计时器，网关仍启用且未恢复时请求重载。
    pub async fn reconnect(&self, gateway_id: &str) -> Result<bool, ResourceError> {
        if !self.reconnect.cancel(gateway_id) {
            return Ok(false);
        }
        let Some(gateway) = self.ctx.api.gateway.find(gateway_id).await? else {
            return Ok(false);
        };
        if !gateway.enabled || gateway.state.status == Status::Up {
            return Ok(false);
        }
        info!(target: "mc.resource", gateway_id = %gateway_id, "gateway_reconnect");
        self.notify(&gateway, command::RELOAD)?;
        Ok(true)
    }

    async fn managed_command<T: Managed>(
        &self,
        repo: &Repository<T>,
        event: &ServiceEvent,
    ) -> Result<Option<Value>, ResourceError> {
        match event.command.as_str() {
            command::LOAD_ALL => {
                let count = self.load_all(repo).await?;
                Ok(Some(Value::from(count)))
            }
            command::ENABLE => self.toggle(repo, &event.id, Toggle::Enable).await.map(|_| None),
            command::DISABLE => self.toggle(repo, &event.id, Toggle::Disable).await.map(|_| None),
            command::RELOAD => self.toggle(repo, &event.id, Toggle::Reload).await.map(|_| None),
            command::START => {
                let entity = repo.get(&event.id).await?;
                self.notify(&entity, command::ADD).map(|_| None)
            }
            command::STOP => {
                let entity = repo.get(&event.id).await?;
                self.notify(&entity, command::REMOVE).map(|_| None)
            }
            command::SAVE => {
                let entity = repo.save(decode::<T>(event)?).await?;
                self.notify(&entity, if entity.is_enabled() { command::RELOAD } else { command::REMOVE })?;
                serde_json::to_value(&entity)
                    .map(Some)
                    .map_err(|err| ResourceError::Decode(err.to_string()))
            }
            _ => crud(repo, event).await,
        }
    }

    /// 为每个启用的实体向运行时发布 `add`。
    async fn load_all<T: Managed>(&self, repo: &Repository<T>) -> Result<usize, ResourceError> {
        let enabled: Vec<T> = repo
            .list(&[])
            .await?
            .into_iter()
            .filter(|entity| entity.is_enabled())
            .collect();
        for entity in &enabled {
            self.notify(entity, command::ADD)?;
        }
        info!(target: "mc.resource", service_type = %T::SERVICE_TYPE, count = enabled.len(), "resource_load_all");
        Ok(enabled.len())
    }

    async fn toggle<T: Managed>(
        &self,
        repo: &Repository<T>,
        id: &str,
        toggle: Toggle,
    ) -> Result<(), ResourceError> {
        let mut entity = repo.get(id).await?;
        match toggle {
            Toggle::Enable | Toggle::Disable => {
                let enabled = toggle == Toggle::Enable;
                if entity.is_enabled() != enabled {
                    entity.set_enabled(enabled);
                    entity = repo.save(entity).await?;
                }
                self.notify(&entity, if enabled { command::ADD } else { command::REMOVE })?;
            }
            Toggle::Reload => {
                let command = if entity.is_enabled() { command::RELOAD } else { command::REMOVE };
                self.notify(&entity, command)?;
            }
        }
        debug!(target: "mc.resource", service_type = %T::SERVICE_TYPE, id = %id, action = ?toggle, "resource_toggled");
        Ok(())
    }

    fn notify<T: Managed>(&self, entity: &T, command: &str) -> Result<(), ResourceError> {
        let event = ServiceEvent::new(T::SERVICE_TYPE, command)
            .with_id(entity.id())
            .with_data(entity)?;
        self.ctx.bus.publish(T::SERVICE_TOPIC, &event)?;
        Ok(())
    }

    async fn stream_firmware(&self, event: &ServiceEvent) -> Result<(), ResourceError> {
        let firmware = self.ctx.api.firmware.get(&event.id).await?;
        let bytes = self
            .ctx
            .api
            .firmware_blobs
            .read(&firmware.file.internal_name)
            .await?;
        let topic = if event.reply_topic.is_empty() {
            topics::firmware_blocks(&event.id)
        } else {
            event.reply_topic.clone()
        };
        let blocks = split_blocks(&firmware.id, &bytes);
        for block in &blocks {
            self.ctx.bus.publish(&topic, block)?;
        }
        info!(
            target: "mc.resource",
            firmware_id = %firmware.id,
            size = bytes.len(),
            blocks = blocks.len(),
            "firmware_blocks_sent"
        );
        Ok(())
    }

    /// 立即执行；带 `preDelay` 的动作延后在独立任务中执行。
    async fn schedule_action(self: &Arc<Self>, action: ResourceAction) -> Result<(), ResourceError> {
        if action.pre_delay.trim().is_empty() {
            return self.run_action(&action).await.map(|_| ());
        }
        let delay = parse_duration(&action.pre_delay).map_err(|err| ResourceError::Config(err.to_string()))?;
        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = service.run_action(&action).await {
                warn!(
                    target: "mc.resource",
                    quick_id = %action.quick_id,
                    resource_type = %action.resource_type,
                    error = %err,
                    "resource_action_failed"
                );
            }
        });
        Ok(())
    }

    /// 解析目标并逐个执行；返回执行的目标数。
    pub async fn run_action(&self, action: &ResourceAction) -> Result<usize, ResourceError> {
        let targets = if !action.quick_id.trim().is_empty() {
            vec![Target::from_quick_id(&QuickId::parse(action.quick_id.trim())?)?]
        } else {
            let resource_type = ResourceType::parse(&action.resource_type).ok_or_else(|| {
                ResourceError::Config(format!("unknown resource type `{}`", action.resource_type))
            })?;
            if action.labels.is_empty() {
                return Err(ResourceError::Config("resource action without quick id or labels".to_string()));
            }
            self.ctx
                .api
                .list_by_labels(resource_type, &action.labels)
                .await?
                .iter()
                .map(|entity| Target::from_entity(resource_type, entity))
                .collect::<Result<Vec<_>, _>>()?
        };
        for target in &targets {
            self.apply(target, &action.payload).await?;
        }
        debug!(target: "mc.resource", targets = targets.len(), "resource_action_done");
        Ok(targets.len())
    }

    async fn apply(&self, target: &Target, payload: &str) -> Result<(), ResourceError> {
        let api = &self.ctx.api;
        match target {
            Target::Field {
                gateway_id,
                node_id,
                source_id,
                field_id,
            } => {
                let message = Message::new(gateway_id, node_id, source_id, MessageType::Set)
                    .with_payload(Payload::new(field_id.clone(), payload.trim()));
                self.ctx.bus.publish(topics::MESSAGE_TO_PROCESSOR, &message)?;
            }
            Target::Node { gateway_id, node_id } => {
                let action = payload.trim();
                if action.is_empty() {
                    return Err(ResourceError::Config("node action without payload".to_string()));
                }
                let message = Message::new(gateway_id, node_id, "", MessageType::Action)
                    .with_payload(Payload::new(action, ""));
                self.ctx.bus.publish(topics::MESSAGE_TO_PROCESSOR, &message)?;
            }
            Target::Gateway(id) => {
                let toggle = Toggle::parse(payload)?;
                if toggle == Toggle::Disable {
                    self.reconnect.cancel(id);
                }
                self.toggle(&api.gateway, id, toggle).await?;
            }
            Target::Task(id) => self.toggle(&api.task, id, Toggle::parse(payload)?).await?,
            Target::Schedule(id) => self.toggle(&api.schedule, id, Toggle::parse(payload)?).await?,
            Target::Handler(id) => self.toggle(&api.handler, id, Toggle::parse(payload)?).await?,
            Target::DataRepository { id, key_path } => {
                let mut repository = api.data_repository.get(id).await?;
                if repository.read_only {
                    return Err(ResourceError::ReadOnly(format!("data repository `{id}`")));
                }
                set_by_path(&mut repository.data, key_path, payload_value(payload))?;
                api.data_repository.save(repository).await?;
            }
        }
        Ok(())
    }

    /// 关停时清除全部重连计时器。
    pub fn close(&self) {
        self.reconnect.cancel_all();
    }

    /// 订阅 `service.resource_server`；单 worker 保证状态回写顺序。
    pub fn start_listener(self: &Arc<Self>, capacity: usize) -> Result<QueueListener, BusError> {
        let service = self.clone();
        QueueListener::start(
            self.ctx.bus.clone(),
            topics::SERVICE_RESOURCE_SERVER,
            "resource_server",
            capacity,
            1,
            queue_callback(move |data: BusData| {
                let service = service.clone();
                async move {
                    match data.decode::<ServiceEvent>() {
                        Ok(event) => service.handle_service_event(&event).await,
                        Err(err) => warn!(target: "mc.resource", error = %err, "resource_service_event_invalid"),
                    }
                }
            }),
        )
    }
}

fn fire_reconnect(service: &Weak<ResourceService>, gateway_id: &str) {
    let Some(service) = service.upgrade() else {
        return;
    };
    let gateway_id = gateway_id.to_string();
    tokio::spawn(async move {
        if let Err(err) = service.reconnect(&gateway_id).await {
            warn!(target: "mc.resource", gateway_id = %gateway_id, error = %err, "gateway_reconnect_failed");
        }
    });
}

/// 通用的 get / list / save。
async fn crud<T: Entity>(repo: &Repository<T>, event: &ServiceEvent) -> Result<Option<Value>, ResourceError> {
    let value = match event.command.as_str() {
        command::GET => serde_json::to_value(repo.get(&event.id).await?),
        command::LIST => {
            let query: ListQuery = decode_or_default(event)?;
            serde_json::to_value(repo.list(&query.filters).await?)
        }
        command::SAVE => {
            let entity: T = decode(event)?;
            serde_json::to_value(repo.save(entity).await?)
        }
        other => {
            return Err(ResourceError::Unsupported(format!(
                "command `{other}` on `{}`",
                event.service_type
            )));
        }
    };
    value.map(Some).map_err(|err| ResourceError::Decode(err.to_string()))
}

fn decode<T: DeserializeOwned>(event: &ServiceEvent) -> Result<T, ResourceError> {
    event
        .decode_data::<T>()
        .map_err(|err| ResourceError::Decode(err.to_string()))
}

fn decode_or_default<T: DeserializeOwned + Default>(event: &ServiceEvent) -> Result<T, ResourceError> {
    if event.data.trim().is_empty() {
        return Ok(T::default());
    }
    decode(event)
}
