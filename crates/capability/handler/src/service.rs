//! 处理器运行时：实例存储、生命周期与总线监听。

use crate::error::HandlerError;
use crate::plugin::{Handler, HandlerContext, route_params};
use crate::plugins::create_handler;
use contract::service::{command, kind};
use contract::{EntityState, HandlerMessage, ServiceEvent, ServiceFilter, topics};
use domain::{HandlerConfig, State, Status};
use mc_bus::{BusData, BusError, BusExt, QueueListener, queue_callback};
use mc_crypto::SecretCipher;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// `reload` 在停止与重新启动之间的等待。
pub const RELOAD_DELAY: Duration = Duration::from_secs(1);

const MESSAGE_WORKERS: usize = 4;

/// 处理器服务。
pub struct HandlerService {
    ctx: HandlerContext,
    cipher: Option<SecretCipher>,
    filter: ServiceFilter,
    store: RwLock<HashMap<String, Arc<dyn Handler>>>,
    reload_delay: Duration,
}

impl HandlerService {
    pub fn new(ctx: HandlerContext, cipher: Option<SecretCipher>, filter: ServiceFilter) -> Self {
        Self {
            ctx,
            cipher,
            filter,
            store: RwLock::new(HashMap::new()),
            reload_delay: RELOAD_DELAY,
        }
    }

    pub fn with_reload_delay(mut self, delay: Duration) -> Self {
        self.reload_delay = delay;
        self
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.store
            .read()
            .map(|store| store.contains_key(id))
            .unwrap_or_default()
    }

    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .store
            .read()
            .map(|store| store.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn get(&self, id: &str) -> Option<Arc<dyn Handler>> {
        self.store
            .read()
            .ok()
            .and_then(|store| store.get(id).cloned())
    }

    /// 启动处理器实例；已在运行时不重复启动。
    pub async fn start(&self, config: HandlerConfig) -> Result<(), HandlerError> {
        if !self
            .filter
            .matches(&config.id, &config.handler_type, &config.labels)
        {
            debug!(target: "mc.handler", handler_id = %config.id, "handler_filtered_out");
            return Ok(());
        }
        if !config.enabled {
            if self.is_running(&config.id) {
                self.stop(&config.id).await;
            }
            return Ok(());
        }
        if self.is_running(&config.id) {
            debug!(target: "mc.handler", handler_id = %config.id, "handler_already_running");
            return Ok(());
        }

        let handler = match self.build(&config).await {
            Ok(handler) => handler,
            Err(err) => {
                warn!(
                    target: "mc.handler",
                    handler_id = %config.id,
                    handler_type = %config.handler_type,
                    error = %err,
                    "handler_start_failed"
                );
                self.report_state(&config.id, State::down(err.to_string()));
                return Err(err);
            }
        };
        self.store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(config.id.clone(), handler);
        self.report_state(&config.id, State::up("Started successfully"));
        info!(
            target: "mc.handler",
            handler_id = %config.id,
            handler_type = %config.handler_type,
            "handler_started"
        );
        Ok(())
    }

    async fn build(&self, config: &HandlerConfig) -> Result<Arc<dyn Handler>, HandlerError> {
        let mut config = config.clone();
        if let Some(cipher) = &self.cipher {
            cipher.decrypt_secrets(&mut config.spec)?;
        }
        let handler = create_handler(&config, &self.ctx)?;
        if let Err(err) = handler.start().await {
            handler.close().await;
            return Err(err);
        }
        Ok(handler)
    }

    /// 停止并移除实例；返回实例此前是否在运行。
    pub async fn stop(&self, id: &str) -> bool {
        let removed = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        let Some(handler) = removed else {
            return false;
        };
        handler.close().await;
        self.report_state(id, State::down("Stopped by request"));
        info!(target: "mc.handler", handler_id = %id, "handler_stopped");
        true
    }

    pub async fn reload(&self, config: HandlerConfig) -> Result<(), HandlerError> {
        self.stop(&config.id).await;
        tokio::time::sleep(self.reload_delay).await;
        self.start(config).await
    }

    pub async fn unload_all(&self) {
        for id in self.running_ids() {
            self.stop(&id).await;
        }
    }

    /// 请求资源服务下发全部处理器配置（逐个以 `add` 回到 `service.handler`）。
    pub fn load_all(&self) -> Result<(), BusError> {
        let event = ServiceEvent::new(kind::HANDLER, command::LOAD_ALL);
        self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)
    }

    /// 把消息交给对应处理器，并回写 ok/error 状态。
    pub async fn post(&self, message: &HandlerMessage) -> Result<(), HandlerError> {
        let handler = self
            .get(&message.id)
            .ok_or_else(|| HandlerError::NotRunning(message.id.clone()))?;
        let params = route_params(&message.id, handler.handler_type(), &message.data);
        if params.is_empty() {
            debug!(target: "mc.handler", handler_id = %message.id, "handler_post_skipped_empty");
            return Ok(());
        }
        let result = handler.post(&params).await;
        mc_telemetry::record_handler_post(result.is_ok());
        match &result {
            Ok(()) => self.report_state(&message.id, State::new(Status::Ok, "")),
            Err(err) => {
                warn!(target: "mc.handler", handler_id = %message.id, error = %err, "handler_post_failed");
                self.report_state(&message.id, State::error(err.to_string()));
            }
        }
        result
    }

    fn report_state(&self, id: &str, state: State) {
        let payload = EntityState {
            id: id.to_string(),
            state,
        };
        let event = match ServiceEvent::new(kind::HANDLER, command::UPDATE_STATE)
            .with_id(id)
            .with_data(&payload)
        {
            Ok(event) => event,
            Err(err) => {
                warn!(target: "mc.handler", handler_id = %id, error = %err, "handler_state_encode_failed");
                return;
            }
        };
        if let Err(err) = self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event) {
            warn!(target: "mc.handler", handler_id = %id, error = %err, "handler_state_publish_failed");
        }
    }

    /// 处理 `service.handler` 上的命令。
    pub async fn handle_service_event(&self, event: &ServiceEvent) {
        let result = match event.command.as_str() {
            command::LOAD_ALL => self.load_all().map_err(HandlerError::from),
            command::UNLOAD_ALL => {
                self.unload_all().await;
                Ok(())
            }
            command::ADD | command::START => match decode_config(event) {
                Ok(config) => self.start(config).await,
                Err(err) => Err(err),
            },
            command::RELOAD => match decode_config(event) {
                Ok(config) => self.reload(config).await,
                Err(err) => Err(err),
            },
            command::REMOVE | command::STOP => {
                let id = match decode_config(event) {
                    Ok(config) if !config.id.is_empty() => config.id,
                    _ => event.id.clone(),
                };
                self.stop(&id).await;
                Ok(())
            }
            other => {
                warn!(target: "mc.handler", command = %other, "handler_command_unsupported");
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(
                target: "mc.handler",
                command = %event.command,
                id = %event.id,
                error = %err,
                "handler_command_failed"
            );
        }
    }

    /// 订阅 `service.handler` 与 `message.notify_handler`。
    pub fn start_listeners(
        self: &Arc<Self>,
        capacity: usize,
    ) -> Result<HandlerListeners, BusError> {
        let service = self.clone();
        let commands = QueueListener::start(
            self.ctx.bus.clone(),
            topics::SERVICE_HANDLER,
            "handler_service",
            capacity,
            1,
            queue_callback(move |data: BusData| {
                let service = service.clone();
                async move {
                    match data.decode::<ServiceEvent>() {
                        Ok(event) => service.handle_service_event(&event).await,
                        Err(err) => {
                            warn!(target: "mc.handler", error = %err, "handler_service_event_invalid")
                        }
                    }
                }
            }),
        )?;
        let service = self.clone();
        let messages = QueueListener::start(
            self.ctx.bus.clone(),
            topics::MESSAGE_NOTIFY_HANDLER,
            "handler_messages",
            capacity,
            MESSAGE_WORKERS,
            queue_callback(move |data: BusData| {
                let service = service.clone();
                async move {
                    match data.decode::<HandlerMessage>() {
                        Ok(message) => {
                            if let Err(err) = service.post(&message).await {
                                debug!(target: "mc.handler", handler_id = %message.id, error = %err, "handler_message_not_delivered");
                            }
                        }
                        Err(err) => {
                            warn!(target: "mc.handler", error = %err, "handler_message_invalid")
                        }
                    }
                }
            }),
        )?;
        Ok(HandlerListeners { commands, messages })
    }
}

fn decode_config(event: &ServiceEvent) -> Result<HandlerConfig, HandlerError> {
    event
        .decode_data::<HandlerConfig>()
        .map_err(|err| HandlerError::Config(err.to_string()))
}

/// 运行中的监听器。
pub struct HandlerListeners {
    commands: QueueListener,
    messages: QueueListener,
}

impl HandlerListeners {
    pub async fn close(&self) {
        self.commands.close().await;
        self.messages.close().await;
    }
}
