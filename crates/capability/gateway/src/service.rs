//! 网关运行时：实例存储、生命周期与总线监听。
//!
//! 每个运行中的网关持有：provider、报文日志器、接收队列（单 worker，保证顺序）
//! 以及订阅 `message.to_provider.<id>` 的下发监听器。状态变化经
//! `service.resource_server` 交给资源服务记录；断线重连由资源服务按
//! `reconnectDelay` 调度。

use crate::error::GatewayError;
use crate::logger::{MessageLogger, create_logger};
use crate::provider::{Provider, ProviderContext, create_provider};
use contract::service::{command, kind};
use contract::{EntityState, ServiceEvent, ServiceFilter, topics};
use domain::{Gateway, Message, RawMessage, State};
use mc_bus::{Bus, BoundedQueue, BusData, BusError, BusExt, QueueListener, queue_callback};
use mc_crypto::SecretCipher;
use mc_protocol::RxHandler;
use mc_scheduler::CoreScheduler;
use mc_script::WebhookClient;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// `reload` 在停止与重新启动之间的等待。
pub const RELOAD_DELAY: Duration = Duration::from_secs(1);

const INBOUND_QUEUE_CAPACITY: usize = 1000;

/// 网关服务依赖。
#[derive(Clone)]
pub struct GatewayContext {
    pub bus: Arc<dyn Bus>,
    pub scheduler: Arc<CoreScheduler>,
    pub webhook: WebhookClient,
    /// 报文日志根目录（`<logs>/gateway_logs/`）
    pub logs_dir: PathBuf,
}

struct GatewayInstance {
    provider: Arc<dyn Provider>,
    logger: Arc<dyn MessageLogger>,
    inbound: Arc<BoundedQueue<RawMessage>>,
    outbound: QueueListener,
}

impl GatewayInstance {
    async fn close(&self) {
        self.outbound.close().await;
        self.provider.close().await;
        self.inbound.close().await;
        self.logger.close().await;
    }
}

/// 网关服务。
pub struct GatewayService {
    ctx: GatewayContext,
    cipher: Option<SecretCipher>,
    filter: ServiceFilter,
    store: RwLock<HashMap<String, Arc<GatewayInstance>>>,
    reload_delay: Duration,
}

impl GatewayService {
    pub fn new(ctx: GatewayContext, cipher: Option<SecretCipher>, filter: ServiceFilter) -> Self {
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

    fn get(&self, id: &str) -> Option<Arc<GatewayInstance>> {
        self.store
            .read()
            .ok()
            .and_then(|store| store.get(id).cloned())
    }

    /// 启动网关；已在运行时不重复启动，禁用的网关会被停止。
    pub async fn start(&self, gateway: Gateway) -> Result<(), GatewayError> {
        if !self
            .filter
            .matches(&gateway.id, gateway.provider_type(), &gateway.labels)
        {
            debug!(target: "mc.gateway", gateway_id = %gateway.id, "gateway_filtered_out");
            return Ok(());
        }
        if !gateway.enabled {
            if self.is_running(&gateway.id) {
                self.stop(&gateway.id).await;
            }
            return Ok(());
        }
        if self.is_running(&gateway.id) {
            debug!(target: "mc.gateway", gateway_id = %gateway.id, "gateway_already_running");
            return Ok(());
        }

        let instance = match self.build(&gateway).await {
            Ok(instance) => instance,
            Err(err) => {
                warn!(
                    target: "mc.gateway",
                    gateway_id = %gateway.id,
                    provider = %gateway.provider_type(),
                    error = %err,
                    "gateway_start_failed"
                );
                report_state(self.ctx.bus.as_ref(), &gateway.id, State::down(err.to_string()));
                return Err(err);
            }
        };
        self.store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(gateway.id.clone(), Arc::new(instance));
        report_state(self.ctx.bus.as_ref(), &gateway.id, State::up("Started successfully"));
        info!(
            target: "mc.gateway",
            gateway_id = %gateway.id,
            provider = %gateway.provider_type(),
            "gateway_started"
        );
        Ok(())
    }

    async fn build(&self, gateway: &Gateway) -> Result<GatewayInstance, GatewayError> {
        let mut gateway = gateway.clone();
        if let Some(cipher) = &self.cipher {
            cipher.decrypt_secrets(&mut gateway.provider)?;
        }
        let logger = create_logger(&gateway.id, &self.ctx.logs_dir, &gateway.message_logger).await?;
        let provider_ctx = ProviderContext {
            gateway: gateway.clone(),
            bus: self.ctx.bus.clone(),
            scheduler: self.ctx.scheduler.clone(),
            webhook: self.ctx.webhook.clone(),
            logger: logger.clone(),
        };
        let provider = match create_provider(provider_ctx) {
            Ok(provider) => provider,
            Err(err) => {
                logger.close().await;
                return Err(err);
            }
        };

        let inbound = Arc::new(BoundedQueue::new(
            format!("gateway_inbound_{}", gateway.id),
            INBOUND_QUEUE_CAPACITY,
            1,
            inbound_callback(&gateway.id, self.ctx.bus.clone(), provider.clone(), logger.clone()),
        ));
        let producer = inbound.clone();
        let rx: RxHandler = Arc::new(move |raw: RawMessage| {
            producer.produce(raw);
        });
        if let Err(err) = provider.start(rx).await {
            provider.close().await;
            inbound.close().await;
            logger.close().await;
            return Err(err);
        }

        let outbound = match self.start_outbound(&gateway.id, provider.clone()) {
            Ok(listener) => listener,
            Err(err) => {
                provider.close().await;
                inbound.close().await;
                logger.close().await;
                return Err(err.into());
            }
        };
        Ok(GatewayInstance {
            provider,
            logger,
            inbound,
            outbound,
        })
    }

    /// 订阅 `message.to_provider.<id>`，逐条下发（单 worker 保证顺序）。
    fn start_outbound(
        &self,
        gateway_id: &str,
        provider: Arc<dyn Provider>,
    ) -> Result<QueueListener, BusError> {
        let bus = self.ctx.bus.clone();
        let id = gateway_id.to_string();
        QueueListener::start(
            self.ctx.bus.clone(),
            &topics::message_to_provider(gateway_id),
            &format!("gateway_outbound_{gateway_id}"),
            INBOUND_QUEUE_CAPACITY,
            1,
            queue_callback(move |data: BusData| {
                let bus = bus.clone();
                let id = id.clone();
                let provider = provider.clone();
                async move {
                    let message = match data.decode::<Message>() {
                        Ok(message) => message,
                        Err(err) => {
                            warn!(target: "mc.gateway", gateway_id = %id, error = %err, "gateway_outbound_invalid");
                            return;
                        }
                    };
                    if let Err(err) = provider.post(&message).await {
                        warn!(
                            target: "mc.gateway",
                            gateway_id = %id,
                            node_id = %message.node_id,
                            error = %err,
                            "gateway_post_failed"
                        );
                        if err.is_disconnected() {
                            report_state(bus.as_ref(), &id, State::down(err.to_string()));
                        }
                    }
                }
            }),
        )
    }

    /// 直接下发一条消息（不经总线）。
    pub async fn post(&self, message: &Message) -> Result<(), GatewayError> {
        let instance = self
            .get(&message.gateway_id)
            .ok_or_else(|| GatewayError::NotRunning(message.gateway_id.clone()))?;
        instance.provider.post(message).await
    }

    /// 停止并移除实例；返回实例此前是否在运行。
    pub async fn stop(&self, id: &str) -> bool {
        let removed = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        let Some(instance) = removed else {
            return false;
        };
        instance.close().await;
        report_state(self.ctx.bus.as_ref(), id, State::down("Stopped by request"));
        info!(target: "mc.gateway", gateway_id = %id, "gateway_stopped");
        true
    }

    pub async fn reload(&self, gateway: Gateway) -> Result<(), GatewayError> {
        self.stop(&gateway.id).await;
        tokio::time::sleep(self.reload_delay).await;
        self.start(gateway).await
    }

    pub async fn unload_all(&self) {
        for id in self.running_ids() {
            self.stop(&id).await;
        }
    }

    /// 请求资源服务下发全部网关配置（逐个以 `add` 回到 `service.gateway`）。
    pub fn load_all(&self) -> Result<(), BusError> {
        let event = ServiceEvent::new(kind::GATEWAY, command::LOAD_ALL);
        self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)
    }

    /// 处理 `service.gateway` 上的命令。
    pub async fn handle_service_event(&self, event: &ServiceEvent) {
        let result = match event.command.as_str() {
            command::LOAD_ALL => self.load_all().map_err(GatewayError::from),
            command::UNLOAD_ALL => {
                self.unload_all().await;
                Ok(())
            }
            command::ADD | command::START => match decode_gateway(event) {
                Ok(gateway) => self.start(gateway).await,
                Err(err) => Err(err),
            },
            command::RELOAD => match decode_gateway(event) {
                Ok(gateway) => self.reload(gateway).await,
                Err(err) => Err(err),
            },
            command::REMOVE | command::STOP => {
                let id = match decode_gateway(event) {
                    Ok(gateway) if !gateway.id.is_empty() => gateway.id,
                    _ => event.id.clone(),
                };
                self.stop(&id).await;
                Ok(())
            }
            other => {
                warn!(target: "mc.gateway", command = %other, "gateway_command_unsupported");
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(
                target: "mc.gateway",
                command = %event.command,
                id = %event.id,
                error = %err,
                "gateway_command_failed"
            );
        }
    }

    /// 订阅 `service.gateway`。
    pub fn start_listeners(self: &Arc<Self>, capacity: usize) -> Result<QueueListener, BusError> {
        let service = self.clone();
        QueueListener::start(
            self.ctx.bus.clone(),
            topics::SERVICE_GATEWAY,
            "gateway_service",
            capacity,
            1,
            queue_callback(move |data: BusData| {
                let service = service.clone();
                async move {
                    match data.decode::<ServiceEvent>() {
                        Ok(event) => service.handle_service_event(&event).await,
                        Err(err) => {
                            warn!(target: "mc.gateway", error = %err, "gateway_service_event_invalid")
                        }
                    }
                }
            }),
        )
    }
}

/// 接收 worker：记录、解码，把规范化消息交给消息处理器。
fn inbound_callback(
    gateway_id: &str,
    bus: Arc<dyn Bus>,
    provider: Arc<dyn Provider>,
    logger: Arc<dyn MessageLogger>,
) -> mc_bus::QueueCallback<RawMessage> {
    let gateway_id = gateway_id.to_string();
    queue_callback(move |raw: RawMessage| {
        let gateway_id = gateway_id.clone();
        let bus = bus.clone();
        let provider = provider.clone();
        let logger = logger.clone();
        async move {
            logger.log(&raw);
            mc_telemetry::record_message_received();
            let messages = match provider.process_received(raw).await {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(target: "mc.gateway", gateway_id = %gateway_id, error = %err, "gateway_message_decode_failed");
                    return;
                }
            };
            for message in messages {
                if let Err(err) = bus.publish(topics::MESSAGE_TO_PROCESSOR, &message) {
                    warn!(target: "mc.gateway", gateway_id = %gateway_id, error = %err, "gateway_message_forward_failed");
                }
            }
        }
    })
}

fn report_state(bus: &dyn Bus, id: &str, state: State) {
    let payload = EntityState {
        id: id.to_string(),
        state,
    };
    let event = match ServiceEvent::new(kind::GATEWAY, command::UPDATE_STATE)
        .with_id(id)
        .with_data(&payload)
    {
        Ok(event) => event,
        Err(err) => {
            warn!(target: "mc.gateway", gateway_id = %id, error = %err, "gateway_state_encode_failed");
            return;
        }
    };
    if let Err(err) = bus.publish(topics::SERVICE_RESOURCE_SERVER, &event) {
        warn!(target: "mc.gateway", gateway_id = %id, error = %err, "gateway_state_publish_failed");
    }
}

fn decode_gateway(event: &ServiceEvent) -> Result<Gateway, GatewayError> {
    event
        .decode_data::<Gateway>()
        .map_err(|err| GatewayError::Config(err.to_string()))
}
