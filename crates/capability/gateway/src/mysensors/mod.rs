//! MySensors 2.x provider。
//!
//! - 串口 / 以太网按行收发，MQTT 按 topic 收发
//! - 需要确认的报文订阅 `message.raw_message_acknowledgement.<gw>.<ackId>` 后写出，
//!   超时重发，`retryCount` 为总尝试次数
//! - 内部报文：节点 ID 分配、时间、单位制、周期发现、睡眠通知
//! - OTA 固件服务

pub mod codec;
pub mod firmware;
pub mod types;

use crate::error::GatewayError;
use crate::provider::{PROTOCOL_MQTT, Provider, ProviderContext, open_transport};
use async_trait::async_trait;
use chrono::{DateTime, Local, Offset, TimeZone, Utc};
use codec::{Frame, encode_message};
use contract::service::{command, kind};
use contract::{LabelUpdate, ListQuery, QueryFilter, ServiceEvent, topics};
use domain::labels::{
    LABEL_ASSIGNED_FIRMWARE, LABEL_ERASE_EEPROM, LABEL_IMPERIAL_SYSTEM, LABEL_NODE_ID,
    LABEL_OTA_BLOCK_ORDER, LABEL_TIMEZONE,
};
use domain::message::keys;
use domain::{Firmware, Labels, Message, MessageType, Node, Payload, RawMessage};
use firmware::{
    CACHE_IDLE_LIMIT, CACHE_PURGE_SPEC, FirmwareCache, FirmwareConfigRequest,
    FirmwareConfigResponse, FirmwareImage, FirmwareRequest, fetch_firmware_bytes,
};
use mc_bus::{Bus, BusData, BusExt, DEFAULT_REQUEST_TIMEOUT};
use mc_protocol::{MqttConfig, OTHER_TOPIC, RxHandler, Transport, parse_config};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use types::{BROADCAST_ID, Command, NODE_SOURCE_ID, internal, stream};

const MIN_ACK_TIMEOUT: Duration = Duration::from_millis(10);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(200);
const OTA_PROGRESS_STEP: u32 = 10;

/// MySensors provider 配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MySensorsConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    /// 传输配置：`type` 为 `serial`、`ethernet` 或 `mqtt`
    pub protocol: domain::Spec,
    pub enable_internal_message_ack: bool,
    pub enable_stream_message_ack: bool,
    pub retry_count: u32,
    pub timeout: String,
    pub discover_interval: String,
}

impl Default for MySensorsConfig {
    fn default() -> Self {
        Self {
            provider_type: crate::provider::PROVIDER_MYSENSORS.to_string(),
            protocol: domain::Spec::new(),
            enable_internal_message_ack: false,
            enable_stream_message_ack: false,
            retry_count: 3,
            timeout: "200ms".to_string(),
            discover_interval: "15m".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct OtaSession {
    started: DateTime<Utc>,
    reverse: bool,
}

/// MySensors provider。
pub struct MySensorsProvider {
    ctx: ProviderContext,
    config: MySensorsConfig,
    ack_timeout: Duration,
    retry_count: u32,
    /// MQTT 协议时的发布前缀
    publish_prefix: Option<String>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    allocated: Mutex<BTreeSet<u8>>,
    sleep_queue: Mutex<HashMap<u8, Vec<Frame>>>,
    firmware: Arc<FirmwareCache>,
    ota_sessions: Mutex<HashMap<u8, OtaSession>>,
}

impl MySensorsProvider {
    pub fn new(ctx: ProviderContext, config: MySensorsConfig) -> Result<Self, GatewayError> {
        let protocol_type = config
            .protocol
            .get("type")
            .and_then(|value| value.as_str())
            .unwrap_or_default();
        let publish_prefix = if protocol_type == PROTOCOL_MQTT {
            let mqtt: MqttConfig = parse_config(&config.protocol)?;
            if mqtt.publish.trim().is_empty() {
                return Err(GatewayError::Config("mqtt publish prefix is empty".to_string()));
            }
            Some(mqtt.publish)
        } else {
            None
        };
        let ack_timeout = domain::duration::parse_duration_or(&config.timeout, DEFAULT_ACK_TIMEOUT)
            .max(MIN_ACK_TIMEOUT);
        Ok(Self {
            retry_count: config.retry_count.max(1),
            ack_timeout,
            publish_prefix,
            ctx,
            config,
            transport: RwLock::new(None),
            allocated: Mutex::new(BTreeSet::new()),
            sleep_queue: Mutex::new(HashMap::new()),
            firmware: Arc::new(FirmwareCache::new()),
            ota_sessions: Mutex::new(HashMap::new()),
        })
    }

    fn gateway_id(&self) -> &str {
        self.ctx.gateway_id()
    }

    fn discover_job_name(&self) -> String {
        format!("mysensors_discover_{}", self.gateway_id())
    }

    fn purge_job_name(&self) -> String {
        format!("mysensors_firmware_purge_{}", self.gateway_id())
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, GatewayError> {
        self.transport
            .read()
            .ok()
            .and_then(|transport| transport.clone())
            .ok_or(GatewayError::Protocol(mc_protocol::ProtocolError::NotConnected))
    }

    fn ack_required(&self, frame: &Frame) -> bool {
        if frame.node_id == BROADCAST_ID {
            return false;
        }
        match frame.command {
            Command::Internal => self.config.enable_internal_message_ack,
            Command::Stream => self.config.enable_stream_message_ack,
            _ => true,
        }
    }

    fn to_raw(&self, frame: &Frame) -> RawMessage {
        match &self.publish_prefix {
            Some(prefix) => {
                let mut raw = RawMessage::new(false, frame.payload.clone());
                raw.set_other(OTHER_TOPIC, frame.topic(prefix));
                raw
            }
            None => RawMessage::new(false, frame.to_line()),
        }
    }

    fn ack_topic(&self, ack_id: &str) -> String {
        topics::raw_message_ack(&format!("{}.{}", self.gateway_id(), ack_id))
    }

    /// 写出一帧；需要确认时等待确认并按次数重发。
    async fn send_frame(&self, mut frame: Frame) -> Result<(), GatewayError> {
        let transport = self.transport()?;
        frame.ack = self.ack_required(&frame);
        let mut raw = self.to_raw(&frame);
        raw.is_ack_enabled = frame.ack;
        if !frame.ack {
            return self.ctx.write(transport.as_ref(), &raw).await;
        }

        let ack_id = frame.ack_id();
        let topic = self.ack_topic(&ack_id);
        let (tx, mut rx) = mpsc::unbounded_channel::<BusData>();
        let sub_id = self.ctx.bus.subscribe(
            &topic,
            Arc::new(move |data| {
                let _ = tx.send(data);
            }),
        )?;
        let mut outcome = Err(GatewayError::AckTimeout(ack_id.clone()));
        for attempt in 1..=self.retry_count {
            if let Err(err) = self.ctx.write(transport.as_ref(), &raw).await {
                outcome = Err(err);
                break;
            }
            if let Ok(Some(_)) = tokio::time::timeout(self.ack_timeout, rx.recv()).await {
                outcome = Ok(());
                break;
            }
            debug!(
                target: "mc.gateway",
                gateway_id = %self.gateway_id(),
                ack_id = %ack_id,
                attempt,
                "mysensors_ack_wait_timeout"
            );
        }
        let _ = self.ctx.bus.unsubscribe(&topic, sub_id);
        if let Err(GatewayError::AckTimeout(_)) = &outcome {
            mc_telemetry::record_ack_timeout();
            warn!(
                target: "mc.gateway",
                gateway_id = %self.gateway_id(),
                ack_id = %ack_id,
                attempts = self.retry_count,
                "mysensors_ack_exhausted"
            );
        }
        outcome
    }

    fn parse_frame(&self, raw: &RawMessage) -> Result<Frame, GatewayError> {
        match raw.other_str(OTHER_TOPIC) {
            Some(topic) => Frame::parse_topic(topic, &raw.data),
            None => Frame::parse_line(&raw.data_as_string()),
        }
    }

    async fn handle_internal(&self, frame: &Frame) -> Result<Vec<Message>, GatewayError> {
        match frame.type_id {
            internal::ID_REQUEST => {
                let id = self.allocate_node_id().await?;
                self.send_frame(Frame::new(
                    BROADCAST_ID,
                    NODE_SOURCE_ID,
                    Command::Internal,
                    internal::ID_RESPONSE,
                    id.to_string(),
                ))
                .await?;
                info!(target: "mc.gateway", gateway_id = %self.gateway_id(), node_id = id, "mysensors_node_id_allocated");
                let message = Message::new(self.gateway_id(), &id.to_string(), "", MessageType::Action)
                    .with_payload(Payload::new(keys::NODE_ID_ALLOCATED, id.to_string()));
                Ok(vec![message])
            }
            internal::TIME => {
                let seconds = local_epoch_seconds(&self.ctx.gateway.labels, Utc::now());
                self.reply_internal(frame, internal::TIME, seconds.to_string()).await?;
                Ok(Vec::new())
            }
            internal::CONFIG => {
                let unit = if self.ctx.gateway.labels.get_bool(LABEL_IMPERIAL_SYSTEM) {
                    "I"
                } else {
                    "M"
                };
                self.reply_internal(frame, internal::CONFIG, unit).await?;
                Ok(Vec::new())
            }
            internal::PRE_SLEEP_NOTIFICATION => {
                self.flush_sleep_queue(frame.node_id).await;
                Ok(frame.to_message(self.gateway_id()).into_iter().collect())
            }
            internal::LOG_MESSAGE | internal::GATEWAY_READY => {
                debug!(
                    target: "mc.gateway",
                    gateway_id = %self.gateway_id(),
                    node_id = frame.node_id,
                    text = %frame.payload,
                    "mysensors_log"
                );
                Ok(Vec::new())
            }
            _ => Ok(frame.to_message(self.gateway_id()).into_iter().collect()),
        }
    }

    async fn reply_internal(
        &self,
        frame: &Frame,
        type_id: u8,
        payload: impl Into<String>,
    ) -> Result<(), GatewayError> {
        self.send_frame(Frame::new(
            frame.node_id,
            NODE_SOURCE_ID,
            Command::Internal,
            type_id,
            payload,
        ))
        .await
    }

    /// 分配 1..254 中最小的未使用节点 ID。
    async fn allocate_node_id(&self) -> Result<u8, GatewayError> {
        let query = ListQuery {
            filters: vec![QueryFilter::eq("gatewayId", self.gateway_id())],
        };
        let event = ServiceEvent::new(kind::NODE, command::LIST)
            .with_data(&query)
            .map_err(|err| GatewayError::Encode(err.to_string()))?;
        let reply = mc_bus::request(
            self.ctx.bus.as_ref(),
            topics::SERVICE_RESOURCE_SERVER,
            event,
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await?;
        let nodes: Vec<Node> = reply
            .decode_data()
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        let mut allocated = self.allocated.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut used: BTreeSet<u8> = allocated.clone();
        for node in &nodes {
            for candidate in [node.labels.get(LABEL_NODE_ID).unwrap_or_default(), node.node_id.as_str()] {
                if let Ok(id) = candidate.trim().parse::<u8>() {
                    used.insert(id);
                }
            }
        }
        let id = next_free_node_id(&used)
            .ok_or_else(|| GatewayError::NodeIdExhausted(self.gateway_id().to_string()))?;
        allocated.insert(id);
        Ok(id)
    }

    async fn fetch_node(&self, node_id: u8) -> Result<Node, GatewayError> {
        let id = Node::new(self.gateway_id(), &node_id.to_string()).id;
        let reply = mc_bus::request(
            self.ctx.bus.as_ref(),
            topics::SERVICE_RESOURCE_SERVER,
            ServiceEvent::new(kind::NODE, command::GET).with_id(id),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await?;
        reply
            .decode_data()
            .map_err(|err| GatewayError::Decode(err.to_string()))
    }

    async fn load_image(&self, firmware_id: &str) -> Result<FirmwareImage, GatewayError> {
        let reply = mc_bus::request(
            self.ctx.bus.as_ref(),
            topics::SERVICE_RESOURCE_SERVER,
            ServiceEvent::new(kind::FIRMWARE, command::GET).with_id(firmware_id),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await?;
        let firmware: Firmware = reply
            .decode_data()
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        if let Some(image) = self.firmware.get(&firmware.id, &firmware.file.checksum) {
            return Ok(image);
        }
        let bytes = fetch_firmware_bytes(&self.ctx.bus, &firmware).await?;
        let image = FirmwareImage::from_hex(&firmware, &String::from_utf8_lossy(&bytes))?;
        self.firmware.insert(image.clone());
        Ok(image)
    }

    async fn handle_firmware_config_request(&self, frame: &Frame) -> Result<(), GatewayError> {
        let request = FirmwareConfigRequest::decode(&frame.payload)?;
        let node = self.fetch_node(frame.node_id).await?;
        let response = if node.labels.get_bool(LABEL_ERASE_EEPROM) {
            self.clear_erase_eeprom(&node)?;
            info!(target: "mc.gateway", gateway_id = %self.gateway_id(), node_id = frame.node_id, "mysensors_erase_eeprom_requested");
            FirmwareConfigResponse::erase_eeprom()
        } else {
            let Some(firmware_id) = node.labels.get(LABEL_ASSIGNED_FIRMWARE).filter(|id| !id.is_empty())
            else {
                debug!(
                    target: "mc.gateway",
                    gateway_id = %self.gateway_id(),
                    node_id = frame.node_id,
                    running_type = request.type_id,
                    running_version = request.version,
                    "mysensors_no_firmware_assigned"
                );
                return Ok(());
            };
            let image = self.load_image(firmware_id).await?;
            let reverse = node.labels.get_or(LABEL_OTA_BLOCK_ORDER, "reverse") != "forward";
            self.ota_sessions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(
                    frame.node_id,
                    OtaSession {
                        started: Utc::now(),
                        reverse,
                    },
                );
            image.config_response()
        };
        self.send_frame(Frame::new(
            frame.node_id,
            NODE_SOURCE_ID,
            Command::Stream,
            stream::FIRMWARE_CONFIG_RESPONSE,
            response.encode(),
        ))
        .await
    }

    fn clear_erase_eeprom(&self, node: &Node) -> Result<(), GatewayError> {
        let mut labels = Labels::new();
        labels.set(LABEL_ERASE_EEPROM, "");
        let update = LabelUpdate {
            id: node.id.clone(),
            labels,
        };
        let event = ServiceEvent::new(kind::NODE, command::SET_LABEL)
            .with_id(node.id.clone())
            .with_data(&update)
            .map_err(|err| GatewayError::Encode(err.to_string()))?;
        self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)?;
        Ok(())
    }

    async fn handle_firmware_request(&self, frame: &Frame) -> Result<(), GatewayError> {
        let request = FirmwareRequest::decode(&frame.payload)?;
        let image = match self.firmware.find(request.type_id, request.version) {
            Some(image) => image,
            None => {
                let node = self.fetch_node(frame.node_id).await?;
                let firmware_id = node.labels.get(LABEL_ASSIGNED_FIRMWARE).unwrap_or_default();
                if firmware_id.is_empty() {
                    return Err(GatewayError::Firmware(format!(
                        "node {} requested a block without assigned firmware",
                        frame.node_id
                    )));
                }
                let image = self.load_image(firmware_id).await?;
                if image.type_id != request.type_id || image.version != request.version {
                    return Err(GatewayError::Firmware(format!(
                        "node {} requested type {} version {}, assigned firmware is {}/{}",
                        frame.node_id, request.type_id, request.version, image.type_id, image.version
                    )));
                }
                image
            }
        };
        let data = image.block(request.block).ok_or_else(|| {
            GatewayError::Firmware(format!("block {} out of range", request.block))
        })?;
        self.send_frame(Frame::new(
            frame.node_id,
            NODE_SOURCE_ID,
            Command::Stream,
            stream::FIRMWARE_RESPONSE,
            request.encode_response(data),
        ))
        .await?;
        self.report_ota_progress(frame.node_id, request.block, image.blocks);
        Ok(())
    }

    /// 每 10 块及最后一块上报一次进度。
    fn report_ota_progress(&self, node_id: u8, block: u16, total: u16) {
        let total = u32::from(total.max(1));
        let mut sessions = self.ota_sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let session = sessions
            .entry(node_id)
            .or_insert_with(|| OtaSession {
                started: Utc::now(),
                reverse: true,
            })
            .clone();
        let done = if session.reverse {
            total.saturating_sub(u32::from(block))
        } else {
            u32::from(block) + 1
        };
        let finished = done >= total;
        if done % OTA_PROGRESS_STEP != 0 && !finished && done != 1 {
            return;
        }
        let mut state = serde_json::json!({
            "running": !finished,
            "progress": done * 100 / total,
            "blockNumber": block,
            "blockTotal": total,
            "startTime": session.started,
        });
        if finished {
            state["endTime"] = serde_json::json!(Utc::now());
            sessions.remove(&node_id);
        }
        drop(sessions);
        let message = Message::new(self.gateway_id(), &node_id.to_string(), "", MessageType::Action)
            .with_payload(Payload::new(keys::NODE_FIRMWARE_STATE, state.to_string()));
        if let Err(err) = self.ctx.bus.publish(topics::MESSAGE_TO_PROCESSOR, &message) {
            warn!(target: "mc.gateway", gateway_id = %self.gateway_id(), error = %err, "ota_progress_publish_failed");
        }
    }

    async fn flush_sleep_queue(&self, node_id: u8) {
        let frames = self
            .sleep_queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&node_id)
            .unwrap_or_default();
        if frames.is_empty() {
            return;
        }
        debug!(target: "mc.gateway", gateway_id = %self.gateway_id(), node_id, count = frames.len(), "mysensors_sleep_queue_flush");
        for frame in frames {
            if let Err(err) = self.send_frame(frame).await {
                warn!(target: "mc.gateway", gateway_id = %self.gateway_id(), node_id, error = %err, "mysensors_sleep_queue_send_failed");
            }
        }
    }

    pub fn firmware_cache(&self) -> &FirmwareCache {
        &self.firmware
    }

    pub fn queued_for(&self, node_id: u8) -> usize {
        self.sleep_queue
            .lock()
            .map(|queue| queue.get(&node_id).map(Vec::len).unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for MySensorsProvider {
    fn provider_type(&self) -> &'static str {
        crate::provider::PROVIDER_MYSENSORS
    }

    async fn start(&self, rx: RxHandler) -> Result<(), GatewayError> {
        let transport = open_transport(self.gateway_id(), &self.config.protocol, rx).await?;
        *self
            .transport
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(transport);

        let discover_interval = domain::duration::parse_duration_or(
            &self.config.discover_interval,
            Duration::from_secs(15 * 60),
        );
        let bus = self.ctx.bus.clone();
        let gateway_id = self.gateway_id().to_string();
        self.ctx.scheduler.add(
            &self.discover_job_name(),
            &format!("@every {}s", discover_interval.as_secs().max(1)),
            Arc::new(move || {
                let message = Message::new(&gateway_id, &BROADCAST_ID.to_string(), "", MessageType::Action)
                    .with_payload(Payload::new(keys::ACTION_DISCOVER, ""));
                if let Err(err) = bus.publish(&topics::message_to_provider(&gateway_id), &message) {
                    warn!(target: "mc.gateway", gateway_id = %gateway_id, error = %err, "mysensors_discover_publish_failed");
                }
            }),
        )?;
        let cache = self.firmware.clone();
        self.ctx.scheduler.add(
            &self.purge_job_name(),
            CACHE_PURGE_SPEC,
            Arc::new(move || {
                cache.purge(CACHE_IDLE_LIMIT);
            }),
        )?;
        Ok(())
    }

    async fn post(&self, message: &Message) -> Result<(), GatewayError> {
        let frames = encode_message(message)?;
        if message.is_sleep_node && message.message_type != MessageType::Action {
            let mut queue = self.sleep_queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for frame in frames {
                queue.entry(frame.node_id).or_default().push(frame);
            }
            debug!(target: "mc.gateway", gateway_id = %self.gateway_id(), node_id = %message.node_id, "mysensors_message_queued_for_sleep");
            return Ok(());
        }
        for frame in frames {
            self.send_frame(frame).await?;
        }
        Ok(())
    }

    async fn process_received(&self, raw: RawMessage) -> Result<Vec<Message>, GatewayError> {
        let frame = self.parse_frame(&raw)?;
        if frame.ack {
            let topic = self.ack_topic(&frame.ack_id());
            self.ctx.bus.publish(&topic, &raw)?;
            return Ok(Vec::new());
        }
        match frame.command {
            Command::Internal => self.handle_internal(&frame).await,
            Command::Stream => {
                match frame.type_id {
                    stream::FIRMWARE_CONFIG_REQUEST => self.handle_firmware_config_request(&frame).await?,
                    stream::FIRMWARE_REQUEST => self.handle_firmware_request(&frame).await?,
                    other => debug!(target: "mc.gateway", gateway_id = %self.gateway_id(), stream_type = other, "mysensors_stream_ignored"),
                }
                Ok(Vec::new())
            }
            _ => Ok(frame.to_message(self.gateway_id()).into_iter().collect()),
        }
    }

    async fn close(&self) {
        self.ctx.scheduler.remove(&self.discover_job_name());
        self.ctx.scheduler.remove(&self.purge_job_name());
        let transport = self
            .transport
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }
}

/// 1..254 中最小的未占用 ID。
pub fn next_free_node_id(used: &BTreeSet<u8>) -> Option<u8> {
    (1..=254u8).find(|id| !used.contains(id))
}

/// 按网关 `timezone` 标签（缺省为系统时区）换算的本地秒数。
pub fn local_epoch_seconds(labels: &Labels, now: DateTime<Utc>) -> i64 {
    let offset = labels
        .get(LABEL_TIMEZONE)
        .and_then(|name| name.parse::<chrono_tz::Tz>().ok())
        .map(|tz| tz.offset_from_utc_datetime(&now.naive_utc()).fix().local_minus_utc())
        .unwrap_or_else(|| Local.offset_from_utc_datetime(&now.naive_utc()).local_minus_utc());
    now.timestamp() + i64::from(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_fill_gaps_and_exhaust() {
        let used: BTreeSet<u8> = [1, 2, 4].into_iter().collect();
        assert_eq!(next_free_node_id(&used), Some(3));
        let full: BTreeSet<u8> = (1..=254).collect();
        assert_eq!(next_free_node_id(&full), None);
    }

    #[test]
    fn time_honours_timezone_label() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).single().expect("time");
        let mut labels = Labels::new();
        labels.set(LABEL_TIMEZONE, "Asia/Shanghai");
        assert_eq!(local_epoch_seconds(&labels, now), now.timestamp() + 8 * 3600);
        labels.set(LABEL_TIMEZONE, "UTC");
        assert_eq!(local_epoch_seconds(&labels, now), now.timestamp());
    }
}
