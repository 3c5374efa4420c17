//! 规范化消息 → 实体变更。
//!
//! 接收方向（`isReceived = true`）：
//! 1. 未知节点以 `state = up` 创建，已知节点刷新 `lastSeen`
//! 2. presentation 更新源名称与标签
//! 3. set 写字段（current → previous）、写时序库
//! 4. request 读取字段最后值并回发给网关
//! 5. action 更新节点信息（电量、信号、名称、版本、OTA 进度等）
//!
//! 发送方向（`isReceived = false`）：补齐睡眠节点标记后转发给网关 provider。
//!
//! 所有实体变更经 [`EntityApi`] 持久化并发布实体事件。

use crate::error::ProcessorError;
use chrono::{DateTime, Utc};
use contract::service::{command, kind};
use contract::{EntityState, ServiceEvent, topics};
use domain::labels::{LABEL_NODE_ID, LABEL_SMART_SLEEP_NODE};
use domain::message::keys;
use domain::{Entity, Field, Message, MessageType, MetricType, Node, Payload, Source, State, Status};
use mc_bus::{BusData, BusError, BusExt, QueueListener, queue_callback};
use mc_storage::{EntityApi, MetricSample};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 消息处理器。
pub struct MessageProcessor {
    api: EntityApi,
    bus: Arc<dyn mc_bus::Bus>,
}

impl MessageProcessor {
    pub fn new(api: EntityApi, bus: Arc<dyn mc_bus::Bus>) -> Self {
        Self { api, bus }
    }

    /// 处理一条规范化消息。
    pub async fn process(&self, message: Message) -> Result<(), ProcessorError> {
        if message.gateway_id.is_empty() || message.node_id.is_empty() {
            return Err(ProcessorError::Invalid(format!(
                "message `{}` without gateway or node id",
                message.id
            )));
        }
        if !message.is_received {
            return self.forward_to_provider(message).await;
        }
        let timestamp = message.timestamp.unwrap_or_else(Utc::now);
        let node = self.touch_node(&message, timestamp).await?;
        match message.message_type {
            MessageType::Presentation => self.update_source(&message).await,
            MessageType::Set => self.update_fields(&message, timestamp).await,
            MessageType::Request => self.answer_request(&message, &node).await,
            MessageType::Action => self.update_node(&message, node).await,
        }
    }

    /// 发往节点的消息：按节点标签补 `isSleepNode` 后交给网关。
    async fn forward_to_provider(&self, mut message: Message) -> Result<(), ProcessorError> {
        let node_id = Node::new(&message.gateway_id, &message.node_id).id;
        if let Some(node) = self.api.node.find(&node_id).await? {
            message.is_sleep_node = node.labels.get_bool(LABEL_SMART_SLEEP_NODE);
        }
        self.bus
            .publish(&topics::message_to_provider(&message.gateway_id), &message)?;
        Ok(())
    }

    /// 确保节点存在并刷新 `lastSeen`；离线节点经资源服务恢复为 up。
    async fn touch_node(&self, message: &Message, timestamp: DateTime<Utc>) -> Result<Node, ProcessorError> {
        let id = Node::new(&message.gateway_id, &message.node_id).id;
        match self.api.node.find(&id).await? {
            Some(mut node) => {
                if node.state.status != Status::Up {
                    self.report_node_state(&node.id, State::up("Message received"));
                    node.state = State::up("Message received");
                }
                node.last_seen = Some(timestamp);
                Ok(self.api.node.save(node).await?)
            }
            None => {
                let mut node = Node::new(&message.gateway_id, &message.node_id);
                node.state = State::up("Node discovered");
                node.last_seen = Some(timestamp);
                info!(
                    target: "mc.processor",
                    gateway_id = %message.gateway_id,
                    node_id = %message.node_id,
                    "node_created"
                );
                Ok(self.api.node.save(node).await?)
            }
        }
    }

    fn report_node_state(&self, id: &str, state: State) {
        let payload = EntityState {
            id: id.to_string(),
            state,
        };
        let event = match ServiceEvent::new(kind::NODE, command::UPDATE_STATE)
            .with_id(id)
            .with_data(&payload)
        {
            Ok(event) => event,
            Err(err) => {
                warn!(target: "mc.processor", node = %id, error = %err, "node_state_encode_failed");
                return;
            }
        };
        if let Err(err) = self.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event) {
            warn!(target: "mc.processor", node = %id, error = %err, "node_state_publish_failed");
        }
    }

    async fn find_or_create_source(&self, message: &Message) -> Result<Source, ProcessorError> {
        let id = Source::new(&message.gateway_id, &message.node_id, &message.source_id).id;
        match self.api.source.find(&id).await? {
            Some(source) => Ok(source),
            None => {
                let source = Source::new(&message.gateway_id, &message.node_id, &message.source_id);
                Ok(self.api.source.save(source).await?)
            }
        }
    }

    async fn update_source(&self, message: &Message) -> Result<(), ProcessorError> {
        if message.source_id.is_empty() {
            return Err(ProcessorError::Invalid("presentation without source id".to_string()));
        }
        let mut source = self.find_or_create_source(message).await?;
        for payload in &message.payloads {
            if payload.key == keys::NODE_NAME && !payload.value.trim().is_empty() {
                source.name = payload.value.trim().to_string();
            }
            source.labels.merge(&payload.labels);
        }
        source.labels.merge(&message.labels);
        self.api.source.save(source).await?;
        Ok(())
    }

    async fn update_fields(&self, message: &Message, timestamp: DateTime<Utc>) -> Result<(), ProcessorError> {
        if message.source_id.is_empty() {
            return Err(ProcessorError::Invalid("set message without source id".to_string()));
        }
        self.find_or_create_source(message).await?;
        for payload in &message.payloads {
            let field = self.update_field(message, payload, timestamp).await?;
            if field.metric_type.is_timeseries() {
                let sample = MetricSample {
                    id: field.id.clone(),
                    metric_type: field.metric_type,
                    value: field.current.value.clone(),
                    timestamp,
                };
                if let Err(err) = self.api.metric.write(&sample).await {
                    warn!(target: "mc.metric", field = %field.id, error = %err, "metric_write_failed");
                }
            }
        }
        Ok(())
    }

    async fn update_field(
        &self,
        message: &Message,
        payload: &Payload,
        timestamp: DateTime<Utc>,
    ) -> Result<Field, ProcessorError> {
        let id = Field::new(&message.gateway_id, &message.node_id, &message.source_id, &payload.key).id;
        let mut field = match self.api.field.find(&id).await? {
            Some(field) => field,
            None => {
                let mut field =
                    Field::new(&message.gateway_id, &message.node_id, &message.source_id, &payload.key);
                field.metric_type = payload.metric_type;
                field.unit = payload.unit.clone();
                field
            }
        };
        if field.metric_type == MetricType::None && payload.metric_type != MetricType::None {
            field.metric_type = payload.metric_type;
        }
        if field.unit.is_empty() && !payload.unit.is_empty() {
            field.unit = payload.unit.clone();
        }
        field.labels.merge(&payload.labels);
        let value = field.metric_type.convert(&payload.value);
        field.shift_value(value, timestamp);
        debug!(
            target: "mc.processor",
            field = %field.quick_id(),
            value = %field.current.value,
            "field_updated"
        );
        Ok(self.api.field.save(field).await?)
    }

    /// 以字段最后值回应 request。
    async fn answer_request(&self, message: &Message, node: &Node) -> Result<(), ProcessorError> {
        let mut reply = Message::new(
            &message.gateway_id,
            &message.node_id,
            &message.source_id,
            MessageType::Set,
        );
        reply.is_sleep_node = node.labels.get_bool(LABEL_SMART_SLEEP_NODE);
        for payload in &message.payloads {
            let id = Field::new(&message.gateway_id, &message.node_id, &message.source_id, &payload.key).id;
            let Some(field) = self.api.field.find(&id).await? else {
                debug!(target: "mc.processor", field = %payload.key, node_id = %message.node_id, "request_field_unknown");
                continue;
            };
            let mut answer = Payload::new(payload.key.clone(), value_to_text(&field.current.value));
            answer.metric_type = field.metric_type;
            answer.unit = field.unit.clone();
            reply.payloads.push(answer);
        }
        if reply.payloads.is_empty() {
            return Ok(());
        }
        self.bus
            .publish(&topics::message_to_provider(&message.gateway_id), &reply)?;
        Ok(())
    }

    async fn update_node(&self, message: &Message, mut node: Node) -> Result<(), ProcessorError> {
        for payload in &message.payloads {
            let value = payload.value.trim();
            match payload.key.as_str() {
                keys::NODE_NAME => {
                    if !value.is_empty() {
                        node.name = value.to_string();
                    }
                }
                keys::NODE_BATTERY | keys::NODE_RSSI => {
                    node.others
                        .insert(payload.key.clone(), MetricType::GaugeFloat.convert(value));
                }
                keys::NODE_VERSION | keys::NODE_LIBRARY_VERSION => {
                    node.others.insert(payload.key.clone(), Value::String(value.to_string()));
                }
                keys::NODE_LOCKED => {
                    node.others.insert(payload.key.clone(), Value::Bool(true));
                    node.others
                        .insert("locked_reason".to_string(), Value::String(value.to_string()));
                }
                keys::NODE_SMART_SLEEP => {
                    node.labels.set(LABEL_SMART_SLEEP_NODE, "true");
                }
                keys::NODE_FIRMWARE_STATE => {
                    let state = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
                    node.others.insert(payload.key.clone(), state);
                }
                keys::NODE_ID_ALLOCATED => {
                    node.labels.set(LABEL_NODE_ID, value);
                }
                keys::NODE_HEARTBEAT => {}
                other => {
                    debug!(target: "mc.processor", action = %other, node_id = %message.node_id, "node_action_ignored");
                }
            }
        }
        self.api.node.save(node).await?;
        Ok(())
    }

    /// 订阅 `message.to_message_processor`；单 worker 保证同一网关消息的顺序。
    pub fn start_listener(self: &Arc<Self>, capacity: usize) -> Result<QueueListener, BusError> {
        let processor = self.clone();
        QueueListener::start(
            self.bus.clone(),
            topics::MESSAGE_TO_PROCESSOR,
            "message_processor",
            capacity,
            1,
            queue_callback(move |data: BusData| {
                let processor = processor.clone();
                async move {
                    let message = match data.decode::<Message>() {
                        Ok(message) => message,
                        Err(err) => {
                            warn!(target: "mc.processor", error = %err, "message_invalid");
                            return;
                        }
                    };
                    let id = message.id.clone();
                    if let Err(err) = processor.process(message).await {
                        warn!(target: "mc.processor", message_id = %id, error = %err, "message_process_failed");
                    }
                }
            }),
        )
    }
}

/// 字段值转回线路文本（布尔转 1/0）。
fn value_to_text(value: &Value) -> String {
    match value {
        Value::Bool(flag) => if *flag { "1" } else { "0" }.to_string(),
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
