//! MySensors 线路格式 `node;source;command;ack;type;payload` 与 MQTT topic
//! `prefix/node/source/command/ack/type` 的编解码。

use crate::error::GatewayError;
use crate::mysensors::types::{
    self, BROADCAST_ID, Command, NODE_SOURCE_ID, internal, metric_and_unit, type_id, type_name,
};
use domain::labels::LABEL_TYPE_STRING;
use domain::message::keys;
use domain::{Message, MessageType, MetricType, Payload};

/// 一帧 MySensors 报文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub node_id: u8,
    pub source_id: u8,
    pub command: Command,
    pub ack: bool,
    pub type_id: u8,
    pub payload: String,
}

impl Frame {
    pub fn new(
        node_id: u8,
        source_id: u8,
        command: Command,
        type_id: u8,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            source_id,
            command,
            ack: false,
            type_id,
            payload: payload.into(),
        }
    }

    pub fn parse_line(line: &str) -> Result<Self, GatewayError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let parts: Vec<&str> = line.splitn(6, ';').collect();
        if parts.len() != 6 {
            return Err(GatewayError::Decode(format!("invalid mysensors line `{line}`")));
        }
        Self::from_parts(&parts[..5], parts[5])
    }

    /// 取 topic 最后五段作为报文头。
    pub fn parse_topic(topic: &str, payload: &[u8]) -> Result<Self, GatewayError> {
        let segments: Vec<&str> = topic.trim_end_matches('/').split('/').collect();
        if segments.len() < 5 {
            return Err(GatewayError::Decode(format!("invalid mysensors topic `{topic}`")));
        }
        let header = &segments[segments.len() - 5..];
        let payload = String::from_utf8_lossy(payload);
        Self::from_parts(header, payload.trim())
    }

    fn from_parts(header: &[&str], payload: &str) -> Result<Self, GatewayError> {
        let number = |text: &str| {
            text.trim()
                .parse::<u8>()
                .map_err(|_| GatewayError::Decode(format!("invalid mysensors field `{text}`")))
        };
        let command = Command::from_u8(number(header[2])?)
            .ok_or_else(|| GatewayError::Decode(format!("unknown command `{}`", header[2])))?;
        Ok(Self {
            node_id: number(header[0])?,
            source_id: number(header[1])?,
            command,
            ack: number(header[3])? == 1,
            type_id: number(header[4])?,
            payload: payload.to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{};{};{};{};{};{}\n",
            self.node_id,
            self.source_id,
            self.command as u8,
            u8::from(self.ack),
            self.type_id,
            self.payload
        )
    }

    pub fn topic(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            prefix.trim_end_matches('/'),
            self.node_id,
            self.source_id,
            self.command as u8,
            u8::from(self.ack),
            self.type_id
        )
    }

    /// 确认关联 ID：`node-source-command-ack-type`。
    pub fn ack_id(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.node_id,
            self.source_id,
            self.command as u8,
            u8::from(self.ack),
            self.type_id
        )
    }

    pub fn type_name(&self) -> String {
        type_name(self.command, self.type_id)
    }

    /// 转为规范化消息；不需要上送的内部/流报文返回 None。
    pub fn to_message(&self, gateway_id: &str) -> Option<Message> {
        let node_id = self.node_id.to_string();
        let source_id = self.source_id.to_string();
        let name = self.type_name();
        let message = match self.command {
            Command::Presentation if self.source_id == NODE_SOURCE_ID => {
                let mut payload = Payload::new(keys::NODE_LIBRARY_VERSION, self.payload.clone());
                payload.labels.set(LABEL_TYPE_STRING, name);
                Message::new(gateway_id, &node_id, "", MessageType::Action).with_payload(payload)
            }
            Command::Presentation => {
                let mut payload = Payload::new("name", self.payload.clone());
                payload.labels.set(LABEL_TYPE_STRING, name);
                Message::new(gateway_id, &node_id, &source_id, MessageType::Presentation)
                    .with_payload(payload)
            }
            Command::Set | Command::Request => {
                let (metric_type, unit) = metric_and_unit(&name);
                let mut payload = Payload::new(name, self.payload.clone());
                payload.metric_type = metric_type;
                payload.unit = unit.to_string();
                let message_type = if self.command == Command::Set {
                    MessageType::Set
                } else {
                    MessageType::Request
                };
                Message::new(gateway_id, &node_id, &source_id, message_type).with_payload(payload)
            }
            Command::Internal => {
                let key = match self.type_id {
                    internal::BATTERY_LEVEL => keys::NODE_BATTERY,
                    internal::SKETCH_NAME => keys::NODE_NAME,
                    internal::SKETCH_VERSION => keys::NODE_VERSION,
                    internal::HEARTBEAT_RESPONSE | internal::DISCOVER_RESPONSE => keys::NODE_HEARTBEAT,
                    internal::LOCKED => keys::NODE_LOCKED,
                    internal::SIGNAL_REPORT_RESPONSE => keys::NODE_RSSI,
                    internal::PRE_SLEEP_NOTIFICATION | internal::POST_SLEEP_NOTIFICATION => {
                        keys::NODE_SMART_SLEEP
                    }
                    _ => return None,
                };
                let value = if key == keys::NODE_SMART_SLEEP {
                    "true".to_string()
                } else {
                    self.payload.clone()
                };
                Message::new(gateway_id, &node_id, "", MessageType::Action)
                    .with_payload(Payload::new(key, value))
            }
            Command::Stream => return None,
        };
        let mut message = message;
        message.is_ack = self.ack;
        message.is_received = true;
        Some(message)
    }
}

/// 把规范化消息编码为帧（每个载荷一帧）。
pub fn encode_message(message: &Message) -> Result<Vec<Frame>, GatewayError> {
    let node_id = parse_id(&message.node_id, "node")?;
    let source_id = if message.source_id.is_empty() {
        NODE_SOURCE_ID
    } else {
        parse_id(&message.source_id, "source")?
    };
    message
        .payloads
        .iter()
        .map(|payload| match message.message_type {
            MessageType::Set | MessageType::Request => {
                let command = if message.message_type == MessageType::Set {
                    Command::Set
                } else {
                    Command::Request
                };
                let type_id = type_id(command, &payload.key).ok_or_else(|| {
                    GatewayError::Encode(format!("unknown field type `{}`", payload.key))
                })?;
                let name = types::type_name(command, type_id);
                let value = canonical_value(&name, &payload.value);
                Ok(Frame::new(node_id, source_id, command, type_id, value))
            }
            MessageType::Action => encode_action(node_id, &payload.key, &payload.value),
            MessageType::Presentation => Err(GatewayError::Encode(
                "presentation messages are not sent to nodes".to_string(),
            )),
        })
        .collect()
}

fn encode_action(node_id: u8, action: &str, value: &str) -> Result<Frame, GatewayError> {
    let (node_id, type_id) = match action {
        keys::ACTION_REBOOT => (node_id, internal::REBOOT),
        keys::ACTION_REFRESH_NODE_INFO => (node_id, internal::PRESENTATION),
        keys::ACTION_HEARTBEAT_REQUEST => (node_id, internal::HEARTBEAT_REQUEST),
        keys::ACTION_DISCOVER => (BROADCAST_ID, internal::DISCOVER_REQUEST),
        other => match type_id(Command::Internal, other) {
            Some(type_id) => (node_id, type_id),
            None => {
                return Err(GatewayError::Encode(format!("unsupported node action `{other}`")));
            }
        },
    };
    let payload = if value.is_empty() { "0" } else { value };
    Ok(Frame::new(node_id, NODE_SOURCE_ID, Command::Internal, type_id, payload))
}

fn parse_id(value: &str, what: &str) -> Result<u8, GatewayError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|_| GatewayError::Encode(format!("invalid {what} id `{value}`")))
}

/// 二值字段统一为 `1` / `0`。
fn canonical_value(field: &str, value: &str) -> String {
    if metric_and_unit(field).0 == MetricType::Binary {
        if let serde_json::Value::Bool(flag) = MetricType::Binary.convert(value) {
            return if flag { "1" } else { "0" }.to_string();
        }
    }
    value.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_serial_lines() {
        let frame = Frame::parse_line("11;1;1;1;2;1\r\n").expect("parse");
        assert_eq!(frame.node_id, 11);
        assert_eq!(frame.command, Command::Set);
        assert!(frame.ack);
        assert_eq!(frame.to_line(), "11;1;1;1;2;1\n");
        assert_eq!(frame.ack_id(), "11-1-1-1-2");

        let frame = Frame::parse_line("0;255;3;0;9;read: 1-1-0 s=0;c=1").expect("parse");
        assert_eq!(frame.payload, "read: 1-1-0 s=0;c=1");
        assert!(Frame::parse_line("1;2;3").is_err());
        assert!(Frame::parse_line("1;2;9;0;0;x").is_err());
    }

    #[test]
    fn parses_mqtt_topics() {
        let frame = Frame::parse_topic("mygateway1-out/12/3/1/0/0", b"21.5").expect("parse");
        assert_eq!((frame.node_id, frame.source_id, frame.type_id), (12, 3, 0));
        assert_eq!(frame.topic("mygateway1-in"), "mygateway1-in/12/3/1/0/0");
    }

    #[test]
    fn set_message_round_trips_with_binary_canonicalisation() {
        let message = Message::new("gw1", "11", "1", MessageType::Set)
            .with_payload(Payload::new("V_STATUS", "on"));
        let frames = encode_message(&message).expect("encode");
        assert_eq!(frames[0].to_line(), "11;1;1;0;2;1\n");

        let decoded = frames[0].to_message("gw1").expect("message");
        assert_eq!(decoded.message_type, MessageType::Set);
        let payload = decoded.first_payload().expect("payload");
        assert_eq!((payload.key.as_str(), payload.value.as_str()), ("V_STATUS", "1"));
        assert_eq!(payload.metric_type, MetricType::Binary);
    }

    #[test]
    fn actions_become_internal_frames() {
        let reboot = Message::new("gw1", "7", "", MessageType::Action)
            .with_payload(Payload::new(keys::ACTION_REBOOT, ""));
        assert_eq!(encode_message(&reboot).expect("encode")[0].to_line(), "7;255;3;0;13;0\n");

        let discover = Message::new("gw1", "7", "", MessageType::Action)
            .with_payload(Payload::new(keys::ACTION_DISCOVER, ""));
        assert_eq!(encode_message(&discover).expect("encode")[0].to_line(), "255;255;3;0;20;0\n");
    }

    #[test]
    fn node_internals_map_to_actions() {
        let battery = Frame::parse_line("5;255;3;0;0;87").expect("parse");
        let message = battery.to_message("gw1").expect("message");
        assert_eq!(message.message_type, MessageType::Action);
        assert_eq!(message.first_payload().map(|p| p.key.as_str()), Some(keys::NODE_BATTERY));

        let log = Frame::parse_line("0;255;3;0;9;boot").expect("parse");
        assert!(log.to_message("gw1").is_none());

        let presentation = Frame::parse_line("5;2;0;0;6;Outdoor").expect("parse");
        let message = presentation.to_message("gw1").expect("message");
        let payload = message.first_payload().expect("payload");
        assert_eq!(payload.value, "Outdoor");
        assert_eq!(payload.labels.get(LABEL_TYPE_STRING), Some("S_TEMP"));
    }
}
