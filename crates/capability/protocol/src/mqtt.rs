//! MQTT 客户端（rumqttc）
//!
//! 事件循环在后台任务中持续 poll；出错后等待 1 秒继续，由 rumqttc 自动重连。
//! 每次收到 ConnAck 都重新订阅配置的 topic。
//!
//! ## 配置格式
//! ```json
//! { "broker": "tcp://192.168.1.10:1883", "username": "u", "password": "p",
//!   "subscribe": "in/#,status/#", "publish": "out", "qos": 0 }
//! ```

use crate::error::ProtocolError;
use crate::types::{OTHER_TOPIC, RxHandler, Transport};
use async_trait::async_trait;
use domain::RawMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// MQTT 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MqttConfig {
    /// `tcp://host:port`、`mqtt://host:port` 或 `ssl://host:port`
    pub broker: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// 逗号分隔的订阅 topic
    pub subscribe: String,
    /// 发布前缀（由上层 provider 使用）
    pub publish: String,
    pub qos: u8,
    pub keep_alive: String,
    pub connection_timeout: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            subscribe: String::new(),
            publish: String::new(),
            qos: 0,
            keep_alive: "30s".to_string(),
            connection_timeout: "10s".to_string(),
        }
    }
}

impl MqttConfig {
    /// 解析 broker 地址为 (host, port, tls)。
    pub fn endpoint(&self) -> Result<(String, u16, bool), ProtocolError> {
        let (scheme, rest) = self
            .broker
            .split_once("://")
            .unwrap_or(("tcp", self.broker.as_str()));
        let tls = match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            other => {
                return Err(ProtocolError::ConfigParse(format!(
                    "unsupported broker scheme {other}"
                )));
            }
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse::<u16>()
                    .map_err(|_| ProtocolError::ConfigParse(format!("invalid broker port {port}")))?,
            ),
            None => (rest.to_string(), if tls { 8883 } else { 1883 }),
        };
        if host.is_empty() {
            return Err(ProtocolError::ConfigParse("broker host is empty".to_string()));
        }
        Ok((host, port, tls))
    }

    pub fn subscribe_topics(&self) -> Vec<String> {
        split_topics(&self.subscribe)
    }
}

/// 逗号分隔的 topic 列表。
pub fn split_topics(topics: &str) -> Vec<String> {
    topics
        .split(',')
        .map(str::trim)
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn qos_from_u8(value: u8) -> QoS {
    match value {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

/// MQTT 客户端
pub struct MqttClient {
    name: String,
    client: AsyncClient,
    qos: QoS,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// 建立连接；首个 ConnAck 到达后返回，超时或连接错误时失败。
    pub async fn connect(
        name: &str,
        config: &MqttConfig,
        rx: RxHandler,
    ) -> Result<Self, ProtocolError> {
        let (host, port, tls) = config.endpoint()?;
        let client_id = if config.client_id.is_empty() {
            format!("mc-{}-{}", name, uuid::Uuid::new_v4().simple())
        } else {
            config.client_id.clone()
        };
        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(domain::duration::parse_duration_or(
            &config.keep_alive,
            Duration::from_secs(30),
        ));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        if tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        let connect_timeout =
            domain::duration::parse_duration_or(&config.connection_timeout, Duration::from_secs(10));

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let topics = config.subscribe_topics();
        let qos = qos_from_u8(config.qos);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let loop_client = client.clone();
        let loop_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(target: "mc.gateway", transport = %loop_name, "mqtt_connected");
                        for topic in &topics {
                            if let Err(err) = loop_client.try_subscribe(topic.clone(), qos) {
                                warn!(target: "mc.gateway", transport = %loop_name, topic = %topic, error = %err, "mqtt_subscribe_failed");
                            }
                        }
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let mut message = RawMessage::new(true, publish.payload.to_vec());
                        message.set_other(OTHER_TOPIC, publish.topic.clone());
                        rx(message);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(err.to_string()));
                            return;
                        }
                        warn!(target: "mc.gateway", transport = %loop_name, error = %err, "mqtt_eventloop_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        match tokio::time::timeout(connect_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(Self {
                name: name.to_string(),
                client,
                qos,
                handle: Mutex::new(Some(handle)),
            }),
            Ok(Ok(Err(err))) => Err(ProtocolError::Connection(format!(
                "{}:{} {}",
                host, port, err
            ))),
            Ok(Err(_)) => {
                handle.abort();
                Err(ProtocolError::NotConnected)
            }
            Err(_) => {
                handle.abort();
                Err(ProtocolError::Timeout(format!(
                    "connect {}:{} after {:?}",
                    host, port, connect_timeout
                )))
            }
        }
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProtocolError> {
        self.publish_with_qos(topic, payload, self.qos).await
    }

    pub async fn publish_with_qos(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), ProtocolError> {
        debug!(target: "mc.gateway", transport = %self.name, topic = %topic, size = payload.len(), "mqtt_publish");
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|err| ProtocolError::Mqtt(err.to_string()))
    }
}

#[async_trait]
impl Transport for MqttClient {
    /// topic 取自 `others.topic`，可用逗号分隔多个。
    async fn write(&self, message: &RawMessage) -> Result<(), ProtocolError> {
        let topics = split_topics(message.other_str(OTHER_TOPIC).unwrap_or_default());
        if topics.is_empty() {
            return Err(ProtocolError::ConfigParse("mqtt message without topic".to_string()));
        }
        for topic in topics {
            self.publish(&topic, message.data.clone()).await?;
        }
        Ok(())
    }

    async fn close(&self) {
        let _ = self.client.disconnect().await;
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        info!(target: "mc.gateway", transport = %self.name, "mqtt_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broker_endpoints() {
        let config = MqttConfig {
            broker: "tcp://10.0.0.5:1884".to_string(),
            ..Default::default()
        };
        assert_eq!(config.endpoint().expect("endpoint"), ("10.0.0.5".to_string(), 1884, false));

        let config = MqttConfig {
            broker: "ssl://broker.local".to_string(),
            ..Default::default()
        };
        assert_eq!(config.endpoint().expect("endpoint"), ("broker.local".to_string(), 8883, true));

        let config = MqttConfig {
            broker: "ws://broker.local".to_string(),
            ..Default::default()
        };
        assert!(config.endpoint().is_err());
    }

    #[test]
    fn splits_topic_lists() {
        assert_eq!(split_topics(" a/b , ,c/#"), vec!["a/b", "c/#"]);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(7), QoS::AtMostOnce);
    }
}
