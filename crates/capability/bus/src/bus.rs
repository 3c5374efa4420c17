//! 发布/订阅总线抽象。

use crate::error::BusError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// 总线上传递的一帧。
#[derive(Debug, Clone)]
pub struct BusData {
    pub topic: String,
    pub data: Arc<Vec<u8>>,
}

impl BusData {
    pub fn new(topic: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            data: Arc::new(data),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_slice(&self.data).map_err(|err| BusError::Decode(err.to_string()))
    }
}

/// 订阅回调：只做轻量工作（通常是入队），在订阅自己的 worker 上串行执行。
pub type Callback = Arc<dyn Fn(BusData) + Send + Sync>;

/// 总线接口。
#[async_trait]
pub trait Bus: Send + Sync {
    /// 发布原始字节；暂停期间静默丢弃。
    fn publish_bytes(&self, topic: &str, data: Vec<u8>) -> Result<(), BusError>;

    /// 订阅；返回订阅 ID。
    fn subscribe(&self, topic: &str, handler: Callback) -> Result<u64, BusError>;

    /// 队列订阅：同一 `queue` 的订阅者之间每条消息只投递一次。
    fn queue_subscribe(&self, topic: &str, queue: &str, handler: Callback)
    -> Result<u64, BusError>;

    fn unsubscribe(&self, topic: &str, sub_id: u64) -> Result<(), BusError>;

    fn unsubscribe_all(&self, topic: &str) -> Result<(), BusError>;

    fn pause_publish(&self);

    fn resume_publish(&self);

    fn topic_prefix(&self) -> &str;

    /// 关闭总线并等待所有订阅 worker 退出。
    async fn close(&self);
}

/// 带序列化的发布扩展。
pub trait BusExt: Bus {
    fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<(), BusError> {
        let data = serde_json::to_vec(payload).map_err(|err| BusError::Encode(err.to_string()))?;
        self.publish_bytes(topic, data)
    }
}

impl<B: Bus + ?Sized> BusExt for B {}

/// 校验 topic：非空、段不为空、`>` 只能出现在末尾。
pub fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    let segments: Vec<&str> = topic.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() || (*segment == ">" && index + 1 != segments.len()) {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
    }
    Ok(())
}

/// 列出可匹配 `topic` 的订阅键：自身及所有祖先通配（`a.>`、`>`）。
pub fn matching_keys(topic: &str) -> Vec<String> {
    let segments: Vec<&str> = topic.split('.').collect();
    let mut keys = Vec::with_capacity(segments.len() + 1);
    keys.push(topic.to_string());
    for depth in 0..segments.len() {
        if depth == 0 {
            keys.push(">".to_string());
        } else {
            keys.push(format!("{}.>", segments[..depth].join(".")));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_ancestors_are_listed() {
        let keys = matching_keys("event.field");
        assert_eq!(keys, vec!["event.field", ">", "event.>"]);
    }

    #[test]
    fn wildcard_only_at_tail() {
        assert!(validate_topic("event.>").is_ok());
        assert!(validate_topic(">.event").is_err());
        assert!(validate_topic("a..b").is_err());
        assert!(validate_topic("").is_err());
    }
}
