//! 进程内总线实现。
//!
//! 每个订阅持有一个单 worker 的 [`BoundedQueue`]，发布方只做入队，
//! 慢订阅者不会阻塞发布方；溢出时丢弃最旧帧。

use crate::bus::{Bus, BusData, Callback, matching_keys, validate_topic};
use crate::error::BusError;
use crate::queue::{BoundedQueue, QueueCallback};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// 默认每订阅队列容量。
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

struct Subscription {
    id: u64,
    queue_group: Option<String>,
    queue: BoundedQueue<BusData>,
}

/// 进程内总线。
pub struct EmbeddedBus {
    prefix: String,
    capacity: usize,
    next_id: AtomicU64,
    paused: AtomicBool,
    closed: AtomicBool,
    subscriptions: RwLock<HashMap<String, Vec<Arc<Subscription>>>>,
    round_robin: Mutex<HashMap<String, usize>>,
}

impl EmbeddedBus {
    pub fn new(prefix: impl Into<String>, capacity: usize) -> Self {
        Self {
            prefix: prefix.into().trim_matches('.').to_string(),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            subscriptions: RwLock::new(HashMap::new()),
            round_robin: Mutex::new(HashMap::new()),
        }
    }

    fn full_topic(&self, topic: &str) -> String {
        if self.prefix.is_empty() {
            topic.to_string()
        } else {
            format!("{}.{}", self.prefix, topic)
        }
    }

    fn add_subscription(
        &self,
        topic: &str,
        queue_group: Option<&str>,
        handler: Callback,
    ) -> Result<u64, BusError> {
        validate_topic(topic)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: QueueCallback<BusData> = Arc::new(move |data| {
            handler(data);
            futures::future::ready(()).boxed()
        });
        let subscription = Arc::new(Subscription {
            id,
            queue_group: queue_group.map(str::to_string),
            queue: BoundedQueue::new(format!("bus:{}#{}", topic, id), self.capacity, 1, callback),
        });
        let key = self.full_topic(topic);
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscriptions.entry(key).or_default().push(subscription);
        debug!(target: "mc.bus", topic = %topic, sub_id = id, "bus_subscribed");
        Ok(id)
    }

    /// 计算本次发布的投递目标：普通订阅全部投递，同组队列订阅轮询选一个。
    fn targets(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let subscriptions = self
            .subscriptions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut targets = Vec::new();
        let mut groups: HashMap<String, Vec<Arc<Subscription>>> = HashMap::new();
        for key in matching_keys(topic) {
            let Some(list) = subscriptions.get(&key) else {
                continue;
            };
            for sub in list {
                match &sub.queue_group {
                    Some(group) => groups
                        .entry(format!("{}|{}", key, group))
                        .or_default()
                        .push(sub.clone()),
                    None => targets.push(sub.clone()),
                }
            }
        }
        drop(subscriptions);
        if !groups.is_empty() {
            let mut counters = self
                .round_robin
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (group, members) in groups {
                let counter = counters.entry(group).or_insert(0);
                let index = *counter % members.len();
                *counter = counter.wrapping_add(1);
                targets.push(members[index].clone());
            }
        }
        targets
    }

    fn take_subscriptions(&self, topic: &str, sub_id: Option<u64>) -> Vec<Arc<Subscription>> {
        let key = self.full_topic(topic);
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(list) = subscriptions.get_mut(&key) else {
            return Vec::new();
        };
        let removed: Vec<Arc<Subscription>> = match sub_id {
            Some(id) => {
                let (removed, kept): (Vec<_>, Vec<_>) =
                    list.drain(..).partition(|sub| sub.id == id);
                *list = kept;
                removed
            }
            None => list.drain(..).collect(),
        };
        if list.is_empty() {
            subscriptions.remove(&key);
        }
        removed
    }
}

/// 后台关闭被移除订阅的队列（不阻塞调用方）。
fn close_in_background(removed: Vec<Arc<Subscription>>) {
    if removed.is_empty() {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        for sub in removed {
            sub.queue.close().await;
        }
    });
}

#[async_trait]
impl Bus for EmbeddedBus {
    fn publish_bytes(&self, topic: &str, data: Vec<u8>) -> Result<(), BusError> {
        validate_topic(topic)?;
        if topic.ends_with('>') {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }
        if self.paused.load(Ordering::Acquire) || self.closed.load(Ordering::Acquire) {
            mc_telemetry::record_bus_dropped();
            debug!(target: "mc.bus", topic = %topic, "bus_publish_dropped_paused");
            return Ok(());
        }
        mc_telemetry::record_bus_published();
        let full = self.full_topic(topic);
        let frame = BusData::new(topic, data);
        for sub in self.targets(&full) {
            if !sub.queue.produce(frame.clone()) {
                warn!(target: "mc.bus", topic = %topic, sub_id = sub.id, "bus_subscriber_overflow");
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: Callback) -> Result<u64, BusError> {
        self.add_subscription(topic, None, handler)
    }

    fn queue_subscribe(
        &self,
        topic: &str,
        queue: &str,
        handler: Callback,
    ) -> Result<u64, BusError> {
        self.add_subscription(topic, Some(queue), handler)
    }

    fn unsubscribe(&self, topic: &str, sub_id: u64) -> Result<(), BusError> {
        close_in_background(self.take_subscriptions(topic, Some(sub_id)));
        Ok(())
    }

    fn unsubscribe_all(&self, topic: &str) -> Result<(), BusError> {
        close_in_background(self.take_subscriptions(topic, None));
        Ok(())
    }

    fn pause_publish(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume_publish(&self) {
        self.paused.store(false, Ordering::Release);
    }

    fn topic_prefix(&self) -> &str {
        &self.prefix
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let all: Vec<Arc<Subscription>> = {
            let mut subscriptions = self
                .subscriptions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscriptions.drain().flat_map(|(_, list)| list).collect()
        };
        for sub in all {
            sub.queue.close().await;
        }
    }
}
