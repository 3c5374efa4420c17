//! 总线订阅 + 工作队列组合（组件监听的常用形态）。

use crate::bus::{Bus, BusData};
use crate::error::BusError;
use crate::queue::{BoundedQueue, QueueCallback};
use std::sync::Arc;
use tracing::info;

/// 把一个 topic 的消息转入组件自己的工作队列。
pub struct QueueListener {
    bus: Arc<dyn Bus>,
    topic: String,
    sub_id: u64,
    queue: Arc<BoundedQueue<BusData>>,
}

impl QueueListener {
    /// 订阅 `topic`，回调只负责入队；真正的处理在 `workers` 个 worker 上执行。
    pub fn start(
        bus: Arc<dyn Bus>,
        topic: &str,
        name: &str,
        capacity: usize,
        workers: usize,
        callback: QueueCallback<BusData>,
    ) -> Result<Self, BusError> {
        let queue = Arc::new(BoundedQueue::new(name, capacity, workers, callback));
        let producer = queue.clone();
        let sub_id = bus.subscribe(
            topic,
            Arc::new(move |data| {
                producer.produce(data);
            }),
        )?;
        info!(target: "mc.bus", topic = %topic, queue = %name, workers, "queue_listener_started");
        Ok(Self {
            bus,
            topic: topic.to_string(),
            sub_id,
            queue,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue(&self) -> &Arc<BoundedQueue<BusData>> {
        &self.queue
    }

    /// 退订并关闭队列（等待剩余消息处理完毕）。
    pub async fn close(&self) {
        let _ = self.bus.unsubscribe(&self.topic, self.sub_id);
        self.queue.close().await;
    }
}
