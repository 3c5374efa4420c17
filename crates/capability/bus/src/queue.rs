//! 有界工作队列：固定容量 FIFO + N 个 tokio worker。
//!
//! 队列满时丢弃最旧元素并返回 false；单 worker 时严格 FIFO。

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// 队列回调：每个元素由某个 worker 调用一次。
pub type QueueCallback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Shared<T> {
    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 有界工作队列。
pub struct BoundedQueue<T: Send + 'static> {
    name: String,
    capacity: usize,
    shared: Arc<Shared<T>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// 创建队列并立即启动 worker（需在 tokio 运行时内调用）。
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        workers: usize,
        callback: QueueCallback<T>,
    ) -> Self {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let handles = (0..workers.max(1))
            .map(|_| {
                let shared = shared.clone();
                let callback = callback.clone();
                tokio::spawn(async move { run_worker(shared, callback).await })
            })
            .collect();
        Self {
            name: name.into(),
            capacity,
            shared,
            workers: Mutex::new(handles),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.shared.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 入队。队列已满时丢弃最旧元素、仍接收新元素并返回 false；已关闭时丢弃并返回 false。
    pub fn produce(&self, item: T) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        let accepted = {
            let mut items = self.shared.items();
            let full = items.len() >= self.capacity;
            if full {
                items.pop_front();
            }
            items.push_back(item);
            !full
        };
        if !accepted {
            mc_telemetry::record_queue_overflow();
            warn!(
                target: "mc.bus",
                queue = %self.name,
                capacity = self.capacity,
                "queue_overflow_dropped_oldest"
            );
        }
        self.shared.notify.notify_one();
        accepted
    }

    /// 关闭队列：worker 处理完剩余元素后退出，等待全部 worker 结束。
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker<T: Send + 'static>(shared: Arc<Shared<T>>, callback: QueueCallback<T>) {
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = shared.items().pop_front();
        if let Some(item) = next {
            callback(item).await;
            continue;
        }
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn single_worker_preserves_fifo() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback: QueueCallback<u32> = Arc::new(move |item| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(item);
            }
            .boxed()
        });
        let queue = BoundedQueue::new("fifo", 100, 1, callback);
        for i in 0..20 {
            assert!(queue.produce(i));
        }
        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(rx.recv().await.expect("item"));
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        queue.close().await;
    }

    #[tokio::test]
    async fn full_queue_drops_oldest() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker_gate = gate.clone();
        let callback: QueueCallback<u32> = Arc::new(move |item| {
            let tx = tx.clone();
            let gate = worker_gate.clone();
            async move {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                let _ = tx.send(item);
            }
            .boxed()
        });
        let queue = BoundedQueue::new("overflow", 2, 1, callback);
        assert!(queue.produce(0));
        // 等待 worker 取走 0 并阻塞在 gate 上
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.produce(1));
        assert!(queue.produce(2));
        assert!(!queue.produce(3));
        assert_eq!(queue.len(), 2);

        gate.add_permits(10);
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.expect("item"));
        }
        assert_eq!(seen, vec![0, 2, 3]);
        queue.close().await;
    }

    #[tokio::test]
    async fn close_drains_remaining_items() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback: QueueCallback<u32> = Arc::new(move |item| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(item);
            }
            .boxed()
        });
        let queue = BoundedQueue::new("drain", 10, 3, callback);
        for i in 0..5 {
            queue.produce(i);
        }
        queue.close().await;
        assert!(!queue.produce(99));
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 5);
    }
}
