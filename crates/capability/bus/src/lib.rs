//! 进程内消息总线：发布/订阅、队列订阅、有界工作队列与请求/应答。

pub mod bus;
pub mod embedded;
pub mod error;
pub mod listener;
pub mod queue;
pub mod request;

pub use bus::{Bus, BusData, BusExt, Callback};
pub use embedded::{DEFAULT_QUEUE_CAPACITY, EmbeddedBus};
pub use error::BusError;
pub use listener::QueueListener;
pub use queue::{BoundedQueue, QueueCallback};
pub use request::{DEFAULT_REQUEST_TIMEOUT, reply, request};

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// 把异步闭包包装为队列回调。
pub fn queue_callback<T, F, Fut>(f: F) -> QueueCallback<T>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |item: T| -> BoxFuture<'static, ()> { f(item).boxed() })
}
