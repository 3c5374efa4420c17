//! 基于总线的请求/应答。

use crate::bus::{Bus, BusData, BusExt};
use crate::error::BusError;
use contract::{ServiceEvent, topics};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// 默认请求超时。
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 发送服务事件并等待单个应答。
///
/// 分配临时应答 topic、订阅、发布、在截止时间内等待，结束后总是退订。
/// 应答携带 `error` 时返回 [`BusError::Remote`]。
pub async fn request(
    bus: &dyn Bus,
    topic: &str,
    mut event: ServiceEvent,
    timeout: Duration,
) -> Result<ServiceEvent, BusError> {
    let correlation_id = mc_telemetry::new_correlation_id();
    let reply_topic = topics::reply_topic(&correlation_id);
    let (tx, rx) = oneshot::channel::<BusData>();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let sub_id = bus.subscribe(
        &reply_topic,
        Arc::new(move |data| {
            let sender = slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(sender) = sender {
                let _ = sender.send(data);
            }
        }),
    )?;

    event.reply_topic = reply_topic.clone();
    debug!(
        target: "mc.bus",
        correlation_id = %correlation_id,
        topic = %topic,
        service_type = %event.service_type,
        command = %event.command,
        "bus_request_sent"
    );
    let outcome = match bus.publish(topic, &event) {
        Ok(()) => match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => data.decode::<ServiceEvent>(),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(format!(
                "{}:{} after {:?}",
                event.service_type, event.command, timeout
            ))),
        },
        Err(err) => Err(err),
    };
    let _ = bus.unsubscribe(&reply_topic, sub_id);

    let reply = outcome.inspect_err(|err| {
        warn!(
            target: "mc.bus",
            correlation_id = %correlation_id,
            topic = %topic,
            error = %err,
            "bus_request_failed"
        );
    })?;
    if reply.has_error() {
        return Err(BusError::Remote(reply.error));
    }
    Ok(reply)
}

/// 若请求带有 `replyTopic`，发布应答；否则忽略。
pub fn reply(bus: &dyn Bus, request: &ServiceEvent, response: &ServiceEvent) -> Result<(), BusError> {
    if request.reply_topic.is_empty() {
        return Ok(());
    }
    bus.publish(&request.reply_topic, response)
}
