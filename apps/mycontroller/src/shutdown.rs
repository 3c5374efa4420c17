//! 关停信号：SIGINT、SIGTERM 或总线上的 `internal.shutdown`。

use contract::topics;
use mc_bus::{Bus, BusData, BusError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ShutdownSignal {
    token: CancellationToken,
    bus: Arc<dyn Bus>,
    sub_id: u64,
}

impl ShutdownSignal {
    /// 订阅 `internal.shutdown`；收到任意消息即触发。
    pub fn listen(bus: Arc<dyn Bus>) -> Result<Self, BusError> {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let sub_id = bus.subscribe(
            topics::INTERNAL_SHUTDOWN,
            Arc::new(move |_: BusData| {
                info!(target: "mc.runtime", "shutdown_requested_via_bus");
                trigger.cancel();
            }),
        )?;
        Ok(Self { token, bus, sub_id })
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 等待任一关停来源，返回来源名称。
    pub async fn wait(&self) -> &'static str {
        let reason = tokio::select! {
            _ = self.token.cancelled() => "bus",
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(target: "mc.runtime", error = %err, "ctrl_c_listener_failed");
                }
                "sigint"
            }
            _ = terminate() => "sigterm",
        };
        self.token.cancel();
        if let Err(err) = self.bus.unsubscribe(topics::INTERNAL_SHUTDOWN, self.sub_id) {
            warn!(target: "mc.runtime", error = %err, "shutdown_unsubscribe_failed");
        }
        info!(target: "mc.runtime", reason, "shutdown_signal_received");
        reason
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(target: "mc.runtime", error = %err, "sigterm_listener_failed");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
