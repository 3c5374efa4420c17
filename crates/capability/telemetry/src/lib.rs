//! 追踪初始化、关联 ID 与进程内计数器。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 日志输出设置。
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// 核心组件级别（`mc.*` 默认级别）。
    pub core: String,
    pub storage: String,
    pub metric: String,
    pub web_handler: String,
    /// true 时输出 JSON 行。
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            core: "info".to_string(),
            storage: "info".to_string(),
            metric: "warn".to_string(),
            web_handler: "info".to_string(),
            json: false,
        }
    }
}

impl LogSettings {
    /// 组合 EnvFilter 指令，例如 `info,mc.storage=warn`。
    pub fn directives(&self) -> String {
        format!(
            "{},mc.storage={},mc.metric={},mc.web={}",
            self.core, self.storage, self.metric, self.web_handler
        )
    }
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub bus_published: u64,
    pub bus_dropped: u64,
    pub queue_overflow: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub ack_timeouts: u64,
    pub tasks_evaluated: u64,
    pub tasks_triggered: u64,
    pub handler_posts_ok: u64,
    pub handler_posts_failed: u64,
    pub schedules_executed: u64,
}

/// 运行计数器。
pub struct TelemetryMetrics {
    bus_published: AtomicU64,
    bus_dropped: AtomicU64,
    queue_overflow: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    ack_timeouts: AtomicU64,
    tasks_evaluated: AtomicU64,
    tasks_triggered: AtomicU64,
    handler_posts_ok: AtomicU64,
    handler_posts_failed: AtomicU64,
    schedules_executed: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            bus_published: AtomicU64::new(0),
            bus_dropped: AtomicU64::new(0),
            queue_overflow: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            ack_timeouts: AtomicU64::new(0),
            tasks_evaluated: AtomicU64::new(0),
            tasks_triggered: AtomicU64::new(0),
            handler_posts_ok: AtomicU64::new(0),
            handler_posts_failed: AtomicU64::new(0),
            schedules_executed: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bus_published: self.bus_published.load(Ordering::Relaxed),
            bus_dropped: self.bus_dropped.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            tasks_evaluated: self.tasks_evaluated.load(Ordering::Relaxed),
            tasks_triggered: self.tasks_triggered.load(Ordering::Relaxed),
            handler_posts_ok: self.handler_posts_ok.load(Ordering::Relaxed),
            handler_posts_failed: self.handler_posts_failed.load(Ordering::Relaxed),
            schedules_executed: self.schedules_executed.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing；`RUST_LOG` 存在时优先。
pub fn init_tracing(settings: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.directives()));
    if settings.json {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 生成关联 ID（无连字符，可直接作为 topic 段）。
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn record_bus_published() {
    metrics().bus_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录暂停期间丢弃的发布。
pub fn record_bus_dropped() {
    metrics().bus_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录队列溢出（丢弃最旧元素）。
pub fn record_queue_overflow() {
    metrics().queue_overflow.fetch_add(1, Ordering::Relaxed);
}

pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

pub fn record_message_sent() {
    metrics().messages_sent.fetch_add(1, Ordering::Relaxed);
}

pub fn record_ack_timeout() {
    metrics().ack_timeouts.fetch_add(1, Ordering::Relaxed);
}

/// 记录任务评估；`triggered` 为最终（防抖后）结果。
pub fn record_task_evaluated(triggered: bool) {
    let metrics = metrics();
    metrics.tasks_evaluated.fetch_add(1, Ordering::Relaxed);
    if triggered {
        metrics.tasks_triggered.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_handler_post(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.handler_posts_ok.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.handler_posts_failed.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_schedule_executed() {
    metrics().schedules_executed.fetch_add(1, Ordering::Relaxed);
}
