//! 核心调度器：按名称管理的 cron / `@every` 作业。
//!
//! 每个作业运行在独立的 tokio 任务中；作业函数应尽快返回，
//! 较重的工作自行 `tokio::spawn`。

use chrono::Local;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 调度器错误。
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid schedule spec `{0}`: {1}")]
    InvalidSpec(String, String),
}

/// 作业函数。
pub type JobFn = Arc<dyn Fn() + Send + Sync>;

/// 解析后的触发规则。
#[derive(Debug, Clone)]
pub enum Trigger {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    /// 解析 `@every <duration>`、`@daily` 等别名，或 5/6/7 段 cron 表达式（5 段时补秒位 0）。
    pub fn parse(spec: &str) -> Result<Self, SchedulerError> {
        let spec = spec.trim();
        if let Some(rest) = spec.strip_prefix("@every") {
            let interval = domain::duration::parse_duration(rest.trim())
                .map_err(|err| SchedulerError::InvalidSpec(spec.to_string(), err.to_string()))?;
            if interval.is_zero() {
                return Err(SchedulerError::InvalidSpec(
                    spec.to_string(),
                    "interval must be positive".to_string(),
                ));
            }
            return Ok(Trigger::Every(interval));
        }
        let expression = if !spec.starts_with('@') && spec.split_whitespace().count() == 5 {
            format!("0 {}", spec)
        } else {
            spec.to_string()
        };
        cron::Schedule::from_str(&expression)
            .map(|schedule| Trigger::Cron(Box::new(schedule)))
            .map_err(|err| SchedulerError::InvalidSpec(spec.to_string(), err.to_string()))
    }

    /// 距下一次触发的时长；cron 没有后续时间点时返回 None。
    fn next_delay(&self) -> Option<Duration> {
        match self {
            Trigger::Every(interval) => Some(*interval),
            Trigger::Cron(schedule) => {
                let next = schedule.upcoming(Local).next()?;
                Some((next - Local::now()).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

struct Entry {
    spec: String,
    trigger: Trigger,
    job: JobFn,
    handle: Option<JoinHandle<()>>,
}

/// 核心调度器。
#[derive(Default)]
pub struct CoreScheduler {
    entries: RwLock<HashMap<String, Entry>>,
    started: AtomicBool,
}

impl CoreScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 添加作业；同名作业会被替换。
    pub fn add(&self, name: &str, spec: &str, job: JobFn) -> Result<(), SchedulerError> {
        let trigger = Trigger::parse(spec)?;
        let mut entry = Entry {
            spec: spec.to_string(),
            trigger,
            job,
            handle: None,
        };
        if self.started.load(Ordering::Acquire) {
            entry.handle = Some(spawn_entry(name, &entry));
        }
        let previous = self.write().insert(name.to_string(), entry);
        if let Some(previous) = previous {
            if let Some(handle) = previous.handle {
                handle.abort();
            }
            debug!(target: "mc.scheduler", name = %name, "scheduler_entry_replaced");
        }
        info!(target: "mc.scheduler", name = %name, spec = %spec, "scheduler_entry_added");
        Ok(())
    }

    pub fn remove(&self, name: &str) {
        if let Some(entry) = self.write().remove(name) {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
            info!(target: "mc.scheduler", name = %name, "scheduler_entry_removed");
        }
    }

    /// 移除所有以 `prefix` 开头的作业。
    pub fn remove_with_prefix(&self, prefix: &str) {
        let removed: Vec<(String, Entry)> = {
            let mut entries = self.write();
            let names: Vec<String> = entries
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect();
            names
                .into_iter()
                .filter_map(|name| entries.remove(&name).map(|entry| (name, entry)))
                .collect()
        };
        for (name, entry) in removed {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
            debug!(target: "mc.scheduler", name = %name, "scheduler_entry_removed");
        }
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn spec_of(&self, name: &str) -> Option<String> {
        self.read().get(name).map(|entry| entry.spec.clone())
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 启动调度；之前添加的作业开始计时。
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut entries = self.write();
        for (name, entry) in entries.iter_mut() {
            if entry.handle.is_none() {
                entry.handle = Some(spawn_entry(name, entry));
            }
        }
        info!(target: "mc.scheduler", entries = entries.len(), "scheduler_started");
    }

    /// 停止并清空所有作业。
    pub fn close(&self) {
        self.started.store(false, Ordering::Release);
        let drained: Vec<Entry> = self.write().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
        info!(target: "mc.scheduler", "scheduler_closed");
    }
}

fn spawn_entry(name: &str, entry: &Entry) -> JoinHandle<()> {
    let name = name.to_string();
    let trigger = entry.trigger.clone();
    let job = entry.job.clone();
    tokio::spawn(async move {
        loop {
            let Some(delay) = trigger.next_delay() else {
                debug!(target: "mc.scheduler", name = %name, "scheduler_entry_exhausted");
                break;
            };
            tokio::time::sleep(delay).await;
            debug!(target: "mc.scheduler", name = %name, "scheduler_job_fired");
            job();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_and_cron_forms() {
        assert!(matches!(
            Trigger::parse("@every 5m"),
            Ok(Trigger::Every(d)) if d == Duration::from_secs(300)
        ));
        assert!(matches!(Trigger::parse("0 15 1 * * *"), Ok(Trigger::Cron(_))));
        assert!(matches!(Trigger::parse("*/5 * * * *"), Ok(Trigger::Cron(_))));
        assert!(matches!(Trigger::parse("0 0 9 14 Jul * 2030"), Ok(Trigger::Cron(_))));
        assert!(Trigger::parse("@every 0s").is_err());
        assert!(Trigger::parse("not a cron").is_err());
    }
}
