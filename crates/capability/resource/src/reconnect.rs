//! 网关重连计时器。
//!
//! 每个网关最多一个待触发的计时器，作业名 `gateway_reconnect_<id>`。
//! 计时器触发一次后即移除；网关回报 up 时取消。

use crate::error::ResourceError;
use domain::duration::parse_duration;
use mc_scheduler::{CoreScheduler, JobFn};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const RECONNECT_PREFIX: &str = "gateway_reconnect_";

pub fn reconnect_job_name(gateway_id: &str) -> String {
    format!("{RECONNECT_PREFIX}{gateway_id}")
}

pub struct ReconnectStore {
    scheduler: Arc<CoreScheduler>,
    pending: Mutex<BTreeSet<String>>,
}

impl ReconnectStore {
    pub fn new(scheduler: Arc<CoreScheduler>) -> Self {
        Self {
            scheduler,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// 登记重连；已有计时器时保持原计时并返回 false。
    pub fn schedule(&self, gateway_id: &str, delay: &str, job: JobFn) -> Result<bool, ResourceError> {
        let delay = delay.trim();
        let parsed = parse_duration(delay).map_err(|err| ResourceError::Config(err.to_string()))?;
        if parsed.is_zero() {
            return Err(ResourceError::Config(format!(
                "reconnect delay of gateway `{gateway_id}` must be positive"
            )));
        }
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if pending.contains(gateway_id) {
            debug!(target: "mc.resource", gateway_id = %gateway_id, "gateway_reconnect_already_pending");
            return Ok(false);
        }
        self.scheduler
            .add(&reconnect_job_name(gateway_id), &format!("@every {delay}"), job)?;
        pending.insert(gateway_id.to_string());
        info!(target: "mc.resource", gateway_id = %gateway_id, delay = %delay, "gateway_reconnect_scheduled");
        Ok(true)
    }

    /// 移除计时器；不存在时返回 false。
    pub fn cancel(&self, gateway_id: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !pending.remove(gateway_id) {
            return false;
        }
        self.scheduler.remove(&reconnect_job_name(gateway_id));
        true
    }

    pub fn is_pending(&self, gateway_id: &str) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.contains(gateway_id))
            .unwrap_or_default()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending
            .lock()
            .map(|pending| pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn cancel_all(&self) {
        let drained: Vec<String> = {
            let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *pending).into_iter().collect()
        };
        for id in drained {
            self.scheduler.remove(&reconnect_job_name(&id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_timer_per_gateway() {
        let scheduler = Arc::new(CoreScheduler::new());
        let store = ReconnectStore::new(scheduler.clone());
        let job: JobFn = Arc::new(|| {});
        assert!(store.schedule("g1", "5s", job.clone()).expect("first"));
        assert!(!store.schedule("g1", "5s", job.clone()).expect("second"));
        assert!(store.schedule("g2", "5s", job.clone()).expect("other gateway"));
        assert_eq!(store.pending_ids(), vec!["g1", "g2"]);
        let reconnects = scheduler
            .list_names()
            .into_iter()
            .filter(|name| name.starts_with(RECONNECT_PREFIX))
            .count();
        assert_eq!(reconnects, 2);

        assert!(store.cancel("g1"));
        assert!(!store.cancel("g1"));
        assert!(!scheduler.is_available(&reconnect_job_name("g1")));
        assert!(store.schedule("g1", "0s", job).is_err());
        store.cancel_all();
        assert!(scheduler.list_names().is_empty());
    }
}
