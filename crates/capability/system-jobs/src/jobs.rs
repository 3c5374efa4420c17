//! 系统作业。
//!
//! - `sunrise_update`（cron，默认 `0 15 1 * * *`）：通知计划服务重算日出日落计划
//! - `node_state`（`@every`，默认 5m）：`lastSeen` 超过 `inactive_duration` 的节点标记为 down
//! - `telemetry`（`@every`，仅 `telemetry.enabled`）：记录运行计数快照
//!
//! 作业函数只派发任务；存储访问在派发出的任务中进行。

use crate::error::SystemJobsError;
use chrono::{DateTime, TimeDelta, Utc};
use contract::service::{command, kind};
use contract::{EntityState, ServiceEvent, topics};
use domain::duration::parse_duration;
use domain::{State, Status};
use mc_bus::{Bus, BusData, BusError, BusExt, QueueListener, queue_callback};
use mc_config::SystemJobsConfig;
use mc_scheduler::CoreScheduler;
use mc_storage::EntityApi;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info, warn};

pub const JOB_PREFIX: &str = "mc_system_job_";
pub const JOB_SUNRISE: &str = "mc_system_job_sunrise_update";
pub const JOB_NODE_STATE: &str = "mc_system_job_node_state";
pub const JOB_TELEMETRY: &str = "mc_system_job_telemetry";

pub struct SystemJobsContext {
    pub bus: Arc<dyn Bus>,
    pub api: EntityApi,
    pub scheduler: Arc<CoreScheduler>,
}

pub struct SystemJobs {
    ctx: SystemJobsContext,
    config: RwLock<SystemJobsConfig>,
    telemetry_enabled: bool,
}

impl SystemJobs {
    pub fn new(ctx: SystemJobsContext, config: SystemJobsConfig, telemetry_enabled: bool) -> Self {
        Self {
            ctx,
            config: RwLock::new(config),
            telemetry_enabled,
        }
    }

    pub fn config(&self) -> SystemJobsConfig {
        self.config
            .read()
            .map(|config| config.clone())
            .unwrap_or_default()
    }

    /// (重新)注册全部系统作业。
    pub fn install(self: &Arc<Self>) -> Result<(), SystemJobsError> {
        self.ctx.scheduler.remove_with_prefix(JOB_PREFIX);
        let config = self.config();

        let jobs = Arc::downgrade(self);
        self.ctx.scheduler.add(
            JOB_SUNRISE,
            &config.sunrise_update,
            Arc::new(move || {
                if let Some(jobs) = jobs.upgrade() {
                    if let Err(err) = jobs.reload_sunrise() {
                        warn!(target: "mc.system_jobs", error = %err, "sunrise_reload_failed");
                    }
                }
            }),
        )?;

        let interval = non_empty(&config.node_state.execution_interval, "5m");
        let jobs = Arc::downgrade(self);
        self.ctx.scheduler.add(
            JOB_NODE_STATE,
            &format!("@every {interval}"),
            Arc::new(move || spawn_node_state_check(&jobs)),
        )?;

        if self.telemetry_enabled {
            let interval = non_empty(&config.telemetry_interval, "1h");
            self.ctx.scheduler.add(
                JOB_TELEMETRY,
                &format!("@every {interval}"),
                Arc::new(log_telemetry),
            )?;
        }
        info!(
            target: "mc.system_jobs",
            sunrise_update = %config.sunrise_update,
            node_state = %interval,
            telemetry = self.telemetry_enabled,
            "system_jobs_installed"
        );
        Ok(())
    }

    /// 请求计划服务重算日出日落计划。
    pub fn reload_sunrise(&self) -> Result<(), BusError> {
        let event = ServiceEvent::new(kind::SCHEDULER, command::RELOAD_SUNRISE);
        self.ctx.bus.publish(topics::SERVICE_SCHEDULER, &event)?;
        debug!(target: "mc.system_jobs", "sunrise_reload_requested");
        Ok(())
    }

    /// 把不活跃的节点标记为 down；返回标记数量。
    pub async fn check_node_state(&self, now: DateTime<Utc>) -> Result<usize, SystemJobsError> {
        let config = self.config();
        let inactive = parse_duration(non_empty(&config.node_state.inactive_duration, "15m"))
            .map_err(|err| SystemJobsError::Config(err.to_string()))?;
        let inactive = TimeDelta::from_std(inactive).map_err(|err| SystemJobsError::Config(err.to_string()))?;
        let threshold = now - inactive;
        let mut marked = 0;
        for node in self.ctx.api.node.list(&[]).await? {
            if node.state.status == Status::Down {
                continue;
            }
            if node.last_seen.is_some_and(|seen| seen >= threshold) {
                continue;
            }
            let update = EntityState {
                id: node.id.clone(),
                state: State::down(format!(
                    "no activity in the last {}",
                    config.node_state.inactive_duration
                )),
            };
            let event = ServiceEvent::new(kind::NODE, command::UPDATE_STATE)
                .with_id(node.id.clone())
                .with_data(&update)
                .map_err(BusError::from)?;
            self.ctx.bus.publish(topics::SERVICE_RESOURCE_SERVER, &event)?;
            info!(
                target: "mc.system_jobs",
                gateway_id = %node.gateway_id,
                node_id = %node.node_id,
                last_seen = ?node.last_seen,
                "node_marked_down"
            );
            marked += 1;
        }
        Ok(marked)
    }

    /// 处理 `internal.system_jobs` 上的命令。
    pub async fn handle_event(self: &Arc<Self>, event: &ServiceEvent) {
        let result = match event.command.as_str() {
            command::RELOAD => {
                if !event.data.trim().is_empty() {
                    match event.decode_data::<SystemJobsConfig>() {
                        Ok(config) => {
                            *self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
                        }
                        Err(err) => warn!(target: "mc.system_jobs", error = %err, "system_jobs_config_invalid"),
                    }
                }
                self.install()
            }
            command::RELOAD_SUNRISE => self.reload_sunrise().map_err(SystemJobsError::from),
            command::NODE_STATE => self.check_node_state(Utc::now()).await.map(|_| ()),
            command::TELEMETRY => {
                log_telemetry();
                Ok(())
            }
            other => {
                warn!(target: "mc.system_jobs", command = %other, "system_jobs_command_unsupported");
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(
                target: "mc.system_jobs",
                command = %event.command,
                error = %err,
                "system_jobs_command_failed"
            );
        }
    }

    /// 订阅 `internal.system_jobs`。
    pub fn start_listener(self: &Arc<Self>, capacity: usize) -> Result<QueueListener, BusError> {
        let jobs = self.clone();
        QueueListener::start(
            self.ctx.bus.clone(),
            topics::INTERNAL_SYSTEM_JOBS,
            "system_jobs",
            capacity,
            1,
            queue_callback(move |data: BusData| {
                let jobs = jobs.clone();
                async move {
                    match data.decode::<ServiceEvent>() {
                        Ok(event) => jobs.handle_event(&event).await,
                        Err(err) => warn!(target: "mc.system_jobs", error = %err, "system_jobs_event_invalid"),
                    }
                }
            }),
        )
    }

    pub fn close(&self) {
        self.ctx.scheduler.remove_with_prefix(JOB_PREFIX);
    }
}

fn spawn_node_state_check(jobs: &Weak<SystemJobs>) {
    let Some(jobs) = jobs.upgrade() else {
        return;
    };
    tokio::spawn(async move {
        if let Err(err) = jobs.check_node_state(Utc::now()).await {
            warn!(target: "mc.system_jobs", error = %err, "node_state_check_failed");
        }
    });
}

fn log_telemetry() {
    let snapshot = mc_telemetry::metrics().snapshot();
    info!(
        target: "mc.system_jobs",
        bus_published = snapshot.bus_published,
        bus_dropped = snapshot.bus_dropped,
        queue_overflow = snapshot.queue_overflow,
        messages_received = snapshot.messages_received,
        messages_sent = snapshot.messages_sent,
        ack_timeouts = snapshot.ack_timeouts,
        tasks_evaluated = snapshot.tasks_evaluated,
        tasks_triggered = snapshot.tasks_triggered,
        handler_posts_ok = snapshot.handler_posts_ok,
        handler_posts_failed = snapshot.handler_posts_failed,
        schedules_executed = snapshot.schedules_executed,
        "telemetry_snapshot"
    );
}

fn non_empty<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() { default } else { value.trim() }
}
