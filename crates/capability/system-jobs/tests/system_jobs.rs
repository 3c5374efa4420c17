use chrono::{TimeDelta, Utc};
use contract::service::{command, kind};
use contract::{EntityState, ServiceEvent, topics};
use domain::{Node, State, Status};
use mc_bus::{Bus, BusData, BusExt, EmbeddedBus};
use mc_config::SystemJobsConfig;
use mc_scheduler::CoreScheduler;
use mc_storage::EntityApi;
use mc_system_jobs::{JOB_NODE_STATE, JOB_SUNRISE, JOB_TELEMETRY, SystemJobs, SystemJobsContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    bus: Arc<dyn Bus>,
    api: EntityApi,
    scheduler: Arc<CoreScheduler>,
}

fn harness() -> Harness {
    let bus: Arc<dyn Bus> = Arc::new(EmbeddedBus::new("", 1000));
    Harness {
        api: EntityApi::in_memory(bus.clone()),
        bus,
        scheduler: Arc::new(CoreScheduler::new()),
    }
}

impl Harness {
    fn jobs(&self, telemetry: bool) -> Arc<SystemJobs> {
        let ctx = SystemJobsContext {
            bus: self.bus.clone(),
            api: self.api.clone(),
            scheduler: self.scheduler.clone(),
        };
        Arc::new(SystemJobs::new(ctx, SystemJobsConfig::default(), telemetry))
    }
}

fn collect(bus: &Arc<dyn Bus>, topic: &str) -> mpsc::UnboundedReceiver<ServiceEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        topic,
        Arc::new(move |data: BusData| {
            if let Ok(event) = data.decode::<ServiceEvent>() {
                let _ = tx.send(event);
            }
        }),
    )
    .expect("subscribe");
    rx
}

#[tokio::test]
async fn jobs_are_installed_with_configured_specs() {
    let h = harness();
    let jobs = h.jobs(true);
    jobs.install().expect("install");
    assert_eq!(h.scheduler.spec_of(JOB_SUNRISE).as_deref(), Some("0 15 1 * * *"));
    assert_eq!(h.scheduler.spec_of(JOB_NODE_STATE).as_deref(), Some("@every 5m"));
    assert_eq!(h.scheduler.spec_of(JOB_TELEMETRY).as_deref(), Some("@every 1h"));

    jobs.close();
    assert!(h.scheduler.list_names().is_empty());
    h.jobs(false).install().expect("install");
    assert!(!h.scheduler.is_available(JOB_TELEMETRY));
}

#[tokio::test]
async fn stale_nodes_are_marked_down() {
    let h = harness();
    let now = Utc::now();
    let mut stale = Node::new("g1", "1");
    stale.state = State::up("");
    stale.last_seen = Some(now - TimeDelta::minutes(20));
    let stale = h.api.node.save(stale).await.expect("save");
    let mut fresh = Node::new("g1", "2");
    fresh.state = State::up("");
    fresh.last_seen = Some(now - TimeDelta::minutes(1));
    h.api.node.save(fresh).await.expect("save");
    let mut down = Node::new("g1", "3");
    down.state = State::down("");
    h.api.node.save(down).await.expect("save");

    let mut requests = collect(&h.bus, topics::SERVICE_RESOURCE_SERVER);
    let marked = h.jobs(false).check_node_state(now).await.expect("check");
    assert_eq!(marked, 1);
    let event = requests.recv().await.expect("update");
    assert_eq!((event.service_type.as_str(), event.command.as_str()), (kind::NODE, command::UPDATE_STATE));
    let update: EntityState = event.decode_data().expect("state");
    assert_eq!(update.id, stale.id);
    assert_eq!(update.state.status, Status::Down);
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn commands_run_jobs_on_demand() {
    let h = harness();
    let jobs = h.jobs(false);
    let listener = jobs.start_listener(10).expect("listener");
    let mut scheduler_events = collect(&h.bus, topics::SERVICE_SCHEDULER);

    h.bus
        .publish(
            topics::INTERNAL_SYSTEM_JOBS,
            &ServiceEvent::new(kind::SYSTEM_JOBS, command::RELOAD_SUNRISE),
        )
        .expect("publish");
    let event = tokio::time::timeout(Duration::from_secs(1), scheduler_events.recv())
        .await
        .expect("in time")
        .expect("event");
    assert_eq!(event.command, command::RELOAD_SUNRISE);

    let config = SystemJobsConfig {
        sunrise_update: "0 30 2 * * *".to_string(),
        ..Default::default()
    };
    let reload = ServiceEvent::new(kind::SYSTEM_JOBS, command::RELOAD)
        .with_data(&config)
        .expect("encode");
    h.bus.publish(topics::INTERNAL_SYSTEM_JOBS, &reload).expect("publish");
    for _ in 0..100 {
        if h.scheduler.spec_of(JOB_SUNRISE).as_deref() == Some("0 30 2 * * *") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.scheduler.spec_of(JOB_SUNRISE).as_deref(), Some("0 30 2 * * *"));
    listener.close().await;
}
