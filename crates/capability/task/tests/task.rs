use chrono::Utc;
use contract::service::{command, kind};
use contract::{HandlerMessage, ServiceEvent, ServiceFilter, topics};
use domain::{
    Condition, Dampening, DampeningType, EvaluationType, Field, Operator, TaskConfig, VariableSpec,
};
use mc_bus::{Bus, BusData, BusExt, EmbeddedBus};
use mc_scheduler::CoreScheduler;
use mc_script::{TemplateEngine, WebhookClient};
use mc_storage::EntityApi;
use mc_task::{Evaluation, TaskContext, TaskEngine, polling_job_name};
use mc_variable::VariableEngine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    bus: Arc<dyn Bus>,
    api: EntityApi,
    scheduler: Arc<CoreScheduler>,
    engine: Arc<TaskEngine>,
}

fn harness() -> Harness {
    let bus: Arc<dyn Bus> = Arc::new(EmbeddedBus::new("", 1000));
    let api = EntityApi::in_memory(bus.clone());
    let scheduler = Arc::new(CoreScheduler::new());
    let webhook = WebhookClient::new().expect("client");
    let ctx = TaskContext {
        bus: bus.clone(),
        scheduler: scheduler.clone(),
        variables: VariableEngine::new(
            api.clone(),
            TemplateEngine::new("2.0.0", None),
            webhook.clone(),
            None,
        ),
        webhook,
    };
    Harness {
        bus,
        api,
        scheduler,
        engine: Arc::new(TaskEngine::new(ctx, ServiceFilter::default())),
    }
}

fn collect<T: serde::de::DeserializeOwned + Send + 'static>(
    bus: &Arc<dyn Bus>,
    topic: &str,
) -> mpsc::UnboundedReceiver<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        topic,
        Arc::new(move |data: BusData| {
            if let Ok(item) = data.decode::<T>() {
                let _ = tx.send(item);
            }
        }),
    )
    .expect("subscribe");
    rx
}

fn temperature_task() -> TaskConfig {
    let mut task = TaskConfig {
        id: "hot".to_string(),
        enabled: true,
        trigger_on_event: true,
        handlers: vec!["h1".to_string()],
        dampening: Dampening {
            dampening_type: DampeningType::Consecutive,
            occurrences: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    task.variables.insert(
        "temp".to_string(),
        VariableSpec::quick_id("sf:gw1.n1.s1.V_TEMP.current.value"),
    );
    task.evaluation_config.rule.match_all = true;
    task.evaluation_config.rule.conditions = vec![Condition {
        variable: "temp".to_string(),
        operator: Operator::Gt,
        value: json!("30"),
    }];
    task.event_filter.entity_types = vec!["field".to_string()];
    task.event_filter
        .filters
        .insert("fieldId".to_string(), "V_TEMP".to_string());
    task.handler_parameters
        .insert("text".to_string(), json!("temperature is {{ temp }}"));
    task
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn consecutive_dampening_notifies_once_after_third_hot_reading() {
    let h = harness();
    let mut notified = collect::<HandlerMessage>(&h.bus, topics::MESSAGE_NOTIFY_HANDLER);
    let listeners = h.engine.start_listeners(100).expect("listeners");
    h.engine.add(temperature_task()).expect("add");

    let mut counts = Vec::new();
    for value in [31, 32, 33, 28] {
        let before = h.engine.state("hot").and_then(|state| state.last_evaluation);
        let mut field = match h.api.field.find(&Field::new("gw1", "n1", "s1", "V_TEMP").id).await {
            Ok(Some(field)) => field,
            _ => Field::new("gw1", "n1", "s1", "V_TEMP"),
        };
        field.shift_value(json!(value), Utc::now());
        h.api.field.save(field).await.expect("save");
        let engine = h.engine.clone();
        wait_for(move || engine.state("hot").and_then(|state| state.last_evaluation) != before).await;
        counts.push(h.engine.state("hot").map(|state| state.executed_count).unwrap_or_default());
    }
    assert_eq!(counts, vec![0, 0, 1, 1]);

    let message = tokio::time::timeout(Duration::from_secs(1), notified.recv())
        .await
        .expect("notify in time")
        .expect("message");
    assert_eq!(message.id, "h1");
    assert_eq!(message.data["text"], json!("temperature is 33"));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), notified.recv())
            .await
            .is_err()
    );
    assert!(!h.engine.state("hot").expect("state").last_status);
    listeners.close().await;
}

#[tokio::test]
async fn quick_id_variable_reaches_handler_parameters() {
    let h = harness();
    let mut notified = collect::<HandlerMessage>(&h.bus, topics::MESSAGE_NOTIFY_HANDLER);
    let mut field = Field::new("g1", "n1", "s1", "f1");
    field.shift_value(json!("23.5"), Utc::now());
    h.api.field.save(field).await.expect("save");

    let mut task = TaskConfig {
        id: "report".to_string(),
        enabled: true,
        trigger_on_event: true,
        evaluation_type: EvaluationType::Javascript,
        handlers: vec!["h1".to_string(), "h2".to_string()],
        ..Default::default()
    };
    task.variables.insert(
        "t".to_string(),
        VariableSpec::quick_id("sf:g1.n1.s1.f1.current.value"),
    );
    task.evaluation_config.javascript = "({isTriggered: Number(variables.t) > 20})".to_string();
    task.handler_parameters
        .insert("temperature".to_string(), json!("{{ t }}"));
    h.engine.add(task).expect("add");

    let fired = h.engine.execute(Evaluation::polling("report")).await.expect("execute");
    assert!(fired);
    let mut ids = Vec::new();
    for _ in 0..2 {
        let message = tokio::time::timeout(Duration::from_secs(1), notified.recv())
            .await
            .expect("notify in time")
            .expect("message");
        assert_eq!(message.data["temperature"], json!("23.5"));
        ids.push(message.id);
    }
    ids.sort();
    assert_eq!(ids, vec!["h1", "h2"]);
}

#[tokio::test]
async fn ignore_duplicate_and_auto_disable() {
    let h = harness();
    let mut notified = collect::<HandlerMessage>(&h.bus, topics::MESSAGE_NOTIFY_HANDLER);
    let mut requests = collect::<ServiceEvent>(&h.bus, topics::SERVICE_RESOURCE_SERVER);

    let task = TaskConfig {
        id: "dup".to_string(),
        enabled: true,
        trigger_on_event: true,
        ignore_duplicate: true,
        handlers: vec!["h1".to_string()],
        ..Default::default()
    };
    h.engine.add(task).expect("add");
    assert!(h.engine.execute(Evaluation::polling("dup")).await.expect("first"));
    assert!(!h.engine.execute(Evaluation::polling("dup")).await.expect("second"));
    assert!(notified.recv().await.is_some());
    assert!(notified.try_recv().is_err());

    let task = TaskConfig {
        id: "once".to_string(),
        enabled: true,
        trigger_on_event: true,
        auto_disable: true,
        handlers: vec!["h1".to_string()],
        ..Default::default()
    };
    h.engine.add(task).expect("add");
    assert!(h.engine.execute(Evaluation::polling("once")).await.expect("fires"));
    assert!(!h.engine.execute(Evaluation::polling("once")).await.expect("disabled"));

    let mut disabled = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), requests.recv()).await
    {
        if event.service_type == kind::TASK && event.command == command::DISABLE {
            assert_eq!(event.id, "once");
            disabled = true;
        }
    }
    assert!(disabled);
}

#[tokio::test]
async fn polling_tasks_run_on_the_core_scheduler() {
    let h = harness();
    let mut notified = collect::<HandlerMessage>(&h.bus, topics::MESSAGE_NOTIFY_HANDLER);
    let listeners = h.engine.start_listeners(100).expect("listeners");
    let task = TaskConfig {
        id: "poll".to_string(),
        enabled: true,
        trigger_on_event: false,
        execution_interval: "50ms".to_string(),
        handlers: vec!["h1".to_string()],
        ..Default::default()
    };
    h.engine.add(task).expect("add");
    assert!(h.scheduler.is_available(&polling_job_name("poll")));
    h.scheduler.start();

    let message = tokio::time::timeout(Duration::from_secs(2), notified.recv())
        .await
        .expect("polled in time")
        .expect("message");
    assert_eq!(message.id, "h1");

    h.engine.remove("poll");
    assert!(!h.scheduler.is_available(&polling_job_name("poll")));
    h.scheduler.close();
    listeners.close().await;
}

#[tokio::test]
async fn service_events_load_and_unload_tasks() {
    let h = harness();
    let listeners = h.engine.start_listeners(100).expect("listeners");
    let add = ServiceEvent::new(kind::TASK, command::ADD)
        .with_data(&temperature_task())
        .expect("encode");
    h.bus.publish(topics::SERVICE_TASK, &add).expect("publish");
    let engine = h.engine.clone();
    wait_for(move || engine.is_loaded("hot")).await;

    let remove = ServiceEvent::new(kind::TASK, command::REMOVE).with_id("hot");
    h.bus.publish(topics::SERVICE_TASK, &remove).expect("publish");
    let engine = h.engine.clone();
    wait_for(move || !engine.is_loaded("hot")).await;
    listeners.close().await;
}

fn polling_task(id: &str) -> TaskConfig {
    TaskConfig {
        id: id.to_string(),
        enabled: true,
        trigger_on_event: false,
        execution_interval: "1h".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn removing_a_task_keeps_jobs_of_tasks_sharing_its_prefix() {
    let h = harness();
    h.engine.add(polling_task("alarm_kitchen")).expect("add");
    h.engine.add(polling_task("alarm")).expect("add");
    assert!(h.scheduler.is_available(&polling_job_name("alarm")));

    assert!(h.engine.remove("alarm"));
    assert!(!h.scheduler.is_available(&polling_job_name("alarm")));
    assert!(h.engine.is_loaded("alarm_kitchen"));
    assert!(h.scheduler.is_available(&polling_job_name("alarm_kitchen")));

    // 重载同样只替换自身的作业
    h.engine.add(polling_task("alarm")).expect("reload");
    assert!(h.scheduler.is_available(&polling_job_name("alarm_kitchen")));
}

#[tokio::test]
async fn stored_task_changes_refresh_the_loaded_copy() {
    let h = harness();
    let listeners = h.engine.start_listeners(100).expect("listeners");
    let task = h.api.task.save(polling_task("nightly")).await.expect("save");
    h.engine.add(task.clone()).expect("add");

    let mut written = task.clone();
    written.state.executed_count = 7;
    h.api.task.save(written).await.expect("state write");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.engine.is_loaded("nightly"));
    assert!(h.scheduler.is_available(&polling_job_name("nightly")));

    let disabled = TaskConfig {
        enabled: false,
        ..task.clone()
    };
    h.api.task.save(disabled).await.expect("disable");
    let engine = h.engine.clone();
    wait_for(move || !engine.is_loaded("nightly")).await;
    assert!(!h.scheduler.is_available(&polling_job_name("nightly")));
    listeners.close().await;
}

#[tokio::test]
async fn deleted_task_is_unloaded() {
    let h = harness();
    let listeners = h.engine.start_listeners(100).expect("listeners");
    let task = h.api.task.save(polling_task("gone")).await.expect("save");
    h.engine.add(task).expect("add");
    h.api.task.delete(&["gone".to_string()]).await.expect("delete");
    let engine = h.engine.clone();
    wait_for(move || !engine.is_loaded("gone")).await;
    listeners.close().await;
}
