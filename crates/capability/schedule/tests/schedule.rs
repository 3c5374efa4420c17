use chrono::{Local, TimeDelta, Utc};
use contract::service::{command, kind};
use contract::{HandlerMessage, ScheduleStateUpdate, ServiceEvent, ServiceFilter, topics};
use domain::schedule::{CustomVariableType, DateRange};
use domain::{Frequency, ScheduleConfig, ScheduleSpec, ScheduleType, VariableSpec};
use mc_bus::{Bus, BusData, BusExt, EmbeddedBus};
use mc_schedule::{ScheduleContext, ScheduleService, job_name};
use mc_scheduler::CoreScheduler;
use mc_script::{TemplateEngine, WebhookClient};
use mc_storage::EntityApi;
use mc_variable::VariableEngine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    bus: Arc<dyn Bus>,
    scheduler: Arc<CoreScheduler>,
    service: Arc<ScheduleService>,
}

fn harness() -> Harness {
    let bus: Arc<dyn Bus> = Arc::new(EmbeddedBus::new("", 1000));
    let api = EntityApi::in_memory(bus.clone());
    let scheduler = Arc::new(CoreScheduler::new());
    let webhook = WebhookClient::new().expect("client");
    let ctx = ScheduleContext {
        bus: bus.clone(),
        scheduler: scheduler.clone(),
        variables: VariableEngine::new(api, TemplateEngine::new("2.0.0", None), webhook.clone(), None),
        webhook,
        location: None,
    };
    Harness {
        bus,
        scheduler,
        service: Arc::new(ScheduleService::new(ctx, ServiceFilter::default())),
    }
}

fn service_events(bus: &Arc<dyn Bus>) -> mpsc::UnboundedReceiver<ServiceEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        topics::SERVICE_RESOURCE_SERVER,
        Arc::new(move |data: BusData| {
            if let Ok(event) = data.decode::<ServiceEvent>() {
                let _ = tx.send(event);
            }
        }),
    )
    .expect("subscribe");
    rx
}

fn handler_messages(bus: &Arc<dyn Bus>) -> mpsc::UnboundedReceiver<HandlerMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        topics::MESSAGE_NOTIFY_HANDLER,
        Arc::new(move |data: BusData| {
            if let Ok(message) = data.decode::<HandlerMessage>() {
                let _ = tx.send(message);
            }
        }),
    )
    .expect("subscribe");
    rx
}

fn on_date(id: &str, date: &str, time: &str) -> ScheduleConfig {
    ScheduleConfig {
        id: id.to_string(),
        enabled: true,
        schedule_type: ScheduleType::Simple,
        spec: ScheduleSpec {
            frequency: Frequency::OnDate,
            date: date.to_string(),
            time: time.to_string(),
            ..Default::default()
        },
        handlers: vec!["h1".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn on_date_schedule_is_installed_as_one_shot_cron() {
    let h = harness();
    h.service
        .add(on_date("launch", "2030-07-14", "09:00:00"))
        .expect("add");
    assert_eq!(
        h.scheduler.spec_of(&job_name("launch")).as_deref(),
        Some("0 0 9 14 7 * 2030")
    );
    let window = h.service.get("launch").expect("loaded").validity.date;
    let from = window.from.expect("from").with_timezone(&Local);
    assert_eq!(from.format("%Y-%m-%d").to_string(), "2030-07-14");
    // 目标日期之前触发不生效
    assert!(!h.service.execute("launch").await.expect("execute"));
}

#[tokio::test]
async fn on_date_schedule_disables_itself_after_running() {
    let h = harness();
    let mut requests = service_events(&h.bus);
    let mut messages = handler_messages(&h.bus);
    let today = Local::now().format("%Y-%m-%d").to_string();
    h.service
        .add(on_date("today", &today, "23:59:59"))
        .expect("add");

    assert!(h.service.execute("today").await.expect("execute"));
    assert!(!h.scheduler.is_available(&job_name("today")));
    assert!(!h.service.execute("today").await.expect("second run"));
    assert_eq!(messages.recv().await.map(|message| message.id).as_deref(), Some("h1"));
    assert!(messages.try_recv().is_err());

    let mut executed = 0;
    let mut disabled = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), requests.recv()).await {
        assert_eq!(event.service_type, kind::SCHEDULER);
        match event.command.as_str() {
            command::UPDATE_STATE => {
                let update: ScheduleStateUpdate = event.decode_data().expect("state");
                executed = update.state.executed_count;
                assert!(update.state.last_status);
            }
            command::DISABLE => disabled = true,
            _ => {}
        }
    }
    assert_eq!(executed, 1);
    assert!(disabled);
}

#[tokio::test]
async fn repeat_schedule_stops_at_repeat_count() {
    let h = harness();
    let mut messages = handler_messages(&h.bus);
    let config = ScheduleConfig {
        id: "blink".to_string(),
        enabled: true,
        schedule_type: ScheduleType::Repeat,
        spec: ScheduleSpec {
            repeat_interval: "40ms".to_string(),
            repeat_count: 3,
            ..Default::default()
        },
        handlers: vec!["h1".to_string()],
        ..Default::default()
    };
    h.service.add(config).expect("add");
    h.scheduler.start();

    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(2), messages.recv())
            .await
            .expect("run in time")
            .expect("message");
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(messages.try_recv().is_err());
    let config = h.service.get("blink").expect("loaded");
    assert_eq!(config.state.executed_count, 3);
    assert!(!config.enabled);
    assert!(!h.scheduler.is_available(&job_name("blink")));
    h.scheduler.close();
}

#[tokio::test]
async fn custom_script_variables_feed_handler_parameters() {
    let h = harness();
    let mut messages = handler_messages(&h.bus);
    let mut config = ScheduleConfig {
        id: "greet".to_string(),
        enabled: true,
        schedule_type: ScheduleType::Cron,
        spec: ScheduleSpec {
            cron_expression: "0 0 * * * *".to_string(),
            ..Default::default()
        },
        custom_variable_type: CustomVariableType::Javascript,
        handlers: vec!["h1".to_string()],
        ..Default::default()
    };
    config
        .variables
        .insert("who".to_string(), VariableSpec::literal("there"));
    config.custom_variable_config.javascript = "({greeting: 'hi ' + variables.who})".to_string();
    config
        .handler_parameters
        .insert("text".to_string(), json!("{{ greeting }}!"));
    h.service.add(config).expect("add");

    assert!(h.service.execute("greet").await.expect("execute"));
    let message = messages.recv().await.expect("message");
    assert_eq!(message.data["text"], json!("hi there!"));
}

#[tokio::test]
async fn inverted_validity_never_runs() {
    let h = harness();
    let mut messages = handler_messages(&h.bus);
    let now = Utc::now();
    let mut config = ScheduleConfig {
        id: "never".to_string(),
        enabled: true,
        schedule_type: ScheduleType::Repeat,
        spec: ScheduleSpec {
            repeat_interval: "1h".to_string(),
            ..Default::default()
        },
        handlers: vec!["h1".to_string()],
        ..Default::default()
    };
    config.validity.date = DateRange {
        from: Some(now + TimeDelta::days(1)),
        to: Some(now - TimeDelta::days(1)),
    };
    h.service.add(config).expect("add");
    assert!(!h.service.execute("never").await.expect("execute"));
    assert!(messages.try_recv().is_err());
}

#[tokio::test]
async fn service_events_install_and_remove_schedules() {
    let h = harness();
    let listener = h.service.start_listener(100).expect("listener");
    let config = ScheduleConfig {
        id: "daily".to_string(),
        enabled: true,
        schedule_type: ScheduleType::Simple,
        spec: ScheduleSpec {
            frequency: Frequency::Daily,
            time: "07:30:00".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let add = ServiceEvent::new(kind::SCHEDULER, command::ADD)
        .with_data(&config)
        .expect("encode");
    h.bus.publish(topics::SERVICE_SCHEDULER, &add).expect("publish");
    for _ in 0..100 {
        if h.service.is_loaded("daily") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.scheduler.spec_of(&job_name("daily")).as_deref(), Some("0 30 7 * * *"));

    let remove = ServiceEvent::new(kind::SCHEDULER, command::REMOVE).with_id("daily");
    h.bus.publish(topics::SERVICE_SCHEDULER, &remove).expect("publish");
    for _ in 0..100 {
        if !h.service.is_loaded("daily") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.scheduler.is_available(&job_name("daily")));
    listener.close().await;
}
