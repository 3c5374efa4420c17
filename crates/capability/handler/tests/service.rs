use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use contract::{EntityState, HandlerMessage, ServiceEvent, ServiceFilter};
use domain::{HandlerConfig, Spec, Status};
use mc_bus::{Bus, BusExt, EmbeddedBus};
use mc_handler::{HandlerContext, HandlerError, HandlerService};
use mc_script::WebhookClient;
use mc_storage::EntityApi;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn capture_router(path: &str) -> (Router, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new().route(
        path,
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
                StatusCode::OK
            }
        }),
    );
    (router, rx)
}

struct Harness {
    bus: Arc<EmbeddedBus>,
    service: Arc<HandlerService>,
    states: mpsc::UnboundedReceiver<EntityState>,
}

fn harness(api: Option<EntityApi>) -> Harness {
    let bus = Arc::new(EmbeddedBus::new("", 100));
    let (tx, states) = mpsc::unbounded_channel();
    bus.subscribe(
        "service.resource_server",
        Arc::new(move |data| {
            if let Ok(event) = data.decode::<ServiceEvent>() {
                if event.command == "update_state" {
                    if let Ok(state) = event.decode_data::<EntityState>() {
                        let _ = tx.send(state);
                    }
                }
            }
        }),
    )
    .expect("subscribe");
    let ctx = HandlerContext {
        bus: bus.clone(),
        webhook: WebhookClient::new().expect("client"),
        api,
    };
    let service = HandlerService::new(ctx, None, ServiceFilter::default())
        .with_reload_delay(Duration::from_millis(10));
    Harness {
        bus,
        service: Arc::new(service),
        states,
    }
}

fn config(id: &str, handler_type: &str, spec: Value) -> HandlerConfig {
    HandlerConfig {
        id: id.to_string(),
        enabled: true,
        handler_type: handler_type.to_string(),
        spec: serde_json::from_value(spec).expect("spec"),
        ..Default::default()
    }
}

fn message(id: &str, data: Value) -> HandlerMessage {
    let data: Spec = serde_json::from_value(data).expect("data");
    HandlerMessage {
        id: id.to_string(),
        data,
    }
}

#[tokio::test]
async fn start_is_idempotent_and_reports_state() {
    let mut h = harness(None);
    h.service
        .start(config("h1", "noop", json!({})))
        .await
        .expect("start");
    h.service
        .start(config("h1", "noop", json!({})))
        .await
        .expect("start again");
    assert_eq!(h.service.running_ids(), vec!["h1".to_string()]);

    let up = h.states.recv().await.expect("state");
    assert_eq!(up.id, "h1");
    assert_eq!(up.state.status, Status::Up);

    h.service
        .post(&message("h1", json!({"text": "hello"})))
        .await
        .expect("post");
    assert_eq!(h.states.recv().await.expect("state").state.status, Status::Ok);

    assert!(h.service.stop("h1").await);
    assert_eq!(h.states.recv().await.expect("state").state.status, Status::Down);
    assert!(!h.service.is_running("h1"));
    h.bus.close().await;
}

#[tokio::test]
async fn unknown_type_is_reported_down() {
    let mut h = harness(None);
    let err = h
        .service
        .start(config("h9", "carrier_pigeon", json!({})))
        .await
        .expect_err("unsupported");
    assert!(matches!(err, HandlerError::Unsupported(_)));
    let state = h.states.recv().await.expect("state");
    assert_eq!(state.state.status, Status::Down);
    assert!(!h.service.is_running("h9"));
    h.bus.close().await;
}

#[tokio::test]
async fn webhook_handler_receives_only_its_parameters() {
    let (router, mut bodies) = capture_router("/hook");
    let base = serve(router).await;
    let h = harness(None);
    h.service
        .start(config(
            "hook",
            "webhook",
            json!({"url": format!("{base}/hook"), "method": "POST"}),
        ))
        .await
        .expect("start");

    h.service
        .post(&message(
            "hook",
            json!({
                "temperature": "31.5",
                "alert": {"type": "webhook", "data": {"level": "high"}},
                "mail": {"type": "email", "subject": "ignored"}
            }),
        ))
        .await
        .expect("post");

    let first = bodies.recv().await.expect("typed body");
    assert_eq!(first, json!({"level": "high"}));
    let second = bodies.recv().await.expect("plain body");
    assert_eq!(second, json!({"temperature": "31.5"}));
    assert!(bodies.try_recv().is_err());
    h.bus.close().await;
}

#[tokio::test]
async fn telegram_handler_verifies_token_and_sends() {
    let (tx, mut sent) = mpsc::unbounded_channel();
    let router = Router::new()
        .route(
            "/bottest-token/getMe",
            post(|| async { Json(json!({"ok": true, "result": {"username": "mc_bot"}})) }),
        )
        .route(
            "/bottest-token/sendMessage",
            post(move |Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    Json(json!({"ok": true}))
                }
            }),
        );
    let base = serve(router).await;
    let h = harness(None);
    h.service
        .start(config(
            "tg",
            "telegram",
            json!({"token": "test-token", "chatIds": ["42"], "server": base}),
        ))
        .await
        .expect("start");

    h.service
        .post(&message(
            "tg",
            json!({"note": {"type": "telegram", "text": "*door*", "parseMode": "Markdown"}}),
        ))
        .await
        .expect("post");
    let body = sent.recv().await.expect("message");
    assert_eq!(body["chat_id"], "42");
    assert_eq!(body["text"], "*door*");
    assert_eq!(body["parse_mode"], "Markdown");
    h.bus.close().await;
}

#[tokio::test]
async fn backup_handler_keeps_latest_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bus = Arc::new(EmbeddedBus::new("", 100));
    let api = EntityApi::in_memory(bus.clone());
    api.handler
        .save(config("h1", "noop", json!({})))
        .await
        .expect("save");
    let h = harness(Some(api));
    h.service
        .start(config(
            "bk",
            "backup",
            json!({"targetDirectory": dir.path(), "prefix": "nightly", "retainBackups": 2}),
        ))
        .await
        .expect("start");

    for _ in 0..3 {
        h.service
            .post(&message("bk", json!({"run": "now"})))
            .await
            .expect("backup");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut files: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    files.sort();
    assert_eq!(files.len(), 2);
    let content: Value =
        serde_json::from_slice(&std::fs::read(&files[1]).expect("read")).expect("json");
    assert_eq!(content["handler"][0]["id"], "h1");
    h.bus.close().await;
    bus.close().await;
}

#[tokio::test]
async fn listeners_route_bus_messages() {
    let (router, mut bodies) = capture_router("/hook");
    let base = serve(router).await;
    let h = harness(None);
    let listeners = h.service.start_listeners(10).expect("listeners");

    let add = ServiceEvent::new("handler", "add")
        .with_data(&config(
            "hook",
            "webhook",
            json!({"url": format!("{base}/hook")}),
        ))
        .expect("event");
    h.bus.publish("service.handler", &add).expect("publish add");
    for _ in 0..100 {
        if h.service.is_running("hook") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.service.is_running("hook"));

    h.bus
        .publish(
            "message.notify_handler",
            &message("hook", json!({"state": "on"})),
        )
        .expect("publish message");
    let body = tokio::time::timeout(Duration::from_secs(5), bodies.recv())
        .await
        .expect("delivered")
        .expect("body");
    assert_eq!(body, json!({"state": "on"}));

    listeners.close().await;
    h.bus.close().await;
}
