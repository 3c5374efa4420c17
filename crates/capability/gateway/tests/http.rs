use axum::{Json, Router, http::StatusCode, routing::{get, post}};
use domain::{Gateway, Message, MessageType, Payload, RawMessage, WebhookConfig};
use mc_bus::{Bus, EmbeddedBus};
use mc_gateway::http::{
    HttpNodeConfig, HttpPollConfig, HttpProvider, HttpProviderConfig, poll_job_name,
};
use mc_gateway::{GatewayError, Provider, ProviderContext, VoidLogger};
use mc_scheduler::CoreScheduler;
use mc_script::WebhookClient;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn context() -> ProviderContext {
    context_for("gw1", Arc::new(CoreScheduler::new()))
}

fn context_for(gateway_id: &str, scheduler: Arc<CoreScheduler>) -> ProviderContext {
    let bus: Arc<dyn Bus> = Arc::new(EmbeddedBus::new("", 100));
    ProviderContext {
        gateway: Gateway {
            id: gateway_id.to_string(),
            enabled: true,
            ..Default::default()
        },
        bus,
        scheduler,
        webhook: WebhookClient::new().expect("webhook client"),
        logger: Arc::new(VoidLogger),
    }
}

async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn webhook(url: String) -> WebhookConfig {
    WebhookConfig {
        url,
        ..Default::default()
    }
}

#[tokio::test]
async fn post_delivers_message_to_node_endpoint() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let app = Router::new().route(
        "/node",
        post(move |Json(body): Json<Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(body);
                StatusCode::OK
            }
        }),
    );
    let base = spawn_server(app).await;

    let mut config = HttpProviderConfig::default();
    config.nodes.insert(
        "7".to_string(),
        HttpNodeConfig {
            webhook: webhook(format!("{base}/node")),
            ..Default::default()
        },
    );
    let provider = HttpProvider::new(context(), config);

    let message = Message::new("gw1", "7", "1", MessageType::Set)
        .with_payload(Payload::new("V_STATUS", "1"));
    provider.post(&message).await.expect("post");
    let body = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("request in time")
        .expect("body");
    assert_eq!(body["nodeId"], json!("7"));
    assert_eq!(body["payloads"][0]["key"], json!("V_STATUS"));

    let unknown = Message::new("gw1", "8", "1", MessageType::Set);
    assert!(matches!(provider.post(&unknown).await, Err(GatewayError::Config(_))));
}

#[tokio::test]
async fn poller_feeds_received_messages() {
    let reading = Message::new("elsewhere", "3", "1", MessageType::Set)
        .with_payload(Payload::new("V_TEMP", "19.5"));
    let response = serde_json::to_value(vec![reading]).expect("encode");
    let app = Router::new().route(
        "/readings",
        get(move || {
            let response = response.clone();
            async move { Json(response) }
        }),
    );
    let base = spawn_server(app).await;

    let mut config = HttpProviderConfig::default();
    config.pollers.insert(
        "readings".to_string(),
        HttpPollConfig {
            webhook: webhook(format!("{base}/readings")),
            execution_interval: "50ms".to_string(),
            ..Default::default()
        },
    );
    let ctx = context();
    let scheduler = ctx.scheduler.clone();
    scheduler.start();
    let provider = HttpProvider::new(ctx, config);

    let (tx, mut rx) = mpsc::unbounded_channel::<RawMessage>();
    provider
        .start(Arc::new(move |raw: RawMessage| {
            let _ = tx.send(raw);
        }))
        .await
        .expect("start");
    assert!(scheduler.is_available("http_poll_gw1_readings"));

    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("poll in time")
        .expect("raw");
    assert!(raw.is_received);
    let messages = provider.process_received(raw).await.expect("decode");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].gateway_id, "gw1");
    assert_eq!(messages[0].node_id, "3");
    assert_eq!(messages[0].payloads[0].value, "19.5");

    provider.close().await;
    assert!(!scheduler.is_available("http_poll_gw1_readings"));
    scheduler.close();
}

#[tokio::test]
async fn closing_a_gateway_keeps_pollers_of_gateways_sharing_its_prefix() {
    let scheduler = Arc::new(CoreScheduler::new());
    let mut config = HttpProviderConfig::default();
    config.pollers.insert(
        "readings".to_string(),
        HttpPollConfig {
            webhook: webhook("http://127.0.0.1:9/readings".to_string()),
            execution_interval: "1h".to_string(),
            ..Default::default()
        },
    );
    let short = HttpProvider::new(context_for("gw", scheduler.clone()), config.clone());
    let long = HttpProvider::new(context_for("gw_2", scheduler.clone()), config);
    for provider in [&short, &long] {
        provider
            .start(Arc::new(|_: RawMessage| {}))
            .await
            .expect("start");
    }
    assert!(scheduler.is_available(&poll_job_name("gw", "readings")));
    assert!(scheduler.is_available(&poll_job_name("gw_2", "readings")));

    short.close().await;
    assert!(!scheduler.is_available(&poll_job_name("gw", "readings")));
    assert!(scheduler.is_available(&poll_job_name("gw_2", "readings")));
    long.close().await;
    assert!(!scheduler.is_available(&poll_job_name("gw_2", "readings")));
}
