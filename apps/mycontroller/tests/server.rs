use contract::service::{command, kind};
use contract::{ServiceEvent, topics};
use domain::{Message, MessageType, Node, Payload, TaskConfig};
use mc_bus::{BusExt, DEFAULT_REQUEST_TIMEOUT};
use mc_config::ServerConfig;
use mc_system_jobs::{JOB_NODE_STATE, JOB_SUNRISE, JOB_TELEMETRY};
use mycontroller::{ServerRuntime, ShutdownSignal};
use std::future::Future;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.secret = "integration-secret".to_string();
    config.telemetry.enabled = true;
    config.web.http.enabled = false;
    config.directories.data = dir.path().join("data").display().to_string();
    config.directories.logs = dir.path().join("logs").display().to_string();
    config.bus.topic_prefix = "mc_test".to_string();
    config.bus.queue_capacity = 100;
    config
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn server_installs_jobs_and_creates_directories() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerRuntime::start(&config(&dir)).await.expect("start");

    let names = server.scheduler().list_names();
    for job in [JOB_SUNRISE, JOB_NODE_STATE, JOB_TELEMETRY] {
        assert!(names.iter().any(|name| name == job), "missing {job}");
    }
    assert!(dir.path().join("data").is_dir());
    assert!(dir.path().join("logs").is_dir());

    server.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_a_startup_error() {
    let dir = TempDir::new().expect("tempdir");
    let mut no_secret = config(&dir);
    no_secret.secret = String::new();
    assert!(ServerRuntime::start(&no_secret).await.is_err());

    let mut external_bus = config(&dir);
    external_bus.bus.bus_type = "natsio".to_string();
    assert!(ServerRuntime::start(&external_bus).await.is_err());
}

#[tokio::test]
async fn received_message_reaches_storage_and_resource_service() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerRuntime::start(&config(&dir)).await.expect("start");
    let bus = server.bus();

    let mut message = Message::new("gw1", "12", "3", MessageType::Set)
        .with_payload(Payload::new("V_TEMP", "21.5"));
    message.is_received = true;
    bus.publish(topics::MESSAGE_TO_PROCESSOR, &message)
        .expect("publish");

    let node_id = Node::new("gw1", "12").id;
    let api = server.api().clone();
    assert!(
        eventually(|| {
            let api = api.clone();
            let node_id = node_id.clone();
            async move { api.node.get(&node_id).await.is_ok() }
        })
        .await,
        "node was not created"
    );

    let reply = mc_bus::request(
        bus.as_ref(),
        topics::SERVICE_RESOURCE_SERVER,
        ServiceEvent::new(kind::NODE, command::GET).with_id(node_id.clone()),
        DEFAULT_REQUEST_TIMEOUT,
    )
    .await
    .expect("get");
    let node: Node = reply.decode_data().expect("node");
    assert_eq!(node.gateway_id, "gw1");

    let missing = mc_bus::request(
        bus.as_ref(),
        topics::SERVICE_RESOURCE_SERVER,
        ServiceEvent::new(kind::GATEWAY, command::GET).with_id("nope"),
        DEFAULT_REQUEST_TIMEOUT,
    )
    .await;
    let err = missing.expect_err("missing gateway");
    assert!(err.to_string().contains("not_found"), "{err}");

    server.shutdown().await;
}

#[tokio::test]
async fn stored_tasks_are_loaded_through_the_resource_service() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerRuntime::start(&config(&dir)).await.expect("start");
    let bus = server.bus();

    let task = TaskConfig {
        id: "porch_light".to_string(),
        enabled: true,
        trigger_on_event: true,
        ..Default::default()
    };
    server.api().task.save(task).await.expect("save");
    bus.publish(
        topics::SERVICE_RESOURCE_SERVER,
        &ServiceEvent::new(kind::TASK, command::LOAD_ALL),
    )
    .expect("publish");

    let tasks = server.tasks().clone();
    assert!(
        eventually(|| {
            let tasks = tasks.clone();
            async move { tasks.is_loaded("porch_light") }
        })
        .await,
        "task was not loaded"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_event_stops_the_server() {
    let dir = TempDir::new().expect("tempdir");
    let server = ServerRuntime::start(&config(&dir)).await.expect("start");
    let signal = ShutdownSignal::listen(server.bus()).expect("listen");

    server
        .bus()
        .publish(topics::INTERNAL_SHUTDOWN, &serde_json::json!({"reason": "test"}))
        .expect("publish");
    let reason = tokio::time::timeout(Duration::from_secs(2), signal.wait())
        .await
        .expect("signal in time");
    assert_eq!(reason, "bus");

    server.shutdown().await;
}
