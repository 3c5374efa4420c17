use contract::QueryFilter;
use domain::{EntityEvent, EventType, Field, Gateway, Labels, Node, QuickId, ResourceType};
use mc_bus::{Bus, BusData, EmbeddedBus};
use mc_storage::{DirFirmwareStore, EntityApi, FirmwareBlobStore, StorageError};
use std::sync::Arc;
use tokio::sync::mpsc;

fn api_with_events() -> (EntityApi, mpsc::UnboundedReceiver<BusData>, Arc<EmbeddedBus>) {
    let bus = Arc::new(EmbeddedBus::new("", 100));
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        "event.>",
        Arc::new(move |data| {
            let _ = tx.send(data);
        }),
    )
    .expect("subscribe");
    (EntityApi::in_memory(bus.clone()), rx, bus)
}

#[tokio::test]
async fn save_emits_created_then_updated_then_deleted() {
    let (api, mut events, bus) = api_with_events();
    let gateway = Gateway {
        id: "g1".to_string(),
        enabled: true,
        ..Default::default()
    };
    let saved = api.gateway.save(gateway.clone()).await.expect("save");
    assert!(saved.modified_on.timestamp() > 0);
    api.gateway.save(saved).await.expect("update");
    let deleted = api.gateway.delete(&["g1".to_string()]).await.expect("delete");
    assert_eq!(deleted, 1);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let frame = events.recv().await.expect("event");
        assert_eq!(frame.topic, "event.gateway");
        let event: EntityEvent = frame.decode().expect("decode");
        assert_eq!(event.entity_quick_id, "gw:g1");
        seen.push(event.event_type);
    }
    assert_eq!(seen, vec![EventType::Created, EventType::Updated, EventType::Deleted]);

    let err = api.gateway.get("g1").await.expect_err("gone");
    assert!(matches!(err, StorageError::NotFound(_)));
    bus.close().await;
}

#[tokio::test]
async fn quick_id_and_label_lookups() {
    let (api, _events, bus) = api_with_events();
    let mut field = Field::new("g1", "n1", "s1", "f1");
    field.shift_value(serde_json::json!("23.5"), chrono::Utc::now());
    api.field.save(field).await.expect("save field");

    let mut node = Node::new("g1", "n1");
    node.labels.set("room", "kitchen");
    api.node.save(node).await.expect("save node");
    api.node.save(Node::new("g1", "n2")).await.expect("save node");

    let quick_id = QuickId::parse("sf:g1.n1.s1.f1.current.value").expect("parse");
    let value = api.get_by_quick_id(&quick_id).await.expect("field");
    assert_eq!(
        domain::get_by_key_path(&value, &quick_id.key_path),
        Some(&serde_json::json!("23.5"))
    );

    let labels: Labels = [("room", "kitchen")].into_iter().collect();
    let nodes = api
        .list_by_labels(ResourceType::Node, &labels)
        .await
        .expect("list");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["nodeId"], "n1");

    let by_gateway = api
        .node
        .list(&[QueryFilter::eq("gatewayId", "g1")])
        .await
        .expect("list");
    assert_eq!(by_gateway.len(), 2);

    let missing = QuickId::parse("nd:g1.n9").expect("parse");
    assert!(api.get_by_quick_id(&missing).await.is_err());
    bus.close().await;
}

#[tokio::test]
async fn firmware_files_live_under_data_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = DirFirmwareStore::new(dir.path());
    store.write("blink.hex", b":00000001FF\n").await.expect("write");
    assert_eq!(store.read("blink.hex").await.expect("read"), b":00000001FF\n");
    assert!(dir.path().join("firmware").join("blink.hex").exists());
    assert!(store.read("../escape.hex").await.is_err());
    store.remove("blink.hex").await.expect("remove");
    assert!(matches!(store.read("blink.hex").await, Err(StorageError::NotFound(_))));
}
