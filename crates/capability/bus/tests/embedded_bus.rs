use contract::service::{command, kind};
use contract::{ErrorKind, ServiceEvent};
use mc_bus::{Bus, BusData, BusError, BusExt, EmbeddedBus, reply, request};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

fn channel_handler() -> (mc_bus::Callback, mpsc::UnboundedReceiver<BusData>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: mc_bus::Callback = Arc::new(move |data| {
        let _ = tx.send(data);
    });
    (handler, rx)
}

#[tokio::test]
async fn publish_reaches_exact_and_wildcard_subscribers() {
    let bus = EmbeddedBus::new("", 100);
    let (exact, mut exact_rx) = channel_handler();
    let (wild, mut wild_rx) = channel_handler();
    let (other, mut other_rx) = channel_handler();
    bus.subscribe("event.field", exact).expect("subscribe");
    bus.subscribe("event.>", wild).expect("subscribe");
    bus.subscribe("event.node", other).expect("subscribe");

    bus.publish("event.field", &serde_json::json!({"v": 1})).expect("publish");

    let got = exact_rx.recv().await.expect("exact");
    assert_eq!(got.topic, "event.field");
    let value: serde_json::Value = got.decode().expect("decode");
    assert_eq!(value["v"], 1);
    assert!(wild_rx.recv().await.is_some());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(other_rx.try_recv().is_err());
    bus.close().await;
}

#[tokio::test]
async fn queue_group_delivers_each_message_once() {
    let bus = EmbeddedBus::new("mc", 100);
    let counter = Arc::new(AtomicUsize::new(0));
    let per_member: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for member in &per_member {
        let counter = counter.clone();
        let member = member.clone();
        bus.queue_subscribe(
            "service.task",
            "workers",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                member.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .expect("queue subscribe");
    }
    for i in 0..9 {
        bus.publish("service.task", &i).expect("publish");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 9);
    for member in &per_member {
        assert_eq!(member.load(Ordering::SeqCst), 3);
    }
    assert_eq!(bus.topic_prefix(), "mc");
    bus.close().await;
}

#[tokio::test]
async fn paused_publish_is_dropped() {
    let bus = EmbeddedBus::new("", 100);
    let (handler, mut rx) = channel_handler();
    bus.subscribe("internal.shutdown", handler).expect("subscribe");
    bus.pause_publish();
    bus.publish("internal.shutdown", &"x").expect("publish ok while paused");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
    bus.resume_publish();
    bus.publish("internal.shutdown", &"y").expect("publish");
    assert!(rx.recv().await.is_some());
    bus.close().await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let bus = EmbeddedBus::new("", 100);
    let (handler, mut rx) = channel_handler();
    let id = bus.subscribe("message.notify_handler", handler).expect("subscribe");
    bus.unsubscribe("message.notify_handler", id).expect("unsubscribe");
    bus.publish("message.notify_handler", &1).expect("publish");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn request_reply_round_trip() {
    let bus: Arc<EmbeddedBus> = Arc::new(EmbeddedBus::new("", 100));
    let responder = bus.clone();
    bus.subscribe(
        "service.resource_server",
        Arc::new(move |data| {
            let Ok(req) = data.decode::<ServiceEvent>() else {
                return;
            };
            let mut resp = req.reply();
            if req.id == "missing" {
                resp.set_error(ErrorKind::NotFound, "gateway missing");
            } else {
                resp.set_data(&serde_json::json!({"id": req.id})).expect("data");
            }
            reply(responder.as_ref(), &req, &resp).expect("reply");
        }),
    )
    .expect("subscribe");

    let event = ServiceEvent::new(kind::GATEWAY, command::GET).with_id("g1");
    let resp = request(bus.as_ref(), "service.resource_server", event, Duration::from_secs(1))
        .await
        .expect("reply");
    let data: serde_json::Value = resp.decode_data().expect("decode");
    assert_eq!(data["id"], "g1");

    let event = ServiceEvent::new(kind::GATEWAY, command::GET).with_id("missing");
    let err = request(bus.as_ref(), "service.resource_server", event, Duration::from_secs(1))
        .await
        .expect_err("remote error");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    bus.close().await;
}

#[tokio::test]
async fn request_without_responder_times_out() {
    let bus = EmbeddedBus::new("", 100);
    let event = ServiceEvent::new(kind::NODE, command::LIST);
    let err = request(&bus, "service.nobody", event, Duration::from_millis(50))
        .await
        .expect_err("timeout");
    assert!(matches!(err, BusError::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    bus.close().await;
}
