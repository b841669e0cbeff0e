//! Delivery-loop behaviour of the communication bus.
//!
//! Exercises FIFO delivery, retry into the failed buffer, topic fan-out,
//! expiry of undelivered urgent messages and response correlation.

use chrono::{Duration, Utc};
use conductor_bus::*;
use serde_json::json;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc::UnboundedReceiver;

fn fast_bus() -> CommunicationBus {
    CommunicationBus::new(BusConfig {
        backoff_base_ms: 1,
        backoff_max_ms: 10,
        ..BusConfig::default()
    })
    .expect("valid config")
}

async fn next(rx: &mut UnboundedReceiver<AgentMessage>) -> AgentMessage {
    tokio::time::timeout(StdDuration::from_secs(2), rx.recv())
        .await
        .expect("message within timeout")
        .expect("mailbox open")
}

async fn wait_until<F: Fn(&CommunicationMetrics) -> bool>(bus: &CommunicationBus, pred: F) {
    for _ in 0..200 {
        if pred(&bus.communication_metrics()) {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", bus.communication_metrics());
}

#[tokio::test]
async fn delivers_in_fifo_order() {
    let bus = fast_bus();
    let mut rx = bus.register("writer");
    bus.start();

    let first = bus
        .send(
            "lead",
            "writer",
            MessageType::TaskAssignment,
            json!({"n": 1}),
            MessagePriority::Normal,
            false,
        )
        .unwrap();
    let second = bus
        .send(
            "lead",
            "writer",
            MessageType::TaskUpdate,
            json!({"n": 2}),
            MessagePriority::Low,
            false,
        )
        .unwrap();

    let a = next(&mut rx).await;
    let b = next(&mut rx).await;
    assert_eq!(a.id, first);
    assert_eq!(b.id, second);
    assert_eq!(a.delivery_attempts, 1);
    assert_eq!(a.payload["n"], 1);

    bus.stop();
    assert!(!bus.is_running());
}

#[tokio::test]
async fn undeliverable_message_lands_in_failed_buffer() {
    let bus = fast_bus();
    bus.start();

    let id = bus
        .send(
            "lead",
            "ghost",
            MessageType::TaskAssignment,
            json!({}),
            MessagePriority::Normal,
            false,
        )
        .unwrap();

    wait_until(&bus, |m| m.messages_failed == 1).await;
    let metrics = bus.communication_metrics();
    assert_eq!(metrics.delivery_retries, 2);
    assert_eq!(metrics.messages_delivered, 0);

    let failed = bus.failed_messages();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert_eq!(failed[0].delivery_attempts, 3);
}

#[tokio::test]
async fn late_registration_is_picked_up_by_retry() {
    let bus = CommunicationBus::new(BusConfig {
        backoff_base_ms: 50,
        max_delivery_attempts: 5,
        ..BusConfig::default()
    })
    .unwrap();
    bus.start();
    bus.send("lead", "late", MessageType::System, json!({}), MessagePriority::Normal, false)
        .unwrap();
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let mut rx = bus.register("late");

    let message = next(&mut rx).await;
    assert!(message.delivery_attempts >= 2);
    assert_eq!(bus.communication_metrics().messages_failed, 0);
}

#[tokio::test]
async fn broadcast_skips_sender() {
    let bus = fast_bus();
    let mut rx_a = bus.register("a");
    let mut rx_b = bus.register("b");
    let mut rx_c = bus.register("c");
    for agent in ["a", "b", "c"] {
        bus.subscribe(agent, "research");
    }
    bus.start();

    let ids = bus
        .broadcast(
            "a",
            "research",
            MessageType::InformationShare,
            json!({"finding": 42}),
            MessagePriority::Normal,
        )
        .unwrap();
    assert_eq!(ids.len(), 2);

    let to_b = next(&mut rx_b).await;
    let to_c = next(&mut rx_c).await;
    assert_eq!(to_b.topic.as_deref(), Some("research"));
    assert_eq!(to_c.payload["finding"], 42);

    wait_until(&bus, |m| m.messages_delivered == 2).await;
    assert!(rx_a.try_recv().is_err());
    assert_eq!(bus.communication_metrics().broadcasts, 1);
}

#[tokio::test]
async fn critical_message_expires_after_thirty_minutes_in_queue() {
    let bus = fast_bus();
    let mut rx = bus.register("analyst");

    let mut stale = AgentMessage::new(
        "lead",
        "analyst",
        MessageType::TaskAssignment,
        json!({}),
        MessagePriority::Critical,
    );
    stale.created_at = Utc::now() - Duration::minutes(31);
    bus.submit(stale).unwrap();
    let fresh = bus
        .send(
            "lead",
            "analyst",
            MessageType::TaskAssignment,
            json!({}),
            MessagePriority::Critical,
            false,
        )
        .unwrap();
    bus.start();

    let delivered = next(&mut rx).await;
    assert_eq!(delivered.id, fresh);
    let metrics = bus.communication_metrics();
    assert_eq!(metrics.messages_expired, 1);
    assert_eq!(metrics.messages_delivered, 1);
}

#[tokio::test]
async fn response_is_correlated_and_clears_pending() {
    let bus = fast_bus();
    let mut rx_lead = bus.register("lead");
    let mut rx_worker = bus.register("worker");
    bus.start();

    let request = bus
        .send(
            "lead",
            "worker",
            MessageType::DataRequest,
            json!({"q": "status"}),
            MessagePriority::High,
            true,
        )
        .unwrap();
    assert_eq!(bus.pending_response_count(), 1);
    let received = next(&mut rx_worker).await;
    assert!(received.requires_response);
    assert_eq!(received.response_timeout_secs, Some(120));

    bus.respond(&request, "worker", json!({"status": "ok"})).unwrap();
    let reply = next(&mut rx_lead).await;
    assert_eq!(reply.message_type, MessageType::Acknowledgment);
    assert_eq!(reply.correlation_id.as_deref(), Some(request.as_str()));
    assert!(!reply.late);
    assert_eq!(bus.pending_response_count(), 0);
}

#[tokio::test]
async fn late_response_is_flagged() {
    let bus = fast_bus();
    let mut rx_lead = bus.register("lead");
    let _rx_worker = bus.register("worker");
    bus.start();

    let request = bus
        .send("lead", "worker", MessageType::HelpRequest, json!({}), MessagePriority::Urgent, true)
        .unwrap();
    let evicted = bus.sweep_pending_responses(Utc::now() + Duration::seconds(61));
    assert_eq!(evicted, 1);

    bus.respond(&request, "worker", json!({"help": "on the way"})).unwrap();
    let reply = next(&mut rx_lead).await;
    assert!(reply.late);
    let metrics = bus.communication_metrics();
    assert_eq!(metrics.late_responses, 1);
    assert_eq!(metrics.response_timeouts, 1);
}
