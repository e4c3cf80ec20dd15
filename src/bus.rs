//! In-process topic pub/sub.
//!
//! Producers publish onto named topics; the UI bridge and in-process
//! consumers subscribe per topic. Delivery is best-effort: a lagging
//! receiver drops the oldest messages, nothing is persisted.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

pub const TOPIC_COPY_TRADING: &str = "copy_trading";
pub const TOPIC_STRATEGIES_UPDATES: &str = "strategies:updates";
pub const TOPIC_LIVE_ORDERS: &str = "polymarket:live_orders";

pub fn strategy_topic(strategy_id: i64) -> String {
    format!("strategies:{strategy_id}")
}

/// One message on the bus. `kind` discriminates within a topic; `payload`
/// is already UI-shaped JSON.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub topic: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub ts: i64,
}

#[derive(Clone)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<BusEvent>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusEvent> {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Fire-and-forget publish. A topic with no subscribers swallows the
    /// message, matching pub/sub semantics.
    pub fn publish(&self, topic: &str, kind: &str, payload: serde_json::Value) {
        let event = BusEvent {
            topic: topic.to_string(),
            kind: kind.to_string(),
            payload,
            ts: chrono::Utc::now().timestamp_millis(),
        };
        let _ = self.sender(topic).send(event);
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusEvent> {
        self.sender(topic).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_per_topic() {
        let bus = EventBus::default();
        let mut copy_rx = bus.subscribe(TOPIC_COPY_TRADING);
        let mut strat_rx = bus.subscribe(&strategy_topic(7));

        bus.publish(TOPIC_COPY_TRADING, "new_trade", serde_json::json!({"id": "0xabc"}));
        bus.publish(&strategy_topic(7), "price_update", serde_json::json!({"p": 0.5}));

        let ev = copy_rx.recv().await.unwrap();
        assert_eq!(ev.kind, "new_trade");
        assert_eq!(ev.topic, TOPIC_COPY_TRADING);

        let ev = strat_rx.recv().await.unwrap();
        assert_eq!(ev.kind, "price_update");
        assert_eq!(ev.topic, "strategies:7");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish("nobody:listening", "ping", serde_json::Value::Null);
    }

    #[tokio::test]
    async fn cross_topic_isolation() {
        let bus = EventBus::default();
        let mut a = bus.subscribe("strategies:1");
        bus.publish("strategies:2", "x", serde_json::Value::Null);
        assert!(matches!(
            a.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
