//! Market-channel WebSocket feed.
//!
//! One long-lived connection. Desired subscriptions survive reconnects;
//! parsed events are debounced into 50 ms batches and fanned out over a
//! broadcast channel plus the event bus. A health tick forces a
//! resubscribe when the socket goes quiet.

use crate::bus::{EventBus, TOPIC_LIVE_ORDERS};
use crate::models::{MarketEvent, PriceChangeEvent, Side, TradeEvent};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub const MARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(50);
const BATCH_MAX: usize = 50;
const HEALTH_INTERVAL: Duration = Duration::from_secs(10);
const QUIET_LIMIT: Duration = Duration::from_secs(15);
const RESEND_SUPPRESSION: Duration = Duration::from_secs(60);
const RECONNECT_MIN: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum FeedMessage {
    Connected(bool),
    NewOrder(MarketEvent),
    NewOrdersBatch(Vec<MarketEvent>),
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SubscriptionStats {
    pub attempts: u64,
    pub retries: u64,
}

#[derive(Debug)]
enum FeedCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    ForceResubscribe,
}

#[derive(Clone)]
pub struct MarketFeed {
    cmd_tx: mpsc::Sender<FeedCommand>,
    events_tx: broadcast::Sender<FeedMessage>,
    stats: Arc<RwLock<SubscriptionStats>>,
    connected: Arc<AtomicBool>,
    subscribed: Arc<RwLock<HashSet<String>>>,
}

impl MarketFeed {
    pub fn spawn(bus: EventBus) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let (events_tx, _) = broadcast::channel(1024);
        let feed = Self {
            cmd_tx,
            events_tx: events_tx.clone(),
            stats: Arc::new(RwLock::new(SubscriptionStats::default())),
            connected: Arc::new(AtomicBool::new(false)),
            subscribed: Arc::new(RwLock::new(HashSet::new())),
        };

        let worker = FeedWorker {
            events_tx,
            bus,
            stats: feed.stats.clone(),
            connected: feed.connected.clone(),
            subscribed: feed.subscribed.clone(),
        };
        tokio::spawn(worker.run(cmd_rx));

        feed
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FeedMessage> {
        self.events_tx.subscribe()
    }

    pub async fn subscribe_markets(&self, token_ids: Vec<String>) {
        if token_ids.is_empty() {
            return;
        }
        let _ = self.cmd_tx.send(FeedCommand::Subscribe(token_ids)).await;
    }

    pub async fn unsubscribe_markets(&self, token_ids: Vec<String>) {
        if token_ids.is_empty() {
            return;
        }
        let _ = self.cmd_tx.send(FeedCommand::Unsubscribe(token_ids)).await;
    }

    pub async fn force_resubscribe(&self) {
        let _ = self.cmd_tx.send(FeedCommand::ForceResubscribe).await;
    }

    pub fn stats(&self) -> SubscriptionStats {
        *self.stats.read()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn subscribed_markets(&self) -> Vec<String> {
        self.subscribed.read().iter().cloned().collect()
    }
}

struct FeedWorker {
    events_tx: broadcast::Sender<FeedMessage>,
    bus: EventBus,
    stats: Arc<RwLock<SubscriptionStats>>,
    connected: Arc<AtomicBool>,
    subscribed: Arc<RwLock<HashSet<String>>>,
}

impl FeedWorker {
    async fn run(self, mut cmd_rx: mpsc::Receiver<FeedCommand>) {
        let mut reconnect_delay = RECONNECT_MIN;
        let mut ever_connected = false;

        loop {
            // No point holding a connection with nothing to watch.
            while self.subscribed.read().is_empty() {
                match cmd_rx.recv().await {
                    Some(FeedCommand::Subscribe(ids)) => {
                        self.subscribed.write().extend(ids);
                    }
                    Some(_) => {}
                    None => return,
                }
            }

            match self.connect_and_stream(&mut cmd_rx, &mut ever_connected).await {
                Ok(ended) => {
                    reconnect_delay = RECONNECT_MIN;
                    if ended {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, delay_ms = reconnect_delay.as_millis() as u64, "market ws disconnected, reconnecting");
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(RECONNECT_MAX);
                }
            }
        }
    }

    /// Returns `Ok(true)` when the command channel closed (shutdown),
    /// `Ok(false)` on an orderly close, `Err` on failure.
    async fn connect_and_stream(
        &self,
        cmd_rx: &mut mpsc::Receiver<FeedCommand>,
        ever_connected: &mut bool,
    ) -> anyhow::Result<bool> {
        info!(url = MARKET_WS_URL, "connecting market ws");
        let (ws, _resp) = connect_async(MARKET_WS_URL).await?;
        let (mut write, mut read) = ws.split();
        let is_reconnect = *ever_connected;
        *ever_connected = true;

        self.connected.store(true, Ordering::Relaxed);
        self.broadcast_connected(true);

        // Re-announce the full desired set in one message.
        let initial: Vec<String> = self.subscribed.read().iter().cloned().collect();
        {
            let mut stats = self.stats.write();
            stats.attempts += 1;
            if is_reconnect {
                stats.retries += 1;
            }
        }
        if let Err(e) = write
            .send(Message::Text(subscription_payload(&initial)))
            .await
        {
            self.connected.store(false, Ordering::Relaxed);
            self.broadcast_connected(false);
            return Err(e.into());
        }

        let mut last_subscription_at = Instant::now();
        let mut last_message_at = Instant::now();
        let mut batch: Vec<MarketEvent> = Vec::new();

        let mut batch_tick = interval(BATCH_FLUSH_INTERVAL);
        batch_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health_tick = interval(HEALTH_INTERVAL);
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break Ok(true); };
                    match cmd {
                        FeedCommand::Subscribe(ids) => {
                            let additions: Vec<String> = {
                                let mut subscribed = self.subscribed.write();
                                ids.iter()
                                    .filter(|id| subscribed.insert((*id).clone()))
                                    .cloned()
                                    .collect()
                            };
                            if !additions.is_empty() {
                                self.stats.write().attempts += 1;
                                last_subscription_at = Instant::now();
                                if write.send(Message::Text(subscription_payload(&additions))).await.is_err() {
                                    break Err(anyhow::anyhow!("market ws send failed"));
                                }
                            } else if last_subscription_at.elapsed() > RESEND_SUPPRESSION && !ids.is_empty() {
                                // Stale enough that a refresh resend is allowed.
                                self.stats.write().attempts += 1;
                                last_subscription_at = Instant::now();
                                if write.send(Message::Text(subscription_payload(&ids))).await.is_err() {
                                    break Err(anyhow::anyhow!("market ws send failed"));
                                }
                            }
                        }
                        FeedCommand::Unsubscribe(ids) => {
                            // The venue has no unsubscribe operation; dropping
                            // the ids stops future resubscribes and lets
                            // consumers filter the stragglers.
                            let mut subscribed = self.subscribed.write();
                            for id in ids {
                                subscribed.remove(&id);
                            }
                        }
                        FeedCommand::ForceResubscribe => {
                            let all: Vec<String> = self.subscribed.read().iter().cloned().collect();
                            if !all.is_empty() {
                                {
                                    let mut stats = self.stats.write();
                                    stats.attempts += 1;
                                    stats.retries += 1;
                                }
                                last_subscription_at = Instant::now();
                                if write.send(Message::Text(subscription_payload(&all))).await.is_err() {
                                    break Err(anyhow::anyhow!("market ws send failed"));
                                }
                            }
                        }
                    }
                }
                _ = batch_tick.tick() => {
                    self.flush(&mut batch);
                }
                _ = health_tick.tick() => {
                    // keep-alive; the venue expects text PING frames
                    let _ = write.send(Message::Text("PING".to_string())).await;
                    let quiet = last_message_at.elapsed() > QUIET_LIMIT;
                    let has_markets = !self.subscribed.read().is_empty();
                    if should_force_resubscribe(quiet, has_markets) {
                        let all: Vec<String> = self.subscribed.read().iter().cloned().collect();
                        {
                            let mut stats = self.stats.write();
                            stats.attempts += 1;
                            stats.retries += 1;
                        }
                        warn!(markets = all.len(), "market ws quiet too long, resubscribing");
                        last_subscription_at = Instant::now();
                        if write.send(Message::Text(subscription_payload(&all))).await.is_err() {
                            break Err(anyhow::anyhow!("market ws send failed"));
                        }
                    }
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        break Err(anyhow::anyhow!("market ws stream ended"));
                    };
                    match frame {
                        Ok(Message::Text(text)) => {
                            last_message_at = Instant::now();
                            batch.extend(parse_frame(&text));
                            if batch.len() >= BATCH_MAX {
                                self.flush(&mut batch);
                            }
                        }
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "market ws close frame");
                            break Err(anyhow::anyhow!("market ws closed by peer"));
                        }
                        Ok(_) => {}
                        Err(e) => break Err(anyhow::anyhow!("market ws error: {e}")),
                    }
                }
            }
        };

        self.flush(&mut batch);
        self.connected.store(false, Ordering::Relaxed);
        self.broadcast_connected(false);
        result
    }

    fn flush(&self, batch: &mut Vec<MarketEvent>) {
        if batch.is_empty() {
            return;
        }
        let events = std::mem::take(batch);
        if events.len() == 1 {
            self.bus.publish(
                TOPIC_LIVE_ORDERS,
                "new_order",
                serde_json::to_value(&events[0]).unwrap_or(Value::Null),
            );
        } else {
            self.bus.publish(
                TOPIC_LIVE_ORDERS,
                "new_orders_batch",
                serde_json::to_value(&events).unwrap_or(Value::Null),
            );
        }
        for msg in batch_messages(events) {
            let _ = self.events_tx.send(msg);
        }
    }

    fn broadcast_connected(&self, connected: bool) {
        let _ = self.events_tx.send(FeedMessage::Connected(connected));
        self.bus.publish(
            TOPIC_LIVE_ORDERS,
            "connection",
            serde_json::json!({ "connected": connected }),
        );
    }
}

/// Both key spellings are included because the venue historically accepts
/// the misspelled one.
fn subscription_payload(token_ids: &[String]) -> String {
    serde_json::json!({
        "operation": "subscribe",
        "type": "market",
        "assets_ids": token_ids,
        "asset_ids": token_ids,
    })
    .to_string()
}

fn should_force_resubscribe(quiet_too_long: bool, has_markets: bool) -> bool {
    quiet_too_long && has_markets
}

/// Single batch, one in-process message per order plus the batch framing.
fn batch_messages(events: Vec<MarketEvent>) -> Vec<FeedMessage> {
    match events.len() {
        0 => Vec::new(),
        1 => vec![FeedMessage::NewOrder(events.into_iter().next().expect("one event"))],
        _ => {
            let mut msgs = Vec::with_capacity(events.len() + 1);
            msgs.push(FeedMessage::NewOrdersBatch(events.clone()));
            msgs.extend(events.into_iter().map(FeedMessage::NewOrder));
            msgs
        }
    }
}

fn value_to_decimal(v: Option<&Value>) -> Option<Decimal> {
    match v {
        Some(Value::String(s)) => Decimal::from_str(s).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn value_to_ts(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::String(s)) => s.parse().unwrap_or_else(|_| chrono::Utc::now().timestamp_millis()),
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        _ => chrono::Utc::now().timestamp_millis(),
    }
}

/// Text frame → zero or more market events.
fn parse_frame(text: &str) -> Vec<MarketEvent> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("NO NEW ASSETS") || trimmed.eq_ignore_ascii_case("INVALID OPERATION")
    {
        debug!(frame = trimmed, "market ws control message");
        return Vec::new();
    }

    let Ok(json) = serde_json::from_str::<Value>(trimmed) else {
        return Vec::new();
    };

    match json {
        Value::Array(items) => items.iter().flat_map(parse_event).collect(),
        obj @ Value::Object(_) => parse_event(&obj),
        _ => Vec::new(),
    }
}

fn parse_event(v: &Value) -> Vec<MarketEvent> {
    let event_type = v.get("event_type").and_then(|t| t.as_str()).unwrap_or("");
    match event_type {
        "last_trade_price" => {
            let asset_id = v.get("asset_id").and_then(|a| a.as_str()).unwrap_or("");
            if asset_id.is_empty() {
                return Vec::new();
            }
            let Some(price) = value_to_decimal(v.get("price")) else {
                return Vec::new();
            };
            vec![MarketEvent::Trade(TradeEvent {
                asset_id: asset_id.to_string(),
                price,
                size: value_to_decimal(v.get("size")).unwrap_or_default(),
                side: v
                    .get("side")
                    .and_then(|s| s.as_str())
                    .and_then(Side::parse),
                timestamp: value_to_ts(v.get("timestamp")),
                outcome: string_field(v, "outcome"),
                market_question: string_field(v, "market_question"),
                event_title: string_field(v, "event_title"),
            })]
        }
        "price_change" => {
            let ts = value_to_ts(v.get("timestamp"));
            let Some(changes) = v.get("price_changes").and_then(|c| c.as_array()) else {
                return Vec::new();
            };
            changes
                .iter()
                .filter_map(|change| {
                    let asset_id = change.get("asset_id").and_then(|a| a.as_str())?;
                    let best_bid = value_to_decimal(change.get("best_bid"));
                    let best_ask = value_to_decimal(change.get("best_ask"));
                    let price = value_to_decimal(change.get("price"));
                    // an entry with no price information at all is noise
                    if best_bid.is_none() && best_ask.is_none() && price.is_none() {
                        return None;
                    }
                    Some(MarketEvent::PriceChange(PriceChangeEvent {
                        asset_id: asset_id.to_string(),
                        best_bid,
                        best_ask,
                        price,
                        size: value_to_decimal(change.get("size")),
                        side: change
                            .get("side")
                            .and_then(|s| s.as_str())
                            .and_then(Side::parse),
                        timestamp: ts,
                    }))
                })
                .collect()
        }
        "book" => {
            let asset_id = v.get("asset_id").and_then(|a| a.as_str()).unwrap_or("");
            if asset_id.is_empty() {
                return Vec::new();
            }
            let best_bid = best_level(v.get("bids"), true);
            let best_ask = best_level(v.get("asks"), false);
            vec![MarketEvent::PriceChange(PriceChangeEvent {
                asset_id: asset_id.to_string(),
                best_bid,
                best_ask,
                price: None,
                size: None,
                side: None,
                timestamp: value_to_ts(v.get("timestamp")),
            })]
        }
        "tick_size_change" => {
            debug!(frame = %v, "tick size change");
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn string_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Top of one side of a book snapshot: highest bid or lowest ask.
fn best_level(levels: Option<&Value>, is_bid: bool) -> Option<Decimal> {
    let arr = levels?.as_array()?;
    let prices = arr.iter().filter_map(|l| value_to_decimal(l.get("price")));
    if is_bid {
        prices.max()
    } else {
        prices.min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn subscription_payload_carries_both_spellings() {
        let payload = subscription_payload(&["1".into(), "2".into()]);
        let v: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["operation"], "subscribe");
        assert_eq!(v["type"], "market");
        assert_eq!(v["assets_ids"], serde_json::json!(["1", "2"]));
        assert_eq!(v["asset_ids"], serde_json::json!(["1", "2"]));
    }

    #[test]
    fn control_strings_are_ignored() {
        assert!(parse_frame("NO NEW ASSETS").is_empty());
        assert!(parse_frame("INVALID OPERATION").is_empty());
        assert!(parse_frame("not json at all").is_empty());
    }

    #[test]
    fn last_trade_price_yields_trade() {
        let events = parse_frame(
            r#"{"event_type":"last_trade_price","asset_id":"123","price":"0.57",
                "size":"250","side":"BUY","timestamp":"1700000000123"}"#,
        );
        assert_eq!(events.len(), 1);
        let MarketEvent::Trade(t) = &events[0] else {
            panic!("expected trade");
        };
        assert_eq!(t.asset_id, "123");
        assert_eq!(t.price, d("0.57"));
        assert_eq!(t.side, Some(Side::Buy));
        assert_eq!(t.timestamp, 1700000000123);
    }

    #[test]
    fn price_change_drops_all_null_entries() {
        let events = parse_frame(
            r#"{"event_type":"price_change","timestamp":"1700000000123","price_changes":[
                {"asset_id":"1","best_bid":"0.49","best_ask":"0.51","price":"0.50","size":"10","side":"SELL"},
                {"asset_id":"2","best_bid":null,"best_ask":null,"price":null},
                {"asset_id":"3","best_bid":null,"best_ask":"0.33","price":null}
            ]}"#,
        );
        assert_eq!(events.len(), 2);
        let MarketEvent::PriceChange(p) = &events[0] else {
            panic!("expected price change");
        };
        assert_eq!(p.best_bid, Some(d("0.49")));
        assert_eq!(p.side, Some(Side::Sell));
        let MarketEvent::PriceChange(p) = &events[1] else {
            panic!("expected price change");
        };
        assert_eq!(p.asset_id, "3");
        assert_eq!(p.best_ask, Some(d("0.33")));
    }

    #[test]
    fn book_snapshot_reduces_to_top_of_book() {
        let events = parse_frame(
            r#"{"event_type":"book","asset_id":"42","timestamp":"1",
                "bids":[{"price":"0.45","size":"10"},{"price":"0.48","size":"3"}],
                "asks":[{"price":"0.55","size":"9"},{"price":"0.52","size":"2"}]}"#,
        );
        assert_eq!(events.len(), 1);
        let MarketEvent::PriceChange(p) = &events[0] else {
            panic!("expected price change");
        };
        assert_eq!(p.best_bid, Some(d("0.48")));
        assert_eq!(p.best_ask, Some(d("0.52")));
        assert_eq!(p.price, None);
    }

    #[test]
    fn arrays_of_events_flatten() {
        let events = parse_frame(
            r#"[{"event_type":"last_trade_price","asset_id":"1","price":"0.2"},
                {"event_type":"tick_size_change","asset_id":"1"},
                {"event_type":"unknown_thing"},
                {"event_type":"last_trade_price","asset_id":"2","price":"0.8"}]"#,
        );
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn batch_framing_single_vs_many() {
        let trade = MarketEvent::Trade(TradeEvent {
            asset_id: "1".into(),
            price: d("0.5"),
            size: d("1"),
            side: None,
            timestamp: 0,
            outcome: String::new(),
            market_question: String::new(),
            event_title: String::new(),
        });

        assert!(batch_messages(vec![]).is_empty());

        let single = batch_messages(vec![trade.clone()]);
        assert_eq!(single.len(), 1);
        assert!(matches!(single[0], FeedMessage::NewOrder(_)));

        let many = batch_messages(vec![trade.clone(), trade.clone(), trade]);
        assert_eq!(many.len(), 4);
        assert!(matches!(many[0], FeedMessage::NewOrdersBatch(ref b) if b.len() == 3));
        assert!(matches!(many[1], FeedMessage::NewOrder(_)));
    }

    #[test]
    fn health_check_needs_quiet_and_markets() {
        assert!(should_force_resubscribe(true, true));
        assert!(!should_force_resubscribe(true, false));
        assert!(!should_force_resubscribe(false, true));
    }
}
