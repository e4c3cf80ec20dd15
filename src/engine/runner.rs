//! Per-strategy runner.
//!
//! A runner owns one strategy's whole loop: discovery of expiring
//! markets, feed subscriptions, price bookkeeping, module evaluation and
//! execution (paper or live). Everything arrives through one select loop,
//! so module callbacks never race each other.

use crate::bus::{strategy_topic, EventBus};
use crate::engine::strategy::{ModuleCtx, StrategyKind, TargetTokens};
use crate::markets::feed::FeedMessage;
use crate::markets::gamma::DiscoveredToken;
use crate::markets::{GammaClient, MarketCache, MarketFeed};
use crate::models::{
    MarketEvent, MarketInfo, Side, Signal, StrategyEventType, StrategyStatus, TokenPrice,
    TradeStatus,
};
use crate::store::{NewTrade, Store, Strategy};
use crate::venue::{build_signed_order, OrderArgs, OrderType, VenueClient};
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(120);
const PRICE_BROADCAST_MIN_GAP: Duration = Duration::from_millis(250);
const SEED_CONCURRENCY: usize = 5;

#[derive(Debug)]
pub enum RunnerCtrl {
    Pause,
    Resume,
    Stop,
    GetDiscovered(oneshot::Sender<Vec<String>>),
}

/// Shared handles every runner needs; cheap to clone.
#[derive(Clone)]
pub struct RunnerDeps {
    pub store: Store,
    pub bus: EventBus,
    pub feed: MarketFeed,
    pub gamma: GammaClient,
    pub cache: MarketCache,
    pub client: VenueClient,
}

pub struct Runner {
    deps: RunnerDeps,
    strategy: Strategy,
    module: StrategyKind,
    paused: bool,
    discovered: HashMap<String, MarketInfo>,
    prices: HashMap<String, TokenPrice>,
    targets: TargetTokens,
    last_broadcast: Instant,
}

impl Runner {
    pub fn new(deps: RunnerDeps, strategy: Strategy) -> Result<Self> {
        let module = StrategyKind::from_strategy(&strategy.strategy_type, &strategy.config)?;
        let targets = module.target_tokens();
        Ok(Self {
            deps,
            strategy,
            module,
            paused: false,
            discovered: HashMap::new(),
            prices: HashMap::new(),
            targets,
            last_broadcast: Instant::now(),
        })
    }

    pub async fn run(mut self, mut ctrl_rx: mpsc::Receiver<RunnerCtrl>) -> Result<()> {
        self.init().await?;

        let mut feed_rx = self.deps.feed.subscribe_events();
        let mut tick = interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick is immediate: discovery runs right after start
        let mut discovery = interval(DISCOVERY_INTERVAL);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                ctrl = ctrl_rx.recv() => {
                    match ctrl {
                        None | Some(RunnerCtrl::Stop) => {
                            self.persist_status(StrategyStatus::Stopped).await;
                            self.log_event(StrategyEventType::Info, "strategy stopped", serde_json::Value::Null)
                                .await;
                            return Ok(());
                        }
                        Some(RunnerCtrl::Pause) => {
                            if !self.paused {
                                self.paused = true;
                                self.persist_status(StrategyStatus::Paused).await;
                                self.log_event(StrategyEventType::Info, "strategy paused", serde_json::Value::Null)
                                    .await;
                            }
                        }
                        Some(RunnerCtrl::Resume) => {
                            if self.paused {
                                self.paused = false;
                                self.persist_status(StrategyStatus::Running).await;
                                self.log_event(StrategyEventType::Info, "strategy resumed", serde_json::Value::Null)
                                    .await;
                            }
                        }
                        Some(RunnerCtrl::GetDiscovered(reply)) => {
                            let _ = reply.send(self.discovered.keys().cloned().collect());
                        }
                    }
                }
                _ = discovery.tick() => {
                    if !self.paused {
                        if let Err(e) = self.run_discovery().await {
                            warn!(strategy_id = self.strategy.id, error = %e, "discovery failed");
                            self.log_event(
                                StrategyEventType::Error,
                                &format!("discovery failed: {e}"),
                                serde_json::Value::Null,
                            )
                            .await;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.handle_tick().await;
                }
                msg = feed_rx.recv() => {
                    match msg {
                        Ok(FeedMessage::NewOrder(event)) => self.handle_order(event).await,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(strategy_id = self.strategy.id, skipped, "runner lagged on feed");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!(strategy_id = self.strategy.id, "market feed closed");
                            self.persist_status(StrategyStatus::Stopped).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn init(&mut self) -> Result<()> {
        self.persist_status(StrategyStatus::Running).await;
        self.log_event(
            StrategyEventType::Info,
            "strategy started",
            serde_json::json!({ "paper_mode": self.strategy.paper_mode }),
        )
        .await;

        // pre-configured targets come online before the first discovery
        let targets: Vec<String> = self.targets.as_list().to_vec();
        if !targets.is_empty() {
            for token_id in &targets {
                match self.deps.gamma.lookup_token(token_id).await {
                    Ok(Some(info)) => {
                        self.discovered.insert(token_id.clone(), info);
                    }
                    Ok(None) => {
                        warn!(token_id = %token_id, "target token not found on the venue");
                    }
                    Err(e) => {
                        warn!(token_id = %token_id, error = %e, "target token lookup failed");
                    }
                }
            }
            self.deps.feed.subscribe_markets(targets.clone()).await;
            self.seed_prices(&targets).await;
        }
        Ok(())
    }

    async fn run_discovery(&mut self) -> Result<()> {
        let intervals = self.module.discovery_intervals();
        if intervals.is_empty() {
            return Ok(());
        }
        let tokens = self.deps.gamma.discover(&intervals).await?;

        let (added, removed, next) =
            discovery_delta(&self.discovered, &tokens, self.targets.as_list());

        for token in &tokens {
            if added.contains(&token.token_id) {
                self.deps.cache.insert(&token.token_id, token.info.clone());
            }
        }
        self.discovered = next;

        if !added.is_empty() {
            info!(strategy_id = self.strategy.id, added = added.len(), "subscribing discovered tokens");
            self.deps.feed.subscribe_markets(added.clone()).await;
            self.seed_prices(&added).await;
            self.deps.bus.publish(
                &strategy_topic(self.strategy.id),
                "discovered_tokens",
                serde_json::json!({ "tokens": added }),
            );
        }
        if !removed.is_empty() {
            self.deps.feed.unsubscribe_markets(removed.clone()).await;
            for token in &removed {
                self.prices.remove(token);
            }
            self.deps.bus.publish(
                &strategy_topic(self.strategy.id),
                "removed_tokens",
                serde_json::json!({ "tokens": removed }),
            );
        }
        Ok(())
    }

    /// REST order books, a few at a time, so fresh subscriptions have a
    /// price before the first socket frame lands.
    async fn seed_prices(&mut self, token_ids: &[String]) {
        let client = self.deps.client.clone();
        let books: Vec<(String, Option<(Option<Decimal>, Option<Decimal>)>)> =
            stream::iter(token_ids.to_vec())
                .map(|token_id| {
                    let client = client.clone();
                    async move {
                        match client.get_order_book(&token_id).await {
                            Ok(book) => (token_id, Some((book.best_bid(), book.best_ask()))),
                            Err(e) => {
                                debug!(token_id = %token_id, error = %e, "price seed failed");
                                (token_id, None)
                            }
                        }
                    }
                })
                .buffer_unordered(SEED_CONCURRENCY)
                .collect()
                .await;

        for (token_id, book) in books {
            let Some((best_bid, best_ask)) = book else {
                continue;
            };
            let info = self.discovered.get(&token_id);
            self.prices.insert(
                token_id.clone(),
                TokenPrice {
                    best_bid,
                    best_ask,
                    outcome: info.map(|i| i.outcome.clone()).unwrap_or_default(),
                    market_question: info.map(|i| i.question.clone()).unwrap_or_default(),
                    ts: Utc::now().timestamp_millis(),
                },
            );
        }
    }

    fn accepts(&self, asset_id: &str) -> bool {
        matches!(self.targets, TargetTokens::All) || self.discovered.contains_key(asset_id)
    }

    async fn handle_order(&mut self, event: MarketEvent) {
        let asset_id = event.asset_id().to_string();
        if !self.accepts(&asset_id) {
            return;
        }

        self.update_price(&asset_id, &event);
        self.maybe_broadcast_price(&asset_id);

        if self.paused {
            return;
        }
        let ctx = ModuleCtx {
            strategy_id: self.strategy.id,
            discovered: &self.discovered,
            prices: &self.prices,
            now: Utc::now(),
        };
        let signals = self.module.handle_order(&ctx, &event).await;
        for signal in signals {
            self.execute_signal(signal).await;
        }
    }

    async fn handle_tick(&mut self) {
        let ctx = ModuleCtx {
            strategy_id: self.strategy.id,
            discovered: &self.discovered,
            prices: &self.prices,
            now: Utc::now(),
        };
        let signals = self.module.handle_tick(&ctx).await;
        if self.paused {
            return;
        }
        for signal in signals {
            self.execute_signal(signal).await;
        }
    }

    fn update_price(&mut self, asset_id: &str, event: &MarketEvent) {
        let info = self.discovered.get(asset_id);
        let entry = self
            .prices
            .entry(asset_id.to_string())
            .or_insert_with(|| TokenPrice {
                outcome: info.map(|i| i.outcome.clone()).unwrap_or_default(),
                market_question: info.map(|i| i.question.clone()).unwrap_or_default(),
                ..Default::default()
            });

        match event {
            MarketEvent::PriceChange(change) => {
                if change.best_bid.is_some() {
                    entry.best_bid = change.best_bid;
                }
                if change.best_ask.is_some() {
                    entry.best_ask = change.best_ask;
                }
                entry.ts = change.timestamp;
            }
            MarketEvent::Trade(trade) => {
                entry.ts = trade.timestamp;
            }
        }
    }

    /// At most one `price_update` per 250 ms per runner.
    fn maybe_broadcast_price(&mut self, asset_id: &str) {
        if self.last_broadcast.elapsed() < PRICE_BROADCAST_MIN_GAP {
            return;
        }
        let Some(price) = self.prices.get(asset_id) else {
            return;
        };
        self.last_broadcast = Instant::now();
        self.deps.bus.publish(
            &strategy_topic(self.strategy.id),
            "price_update",
            serde_json::json!({
                "token_id": asset_id,
                "best_bid": price.best_bid,
                "best_ask": price.best_ask,
                "ts": price.ts,
            }),
        );
    }

    async fn execute_signal(&mut self, signal: Signal) {
        self.log_event(
            StrategyEventType::Signal,
            &signal.reason,
            serde_json::json!({
                "action": signal.action.as_str(),
                "token_id": signal.token_id,
                "price": signal.price,
                "size": signal.size,
                "metadata": signal.metadata,
            }),
        )
        .await;

        let result = if self.strategy.paper_mode {
            self.execute_paper(&signal).await
        } else {
            self.execute_live(&signal).await
        };
        if let Err(e) = result {
            warn!(strategy_id = self.strategy.id, error = %e, "signal execution failed");
            self.log_event(
                StrategyEventType::Error,
                &format!("execution failed: {e}"),
                serde_json::Value::Null,
            )
            .await;
        }
    }

    async fn execute_paper(&mut self, signal: &Signal) -> Result<()> {
        let info = self.discovered.get(&signal.token_id);
        let trade = self
            .deps
            .store
            .insert_trade(NewTrade {
                strategy_id: self.strategy.id,
                market_id: info.map(|i| i.condition_id.as_str()).unwrap_or(""),
                asset_id: &signal.token_id,
                side: signal.action,
                price: signal.price,
                size: signal.size,
                status: TradeStatus::Simulated,
                title: info.map(|i| i.question.as_str()).unwrap_or(""),
                outcome: info.map(|i| i.outcome.as_str()).unwrap_or(""),
            })
            .await?;
        self.deps
            .store
            .update_trade_status(trade.id, TradeStatus::Filled, None)
            .await?;
        let position = self
            .deps
            .store
            .apply_fill(
                self.strategy.id,
                &signal.token_id,
                signal.action,
                signal.size,
                signal.price,
            )
            .await?;

        self.log_event(
            StrategyEventType::Trade,
            &format!(
                "paper {} {} shares of {} at {}",
                signal.action.as_str(),
                signal.size.round_dp(2),
                signal.token_id,
                signal.price
            ),
            serde_json::json!({ "trade_id": trade.id }),
        )
        .await;
        self.deps.bus.publish(
            &strategy_topic(self.strategy.id),
            "paper_order",
            serde_json::json!({
                "trade": trade,
                "position": position,
                "paper_mode": true,
            }),
        );
        Ok(())
    }

    async fn execute_live(&mut self, signal: &Signal) -> Result<()> {
        // a sell that needs inventory we do not have is skipped, not sent
        if signal.requires_position && signal.action == Side::Sell {
            let held = self
                .deps
                .store
                .get_position(self.strategy.id, &signal.token_id)
                .await?
                .map(|p| p.size)
                .unwrap_or(Decimal::ZERO);
            if held < signal.size {
                self.log_event(
                    StrategyEventType::Warning,
                    &format!(
                        "insufficient position for sell: have {held}, signal wants {}",
                        signal.size
                    ),
                    serde_json::json!({ "token_id": signal.token_id }),
                )
                .await;
                return Ok(());
            }
        }

        let info = self.discovered.get(&signal.token_id).cloned();
        let trade = self
            .deps
            .store
            .insert_trade(NewTrade {
                strategy_id: self.strategy.id,
                market_id: info.as_ref().map(|i| i.condition_id.as_str()).unwrap_or(""),
                asset_id: &signal.token_id,
                side: signal.action,
                price: signal.price,
                size: signal.size,
                status: TradeStatus::Pending,
                title: info.as_ref().map(|i| i.question.as_str()).unwrap_or(""),
                outcome: info.as_ref().map(|i| i.outcome.as_str()).unwrap_or(""),
            })
            .await?;

        match self.place_live_order(signal, info.as_ref()).await {
            Ok(order_id) => {
                self.deps
                    .store
                    .update_trade_status(trade.id, TradeStatus::Submitted, Some(&order_id))
                    .await?;
                let position = self
                    .deps
                    .store
                    .apply_fill(
                        self.strategy.id,
                        &signal.token_id,
                        signal.action,
                        signal.size,
                        signal.price,
                    )
                    .await?;
                self.log_event(
                    StrategyEventType::Trade,
                    &format!(
                        "submitted {} {} shares of {} at {} (order {order_id})",
                        signal.action.as_str(),
                        signal.size.round_dp(2),
                        signal.token_id,
                        signal.price
                    ),
                    serde_json::json!({ "trade_id": trade.id, "order_id": order_id }),
                )
                .await;
                self.deps.bus.publish(
                    &strategy_topic(self.strategy.id),
                    "paper_order",
                    serde_json::json!({
                        "trade": trade,
                        "position": position,
                        "paper_mode": false,
                        "order_id": order_id,
                    }),
                );
                Ok(())
            }
            Err(e) => {
                self.deps
                    .store
                    .update_trade_status(trade.id, TradeStatus::Failed, None)
                    .await?;
                Err(e)
            }
        }
    }

    async fn place_live_order(
        &self,
        signal: &Signal,
        info: Option<&MarketInfo>,
    ) -> Result<String> {
        // settlement mode from cached metadata, falling back to the book
        let neg_risk = match info.and_then(|i| i.neg_risk) {
            Some(flag) => Some(flag),
            None => {
                self.deps
                    .client
                    .get_order_book(&signal.token_id)
                    .await
                    .map(|b| b.neg_risk)
                    .unwrap_or(None)
            }
        };
        let creds = self.deps.store.get_credentials().await?;
        let payload = build_signed_order(
            &creds,
            &OrderArgs {
                token_id: signal.token_id.clone(),
                price: signal.price,
                size: signal.size,
                side: signal.action,
            },
            neg_risk,
        )?;
        let ack = self
            .deps
            .client
            .post_order(payload, OrderType::Gtc)
            .await
            .context("submit order")?;
        Ok(ack.order_id.unwrap_or_default())
    }

    async fn persist_status(&self, status: StrategyStatus) {
        if let Err(e) = self
            .deps
            .store
            .set_strategy_status(self.strategy.id, status)
            .await
        {
            warn!(strategy_id = self.strategy.id, error = %e, "failed to persist status");
        }
        self.deps.bus.publish(
            crate::bus::TOPIC_STRATEGIES_UPDATES,
            "status",
            serde_json::json!({ "strategy_id": self.strategy.id, "status": status.as_str() }),
        );
    }

    async fn log_event(
        &self,
        event_type: StrategyEventType,
        message: &str,
        metadata: serde_json::Value,
    ) {
        if let Err(e) = self
            .deps
            .store
            .append_strategy_event(self.strategy.id, event_type, message, metadata.clone())
            .await
        {
            warn!(strategy_id = self.strategy.id, error = %e, "failed to append event");
        }
        self.deps.bus.publish(
            &strategy_topic(self.strategy.id),
            event_type.as_str(),
            serde_json::json!({ "message": message, "metadata": metadata }),
        );
    }
}

/// Next discovered set is the incoming tokens plus the pinned targets;
/// additions and removals fall out of the set difference.
fn discovery_delta(
    current: &HashMap<String, MarketInfo>,
    incoming: &[DiscoveredToken],
    targets: &[String],
) -> (Vec<String>, Vec<String>, HashMap<String, MarketInfo>) {
    let mut next: HashMap<String, MarketInfo> = incoming
        .iter()
        .map(|t| (t.token_id.clone(), t.info.clone()))
        .collect();
    for target in targets {
        if let Some(info) = current.get(target) {
            next.entry(target.clone()).or_insert_with(|| info.clone());
        }
    }

    let added: Vec<String> = next
        .keys()
        .filter(|k| !current.contains_key(*k))
        .cloned()
        .collect();
    let removed: Vec<String> = current
        .keys()
        .filter(|k| !next.contains_key(*k))
        .cloned()
        .collect();
    (added, removed, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(question: &str) -> MarketInfo {
        MarketInfo {
            question: question.into(),
            event_title: String::new(),
            event_slug: String::new(),
            condition_id: "0xc".into(),
            outcome: "Yes".into(),
            opposite_token_id: String::new(),
            price: Decimal::ZERO,
            end_date: None,
            neg_risk: Some(false),
        }
    }

    fn discovered_token(id: &str) -> DiscoveredToken {
        DiscoveredToken {
            token_id: id.into(),
            info: info(id),
        }
    }

    #[test]
    fn delta_computes_additions_and_removals() {
        let mut current = HashMap::new();
        current.insert("a".to_string(), info("a"));
        current.insert("b".to_string(), info("b"));

        let incoming = vec![discovered_token("b"), discovered_token("c")];
        let (mut added, mut removed, next) = discovery_delta(&current, &incoming, &[]);
        added.sort();
        removed.sort();

        assert_eq!(added, vec!["c"]);
        assert_eq!(removed, vec!["a"]);
        assert_eq!(next.len(), 2);
        assert!(next.contains_key("b") && next.contains_key("c"));
    }

    #[test]
    fn delta_keeps_pinned_targets() {
        let mut current = HashMap::new();
        current.insert("target".to_string(), info("target"));
        current.insert("old".to_string(), info("old"));

        let incoming = vec![discovered_token("new")];
        let (mut added, mut removed, next) =
            discovery_delta(&current, &incoming, &["target".to_string()]);
        added.sort();
        removed.sort();

        // next = D' ∪ targets
        assert!(next.contains_key("target"));
        assert!(next.contains_key("new"));
        assert!(!next.contains_key("old"));
        assert_eq!(added, vec!["new"]);
        assert_eq!(removed, vec!["old"]);
    }

    #[test]
    fn delta_is_stable_when_nothing_changes() {
        let mut current = HashMap::new();
        current.insert("a".to_string(), info("a"));

        let incoming = vec![discovered_token("a")];
        let (added, removed, next) = discovery_delta(&current, &incoming, &[]);
        assert!(added.is_empty());
        assert!(removed.is_empty());
        assert_eq!(next.len(), 1);
    }

    use crate::bus::EventBus;
    use crate::models::TradeStatus;
    use crate::store::test_util::temp_store;
    use crate::venue::RateLimiter;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn test_runner(paper_mode: bool) -> (Runner, Store, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let bus = EventBus::default();
        let limiter = RateLimiter::spawn();
        let cache = MarketCache::new();
        let deps = RunnerDeps {
            store: store.clone(),
            bus: bus.clone(),
            feed: MarketFeed::spawn(bus.clone()),
            gamma: GammaClient::new(limiter.clone(), cache.clone()),
            cache,
            client: VenueClient::new(store.clone(), limiter),
        };
        let strategy = store
            .create_strategy(
                "test",
                "time_decay",
                &serde_json::json!({ "timeframes": [], "crypto_only": false }),
                paper_mode,
            )
            .await
            .unwrap();
        let mut runner = Runner::new(deps, strategy).unwrap();
        runner.discovered.insert("tok".to_string(), info("q"));
        (runner, store, dir)
    }

    fn buy_signal(size: &str, price: &str) -> Signal {
        Signal {
            action: Side::Buy,
            token_id: "tok".into(),
            price: Decimal::from_str(price).unwrap(),
            size: Decimal::from_str(size).unwrap(),
            reason: "test signal".into(),
            requires_position: false,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn paper_signal_fills_immediately_and_updates_position() {
        let (mut runner, store, _dir) = test_runner(true).await;
        let id = runner.strategy.id;

        runner.execute_signal(buy_signal("10", "0.96")).await;

        let trades = store.list_trades(id, 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].status, TradeStatus::Filled);
        assert!(trades[0].order_id.is_none());

        let position = store.get_position(id, "tok").await.unwrap().unwrap();
        assert_eq!(position.size, d("10"));
        assert_eq!(position.avg_price, d("0.96"));
        assert_eq!(position.side, "YES");

        // signal and trade entries land in the event log
        let events = store.list_strategy_events(id, 10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == StrategyEventType::Signal));
        assert!(events
            .iter()
            .any(|e| e.event_type == StrategyEventType::Trade));
    }

    #[tokio::test]
    async fn live_sell_without_position_is_skipped_with_warning() {
        let (mut runner, store, _dir) = test_runner(false).await;
        let id = runner.strategy.id;

        // hold 3, try to sell 7
        store
            .apply_fill(id, "tok", Side::Buy, d("3"), d("0.5"))
            .await
            .unwrap();

        let mut signal = buy_signal("7", "0.6");
        signal.action = Side::Sell;
        signal.requires_position = true;
        runner.execute_signal(signal).await;

        // no trade row was created, the position is untouched
        assert!(store.list_trades(id, 10).await.unwrap().is_empty());
        let position = store.get_position(id, "tok").await.unwrap().unwrap();
        assert_eq!(position.size, d("3"));

        let events = store.list_strategy_events(id, 10).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == StrategyEventType::Warning
                && e.message.contains("insufficient position")));
    }

    #[tokio::test]
    async fn price_updates_only_for_accepted_assets() {
        let (mut runner, _store, _dir) = test_runner(true).await;

        let event = MarketEvent::PriceChange(crate::models::PriceChangeEvent {
            asset_id: "unknown".into(),
            best_bid: Some(d("0.4")),
            best_ask: Some(d("0.6")),
            price: None,
            size: None,
            side: None,
            timestamp: 1,
        });
        runner.handle_order(event).await;
        assert!(runner.prices.is_empty());

        let event = MarketEvent::PriceChange(crate::models::PriceChangeEvent {
            asset_id: "tok".into(),
            best_bid: Some(d("0.4")),
            best_ask: Some(d("0.6")),
            price: None,
            size: None,
            side: None,
            timestamp: 1,
        });
        runner.handle_order(event).await;
        let price = runner.prices.get("tok").unwrap();
        assert_eq!(price.best_bid, Some(d("0.4")));
        assert_eq!(price.best_ask, Some(d("0.6")));
    }
}
