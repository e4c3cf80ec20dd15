//! Wallet activity watcher.
//!
//! Polls every tracked address at an interval that stretches with the
//! number of addresses, keeping total request rate at half the Data-API
//! budget. New trades (by transaction hash) go out as `new_trade` bus
//! events; the full list refresh goes out as `trades_updated`.

use crate::bus::{EventBus, TOPIC_COPY_TRADING};
use crate::models::{Side, WalletTrade};
use crate::store::{Store, TrackedUser};
use crate::venue::http::ActivityItem;
use crate::venue::VenueClient;
use anyhow::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const ACTIVITY_FETCH_LIMIT: usize = 100;

#[derive(Debug)]
enum WatcherCommand {
    Track {
        address: String,
    },
    Untrack {
        address: String,
    },
    GetTrades {
        address: String,
        reply: oneshot::Sender<Vec<WalletTrade>>,
    },
}

#[derive(Clone)]
pub struct CopyWatcher {
    cmd_tx: mpsc::Sender<WatcherCommand>,
    store: Store,
}

impl CopyWatcher {
    pub fn spawn(store: Store, client: VenueClient, bus: EventBus) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let worker = WatcherWorker {
            store: store.clone(),
            client,
            bus,
            tracked: HashMap::new(),
            last_trade_ids: HashMap::new(),
        };
        tokio::spawn(worker.run(cmd_rx));
        Self { cmd_tx, store }
    }

    /// Upsert with `active=true` and schedule an immediate fetch.
    pub async fn track(&self, address: &str, label: &str) -> Result<TrackedUser> {
        let user = self.store.upsert_tracked_user(address, label).await?;
        let _ = self
            .cmd_tx
            .send(WatcherCommand::Track {
                address: user.address.clone(),
            })
            .await;
        Ok(user)
    }

    /// Archive: polling stops, the row stays.
    pub async fn untrack(&self, address: &str) -> Result<()> {
        self.store.set_tracked_user_active(address, false).await?;
        let _ = self
            .cmd_tx
            .send(WatcherCommand::Untrack {
                address: address.trim().to_lowercase(),
            })
            .await;
        Ok(())
    }

    pub async fn restore(&self, address: &str) -> Result<()> {
        self.store.set_tracked_user_active(address, true).await?;
        let _ = self
            .cmd_tx
            .send(WatcherCommand::Track {
                address: address.trim().to_lowercase(),
            })
            .await;
        Ok(())
    }

    /// Permanent removal; only valid for archived users.
    pub async fn delete(&self, address: &str) -> Result<()> {
        self.store.delete_tracked_user(address).await?;
        let _ = self
            .cmd_tx
            .send(WatcherCommand::Untrack {
                address: address.trim().to_lowercase(),
            })
            .await;
        Ok(())
    }

    /// The most recent trades fetched for one address; empty when the
    /// address is unknown or the watcher is unreachable.
    pub async fn latest_trades(&self, address: &str) -> Vec<WalletTrade> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(WatcherCommand::GetTrades {
                address: address.trim().to_lowercase(),
                reply,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

struct TrackedState {
    trades: Vec<WalletTrade>,
    added_at: i64,
}

struct WatcherWorker {
    store: Store,
    client: VenueClient,
    bus: EventBus,
    tracked: HashMap<String, TrackedState>,
    last_trade_ids: HashMap<String, HashSet<String>>,
}

impl WatcherWorker {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<WatcherCommand>) {
        // Resume watching everyone who was active before the restart.
        match self.store.list_tracked_users(false).await {
            Ok(users) => {
                for user in users {
                    self.tracked.insert(
                        user.address.clone(),
                        TrackedState {
                            trades: Vec::new(),
                            added_at: Utc::now().timestamp(),
                        },
                    );
                }
                info!(count = self.tracked.len(), "watching tracked wallets");
            }
            Err(e) => warn!(error = %e, "failed to load tracked users"),
        }

        for address in self.tracked.keys().cloned().collect::<Vec<_>>() {
            self.fetch_and_publish(&address).await;
        }

        let mut next_poll = Instant::now() + poll_interval(self.tracked.len());
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { return; };
                    match cmd {
                        WatcherCommand::Track { address } => {
                            self.tracked.entry(address.clone()).or_insert_with(|| TrackedState {
                                trades: Vec::new(),
                                added_at: Utc::now().timestamp(),
                            });
                            self.fetch_and_publish(&address).await;
                        }
                        WatcherCommand::Untrack { address } => {
                            self.tracked.remove(&address);
                            self.last_trade_ids.remove(&address);
                        }
                        WatcherCommand::GetTrades { address, reply } => {
                            let trades = self
                                .tracked
                                .get(&address)
                                .map(|state| state.trades.clone())
                                .unwrap_or_default();
                            let _ = reply.send(trades);
                        }
                    }
                }
                _ = tokio::time::sleep_until(next_poll) => {
                    let addresses: Vec<String> = self.tracked.keys().cloned().collect();
                    for address in addresses {
                        self.fetch_and_publish(&address).await;
                    }
                    next_poll = Instant::now() + poll_interval(self.tracked.len());
                }
            }
        }
    }

    async fn fetch_and_publish(&mut self, address: &str) {
        let items = match self
            .client
            .get_activity(address, ACTIVITY_FETCH_LIMIT, 0)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(address = %address, error = %e, "activity fetch failed");
                return;
            }
        };

        let trades = extract_trades(items);
        let seen = self.last_trade_ids.entry(address.to_string()).or_default();
        let new: Vec<WalletTrade> = trades
            .iter()
            .filter(|t| !seen.contains(&t.id))
            .cloned()
            .collect();

        // Replace rather than union: the long tail is unbounded.
        *seen = trades.iter().map(|t| t.id.clone()).collect();

        for trade in &new {
            debug!(address = %address, trade_id = %trade.id, side = %trade.side, "new tracked trade");
            self.bus.publish(
                TOPIC_COPY_TRADING,
                "new_trade",
                serde_json::json!({ "address": address, "trade": trade }),
            );
        }

        let tracked_since = self.tracked.get(address).map(|s| s.added_at);
        self.bus.publish(
            TOPIC_COPY_TRADING,
            "trades_updated",
            serde_json::json!({
                "address": address,
                "trades": trades,
                "tracked_since": tracked_since,
            }),
        );

        if let Some(state) = self.tracked.get_mut(address) {
            state.trades = trades;
        }
    }
}

/// `max(3 s, 10 s · N/100)` keeps N polls per cycle at or under half the
/// Data-API bucket.
fn poll_interval(tracked_count: usize) -> Duration {
    let scaled = 10.0 * tracked_count as f64 / 100.0;
    Duration::from_secs_f64(scaled.max(3.0))
}

/// Keep only real trades and project them onto the canonical record.
fn extract_trades(items: Vec<ActivityItem>) -> Vec<WalletTrade> {
    items
        .into_iter()
        .filter(|i| i.activity_type == "TRADE" && !i.transaction_hash.is_empty())
        .filter_map(|i| {
            let side = Side::parse(&i.side)?;
            Some(WalletTrade {
                id: i.transaction_hash,
                market: i.condition_id,
                asset_id: i.asset,
                side,
                size: i.size,
                price: i.price,
                outcome: i.outcome,
                title: i.title,
                event_slug: i.event_slug,
                timestamp: i.timestamp,
            })
        })
        .collect()
}
