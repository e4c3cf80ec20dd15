//! Copy-trade executor.
//!
//! Consumes `new_trade` events, sizes the copy per the configured mode,
//! and places the mirrored order. Every outcome lands as a terminal
//! `CopyTrade` row; the unique source-trade index makes re-delivery of
//! the same activity a no-op.

use crate::bus::{EventBus, TOPIC_COPY_TRADING};
use crate::models::{clamp_price_to_tick, CopyTradeStatus, Side, WalletTrade};
use crate::store::{CopyTrade, CopyTradingSettings, SizingMode, Store};
use crate::venue::{build_signed_order, OrderArgs, OrderType, VenueClient};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Sizing base when the percentage mode cannot read the live balance.
const BALANCE_FALLBACK_DOLLARS: i64 = 1000;
/// Venue minimum order size in shares.
const MIN_SHARES: i64 = 5;

pub struct CopyExecutor {
    store: Store,
    client: VenueClient,
    bus: EventBus,
}

impl CopyExecutor {
    pub fn new(store: Store, client: VenueClient, bus: EventBus) -> Arc<Self> {
        Arc::new(Self { store, client, bus })
    }

    pub fn spawn(store: Store, client: VenueClient, bus: EventBus) -> Arc<Self> {
        let executor = Self::new(store, client, bus);
        tokio::spawn(executor.clone().listen());
        executor
    }

    async fn listen(self: Arc<Self>) {
        let mut rx = self.bus.subscribe(TOPIC_COPY_TRADING);
        loop {
            let event = match rx.recv().await {
                Ok(ev) => ev,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "copy executor lagged behind the bus");
                    continue;
                }
                Err(RecvError::Closed) => return,
            };
            if event.kind != "new_trade" {
                continue;
            }

            let address = event
                .payload
                .get("address")
                .and_then(|a| a.as_str())
                .unwrap_or_default()
                .to_string();
            let trade: WalletTrade = match event
                .payload
                .get("trade")
                .cloned()
                .map(serde_json::from_value)
            {
                Some(Ok(t)) => t,
                _ => {
                    warn!("malformed new_trade payload");
                    continue;
                }
            };

            let enabled = match self.store.get_copy_settings().await {
                Ok(s) => s.enabled,
                Err(e) => {
                    warn!(error = %e, "failed to read copy settings");
                    continue;
                }
            };
            if !enabled {
                debug!(trade_id = %trade.id, "copy trading disabled, skipping");
                continue;
            }

            match self.execute_copy(&address, &trade, false).await {
                Ok(row) => {
                    info!(trade_id = %trade.id, status = row.status.as_str(), copy_size = %row.copy_size, "copy processed");
                }
                Err(e) => {
                    // duplicates and disabled settings land here; neither
                    // should take the executor down
                    debug!(trade_id = %trade.id, reason = %e, "copy skipped");
                }
            }
        }
    }

    /// Mirror one source trade. `force` is the manual-copy path and
    /// bypasses the enabled flag, never the duplicate gate.
    pub async fn execute_copy(
        &self,
        source_address: &str,
        trade: &WalletTrade,
        force: bool,
    ) -> Result<CopyTrade> {
        let settings = self.store.get_copy_settings().await?;
        if !settings.enabled && !force {
            bail!("copy trading is disabled");
        }
        if self.store.copy_trade_exists(&trade.id).await? {
            bail!("copy trade for {} already exists", trade.id);
        }

        let price = clamp_price_to_tick(trade.price);
        let balance = if settings.sizing_mode == SizingMode::Percentage {
            match self.client.get_balance().await {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!(error = %e, "balance unavailable, using fallback for percentage sizing");
                    None
                }
            }
        } else {
            None
        };
        let copy_size = compute_copy_size(&settings, trade.size, price, balance);

        let creds = self.store.get_credentials().await?;
        let (status, error_message) = if !creds.configured() {
            // sized but never submitted; becomes executable via retry once
            // credentials exist
            (CopyTradeStatus::Simulated, None)
        } else {
            match self
                .place_order(&trade.asset_id, trade.side, price, copy_size)
                .await
            {
                Ok(order_id) => {
                    info!(order_id = %order_id, trade_id = %trade.id, "copy order placed");
                    (CopyTradeStatus::Executed, None)
                }
                Err(e) => (CopyTradeStatus::Failed, Some(e.to_string())),
            }
        };

        let row = CopyTrade {
            id: uuid::Uuid::new_v4().to_string(),
            source_address: source_address.to_string(),
            original_trade_id: trade.id.clone(),
            market: trade.market.clone(),
            asset_id: trade.asset_id.clone(),
            side: trade.side,
            original_size: trade.size,
            original_price: trade.price,
            copy_size,
            status,
            executed_at: matches!(
                status,
                CopyTradeStatus::Executed | CopyTradeStatus::Simulated
            )
            .then(|| Utc::now().timestamp()),
            error_message,
            title: trade.title.clone(),
            outcome: trade.outcome.clone(),
            event_slug: trade.event_slug.clone(),
            inserted_at: Utc::now().timestamp(),
        };

        if !self.store.insert_copy_trade(&row).await? {
            bail!("copy trade for {} already exists", trade.id);
        }

        self.broadcast(&row);
        Ok(row)
    }

    /// Re-run a failed copy with its stored parameters.
    pub async fn retry(&self, copy_trade_id: &str) -> Result<CopyTrade> {
        let Some(row) = self.store.get_copy_trade(copy_trade_id).await? else {
            bail!("copy trade {copy_trade_id} not found");
        };
        if !matches!(row.status, CopyTradeStatus::Failed | CopyTradeStatus::Simulated) {
            bail!("copy trade {copy_trade_id} is {}, nothing to retry", row.status.as_str());
        }

        let creds = self.store.get_credentials().await?;
        if !creds.configured() {
            bail!("credentials_not_configured");
        }

        let price = clamp_price_to_tick(row.original_price);
        let (status, error_message) = match self
            .place_order(&row.asset_id, row.side, price, row.copy_size)
            .await
        {
            Ok(order_id) => {
                info!(order_id = %order_id, copy_trade_id = %row.id, "copy retry placed");
                (CopyTradeStatus::Executed, None)
            }
            Err(e) => (CopyTradeStatus::Failed, Some(e.to_string())),
        };

        self.store
            .update_copy_trade_outcome(&row.id, status, error_message.as_deref())
            .await?;
        let updated = self
            .store
            .get_copy_trade(&row.id)
            .await?
            .context("row vanished mid-retry")?;

        self.broadcast(&updated);
        Ok(updated)
    }

    async fn place_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<String> {
        let book = self
            .client
            .get_order_book(token_id)
            .await
            .context("order book lookup")?;
        let creds = self.store.get_credentials().await?;
        let payload = build_signed_order(
            &creds,
            &OrderArgs {
                token_id: token_id.to_string(),
                price,
                size,
                side,
            },
            book.neg_risk,
        )?;
        let ack = self.client.post_order(payload, OrderType::Gtc).await?;
        Ok(ack.order_id.unwrap_or_default())
    }

    fn broadcast(&self, row: &CopyTrade) {
        self.bus.publish(
            TOPIC_COPY_TRADING,
            "copy_trade_executed",
            serde_json::to_value(row).unwrap_or(serde_json::Value::Null),
        );
    }
}

/// Shares to copy: dollars per the sizing mode divided by the clamped
/// price, floored at the venue minimum of five shares.
fn compute_copy_size(
    settings: &CopyTradingSettings,
    original_size: Decimal,
    price: Decimal,
    balance: Option<Decimal>,
) -> Decimal {
    let dollars = match settings.sizing_mode {
        SizingMode::Fixed => settings.fixed_amount,
        SizingMode::Proportional => original_size * price * settings.proportional_factor,
        SizingMode::Percentage => {
            let base = balance.unwrap_or_else(|| Decimal::from(BALANCE_FALLBACK_DOLLARS));
            base * settings.percentage / Decimal::from(100)
        }
    };
    let shares = if price > Decimal::ZERO {
        dollars / price
    } else {
        Decimal::ZERO
    };
    shares.max(Decimal::from(MIN_SHARES))
}
