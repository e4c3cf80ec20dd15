//! Shared domain types: order sides, persisted statuses, market metadata,
//! strategy signals and the events parsed off the market WebSocket.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side as the venue spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    /// Side integer in the signed order struct: BUY=0, SELL=1.
    pub fn order_value(&self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal + retryable states of a copied trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyTradeStatus {
    Pending,
    Executed,
    Simulated,
    Failed,
}

impl CopyTradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyTradeStatus::Pending => "pending",
            CopyTradeStatus::Executed => "executed",
            CopyTradeStatus::Simulated => "simulated",
            CopyTradeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CopyTradeStatus::Pending),
            "executed" => Some(CopyTradeStatus::Executed),
            "simulated" => Some(CopyTradeStatus::Simulated),
            "failed" => Some(CopyTradeStatus::Failed),
            _ => None,
        }
    }
}

/// States of a strategy-originated trade row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Submitted,
    Filled,
    Failed,
    Simulated,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Submitted => "submitted",
            TradeStatus::Filled => "filled",
            TradeStatus::Failed => "failed",
            TradeStatus::Simulated => "simulated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TradeStatus::Pending),
            "submitted" => Some(TradeStatus::Submitted),
            "filled" => Some(TradeStatus::Filled),
            "failed" => Some(TradeStatus::Failed),
            "simulated" => Some(TradeStatus::Simulated),
            _ => None,
        }
    }
}

/// Persisted strategy intent. The engine registry, not this column, answers
/// whether a runner is actually alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Stopped,
    Running,
    Paused,
    Error,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Stopped => "stopped",
            StrategyStatus::Running => "running",
            StrategyStatus::Paused => "paused",
            StrategyStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(StrategyStatus::Stopped),
            "running" => Some(StrategyStatus::Running),
            "paused" => Some(StrategyStatus::Paused),
            "error" => Some(StrategyStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyEventType {
    Info,
    Signal,
    Trade,
    Error,
    Warning,
}

impl StrategyEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyEventType::Info => "info",
            StrategyEventType::Signal => "signal",
            StrategyEventType::Trade => "trade",
            StrategyEventType::Error => "error",
            StrategyEventType::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(StrategyEventType::Info),
            "signal" => Some(StrategyEventType::Signal),
            "trade" => Some(StrategyEventType::Trade),
            "error" => Some(StrategyEventType::Error),
            "warning" => Some(StrategyEventType::Warning),
            _ => None,
        }
    }
}

/// Canonical trade record extracted from a tracked wallet's activity feed.
/// `id` is the on-chain transaction hash and keys deduplication everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTrade {
    pub id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub outcome: String,
    pub title: String,
    pub event_slug: String,
    pub timestamp: i64,
}

/// Cached per-token market metadata (see the markets cache for TTL rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub question: String,
    pub event_title: String,
    pub event_slug: String,
    pub condition_id: String,
    pub outcome: String,
    pub opposite_token_id: String,
    pub price: Decimal,
    pub end_date: Option<DateTime<Utc>>,
    /// Settlement mode flag. `None` means the venue never told us, which
    /// blocks live order placement for this market.
    pub neg_risk: Option<bool>,
}

impl MarketInfo {
    pub fn minutes_to_resolution(&self, now: DateTime<Utc>) -> Option<i64> {
        self.end_date.map(|end| (end - now).num_minutes())
    }
}

/// What a strategy module asks the runner to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: Side,
    pub token_id: String,
    pub price: Decimal,
    /// Shares, not dollars.
    pub size: Decimal,
    pub reason: String,
    #[serde(default)]
    pub requires_position: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// `last_trade_price` frame off the market WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub asset_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Option<Side>,
    pub timestamp: i64,
    pub outcome: String,
    pub market_question: String,
    pub event_title: String,
}

/// `price_change` / `book` frame, reduced to the top of book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    pub asset_id: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
    pub side: Option<Side>,
    pub timestamp: i64,
}

/// One parsed market event, fanned out by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketEvent {
    Trade(TradeEvent),
    PriceChange(PriceChangeEvent),
}

impl MarketEvent {
    pub fn asset_id(&self) -> &str {
        match self {
            MarketEvent::Trade(t) => &t.asset_id,
            MarketEvent::PriceChange(p) => &p.asset_id,
        }
    }
}

/// Latest known top-of-book for one token inside a runner.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenPrice {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub outcome: String,
    pub market_question: String,
    pub ts: i64,
}

impl TokenPrice {
    /// Midpoint when both sides exist, otherwise whichever side does.
    pub fn eval_price(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::from(2)),
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}

/// The venue only accepts limit prices on the 0.001 grid, open interval.
/// Rounds down to the grid, then clamps away from the closed endpoints.
pub fn clamp_price_to_tick(price: Decimal) -> Decimal {
    let grid = Decimal::new(1, 3); // 0.001
    let floored = (price / grid).floor() * grid;
    let min = Decimal::new(1, 3); // 0.001
    let max = Decimal::new(999, 3); // 0.999
    floored.clamp(min, max)
}
