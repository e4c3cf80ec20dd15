//! Time-decay strategy: buy near-certain outcomes in the final stretch
//! before resolution, when the market already agrees with itself.
//!
//! Fires a BUY when the evaluated price crosses the signal threshold
//! inside the resolution window, then locks both sides of the market for
//! the cooldown period so one market yields at most one trade per window.

use crate::engine::strategy::{ModuleCtx, StrategyModule, TargetTokens};
use crate::markets::gamma::is_crypto_text;
use crate::markets::Interval;
use crate::models::{MarketEvent, Side, Signal};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TimeDecayConfig {
    pub timeframes: Vec<Interval>,
    pub signal_threshold: Decimal,
    /// Dollars to deploy per signal.
    pub order_size: Decimal,
    /// Minimum estimated profit in dollars, `(1 - buy_price) * shares`.
    pub min_profit: Decimal,
    pub cooldown_seconds: i64,
    pub use_limit_order: bool,
    pub limit_price: Option<Decimal>,
    pub crypto_only: bool,
    /// Upper bound on minutes-to-resolution; the gate is `0 < m <= this`.
    pub min_minutes: i64,
    /// Re-evaluate every priced token on the 5 s tick instead of waiting
    /// for the next socket frame.
    pub proactive_scan: bool,
    pub target_tokens: TargetTokens,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    timeframes: Option<Vec<String>>,
    signal_threshold: Option<Decimal>,
    order_size: Option<Decimal>,
    min_profit: Option<Decimal>,
    cooldown_seconds: Option<i64>,
    use_limit_order: Option<bool>,
    limit_price: Option<Decimal>,
    crypto_only: Option<bool>,
    min_minutes: Option<i64>,
    proactive_scan: Option<bool>,
    target_tokens: Option<serde_json::Value>,
}

impl TimeDecayConfig {
    /// Fill a persisted config out with the timeframe-aware defaults.
    pub fn from_value(config: &serde_json::Value) -> Result<Self> {
        let raw: RawConfig = if config.is_null() {
            RawConfig::default()
        } else {
            serde_json::from_value(config.clone()).context("parse time-decay config")?
        };

        let timeframes = match raw.timeframes {
            None => vec![Interval::M15],
            Some(names) => {
                let mut intervals = Vec::with_capacity(names.len());
                for name in names {
                    let Some(interval) = Interval::parse(&name) else {
                        bail!("unknown timeframe {name:?}");
                    };
                    intervals.push(interval);
                }
                intervals
            }
        };

        // widest window among the configured timeframes
        let default_min_minutes = timeframes
            .iter()
            .map(|i| i.window_minutes().1)
            .max()
            .unwrap_or(15);

        let target_tokens = match raw.target_tokens {
            None => TargetTokens::Only(Vec::new()),
            Some(serde_json::Value::String(s)) if s.eq_ignore_ascii_case("all") => {
                TargetTokens::All
            }
            Some(serde_json::Value::Array(items)) => TargetTokens::Only(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        serde_json::Value::String(s) => Some(s),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(other) => bail!("target_tokens must be \"all\" or a list, got {other}"),
        };

        let cfg = Self {
            timeframes,
            signal_threshold: raw.signal_threshold.unwrap_or_else(|| Decimal::new(95, 2)),
            order_size: raw.order_size.unwrap_or_else(|| Decimal::from(10)),
            min_profit: raw.min_profit.unwrap_or_else(|| Decimal::new(1, 1)),
            cooldown_seconds: raw.cooldown_seconds.unwrap_or(200),
            use_limit_order: raw.use_limit_order.unwrap_or(false),
            limit_price: raw.limit_price,
            crypto_only: raw.crypto_only.unwrap_or(true),
            min_minutes: raw.min_minutes.unwrap_or(default_min_minutes),
            proactive_scan: raw.proactive_scan.unwrap_or(false),
            target_tokens,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.signal_threshold <= Decimal::ZERO || self.signal_threshold >= Decimal::ONE {
            bail!("signal_threshold must be inside (0, 1)");
        }
        if self.order_size <= Decimal::ZERO {
            bail!("order_size must be positive");
        }
        if self.cooldown_seconds <= 0 {
            bail!("cooldown_seconds must be positive");
        }
        if self.min_minutes <= 0 {
            bail!("min_minutes must be positive");
        }
        if let Some(limit) = self.limit_price {
            if limit <= Decimal::ZERO || limit >= Decimal::ONE {
                bail!("limit_price must be inside (0, 1)");
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TimeDecayModule {
    config: TimeDecayConfig,
    /// token id -> unix seconds when the lock expires. Both sides of a
    /// market enter together.
    cooldowns: HashMap<String, i64>,
    /// Tokens this runner already fired on; survives cooldown expiry.
    placed_orders: HashMap<String, Signal>,
}

impl TimeDecayModule {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            config: TimeDecayConfig::from_value(config)?,
            cooldowns: HashMap::new(),
            placed_orders: HashMap::new(),
        })
    }

    pub fn discovery_intervals(&self) -> Vec<Interval> {
        self.config.timeframes.clone()
    }

    pub fn target_tokens(&self) -> TargetTokens {
        self.config.target_tokens.clone()
    }

    fn on_cooldown(&self, token_id: &str, now: i64) -> bool {
        self.cooldowns
            .get(token_id)
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }

    fn evaluate(&mut self, ctx: &ModuleCtx<'_>, token_id: &str) -> Option<Signal> {
        let info = ctx.discovered.get(token_id)?;
        let token_price = ctx.prices.get(token_id)?;
        let now = ctx.now.timestamp();

        if self.on_cooldown(token_id, now) || self.placed_orders.contains_key(token_id) {
            return None;
        }

        let floor = Decimal::new(5, 2); // 0.05
        let eval_price = token_price.eval_price()?;
        if eval_price < floor {
            return None;
        }
        if let Some(ask) = token_price.best_ask {
            if ask < floor {
                return None;
            }
        }

        if self.config.crypto_only
            && !is_crypto_text(&info.question)
            && !is_crypto_text(&info.event_title)
        {
            return None;
        }
        let minutes = info.minutes_to_resolution(ctx.now)?;
        if minutes <= 0 || minutes > self.config.min_minutes {
            return None;
        }

        if eval_price <= self.config.signal_threshold {
            return None;
        }

        let buy_price = if self.config.use_limit_order {
            self.config.limit_price.or(token_price.best_ask)?
        } else {
            token_price.best_ask?
        };
        if buy_price <= Decimal::ZERO || buy_price >= Decimal::ONE {
            return None;
        }
        let shares = self.config.order_size / buy_price;

        // minimum-order gates
        if self.config.order_size < Decimal::ONE {
            return None;
        }
        if shares < Decimal::from(5) {
            return None;
        }
        let estimated_profit = (Decimal::ONE - buy_price) * shares;
        if estimated_profit < self.config.min_profit {
            return None;
        }

        // lock the pair so one market fires at most once per window
        let expires = now + self.config.cooldown_seconds;
        self.cooldowns.insert(token_id.to_string(), expires);
        if !info.opposite_token_id.is_empty() {
            self.cooldowns
                .insert(info.opposite_token_id.clone(), expires);
        }

        let signal = Signal {
            action: Side::Buy,
            token_id: token_id.to_string(),
            price: buy_price,
            size: shares,
            reason: format!(
                "eval price {eval_price} above threshold {} with {minutes}m to resolution",
                self.config.signal_threshold
            ),
            requires_position: false,
            metadata: serde_json::json!({
                "eval_price": eval_price,
                "best_bid": token_price.best_bid,
                "best_ask": token_price.best_ask,
                "minutes_to_resolution": minutes,
                "estimated_profit": estimated_profit,
                "question": info.question,
            }),
        };
        self.placed_orders
            .insert(token_id.to_string(), signal.clone());
        debug!(token_id = %token_id, price = %buy_price, shares = %shares, "time-decay signal");
        Some(signal)
    }
}

#[async_trait]
impl StrategyModule for TimeDecayModule {
    fn validate_config(config: &serde_json::Value) -> Result<()> {
        TimeDecayConfig::from_value(config).map(|_| ())
    }

    async fn handle_order(&mut self, ctx: &ModuleCtx<'_>, event: &MarketEvent) -> Vec<Signal> {
        self.evaluate(ctx, event.asset_id()).into_iter().collect()
    }

    async fn handle_tick(&mut self, ctx: &ModuleCtx<'_>) -> Vec<Signal> {
        let now = ctx.now.timestamp();
        self.cooldowns.retain(|_, expires| *expires > now);

        if !self.config.proactive_scan {
            return Vec::new();
        }
        let token_ids: Vec<String> = ctx.prices.keys().cloned().collect();
        token_ids
            .iter()
            .filter_map(|token_id| self.evaluate(ctx, token_id))
            .collect()
    }
}
