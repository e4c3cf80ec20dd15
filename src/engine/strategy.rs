//! The strategy plug-in seam.
//!
//! Modules are pure decision logic: the runner owns discovery, prices and
//! execution, and hands modules a read-only view per callback. New
//! strategy types get a variant in the sealed [`StrategyKind`]; the trait
//! keeps every variant honest about the callback surface.

use crate::engine::time_decay::TimeDecayModule;
use crate::markets::Interval;
use crate::models::{MarketEvent, MarketInfo, Signal, TokenPrice};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub const STRATEGY_TYPE_TIME_DECAY: &str = "time_decay";

/// Which tokens a runner accepts order flow for, beyond discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetTokens {
    /// Accept every asset the feed delivers.
    All,
    Only(Vec<String>),
}

impl TargetTokens {
    pub fn as_list(&self) -> &[String] {
        match self {
            TargetTokens::All => &[],
            TargetTokens::Only(list) => list,
        }
    }
}

/// Read-only view the runner exposes to modules on each callback.
pub struct ModuleCtx<'a> {
    pub strategy_id: i64,
    pub discovered: &'a HashMap<String, MarketInfo>,
    pub prices: &'a HashMap<String, TokenPrice>,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait StrategyModule: Send {
    fn validate_config(config: &serde_json::Value) -> Result<()>
    where
        Self: Sized;

    /// One market event for an accepted asset.
    async fn handle_order(&mut self, ctx: &ModuleCtx<'_>, event: &MarketEvent) -> Vec<Signal>;

    /// The 5 s tick; housekeeping plus optional proactive signals.
    async fn handle_tick(&mut self, ctx: &ModuleCtx<'_>) -> Vec<Signal>;
}

/// Sealed sum of the built-in strategy modules, one dispatch point per
/// callback.
#[derive(Debug)]
pub enum StrategyKind {
    TimeDecay(TimeDecayModule),
}

impl StrategyKind {
    pub fn from_strategy(strategy_type: &str, config: &serde_json::Value) -> Result<Self> {
        match strategy_type {
            STRATEGY_TYPE_TIME_DECAY => Ok(StrategyKind::TimeDecay(TimeDecayModule::from_config(
                config,
            )?)),
            other => bail!("unknown_strategy_type: {other}"),
        }
    }

    pub fn validate(strategy_type: &str, config: &serde_json::Value) -> Result<()> {
        match strategy_type {
            STRATEGY_TYPE_TIME_DECAY => TimeDecayModule::validate_config(config),
            other => bail!("unknown_strategy_type: {other}"),
        }
    }

    pub async fn handle_order(
        &mut self,
        ctx: &ModuleCtx<'_>,
        event: &MarketEvent,
    ) -> Vec<Signal> {
        match self {
            StrategyKind::TimeDecay(m) => m.handle_order(ctx, event).await,
        }
    }

    pub async fn handle_tick(&mut self, ctx: &ModuleCtx<'_>) -> Vec<Signal> {
        match self {
            StrategyKind::TimeDecay(m) => m.handle_tick(ctx).await,
        }
    }

    pub fn discovery_intervals(&self) -> Vec<Interval> {
        match self {
            StrategyKind::TimeDecay(m) => m.discovery_intervals(),
        }
    }

    pub fn target_tokens(&self) -> TargetTokens {
        match self {
            StrategyKind::TimeDecay(m) => m.target_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_is_rejected() {
        let err = StrategyKind::from_strategy("martingale", &serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("unknown_strategy_type"));
        assert!(StrategyKind::validate("martingale", &serde_json::json!({})).is_err());
    }

    #[test]
    fn time_decay_constructs() {
        let kind =
            StrategyKind::from_strategy(STRATEGY_TYPE_TIME_DECAY, &serde_json::json!({})).unwrap();
        assert_eq!(kind.discovery_intervals(), vec![Interval::M15]);
        assert_eq!(kind.target_tokens(), TargetTokens::Only(vec![]));
    }
}
