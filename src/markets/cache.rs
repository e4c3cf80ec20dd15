//! In-memory token-id → market-info cache with per-entry expiry.
//!
//! Writes replace unconditionally. A periodic sweep drops expired entries;
//! a soft cap bounds the map by evicting the entries closest to expiry.

use crate::models::MarketInfo;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_TTL_SECS: i64 = 300;
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const SOFT_CAP: usize = 100_000;

#[derive(Debug, Clone)]
struct CacheEntry {
    info: MarketInfo,
    expires_at: i64,
}

#[derive(Clone, Default)]
pub struct MarketCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, token_id: &str) -> Option<MarketInfo> {
        self.lookup_at(token_id, Utc::now().timestamp())
    }

    fn lookup_at(&self, token_id: &str, now: i64) -> Option<MarketInfo> {
        let map = self.inner.read();
        let entry = map.get(token_id)?;
        if entry.expires_at <= now {
            return None;
        }
        Some(entry.info.clone())
    }

    pub fn insert(&self, token_id: &str, info: MarketInfo) {
        self.insert_with_ttl(token_id, info, DEFAULT_TTL_SECS);
    }

    pub fn insert_with_ttl(&self, token_id: &str, info: MarketInfo, ttl_secs: i64) {
        let expires_at = Utc::now().timestamp() + ttl_secs;
        let mut map = self.inner.write();
        map.insert(token_id.to_string(), CacheEntry { info, expires_at });
        if map.len() > SOFT_CAP {
            evict_nearest_expiry(&mut map, SOFT_CAP);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drops expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now().timestamp())
    }

    fn sweep_at(&self, now: i64) -> usize {
        let mut map = self.inner.write();
        let before = map.len();
        map.retain(|_, entry| entry.expires_at > now);
        before - map.len()
    }

    /// Background sweep every five minutes.
    pub fn spawn_sweeper(&self) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tick.tick().await;
            loop {
                tick.tick().await;
                let removed = cache.sweep();
                info!(removed, remaining = cache.len(), "market cache sweep");
            }
        });
    }
}

fn evict_nearest_expiry(map: &mut HashMap<String, CacheEntry>, cap: usize) {
    let overflow = map.len().saturating_sub(cap);
    if overflow == 0 {
        return;
    }
    let mut by_expiry: Vec<(String, i64)> = map
        .iter()
        .map(|(k, e)| (k.clone(), e.expires_at))
        .collect();
    by_expiry.sort_by_key(|(_, exp)| *exp);
    for (key, _) in by_expiry.into_iter().take(overflow) {
        map.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn info(question: &str) -> MarketInfo {
        MarketInfo {
            question: question.into(),
            event_title: "event".into(),
            event_slug: "event".into(),
            condition_id: "0xc".into(),
            outcome: "Yes".into(),
            opposite_token_id: "2".into(),
            price: Decimal::ONE,
            end_date: None,
            neg_risk: Some(false),
        }
    }

    #[test]
    fn lookup_respects_expiry() {
        let cache = MarketCache::new();
        cache.insert_with_ttl("tok", info("q"), 300);

        let now = Utc::now().timestamp();
        assert!(cache.lookup_at("tok", now).is_some());
        assert!(cache.lookup_at("tok", now + 301).is_none());
    }

    #[test]
    fn writes_replace_unconditionally() {
        let cache = MarketCache::new();
        cache.insert("tok", info("old"));
        cache.insert("tok", info("new"));
        assert_eq!(cache.lookup("tok").unwrap().question, "new");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = MarketCache::new();
        cache.insert_with_ttl("fresh", info("a"), 600);
        cache.insert_with_ttl("stale", info("b"), 10);

        let now = Utc::now().timestamp();
        assert_eq!(cache.sweep_at(now + 60), 1);
        assert!(cache.lookup_at("fresh", now + 60).is_some());
        assert!(cache.lookup_at("stale", now + 60).is_none());
    }

    #[test]
    fn eviction_prefers_entries_closest_to_expiry() {
        let mut map = HashMap::new();
        for i in 0..10 {
            map.insert(
                format!("tok{i}"),
                CacheEntry {
                    info: info("q"),
                    expires_at: 1000 + i,
                },
            );
        }
        evict_nearest_expiry(&mut map, 7);
        assert_eq!(map.len(), 7);
        // the three earliest expiries are gone
        assert!(!map.contains_key("tok0"));
        assert!(!map.contains_key("tok1"));
        assert!(!map.contains_key("tok2"));
        assert!(map.contains_key("tok9"));
    }
}
