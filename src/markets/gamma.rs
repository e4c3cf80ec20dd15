//! Gamma API wrapper: event/market discovery and single-token lookups.
//!
//! Gamma is inconsistent about array fields (`clobTokenIds`, `outcomes`,
//! `outcomePrices` arrive either as JSON arrays or as JSON-encoded
//! strings), so parsing accepts both shapes.

use crate::markets::cache::MarketCache;
use crate::models::MarketInfo;
use crate::venue::rate_limit::{RateLimiter, BUCKET_GAMMA, DEFAULT_ACQUIRE_TIMEOUT_MS};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const GAMMA_HOST: &str = "https://gamma-api.polymarket.com";
pub const SEARCH_HOST: &str = "https://search-api.polymarket.com";

const DISCOVERY_PAGE_LIMIT: usize = 100;

/// Markets that resolve on a short clock, keyed by the venue's tag slugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    M15,
    H1,
    H4,
    Weekly,
}

impl Interval {
    pub fn tag_slug(&self) -> &'static str {
        match self {
            Interval::M15 => "15M",
            Interval::H1 => "1H",
            Interval::H4 => "4h",
            Interval::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "15m" => Some(Interval::M15),
            "1h" => Some(Interval::H1),
            "4h" => Some(Interval::H4),
            "weekly" => Some(Interval::Weekly),
            _ => None,
        }
    }

    /// `(min_minutes, max_minutes)` window to resolution.
    pub fn window_minutes(&self) -> (i64, i64) {
        match self {
            Interval::M15 => (0, 15),
            Interval::H1 => (0, 60),
            Interval::H4 => (0, 240),
            Interval::Weekly => (0, 7 * 24 * 60),
        }
    }
}

/// Heuristic market filter; matched against event title and question.
const CRYPTO_KEYWORDS: &[&str] = &[
    "bitcoin", "btc", "ethereum", "eth", "crypto", "solana", "sol", "xrp", "doge", "dogecoin",
    "bnb", "cardano", "ada", "polygon", "matic", "avalanche", "avax", "chainlink", "link",
    "uniswap", "uni",
];

pub(crate) fn is_crypto_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| CRYPTO_KEYWORDS.contains(&word))
}

fn de_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect()),
        // Some responses return JSON arrays as a string (e.g. "[\"Yes\",\"No\"]").
        Value::String(s) => serde_json::from_str::<Vec<String>>(&s).map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaEvent {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    #[serde(default)]
    pub question: String,
    #[serde(rename = "conditionId", default)]
    pub condition_id: String,
    #[serde(default)]
    pub slug: String,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(rename = "enableOrderBook", default)]
    pub enable_order_book: Option<bool>,
    #[serde(rename = "negRisk", default)]
    pub neg_risk: Option<bool>,
    #[serde(rename = "clobTokenIds", default, deserialize_with = "de_string_vec")]
    pub clob_token_ids: Vec<String>,
    #[serde(default, deserialize_with = "de_string_vec")]
    pub outcomes: Vec<String>,
    #[serde(rename = "outcomePrices", default, deserialize_with = "de_string_vec")]
    pub outcome_prices: Vec<String>,
    /// Present on `/markets` lookups: the owning events.
    #[serde(default)]
    pub events: Vec<GammaEventStub>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaEventStub {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub slug: String,
}

/// One subscribable token produced by discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredToken {
    pub token_id: String,
    pub info: MarketInfo,
}

#[derive(Clone)]
pub struct GammaClient {
    http: reqwest::Client,
    limiter: RateLimiter,
    cache: MarketCache,
    host: String,
}

impl GammaClient {
    pub fn new(limiter: RateLimiter, cache: MarketCache) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("polytrader/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            limiter,
            cache,
            host: GAMMA_HOST.to_string(),
        }
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value> {
        self.limiter
            .acquire(BUCKET_GAMMA, DEFAULT_ACQUIRE_TIMEOUT_MS)
            .await
            .context("gamma rate limit")?;
        let url = format!("{}{path_and_query}", self.host);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("gamma request {path_and_query}"))?
            .error_for_status()
            .with_context(|| format!("gamma status {path_and_query}"))?;
        resp.json().await.context("gamma json")
    }

    /// Open events ordered by 24 h volume, optionally narrowed to one
    /// time-to-resolution tag.
    pub async fn fetch_events(
        &self,
        tag_slug: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GammaEvent>> {
        let mut path = format!(
            "/events?closed=false&active=true&limit={limit}&offset={offset}&order=volume24hr&ascending=false"
        );
        if let Some(tag) = tag_slug {
            path.push_str(&format!("&tag_slug={tag}"));
        }
        let v = self.get_json(&path).await?;
        serde_json::from_value(v).context("parse gamma events")
    }

    pub async fn fetch_event_by_slug(&self, slug: &str) -> Result<Option<GammaEvent>> {
        let v = self.get_json(&format!("/events/slug/{slug}")).await?;
        if v.is_null() {
            return Ok(None);
        }
        let event: GammaEvent = serde_json::from_value(v).context("parse gamma event")?;
        Ok(Some(event))
    }

    /// Crypto markets resolving within the interval's window, expanded to
    /// per-token entries.
    pub async fn fetch_expiring(
        &self,
        interval: Interval,
        min_minutes: i64,
        max_minutes: i64,
    ) -> Result<Vec<DiscoveredToken>> {
        let events = self
            .fetch_events(Some(interval.tag_slug()), DISCOVERY_PAGE_LIMIT, 0)
            .await?;
        let mut seen = HashSet::new();
        Ok(expand_events(
            events,
            Utc::now(),
            min_minutes,
            max_minutes,
            &mut seen,
        ))
    }

    /// The combined entry point: queries every requested interval,
    /// deduplicates by event slug and sorts by end date.
    pub async fn discover(&self, intervals: &[Interval]) -> Result<Vec<DiscoveredToken>> {
        let mut seen = HashSet::new();
        let mut tokens = Vec::new();
        for interval in intervals {
            let (min_minutes, max_minutes) = interval.window_minutes();
            match self
                .fetch_events(Some(interval.tag_slug()), DISCOVERY_PAGE_LIMIT, 0)
                .await
            {
                Ok(events) => {
                    tokens.extend(expand_events(
                        events,
                        Utc::now(),
                        min_minutes,
                        max_minutes,
                        &mut seen,
                    ));
                }
                Err(e) => {
                    warn!(interval = interval.tag_slug(), error = %e, "discovery interval failed");
                }
            }
        }
        tokens.sort_by_key(|t| t.info.end_date);
        debug!(count = tokens.len(), "discovery produced tokens");
        Ok(tokens)
    }

    /// Free-text event search for the manual market picker.
    pub async fn search_events(&self, text: &str, limit: usize) -> Result<Value> {
        // the search host has no bucket of its own; the limiter lets
        // unknown names through after one warning
        self.limiter
            .acquire("search", DEFAULT_ACQUIRE_TIMEOUT_MS)
            .await
            .context("search rate limit")?;
        let resp = self
            .http
            .get(format!("{SEARCH_HOST}/search"))
            .query(&[
                ("text", text),
                ("type", "events"),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .context("search request")?
            .error_for_status()
            .context("search status")?;
        resp.json().await.context("search json")
    }

    /// Cache-first single token lookup.
    pub async fn lookup_token(&self, token_id: &str) -> Result<Option<MarketInfo>> {
        if let Some(info) = self.cache.lookup(token_id) {
            return Ok(Some(info));
        }

        let v = self
            .get_json(&format!("/markets?clob_token_ids={token_id}"))
            .await?;
        let markets: Vec<GammaMarket> = serde_json::from_value(v).context("parse gamma markets")?;
        let Some(market) = markets.into_iter().next() else {
            return Ok(None);
        };

        let (event_title, event_slug) = market
            .events
            .first()
            .map(|e| (e.title.clone(), e.slug.clone()))
            .unwrap_or_default();

        let Some(token) = market_token_info(&market, token_id, &event_title, &event_slug) else {
            return Ok(None);
        };

        self.cache.insert(token_id, token.info.clone());
        Ok(Some(token.info))
    }
}

fn within_window(
    end_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_minutes: i64,
    max_minutes: i64,
) -> bool {
    let Some(end) = end_date else {
        return false;
    };
    let minutes = (end - now).num_minutes();
    minutes > min_minutes && minutes <= max_minutes
}

/// Derive the per-token view of a binary market, with the reciprocal
/// opposite token id.
fn market_token_info(
    market: &GammaMarket,
    token_id: &str,
    event_title: &str,
    event_slug: &str,
) -> Option<DiscoveredToken> {
    if market.clob_token_ids.len() != 2 {
        return None;
    }
    let idx = market.clob_token_ids.iter().position(|t| t == token_id)?;
    let opposite = market.clob_token_ids[1 - idx].clone();
    let outcome = market.outcomes.get(idx).cloned().unwrap_or_default();
    let price = market
        .outcome_prices
        .get(idx)
        .and_then(|p| Decimal::from_str(p).ok())
        .unwrap_or_default();

    Some(DiscoveredToken {
        token_id: token_id.to_string(),
        info: MarketInfo {
            question: market.question.clone(),
            event_title: event_title.to_string(),
            event_slug: event_slug.to_string(),
            condition_id: market.condition_id.clone(),
            outcome,
            opposite_token_id: opposite,
            price,
            end_date: market.end_date,
            neg_risk: market.neg_risk,
        },
    })
}

/// Apply the discovery filters and expand each surviving binary market
/// into its two token entries. `seen` deduplicates events across calls.
fn expand_events(
    events: Vec<GammaEvent>,
    now: DateTime<Utc>,
    min_minutes: i64,
    max_minutes: i64,
    seen: &mut HashSet<String>,
) -> Vec<DiscoveredToken> {
    let mut out = Vec::new();
    for event in events {
        if !seen.insert(event.slug.clone()) {
            continue;
        }
        for market in &event.markets {
            if market.enable_order_book != Some(true) {
                continue;
            }
            if !is_crypto_text(&event.title) && !is_crypto_text(&market.question) {
                continue;
            }
            let end_date = market.end_date.or(event.end_date);
            if !within_window(end_date, now, min_minutes, max_minutes) {
                continue;
            }
            for token_id in &market.clob_token_ids {
                if let Some(mut token) =
                    market_token_info(market, token_id, &event.title, &event.slug)
                {
                    token.info.end_date = end_date;
                    out.push(token);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn string_or_array_fields_both_parse() {
        let as_arrays: GammaMarket = serde_json::from_str(
            r#"{"question":"Q","conditionId":"0xc","clobTokenIds":["1","2"],
                "outcomes":["Yes","No"],"outcomePrices":["0.6","0.4"],"enableOrderBook":true}"#,
        )
        .unwrap();
        assert_eq!(as_arrays.clob_token_ids, vec!["1", "2"]);

        let as_strings: GammaMarket = serde_json::from_str(
            r#"{"question":"Q","conditionId":"0xc","clobTokenIds":"[\"1\",\"2\"]",
                "outcomes":"[\"Yes\",\"No\"]","outcomePrices":"[\"0.6\",\"0.4\"]"}"#,
        )
        .unwrap();
        assert_eq!(as_strings.clob_token_ids, vec!["1", "2"]);
        assert_eq!(as_strings.outcomes, vec!["Yes", "No"]);
        assert_eq!(as_strings.outcome_prices, vec!["0.6", "0.4"]);
    }

    #[test]
    fn crypto_keyword_matching_is_word_based() {
        assert!(is_crypto_text("Bitcoin above $100k by Friday?"));
        assert!(is_crypto_text("Will ETH flip BTC?"));
        assert!(is_crypto_text("solana all-time high"));
        assert!(!is_crypto_text("Will the solution be found?"));
        assert!(!is_crypto_text("US election winner"));
    }

    #[test]
    fn window_filter_is_half_open() {
        let now = Utc::now();
        let in_10 = Some(now + ChronoDuration::minutes(10));
        let in_20 = Some(now + ChronoDuration::minutes(20));
        let past = Some(now - ChronoDuration::minutes(5));

        assert!(within_window(in_10, now, 0, 15));
        assert!(!within_window(in_20, now, 0, 15));
        assert!(!within_window(past, now, 0, 15));
        assert!(!within_window(None, now, 0, 15));
    }

    fn sample_event(slug: &str, title: &str, minutes_out: i64) -> GammaEvent {
        let end = Utc::now() + ChronoDuration::minutes(minutes_out);
        GammaEvent {
            slug: slug.into(),
            title: title.into(),
            end_date: Some(end),
            markets: vec![GammaMarket {
                question: format!("{title}?"),
                condition_id: "0xc".into(),
                slug: format!("{slug}-m"),
                end_date: Some(end),
                enable_order_book: Some(true),
                neg_risk: Some(false),
                clob_token_ids: vec!["100".into(), "200".into()],
                outcomes: vec!["Yes".into(), "No".into()],
                outcome_prices: vec!["0.7".into(), "0.3".into()],
                events: vec![],
            }],
        }
    }

    #[test]
    fn expansion_yields_reciprocal_token_pair() {
        let mut seen = HashSet::new();
        let tokens = expand_events(
            vec![sample_event("btc-updown", "Bitcoin up or down", 10)],
            Utc::now(),
            0,
            15,
            &mut seen,
        );
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].token_id, "100");
        assert_eq!(tokens[0].info.opposite_token_id, "200");
        assert_eq!(tokens[1].token_id, "200");
        assert_eq!(tokens[1].info.opposite_token_id, "100");
        assert_eq!(tokens[0].info.outcome, "Yes");
        assert_eq!(tokens[1].info.outcome, "No");
    }

    #[test]
    fn expansion_filters_and_dedupes() {
        let mut seen = HashSet::new();
        let mut no_book = sample_event("eth-flip", "Ethereum flip", 10);
        no_book.markets[0].enable_order_book = Some(false);

        let tokens = expand_events(
            vec![
                sample_event("btc-updown", "Bitcoin up or down", 10),
                // duplicate slug: ignored
                sample_event("btc-updown", "Bitcoin up or down", 10),
                // not crypto: ignored
                sample_event("weather", "Rain tomorrow", 10),
                // outside the window: ignored
                sample_event("sol-late", "Solana later", 300),
                // no order book: ignored
                no_book,
            ],
            Utc::now(),
            0,
            15,
            &mut seen,
        );
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|t| t.info.event_slug == "btc-updown"));
    }

    #[test]
    fn token_lookup_by_index() {
        let market: GammaMarket = serde_json::from_str(
            r#"{"question":"Q","conditionId":"0xc","clobTokenIds":["1","2"],
                "outcomes":["Yes","No"],"outcomePrices":["0.6","0.4"],"negRisk":true}"#,
        )
        .unwrap();
        let token = market_token_info(&market, "2", "Event", "event").unwrap();
        assert_eq!(token.info.outcome, "No");
        assert_eq!(token.info.opposite_token_id, "1");
        assert_eq!(token.info.price, Decimal::from_str("0.4").unwrap());
        assert_eq!(token.info.neg_risk, Some(true));

        assert!(market_token_info(&market, "999", "Event", "event").is_none());
    }

    #[test]
    fn interval_slugs_and_windows() {
        assert_eq!(Interval::M15.tag_slug(), "15M");
        assert_eq!(Interval::H1.tag_slug(), "1H");
        assert_eq!(Interval::H4.tag_slug(), "4h");
        assert_eq!(Interval::Weekly.tag_slug(), "weekly");
        assert_eq!(Interval::parse("15M"), Some(Interval::M15));
        assert_eq!(Interval::parse("nope"), None);
        assert_eq!(Interval::H1.window_minutes(), (0, 60));
    }
}
