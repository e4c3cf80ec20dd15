//! Authenticated HTTP client for the CLOB and Data APIs.
//!
//! Every request passes through the matching rate-limit bucket, signs with
//! the live credentials (read per request, so credential changes need no
//! cache flush), and retries per error class: transport errors back off
//! exponentially, 429 linearly, 5xx with a fixed pause.

use crate::store::Store;
use crate::venue::error::VenueError;
use crate::venue::rate_limit::{RateLimiter, DEFAULT_ACQUIRE_TIMEOUT_MS};
use crate::venue::signer::OrderType;
use anyhow::{anyhow, Context, Result};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::Utc;
use futures_util::future::join_all;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const CLOB_HOST: &str = "https://clob.polymarket.com";
pub const DATA_HOST: &str = "https://data-api.polymarket.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ATTEMPTS: u32 = 3;
const PAGE_SIZE: usize = 500;
const ACTIVITY_BATCH: usize = 10;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy)]
enum Host {
    Clob,
    Data,
}

/// One price level of a venue order book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    /// Settlement-mode flag; absent means the venue did not say, which
    /// blocks live order building downstream.
    #[serde(default)]
    pub neg_risk: Option<bool>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(|l| l.price).max()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(|l| l.price).min()
    }
}

/// One raw item off the Data API activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityItem {
    #[serde(rename = "type", default)]
    pub activity_type: String,
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: String,
    #[serde(rename = "conditionId", default)]
    pub condition_id: String,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub size: Decimal,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "eventSlug", default)]
    pub event_slug: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostOrderAck {
    #[serde(rename = "orderID", alias = "orderId", alias = "order_id")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "errorMsg", alias = "error", default)]
    pub error_msg: Option<String>,
}

/// Progress callback for the concurrent activity fetch:
/// `(batch, total_batches, items_in_batch)`.
pub type ActivityProgress<'a> = &'a mut (dyn FnMut(usize, usize, &[ActivityItem]) + Send);

#[derive(Clone)]
pub struct VenueClient {
    http: Client,
    store: Store,
    limiter: RateLimiter,
    clob_host: String,
    data_host: String,
}

impl VenueClient {
    pub fn new(store: Store, limiter: RateLimiter) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("polytrader/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            store,
            limiter,
            clob_host: CLOB_HOST.to_string(),
            data_host: DATA_HOST.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // CLOB endpoints
    // ------------------------------------------------------------------

    pub async fn get_server_time(&self) -> Result<i64, VenueError> {
        let v = self.request(Method::GET, Host::Clob, "/time", None, false).await?;
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| VenueError::Transport {
                endpoint: "/time".into(),
                message: "unparseable server time".into(),
            })
    }

    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, VenueError> {
        let path = format!("/book?token_id={token_id}");
        let v = self.request(Method::GET, Host::Clob, &path, None, false).await?;
        serde_json::from_value(v).map_err(|e| VenueError::Transport {
            endpoint: "/book".into(),
            message: format!("bad order book payload: {e}"),
        })
    }

    pub async fn get_midpoint(&self, token_id: &str) -> Result<Option<Decimal>, VenueError> {
        let path = format!("/midpoint?token_id={token_id}");
        let v = self.request(Method::GET, Host::Clob, &path, None, false).await?;
        Ok(extract_decimal(&v, "mid"))
    }

    pub async fn get_price(&self, token_id: &str, side: &str) -> Result<Option<Decimal>, VenueError> {
        let path = format!("/price?token_id={token_id}&side={side}");
        let v = self.request(Method::GET, Host::Clob, &path, None, false).await?;
        Ok(extract_decimal(&v, "price"))
    }

    /// Collateral balance in dollars (the venue reports micro-USDC).
    pub async fn get_balance(&self) -> Result<Decimal, VenueError> {
        let path = "/balance-allowance?asset_type=COLLATERAL&signature_type=2";
        let v = self.request(Method::GET, Host::Clob, path, None, true).await?;
        let micro = extract_decimal(&v, "balance").unwrap_or_default();
        Ok(micro / Decimal::from(1_000_000))
    }

    /// Submit a signed order. Venue-side rejections surface as errors even
    /// on HTTP 200.
    pub async fn post_order(
        &self,
        signed_order: serde_json::Value,
        order_type: OrderType,
    ) -> Result<PostOrderAck, VenueError> {
        let creds = self.store.get_credentials().await.map_err(|e| {
            VenueError::Auth {
                endpoint: "/order".into(),
                reason: e.to_string(),
            }
        })?;
        let body = serde_json::json!({
            "order": signed_order,
            "owner": creds.api_key,
            "orderType": order_type.as_str(),
        });
        let v = self
            .request(Method::POST, Host::Clob, "/order", Some(body), true)
            .await?;
        let ack: PostOrderAck = serde_json::from_value(v).map_err(|e| VenueError::Transport {
            endpoint: "/order".into(),
            message: format!("bad order ack payload: {e}"),
        })?;

        if let Some(err) = ack.error_msg.as_deref() {
            if !err.is_empty() {
                return Err(VenueError::BadRequest {
                    status: 400,
                    endpoint: "/order".into(),
                    reason: err.to_string(),
                });
            }
        }
        Ok(ack)
    }

    /// Authenticated operator trade history, filtered by maker or taker.
    pub async fn get_clob_trades(
        &self,
        role: &str,
        address: &str,
    ) -> Result<Vec<serde_json::Value>, VenueError> {
        let path = format!("/data/trades?{role}={address}");
        let v = self.request(Method::GET, Host::Clob, &path, None, true).await?;
        serde_json::from_value(v).map_err(|e| VenueError::Transport {
            endpoint: "/data/trades".into(),
            message: format!("bad trades payload: {e}"),
        })
    }

    pub async fn get_clob_market(
        &self,
        condition_id: &str,
    ) -> Result<serde_json::Value, VenueError> {
        let path = format!("/markets/{condition_id}");
        self.request(Method::GET, Host::Clob, &path, None, false).await
    }

    // ------------------------------------------------------------------
    // Data API endpoints
    // ------------------------------------------------------------------

    /// One page of the activity feed, newest first.
    pub async fn get_activity(
        &self,
        address: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ActivityItem>, VenueError> {
        let path = format!("/activity?user={address}&limit={limit}&offset={offset}");
        let v = self.request(Method::GET, Host::Data, &path, None, false).await?;
        serde_json::from_value(v).map_err(|e| VenueError::Transport {
            endpoint: "/activity".into(),
            message: format!("bad activity payload: {e}"),
        })
    }

    /// Potentially very large fetch: probe one page, then fan out the
    /// remaining pages in rolling batches. Failures mid-flight return the
    /// partially-fetched set instead of dropping progress.
    pub async fn fetch_all_activity(
        &self,
        address: &str,
        max: usize,
        mut progress: Option<ActivityProgress<'_>>,
    ) -> Result<Vec<ActivityItem>, VenueError> {
        let first = self.get_activity(address, PAGE_SIZE, 0).await?;
        let short = first.len() < PAGE_SIZE;
        let mut all = first;
        if short || max <= PAGE_SIZE {
            return Ok(all);
        }

        let offsets = remaining_page_offsets(max, PAGE_SIZE);
        let total_batches = offsets.len().div_ceil(ACTIVITY_BATCH);

        for (batch_idx, chunk) in offsets.chunks(ACTIVITY_BATCH).enumerate() {
            let fetches = chunk
                .iter()
                .map(|&offset| self.get_activity(address, PAGE_SIZE, offset));
            let pages = join_all(fetches).await;

            let mut batch_items = Vec::new();
            let mut stop = false;
            for page in pages {
                match page {
                    Ok(items) => {
                        if items.len() < PAGE_SIZE {
                            stop = true;
                        }
                        batch_items.extend(items);
                    }
                    Err(e) => {
                        warn!(error = %e, "activity page failed, keeping partial results");
                        stop = true;
                    }
                }
            }

            if let Some(cb) = progress.as_mut() {
                cb(batch_idx + 1, total_batches, &batch_items);
            }
            all.extend(batch_items);
            if stop {
                break;
            }
        }

        Ok(all)
    }

    pub async fn get_positions(&self, address: &str) -> Result<Vec<serde_json::Value>, VenueError> {
        self.paged_data("/positions", address).await
    }

    pub async fn get_closed_positions(
        &self,
        address: &str,
    ) -> Result<Vec<serde_json::Value>, VenueError> {
        self.paged_data("/closed-positions", address).await
    }

    /// Offset/limit walk for the bounded Data endpoints; stops on the
    /// first short page.
    async fn paged_data(
        &self,
        endpoint: &str,
        address: &str,
    ) -> Result<Vec<serde_json::Value>, VenueError> {
        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let path = format!("{endpoint}?user={address}&limit={PAGE_SIZE}&offset={offset}");
            let v = self.request(Method::GET, Host::Data, &path, None, false).await?;
            let page: Vec<serde_json::Value> =
                serde_json::from_value(v).map_err(|e| VenueError::Transport {
                    endpoint: endpoint.into(),
                    message: format!("bad page payload: {e}"),
                })?;
            let short = page.len() < PAGE_SIZE;
            all.extend(page);
            if short {
                return Ok(all);
            }
            offset += PAGE_SIZE;
        }
    }

    // ------------------------------------------------------------------
    // Core request path
    // ------------------------------------------------------------------

    async fn request(
        &self,
        method: Method,
        host: Host,
        path_and_query: &str,
        body: Option<serde_json::Value>,
        authed: bool,
    ) -> Result<serde_json::Value, VenueError> {
        let (base, bucket) = match host {
            Host::Clob => (self.clob_host.as_str(), super::rate_limit::BUCKET_CLOB),
            Host::Data => (self.data_host.as_str(), super::rate_limit::BUCKET_DATA),
        };
        let url = format!("{base}{path_and_query}");
        let body_str = body
            .as_ref()
            .map(|b| serde_json::to_string(b).unwrap_or_default());

        let mut last_err = VenueError::Transport {
            endpoint: path_and_query.to_string(),
            message: "no attempt made".into(),
        };

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter
                .acquire(bucket, DEFAULT_ACQUIRE_TIMEOUT_MS)
                .await
                .map_err(|e| VenueError::Timeout(e.to_string()))?;

            let mut req = self.http.request(method.clone(), &url);
            if authed {
                match self
                    .auth_headers(method.as_str(), path_and_query, body_str.as_deref())
                    .await
                {
                    Some(headers) => {
                        for (k, v) in headers {
                            req = req.header(k, v);
                        }
                    }
                    None => {
                        warn!(endpoint = %path_and_query, "credentials incomplete, sending unsigned request");
                    }
                }
            }
            if let Some(b) = body_str.as_deref() {
                req = req
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(b.to_string());
            }

            let outcome = match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let text = resp.text().await.unwrap_or_default();
                        return serde_json::from_str(&text).map_err(|e| VenueError::Transport {
                            endpoint: path_and_query.to_string(),
                            message: format!("invalid json: {e}"),
                        });
                    }
                    let reason = resp.text().await.unwrap_or_default();
                    Err(VenueError::from_status(
                        status.as_u16(),
                        path_and_query,
                        reason,
                    ))
                }
                Err(e) => Err(VenueError::Transport {
                    endpoint: path_and_query.to_string(),
                    message: e.to_string(),
                }),
            };

            match outcome {
                Ok(v) => return Ok(v),
                Err(e) => {
                    match backoff_for(&e, attempt) {
                        Some(delay) if attempt < MAX_ATTEMPTS => {
                            debug!(endpoint = %path_and_query, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying request");
                            sleep(delay).await;
                            last_err = e;
                        }
                        _ => return Err(e),
                    }
                }
            }
        }

        Err(last_err)
    }

    /// L2 auth headers, or `None` when the stored credentials are missing
    /// a required part.
    async fn auth_headers(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<&str>,
    ) -> Option<Vec<(String, String)>> {
        let creds = self.store.get_credentials().await.ok()?;
        if !creds.configured() {
            return None;
        }

        let timestamp = Utc::now().timestamp();
        let message = signing_message(timestamp, method, path_and_query, body);
        let signature = match hmac_signature(&creds.api_secret, &message) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to sign request");
                return None;
            }
        };

        let address = creds
            .signer_address
            .clone()
            .unwrap_or_else(|| creds.wallet_address.clone());

        Some(vec![
            ("POLY_ADDRESS".to_string(), address),
            ("POLY_SIGNATURE".to_string(), signature),
            ("POLY_TIMESTAMP".to_string(), timestamp.to_string()),
            ("POLY_API_KEY".to_string(), creds.api_key),
            ("POLY_PASSPHRASE".to_string(), creds.api_passphrase),
        ])
    }
}

/// `timestamp ‖ method ‖ path [‖ body]`, timestamp in whole seconds.
fn signing_message(timestamp: i64, method: &str, path: &str, body: Option<&str>) -> String {
    match body {
        Some(b) => format!("{timestamp}{method}{path}{b}"),
        None => format!("{timestamp}{method}{path}"),
    }
}

/// HMAC-SHA256 over the message with the base64-decoded secret, returned
/// url-safe base64 encoded. Secrets are url-safe base64 themselves, with a
/// standard-alphabet fallback.
fn hmac_signature(secret_b64: &str, message: &str) -> Result<String> {
    let secret = URL_SAFE
        .decode(secret_b64)
        .or_else(|_| URL_SAFE_NO_PAD.decode(secret_b64))
        .or_else(|_| BASE64.decode(secret_b64))
        .context("decode api secret")?;

    let mut mac =
        HmacSha256::new_from_slice(&secret).map_err(|e| anyhow!("hmac key error: {e}"))?;
    mac.update(message.as_bytes());
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Retry schedule per §error class. `None` means the class never retries.
fn backoff_for(error: &VenueError, attempt: u32) -> Option<Duration> {
    match error {
        VenueError::Transport { .. } => {
            let ms = (500 * (attempt as u64).pow(2)).min(5_000);
            Some(Duration::from_millis(ms))
        }
        VenueError::RateLimited { .. } => Some(Duration::from_millis(2_000 * attempt as u64)),
        VenueError::ServerFault { .. } => Some(Duration::from_millis(1_000)),
        _ => None,
    }
}

/// Offsets of the pages after the probe page.
fn remaining_page_offsets(max: usize, page_size: usize) -> Vec<usize> {
    let total_pages = max.div_ceil(page_size);
    (1..total_pages).map(|p| p * page_size).collect()
}

fn extract_decimal(v: &serde_json::Value, key: &str) -> Option<Decimal> {
    use std::str::FromStr;
    match v.get(key) {
        Some(serde_json::Value::String(s)) => Decimal::from_str(s).ok(),
        Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn signing_message_concatenates_in_order() {
        assert_eq!(
            signing_message(1700000000, "GET", "/balance-allowance?asset_type=COLLATERAL", None),
            "1700000000GET/balance-allowance?asset_type=COLLATERAL"
        );
        assert_eq!(
            signing_message(1, "POST", "/order", Some("{\"a\":1}")),
            "1POST/order{\"a\":1}"
        );
    }

    #[test]
    fn hmac_signature_is_urlsafe_and_deterministic() {
        let secret = URL_SAFE.encode(b"super-secret-hmac-key");
        let a = hmac_signature(&secret, "1700000000GET/time").unwrap();
        let b = hmac_signature(&secret, "1700000000GET/time").unwrap();
        let c = hmac_signature(&secret, "1700000001GET/time").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn hmac_signature_accepts_standard_base64_secret() {
        // '+' and '/' only appear in the standard alphabet
        let secret = BASE64.encode((0u8..=255).collect::<Vec<_>>());
        assert!(secret.contains('+') || secret.contains('/'));
        hmac_signature(&secret, "msg").unwrap();
    }

    #[test]
    fn backoff_schedule_per_class() {
        let transport = VenueError::Transport {
            endpoint: "/x".into(),
            message: "reset".into(),
        };
        assert_eq!(backoff_for(&transport, 1), Some(Duration::from_millis(500)));
        assert_eq!(backoff_for(&transport, 2), Some(Duration::from_millis(2000)));
        // capped at 5 s
        assert_eq!(backoff_for(&transport, 4), Some(Duration::from_millis(5000)));

        let limited = VenueError::RateLimited { endpoint: "/x".into() };
        assert_eq!(backoff_for(&limited, 2), Some(Duration::from_millis(4000)));

        let fault = VenueError::ServerFault {
            status: 502,
            endpoint: "/x".into(),
            reason: String::new(),
        };
        assert_eq!(backoff_for(&fault, 3), Some(Duration::from_millis(1000)));

        let bad = VenueError::BadRequest {
            status: 404,
            endpoint: "/x".into(),
            reason: String::new(),
        };
        assert_eq!(backoff_for(&bad, 1), None);
    }

    #[test]
    fn page_plan_excludes_probe_page() {
        assert!(remaining_page_offsets(500, 500).is_empty());
        assert_eq!(remaining_page_offsets(1500, 500), vec![500, 1000]);
        assert_eq!(remaining_page_offsets(1200, 500), vec![500, 1000]);
    }

    #[test]
    fn order_book_best_levels() {
        let book: OrderBook = serde_json::from_str(
            r#"{"market":"0xc","asset_id":"1","bids":[{"price":"0.45","size":"10"},{"price":"0.47","size":"5"}],
                "asks":[{"price":"0.52","size":"7"},{"price":"0.50","size":"3"}],"neg_risk":true}"#,
        )
        .unwrap();
        assert_eq!(book.best_bid(), Some(Decimal::from_str("0.47").unwrap()));
        assert_eq!(book.best_ask(), Some(Decimal::from_str("0.50").unwrap()));
        assert_eq!(book.neg_risk, Some(true));

        let empty: OrderBook = serde_json::from_str(r#"{"bids":[],"asks":[]}"#).unwrap();
        assert_eq!(empty.best_bid(), None);
        assert_eq!(empty.neg_risk, None);
    }

    #[test]
    fn activity_item_parses_venue_shapes() {
        let item: ActivityItem = serde_json::from_str(
            r#"{"type":"TRADE","transactionHash":"0xhash1","conditionId":"0xc","asset":"123",
                "side":"BUY","size":100.5,"price":0.9,"outcome":"Yes","title":"Will it?",
                "eventSlug":"will-it","timestamp":1700000000}"#,
        )
        .unwrap();
        assert_eq!(item.activity_type, "TRADE");
        assert_eq!(item.size, Decimal::from_str("100.5").unwrap());
        assert_eq!(item.price, Decimal::from_str("0.9").unwrap());

        // non-trade rows with missing fields still parse
        let sparse: ActivityItem = serde_json::from_str(r#"{"type":"REDEEM"}"#).unwrap();
        assert_eq!(sparse.activity_type, "REDEEM");
        assert_eq!(sparse.size, Decimal::ZERO);
    }

    #[test]
    fn extract_decimal_reads_strings_and_numbers() {
        let v = serde_json::json!({"mid": "0.515", "balance": 12500000});
        assert_eq!(extract_decimal(&v, "mid"), Some(Decimal::from_str("0.515").unwrap()));
        assert_eq!(extract_decimal(&v, "balance"), Some(Decimal::from(12500000)));
        assert_eq!(extract_decimal(&v, "missing"), None);
    }
}
