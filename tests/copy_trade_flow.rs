//! End-to-end copy-trading flow against a real (temp) database: settings,
//! the duplicate gate, retry transitions and position bookkeeping.

use polytrader::bus::{EventBus, TOPIC_COPY_TRADING};
use polytrader::copy::CopyExecutor;
use polytrader::models::{CopyTradeStatus, Side, WalletTrade};
use polytrader::store::{SettingsUpdate, SizingMode, Store};
use polytrader::venue::{RateLimiter, VenueClient};
use rust_decimal::Decimal;
use std::str::FromStr;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("itest.db");
    let store = Store::open(path.to_str().unwrap()).expect("open store");
    (store, dir)
}

fn wallet_trade(id: &str, side: Side, size: &str, price: &str) -> WalletTrade {
    WalletTrade {
        id: id.to_string(),
        market: "0xcondition".into(),
        asset_id: "7000123".into(),
        side,
        size: d(size),
        price: d(price),
        outcome: "Yes".into(),
        title: "Will bitcoin close above 100k?".into(),
        event_slug: "btc-close-100k".into(),
        timestamp: 1_700_000_000,
    }
}

#[tokio::test]
async fn duplicate_activity_produces_exactly_one_copy() {
    let (store, _dir) = temp_store();
    let bus = EventBus::default();
    let client = VenueClient::new(store.clone(), RateLimiter::spawn());
    let executor = CopyExecutor::new(store.clone(), client, bus.clone());

    store
        .update_copy_settings(SettingsUpdate {
            sizing_mode: Some(SizingMode::Fixed),
            fixed_amount: Some(d("10")),
            enabled: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut events = bus.subscribe(TOPIC_COPY_TRADING);

    let trade = wallet_trade("0xhash1", Side::Buy, "100", "0.9");
    let row = executor.execute_copy("0xabc", &trade, false).await.unwrap();
    // $10 at 0.9 is ~11.1 shares, above the 5-share venue minimum
    assert_eq!(row.copy_size.round_dp(3), d("11.111"));
    assert_eq!(row.original_trade_id, "0xhash1");

    // the terminal outcome is broadcast for the UI
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, "copy_trade_executed");

    // the same activity delivered again changes nothing
    assert!(executor.execute_copy("0xabc", &trade, false).await.is_err());
    let rows = store.list_copy_trades(50).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].original_trade_id, "0xhash1");
}

#[tokio::test]
async fn small_copies_clamp_to_venue_minimum() {
    let (store, _dir) = temp_store();
    let bus = EventBus::default();
    let client = VenueClient::new(store.clone(), RateLimiter::spawn());
    let executor = CopyExecutor::new(store.clone(), client, bus);

    store
        .update_copy_settings(SettingsUpdate {
            sizing_mode: Some(SizingMode::Fixed),
            fixed_amount: Some(d("1")),
            enabled: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

    let trade = wallet_trade("0xhash2", Side::Buy, "3", "0.5");
    let row = executor.execute_copy("0xabc", &trade, false).await.unwrap();
    assert_eq!(row.copy_size, d("5"));
}

#[tokio::test]
async fn retry_without_credentials_keeps_row_retryable() {
    let (store, _dir) = temp_store();
    let bus = EventBus::default();
    let client = VenueClient::new(store.clone(), RateLimiter::spawn());
    let executor = CopyExecutor::new(store.clone(), client, bus);

    let trade = wallet_trade("0xhash3", Side::Sell, "40", "0.25");
    let row = executor.execute_copy("0xabc", &trade, true).await.unwrap();
    assert_eq!(row.status, CopyTradeStatus::Simulated);

    // retry is refused while credentials are missing, and the row stays
    let err = executor.retry(&row.id).await.unwrap_err();
    assert!(err.to_string().contains("credentials_not_configured"));
    let fetched = store.get_copy_trade(&row.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, CopyTradeStatus::Simulated);
}

#[tokio::test]
async fn position_bookkeeping_round_trip() {
    let (store, _dir) = temp_store();

    // buys at mixed prices, then partial sells
    store.apply_fill(1, "tok", Side::Buy, d("10"), d("0.40")).await.unwrap();
    store.apply_fill(1, "tok", Side::Buy, d("30"), d("0.60")).await.unwrap();
    store.apply_fill(1, "tok", Side::Sell, d("15"), d("0.80")).await.unwrap();

    let position = store.get_position(1, "tok").await.unwrap().unwrap();
    assert_eq!(position.size, d("25"));
    // (10*0.40 + 30*0.60) / 40 = 0.55, untouched by the sell
    assert_eq!(position.avg_price, d("0.55"));
}
