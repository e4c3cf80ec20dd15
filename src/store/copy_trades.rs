//! Copied trades. The unique index on `original_trade_id` is the
//! anti-duplication invariant: inserts for an already-seen source trade
//! are silently refused and reported to the caller.

use super::{dec_from_sql, dec_to_sql, Store};
use crate::models::{CopyTradeStatus, Side};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CopyTrade {
    pub id: String,
    pub source_address: String,
    pub original_trade_id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    pub original_size: Decimal,
    pub original_price: Decimal,
    pub copy_size: Decimal,
    pub status: CopyTradeStatus,
    pub executed_at: Option<i64>,
    pub error_message: Option<String>,
    pub title: String,
    pub outcome: String,
    pub event_slug: String,
    pub inserted_at: i64,
}

fn row_to_copy_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<CopyTrade> {
    let side: String = row.get(5)?;
    let original_size: String = row.get(6)?;
    let original_price: String = row.get(7)?;
    let copy_size: String = row.get(8)?;
    let status: String = row.get(9)?;
    Ok(CopyTrade {
        id: row.get(0)?,
        source_address: row.get(1)?,
        original_trade_id: row.get(2)?,
        market: row.get(3)?,
        asset_id: row.get(4)?,
        side: Side::parse(&side).unwrap_or(Side::Buy),
        original_size: dec_from_sql(&original_size),
        original_price: dec_from_sql(&original_price),
        copy_size: dec_from_sql(&copy_size),
        status: CopyTradeStatus::parse(&status).unwrap_or(CopyTradeStatus::Failed),
        executed_at: row.get(10)?,
        error_message: row.get(11)?,
        title: row.get(12)?,
        outcome: row.get(13)?,
        event_slug: row.get(14)?,
        inserted_at: row.get(15)?,
    })
}

const COPY_TRADE_COLS: &str = "id, source_address, original_trade_id, market, asset_id, side, \
     original_size, original_price, copy_size, status, executed_at, error_message, \
     title, outcome, event_slug, inserted_at";

impl Store {
    /// Idempotent insert keyed on `original_trade_id`. Returns `false`
    /// when a row for that source trade already exists.
    pub async fn insert_copy_trade(&self, trade: &CopyTrade) -> Result<bool> {
        let conn = self.conn().await;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO copy_trades
                    (id, source_address, original_trade_id, market, asset_id, side,
                     original_size, original_price, copy_size, status, executed_at,
                     error_message, title, outcome, event_slug, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    trade.id,
                    trade.source_address,
                    trade.original_trade_id,
                    trade.market,
                    trade.asset_id,
                    trade.side.as_str(),
                    dec_to_sql(trade.original_size),
                    dec_to_sql(trade.original_price),
                    dec_to_sql(trade.copy_size),
                    trade.status.as_str(),
                    trade.executed_at,
                    trade.error_message,
                    trade.title,
                    trade.outcome,
                    trade.event_slug,
                    trade.inserted_at,
                ],
            )
            .context("insert copy trade")?;
        Ok(changed > 0)
    }

    pub async fn copy_trade_exists(&self, original_trade_id: &str) -> Result<bool> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT 1 FROM copy_trades WHERE original_trade_id = ?1 LIMIT 1",
        )?;
        let found = stmt
            .query_row([original_trade_id], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(found)
    }

    pub async fn get_copy_trade(&self, id: &str) -> Result<Option<CopyTrade>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COPY_TRADE_COLS} FROM copy_trades WHERE id = ?1"
        ))?;
        stmt.query_row([id], row_to_copy_trade)
            .optional()
            .context("read copy trade")
    }

    pub async fn list_copy_trades(&self, limit: usize) -> Result<Vec<CopyTrade>> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COPY_TRADE_COLS} FROM copy_trades ORDER BY inserted_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], row_to_copy_trade)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn list_copy_trades_with_status(
        &self,
        status: CopyTradeStatus,
        limit: usize,
    ) -> Result<Vec<CopyTrade>> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COPY_TRADE_COLS} FROM copy_trades WHERE status = ?1
             ORDER BY inserted_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![status.as_str(), limit], row_to_copy_trade)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn update_copy_trade_outcome(
        &self,
        id: &str,
        status: CopyTradeStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let executed_at = matches!(
            status,
            CopyTradeStatus::Executed | CopyTradeStatus::Simulated
        )
        .then(|| Utc::now().timestamp());
        let conn = self.conn().await;
        conn.execute(
            "UPDATE copy_trades
             SET status = ?2, executed_at = COALESCE(?3, executed_at), error_message = ?4
             WHERE id = ?1",
            params![id, status.as_str(), executed_at, error_message],
        )?;
        Ok(())
    }

    pub async fn delete_copy_trade(&self, id: &str) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM copy_trades WHERE id = ?1", [id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;
    use std::str::FromStr;

    fn sample(original_trade_id: &str) -> CopyTrade {
        CopyTrade {
            id: uuid::Uuid::new_v4().to_string(),
            source_address: "0xabc0000000000000000000000000000000000001".into(),
            original_trade_id: original_trade_id.into(),
            market: "0xcond".into(),
            asset_id: "123456".into(),
            side: Side::Buy,
            original_size: Decimal::from(100),
            original_price: Decimal::from_str("0.9").unwrap(),
            copy_size: Decimal::from_str("11.11").unwrap(),
            status: CopyTradeStatus::Executed,
            executed_at: Some(Utc::now().timestamp()),
            error_message: None,
            title: "Will it happen?".into(),
            outcome: "Yes".into(),
            event_slug: "will-it-happen".into(),
            inserted_at: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn duplicate_original_trade_is_refused() {
        let (store, _dir) = temp_store();

        assert!(store.insert_copy_trade(&sample("0xhash1")).await.unwrap());
        assert!(store.copy_trade_exists("0xhash1").await.unwrap());

        // same source trade, fresh row id: the unique index wins
        assert!(!store.insert_copy_trade(&sample("0xhash1")).await.unwrap());

        let rows = store.list_copy_trades(10).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn retry_transitions_failed_row() {
        let (store, _dir) = temp_store();

        let mut trade = sample("0xhash2");
        trade.status = CopyTradeStatus::Failed;
        trade.executed_at = None;
        trade.error_message = Some("insufficient balance".into());
        store.insert_copy_trade(&trade).await.unwrap();

        store
            .update_copy_trade_outcome(&trade.id, CopyTradeStatus::Executed, None)
            .await
            .unwrap();

        let row = store.get_copy_trade(&trade.id).await.unwrap().unwrap();
        assert_eq!(row.status, CopyTradeStatus::Executed);
        assert!(row.executed_at.is_some());
    }

    #[tokio::test]
    async fn status_filter() {
        let (store, _dir) = temp_store();
        let mut failed = sample("0xfail");
        failed.status = CopyTradeStatus::Failed;
        store.insert_copy_trade(&failed).await.unwrap();
        store.insert_copy_trade(&sample("0xok")).await.unwrap();

        let failures = store
            .list_copy_trades_with_status(CopyTradeStatus::Failed, 10)
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].original_trade_id, "0xfail");
    }

    #[tokio::test]
    async fn decimal_fields_survive_round_trip() {
        let (store, _dir) = temp_store();
        let trade = sample("0xhash3");
        store.insert_copy_trade(&trade).await.unwrap();
        let row = store.get_copy_trade(&trade.id).await.unwrap().unwrap();
        assert_eq!(row.copy_size, Decimal::from_str("11.11").unwrap());
        assert_eq!(row.original_price, Decimal::from_str("0.9").unwrap());
    }
}
