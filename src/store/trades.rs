//! Strategy-originated trade rows.

use super::{dec_from_sql, dec_to_sql, opt_dec_from_sql, Store};
use crate::models::{Side, TradeStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: i64,
    pub trade_type: String,
    pub strategy_id: i64,
    pub market_id: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub title: String,
    pub outcome: String,
    pub pnl: Option<Decimal>,
    pub inserted_at: i64,
}

pub struct NewTrade<'a> {
    pub strategy_id: i64,
    pub market_id: &'a str,
    pub asset_id: &'a str,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub status: TradeStatus,
    pub title: &'a str,
    pub outcome: &'a str,
}

fn row_to_trade(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trade> {
    let side: String = row.get(5)?;
    let price: String = row.get(6)?;
    let size: String = row.get(7)?;
    let status: String = row.get(8)?;
    let pnl: Option<String> = row.get(12)?;
    Ok(Trade {
        id: row.get(0)?,
        trade_type: row.get(1)?,
        strategy_id: row.get(2)?,
        market_id: row.get(3)?,
        asset_id: row.get(4)?,
        side: Side::parse(&side).unwrap_or(Side::Buy),
        price: dec_from_sql(&price),
        size: dec_from_sql(&size),
        status: TradeStatus::parse(&status).unwrap_or(TradeStatus::Failed),
        order_id: row.get(9)?,
        title: row.get(10)?,
        outcome: row.get(11)?,
        pnl: opt_dec_from_sql(pnl),
        inserted_at: row.get(13)?,
    })
}

const TRADE_COLS: &str = "id, trade_type, strategy_id, market_id, asset_id, side, price, size, \
     status, order_id, title, outcome, pnl, inserted_at";

impl Store {
    pub async fn insert_trade(&self, new: NewTrade<'_>) -> Result<Trade> {
        let now = Utc::now().timestamp();
        let id = {
            let conn = self.conn().await;
            conn.execute(
                "INSERT INTO trades
                    (trade_type, strategy_id, market_id, asset_id, side, price, size, status,
                     title, outcome, inserted_at)
                 VALUES ('strategy', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    new.strategy_id,
                    new.market_id,
                    new.asset_id,
                    new.side.as_str(),
                    dec_to_sql(new.price),
                    dec_to_sql(new.size),
                    new.status.as_str(),
                    new.title,
                    new.outcome,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        Ok(self.get_trade(id).await?.expect("row just inserted"))
    }

    pub async fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let conn = self.conn().await;
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {TRADE_COLS} FROM trades WHERE id = ?1"))?;
        stmt.query_row([id], row_to_trade)
            .optional()
            .context("read trade")
    }

    pub async fn update_trade_status(
        &self,
        id: i64,
        status: TradeStatus,
        order_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE trades SET status = ?2, order_id = COALESCE(?3, order_id) WHERE id = ?1",
            params![id, status.as_str(), order_id],
        )?;
        Ok(())
    }

    pub async fn list_trades(&self, strategy_id: i64, limit: usize) -> Result<Vec<Trade>> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRADE_COLS} FROM trades WHERE strategy_id = ?1
             ORDER BY inserted_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![strategy_id, limit], row_to_trade)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Across every strategy, newest first; the dashboard view.
    pub async fn list_all_trades(&self, limit: usize) -> Result<Vec<Trade>> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRADE_COLS} FROM trades ORDER BY inserted_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], row_to_trade)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
