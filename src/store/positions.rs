//! Per-strategy positions, unique on `(strategy_id, token_id)`.
//!
//! Average price is size-weighted over buys only; sells reduce size and
//! leave the average untouched.

use super::{dec_from_sql, dec_to_sql, opt_dec_from_sql, opt_dec_to_sql, Store};
use crate::models::Side;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub id: i64,
    pub strategy_id: i64,
    pub token_id: String,
    pub side: String,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub current_price: Option<Decimal>,
}

fn row_to_position(row: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
    let size: String = row.get(4)?;
    let avg: String = row.get(5)?;
    let cur: Option<String> = row.get(6)?;
    Ok(Position {
        id: row.get(0)?,
        strategy_id: row.get(1)?,
        token_id: row.get(2)?,
        side: row.get(3)?,
        size: dec_from_sql(&size),
        avg_price: dec_from_sql(&avg),
        current_price: opt_dec_from_sql(cur),
    })
}

impl Store {
    pub async fn get_position(
        &self,
        strategy_id: i64,
        token_id: &str,
    ) -> Result<Option<Position>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, strategy_id, token_id, side, size, avg_price, current_price
             FROM positions WHERE strategy_id = ?1 AND token_id = ?2",
        )?;
        stmt.query_row(params![strategy_id, token_id], row_to_position)
            .optional()
            .context("read position")
    }

    pub async fn list_positions(&self, strategy_id: i64) -> Result<Vec<Position>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, strategy_id, token_id, side, size, avg_price, current_price
             FROM positions WHERE strategy_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([strategy_id], row_to_position)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Applies one fill to the position, creating it if needed. New
    /// positions take side YES for a buy and NO for a sell.
    pub async fn apply_fill(
        &self,
        strategy_id: i64,
        token_id: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> Result<Position> {
        let existing = self.get_position(strategy_id, token_id).await?;
        let now = Utc::now().timestamp();

        let (new_size, new_avg, pos_side) = match (&existing, side) {
            (None, Side::Buy) => (size, price, "YES".to_string()),
            (None, Side::Sell) => (size, price, "NO".to_string()),
            (Some(p), Side::Buy) => {
                let total = p.size + size;
                let avg = if total > Decimal::ZERO {
                    (p.size * p.avg_price + size * price) / total
                } else {
                    price
                };
                (total, avg, p.side.clone())
            }
            (Some(p), Side::Sell) => {
                let remaining = (p.size - size).max(Decimal::ZERO);
                (remaining, p.avg_price, p.side.clone())
            }
        };

        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO positions (strategy_id, token_id, side, size, avg_price, current_price, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(strategy_id, token_id) DO UPDATE SET
                size = excluded.size,
                avg_price = excluded.avg_price,
                current_price = excluded.current_price,
                updated_at = excluded.updated_at",
            params![
                strategy_id,
                token_id,
                pos_side,
                dec_to_sql(new_size),
                dec_to_sql(new_avg),
                opt_dec_to_sql(Some(price)),
                now,
            ],
        )?;
        drop(conn);

        Ok(self
            .get_position(strategy_id, token_id)
            .await?
            .expect("row just upserted"))
    }

    pub async fn update_position_price(
        &self,
        strategy_id: i64,
        token_id: &str,
        current_price: Decimal,
    ) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE positions SET current_price = ?3, updated_at = ?4
             WHERE strategy_id = ?1 AND token_id = ?2",
            params![
                strategy_id,
                token_id,
                dec_to_sql(current_price),
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn buys_weight_average_sells_do_not() {
        let (store, _dir) = temp_store();

        // 10 @ 0.50, then 10 @ 0.70 -> avg 0.60
        store
            .apply_fill(1, "tok", Side::Buy, d("10"), d("0.50"))
            .await
            .unwrap();
        let p = store
            .apply_fill(1, "tok", Side::Buy, d("10"), d("0.70"))
            .await
            .unwrap();
        assert_eq!(p.size, d("20"));
        assert_eq!(p.avg_price, d("0.6"));
        assert_eq!(p.side, "YES");

        // sell 5 @ 0.90: size shrinks, avg holds
        let p = store
            .apply_fill(1, "tok", Side::Sell, d("5"), d("0.90"))
            .await
            .unwrap();
        assert_eq!(p.size, d("15"));
        assert_eq!(p.avg_price, d("0.6"));
    }

    #[tokio::test]
    async fn position_round_trip_law() {
        let (store, _dir) = temp_store();
        let buys = [(d("3"), d("0.2")), (d("7"), d("0.4")), (d("10"), d("0.9"))];
        let sells = [d("4"), d("6")];

        for (size, price) in buys {
            store
                .apply_fill(9, "law-token", Side::Buy, size, price)
                .await
                .unwrap();
        }
        for size in sells {
            store
                .apply_fill(9, "law-token", Side::Sell, size, d("0.5"))
                .await
                .unwrap();
        }

        let p = store.get_position(9, "law-token").await.unwrap().unwrap();
        // sum(s_i) - sum(q_j) = 20 - 10
        assert_eq!(p.size, d("10"));
        // sum(s_i * p_i) / sum(s_i) = (0.6 + 2.8 + 9.0) / 20
        assert_eq!(p.avg_price, d("0.62"));
    }

    #[tokio::test]
    async fn sell_never_goes_negative() {
        let (store, _dir) = temp_store();
        store
            .apply_fill(2, "tok", Side::Buy, d("3"), d("0.5"))
            .await
            .unwrap();
        let p = store
            .apply_fill(2, "tok", Side::Sell, d("10"), d("0.5"))
            .await
            .unwrap();
        assert_eq!(p.size, Decimal::ZERO);
    }

    #[tokio::test]
    async fn unique_per_strategy_token() {
        let (store, _dir) = temp_store();
        store
            .apply_fill(1, "tok", Side::Buy, d("1"), d("0.5"))
            .await
            .unwrap();
        store
            .apply_fill(2, "tok", Side::Buy, d("2"), d("0.5"))
            .await
            .unwrap();
        assert_eq!(store.list_positions(1).await.unwrap().len(), 1);
        assert_eq!(store.list_positions(2).await.unwrap().len(), 1);
    }
}
