//! Strategy rows and their append-only event log.

use super::Store;
use crate::models::{StrategyEventType, StrategyStatus};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    pub strategy_type: String,
    pub config: serde_json::Value,
    /// Last persisted intent; the engine registry decides liveness.
    pub status: StrategyStatus,
    pub paper_mode: bool,
    pub inserted_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyUpdate {
    pub name: Option<String>,
    pub config: Option<serde_json::Value>,
    pub paper_mode: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyEvent {
    pub id: i64,
    pub strategy_id: i64,
    pub event_type: StrategyEventType,
    pub message: String,
    pub metadata: serde_json::Value,
    pub inserted_at: i64,
}

fn row_to_strategy(row: &rusqlite::Row<'_>) -> rusqlite::Result<Strategy> {
    let config: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Strategy {
        id: row.get(0)?,
        name: row.get(1)?,
        strategy_type: row.get(2)?,
        config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
        status: StrategyStatus::parse(&status).unwrap_or(StrategyStatus::Stopped),
        paper_mode: row.get::<_, i64>(5)? != 0,
        inserted_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<StrategyEvent> {
    let event_type: String = row.get(2)?;
    let metadata: String = row.get(4)?;
    Ok(StrategyEvent {
        id: row.get(0)?,
        strategy_id: row.get(1)?,
        event_type: StrategyEventType::parse(&event_type).unwrap_or(StrategyEventType::Info),
        message: row.get(3)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        inserted_at: row.get(5)?,
    })
}

const STRATEGY_COLS: &str =
    "id, name, strategy_type, config, status, paper_mode, inserted_at, updated_at";

impl Store {
    pub async fn create_strategy(
        &self,
        name: &str,
        strategy_type: &str,
        config: &serde_json::Value,
        paper_mode: bool,
    ) -> Result<Strategy> {
        if name.trim().is_empty() {
            bail!("strategy name is required");
        }
        let now = Utc::now().timestamp();
        let id = {
            let conn = self.conn().await;
            conn.execute(
                "INSERT INTO strategies (name, strategy_type, config, status, paper_mode, inserted_at, updated_at)
                 VALUES (?1, ?2, ?3, 'stopped', ?4, ?5, ?5)",
                params![
                    name.trim(),
                    strategy_type,
                    serde_json::to_string(config).unwrap_or_else(|_| "{}".into()),
                    paper_mode as i64,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        Ok(self.get_strategy(id).await?.expect("row just inserted"))
    }

    pub async fn get_strategy(&self, id: i64) -> Result<Option<Strategy>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {STRATEGY_COLS} FROM strategies WHERE id = ?1"
        ))?;
        stmt.query_row([id], row_to_strategy)
            .optional()
            .context("read strategy")
    }

    pub async fn list_strategies(&self) -> Result<Vec<Strategy>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {STRATEGY_COLS} FROM strategies ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_strategy)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn list_strategies_with_status(
        &self,
        status: StrategyStatus,
    ) -> Result<Vec<Strategy>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {STRATEGY_COLS} FROM strategies WHERE status = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([status.as_str()], row_to_strategy)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn update_strategy(&self, id: i64, update: StrategyUpdate) -> Result<Strategy> {
        let Some(mut current) = self.get_strategy(id).await? else {
            bail!("strategy {id} not found");
        };
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                bail!("strategy name is required");
            }
            current.name = name.trim().to_string();
        }
        if let Some(config) = update.config {
            current.config = config;
        }
        if let Some(paper) = update.paper_mode {
            current.paper_mode = paper;
        }

        let conn = self.conn().await;
        conn.execute(
            "UPDATE strategies SET name = ?2, config = ?3, paper_mode = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                current.name,
                serde_json::to_string(&current.config).unwrap_or_else(|_| "{}".into()),
                current.paper_mode as i64,
                Utc::now().timestamp(),
            ],
        )?;
        current.updated_at = Utc::now().timestamp();
        Ok(current)
    }

    pub async fn set_strategy_status(&self, id: i64, status: StrategyStatus) -> Result<()> {
        let conn = self.conn().await;
        conn.execute(
            "UPDATE strategies SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Removes the strategy along with its event log, positions and trades.
    pub async fn delete_strategy(&self, id: i64) -> Result<()> {
        let conn = self.conn().await;
        conn.execute("DELETE FROM strategy_events WHERE strategy_id = ?1", [id])?;
        conn.execute("DELETE FROM positions WHERE strategy_id = ?1", [id])?;
        conn.execute("DELETE FROM trades WHERE strategy_id = ?1", [id])?;
        conn.execute("DELETE FROM strategies WHERE id = ?1", [id])?;
        Ok(())
    }

    pub async fn append_strategy_event(
        &self,
        strategy_id: i64,
        event_type: StrategyEventType,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<StrategyEvent> {
        let now = Utc::now().timestamp();
        let id = {
            let conn = self.conn().await;
            conn.execute(
                "INSERT INTO strategy_events (strategy_id, event_type, message, metadata, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    strategy_id,
                    event_type.as_str(),
                    message,
                    serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".into()),
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        Ok(StrategyEvent {
            id,
            strategy_id,
            event_type,
            message: message.to_string(),
            metadata,
            inserted_at: now,
        })
    }

    pub async fn list_strategy_events(
        &self,
        strategy_id: i64,
        limit: usize,
    ) -> Result<Vec<StrategyEvent>> {
        let limit = limit.clamp(1, 1000) as i64;
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, strategy_id, event_type, message, metadata, inserted_at
             FROM strategy_events WHERE strategy_id = ?1
             ORDER BY inserted_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![strategy_id, limit], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;

    #[tokio::test]
    async fn crud_and_status() {
        let (store, _dir) = temp_store();

        let s = store
            .create_strategy(
                "decay-15m",
                "time_decay",
                &serde_json::json!({"timeframes": ["15m"]}),
                true,
            )
            .await
            .unwrap();
        assert_eq!(s.status, StrategyStatus::Stopped);
        assert!(s.paper_mode);

        store
            .set_strategy_status(s.id, StrategyStatus::Running)
            .await
            .unwrap();
        let running = store
            .list_strategies_with_status(StrategyStatus::Running)
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, s.id);

        let updated = store
            .update_strategy(
                s.id,
                StrategyUpdate {
                    paper_mode: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.paper_mode);

        store.delete_strategy(s.id).await.unwrap();
        assert!(store.get_strategy(s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn event_log_is_append_only_and_ordered() {
        let (store, _dir) = temp_store();
        let s = store
            .create_strategy("x", "time_decay", &serde_json::json!({}), true)
            .await
            .unwrap();

        for i in 0..5 {
            store
                .append_strategy_event(
                    s.id,
                    StrategyEventType::Info,
                    &format!("event {i}"),
                    serde_json::Value::Null,
                )
                .await
                .unwrap();
        }

        let events = store.list_strategy_events(s.id, 3).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "event 4");
    }
}
