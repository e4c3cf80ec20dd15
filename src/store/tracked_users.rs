//! Tracked wallet addresses for copy trading. Untracking archives the row
//! (`active = 0`); a permanent delete is only allowed while archived.

use super::Store;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TrackedUser {
    pub address: String,
    pub label: String,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedUser> {
    Ok(TrackedUser {
        address: row.get(0)?,
        label: row.get(1)?,
        active: row.get::<_, i64>(2)? != 0,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl Store {
    pub async fn list_tracked_users(&self, include_archived: bool) -> Result<Vec<TrackedUser>> {
        let conn = self.conn().await;
        let sql = if include_archived {
            "SELECT address, label, active, created_at, updated_at
             FROM tracked_users ORDER BY created_at ASC"
        } else {
            "SELECT address, label, active, created_at, updated_at
             FROM tracked_users WHERE active = 1 ORDER BY created_at ASC"
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], row_to_user)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn get_tracked_user(&self, address: &str) -> Result<Option<TrackedUser>> {
        let address = address.trim().to_lowercase();
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT address, label, active, created_at, updated_at
             FROM tracked_users WHERE address = ?1",
        )?;
        stmt.query_row([address], row_to_user)
            .optional()
            .context("read tracked user")
    }

    /// Insert or reactivate; re-tracking an archived address restores it.
    pub async fn upsert_tracked_user(&self, address: &str, label: &str) -> Result<TrackedUser> {
        let address = address.trim().to_lowercase();
        if address.is_empty() {
            bail!("address is required");
        }
        let now = Utc::now().timestamp();
        {
            let conn = self.conn().await;
            conn.execute(
                "INSERT INTO tracked_users (address, label, active, created_at, updated_at)
                 VALUES (?1, ?2, 1, ?3, ?3)
                 ON CONFLICT(address) DO UPDATE SET
                    label = excluded.label,
                    active = 1,
                    updated_at = excluded.updated_at",
                params![address, label, now],
            )?;
        }
        Ok(self
            .get_tracked_user(&address)
            .await?
            .expect("row just upserted"))
    }

    pub async fn set_tracked_user_active(&self, address: &str, active: bool) -> Result<()> {
        let address = address.trim().to_lowercase();
        let conn = self.conn().await;
        let changed = conn.execute(
            "UPDATE tracked_users SET active = ?2, updated_at = ?3 WHERE address = ?1",
            params![address, active as i64, Utc::now().timestamp()],
        )?;
        if changed == 0 {
            bail!("tracked user {address} not found");
        }
        Ok(())
    }

    /// Hard delete, only permitted for archived rows.
    pub async fn delete_tracked_user(&self, address: &str) -> Result<()> {
        let address = address.trim().to_lowercase();
        let Some(user) = self.get_tracked_user(&address).await? else {
            bail!("tracked user {address} not found");
        };
        if user.active {
            bail!("tracked user {address} is active; archive it first");
        }
        let conn = self.conn().await;
        conn.execute("DELETE FROM tracked_users WHERE address = ?1", [address])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_util::temp_store;

    #[tokio::test]
    async fn track_archive_restore_delete() {
        let (store, _dir) = temp_store();

        let user = store
            .upsert_tracked_user("0xABC0000000000000000000000000000000000001", "whale")
            .await
            .unwrap();
        assert!(user.active);
        assert_eq!(user.address, "0xabc0000000000000000000000000000000000001");

        // delete while active is refused
        assert!(store.delete_tracked_user(&user.address).await.is_err());

        store
            .set_tracked_user_active(&user.address, false)
            .await
            .unwrap();
        assert!(store.list_tracked_users(false).await.unwrap().is_empty());
        assert_eq!(store.list_tracked_users(true).await.unwrap().len(), 1);

        // restore flips back
        store
            .set_tracked_user_active(&user.address, true)
            .await
            .unwrap();
        assert_eq!(store.list_tracked_users(false).await.unwrap().len(), 1);

        store
            .set_tracked_user_active(&user.address, false)
            .await
            .unwrap();
        store.delete_tracked_user(&user.address).await.unwrap();
        assert!(store.list_tracked_users(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retracking_restores_with_new_label() {
        let (store, _dir) = temp_store();
        let addr = "0xabc0000000000000000000000000000000000002";
        store.upsert_tracked_user(addr, "old").await.unwrap();
        store.set_tracked_user_active(addr, false).await.unwrap();

        let user = store.upsert_tracked_user(addr, "new").await.unwrap();
        assert!(user.active);
        assert_eq!(user.label, "new");
    }
}
