//! Embedded SQLite persistence.
//!
//! One connection behind an async mutex, WAL mode, idempotent DDL applied
//! at boot. Monetary columns are stored as decimal strings, never floats.

mod copy_trades;
mod credentials;
mod positions;
mod settings;
mod strategies;
mod tracked_users;
mod trades;

pub use copy_trades::CopyTrade;
pub use credentials::{Credentials, CredentialsUpdate, MaskedCredentials};
pub use positions::Position;
pub use settings::{CopyTradingSettings, SettingsUpdate, SizingMode};
pub use strategies::{Strategy, StrategyEvent, StrategyUpdate};
pub use tracked_users::TrackedUser;
pub use trades::{NewTrade, Trade};

use anyhow::{Context, Result};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open database")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();

        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn conn(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS credentials (
            id TEXT PRIMARY KEY CHECK (id = 'default'),
            api_key TEXT NOT NULL DEFAULT '',
            api_secret TEXT NOT NULL DEFAULT '',
            api_passphrase TEXT NOT NULL DEFAULT '',
            wallet_address TEXT NOT NULL DEFAULT '',
            signer_address TEXT,
            private_key TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tracked_users (
            address TEXT PRIMARY KEY,
            label TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS copy_trading_settings (
            id TEXT PRIMARY KEY CHECK (id = 'default'),
            sizing_mode TEXT NOT NULL DEFAULT 'fixed',
            fixed_amount TEXT NOT NULL DEFAULT '10',
            proportional_factor TEXT NOT NULL DEFAULT '1',
            percentage TEXT NOT NULL DEFAULT '5',
            enabled INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS copy_trades (
            id TEXT PRIMARY KEY,
            source_address TEXT NOT NULL,
            original_trade_id TEXT NOT NULL,
            market TEXT NOT NULL DEFAULT '',
            asset_id TEXT NOT NULL,
            side TEXT NOT NULL,
            original_size TEXT NOT NULL DEFAULT '0',
            original_price TEXT NOT NULL DEFAULT '0',
            copy_size TEXT NOT NULL DEFAULT '0',
            status TEXT NOT NULL,
            executed_at INTEGER,
            error_message TEXT,
            title TEXT NOT NULL DEFAULT '',
            outcome TEXT NOT NULL DEFAULT '',
            event_slug TEXT NOT NULL DEFAULT '',
            inserted_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_copy_trades_original
            ON copy_trades(original_trade_id);
        CREATE INDEX IF NOT EXISTS idx_copy_trades_inserted
            ON copy_trades(inserted_at DESC);

        CREATE TABLE IF NOT EXISTS strategies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            strategy_type TEXT NOT NULL,
            config TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'stopped',
            paper_mode INTEGER NOT NULL DEFAULT 1,
            inserted_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS strategy_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            strategy_id INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            message TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            inserted_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_strategy_events_strategy
            ON strategy_events(strategy_id, inserted_at DESC);

        CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            strategy_id INTEGER NOT NULL,
            token_id TEXT NOT NULL,
            side TEXT NOT NULL,
            size TEXT NOT NULL DEFAULT '0',
            avg_price TEXT NOT NULL DEFAULT '0',
            current_price TEXT,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_positions_strategy_token
            ON positions(strategy_id, token_id);

        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trade_type TEXT NOT NULL DEFAULT 'strategy',
            strategy_id INTEGER NOT NULL,
            market_id TEXT NOT NULL DEFAULT '',
            asset_id TEXT NOT NULL,
            side TEXT NOT NULL,
            price TEXT NOT NULL,
            size TEXT NOT NULL,
            status TEXT NOT NULL,
            order_id TEXT,
            title TEXT NOT NULL DEFAULT '',
            outcome TEXT NOT NULL DEFAULT '',
            pnl TEXT,
            inserted_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trades_strategy
            ON trades(strategy_id, inserted_at DESC);",
    )
    .context("apply schema")?;

    Ok(())
}

pub(crate) fn dec_to_sql(d: Decimal) -> String {
    d.normalize().to_string()
}

pub(crate) fn dec_from_sql(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

pub(crate) fn opt_dec_to_sql(d: Option<Decimal>) -> Option<String> {
    d.map(dec_to_sql)
}

pub(crate) fn opt_dec_from_sql(s: Option<String>) -> Option<Decimal> {
    s.as_deref().map(dec_from_sql)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::Store;

    /// Fresh store backed by a temp file; the guard keeps the file alive.
    pub fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.db");
        let store = Store::open(path.to_str().unwrap()).expect("open store");
        (store, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.db");
        let path = path.to_str().unwrap();
        let _first = Store::open(path).unwrap();
        let _second = Store::open(path).unwrap();
    }

    #[test]
    fn decimal_sql_round_trip() {
        let d = Decimal::from_str("123.456700").unwrap();
        assert_eq!(dec_from_sql(&dec_to_sql(d)), Decimal::from_str("123.4567").unwrap());
        assert_eq!(dec_from_sql("not-a-number"), Decimal::ZERO);
        assert_eq!(opt_dec_from_sql(None), None);
    }
}
