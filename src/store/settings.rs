//! Copy-trading sizing settings, a singleton row.

use super::{dec_from_sql, dec_to_sql, Store};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    Fixed,
    Proportional,
    Percentage,
}

impl SizingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMode::Fixed => "fixed",
            SizingMode::Proportional => "proportional",
            SizingMode::Percentage => "percentage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(SizingMode::Fixed),
            "proportional" => Some(SizingMode::Proportional),
            "percentage" => Some(SizingMode::Percentage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyTradingSettings {
    pub sizing_mode: SizingMode,
    pub fixed_amount: Decimal,
    pub proportional_factor: Decimal,
    pub percentage: Decimal,
    pub enabled: bool,
}

impl Default for CopyTradingSettings {
    fn default() -> Self {
        Self {
            sizing_mode: SizingMode::Fixed,
            fixed_amount: Decimal::from(10),
            proportional_factor: Decimal::ONE,
            percentage: Decimal::from(5),
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub sizing_mode: Option<SizingMode>,
    pub fixed_amount: Option<Decimal>,
    pub proportional_factor: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub enabled: Option<bool>,
}

impl Store {
    pub async fn get_copy_settings(&self) -> Result<CopyTradingSettings> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT sizing_mode, fixed_amount, proportional_factor, percentage, enabled
             FROM copy_trading_settings WHERE id = 'default'",
        )?;
        let row = stmt
            .query_row([], |row| {
                let mode: String = row.get(0)?;
                let fixed: String = row.get(1)?;
                let factor: String = row.get(2)?;
                let pct: String = row.get(3)?;
                Ok(CopyTradingSettings {
                    sizing_mode: SizingMode::parse(&mode).unwrap_or(SizingMode::Fixed),
                    fixed_amount: dec_from_sql(&fixed),
                    proportional_factor: dec_from_sql(&factor),
                    percentage: dec_from_sql(&pct),
                    enabled: row.get::<_, i64>(4)? != 0,
                })
            })
            .optional()
            .context("read copy trading settings")?;
        Ok(row.unwrap_or_default())
    }

    pub async fn update_copy_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<CopyTradingSettings> {
        let mut current = self.get_copy_settings().await?;

        if let Some(v) = update.sizing_mode {
            current.sizing_mode = v;
        }
        if let Some(v) = update.fixed_amount {
            if v <= Decimal::ZERO {
                bail!("fixed_amount must be positive");
            }
            current.fixed_amount = v;
        }
        if let Some(v) = update.proportional_factor {
            if v <= Decimal::ZERO {
                bail!("proportional_factor must be positive");
            }
            current.proportional_factor = v;
        }
        if let Some(v) = update.percentage {
            if v <= Decimal::ZERO || v > Decimal::from(100) {
                bail!("percentage must be in (0, 100]");
            }
            current.percentage = v;
        }
        if let Some(v) = update.enabled {
            current.enabled = v;
        }

        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO copy_trading_settings
                (id, sizing_mode, fixed_amount, proportional_factor, percentage, enabled, updated_at)
             VALUES ('default', ?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                sizing_mode = excluded.sizing_mode,
                fixed_amount = excluded.fixed_amount,
                proportional_factor = excluded.proportional_factor,
                percentage = excluded.percentage,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
            params![
                current.sizing_mode.as_str(),
                dec_to_sql(current.fixed_amount),
                dec_to_sql(current.proportional_factor),
                dec_to_sql(current.percentage),
                current.enabled as i64,
                Utc::now().timestamp(),
            ],
        )?;

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::temp_store;
    use std::str::FromStr;

    #[tokio::test]
    async fn defaults_then_update() {
        let (store, _dir) = temp_store();

        let s = store.get_copy_settings().await.unwrap();
        assert_eq!(s.sizing_mode, SizingMode::Fixed);
        assert!(!s.enabled);

        let s = store
            .update_copy_settings(SettingsUpdate {
                sizing_mode: Some(SizingMode::Percentage),
                percentage: Some(Decimal::from_str("2.5").unwrap()),
                enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(s.sizing_mode, SizingMode::Percentage);
        assert_eq!(s.percentage, Decimal::from_str("2.5").unwrap());
        assert!(s.enabled);

        // persisted
        let again = store.get_copy_settings().await.unwrap();
        assert_eq!(again.percentage, Decimal::from_str("2.5").unwrap());
    }

    #[tokio::test]
    async fn rejects_out_of_range_values() {
        let (store, _dir) = temp_store();

        for bad in [
            SettingsUpdate {
                fixed_amount: Some(Decimal::ZERO),
                ..Default::default()
            },
            SettingsUpdate {
                proportional_factor: Some(Decimal::from(-1)),
                ..Default::default()
            },
            SettingsUpdate {
                percentage: Some(Decimal::from(101)),
                ..Default::default()
            },
        ] {
            assert!(store.update_copy_settings(bad).await.is_err());
        }
    }
}
