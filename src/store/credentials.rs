//! Venue credentials, a singleton row keyed by the literal `"default"`.

use super::Store;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub wallet_address: String,
    pub signer_address: Option<String>,
    pub private_key: String,
}

impl Credentials {
    /// True iff everything needed to sign requests and orders is present.
    pub fn configured(&self) -> bool {
        !self.api_key.is_empty()
            && !self.api_secret.is_empty()
            && !self.api_passphrase.is_empty()
            && !self.wallet_address.is_empty()
            && !self.private_key.is_empty()
    }

    pub fn to_masked(&self) -> MaskedCredentials {
        MaskedCredentials {
            api_key: mask_secret(&self.api_key),
            api_secret: mask_secret(&self.api_secret),
            api_passphrase: mask_secret(&self.api_passphrase),
            wallet_address: self.wallet_address.clone(),
            signer_address: self.signer_address.clone(),
            private_key: mask_secret(&self.private_key),
            configured: self.configured(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaskedCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub wallet_address: String,
    pub signer_address: Option<String>,
    pub private_key: String,
    pub configured: bool,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsUpdate {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
    pub wallet_address: Option<String>,
    pub signer_address: Option<String>,
    pub private_key: Option<String>,
}

/// First and last 4 chars kept, middle bulleted; short secrets are fully
/// bulleted so nothing leaks.
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    let n = s.chars().count();
    if n <= 8 {
        return "\u{2022}".repeat(n);
    }
    let head: String = s.chars().take(4).collect();
    let tail: String = s.chars().skip(n - 4).collect();
    format!("{head}{}{tail}", "\u{2022}".repeat(n - 8))
}

fn is_hex_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Store {
    pub async fn get_credentials(&self) -> Result<Credentials> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT api_key, api_secret, api_passphrase, wallet_address, signer_address, private_key
             FROM credentials WHERE id = 'default'",
        )?;
        let row = stmt
            .query_row([], |row| {
                Ok(Credentials {
                    api_key: row.get(0)?,
                    api_secret: row.get(1)?,
                    api_passphrase: row.get(2)?,
                    wallet_address: row.get(3)?,
                    signer_address: row.get(4)?,
                    private_key: row.get(5)?,
                })
            })
            .optional()
            .context("read credentials")?;
        Ok(row.unwrap_or_default())
    }

    /// Validates and lowercases addresses, then upserts the singleton row.
    pub async fn update_credentials(&self, update: CredentialsUpdate) -> Result<Credentials> {
        let mut current = self.get_credentials().await?;

        if let Some(v) = update.api_key {
            current.api_key = v;
        }
        if let Some(v) = update.api_secret {
            current.api_secret = v;
        }
        if let Some(v) = update.api_passphrase {
            current.api_passphrase = v;
        }
        if let Some(v) = update.wallet_address {
            let v = v.trim().to_lowercase();
            if !v.is_empty() && !is_hex_address(&v) {
                bail!("wallet_address must match 0x followed by 40 hex chars");
            }
            current.wallet_address = v;
        }
        if let Some(v) = update.signer_address {
            let v = v.trim().to_lowercase();
            if v.is_empty() {
                current.signer_address = None;
            } else {
                if !is_hex_address(&v) {
                    bail!("signer_address must match 0x followed by 40 hex chars");
                }
                current.signer_address = Some(v);
            }
        }
        if let Some(v) = update.private_key {
            current.private_key = v;
        }

        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO credentials
                (id, api_key, api_secret, api_passphrase, wallet_address, signer_address, private_key, updated_at)
             VALUES ('default', ?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                api_key = excluded.api_key,
                api_secret = excluded.api_secret,
                api_passphrase = excluded.api_passphrase,
                wallet_address = excluded.wallet_address,
                signer_address = excluded.signer_address,
                private_key = excluded.private_key,
                updated_at = excluded.updated_at",
            params![
                current.api_key,
                current.api_secret,
                current.api_passphrase,
                current.wallet_address,
                current.signer_address,
                current.private_key,
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

    #[test]
    fn masking_keeps_edges() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("12345678"), "\u{2022}".repeat(8));
        let masked = mask_secret("abcd1234efgh5678");
        assert!(masked.starts_with("abcd"));
        assert!(masked.ends_with("5678"));
        assert_eq!(masked.chars().filter(|c| *c == '\u{2022}').count(), 8);
    }

    #[test]
    fn address_validation() {
        assert!(is_hex_address("0x1234567890abcdef1234567890abcdef12345678"));
        assert!(!is_hex_address("1234567890abcdef1234567890abcdef12345678"));
        assert!(!is_hex_address("0x1234"));
        assert!(!is_hex_address("0x1234567890abcdef1234567890abcdef1234567g"));
    }

    #[tokio::test]
    async fn upsert_and_configured_flag() {
        let (store, _dir) = temp_store();

        let creds = store.get_credentials().await.unwrap();
        assert!(!creds.configured());

        let creds = store
            .update_credentials(CredentialsUpdate {
                api_key: Some("key-1".into()),
                api_secret: Some("c2VjcmV0".into()),
                api_passphrase: Some("phrase".into()),
                wallet_address: Some("0xABCDEF1234567890ABCDEF1234567890ABCDEF12".into()),
                private_key: Some("0x01".repeat(32)[..64].to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(creds.configured());
        // lowercased on write
        assert_eq!(
            creds.wallet_address,
            "0xabcdef1234567890abcdef1234567890abcdef12"
        );

        let bad = store
            .update_credentials(CredentialsUpdate {
                wallet_address: Some("0xnothex".into()),
                ..Default::default()
            })
            .await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn masked_view_hides_secrets() {
        let (store, _dir) = temp_store();
        store
            .update_credentials(CredentialsUpdate {
                api_secret: Some("super-secret-value".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let masked = store.get_credentials().await.unwrap().to_masked();
        assert!(!masked.api_secret.contains("secret"));
        assert!(masked.api_secret.starts_with("supe"));
    }
}
