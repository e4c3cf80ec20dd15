//! Runtime configuration, read once from the environment at boot.

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Public host name, only used for log lines and links.
    pub host: String,
    /// Opaque key carried for the UI session layer; unused by the core.
    pub secret_key_base: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./polytrader.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let host = std::env::var("PHX_HOST").unwrap_or_else(|_| "localhost".to_string());

        let secret_key_base = std::env::var("SECRET_KEY_BASE").ok().filter(|s| !s.is_empty());

        Ok(Self {
            database_path,
            port,
            host,
            secret_key_base,
        })
    }
}
