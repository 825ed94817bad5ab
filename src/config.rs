use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub database_path: PathBuf,
    pub folio_prefix: String,
    pub order_prefix: String,
    pub max_transaction_attempts: u32,
    pub transaction_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("requisitions.db"),
            folio_prefix: "REQ".to_string(),
            order_prefix: "COM".to_string(),
            max_transaction_attempts: 64,
            transaction_timeout: Duration::from_secs(5),
        }
    }
}

impl ServiceConfig {
    /// Load environment variables (and `.env` when present), defaulting what is unset
    pub fn from_env() -> Self {
        dotenv().ok();
        let defaults = Self::default();

        Self {
            database_path: env::var("REQUISITION_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            folio_prefix: env::var("REQUISITION_FOLIO_PREFIX").unwrap_or(defaults.folio_prefix),
            order_prefix: env::var("PURCHASE_ORDER_PREFIX").unwrap_or(defaults.order_prefix),
            max_transaction_attempts: parse_var("REQUISITION_TX_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_transaction_attempts),
            transaction_timeout: parse_var("REQUISITION_TX_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.transaction_timeout),
        }
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_transaction_limits(mut self, max_attempts: u32, timeout: Duration) -> Self {
        self.max_transaction_attempts = max_attempts;
        self.transaction_timeout = timeout;
        self
    }

    pub fn open_database(&self) -> anyhow::Result<sled::Db> {
        Ok(sled::open(&self.database_path)?)
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {key}={raw:?}, not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServiceConfig::default();
        assert_eq!(config.folio_prefix, "REQ");
        assert_eq!(config.order_prefix, "COM");
        assert!(config.max_transaction_attempts > 0);
    }

    #[test]
    fn unset_environment_gives_defaults() {
        let from_env = ServiceConfig::from_env();
        if env::var("REQUISITION_FOLIO_PREFIX").is_err() {
            assert_eq!(from_env.folio_prefix, "REQ");
        }
        if env::var("REQUISITION_TX_MAX_ATTEMPTS").is_err() {
            assert_eq!(from_env.max_transaction_attempts, 64);
        }
    }

    #[test]
    fn opens_database_at_configured_path() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config = ServiceConfig::default().with_database_path(temp_dir.path().join("config.db"));
        let db = config.open_database()?;
        assert!(db.tree_names().len() >= 1);
        Ok(())
    }

    #[test]
    fn builder_overrides_limits() {
        let config = ServiceConfig::default().with_transaction_limits(3, Duration::from_millis(10));
        assert_eq!(config.max_transaction_attempts, 3);
        assert_eq!(config.transaction_timeout, Duration::from_millis(10));
    }
}
