//! Configuration for the ledger database

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ledger database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// MySQL connection URL
    pub database_url: String,

    /// Pool size
    pub max_connections: u32,

    /// Record statuses that count as settled on chain
    pub settled_statuses: Vec<String>,

    /// Records created before this time (`YYYY-MM-DD HH:MM:SS`) are ignored
    pub ledger_start_time: String,

    /// Rows per paged query
    pub page_size: u64,

    /// Resolver cache entries kept before a cache is cleared
    pub cache_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "mysql://auditor@127.0.0.1:3306/exchange".to_string(),
            max_connections: 10,
            settled_statuses: vec![
                "onchainsettled".to_string(),
                "onchainconfirmed".to_string(),
            ],
            ledger_start_time: "1970-01-01 00:00:00".to_string(),
            page_size: 100,
            cache_limit: 1_000_000,
        }
    }
}

impl StoreConfig {
    /// Parsed ledger start time
    pub fn start_time(&self) -> crate::Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.ledger_start_time, START_TIME_FORMAT).map_err(|e| {
            crate::Error::Config(format!(
                "ledger_start_time '{}': {}",
                self.ledger_start_time, e
            ))
        })
    }

    /// Reject unusable settings
    pub fn validate(&self) -> crate::Result<()> {
        self.start_time()?;
        if self.settled_statuses.is_empty() {
            return Err(crate::Error::Config(
                "settled_statuses must not be empty".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(crate::Error::Config("page_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Apply `AUDITOR_DATABASE_*` environment overrides
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(url) = std::env::var("AUDITOR_DATABASE_URL") {
            self.database_url = url;
        }

        if let Ok(start) = std::env::var("AUDITOR_LEDGER_START_TIME") {
            self.ledger_start_time = start;
        }

        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.settled_statuses.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_start_time() {
        let config = StoreConfig {
            ledger_start_time: "yesterday".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }
}
