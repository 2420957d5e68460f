//! Configuration for the ledger core

use crate::executor::{BatchExecutor, DEFAULT_CONCURRENCY};
use serde::{Deserialize, Serialize};

/// Ledger core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum chain or database reads in flight per batch
    pub concurrency_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(limit) = std::env::var("LEDGER_CONCURRENCY_LIMIT") {
            self.concurrency_limit = limit.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_CONCURRENCY_LIMIT '{}': {}", limit, e))
            })?;
        }
        self.validate()
    }

    /// Reject settings the executor cannot honour
    pub fn validate(&self) -> crate::Result<()> {
        if self.concurrency_limit == 0 {
            return Err(crate::Error::Config(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Executor with the configured cap
    pub fn executor(&self) -> BatchExecutor {
        BatchExecutor::new(self.concurrency_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.executor().limit(), 5);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let config = Config {
            concurrency_limit: 0,
        };
        assert!(config.validate().is_err());
    }
}
