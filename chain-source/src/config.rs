//! Configuration for the chain connection

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// JSON-RPC method family spoken by the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcDialect {
    /// `cfx_*` methods, epochs
    #[default]
    Conflux,
    /// `eth_*` methods, blocks
    Ethereum,
}

impl std::str::FromStr for RpcDialect {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "conflux" | "cfx" => Ok(RpcDialect::Conflux),
            "ethereum" | "eth" => Ok(RpcDialect::Ethereum),
            other => Err(crate::Error::Config(format!("unknown RPC dialect '{}'", other))),
        }
    }
}

/// Chain connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Node JSON-RPC endpoint
    pub rpc_url: String,

    /// Method family
    pub dialect: RpcDialect,

    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,

    /// Epochs kept between the head and the newest audited epoch
    pub confirmation_margin: u64,

    /// Head polling interval while waiting for confirmation (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:12537".to_string(),
            dialect: RpcDialect::Conflux,
            request_timeout_ms: 10_000,
            confirmation_margin: 10,
            poll_interval_ms: 1_000,
        }
    }
}

impl ChainConfig {
    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Gate polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Apply `AUDITOR_RPC_*` environment overrides
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(url) = std::env::var("AUDITOR_RPC_URL") {
            self.rpc_url = url;
        }

        if let Ok(dialect) = std::env::var("AUDITOR_RPC_DIALECT") {
            self.dialect = dialect.parse()?;
        }

        if let Ok(margin) = std::env::var("AUDITOR_CONFIRMATION_MARGIN") {
            self.confirmation_margin = margin.parse().map_err(|e| {
                crate::Error::Config(format!("AUDITOR_CONFIRMATION_MARGIN '{}': {}", margin, e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChainConfig::default();
        assert_eq!(config.dialect, RpcDialect::Conflux);
        assert_eq!(config.confirmation_margin, 10);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml() {
        let config: ChainConfig = toml::from_str(
            r#"
            rpc_url = "https://evm.example.org"
            dialect = "ethereum"
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect, RpcDialect::Ethereum);
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!("ETH".parse::<RpcDialect>().unwrap(), RpcDialect::Ethereum);
        assert!("solana".parse::<RpcDialect>().is_err());
    }
}
