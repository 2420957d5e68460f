//! Auditor configuration
//!
//! One TOML file with a section per crate plus the asset registry:
//!
//! ```toml
//! log_format = "json"
//! metrics_listen_addr = "0.0.0.0:9100"
//!
//! [chain]
//! rpc_url = "http://127.0.0.1:12537"
//!
//! [store]
//! database_url = "mysql://auditor@127.0.0.1:3306/exchange"
//!
//! [[assets]]
//! name = "USDT"
//! custody_contract = "0x8b8689c7f3014a4d86e4d1d0daaf74a47f5e0f27"
//! token_contract = "0x8d7df9316faa0586e175b5e6d03c6bda76e3d950"
//! decimals = 18
//!
//! [conservation]
//! interval_epochs = 5000
//! custody_offsets = { USDT = "1000000000000000000" }
//!
//! [dual_source]
//! operator = "0x1bc2d94d4a1f7aa9ed3c1f2b4b2b52c6fd4d0d71"
//! pausable = true
//! halt_window = { from_hour = 23, to_hour = 7, utc_offset_hours = 8 }
//! ```

use crate::escalation::HaltWindow;
use crate::monitor::EpochSpec;
use crate::{Error, Result};
use chain_source::ChainConfig;
use ledger_core::{Address, Asset, BigInt};
use replay::StoreConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Conservation audit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConservationConfig {
    /// Market-maker accounts whose withdrawals are reported
    pub privileged_accounts: Vec<Address>,

    /// Per-asset amount (token base units) sent to the custody contract
    /// outside the deposit path
    pub custody_offsets: BTreeMap<String, String>,

    /// Epochs per baseline round in continuous mode
    pub interval_epochs: u64,
}

impl Default for ConservationConfig {
    fn default() -> Self {
        Self {
            privileged_accounts: Vec::new(),
            custody_offsets: BTreeMap::new(),
            interval_epochs: 5000,
        }
    }
}

impl ConservationConfig {
    /// Custody offset of `asset`, zero when not configured
    pub fn custody_offset(&self, asset: &str) -> Result<BigInt> {
        match self.custody_offsets.get(asset) {
            Some(raw) => raw.trim().parse::<BigInt>().map_err(|e| {
                Error::Config(format!("custody offset of {} '{}': {}", asset, raw, e))
            }),
            None => Ok(BigInt::from(0)),
        }
    }

    /// Privileged accounts as a set
    pub fn privileged_set(&self) -> HashSet<Address> {
        self.privileged_accounts.iter().cloned().collect()
    }
}

/// Dual-source reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualSourceConfig {
    /// Exchange admin account whose nonce indexes settled records
    pub operator: Option<Address>,

    /// Request a halt for every violation
    pub pausable: bool,

    /// Local hours during which a halt request goes through; any time when
    /// unset
    pub halt_window: Option<HaltWindow>,

    /// Minimum epochs between full audits
    pub full_interval: u64,

    /// Monitor polling interval (milliseconds)
    pub poll_interval_ms: u64,

    /// First epoch of the first full audit (`N` or `-N` behind confirmed)
    pub full_from: String,

    /// First epoch of partial audits (`N` or `-N` behind confirmed)
    pub partial_from: String,
}

impl Default for DualSourceConfig {
    fn default() -> Self {
        Self {
            operator: None,
            pausable: false,
            halt_window: None,
            full_interval: 10_000,
            poll_interval_ms: 5_000,
            full_from: "-50".to_string(),
            partial_from: "-50".to_string(),
        }
    }
}

impl DualSourceConfig {
    /// Monitor polling interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Configured operator
    pub fn operator(&self) -> Result<&Address> {
        self.operator
            .as_ref()
            .ok_or_else(|| Error::Config("dual_source.operator is not set".to_string()))
    }
}

/// Complete auditor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    /// Chain node connection
    pub chain: ChainConfig,

    /// Off-chain ledger database
    pub store: StoreConfig,

    /// Shared engine settings
    pub core: ledger_core::Config,

    /// Asset registry
    pub assets: Vec<Asset>,

    /// Conservation audit
    pub conservation: ConservationConfig,

    /// Dual-source reconciliation
    pub dual_source: DualSourceConfig,

    /// Log output format
    pub log_format: LogFormat,

    /// Serve `/metrics` on this address when set
    pub metrics_listen_addr: Option<String>,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            store: StoreConfig::default(),
            core: ledger_core::Config::default(),
            assets: Vec::new(),
            conservation: ConservationConfig::default(),
            dual_source: DualSourceConfig::default(),
            log_format: LogFormat::Text,
            metrics_listen_addr: None,
        }
    }
}

impl AuditorConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: AuditorConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults or `path`, then `AUDITOR_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply environment overrides to every section
    pub fn apply_env(&mut self) -> Result<()> {
        self.chain.apply_env()?;
        self.store.apply_env()?;
        self.core.apply_env()?;

        if let Ok(operator) = std::env::var("AUDITOR_OPERATOR") {
            self.dual_source.operator = Some(Address::parse(&operator)?);
        }

        if let Ok(pausable) = std::env::var("AUDITOR_PAUSABLE") {
            self.dual_source.pausable = pausable.parse().map_err(|e| {
                Error::Config(format!("AUDITOR_PAUSABLE '{}': {}", pausable, e))
            })?;
        }

        if let Ok(format) = std::env::var("AUDITOR_LOG_FORMAT") {
            self.log_format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(Error::Config(format!("unknown log format '{}'", other)));
                }
            };
        }

        if let Ok(addr) = std::env::var("AUDITOR_METRICS_ADDR") {
            self.metrics_listen_addr = Some(addr);
        }

        self.validate()
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut contracts = HashSet::new();
        for asset in &self.assets {
            if !names.insert(asset.name.as_str()) {
                return Err(Error::Config(format!("duplicate asset {}", asset.name)));
            }
            if !contracts.insert(&asset.custody_contract) {
                return Err(Error::Config(format!(
                    "custody contract {} configured twice",
                    asset.custody_contract
                )));
            }
        }

        for name in self.conservation.custody_offsets.keys() {
            if !names.contains(name.as_str()) {
                return Err(Error::Config(format!("custody offset for unknown asset {}", name)));
            }
            self.conservation.custody_offset(name)?;
        }

        if self.conservation.interval_epochs == 0 {
            return Err(Error::Config("conservation.interval_epochs must be at least 1".to_string()));
        }
        if self.dual_source.full_interval == 0 {
            return Err(Error::Config("dual_source.full_interval must be at least 1".to_string()));
        }
        if let Some(window) = &self.dual_source.halt_window {
            window.validate()?;
        }
        self.dual_source.full_from.parse::<EpochSpec>()?;
        self.dual_source.partial_from.parse::<EpochSpec>()?;

        self.store.validate()?;
        self.core.validate()?;
        Ok(())
    }

    /// Asset by name
    pub fn asset(&self, name: &str) -> Result<&Asset> {
        self.assets
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::Config(format!("unknown asset {}", name)))
    }

    /// Token decimals per currency name
    pub fn decimals(&self) -> HashMap<String, u32> {
        self.assets
            .iter()
            .map(|a| (a.name.clone(), a.decimals))
            .collect()
    }
}
