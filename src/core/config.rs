//! Protocol configuration and parameters.
//!
//! Thresholds (MCR, CCR, gas compensation) are protocol parameters rather than
//! algorithmic choices, so they live here with defaults equal to the values in
//! [`crate::utils::constants`]. Configurations can be loaded from and saved to JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::constants::*;

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateralization and liquidation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Protocol version
    pub version: String,

    /// Minimum collateral ratio (MCR)
    /// Below this, vaults can be liquidated
    pub mcr: u128,

    /// Critical collateral ratio (CCR)
    /// When system TCR falls below this, Recovery Mode activates
    pub ccr: u128,

    /// Stablecoin reserve per vault paid to the liquidator
    pub gas_compensation: u128,

    /// Minimum net debt per vault
    pub min_net_debt: u128,

    /// Collateral gas compensation divisor (200 = 0.5%)
    pub percent_divisor: u128,

    /// Maximum price staleness in seconds
    pub max_price_staleness_secs: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mcr: MCR,
            ccr: CCR,
            gas_compensation: GAS_COMPENSATION,
            min_net_debt: MIN_NET_DEBT,
            percent_divisor: PERCENT_DIVISOR,
            max_price_staleness_secs: MAX_PRICE_STALENESS_SECS,
        }
    }
}

impl ProtocolParams {
    /// Create with custom collateral ratios (for testing)
    pub fn with_ratios(mut self, mcr: u128, ccr: u128) -> Self {
        self.mcr = mcr;
        self.ccr = ccr;
        self
    }

    /// Create with custom gas compensation (for testing)
    pub fn with_gas_compensation(mut self, gas_compensation: u128, percent_divisor: u128) -> Self {
        self.gas_compensation = gas_compensation;
        self.percent_divisor = percent_divisor;
        self
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        if self.mcr <= RECOVERY_CAP_RATIO {
            return Err(Error::Config(format!("mcr {} must exceed 100%", self.mcr)));
        }
        if self.mcr >= self.ccr {
            return Err(Error::Config(format!(
                "mcr {} must be below ccr {}",
                self.mcr, self.ccr
            )));
        }
        if self.percent_divisor == 0 {
            return Err(Error::Config("percent_divisor cannot be zero".into()));
        }
        if self.max_price_staleness_secs == 0 {
            return Err(Error::Config("max_price_staleness_secs cannot be zero".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ISSUANCE PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Reward-token emission schedule for the stability pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuanceParams {
    /// Total amount that will ever be issued
    pub supply_cap: u128,

    /// Per-minute decay factor of the remaining issuance
    pub issuance_factor: u128,

    /// Timestamp (seconds) at which issuance starts
    pub deployment_time: u64,
}

impl Default for IssuanceParams {
    fn default() -> Self {
        Self {
            supply_cap: ISSUANCE_SUPPLY_CAP,
            issuance_factor: ISSUANCE_FACTOR,
            deployment_time: 0,
        }
    }
}

impl IssuanceParams {
    /// Issuance that never emits anything
    pub fn disabled() -> Self {
        Self {
            supply_cap: 0,
            ..Default::default()
        }
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        if self.issuance_factor > ONE {
            return Err(Error::Config(format!(
                "issuance_factor {} exceeds 1.0",
                self.issuance_factor
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Complete protocol configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Collateralization and liquidation parameters
    pub params: ProtocolParams,

    /// Community issuance schedule
    pub issuance: IssuanceParams,
}

impl ProtocolConfig {
    /// Create a new protocol configuration
    pub fn new(params: ProtocolParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Replace the issuance schedule
    pub fn with_issuance(mut self, issuance: IssuanceParams) -> Self {
        self.issuance = issuance;
        self
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        self.issuance.validate()
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("failed to write {}: {}", path.display(), e)))
    }
}
