//! Recovery Mode rules.
//!
//! Recovery Mode is active while the Total Collateralization Ratio (TCR) is
//! below the Critical Collateralization Ratio (CCR). In this mode:
//!
//! 1. **Liquidation threshold raised**: vaults below the current TCR can be
//!    liquidated, subject to pool coverage and a collateral cap
//! 2. **Opening restricted**: new vaults must be opened at or above CCR
//! 3. **Closing blocked**: owners cannot close vaults while the system is at risk
//!
//! This module classifies vaults into liquidation bands and validates borrower
//! operations against the current mode.

use serde::{Deserialize, Serialize};

use crate::core::config::ProtocolParams;
use crate::error::{Error, Result};
use crate::utils::constants::RECOVERY_CAP_RATIO;
use crate::utils::math::compute_cr;

// ═══════════════════════════════════════════════════════════════════════════════
// SYSTEM MODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Operating mode of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SystemMode {
    /// TCR at or above CCR
    #[default]
    Normal,
    /// TCR below CCR
    Recovery,
}

impl SystemMode {
    /// Mode implied by a TCR
    pub fn from_tcr(tcr: u128, ccr: u128) -> Self {
        if tcr < ccr {
            SystemMode::Recovery
        } else {
            SystemMode::Normal
        }
    }

    /// Check if Recovery Mode is active
    pub fn is_recovery(&self) -> bool {
        matches!(self, SystemMode::Recovery)
    }
}

/// Total Collateralization Ratio of the whole system
pub fn compute_tcr(total_coll: u128, total_debt: u128, price: u128) -> u128 {
    compute_cr(total_coll, total_debt, price)
}

/// Snapshot of system health at a given price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Current mode
    pub mode: SystemMode,
    /// Total collateralization ratio
    pub tcr: u128,
    /// Active plus default collateral
    pub total_coll: u128,
    /// Active plus default debt
    pub total_debt: u128,
    /// Price used
    pub price: u128,
}

impl SystemStatus {
    /// Evaluate system health
    pub fn evaluate(total_coll: u128, total_debt: u128, price: u128, ccr: u128) -> Self {
        let tcr = compute_tcr(total_coll, total_debt, price);
        Self {
            mode: SystemMode::from_tcr(tcr, ccr),
            tcr,
            total_coll,
            total_debt,
            price,
        }
    }

    /// Check if Recovery Mode is active
    pub fn is_recovery(&self) -> bool {
        self.mode.is_recovery()
    }

    /// TCR after adding the given deltas to the system
    pub fn tcr_after(&self, coll_delta: i128, debt_delta: i128) -> u128 {
        compute_tcr(
            apply_delta(self.total_coll, coll_delta),
            apply_delta(self.total_debt, debt_delta),
            self.price,
        )
    }
}

fn apply_delta(value: u128, delta: i128) -> u128 {
    if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION BANDS
// ═══════════════════════════════════════════════════════════════════════════════

/// ICR band deciding how a vault is treated in Recovery Mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationBand {
    /// ICR below 100%: offset then redistribute, as in Normal Mode
    Insolvent,
    /// 100% <= ICR < MCR: full pool coverage required, collateral capped at the debt value
    BelowMinimum,
    /// MCR <= ICR < TCR: full coverage and a non-decreasing TCR required,
    /// collateral capped at MCR
    BelowSystem,
    /// ICR >= TCR: never liquidated
    Healthy,
}

impl LiquidationBand {
    /// Classify a vault's ICR against the batch TCR
    pub fn classify(icr: u128, mcr: u128, tcr: u128) -> Self {
        if icr < RECOVERY_CAP_RATIO {
            LiquidationBand::Insolvent
        } else if icr < mcr {
            LiquidationBand::BelowMinimum
        } else if icr < tcr {
            LiquidationBand::BelowSystem
        } else {
            LiquidationBand::Healthy
        }
    }

    /// Collateral ratio at which the seized collateral is capped, if any
    pub fn cap_ratio(&self, mcr: u128) -> Option<u128> {
        match self {
            LiquidationBand::BelowMinimum => Some(RECOVERY_CAP_RATIO),
            LiquidationBand::BelowSystem => Some(mcr),
            _ => None,
        }
    }

    /// Check if the band only liquidates with full pool coverage
    pub fn requires_full_offset(&self) -> bool {
        matches!(self, LiquidationBand::BelowMinimum | LiquidationBand::BelowSystem)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATION VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of validating a borrower operation against the system mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryModeValidation {
    /// Operation is allowed
    Allowed,
    /// Operation is blocked with reason
    Blocked(String),
}

impl RecoveryModeValidation {
    /// Check if operation is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Convert to a result
    pub fn to_result(&self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Blocked(reason) => {
                tracing::debug!(%reason, "operation blocked by recovery mode");
                Err(Error::RecoveryMode)
            }
        }
    }
}

/// Recovery Mode checks for borrower operations
#[derive(Debug, Clone, Default)]
pub struct RecoveryModeManager {
    params: ProtocolParams,
}

impl RecoveryModeManager {
    /// Create a manager for the given parameters
    pub fn new(params: ProtocolParams) -> Self {
        Self { params }
    }

    /// Minimum ICR a new vault must have in the given mode
    pub fn required_open_ratio(&self, mode: SystemMode) -> u128 {
        match mode {
            SystemMode::Normal => self.params.mcr,
            SystemMode::Recovery => self.params.ccr,
        }
    }

    /// Validate opening a vault with `icr`
    pub fn validate_open(&self, status: &SystemStatus, icr: u128) -> Result<()> {
        let minimum = self.required_open_ratio(status.mode);
        if icr < minimum {
            return Err(Error::CollateralizationRatioTooLow {
                current: icr,
                minimum,
            });
        }
        Ok(())
    }

    /// Validate closing a vault
    pub fn validate_close(&self, status: &SystemStatus) -> RecoveryModeValidation {
        if status.is_recovery() {
            RecoveryModeValidation::Blocked("vaults cannot be closed in recovery mode".into())
        } else {
            RecoveryModeValidation::Allowed
        }
    }

    /// Validate that opening a vault keeps Normal Mode
    pub fn validate_open_tcr(
        &self,
        status: &SystemStatus,
        coll: u128,
        debt: u128,
    ) -> RecoveryModeValidation {
        if status.is_recovery() {
            return RecoveryModeValidation::Allowed;
        }
        let new_tcr = status.tcr_after(coll as i128, debt as i128);
        if new_tcr < self.params.ccr {
            RecoveryModeValidation::Blocked(format!(
                "opening would push TCR to {} below CCR {}",
                new_tcr, self.params.ccr
            ))
        } else {
            RecoveryModeValidation::Allowed
        }
    }
}
