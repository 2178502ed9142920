//! Protocol operations - atomic state changes.
//!
//! Operations represent discrete actions that can be executed atomically
//! on the protocol state through [`ProtocolStateMachine::execute`]. Each
//! operation validates inputs, modifies state, and emits appropriate events.
//!
//! [`ProtocolStateMachine::execute`]: crate::protocol::state_machine::ProtocolStateMachine::execute

use serde::{Deserialize, Serialize};

use crate::liquidation::accumulator::OffsetOutcome;
use crate::liquidation::engine::LiquidationTotals;
use crate::liquidation::recovery::SystemMode;
use crate::utils::crypto::{Address, VaultId};

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProtocolOperation {
    /// Open a vault, borrowing `net_debt` against `coll`
    OpenVault {
        /// Owner of the new vault
        owner: Address,
        /// Collateral to lock
        coll: u128,
        /// Debt to receive, excluding the gas compensation reserve
        net_debt: u128,
    },
    /// Add collateral to an owned vault
    AddCollateral {
        /// Vault owner
        caller: Address,
        /// Target vault
        vault_id: VaultId,
        /// Collateral to add
        amount: u128,
    },
    /// Repay all debt and close an owned vault
    CloseVault {
        /// Vault owner
        caller: Address,
        /// Target vault
        vault_id: VaultId,
    },
    /// Claim collateral surplus left by a capped liquidation
    ClaimCollateralSurplus {
        /// Former vault owner
        owner: Address,
    },
    /// Liquidate one vault
    Liquidate {
        /// Caller receiving gas compensation
        liquidator: Address,
        /// Target vault
        vault_id: VaultId,
    },
    /// Liquidate up to `count` vaults starting from the lowest ratio
    LiquidateBatch {
        /// Caller receiving gas compensation
        liquidator: Address,
        /// Maximum vaults to consider
        count: usize,
    },
    /// Liquidate an explicit list of vaults
    BatchLiquidate {
        /// Caller receiving gas compensation
        liquidator: Address,
        /// Candidate vaults
        vault_ids: Vec<VaultId>,
    },
    /// Deposit into the stability pool
    ProvideToPool {
        /// Depositor
        depositor: Address,
        /// Stablecoin to deposit
        amount: u128,
        /// Optional front end tag
        front_end: Option<Address>,
    },
    /// Withdraw from the stability pool
    WithdrawFromPool {
        /// Depositor
        depositor: Address,
        /// Requested amount, capped at the compounded deposit
        amount: u128,
    },
    /// Move the collateral gain into the depositor's vault
    RedirectGainToVault {
        /// Depositor and vault owner
        depositor: Address,
        /// Receiving vault
        vault_id: VaultId,
    },
    /// Register as a front end
    RegisterFrontEnd {
        /// Front end address
        front_end: Address,
        /// Share of reward tokens passed on to depositors
        kickback_rate: u128,
    },
}

impl ProtocolOperation {
    /// Get the operation type name
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::OpenVault { .. } => "OpenVault",
            Self::AddCollateral { .. } => "AddCollateral",
            Self::CloseVault { .. } => "CloseVault",
            Self::ClaimCollateralSurplus { .. } => "ClaimCollateralSurplus",
            Self::Liquidate { .. } => "Liquidate",
            Self::LiquidateBatch { .. } => "LiquidateBatch",
            Self::BatchLiquidate { .. } => "BatchLiquidate",
            Self::ProvideToPool { .. } => "ProvideToPool",
            Self::WithdrawFromPool { .. } => "WithdrawFromPool",
            Self::RedirectGainToVault { .. } => "RedirectGainToVault",
            Self::RegisterFrontEnd { .. } => "RegisterFrontEnd",
        }
    }

    /// Get the calling account
    pub fn caller(&self) -> &Address {
        match self {
            Self::OpenVault { owner, .. } | Self::ClaimCollateralSurplus { owner } => owner,
            Self::AddCollateral { caller, .. } | Self::CloseVault { caller, .. } => caller,
            Self::Liquidate { liquidator, .. }
            | Self::LiquidateBatch { liquidator, .. }
            | Self::BatchLiquidate { liquidator, .. } => liquidator,
            Self::ProvideToPool { depositor, .. }
            | Self::WithdrawFromPool { depositor, .. }
            | Self::RedirectGainToVault { depositor, .. } => depositor,
            Self::RegisterFrontEnd { front_end, .. } => front_end,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a committed liquidation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationSummary {
    /// Liquidated vaults in order
    pub liquidated: Vec<VaultId>,
    /// Candidates left untouched
    pub skipped: Vec<VaultId>,
    /// Mode at the start of the call
    pub mode: SystemMode,
    /// Batch totals
    pub totals: LiquidationTotals,
    /// Effect on the stability pool accumulator
    pub offset: OffsetOutcome,
}

/// Outcome of a stability pool operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolUpdate {
    /// Compounded deposit before the operation
    pub compounded_before: u128,
    /// Recorded deposit after the operation
    pub new_deposit: u128,
    /// Collateral paid out or redirected
    pub coll_gain: u128,
    /// Reward tokens paid to the depositor
    pub reward_gain: u128,
    /// Reward tokens paid to the front end
    pub front_end_reward: u128,
}

/// Result of executing an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    /// A vault was opened
    VaultOpened {
        /// New vault
        vault_id: VaultId,
        /// Debt including the gas reserve
        debt: u128,
        /// ICR at opening
        icr: u128,
    },
    /// Collateral was added
    CollateralAdded {
        /// Collateral after the top-up
        new_coll: u128,
    },
    /// A vault was closed
    VaultClosed {
        /// Collateral returned to the owner
        coll_returned: u128,
    },
    /// Collateral surplus was claimed
    SurplusClaimed {
        /// Collateral paid
        amount: u128,
    },
    /// Vaults were liquidated
    Liquidated(LiquidationSummary),
    /// A deposit changed
    PoolUpdated(PoolUpdate),
    /// A front end registered
    FrontEndRegistered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::ONE;

    #[test]
    fn test_operation_metadata() {
        let alice = Address::from_label("alice");
        let op = ProtocolOperation::ProvideToPool {
            depositor: alice,
            amount: 100 * ONE,
            front_end: None,
        };
        assert_eq!(op.operation_type(), "ProvideToPool");
        assert_eq!(op.caller(), &alice);
    }

    #[test]
    fn test_operation_json_tagging() {
        let op = ProtocolOperation::LiquidateBatch {
            liquidator: Address::from_label("keeper"),
            count: 10,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"op\":\"liquidate_batch\""));
        let parsed: ProtocolOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, op);
    }
}
