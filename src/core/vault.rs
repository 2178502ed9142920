//! Vault (collateralized debt position) data model.
//!
//! A vault is never deleted: closing it moves it into a terminal status so
//! that its history stays queryable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::{Address, VaultId};
use crate::utils::math::{compute_cr, compute_nominal_cr};

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VaultStatus {
    /// Never opened
    #[default]
    Nonexistent,
    /// Open and accruing
    Active,
    /// Closed by its owner after repaying the debt
    ClosedByOwner,
    /// Closed by a liquidation
    ClosedByLiquidation,
}

impl VaultStatus {
    /// Check if the vault is open
    pub fn is_active(&self) -> bool {
        matches!(self, VaultStatus::Active)
    }

    /// Check if the vault reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, VaultStatus::ClosedByOwner | VaultStatus::ClosedByLiquidation)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWARD SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Redistribution accumulators (`L_coll`, `L_debt`) at the vault's last touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewardSnapshot {
    /// `L_coll` at last touch
    pub coll: u128,
    /// `L_debt` at last touch
    pub debt: u128,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT
// ═══════════════════════════════════════════════════════════════════════════════

/// An individual collateralized debt position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Unique identifier
    pub id: VaultId,
    /// Owner account
    pub owner: Address,
    /// Recorded debt, excluding pending redistribution rewards
    pub debt: u128,
    /// Recorded collateral, excluding pending redistribution rewards
    pub coll: u128,
    /// Redistribution stake
    pub stake: u128,
    /// Lifecycle status
    pub status: VaultStatus,
    /// Redistribution snapshot at last touch
    pub snapshot: RewardSnapshot,
    /// Timestamp when the vault was opened
    pub created_at: u64,
    /// Timestamp of the last modification
    pub last_updated: u64,
}

impl Vault {
    /// Create a new active vault
    pub fn new(owner: Address, nonce: u64, coll: u128, debt: u128, timestamp: u64) -> Self {
        Self {
            id: VaultId::generate(&owner, nonce),
            owner,
            debt,
            coll,
            stake: 0,
            status: VaultStatus::Active,
            snapshot: RewardSnapshot::default(),
            created_at: timestamp,
            last_updated: timestamp,
        }
    }

    /// Check if the vault is open
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Collateral ratio of the recorded amounts at `price`
    pub fn icr(&self, price: u128) -> u128 {
        compute_cr(self.coll, self.debt, price)
    }

    /// Price-free collateral ratio of the recorded amounts
    pub fn nicr(&self) -> u128 {
        compute_nominal_cr(self.coll, self.debt)
    }

    /// Verify that `caller` owns this vault
    pub fn verify_owner(&self, caller: &Address) -> Result<()> {
        if &self.owner != caller {
            return Err(Error::Unauthorized(format!(
                "{} does not own vault {}",
                caller,
                self.id.short()
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage for every vault ever opened
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultManager {
    vaults: HashMap<VaultId, Vault>,
    nonces: HashMap<Address, u64>,
}

impl VaultManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused nonce for `owner`
    pub fn next_nonce(&self, owner: &Address) -> u64 {
        self.nonces.get(owner).copied().unwrap_or(0)
    }

    /// Register a freshly created vault
    pub fn register(&mut self, vault: Vault) -> Result<()> {
        if self.vaults.contains_key(&vault.id) {
            return Err(Error::InvalidArgument(format!(
                "vault {} already exists",
                vault.id.short()
            )));
        }
        let nonce = self.nonces.entry(vault.owner).or_insert(0);
        *nonce += 1;
        self.vaults.insert(vault.id, vault);
        Ok(())
    }

    /// Get a vault by ID
    pub fn get(&self, id: &VaultId) -> Option<&Vault> {
        self.vaults.get(id)
    }

    /// Get a mutable vault by ID
    pub fn get_mut(&mut self, id: &VaultId) -> Option<&mut Vault> {
        self.vaults.get_mut(id)
    }

    /// Get an active vault or fail with `VaultNotActive`
    pub fn active(&self, id: &VaultId) -> Result<&Vault> {
        self.vaults
            .get(id)
            .filter(|v| v.is_active())
            .ok_or_else(|| Error::VaultNotActive(id.short()))
    }

    /// Status of a vault, `Nonexistent` if unknown
    pub fn status(&self, id: &VaultId) -> VaultStatus {
        self.vaults.get(id).map(|v| v.status).unwrap_or_default()
    }

    /// All vaults owned by `owner`
    pub fn by_owner(&self, owner: &Address) -> Vec<&Vault> {
        self.vaults.values().filter(|v| &v.owner == owner).collect()
    }

    /// Number of active vaults
    pub fn active_count(&self) -> usize {
        self.vaults.values().filter(|v| v.is_active()).count()
    }

    /// Iterate over all vaults
    pub fn iter(&self) -> impl Iterator<Item = &Vault> {
        self.vaults.values()
    }
}
