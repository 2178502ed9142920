//! System pool accounting.
//!
//! Collateral and debt move between a handful of internal accounts:
//!
//! - **Active pool**: collateral and debt of open vaults
//! - **Default pool**: redistributed collateral and debt not yet applied to vaults
//! - **Stability pool**: collateral gained from offsets, owed to depositors
//! - **Surplus pool**: collateral owed back to owners of capped liquidations
//! - **Gas pool**: stablecoin reserve paid to liquidators
//!
//! [`SystemPools`] keeps the accounting totals. The matching token balances are
//! held in the ledgers under the addresses in [`SystemAccounts`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// SYSTEM ACCOUNTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ledger addresses of the internal pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAccounts {
    /// Holds collateral of open vaults
    pub active_pool: Address,
    /// Holds redistributed collateral
    pub default_pool: Address,
    /// Holds deposited stablecoin and collateral gains
    pub stability_pool: Address,
    /// Holds claimable collateral surplus
    pub surplus_pool: Address,
    /// Holds the stablecoin gas reserve
    pub gas_pool: Address,
    /// Holds unissued reward tokens
    pub community_issuance: Address,
}

impl Default for SystemAccounts {
    fn default() -> Self {
        Self {
            active_pool: Address::system("active_pool"),
            default_pool: Address::system("default_pool"),
            stability_pool: Address::system("stability_pool"),
            surplus_pool: Address::system("surplus_pool"),
            gas_pool: Address::system("gas_pool"),
            community_issuance: Address::system("community_issuance"),
        }
    }
}

impl SystemAccounts {
    /// Check if an address belongs to the protocol
    pub fn is_system(&self, address: &Address) -> bool {
        [
            self.active_pool,
            self.default_pool,
            self.stability_pool,
            self.surplus_pool,
            self.gas_pool,
            self.community_issuance,
        ]
        .contains(address)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYSTEM POOLS
// ═══════════════════════════════════════════════════════════════════════════════

/// Accounting totals for the internal pools
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPools {
    /// Collateral held for open vaults
    pub active_coll: u128,
    /// Debt of open vaults
    pub active_debt: u128,
    /// Redistributed collateral awaiting application
    pub default_coll: u128,
    /// Redistributed debt awaiting application
    pub default_debt: u128,
    /// Collateral held by the stability pool for depositors
    pub stability_coll: u128,
    /// Claimable collateral per former vault owner
    surplus: HashMap<Address, u128>,
    /// Sum of all claimable surplus
    pub total_surplus: u128,
}

impl SystemPools {
    /// Create empty pools
    pub fn new() -> Self {
        Self::default()
    }

    /// Collateral of the whole system (active plus default)
    pub fn entire_system_coll(&self) -> u128 {
        self.active_coll.saturating_add(self.default_coll)
    }

    /// Debt of the whole system (active plus default)
    pub fn entire_system_debt(&self) -> u128 {
        self.active_debt.saturating_add(self.default_debt)
    }

    /// Claimable surplus of an owner
    pub fn surplus_of(&self, owner: &Address) -> u128 {
        self.surplus.get(owner).copied().unwrap_or(0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MOVEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Collateral and debt entering the active pool (open, top-up, redirect)
    pub fn increase_active(&mut self, coll: u128, debt: u128) {
        self.active_coll = self.active_coll.saturating_add(coll);
        self.active_debt = self.active_debt.saturating_add(debt);
    }

    /// Collateral and debt leaving the active pool (close)
    pub fn decrease_active(&mut self, coll: u128, debt: u128) {
        self.active_coll = self.active_coll.saturating_sub(coll);
        self.active_debt = self.active_debt.saturating_sub(debt);
    }

    /// Apply pending redistribution rewards to a vault
    pub fn move_pending_to_active(&mut self, coll: u128, debt: u128) {
        self.default_coll = self.default_coll.saturating_sub(coll);
        self.default_debt = self.default_debt.saturating_sub(debt);
        self.increase_active(coll, debt);
    }

    /// Debt cancelled against the stability pool and the matching collateral gained
    pub fn offset(&mut self, debt: u128, coll: u128) {
        self.decrease_active(coll, debt);
        self.stability_coll = self.stability_coll.saturating_add(coll);
    }

    /// Debt and collateral redistributed to the remaining vaults
    pub fn redistribute(&mut self, debt: u128, coll: u128) {
        self.decrease_active(coll, debt);
        self.default_coll = self.default_coll.saturating_add(coll);
        self.default_debt = self.default_debt.saturating_add(debt);
    }

    /// Collateral paid out from the active pool (gas compensation)
    pub fn send_active_coll(&mut self, coll: u128) {
        self.active_coll = self.active_coll.saturating_sub(coll);
    }

    /// Collateral paid out of the stability pool to a depositor or vault
    pub fn send_stability_coll(&mut self, coll: u128) {
        self.stability_coll = self.stability_coll.saturating_sub(coll);
    }

    /// Record collateral surplus owed to `owner`
    pub fn add_surplus(&mut self, owner: &Address, coll: u128) {
        if coll == 0 {
            return;
        }
        self.active_coll = self.active_coll.saturating_sub(coll);
        *self.surplus.entry(*owner).or_insert(0) += coll;
        self.total_surplus = self.total_surplus.saturating_add(coll);
    }

    /// Remove and return the surplus owed to `owner`
    pub fn take_surplus(&mut self, owner: &Address) -> Result<u128> {
        match self.surplus.remove(owner) {
            Some(amount) if amount > 0 => {
                self.total_surplus = self.total_surplus.saturating_sub(amount);
                Ok(amount)
            }
            _ => Err(Error::NoSurplus(owner.to_string())),
        }
    }

    /// Verify that the surplus total matches the per-owner entries
    pub fn verify_invariant(&self) -> bool {
        self.surplus
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v))
            == Some(self.total_surplus)
    }
}
