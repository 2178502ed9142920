//! Ordered position registry.
//!
//! The liquidation engine only needs ordered iteration from the riskiest vault
//! upwards plus membership checks, expressed by [`PositionRegistry`]. Vaults are
//! keyed by their nominal collateral ratio (NICR), which is price independent,
//! so the ordering survives price moves without re-sorting.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::utils::crypto::VaultId;

/// Ordered view over open vaults, lowest collateral ratio first
pub trait PositionRegistry {
    /// Vault with the lowest ratio
    fn first(&self) -> Option<VaultId>;

    /// Vault following `id` in ascending ratio order
    fn next(&self, id: &VaultId) -> Option<VaultId>;

    /// Check membership
    fn contains(&self, id: &VaultId) -> bool;

    /// Number of vaults held
    fn len(&self) -> usize;

    /// Check if the registry is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a vault with its nominal ratio
    fn insert(&mut self, id: VaultId, nicr: u128);

    /// Remove a vault, returning whether it was present
    fn remove(&mut self, id: &VaultId) -> bool;

    /// Move an existing vault to the position given by a new nominal ratio
    fn reinsert(&mut self, id: VaultId, nicr: u128) {
        self.remove(&id);
        self.insert(id, nicr);
    }
}

/// In-memory registry backed by a B-tree ordered on `(nicr, id)`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortedVaults {
    ordered: BTreeSet<(u128, VaultId)>,
    keys: HashMap<VaultId, u128>,
}

impl SortedVaults {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Nominal ratio a vault was inserted with
    pub fn nicr_of(&self, id: &VaultId) -> Option<u128> {
        self.keys.get(id).copied()
    }

    /// Iterate in ascending ratio order
    pub fn iter(&self) -> impl Iterator<Item = VaultId> + '_ {
        self.ordered.iter().map(|(_, id)| *id)
    }
}

impl PositionRegistry for SortedVaults {
    fn first(&self) -> Option<VaultId> {
        self.ordered.iter().next().map(|(_, id)| *id)
    }

    fn next(&self, id: &VaultId) -> Option<VaultId> {
        let nicr = self.keys.get(id)?;
        self.ordered
            .range((*nicr, *id)..)
            .nth(1)
            .map(|(_, next)| *next)
    }

    fn contains(&self, id: &VaultId) -> bool {
        self.keys.contains_key(id)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn insert(&mut self, id: VaultId, nicr: u128) {
        if let Some(old) = self.keys.insert(id, nicr) {
            self.ordered.remove(&(old, id));
        }
        self.ordered.insert((nicr, id));
    }

    fn remove(&mut self, id: &VaultId) -> bool {
        match self.keys.remove(id) {
            Some(nicr) => {
                self.ordered.remove(&(nicr, *id));
                true
            }
            None => false,
        }
    }
}
