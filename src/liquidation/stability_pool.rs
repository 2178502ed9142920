//! Stability Pool deposits and front ends.
//!
//! The stability pool lets users deposit the stablecoin to absorb liquidated
//! debt. In return, depositors receive a share of the liquidated collateral and
//! of the reward-token issuance.
//!
//! This module holds the per-depositor and per-front-end records only. All
//! values are derived from their snapshots against the shared
//! [`RewardAccumulator`], which is the only state a liquidation touches.
//!
//! Deposits may be tagged with a registered front end. The front end keeps
//! `1 - kickbackRate` of the reward tokens earned by deposits it tagged; the
//! depositor keeps the rest. Front ends never receive collateral.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::liquidation::accumulator::{DepositSnapshot, RewardAccumulator};
use crate::utils::constants::DECIMAL_PRECISION;
use crate::utils::crypto::Address;
use crate::utils::math::mul_div;

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSIT
// ═══════════════════════════════════════════════════════════════════════════════

/// A single deposit in the stability pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Value recorded at the last deposit or withdrawal
    pub initial_value: u128,
    /// Front end that tagged the deposit
    pub front_end: Option<Address>,
    /// Accumulator state at the last deposit or withdrawal
    pub snapshot: DepositSnapshot,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FRONT END
// ═══════════════════════════════════════════════════════════════════════════════

/// A registered front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEnd {
    /// Share of reward tokens passed on to tagged depositors (18 decimals)
    pub kickback_rate: u128,
    /// Aggregate of tagged deposits at the last update
    pub stake: u128,
    /// Accumulator state at the last stake update. Only `P`, `G`, scale and epoch are used.
    pub snapshot: DepositSnapshot,
    /// Registration timestamp
    pub registered_at: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SETTLEMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything owed to a depositor and their front end at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settlement {
    /// Recorded deposit value
    pub initial_value: u128,
    /// Current compounded value
    pub compounded_deposit: u128,
    /// Collateral owed to the depositor
    pub collateral_gain: u128,
    /// Reward tokens owed to the depositor
    pub depositor_reward: u128,
    /// Front end tagged on the deposit
    pub front_end: Option<Address>,
    /// Reward tokens owed to the front end
    pub front_end_reward: u128,
    /// Current compounded stake of the front end
    pub compounded_front_end_stake: u128,
}

impl Settlement {
    /// Loss absorbed by the deposit since its snapshot
    pub fn deposit_loss(&self) -> u128 {
        self.initial_value.saturating_sub(self.compounded_deposit)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Deposit and front-end records of the stability pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StabilityPool {
    deposits: HashMap<Address, Deposit>,
    front_ends: HashMap<Address, FrontEnd>,
}

impl StabilityPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit record of a depositor
    pub fn deposit(&self, depositor: &Address) -> Option<&Deposit> {
        self.deposits.get(depositor)
    }

    /// Record of a front end
    pub fn front_end(&self, address: &Address) -> Option<&FrontEnd> {
        self.front_ends.get(address)
    }

    /// Check if an address is a registered front end
    pub fn is_registered_front_end(&self, address: &Address) -> bool {
        self.front_ends.contains_key(address)
    }

    /// Number of active deposits
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Number of registered front ends
    pub fn front_end_count(&self) -> usize {
        self.front_ends.len()
    }

    /// Iterate over depositors with an active deposit
    pub fn depositors(&self) -> impl Iterator<Item = &Address> {
        self.deposits.keys()
    }

    /// Get a deposit or fail with `NoDeposit`
    pub fn require_deposit(&self, depositor: &Address) -> Result<&Deposit> {
        self.deposits
            .get(depositor)
            .filter(|d| d.initial_value > 0)
            .ok_or_else(|| Error::NoDeposit(depositor.to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FRONT END REGISTRATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register `address` as a front end with the given kickback rate
    pub fn register_front_end(&mut self, address: Address, kickback_rate: u128, now: u64) -> Result<()> {
        if self.front_ends.contains_key(&address) {
            return Err(Error::AlreadyRegistered(address.to_string()));
        }
        if self.deposits.contains_key(&address) {
            return Err(Error::DepositExists(address.to_string()));
        }
        if kickback_rate > DECIMAL_PRECISION {
            return Err(Error::InvalidRate(kickback_rate));
        }

        self.front_ends.insert(
            address,
            FrontEnd {
                kickback_rate,
                stake: 0,
                snapshot: DepositSnapshot::default(),
                registered_at: now,
            },
        );
        tracing::info!(front_end = %address, kickback_rate, "front end registered");
        Ok(())
    }

    /// Validate a deposit request before any state changes
    pub fn validate_provide(
        &self,
        depositor: &Address,
        front_end: Option<&Address>,
        amount: u128,
    ) -> Result<()> {
        if let Some(tag) = front_end {
            if !self.front_ends.contains_key(tag) {
                return Err(Error::UnregisteredFrontEnd(tag.to_string()));
            }
        }
        if self.front_ends.contains_key(depositor) {
            return Err(Error::Unauthorized(format!(
                "front end {} cannot hold a deposit",
                depositor
            )));
        }
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DERIVED VALUES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Current value of a deposit
    pub fn compounded_deposit(&self, acc: &RewardAccumulator, depositor: &Address) -> u128 {
        self.deposits
            .get(depositor)
            .map(|d| acc.compounded_value(d.initial_value, &d.snapshot))
            .unwrap_or(0)
    }

    /// Collateral gained by a deposit
    pub fn collateral_gain(&self, acc: &RewardAccumulator, depositor: &Address) -> Result<u128> {
        match self.deposits.get(depositor) {
            Some(d) => acc.collateral_gain(d.initial_value, &d.snapshot),
            None => Ok(0),
        }
    }

    /// Reward tokens owed to a depositor after the front-end kickback
    pub fn depositor_reward_gain(&self, acc: &RewardAccumulator, depositor: &Address) -> Result<u128> {
        let Some(deposit) = self.deposits.get(depositor) else {
            return Ok(0);
        };
        let kickback = self.kickback_rate(deposit.front_end.as_ref());
        let raw = acc.reward_gain(deposit.initial_value, &deposit.snapshot)?;
        mul_div(kickback, raw, DECIMAL_PRECISION)
    }

    /// Reward tokens owed to a front end
    pub fn front_end_reward_gain(&self, acc: &RewardAccumulator, address: &Address) -> Result<u128> {
        let Some(front_end) = self.front_ends.get(address) else {
            return Ok(0);
        };
        let share = DECIMAL_PRECISION - front_end.kickback_rate;
        let raw = acc.reward_gain(front_end.stake, &front_end.snapshot)?;
        mul_div(share, raw, DECIMAL_PRECISION)
    }

    /// Current value of a front end's stake
    pub fn compounded_front_end_stake(&self, acc: &RewardAccumulator, address: &Address) -> u128 {
        self.front_ends
            .get(address)
            .map(|fe| acc.compounded_value(fe.stake, &fe.snapshot))
            .unwrap_or(0)
    }

    /// Everything owed to `depositor` and their front end right now
    pub fn settle(&self, acc: &RewardAccumulator, depositor: &Address) -> Result<Settlement> {
        let Some(deposit) = self.deposits.get(depositor) else {
            return Ok(Settlement::default());
        };
        let front_end = deposit.front_end;
        let (front_end_reward, compounded_front_end_stake) = match front_end.as_ref() {
            Some(fe) => (
                self.front_end_reward_gain(acc, fe)?,
                self.compounded_front_end_stake(acc, fe),
            ),
            None => (0, 0),
        };

        Ok(Settlement {
            initial_value: deposit.initial_value,
            compounded_deposit: acc.compounded_value(deposit.initial_value, &deposit.snapshot),
            collateral_gain: acc.collateral_gain(deposit.initial_value, &deposit.snapshot)?,
            depositor_reward: self.depositor_reward_gain(acc, depositor)?,
            front_end,
            front_end_reward,
            compounded_front_end_stake,
        })
    }

    fn kickback_rate(&self, front_end: Option<&Address>) -> u128 {
        front_end
            .and_then(|fe| self.front_ends.get(fe))
            .map(|fe| fe.kickback_rate)
            .unwrap_or(DECIMAL_PRECISION)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // UPDATES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a new deposit value and re-snapshot it.
    ///
    /// A zero value removes the deposit together with its front-end tag. The
    /// tag is only taken from `front_end` when no deposit is recorded yet.
    pub fn set_deposit(
        &mut self,
        acc: &RewardAccumulator,
        depositor: Address,
        value: u128,
        front_end: Option<Address>,
    ) {
        if value == 0 {
            self.deposits.remove(&depositor);
            return;
        }
        let snapshot = acc.snapshot();
        let entry = self.deposits.entry(depositor).or_insert(Deposit {
            initial_value: 0,
            front_end,
            snapshot,
        });
        entry.initial_value = value;
        entry.snapshot = snapshot;
    }

    /// Record a new front-end stake and re-snapshot it
    pub fn set_front_end_stake(&mut self, acc: &RewardAccumulator, address: &Address, stake: u128) {
        if let Some(front_end) = self.front_ends.get_mut(address) {
            front_end.stake = stake;
            front_end.snapshot = if stake == 0 {
                DepositSnapshot::default()
            } else {
                acc.snapshot()
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::ONE;

    fn alice() -> Address {
        Address::from_label("alice")
    }

    fn bob() -> Address {
        Address::from_label("bob")
    }

    fn frontend() -> Address {
        Address::from_label("frontend")
    }

    /// Mirror of what the protocol does on a first deposit
    fn provide(
        pool: &mut StabilityPool,
        acc: &mut RewardAccumulator,
        who: Address,
        amount: u128,
        tag: Option<Address>,
    ) {
        pool.validate_provide(&who, tag.as_ref(), amount).unwrap();
        let settlement = pool.settle(acc, &who).unwrap();
        if let Some(fe) = tag {
            let stake = pool.compounded_front_end_stake(acc, &fe) + amount;
            pool.set_front_end_stake(acc, &fe, stake);
        }
        acc.increase_deposits(amount).unwrap();
        pool.set_deposit(acc, who, settlement.compounded_deposit + amount, tag);
    }

    #[test]
    fn test_register_front_end() {
        let mut pool = StabilityPool::new();
        pool.register_front_end(frontend(), ONE / 2, 10).unwrap();
        assert!(pool.is_registered_front_end(&frontend()));
        assert_eq!(pool.front_end(&frontend()).unwrap().registered_at, 10);

        assert!(matches!(
            pool.register_front_end(frontend(), ONE / 2, 11),
            Err(Error::AlreadyRegistered(_))
        ));
        assert!(matches!(
            pool.register_front_end(bob(), ONE + 1, 11),
            Err(Error::InvalidRate(_))
        ));
        assert!(pool.register_front_end(bob(), ONE, 11).is_ok());
        assert_eq!(pool.front_end_count(), 2);
    }

    #[test]
    fn test_depositor_cannot_register() {
        let mut pool = StabilityPool::new();
        let mut acc = RewardAccumulator::new();
        provide(&mut pool, &mut acc, alice(), 100 * ONE, None);
        assert!(matches!(
            pool.register_front_end(alice(), ONE, 0),
            Err(Error::DepositExists(_))
        ));
    }

    #[test]
    fn test_validate_provide() {
        let mut pool = StabilityPool::new();
        pool.register_front_end(frontend(), ONE, 0).unwrap();

        assert!(matches!(
            pool.validate_provide(&alice(), Some(&bob()), ONE),
            Err(Error::UnregisteredFrontEnd(_))
        ));
        assert!(matches!(
            pool.validate_provide(&frontend(), None, ONE),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            pool.validate_provide(&alice(), None, 0),
            Err(Error::ZeroAmount)
        ));
        assert!(pool.validate_provide(&alice(), Some(&frontend()), ONE).is_ok());
    }

    #[test]
    fn test_require_deposit() {
        let mut pool = StabilityPool::new();
        let mut acc = RewardAccumulator::new();
        assert!(matches!(pool.require_deposit(&alice()), Err(Error::NoDeposit(_))));
        provide(&mut pool, &mut acc, alice(), 100 * ONE, None);
        assert_eq!(pool.require_deposit(&alice()).unwrap().initial_value, 100 * ONE);
    }

    #[test]
    fn test_kickback_split() {
        let mut pool = StabilityPool::new();
        let mut acc = RewardAccumulator::new();
        pool.register_front_end(frontend(), ONE / 4, 0).unwrap();

        provide(&mut pool, &mut acc, alice(), 1_000 * ONE, Some(frontend()));
        provide(&mut pool, &mut acc, bob(), 1_000 * ONE, None);
        acc.update_g(200 * ONE).unwrap();

        // Alice keeps a quarter of her 100, the front end takes the rest
        let alice_reward = pool.depositor_reward_gain(&acc, &alice()).unwrap();
        let fe_reward = pool.front_end_reward_gain(&acc, &frontend()).unwrap();
        let bob_reward = pool.depositor_reward_gain(&acc, &bob()).unwrap();
        assert!(alice_reward.abs_diff(25 * ONE) < 1_000);
        assert!(fe_reward.abs_diff(75 * ONE) < 1_000);
        assert!(bob_reward.abs_diff(100 * ONE) < 1_000);
    }

    #[test]
    fn test_settle_after_offset() {
        let mut pool = StabilityPool::new();
        let mut acc = RewardAccumulator::new();
        pool.register_front_end(frontend(), ONE, 0).unwrap();
        provide(&mut pool, &mut acc, alice(), 1_000 * ONE, Some(frontend()));

        acc.offset(400 * ONE, 4 * ONE).unwrap();

        let settlement = pool.settle(&acc, &alice()).unwrap();
        assert_eq!(settlement.front_end, Some(frontend()));
        assert!(settlement.compounded_deposit.abs_diff(600 * ONE) < 1_000);
        assert!(settlement.collateral_gain.abs_diff(4 * ONE) < 1_000);
        assert!(settlement.compounded_front_end_stake.abs_diff(600 * ONE) < 1_000);
        assert!(settlement.deposit_loss().abs_diff(400 * ONE) < 1_000);
        assert_eq!(settlement.front_end_reward, 0);
    }

    #[test]
    fn test_tag_fixed_while_deposit_open() {
        let mut pool = StabilityPool::new();
        let mut acc = RewardAccumulator::new();
        pool.register_front_end(frontend(), ONE, 0).unwrap();
        pool.register_front_end(bob(), ONE, 0).unwrap();

        provide(&mut pool, &mut acc, alice(), 10 * ONE, Some(frontend()));
        pool.set_deposit(&acc, alice(), 20 * ONE, Some(bob()));
        assert_eq!(pool.deposit(&alice()).unwrap().front_end, Some(frontend()));

        pool.set_deposit(&acc, alice(), 0, None);
        assert!(pool.deposit(&alice()).is_none());
        pool.set_deposit(&acc, alice(), 5 * ONE, Some(bob()));
        assert_eq!(pool.deposit(&alice()).unwrap().front_end, Some(bob()));
    }

    #[test]
    fn test_zero_front_end_stake_clears_snapshot() {
        let mut pool = StabilityPool::new();
        let acc = RewardAccumulator::new();
        pool.register_front_end(frontend(), ONE, 0).unwrap();
        pool.set_front_end_stake(&acc, &frontend(), 10 * ONE);
        assert_eq!(pool.front_end(&frontend()).unwrap().snapshot.p, ONE);
        pool.set_front_end_stake(&acc, &frontend(), 0);
        assert_eq!(pool.front_end(&frontend()).unwrap().snapshot, DepositSnapshot::default());
        assert_eq!(pool.compounded_front_end_stake(&acc, &frontend()), 0);
    }
}
