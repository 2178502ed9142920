//! Liquidation Engine.
//!
//! This module decides which vaults to liquidate and how each one is split:
//! - Detection of liquidatable vaults in ascending ratio order
//! - Normal Mode and Recovery Mode rules, re-evaluated after every vault
//! - Offset against the stability pool with redistribution as fallback
//! - Gas compensation and capped collateral surplus
//!
//! Planning is pure. A [`LiquidationPlan`] is applied to the shared
//! [`Accounting`] in one step, with exactly one offset and one redistribution
//! per batch regardless of the number of depositors or vaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::config::{IssuanceParams, ProtocolParams};
use crate::core::pools::{SystemAccounts, SystemPools};
use crate::core::registry::PositionRegistry;
use crate::core::token::LedgerOp;
use crate::core::vault::{Vault, VaultManager};
use crate::error::{Error, Result};
use crate::liquidation::accumulator::{OffsetOutcome, RewardAccumulator};
use crate::liquidation::issuance::CommunityIssuance;
use crate::liquidation::recovery::{compute_tcr, LiquidationBand, SystemMode};
use crate::liquidation::redistribution::{PendingRewards, RedistributionLedger};
use crate::utils::crypto::{Address, VaultId};
use crate::utils::math::{compute_cr, format_amount, mul_div, safe_add};

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNTING
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared accounting state mutated by liquidations and pool operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accounting {
    /// Stability pool product/sum state
    pub rewards: RewardAccumulator,
    /// Redistribution accumulators and stakes
    pub redistribution: RedistributionLedger,
    /// Reward-token emission schedule
    pub issuance: CommunityIssuance,
    /// Pool totals
    pub pools: SystemPools,
}

impl Accounting {
    /// Fresh accounting with the given issuance schedule
    pub fn new(issuance: IssuanceParams) -> Self {
        Self {
            rewards: RewardAccumulator::new(),
            redistribution: RedistributionLedger::new(),
            issuance: CommunityIssuance::new(issuance),
            pools: SystemPools::new(),
        }
    }

    /// Issue reward tokens up to `now` and fold them into `G`
    pub fn trigger_issuance(&mut self, now: u64) -> Result<u128> {
        let issued = self.issuance.issue(now)?;
        self.rewards.update_g(issued)?;
        Ok(issued)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT POSITION
// ═══════════════════════════════════════════════════════════════════════════════

/// A vault's amounts including pending redistribution rewards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPosition {
    /// Vault ID
    pub id: VaultId,
    /// Owner
    pub owner: Address,
    /// Recorded plus pending collateral
    pub coll: u128,
    /// Recorded plus pending debt
    pub debt: u128,
    /// Pending collateral still held by the default pool
    pub pending_coll: u128,
    /// Pending debt still held by the default pool
    pub pending_debt: u128,
    /// Redistribution stake
    pub stake: u128,
}

impl VaultPosition {
    /// Load a vault's entire position
    pub fn load(vault: &Vault, ledger: &RedistributionLedger) -> Result<Self> {
        let PendingRewards { coll, debt } = ledger.pending_rewards(vault)?;
        Ok(Self {
            id: vault.id,
            owner: vault.owner,
            coll: safe_add(vault.coll, coll)?,
            debt: safe_add(vault.debt, debt)?,
            pending_coll: coll,
            pending_debt: debt,
            stake: vault.stake,
        })
    }

    /// Individual collateral ratio at `price`
    pub fn icr(&self, price: u128) -> u128 {
        compute_cr(self.coll, self.debt, price)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CANDIDATES AND CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Which vaults a liquidation call considers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Candidates {
    /// Up to `n` vaults starting from the lowest ratio
    Sequence(usize),
    /// An explicit list, in the given order
    List(Vec<VaultId>),
}

/// Read-only view of the system used for planning
pub struct LiquidationContext<'a, R: PositionRegistry + ?Sized> {
    /// All vaults
    pub vaults: &'a VaultManager,
    /// Ordered registry of open vaults
    pub registry: &'a R,
    /// Redistribution ledger for pending rewards
    pub redistribution: &'a RedistributionLedger,
    /// Oracle price
    pub price: u128,
    /// Stablecoin available in the stability pool
    pub pool_deposits: u128,
    /// Entire system collateral
    pub system_coll: u128,
    /// Entire system debt
    pub system_debt: u128,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION VALUES
// ═══════════════════════════════════════════════════════════════════════════════

/// How a single vault is liquidated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationValues {
    /// Entire position at liquidation time
    pub position: VaultPosition,
    /// ICR at liquidation time
    pub icr: u128,
    /// System mode the vault was liquidated under
    pub mode: SystemMode,
    /// Recovery Mode band, if any
    pub band: Option<LiquidationBand>,
    /// Collateral paid to the liquidator
    pub coll_gas_compensation: u128,
    /// Stablecoin paid to the liquidator from the gas pool
    pub debt_gas_compensation: u128,
    /// Debt cancelled against the stability pool
    pub debt_to_offset: u128,
    /// Collateral sent to the stability pool
    pub coll_to_send_to_pool: u128,
    /// Debt pushed to the remaining vaults
    pub debt_to_redistribute: u128,
    /// Collateral pushed to the remaining vaults
    pub coll_to_redistribute: u128,
    /// Collateral left claimable by the owner
    pub coll_surplus: u128,
}

/// Totals across a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiquidationTotals {
    /// Vaults liquidated
    pub vaults: usize,
    /// Entire collateral of liquidated vaults
    pub coll_in_sequence: u128,
    /// Entire debt of liquidated vaults
    pub debt_in_sequence: u128,
    /// Pending collateral applied from the default pool
    pub pending_coll: u128,
    /// Pending debt applied from the default pool
    pub pending_debt: u128,
    /// Sum of liquidated stakes
    pub stakes: u128,
    /// Collateral gas compensation
    pub coll_gas_compensation: u128,
    /// Stablecoin gas compensation
    pub debt_gas_compensation: u128,
    /// Debt offset against the pool
    pub debt_to_offset: u128,
    /// Collateral sent to the pool
    pub coll_to_send_to_pool: u128,
    /// Debt redistributed
    pub debt_to_redistribute: u128,
    /// Collateral redistributed
    pub coll_to_redistribute: u128,
    /// Collateral surplus
    pub coll_surplus: u128,
}

impl LiquidationTotals {
    fn add(&mut self, values: &LiquidationValues) {
        self.vaults += 1;
        self.coll_in_sequence += values.position.coll;
        self.debt_in_sequence += values.position.debt;
        self.pending_coll += values.position.pending_coll;
        self.pending_debt += values.position.pending_debt;
        self.stakes += values.position.stake;
        self.coll_gas_compensation += values.coll_gas_compensation;
        self.debt_gas_compensation += values.debt_gas_compensation;
        self.debt_to_offset += values.debt_to_offset;
        self.coll_to_send_to_pool += values.coll_to_send_to_pool;
        self.debt_to_redistribute += values.debt_to_redistribute;
        self.coll_to_redistribute += values.coll_to_redistribute;
        self.coll_surplus += values.coll_surplus;
    }
}

/// Result of planning a liquidation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationPlan {
    /// Price used
    pub price: u128,
    /// Mode at the start of the batch
    pub mode: SystemMode,
    /// TCR at the start of the batch
    pub tcr_at_start: u128,
    /// Liquidated vaults in order
    pub values: Vec<LiquidationValues>,
    /// Vaults considered but left untouched
    pub skipped: Vec<VaultId>,
    /// Batch totals
    pub totals: LiquidationTotals,
}

impl LiquidationPlan {
    /// IDs of the liquidated vaults
    pub fn liquidated_ids(&self) -> Vec<VaultId> {
        self.values.iter().map(|v| v.position.id).collect()
    }

    /// Collateral ledger movements of the batch
    pub fn collateral_ops(&self, accounts: &SystemAccounts, liquidator: &Address) -> Vec<LedgerOp> {
        let t = &self.totals;
        let mut ops = vec![
            LedgerOp::Transfer {
                from: accounts.default_pool,
                to: accounts.active_pool,
                amount: t.pending_coll,
            },
            LedgerOp::Transfer {
                from: accounts.active_pool,
                to: accounts.stability_pool,
                amount: t.coll_to_send_to_pool,
            },
            LedgerOp::Transfer {
                from: accounts.active_pool,
                to: accounts.default_pool,
                amount: t.coll_to_redistribute,
            },
            LedgerOp::Transfer {
                from: accounts.active_pool,
                to: accounts.surplus_pool,
                amount: t.coll_surplus,
            },
            LedgerOp::Transfer {
                from: accounts.active_pool,
                to: *liquidator,
                amount: t.coll_gas_compensation,
            },
        ];
        ops.retain(|op| op.amount() > 0);
        ops
    }

    /// Stablecoin ledger movements of the batch
    pub fn stablecoin_ops(&self, accounts: &SystemAccounts, liquidator: &Address) -> Vec<LedgerOp> {
        let t = &self.totals;
        let mut ops = vec![
            LedgerOp::Burn {
                from: accounts.stability_pool,
                amount: t.debt_to_offset,
            },
            LedgerOp::Transfer {
                from: accounts.gas_pool,
                to: *liquidator,
                amount: t.debt_gas_compensation,
            },
        ];
        ops.retain(|op| op.amount() > 0);
        ops
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH STATE
// ═══════════════════════════════════════════════════════════════════════════════

enum Decision {
    Liquidate(LiquidationValues),
    Skip,
    Stop,
}

struct BatchState {
    remaining_pool: u128,
    system_coll: u128,
    system_debt: u128,
    tcr_at_start: u128,
    recovery: bool,
    active_left: usize,
    explicit: bool,
}

impl BatchState {
    fn tcr(&self, price: u128) -> u128 {
        compute_tcr(self.system_coll, self.system_debt, price)
    }

    /// Skip in an explicit list, stop a sequence
    fn pass(&self) -> Decision {
        if self.explicit {
            Decision::Skip
        } else {
            Decision::Stop
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Summary of a committed liquidation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    /// Caller that received gas compensation
    pub liquidator: Address,
    /// Liquidated vaults
    pub vaults: Vec<VaultId>,
    /// Mode at the start of the batch
    pub mode: SystemMode,
    /// Price used
    pub price: u128,
    /// Batch totals
    pub totals: LiquidationTotals,
    /// Timestamp
    pub timestamp: u64,
}

/// Cumulative liquidation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationStats {
    /// Committed liquidation calls
    pub total_calls: u64,
    /// Vaults liquidated
    pub vaults_liquidated: u64,
    /// Vaults liquidated in Recovery Mode
    pub recovery_liquidations: u64,
    /// Debt offset against the pool
    pub total_debt_offset: u128,
    /// Debt redistributed
    pub total_debt_redistributed: u128,
    /// Collateral sent to the pool
    pub total_coll_to_pool: u128,
    /// Collateral redistributed
    pub total_coll_redistributed: u128,
    /// Collateral left as surplus
    pub total_coll_surplus: u128,
    /// Collateral paid as gas compensation
    pub total_coll_gas_compensation: u128,
}

/// Engine for liquidating undercollateralized vaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEngine {
    params: ProtocolParams,
    stats: LiquidationStats,
    history: Vec<LiquidationRecord>,
    max_history: usize,
}

impl LiquidationEngine {
    /// Create a new liquidation engine
    pub fn new(params: ProtocolParams) -> Self {
        Self {
            params,
            stats: LiquidationStats::default(),
            history: Vec::new(),
            max_history: 1_000,
        }
    }

    /// Parameters in use
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// Cumulative statistics
    pub fn statistics(&self) -> &LiquidationStats {
        &self.stats
    }

    /// Most recent committed liquidations, oldest first
    pub fn recent_liquidations(&self) -> &[LiquidationRecord] {
        &self.history
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PLANNING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Decide which candidates are liquidated and how.
    ///
    /// Fails with `InvalidArgument` for an empty list, `EmptySystem` when a
    /// qualifying vault is the last one open, and `NoLiquidatableVaults` when
    /// nothing qualifies.
    pub fn plan<R: PositionRegistry + ?Sized>(
        &self,
        ctx: &LiquidationContext<'_, R>,
        candidates: &Candidates,
    ) -> Result<LiquidationPlan> {
        if let Candidates::List(ids) = candidates {
            if ids.is_empty() {
                return Err(Error::InvalidArgument("empty vault list".into()));
            }
        }

        let tcr_at_start = compute_tcr(ctx.system_coll, ctx.system_debt, ctx.price);
        let mode = SystemMode::from_tcr(tcr_at_start, self.params.ccr);
        let mut state = BatchState {
            remaining_pool: ctx.pool_deposits,
            system_coll: ctx.system_coll,
            system_debt: ctx.system_debt,
            tcr_at_start,
            recovery: mode.is_recovery(),
            active_left: ctx.registry.len(),
            explicit: matches!(candidates, Candidates::List(_)),
        };

        let mut plan = LiquidationPlan {
            price: ctx.price,
            mode,
            tcr_at_start,
            values: Vec::new(),
            skipped: Vec::new(),
            totals: LiquidationTotals::default(),
        };

        match candidates {
            Candidates::Sequence(n) => {
                let mut cursor = ctx.registry.first();
                let mut visited = 0;
                while let Some(id) = cursor {
                    if visited >= *n {
                        break;
                    }
                    visited += 1;
                    cursor = ctx.registry.next(&id);
                    let vault = ctx.vaults.active(&id)?;
                    if !self.consider(ctx, vault, &mut state, &mut plan)? {
                        break;
                    }
                }
            }
            Candidates::List(ids) => {
                let mut seen = HashSet::new();
                for id in ids {
                    if !seen.insert(*id) {
                        continue;
                    }
                    let Some(vault) = ctx.vaults.get(id).filter(|v| v.is_active()) else {
                        tracing::debug!(vault = %id.short(), "skipping inactive vault");
                        continue;
                    };
                    self.consider(ctx, vault, &mut state, &mut plan)?;
                }
            }
        }

        if plan.values.is_empty() {
            return Err(Error::NoLiquidatableVaults);
        }

        tracing::debug!(
            vaults = plan.totals.vaults,
            skipped = plan.skipped.len(),
            mode = ?plan.mode,
            debt_offset = %format_amount(plan.totals.debt_to_offset, 4),
            debt_redistributed = %format_amount(plan.totals.debt_to_redistribute, 4),
            "liquidation planned"
        );
        Ok(plan)
    }

    /// Plan one candidate. Returns `false` when a sequence should stop.
    fn consider<R: PositionRegistry + ?Sized>(
        &self,
        ctx: &LiquidationContext<'_, R>,
        vault: &Vault,
        state: &mut BatchState,
        plan: &mut LiquidationPlan,
    ) -> Result<bool> {
        let position = VaultPosition::load(vault, ctx.redistribution)?;
        match self.decide(&position, ctx.price, state)? {
            Decision::Liquidate(values) => {
                if state.active_left <= 1 {
                    return Err(Error::EmptySystem);
                }
                state.active_left -= 1;
                state.remaining_pool -= values.debt_to_offset;
                state.system_coll = state.system_coll.saturating_sub(
                    values.coll_to_send_to_pool + values.coll_gas_compensation + values.coll_surplus,
                );
                state.system_debt = state.system_debt.saturating_sub(values.debt_to_offset);
                if state.recovery {
                    state.recovery = state.tcr(ctx.price) < self.params.ccr;
                    if !state.recovery {
                        tracing::debug!("batch brought the system back to normal mode");
                    }
                }
                plan.totals.add(&values);
                plan.values.push(values);
                Ok(true)
            }
            Decision::Skip => {
                plan.skipped.push(position.id);
                Ok(true)
            }
            Decision::Stop => Ok(false),
        }
    }

    fn decide(&self, position: &VaultPosition, price: u128, state: &BatchState) -> Result<Decision> {
        let icr = position.icr(price);
        let mcr = self.params.mcr;

        if !state.recovery {
            if icr >= mcr {
                return Ok(state.pass());
            }
            let values = self.uncapped_values(position, icr, SystemMode::Normal, None, state.remaining_pool)?;
            return Ok(Decision::Liquidate(values));
        }

        if icr >= mcr && state.remaining_pool == 0 {
            return Ok(state.pass());
        }

        let tcr = state.tcr(price);
        let band = LiquidationBand::classify(icr, mcr, tcr);
        match band {
            LiquidationBand::Healthy => Ok(state.pass()),
            band if band.requires_full_offset() => {
                if position.debt > state.remaining_pool {
                    tracing::warn!(
                        vault = %position.id.short(),
                        debt = %format_amount(position.debt, 2),
                        pool = %format_amount(state.remaining_pool, 2),
                        "pool cannot fully offset vault, skipping"
                    );
                    return Ok(Decision::Skip);
                }
                if band == LiquidationBand::BelowSystem {
                    let tcr_after = compute_tcr(
                        state.system_coll.saturating_sub(position.coll),
                        state.system_debt.saturating_sub(position.debt),
                        price,
                    );
                    if tcr_after < state.tcr_at_start {
                        tracing::warn!(vault = %position.id.short(), "liquidation would lower TCR, skipping");
                        return Ok(Decision::Skip);
                    }
                }
                let cap_ratio = band.cap_ratio(mcr).unwrap_or(mcr);
                Ok(Decision::Liquidate(self.capped_values(position, icr, band, cap_ratio, price)?))
            }
            _ => Ok(Decision::Liquidate(self.uncapped_values(
                position,
                icr,
                SystemMode::Recovery,
                Some(band),
                state.remaining_pool,
            )?)),
        }
    }

    /// Offset as much as the pool allows and redistribute the rest
    fn uncapped_values(
        &self,
        position: &VaultPosition,
        icr: u128,
        mode: SystemMode,
        band: Option<LiquidationBand>,
        remaining_pool: u128,
    ) -> Result<LiquidationValues> {
        if position.debt == 0 {
            return Err(Error::InvariantViolation(format!(
                "active vault {} without debt",
                position.id.short()
            )));
        }

        // Pending redistribution gains are not charged, so a vault pays the same
        // gas compensation whether or not an earlier liquidation reached it first
        let coll_gas_compensation = (position.coll - position.pending_coll) / self.params.percent_divisor;
        let coll_to_liquidate = position.coll - coll_gas_compensation;

        let (debt_to_offset, coll_to_send_to_pool) = if remaining_pool > 0 {
            let offset = position.debt.min(remaining_pool);
            (offset, mul_div(coll_to_liquidate, offset, position.debt)?)
        } else {
            (0, 0)
        };

        Ok(LiquidationValues {
            position: *position,
            icr,
            mode,
            band,
            coll_gas_compensation,
            debt_gas_compensation: self.params.gas_compensation,
            debt_to_offset,
            coll_to_send_to_pool,
            debt_to_redistribute: position.debt - debt_to_offset,
            coll_to_redistribute: coll_to_liquidate - coll_to_send_to_pool,
            coll_surplus: 0,
        })
    }

    /// Offset the whole debt, seizing collateral worth `debt * cap_ratio` plus gas compensation
    fn capped_values(
        &self,
        position: &VaultPosition,
        icr: u128,
        band: LiquidationBand,
        cap_ratio: u128,
        price: u128,
    ) -> Result<LiquidationValues> {
        let capped = mul_div(position.debt, cap_ratio, price)?;
        let coll_gas_compensation = capped / self.params.percent_divisor;
        let liquidated = position.coll.min(safe_add(capped, coll_gas_compensation)?);

        Ok(LiquidationValues {
            position: *position,
            icr,
            mode: SystemMode::Recovery,
            band: Some(band),
            coll_gas_compensation,
            debt_gas_compensation: self.params.gas_compensation,
            debt_to_offset: position.debt,
            coll_to_send_to_pool: liquidated - coll_gas_compensation,
            debt_to_redistribute: 0,
            coll_to_redistribute: 0,
            coll_surplus: position.coll - liquidated,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // APPLICATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Apply a plan to staged accounting.
    ///
    /// Issues pending reward tokens, applies pending rewards of the liquidated
    /// vaults, removes their stakes, then performs the single offset and the
    /// single redistribution of the batch and refreshes the stake snapshots.
    pub fn apply(&self, plan: &LiquidationPlan, accounting: &mut Accounting, now: u64) -> Result<OffsetOutcome> {
        let t = &plan.totals;
        accounting.trigger_issuance(now)?;

        accounting.pools.move_pending_to_active(t.pending_coll, t.pending_debt);
        for values in &plan.values {
            accounting.redistribution.remove_stake(values.position.stake);
        }

        let outcome = accounting
            .rewards
            .offset(t.debt_to_offset, t.coll_to_send_to_pool)?;
        if outcome.debt_offset != t.debt_to_offset {
            return Err(Error::InvariantViolation(format!(
                "offset {} differs from planned {}",
                outcome.debt_offset, t.debt_to_offset
            )));
        }
        accounting.pools.offset(t.debt_to_offset, t.coll_to_send_to_pool);

        accounting
            .redistribution
            .redistribute(t.debt_to_redistribute, t.coll_to_redistribute)?;
        accounting
            .pools
            .redistribute(t.debt_to_redistribute, t.coll_to_redistribute);

        for values in &plan.values {
            accounting.pools.add_surplus(&values.position.owner, values.coll_surplus);
        }
        accounting.pools.send_active_coll(t.coll_gas_compensation);

        let total_coll = accounting.pools.entire_system_coll();
        accounting.redistribution.update_system_snapshots(total_coll);
        Ok(outcome)
    }

    /// Record a committed plan
    pub fn record(&mut self, plan: &LiquidationPlan, liquidator: Address, timestamp: u64) {
        let t = &plan.totals;
        self.stats.total_calls += 1;
        self.stats.vaults_liquidated += t.vaults as u64;
        self.stats.recovery_liquidations += plan
            .values
            .iter()
            .filter(|v| v.mode.is_recovery())
            .count() as u64;
        self.stats.total_debt_offset = self.stats.total_debt_offset.saturating_add(t.debt_to_offset);
        self.stats.total_debt_redistributed = self
            .stats
            .total_debt_redistributed
            .saturating_add(t.debt_to_redistribute);
        self.stats.total_coll_to_pool = self.stats.total_coll_to_pool.saturating_add(t.coll_to_send_to_pool);
        self.stats.total_coll_redistributed = self
            .stats
            .total_coll_redistributed
            .saturating_add(t.coll_to_redistribute);
        self.stats.total_coll_surplus = self.stats.total_coll_surplus.saturating_add(t.coll_surplus);
        self.stats.total_coll_gas_compensation = self
            .stats
            .total_coll_gas_compensation
            .saturating_add(t.coll_gas_compensation);

        self.history.push(LiquidationRecord {
            liquidator,
            vaults: plan.liquidated_ids(),
            mode: plan.mode,
            price: plan.price,
            totals: *t,
            timestamp,
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::SortedVaults;
    use crate::utils::constants::ONE;

    const PRICE: u128 = 100 * ONE;

    struct Fixture {
        vaults: VaultManager,
        registry: SortedVaults,
        ledger: RedistributionLedger,
        ids: Vec<VaultId>,
        coll: u128,
        debt: u128,
    }

    impl Fixture {
        fn new(positions: &[(u128, u128)]) -> Self {
            let mut fixture = Self {
                vaults: VaultManager::new(),
                registry: SortedVaults::new(),
                ledger: RedistributionLedger::new(),
                ids: Vec::new(),
                coll: 0,
                debt: 0,
            };
            for (i, (coll, debt)) in positions.iter().enumerate() {
                let owner = Address::from_label(&format!("owner{}", i));
                let mut vault = Vault::new(owner, 0, *coll, *debt, 0);
                vault.stake = *coll;
                fixture.ledger.update_stake(0, *coll).unwrap();
                fixture.registry.insert(vault.id, vault.nicr());
                fixture.ids.push(vault.id);
                fixture.vaults.register(vault).unwrap();
                fixture.coll += coll;
                fixture.debt += debt;
            }
            fixture
        }

        fn context(&self, pool: u128) -> LiquidationContext<'_, SortedVaults> {
            LiquidationContext {
                vaults: &self.vaults,
                registry: &self.registry,
                redistribution: &self.ledger,
                price: PRICE,
                pool_deposits: pool,
                system_coll: self.coll,
                system_debt: self.debt,
            }
        }
    }

    fn engine() -> LiquidationEngine {
        LiquidationEngine::new(ProtocolParams::default())
    }

    #[test]
    fn test_normal_mode_full_offset() {
        // ICRs 100%, 200%, 300%; TCR 200%
        let f = Fixture::new(&[(10 * ONE, 1_000 * ONE), (20 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE)]);
        let plan = engine().plan(&f.context(2_000 * ONE), &Candidates::Sequence(10)).unwrap();

        assert_eq!(plan.mode, SystemMode::Normal);
        assert_eq!(plan.liquidated_ids(), vec![f.ids[0]]);
        let v = &plan.values[0];
        assert_eq!(v.coll_gas_compensation, ONE / 20);
        assert_eq!(v.debt_to_offset, 1_000 * ONE);
        assert_eq!(v.coll_to_send_to_pool, 10 * ONE - ONE / 20);
        assert_eq!(v.debt_to_redistribute, 0);
        assert_eq!(v.debt_gas_compensation, ProtocolParams::default().gas_compensation);
    }

    #[test]
    fn test_normal_mode_partial_offset() {
        let f = Fixture::new(&[(10 * ONE, 1_000 * ONE), (20 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE)]);
        let plan = engine().plan(&f.context(400 * ONE), &Candidates::Sequence(1)).unwrap();
        let v = &plan.values[0];
        assert_eq!(v.debt_to_offset, 400 * ONE);
        assert_eq!(v.coll_to_send_to_pool, 3_980_000_000_000_000_000);
        assert_eq!(v.debt_to_redistribute, 600 * ONE);
        assert_eq!(v.coll_to_redistribute, 5_970_000_000_000_000_000);
    }

    #[test]
    fn test_empty_pool_redistributes_everything() {
        let f = Fixture::new(&[(10 * ONE, 1_000 * ONE), (20 * ONE, 1_000 * ONE)]);
        let plan = engine().plan(&f.context(0), &Candidates::Sequence(5)).unwrap();
        let t = plan.totals;
        assert_eq!(t.debt_to_offset, 0);
        assert_eq!(t.debt_to_redistribute, 1_000 * ONE);
        assert_eq!(t.coll_to_redistribute + t.coll_gas_compensation, 10 * ONE);
    }

    #[test]
    fn test_last_vault_cannot_be_liquidated() {
        let f = Fixture::new(&[(10 * ONE, 1_000 * ONE)]);
        let result = engine().plan(&f.context(5_000 * ONE), &Candidates::Sequence(1));
        assert_eq!(result.unwrap_err(), Error::EmptySystem);
    }

    #[test]
    fn test_empty_list_rejected() {
        let f = Fixture::new(&[(10 * ONE, 1_000 * ONE), (20 * ONE, 1_000 * ONE)]);
        let result = engine().plan(&f.context(0), &Candidates::List(vec![]));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_nothing_qualifies() {
        let f = Fixture::new(&[(20 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE)]);
        let result = engine().plan(&f.context(0), &Candidates::Sequence(5));
        assert_eq!(result.unwrap_err(), Error::NoLiquidatableVaults);

        let result = engine().plan(&f.context(0), &Candidates::List(vec![f.ids[0]]));
        assert_eq!(result.unwrap_err(), Error::NoLiquidatableVaults);
    }

    #[test]
    fn test_list_skips_healthy_and_duplicates() {
        let f = Fixture::new(&[
            (10 * ONE, 1_000 * ONE),
            (30 * ONE, 1_000 * ONE),
            (10 * ONE, 1_000 * ONE),
            (40 * ONE, 1_000 * ONE),
        ]);
        let list = vec![f.ids[1], f.ids[0], f.ids[0], f.ids[2]];
        let plan = engine().plan(&f.context(10_000 * ONE), &Candidates::List(list)).unwrap();
        assert_eq!(plan.liquidated_ids(), vec![f.ids[0], f.ids[2]]);
        assert_eq!(plan.skipped, vec![f.ids[1]]);
    }

    #[test]
    fn test_recovery_mode_capped_liquidation() {
        // ICRs 105%, 130%, 140%; TCR 125%
        let f = Fixture::new(&[
            (10_500_000_000_000_000_000, 1_000 * ONE),
            (13 * ONE, 1_000 * ONE),
            (14 * ONE, 1_000 * ONE),
        ]);
        let plan = engine().plan(&f.context(2_000 * ONE), &Candidates::Sequence(10)).unwrap();
        assert_eq!(plan.mode, SystemMode::Recovery);
        assert_eq!(plan.liquidated_ids(), vec![f.ids[0], f.ids[1]]);

        // 105%: capped at the debt value plus 0.5% gas
        let a = &plan.values[0];
        assert_eq!(a.band, Some(LiquidationBand::BelowMinimum));
        assert_eq!(a.coll_to_send_to_pool, 10 * ONE);
        assert_eq!(a.coll_gas_compensation, ONE / 20);
        assert_eq!(a.coll_surplus, 450_000_000_000_000_000);

        // 130% < running TCR 135%: capped at MCR
        let b = &plan.values[1];
        assert_eq!(b.band, Some(LiquidationBand::BelowSystem));
        assert_eq!(b.coll_to_send_to_pool, 11 * ONE);
        assert_eq!(b.coll_gas_compensation, 55_000_000_000_000_000);
        assert_eq!(b.coll_surplus, 1_945_000_000_000_000_000);
        assert_eq!(plan.totals.debt_to_redistribute, 0);
    }

    #[test]
    fn test_recovery_mode_requires_full_coverage() {
        let f = Fixture::new(&[
            (10_500_000_000_000_000_000, 1_000 * ONE),
            (13 * ONE, 1_000 * ONE),
            (14 * ONE, 1_000 * ONE),
        ]);
        let result = engine().plan(&f.context(500 * ONE), &Candidates::Sequence(10));
        assert_eq!(result.unwrap_err(), Error::NoLiquidatableVaults);
    }

    #[test]
    fn test_recovery_insolvent_vault_redistributes() {
        // ICRs 90%, 140%, 140%; TCR ~123%
        let f = Fixture::new(&[
            (9 * ONE, 1_000 * ONE),
            (14 * ONE, 1_000 * ONE),
            (14 * ONE, 1_000 * ONE),
        ]);
        let plan = engine().plan(&f.context(0), &Candidates::Sequence(10)).unwrap();
        assert_eq!(plan.values.len(), 1);
        assert_eq!(plan.values[0].band, Some(LiquidationBand::Insolvent));
        assert_eq!(plan.totals.debt_to_redistribute, 1_000 * ONE);
    }

    #[test]
    fn test_pending_rewards_included() {
        let mut f = Fixture::new(&[(12 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE)]);
        // 120% vault is healthy until it absorbs redistributed debt
        let plan = engine().plan(&f.context(0), &Candidates::List(vec![f.ids[0]]));
        assert!(plan.is_err());

        f.ledger.redistribute(720 * ONE, 0).unwrap();
        f.debt += 720 * ONE;
        let plan = engine().plan(&f.context(0), &Candidates::List(vec![f.ids[0]])).unwrap();
        let v = &plan.values[0];
        assert_eq!(v.position.pending_debt, 120 * ONE);
        assert_eq!(v.position.debt, 1_120 * ONE);
    }

    #[test]
    fn test_gas_compensation_ignores_pending_collateral() {
        let mut f = Fixture::new(&[(12 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE)]);
        // Stake 12 of 72 receives a sixth of the redistribution: 240 debt, 0.6 collateral
        f.ledger.redistribute(1_440 * ONE, 3_600_000_000_000_000_000).unwrap();
        f.coll += 3_600_000_000_000_000_000;
        f.debt += 1_440 * ONE;

        let plan = engine().plan(&f.context(0), &Candidates::List(vec![f.ids[0]])).unwrap();
        let v = &plan.values[0];
        assert_eq!(v.position.pending_coll, 600_000_000_000_000_000);
        assert_eq!(v.position.coll, 12_600_000_000_000_000_000);
        assert_eq!(v.coll_gas_compensation, 12 * ONE / 200);
        assert_eq!(v.coll_to_redistribute, 12_600_000_000_000_000_000 - 12 * ONE / 200);
    }

    #[test]
    fn test_apply_and_record() {
        let f = Fixture::new(&[(10 * ONE, 1_000 * ONE), (20 * ONE, 1_000 * ONE), (30 * ONE, 1_000 * ONE)]);
        let mut engine = engine();
        let plan = engine.plan(&f.context(600 * ONE), &Candidates::Sequence(10)).unwrap();

        let mut accounting = Accounting::new(IssuanceParams::disabled());
        accounting.pools.increase_active(f.coll, f.debt);
        accounting.redistribution = f.ledger.clone();
        accounting.rewards.increase_deposits(600 * ONE).unwrap();

        let outcome = engine.apply(&plan, &mut accounting, 0).unwrap();
        assert_eq!(outcome.debt_offset, 600 * ONE);
        assert_eq!(accounting.rewards.total_deposits(), 0);
        assert!(outcome.epoch_reset);
        assert_eq!(accounting.pools.default_debt, 400 * ONE);
        assert_eq!(accounting.redistribution.total_stakes(), 50 * ONE);
        assert_eq!(
            accounting.redistribution.total_collateral_snapshot(),
            accounting.pools.entire_system_coll()
        );

        let accounts = SystemAccounts::default();
        let liquidator = Address::from_label("keeper");
        let stable = plan.stablecoin_ops(&accounts, &liquidator);
        assert_eq!(stable.len(), 2);
        assert_eq!(stable[0].amount(), 600 * ONE);
        let coll = plan.collateral_ops(&accounts, &liquidator);
        assert_eq!(coll.iter().map(|op| op.amount()).sum::<u128>(), 10 * ONE);

        engine.record(&plan, liquidator, 7);
        assert_eq!(engine.statistics().vaults_liquidated, 1);
        assert_eq!(engine.statistics().total_debt_offset, 600 * ONE);
        assert_eq!(engine.recent_liquidations()[0].timestamp, 7);
    }
}
