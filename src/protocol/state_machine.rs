//! Protocol State Machine - Core orchestration engine.
//!
//! The state machine is the central coordinator for all protocol operations.
//! It owns the vaults, the accounting shared by liquidations and the
//! stability pool, and the three token ledgers.
//!
//! Every state-changing operation follows the same shape: validate, mutate a
//! staged copy of [`Accounting`], check every ledger movement, then commit.
//! A failed operation leaves no trace.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::ProtocolConfig;
use crate::core::pools::SystemAccounts;
use crate::core::registry::{PositionRegistry, SortedVaults};
use crate::core::token::{Ledger, LedgerOp, TokenLedger};
use crate::core::vault::{RewardSnapshot, Vault, VaultManager, VaultStatus};
use crate::error::{Error, Result};
use crate::liquidation::accumulator::RewardAccumulator;
use crate::liquidation::engine::{
    Accounting, Candidates, LiquidationContext, LiquidationEngine, VaultPosition,
};
use crate::liquidation::recovery::{RecoveryModeManager, SystemStatus};
use crate::liquidation::redistribution::PendingRewards;
use crate::liquidation::stability_pool::StabilityPool;
use crate::oracle::price_feed::{PriceFeed, PriceSource};
use crate::protocol::events::*;
use crate::protocol::operations::*;
use crate::utils::crypto::{Address, VaultId};
use crate::utils::math::{compute_cr, format_amount, safe_add};

/// Ticker of the debt token
pub const STABLECOIN_SYMBOL: &str = "VUSD";
/// Ticker of the collateral token
pub const COLLATERAL_SYMBOL: &str = "COLL";
/// Ticker of the reward token
pub const REWARD_SYMBOL: &str = "VLT";

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol state machine - orchestrates all operations
pub struct ProtocolStateMachine<O: PriceSource = PriceFeed, R: PositionRegistry = SortedVaults> {
    /// Protocol configuration
    config: ProtocolConfig,
    /// Ledger addresses of the internal pools
    accounts: SystemAccounts,
    /// Every vault ever opened
    vaults: VaultManager,
    /// Open vaults ordered by nominal ratio
    registry: R,
    /// Accumulators, issuance and pool totals
    accounting: Accounting,
    /// Stability pool deposits and front ends
    pool: StabilityPool,
    /// Liquidation planner and statistics
    engine: LiquidationEngine,
    /// Recovery Mode rules for borrower operations
    recovery: RecoveryModeManager,
    /// Debt token
    stablecoin: Ledger,
    /// Collateral token
    collateral: Ledger,
    /// Reward token
    reward_token: Ledger,
    /// Price oracle
    oracle: O,
    /// Current timestamp
    timestamp: u64,
    /// Events emitted since the last drain
    event_log: EventLog,
}

impl<O: PriceSource, R: PositionRegistry + Default> ProtocolStateMachine<O, R> {
    /// Create a new state machine with an empty registry
    pub fn new(config: ProtocolConfig, oracle: O) -> Result<Self> {
        Self::with_registry(config, oracle, R::default())
    }
}

impl<O: PriceSource, R: PositionRegistry> ProtocolStateMachine<O, R> {
    /// Create a new state machine over the given registry
    pub fn with_registry(config: ProtocolConfig, oracle: O, registry: R) -> Result<Self> {
        config.validate()?;
        if !registry.is_empty() {
            return Err(Error::InvalidArgument("registry must start empty".into()));
        }

        let timestamp = config.issuance.deployment_time;
        Ok(Self {
            accounts: SystemAccounts::default(),
            vaults: VaultManager::new(),
            registry,
            accounting: Accounting::new(config.issuance.clone()),
            pool: StabilityPool::new(),
            engine: LiquidationEngine::new(config.params.clone()),
            recovery: RecoveryModeManager::new(config.params.clone()),
            stablecoin: Ledger::new(STABLECOIN_SYMBOL),
            collateral: Ledger::new(COLLATERAL_SYMBOL),
            reward_token: Ledger::new(REWARD_SYMBOL),
            oracle,
            timestamp,
            event_log: EventLog::new(),
            config,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TIME AND ORACLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move the clock to `timestamp`
    pub fn set_timestamp(&mut self, timestamp: u64) -> Result<()> {
        if timestamp < self.timestamp {
            return Err(Error::InvalidArgument(format!(
                "timestamp {} is before current {}",
                timestamp, self.timestamp
            )));
        }
        self.timestamp = timestamp;
        Ok(())
    }

    /// Advance the clock by `seconds`
    pub fn advance_time(&mut self, seconds: u64) {
        self.timestamp = self.timestamp.saturating_add(seconds);
    }

    /// Current timestamp
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Price oracle
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Mutable price oracle
    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    fn price(&self) -> Result<u128> {
        self.oracle.fetch_price(self.timestamp)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATION EXECUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Execute an operation atomically
    pub fn execute(&mut self, op: ProtocolOperation) -> Result<OperationResult> {
        debug!(op = op.operation_type(), caller = %op.caller(), "executing operation");
        match op {
            ProtocolOperation::OpenVault { owner, coll, net_debt } => {
                self.open_vault(owner, coll, net_debt)
            }
            ProtocolOperation::AddCollateral { caller, vault_id, amount } => {
                self.add_collateral(caller, vault_id, amount)
            }
            ProtocolOperation::CloseVault { caller, vault_id } => self.close_vault(caller, vault_id),
            ProtocolOperation::ClaimCollateralSurplus { owner } => {
                self.claim_collateral_surplus(owner)
            }
            ProtocolOperation::Liquidate { liquidator, vault_id } => self
                .liquidate(liquidator, vault_id)
                .map(OperationResult::Liquidated),
            ProtocolOperation::LiquidateBatch { liquidator, count } => self
                .liquidate_batch(liquidator, count)
                .map(OperationResult::Liquidated),
            ProtocolOperation::BatchLiquidate { liquidator, vault_ids } => self
                .batch_liquidate(liquidator, &vault_ids)
                .map(OperationResult::Liquidated),
            ProtocolOperation::ProvideToPool { depositor, amount, front_end } => self
                .provide_to_pool(depositor, amount, front_end)
                .map(OperationResult::PoolUpdated),
            ProtocolOperation::WithdrawFromPool { depositor, amount } => self
                .withdraw_from_pool(depositor, amount)
                .map(OperationResult::PoolUpdated),
            ProtocolOperation::RedirectGainToVault { depositor, vault_id } => self
                .redirect_gain_to_vault(depositor, vault_id)
                .map(OperationResult::PoolUpdated),
            ProtocolOperation::RegisterFrontEnd { front_end, kickback_rate } => {
                self.register_front_end(front_end, kickback_rate)?;
                Ok(OperationResult::FrontEndRegistered)
            }
        }
    }

    /// Check every ledger batch, then execute all of them
    fn settle_ledgers(
        &mut self,
        collateral_ops: &[LedgerOp],
        stablecoin_ops: &[LedgerOp],
        reward_ops: &[LedgerOp],
    ) -> Result<()> {
        self.collateral.check(collateral_ops)?;
        self.stablecoin.check(stablecoin_ops)?;
        self.reward_token.check(reward_ops)?;

        self.collateral.execute(collateral_ops)?;
        self.stablecoin.execute(stablecoin_ops)?;
        self.reward_token.execute(reward_ops)
    }

    /// Fold a vault's pending redistribution rewards into its recorded amounts
    fn apply_pending_rewards(staged: &mut Accounting, vault: &mut Vault) -> Result<PendingRewards> {
        let pending = staged.redistribution.pending_rewards(vault)?;
        vault.coll = safe_add(vault.coll, pending.coll)?;
        vault.debt = safe_add(vault.debt, pending.debt)?;
        staged.pools.move_pending_to_active(pending.coll, pending.debt);
        vault.snapshot = staged.redistribution.snapshot();
        Ok(pending)
    }

    /// Recompute a vault's stake from its current collateral
    fn restake(staged: &mut Accounting, vault: &mut Vault) -> Result<()> {
        let new_stake = staged.redistribution.compute_stake(vault.coll)?;
        staged.redistribution.update_stake(vault.stake, new_stake)?;
        vault.stake = new_stake;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BORROWER OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a vault locking `coll` and borrowing `net_debt`.
    ///
    /// The vault's debt also carries the gas compensation reserve, which is
    /// minted to the gas pool.
    pub fn open_vault(&mut self, owner: Address, coll: u128, net_debt: u128) -> Result<OperationResult> {
        let params = &self.config.params;
        if coll == 0 {
            return Err(Error::ZeroAmount);
        }
        if net_debt < params.min_net_debt {
            return Err(Error::DebtBelowMinimum {
                amount: net_debt,
                minimum: params.min_net_debt,
            });
        }
        if self.accounts.is_system(&owner) {
            return Err(Error::Unauthorized(format!("{} is a protocol account", owner)));
        }
        let gas_compensation = params.gas_compensation;
        let debt = safe_add(net_debt, gas_compensation)?;

        let price = self.price()?;
        let icr = compute_cr(coll, debt, price);
        let status = self.status_at(price);
        self.recovery.validate_open(&status, icr)?;
        self.recovery.validate_open_tcr(&status, coll, debt).to_result()?;

        let nonce = self.vaults.next_nonce(&owner);
        let mut vault = Vault::new(owner, nonce, coll, debt, self.timestamp);
        if self.vaults.get(&vault.id).is_some() {
            return Err(Error::InvalidArgument(format!("vault {} already exists", vault.id.short())));
        }

        let mut staged = self.accounting.clone();
        Self::restake(&mut staged, &mut vault)?;
        vault.snapshot = staged.redistribution.snapshot();
        staged.pools.increase_active(coll, debt);

        let collateral_ops = [LedgerOp::Transfer {
            from: owner,
            to: self.accounts.active_pool,
            amount: coll,
        }];
        let stablecoin_ops = [
            LedgerOp::Mint { to: owner, amount: net_debt },
            LedgerOp::Mint {
                to: self.accounts.gas_pool,
                amount: gas_compensation,
            },
        ];
        self.settle_ledgers(&collateral_ops, &stablecoin_ops, &[])?;

        let vault_id = vault.id;
        let stake = vault.stake;
        self.registry.insert(vault_id, vault.nicr());
        self.vaults.register(vault)?;
        self.accounting = staged;

        self.event_log.push(ProtocolEvent::VaultOpened(VaultOpenedEvent {
            vault_id,
            owner,
            coll,
            debt,
            stake,
            icr,
            timestamp: self.timestamp,
        }));
        info!(
            vault = %vault_id.short(),
            owner = %owner,
            coll = %format_amount(coll, 4),
            debt = %format_amount(debt, 2),
            "vault opened"
        );

        Ok(OperationResult::VaultOpened { vault_id, debt, icr })
    }

    /// Add collateral to an owned vault
    pub fn add_collateral(&mut self, caller: Address, vault_id: VaultId, amount: u128) -> Result<OperationResult> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let mut vault = self.vaults.active(&vault_id)?.clone();
        vault.verify_owner(&caller)?;

        let mut staged = self.accounting.clone();
        let pending = Self::apply_pending_rewards(&mut staged, &mut vault)?;
        vault.coll = safe_add(vault.coll, amount)?;
        Self::restake(&mut staged, &mut vault)?;
        vault.last_updated = self.timestamp;
        staged.pools.increase_active(amount, 0);

        let collateral_ops = [
            LedgerOp::Transfer {
                from: self.accounts.default_pool,
                to: self.accounts.active_pool,
                amount: pending.coll,
            },
            LedgerOp::Transfer {
                from: caller,
                to: self.accounts.active_pool,
                amount,
            },
        ];
        self.settle_ledgers(&collateral_ops, &[], &[])?;

        let new_coll = vault.coll;
        self.registry.reinsert(vault_id, vault.nicr());
        self.commit_vault(vault);
        self.accounting = staged;

        self.event_log.push(ProtocolEvent::CollateralAdded(CollateralAddedEvent {
            vault_id,
            amount,
            new_coll,
            timestamp: self.timestamp,
        }));
        debug!(vault = %vault_id.short(), amount = %format_amount(amount, 4), "collateral added");

        Ok(OperationResult::CollateralAdded { new_coll })
    }

    /// Repay all debt of an owned vault and return its collateral.
    ///
    /// The owner repays the debt net of the gas reserve, which is burned from
    /// the gas pool.
    pub fn close_vault(&mut self, caller: Address, vault_id: VaultId) -> Result<OperationResult> {
        let mut vault = self.vaults.active(&vault_id)?.clone();
        vault.verify_owner(&caller)?;

        let price = self.price()?;
        let status = self.status_at(price);
        self.recovery.validate_close(&status).to_result()?;
        if self.registry.len() <= 1 {
            return Err(Error::EmptySystem);
        }

        let mut staged = self.accounting.clone();
        let pending = Self::apply_pending_rewards(&mut staged, &mut vault)?;
        let coll = vault.coll;
        let debt = vault.debt;

        let ccr = self.config.params.ccr;
        let tcr_after = status.tcr_after(-(coll as i128), -(debt as i128));
        if tcr_after < ccr {
            return Err(Error::RecoveryMode);
        }

        let gas_compensation = self.config.params.gas_compensation.min(debt);
        staged.redistribution.remove_stake(vault.stake);
        staged.pools.decrease_active(coll, debt);

        let collateral_ops = [
            LedgerOp::Transfer {
                from: self.accounts.default_pool,
                to: self.accounts.active_pool,
                amount: pending.coll,
            },
            LedgerOp::Transfer {
                from: self.accounts.active_pool,
                to: caller,
                amount: coll,
            },
        ];
        let stablecoin_ops = [
            LedgerOp::Burn {
                from: caller,
                amount: debt - gas_compensation,
            },
            LedgerOp::Burn {
                from: self.accounts.gas_pool,
                amount: gas_compensation,
            },
        ];
        self.settle_ledgers(&collateral_ops, &stablecoin_ops, &[])?;

        vault.status = VaultStatus::ClosedByOwner;
        vault.coll = 0;
        vault.debt = 0;
        vault.stake = 0;
        vault.snapshot = RewardSnapshot::default();
        vault.last_updated = self.timestamp;
        self.registry.remove(&vault_id);
        self.commit_vault(vault);
        self.accounting = staged;

        self.event_log.push(ProtocolEvent::VaultClosed(VaultClosedEvent {
            vault_id,
            owner: caller,
            coll_returned: coll,
            debt_repaid: debt,
            timestamp: self.timestamp,
        }));
        info!(vault = %vault_id.short(), coll = %format_amount(coll, 4), "vault closed");

        Ok(OperationResult::VaultClosed { coll_returned: coll })
    }

    /// Pay out collateral surplus left by capped liquidations
    pub fn claim_collateral_surplus(&mut self, owner: Address) -> Result<OperationResult> {
        let mut staged = self.accounting.clone();
        let amount = staged.pools.take_surplus(&owner)?;

        let collateral_ops = [LedgerOp::Transfer {
            from: self.accounts.surplus_pool,
            to: owner,
            amount,
        }];
        self.settle_ledgers(&collateral_ops, &[], &[])?;
        self.accounting = staged;

        self.event_log.push(ProtocolEvent::SurplusClaimed(SurplusClaimedEvent {
            owner,
            amount,
            timestamp: self.timestamp,
        }));
        info!(owner = %owner, amount = %format_amount(amount, 4), "collateral surplus claimed");

        Ok(OperationResult::SurplusClaimed { amount })
    }

    fn commit_vault(&mut self, vault: Vault) {
        if let Some(stored) = self.vaults.get_mut(&vault.id) {
            *stored = vault;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Liquidate a single vault
    pub fn liquidate(&mut self, liquidator: Address, vault_id: VaultId) -> Result<LiquidationSummary> {
        self.vaults.active(&vault_id)?;
        self.liquidate_candidates(liquidator, Candidates::List(vec![vault_id]))
    }

    /// Liquidate up to `count` vaults starting from the lowest ratio
    pub fn liquidate_batch(&mut self, liquidator: Address, count: usize) -> Result<LiquidationSummary> {
        self.liquidate_candidates(liquidator, Candidates::Sequence(count))
    }

    /// Liquidate the qualifying vaults of an explicit list
    pub fn batch_liquidate(&mut self, liquidator: Address, vault_ids: &[VaultId]) -> Result<LiquidationSummary> {
        self.liquidate_candidates(liquidator, Candidates::List(vault_ids.to_vec()))
    }

    fn liquidate_candidates(&mut self, liquidator: Address, candidates: Candidates) -> Result<LiquidationSummary> {
        let price = self.price()?;
        let plan = {
            let ctx = LiquidationContext {
                vaults: &self.vaults,
                registry: &self.registry,
                redistribution: &self.accounting.redistribution,
                price,
                pool_deposits: self.accounting.rewards.total_deposits(),
                system_coll: self.accounting.pools.entire_system_coll(),
                system_debt: self.accounting.pools.entire_system_debt(),
            };
            self.engine.plan(&ctx, &candidates)?
        };

        let mut staged = self.accounting.clone();
        let offset = self.engine.apply(&plan, &mut staged, self.timestamp)?;
        let collateral_ops = plan.collateral_ops(&self.accounts, &liquidator);
        let stablecoin_ops = plan.stablecoin_ops(&self.accounts, &liquidator);
        self.settle_ledgers(&collateral_ops, &stablecoin_ops, &[])?;
        self.accounting = staged;

        let now = self.timestamp;
        for values in &plan.values {
            let id = values.position.id;
            if let Some(vault) = self.vaults.get_mut(&id) {
                vault.status = VaultStatus::ClosedByLiquidation;
                vault.coll = 0;
                vault.debt = 0;
                vault.stake = 0;
                vault.snapshot = RewardSnapshot::default();
                vault.last_updated = now;
            }
            self.registry.remove(&id);
            self.event_log.push(ProtocolEvent::VaultLiquidated(VaultLiquidatedEvent {
                vault_id: id,
                owner: values.position.owner,
                debt: values.position.debt,
                coll: values.position.coll,
                icr: values.icr,
                mode: values.mode,
                coll_surplus: values.coll_surplus,
                timestamp: now,
            }));
        }
        self.engine.record(&plan, liquidator, now);

        let t = plan.totals;
        self.event_log.push(ProtocolEvent::Liquidation(LiquidationEvent {
            liquidator,
            vaults: t.vaults as u32,
            debt_offset: t.debt_to_offset,
            coll_to_pool: t.coll_to_send_to_pool,
            debt_redistributed: t.debt_to_redistribute,
            coll_redistributed: t.coll_to_redistribute,
            coll_gas_compensation: t.coll_gas_compensation,
            debt_gas_compensation: t.debt_gas_compensation,
            price,
            timestamp: now,
        }));
        if t.debt_to_offset > 0 {
            let rewards = &self.accounting.rewards;
            self.event_log.push(ProtocolEvent::Offset(OffsetEvent {
                debt_offset: offset.debt_offset,
                coll_gain_per_unit: offset.coll_gain_per_unit,
                loss_per_unit: offset.loss_per_unit,
                p: rewards.p(),
                scale: rewards.current_scale(),
                epoch: rewards.current_epoch(),
                timestamp: now,
            }));
        }
        if t.debt_to_redistribute > 0 {
            let ledger = &self.accounting.redistribution;
            self.event_log.push(ProtocolEvent::Redistribution(RedistributionEvent {
                debt: t.debt_to_redistribute,
                coll: t.coll_to_redistribute,
                l_debt: ledger.l_debt(),
                l_coll: ledger.l_coll(),
                timestamp: now,
            }));
        }

        info!(
            liquidator = %liquidator,
            vaults = t.vaults,
            skipped = plan.skipped.len(),
            mode = ?plan.mode,
            debt_offset = %format_amount(t.debt_to_offset, 2),
            debt_redistributed = %format_amount(t.debt_to_redistribute, 2),
            "liquidation committed"
        );

        Ok(LiquidationSummary {
            liquidated: plan.liquidated_ids(),
            skipped: plan.skipped,
            mode: plan.mode,
            totals: t,
            offset,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STABILITY POOL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reward owed to a front end and its compounded stake
    fn front_end_position(&self, acc: &RewardAccumulator, front_end: Option<&Address>) -> Result<(u128, u128)> {
        match front_end {
            Some(fe) => Ok((
                self.pool.front_end_reward_gain(acc, fe)?,
                self.pool.compounded_front_end_stake(acc, fe),
            )),
            None => Ok((0, 0)),
        }
    }

    fn reward_ops(
        depositor: Address,
        depositor_reward: u128,
        front_end: Option<Address>,
        front_end_reward: u128,
    ) -> Vec<LedgerOp> {
        let mut ops = vec![LedgerOp::Mint {
            to: depositor,
            amount: depositor_reward,
        }];
        if let Some(fe) = front_end {
            ops.push(LedgerOp::Mint {
                to: fe,
                amount: front_end_reward,
            });
        }
        ops.retain(|op| op.amount() > 0);
        ops
    }

    /// Record the new deposit and front-end stake against committed accounting
    fn commit_deposit(
        &mut self,
        depositor: Address,
        new_deposit: u128,
        front_end: Option<Address>,
        front_end_stake: u128,
        front_end_reward: u128,
    ) {
        let acc = &self.accounting.rewards;
        if let Some(fe) = front_end {
            self.pool.set_front_end_stake(acc, &fe, front_end_stake);
            self.event_log.push(ProtocolEvent::FrontEndStakeChanged(FrontEndStakeChangedEvent {
                front_end: fe,
                new_stake: front_end_stake,
                reward_paid: front_end_reward,
                timestamp: self.timestamp,
            }));
        }
        self.pool.set_deposit(acc, depositor, new_deposit, front_end);
        self.event_log.push(ProtocolEvent::DepositChanged(DepositChangedEvent {
            depositor,
            new_deposit,
            front_end,
            timestamp: self.timestamp,
        }));
    }

    /// Deposit stablecoin into the stability pool.
    ///
    /// Pending gains are paid out first and the deposit restarts from its
    /// compounded value plus `amount`. The front-end tag is only taken on a
    /// fresh deposit.
    pub fn provide_to_pool(
        &mut self,
        depositor: Address,
        amount: u128,
        front_end: Option<Address>,
    ) -> Result<PoolUpdate> {
        self.pool.validate_provide(&depositor, front_end.as_ref(), amount)?;

        let mut staged = self.accounting.clone();
        staged.trigger_issuance(self.timestamp)?;
        let settlement = self.pool.settle(&staged.rewards, &depositor)?;
        let tag = if settlement.initial_value == 0 {
            front_end
        } else {
            settlement.front_end
        };
        let (front_end_reward, front_end_stake) = self.front_end_position(&staged.rewards, tag.as_ref())?;
        let new_deposit = safe_add(settlement.compounded_deposit, amount)?;
        let new_front_end_stake = safe_add(front_end_stake, amount)?;
        staged.rewards.increase_deposits(amount)?;
        staged.pools.send_stability_coll(settlement.collateral_gain);

        let collateral_ops = [LedgerOp::Transfer {
            from: self.accounts.stability_pool,
            to: depositor,
            amount: settlement.collateral_gain,
        }];
        let stablecoin_ops = [LedgerOp::Transfer {
            from: depositor,
            to: self.accounts.stability_pool,
            amount,
        }];
        let reward_ops = Self::reward_ops(depositor, settlement.depositor_reward, tag, front_end_reward);
        self.settle_ledgers(&collateral_ops, &stablecoin_ops, &reward_ops)?;
        self.accounting = staged;

        self.commit_deposit(depositor, new_deposit, tag, new_front_end_stake, front_end_reward);
        self.push_gains(depositor, settlement.collateral_gain, settlement.deposit_loss(), settlement.depositor_reward);
        info!(
            depositor = %depositor,
            amount = %format_amount(amount, 2),
            deposit = %format_amount(new_deposit, 2),
            "provided to stability pool"
        );

        Ok(PoolUpdate {
            compounded_before: settlement.compounded_deposit,
            new_deposit,
            coll_gain: settlement.collateral_gain,
            reward_gain: settlement.depositor_reward,
            front_end_reward,
        })
    }

    /// Withdraw up to `amount` from the stability pool and pay out gains.
    ///
    /// A zero `amount` only claims gains. A non-zero withdrawal is refused
    /// while the lowest-ratio vault is below the minimum ratio.
    pub fn withdraw_from_pool(&mut self, depositor: Address, amount: u128) -> Result<PoolUpdate> {
        self.pool.require_deposit(&depositor)?;
        if amount != 0 {
            self.require_no_undercollateralized_vaults()?;
        }

        let mut staged = self.accounting.clone();
        staged.trigger_issuance(self.timestamp)?;
        let settlement = self.pool.settle(&staged.rewards, &depositor)?;
        let tag = settlement.front_end;
        let (front_end_reward, front_end_stake) = self.front_end_position(&staged.rewards, tag.as_ref())?;
        let withdrawn = amount.min(settlement.compounded_deposit);
        let new_deposit = settlement.compounded_deposit - withdrawn;
        let new_front_end_stake = front_end_stake.saturating_sub(withdrawn);
        staged.rewards.decrease_deposits(withdrawn)?;
        staged.pools.send_stability_coll(settlement.collateral_gain);

        let collateral_ops = [LedgerOp::Transfer {
            from: self.accounts.stability_pool,
            to: depositor,
            amount: settlement.collateral_gain,
        }];
        let stablecoin_ops = [LedgerOp::Transfer {
            from: self.accounts.stability_pool,
            to: depositor,
            amount: withdrawn,
        }];
        let reward_ops = Self::reward_ops(depositor, settlement.depositor_reward, tag, front_end_reward);
        self.settle_ledgers(&collateral_ops, &stablecoin_ops, &reward_ops)?;
        self.accounting = staged;

        self.commit_deposit(depositor, new_deposit, tag, new_front_end_stake, front_end_reward);
        self.push_gains(depositor, settlement.collateral_gain, settlement.deposit_loss(), settlement.depositor_reward);
        info!(
            depositor = %depositor,
            withdrawn = %format_amount(withdrawn, 2),
            deposit = %format_amount(new_deposit, 2),
            "withdrawn from stability pool"
        );

        Ok(PoolUpdate {
            compounded_before: settlement.compounded_deposit,
            new_deposit,
            coll_gain: settlement.collateral_gain,
            reward_gain: settlement.depositor_reward,
            front_end_reward,
        })
    }

    /// Move a depositor's collateral gain into their own vault
    pub fn redirect_gain_to_vault(&mut self, depositor: Address, vault_id: VaultId) -> Result<PoolUpdate> {
        self.pool.require_deposit(&depositor)?;
        let mut vault = self.vaults.active(&vault_id)?.clone();
        vault.verify_owner(&depositor)?;
        if self.pool.collateral_gain(&self.accounting.rewards, &depositor)? == 0 {
            return Err(Error::NoCollateralGain(depositor.to_string()));
        }

        let mut staged = self.accounting.clone();
        staged.trigger_issuance(self.timestamp)?;
        let settlement = self.pool.settle(&staged.rewards, &depositor)?;
        let tag = settlement.front_end;
        let (front_end_reward, front_end_stake) = self.front_end_position(&staged.rewards, tag.as_ref())?;
        let gain = settlement.collateral_gain;
        staged.pools.send_stability_coll(gain);

        let pending = Self::apply_pending_rewards(&mut staged, &mut vault)?;
        vault.coll = safe_add(vault.coll, gain)?;
        Self::restake(&mut staged, &mut vault)?;
        vault.last_updated = self.timestamp;
        staged.pools.increase_active(gain, 0);

        let collateral_ops = [
            LedgerOp::Transfer {
                from: self.accounts.default_pool,
                to: self.accounts.active_pool,
                amount: pending.coll,
            },
            LedgerOp::Transfer {
                from: self.accounts.stability_pool,
                to: self.accounts.active_pool,
                amount: gain,
            },
        ];
        let reward_ops = Self::reward_ops(depositor, settlement.depositor_reward, tag, front_end_reward);
        self.settle_ledgers(&collateral_ops, &[], &reward_ops)?;

        self.registry.reinsert(vault_id, vault.nicr());
        self.commit_vault(vault);
        self.accounting = staged;

        let new_deposit = settlement.compounded_deposit;
        self.commit_deposit(depositor, new_deposit, tag, front_end_stake, front_end_reward);
        self.event_log.push(ProtocolEvent::GainRedirected(GainRedirectedEvent {
            depositor,
            vault_id,
            coll_gain: gain,
            timestamp: self.timestamp,
        }));
        info!(
            depositor = %depositor,
            vault = %vault_id.short(),
            coll_gain = %format_amount(gain, 4),
            "collateral gain moved to vault"
        );

        Ok(PoolUpdate {
            compounded_before: new_deposit,
            new_deposit,
            coll_gain: gain,
            reward_gain: settlement.depositor_reward,
            front_end_reward,
        })
    }

    /// Register `front_end` with the share of rewards it passes to depositors
    pub fn register_front_end(&mut self, front_end: Address, kickback_rate: u128) -> Result<()> {
        self.pool.register_front_end(front_end, kickback_rate, self.timestamp)?;
        self.event_log.push(ProtocolEvent::FrontEndRegistered(FrontEndRegisteredEvent {
            front_end,
            kickback_rate,
            timestamp: self.timestamp,
        }));
        Ok(())
    }

    fn require_no_undercollateralized_vaults(&self) -> Result<()> {
        let Some(lowest) = self.registry.first() else {
            return Ok(());
        };
        let price = self.price()?;
        let vault = self.vaults.active(&lowest)?;
        let position = VaultPosition::load(vault, &self.accounting.redistribution)?;
        if position.icr(price) < self.config.params.mcr {
            return Err(Error::UndercollateralizedVaultsExist);
        }
        Ok(())
    }

    fn push_gains(&mut self, depositor: Address, coll_gain: u128, deposit_loss: u128, reward_gain: u128) {
        if coll_gain == 0 && deposit_loss == 0 && reward_gain == 0 {
            return;
        }
        self.event_log.push(ProtocolEvent::GainsWithdrawn(GainsWithdrawnEvent {
            depositor,
            coll_gain,
            deposit_loss,
            reward_gain,
            timestamp: self.timestamp,
        }));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TOKEN HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Credit external collateral to an account
    pub fn fund_collateral(&mut self, account: &Address, amount: u128) -> Result<()> {
        if self.accounts.is_system(account) {
            return Err(Error::Unauthorized(format!("{} is a protocol account", account)));
        }
        self.collateral.mint(account, amount)
    }

    /// Move stablecoin between user accounts
    pub fn transfer_stablecoin(&mut self, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if self.accounts.is_system(from) || self.accounts.is_system(to) {
            return Err(Error::Unauthorized("transfers touching protocol accounts".into()));
        }
        self.stablecoin.transfer(from, to, amount)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Current value of a deposit
    pub fn compounded_deposit(&self, depositor: &Address) -> u128 {
        self.pool.compounded_deposit(&self.accounting.rewards, depositor)
    }

    /// Collateral gain accrued by a deposit
    pub fn collateral_gain(&self, depositor: &Address) -> Result<u128> {
        self.pool.collateral_gain(&self.accounting.rewards, depositor)
    }

    /// Reward tokens accrued by a deposit as of the last issuance
    pub fn reward_gain(&self, depositor: &Address) -> Result<u128> {
        self.pool.depositor_reward_gain(&self.accounting.rewards, depositor)
    }

    /// Reward tokens accrued by a front end as of the last issuance
    pub fn front_end_reward_gain(&self, front_end: &Address) -> Result<u128> {
        self.pool.front_end_reward_gain(&self.accounting.rewards, front_end)
    }

    /// Current value of a front end's stake
    pub fn compounded_front_end_stake(&self, front_end: &Address) -> u128 {
        self.pool.compounded_front_end_stake(&self.accounting.rewards, front_end)
    }

    /// Entire position of an active vault, pending rewards included
    pub fn vault_position(&self, vault_id: &VaultId) -> Result<VaultPosition> {
        let vault = self.vaults.active(vault_id)?;
        VaultPosition::load(vault, &self.accounting.redistribution)
    }

    /// ICR of an active vault at the current price
    pub fn current_icr(&self, vault_id: &VaultId) -> Result<u128> {
        let position = self.vault_position(vault_id)?;
        Ok(position.icr(self.price()?))
    }

    /// System mode and TCR at the current price
    pub fn system_status(&self) -> Result<SystemStatus> {
        Ok(self.status_at(self.price()?))
    }

    fn status_at(&self, price: u128) -> SystemStatus {
        SystemStatus::evaluate(
            self.accounting.pools.entire_system_coll(),
            self.accounting.pools.entire_system_debt(),
            price,
            self.config.params.ccr,
        )
    }

    /// Check if the system is in Recovery Mode
    pub fn check_recovery_mode(&self) -> Result<bool> {
        Ok(self.system_status()?.is_recovery())
    }

    /// Total collateralization ratio at the current price
    pub fn tcr(&self) -> Result<u128> {
        Ok(self.system_status()?.tcr)
    }

    /// Collateral of all open vaults including pending rewards
    pub fn entire_system_coll(&self) -> u128 {
        self.accounting.pools.entire_system_coll()
    }

    /// Debt of all open vaults including pending rewards
    pub fn entire_system_debt(&self) -> u128 {
        self.accounting.pools.entire_system_debt()
    }

    /// Stablecoin held by the stability pool for depositors
    pub fn total_deposits(&self) -> u128 {
        self.accounting.rewards.total_deposits()
    }

    /// Claimable collateral surplus of `owner`
    pub fn surplus_of(&self, owner: &Address) -> u128 {
        self.accounting.pools.surplus_of(owner)
    }

    /// Protocol configuration
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Ledger addresses of the internal pools
    pub fn accounts(&self) -> &SystemAccounts {
        &self.accounts
    }

    /// All vaults
    pub fn vaults(&self) -> &VaultManager {
        &self.vaults
    }

    /// Get a vault by ID
    pub fn vault(&self, vault_id: &VaultId) -> Option<&Vault> {
        self.vaults.get(vault_id)
    }

    /// Registry of open vaults
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Shared accounting
    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    /// Stability pool records
    pub fn stability_pool(&self) -> &StabilityPool {
        &self.pool
    }

    /// Liquidation engine
    pub fn engine(&self) -> &LiquidationEngine {
        &self.engine
    }

    /// Debt token ledger
    pub fn stablecoin(&self) -> &Ledger {
        &self.stablecoin
    }

    /// Collateral token ledger
    pub fn collateral(&self) -> &Ledger {
        &self.collateral
    }

    /// Reward token ledger
    pub fn reward_token(&self) -> &Ledger {
        &self.reward_token
    }

    /// Events emitted since the last drain
    pub fn events(&self) -> &EventLog {
        &self.event_log
    }

    /// Remove and return all pending events
    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        self.event_log.drain()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INVARIANTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Check that the ledgers and the accounting agree
    pub fn verify_invariants(&self) -> Result<()> {
        let pools = &self.accounting.pools;
        let a = &self.accounts;
        let checks = [
            ("active pool collateral", self.collateral.balance_of(&a.active_pool), pools.active_coll),
            ("default pool collateral", self.collateral.balance_of(&a.default_pool), pools.default_coll),
            ("stability pool collateral", self.collateral.balance_of(&a.stability_pool), pools.stability_coll),
            ("surplus pool collateral", self.collateral.balance_of(&a.surplus_pool), pools.total_surplus),
            ("stability pool deposits", self.stablecoin.balance_of(&a.stability_pool), self.accounting.rewards.total_deposits()),
            ("stablecoin supply", self.stablecoin.total_supply(), pools.entire_system_debt()),
            (
                "gas pool reserve",
                self.stablecoin.balance_of(&a.gas_pool),
                self.config.params.gas_compensation * self.registry.len() as u128,
            ),
        ];
        for (name, held, recorded) in checks {
            if held != recorded {
                return Err(Error::InvariantViolation(format!(
                    "{}: ledger holds {}, accounting records {}",
                    name, held, recorded
                )));
            }
        }

        if !pools.verify_invariant() {
            return Err(Error::InvariantViolation("surplus total mismatch".into()));
        }
        if self.reward_token.total_supply() > self.accounting.issuance.total_issued() {
            return Err(Error::InvariantViolation("reward tokens exceed issuance".into()));
        }
        if self.registry.len() != self.vaults.active_count() {
            return Err(Error::InvariantViolation(format!(
                "registry holds {} vaults, {} are active",
                self.registry.len(),
                self.vaults.active_count()
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE EXPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
struct StateSnapshot<R> {
    timestamp: u64,
    config: ProtocolConfig,
    accounts: SystemAccounts,
    vaults: VaultManager,
    registry: R,
    accounting: Accounting,
    pool: StabilityPool,
    engine: LiquidationEngine,
    stablecoin: Ledger,
    collateral: Ledger,
    reward_token: Ledger,
}

impl<O, R> ProtocolStateMachine<O, R>
where
    O: PriceSource,
    R: PositionRegistry + Clone + Serialize + DeserializeOwned,
{
    /// Serialize the protocol state, excluding the oracle and event log
    pub fn export_state(&self) -> Result<Vec<u8>> {
        let snapshot = StateSnapshot {
            timestamp: self.timestamp,
            config: self.config.clone(),
            accounts: self.accounts,
            vaults: self.vaults.clone(),
            registry: self.registry.clone(),
            accounting: self.accounting.clone(),
            pool: self.pool.clone(),
            engine: self.engine.clone(),
            stablecoin: self.stablecoin.clone(),
            collateral: self.collateral.clone(),
            reward_token: self.reward_token.clone(),
        };
        bincode::serialize(&snapshot).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Replace the protocol state with a previously exported one
    pub fn import_state(&mut self, bytes: &[u8]) -> Result<()> {
        let snapshot: StateSnapshot<R> =
            bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        snapshot.config.validate()?;

        self.timestamp = snapshot.timestamp;
        self.recovery = RecoveryModeManager::new(snapshot.config.params.clone());
        self.config = snapshot.config;
        self.accounts = snapshot.accounts;
        self.vaults = snapshot.vaults;
        self.registry = snapshot.registry;
        self.accounting = snapshot.accounting;
        self.pool = snapshot.pool;
        self.engine = snapshot.engine;
        self.stablecoin = snapshot.stablecoin;
        self.collateral = snapshot.collateral;
        self.reward_token = snapshot.reward_token;
        self.event_log.clear();
        info!(vaults = self.registry.len(), "protocol state imported");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{IssuanceParams, ProtocolParams};
    use crate::oracle::price_feed::PriceData;
    use crate::utils::constants::ONE;

    type Machine = ProtocolStateMachine<PriceFeed, SortedVaults>;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn create_test_machine() -> Machine {
        let config = ProtocolConfig::new(ProtocolParams::default()).with_issuance(IssuanceParams::disabled());
        let feed = PriceFeed::with_price(100 * ONE, 0).unwrap();
        Machine::new(config, feed).unwrap()
    }

    fn open(machine: &mut Machine, label: &str, coll: u128, net_debt: u128) -> VaultId {
        let owner = addr(label);
        machine.fund_collateral(&owner, coll).unwrap();
        match machine.open_vault(owner, coll, net_debt).unwrap() {
            OperationResult::VaultOpened { vault_id, .. } => vault_id,
            other => panic!("unexpected result {:?}", other),
        }
    }

    fn set_price(machine: &mut Machine, price: u128) {
        let now = machine.timestamp();
        machine.oracle_mut().update(PriceData::new(price, now)).unwrap();
    }

    #[test]
    fn test_open_vault_books_debt_and_reserve() {
        let mut machine = create_test_machine();
        let id = open(&mut machine, "alice", 100 * ONE, 2_000 * ONE);

        let vault = machine.vault(&id).unwrap();
        assert_eq!(vault.debt, 2_200 * ONE);
        assert_eq!(vault.stake, 100 * ONE);
        assert_eq!(machine.stablecoin().balance_of(&addr("alice")), 2_000 * ONE);
        assert_eq!(machine.stablecoin().balance_of(&machine.accounts().gas_pool), 200 * ONE);
        assert_eq!(machine.entire_system_debt(), 2_200 * ONE);
        assert_eq!(machine.events().filter_by_type("VaultOpened").len(), 1);
        machine.verify_invariants().unwrap();
    }

    #[test]
    fn test_open_vault_rejections() {
        let mut machine = create_test_machine();
        let alice = addr("alice");
        machine.fund_collateral(&alice, 100 * ONE).unwrap();

        assert!(matches!(
            machine.open_vault(alice, 100 * ONE, 1_000 * ONE),
            Err(Error::DebtBelowMinimum { .. })
        ));
        assert!(matches!(
            machine.open_vault(alice, 20 * ONE, 2_000 * ONE),
            Err(Error::CollateralizationRatioTooLow { .. })
        ));
        assert!(matches!(
            machine.open_vault(alice, 200 * ONE, 2_000 * ONE),
            Err(Error::InsufficientBalance { .. })
        ));
        assert_eq!(machine.registry().len(), 0);
        machine.verify_invariants().unwrap();
    }

    #[test]
    fn test_stale_price_rejects_operations() {
        let mut machine = create_test_machine();
        let alice = addr("alice");
        machine.fund_collateral(&alice, 100 * ONE).unwrap();
        machine.advance_time(machine.oracle().max_staleness() + 1);

        assert!(matches!(
            machine.open_vault(alice, 100 * ONE, 2_000 * ONE),
            Err(Error::StalePrice { .. })
        ));
    }

    #[test]
    fn test_close_vault_returns_collateral() {
        let mut machine = create_test_machine();
        let id = open(&mut machine, "alice", 100 * ONE, 2_000 * ONE);
        open(&mut machine, "bob", 100 * ONE, 2_000 * ONE);

        // the owner still holds the debt net of the gas reserve
        let result = machine.close_vault(addr("alice"), id).unwrap();
        assert_eq!(result, OperationResult::VaultClosed { coll_returned: 100 * ONE });
        assert_eq!(machine.vault(&id).unwrap().status, VaultStatus::ClosedByOwner);
        assert_eq!(machine.collateral().balance_of(&addr("alice")), 100 * ONE);
        assert_eq!(machine.stablecoin().balance_of(&addr("alice")), 0);
        machine.verify_invariants().unwrap();
    }

    #[test]
    fn test_close_last_vault_fails() {
        let mut machine = create_test_machine();
        let id = open(&mut machine, "alice", 100 * ONE, 2_000 * ONE);
        assert!(matches!(
            machine.close_vault(addr("alice"), id),
            Err(Error::EmptySystem)
        ));
        assert!(matches!(
            machine.close_vault(addr("bob"), id),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_add_collateral_reorders_registry() {
        let mut machine = create_test_machine();
        let b = open(&mut machine, "bob", 40 * ONE, 2_000 * ONE);
        let a = open(&mut machine, "alice", 30 * ONE, 2_000 * ONE);
        assert_eq!(machine.registry().first(), Some(a));

        machine.fund_collateral(&addr("alice"), 20 * ONE).unwrap();
        let result = machine.add_collateral(addr("alice"), a, 20 * ONE).unwrap();
        assert_eq!(result, OperationResult::CollateralAdded { new_coll: 50 * ONE });
        assert_eq!(machine.registry().first(), Some(b));
        machine.verify_invariants().unwrap();
    }

    #[test]
    fn test_liquidation_offsets_against_pool() {
        let mut machine = create_test_machine();
        open(&mut machine, "bob", 200 * ONE, 5_000 * ONE);
        let victim = open(&mut machine, "alice", 25 * ONE, 2_000 * ONE);
        machine.provide_to_pool(addr("bob"), 5_000 * ONE, None).unwrap();

        set_price(&mut machine, 80 * ONE);
        let keeper = addr("keeper");
        let summary = machine.liquidate(keeper, victim).unwrap();

        assert_eq!(summary.liquidated, vec![victim]);
        assert_eq!(summary.totals.debt_to_offset, 2_200 * ONE);
        assert_eq!(machine.compounded_deposit(&addr("bob")), 2_800 * ONE);
        // 25 collateral minus 0.5% gas compensation
        assert_eq!(machine.collateral_gain(&addr("bob")).unwrap(), 24_875 * ONE / 1_000);
        assert_eq!(machine.collateral().balance_of(&keeper), 125 * ONE / 1_000);
        assert_eq!(machine.stablecoin().balance_of(&keeper), 200 * ONE);
        assert_eq!(machine.vault(&victim).unwrap().status, VaultStatus::ClosedByLiquidation);
        machine.verify_invariants().unwrap();
    }

    #[test]
    fn test_failed_liquidation_leaves_state_untouched() {
        let mut machine = create_test_machine();
        let a = open(&mut machine, "alice", 100 * ONE, 2_000 * ONE);
        open(&mut machine, "bob", 100 * ONE, 2_000 * ONE);
        let before = machine.accounting().clone();

        assert!(matches!(
            machine.liquidate(addr("keeper"), a),
            Err(Error::NoLiquidatableVaults)
        ));
        assert!(matches!(
            machine.batch_liquidate(addr("keeper"), &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(machine.accounting(), &before);
        assert_eq!(machine.registry().len(), 2);
        machine.verify_invariants().unwrap();
    }

    #[test]
    fn test_withdraw_claims_gains_and_guards_undercollateralized() {
        let mut machine = create_test_machine();
        open(&mut machine, "bob", 300 * ONE, 10_000 * ONE);
        let victim = open(&mut machine, "alice", 25 * ONE, 2_000 * ONE);
        open(&mut machine, "carol", 25 * ONE, 2_000 * ONE);
        machine.provide_to_pool(addr("bob"), 10_000 * ONE, None).unwrap();

        set_price(&mut machine, 80 * ONE);
        machine.liquidate(addr("keeper"), victim).unwrap();

        // carol's vault is still below the minimum ratio
        assert!(matches!(
            machine.withdraw_from_pool(addr("bob"), ONE),
            Err(Error::UndercollateralizedVaultsExist)
        ));
        let update = machine.withdraw_from_pool(addr("bob"), 0).unwrap();
        assert_eq!(update.coll_gain, 24_875 * ONE / 1_000);
        assert_eq!(update.new_deposit, 7_800 * ONE);
        assert_eq!(machine.collateral_gain(&addr("bob")).unwrap(), 0);
        machine.verify_invariants().unwrap();

        assert!(matches!(
            machine.withdraw_from_pool(addr("alice"), 0),
            Err(Error::NoDeposit(_))
        ));
    }

    #[test]
    fn test_redirect_gain_to_vault() {
        let mut machine = create_test_machine();
        let bob_vault = open(&mut machine, "bob", 300 * ONE, 10_000 * ONE);
        let victim = open(&mut machine, "alice", 25 * ONE, 2_000 * ONE);
        machine.provide_to_pool(addr("bob"), 10_000 * ONE, None).unwrap();
        assert!(matches!(
            machine.redirect_gain_to_vault(addr("bob"), bob_vault),
            Err(Error::NoCollateralGain(_))
        ));

        set_price(&mut machine, 80 * ONE);
        machine.liquidate(addr("keeper"), victim).unwrap();
        assert!(matches!(
            machine.redirect_gain_to_vault(addr("bob"), victim),
            Err(Error::VaultNotActive(_))
        ));

        let update = machine.redirect_gain_to_vault(addr("bob"), bob_vault).unwrap();
        let vault = machine.vault(&bob_vault).unwrap();
        assert_eq!(vault.coll, 300 * ONE + update.coll_gain);
        assert_eq!(machine.compounded_deposit(&addr("bob")), 7_800 * ONE);
        machine.verify_invariants().unwrap();
    }

    #[test]
    fn test_export_import_roundtrip() {
        let mut machine = create_test_machine();
        let id = open(&mut machine, "alice", 100 * ONE, 2_000 * ONE);
        machine.provide_to_pool(addr("alice"), 1_000 * ONE, None).unwrap();
        let bytes = machine.export_state().unwrap();

        let mut restored = create_test_machine();
        restored.import_state(&bytes).unwrap();
        assert_eq!(restored.vault(&id), machine.vault(&id));
        assert_eq!(restored.compounded_deposit(&addr("alice")), 1_000 * ONE);
        assert_eq!(restored.accounting(), machine.accounting());
        restored.verify_invariants().unwrap();
    }

    #[test]
    fn test_execute_dispatch() {
        let mut machine = create_test_machine();
        let fe = addr("frontend");
        let result = machine
            .execute(ProtocolOperation::RegisterFrontEnd {
                front_end: fe,
                kickback_rate: ONE / 2,
            })
            .unwrap();
        assert_eq!(result, OperationResult::FrontEndRegistered);
        assert!(machine.stability_pool().is_registered_front_end(&fe));
    }
}
