//! Vaultline scenario simulator
//!
//! Replays a JSON scenario of borrower, liquidation and stability pool steps
//! against an in-memory protocol and prints the resulting state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};
use clap::Parser;
use console::{style, Term};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use vaultline::core::config::ProtocolConfig;
use vaultline::core::registry::SortedVaults;
use vaultline::oracle::price_feed::{PriceData, PriceFeed};
use vaultline::protocol::operations::{OperationResult, ProtocolOperation};
use vaultline::protocol::state_machine::ProtocolStateMachine;
use vaultline::utils::crypto::{Address, VaultId};
use vaultline::utils::math::format_amount;

type Machine = ProtocolStateMachine<PriceFeed, SortedVaults>;

/// Vaultline simulator - replay liquidation scenarios
#[derive(Parser)]
#[command(name = "vaultline-sim")]
#[command(author = "Vaultline Team")]
#[command(version = vaultline::VERSION)]
#[command(about = "Replay a JSON scenario against the Vaultline protocol", long_about = None)]
struct Cli {
    /// Scenario file
    scenario: PathBuf,

    /// Protocol configuration file, overriding the scenario's
    #[arg(short, long, env = "VAULTLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Continue after a failing step
    #[arg(short, long)]
    keep_going: bool,

    /// Print the final state as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIO FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

/// A scenario file
#[derive(Debug, Deserialize)]
struct Scenario {
    /// Protocol configuration
    #[serde(default)]
    config: ProtocolConfig,
    /// Collateral price at the start, as a decimal string
    initial_price: String,
    /// Steps in order
    steps: Vec<Step>,
}

/// One scenario step. Accounts are labels, amounts are decimal strings and
/// vaults are referenced by their owner's label.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Step {
    Fund { account: String, amount: String },
    Transfer { from: String, to: String, amount: String },
    SetPrice { price: String },
    Advance {
        seconds: u64,
        #[serde(default = "default_true")]
        refresh_price: bool,
    },
    OpenVault { owner: String, coll: String, net_debt: String },
    AddCollateral { owner: String, amount: String },
    CloseVault { owner: String },
    ClaimSurplus { owner: String },
    Liquidate { liquidator: String, owner: String },
    LiquidateBatch { liquidator: String, count: usize },
    BatchLiquidate { liquidator: String, owners: Vec<String> },
    Provide {
        depositor: String,
        amount: String,
        #[serde(default)]
        front_end: Option<String>,
    },
    Withdraw { depositor: String, amount: String },
    RedirectGain { depositor: String },
    RegisterFrontEnd { front_end: String, kickback_rate: String },
}

fn default_true() -> bool {
    true
}

/// Parse a decimal string into an 18-decimal raw amount
fn parse_amount(value: &str) -> anyhow::Result<u128> {
    let decimal = Decimal::from_str(value.trim()).with_context(|| format!("invalid amount '{}'", value))?;
    if decimal.is_sign_negative() {
        bail!("negative amount '{}'", value);
    }
    let scale = decimal.scale();
    if scale > 18 {
        bail!("amount '{}' has more than 18 decimals", value);
    }
    let mantissa = u128::try_from(decimal.mantissa())?;
    mantissa
        .checked_mul(10u128.pow(18 - scale))
        .with_context(|| format!("amount '{}' overflows", value))
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNNER
// ═══════════════════════════════════════════════════════════════════════════════

struct Simulator {
    machine: Machine,
    labels: BTreeMap<Address, String>,
}

impl Simulator {
    fn new(config: ProtocolConfig, initial_price: u128) -> anyhow::Result<Self> {
        let feed = PriceFeed::with_price(initial_price, config.issuance.deployment_time)?;
        Ok(Self {
            machine: Machine::new(config, feed)?,
            labels: BTreeMap::new(),
        })
    }

    fn account(&mut self, label: &str) -> Address {
        let address = Address::from_label(label);
        self.labels.entry(address).or_insert_with(|| label.to_string());
        address
    }

    fn vault_of(&mut self, label: &str) -> anyhow::Result<VaultId> {
        let owner = self.account(label);
        let mut vaults: Vec<_> = self
            .machine
            .vaults()
            .by_owner(&owner)
            .into_iter()
            .filter(|v| v.is_active())
            .collect();
        vaults.sort_by_key(|v| (v.created_at, v.id));
        match vaults.last() {
            Some(vault) => Ok(vault.id),
            None => bail!("{} has no active vault", label),
        }
    }

    fn set_price(&mut self, price: u128) -> anyhow::Result<()> {
        let now = self.machine.timestamp();
        self.machine.oracle_mut().update(PriceData::new(price, now))?;
        Ok(())
    }

    /// Translate a step into an operation, or apply it directly
    fn run_step(&mut self, step: &Step) -> anyhow::Result<String> {
        let op = match step {
            Step::Fund { account, amount } => {
                let to = self.account(account);
                let amount = parse_amount(amount)?;
                self.machine.fund_collateral(&to, amount)?;
                return Ok(format!("funded {} with {} collateral", account, format_amount(amount, 4)));
            }
            Step::Transfer { from, to, amount } => {
                let (source, target) = (self.account(from), self.account(to));
                let amount = parse_amount(amount)?;
                self.machine.transfer_stablecoin(&source, &target, amount)?;
                return Ok(format!("{} sent {} to {}", from, format_amount(amount, 2), to));
            }
            Step::SetPrice { price } => {
                let price = parse_amount(price)?;
                self.set_price(price)?;
                return Ok(format!("price set to {}", format_amount(price, 2)));
            }
            Step::Advance { seconds, refresh_price } => {
                self.machine.advance_time(*seconds);
                if *refresh_price {
                    let price = self.machine.oracle().current().price;
                    self.set_price(price)?;
                }
                return Ok(format!("advanced {}s to t={}", seconds, self.machine.timestamp()));
            }
            Step::OpenVault { owner, coll, net_debt } => ProtocolOperation::OpenVault {
                owner: self.account(owner),
                coll: parse_amount(coll)?,
                net_debt: parse_amount(net_debt)?,
            },
            Step::AddCollateral { owner, amount } => ProtocolOperation::AddCollateral {
                caller: self.account(owner),
                vault_id: self.vault_of(owner)?,
                amount: parse_amount(amount)?,
            },
            Step::CloseVault { owner } => ProtocolOperation::CloseVault {
                caller: self.account(owner),
                vault_id: self.vault_of(owner)?,
            },
            Step::ClaimSurplus { owner } => ProtocolOperation::ClaimCollateralSurplus {
                owner: self.account(owner),
            },
            Step::Liquidate { liquidator, owner } => ProtocolOperation::Liquidate {
                liquidator: self.account(liquidator),
                vault_id: self.vault_of(owner)?,
            },
            Step::LiquidateBatch { liquidator, count } => ProtocolOperation::LiquidateBatch {
                liquidator: self.account(liquidator),
                count: *count,
            },
            Step::BatchLiquidate { liquidator, owners } => ProtocolOperation::BatchLiquidate {
                liquidator: self.account(liquidator),
                vault_ids: owners
                    .iter()
                    .map(|owner| self.vault_of(owner))
                    .collect::<anyhow::Result<Vec<_>>>()?,
            },
            Step::Provide { depositor, amount, front_end } => ProtocolOperation::ProvideToPool {
                depositor: self.account(depositor),
                amount: parse_amount(amount)?,
                front_end: front_end.as_deref().map(|fe| self.account(fe)),
            },
            Step::Withdraw { depositor, amount } => ProtocolOperation::WithdrawFromPool {
                depositor: self.account(depositor),
                amount: parse_amount(amount)?,
            },
            Step::RedirectGain { depositor } => ProtocolOperation::RedirectGainToVault {
                depositor: self.account(depositor),
                vault_id: self.vault_of(depositor)?,
            },
            Step::RegisterFrontEnd { front_end, kickback_rate } => ProtocolOperation::RegisterFrontEnd {
                front_end: self.account(front_end),
                kickback_rate: parse_amount(kickback_rate)?,
            },
        };

        let op_type = op.operation_type();
        let result = self.machine.execute(op)?;
        Ok(self.describe(op_type, &result))
    }

    fn describe(&self, op_type: &str, result: &OperationResult) -> String {
        match result {
            OperationResult::VaultOpened { vault_id, debt, icr } => format!(
                "{} {} debt {} ICR {}%",
                op_type,
                vault_id.short(),
                format_amount(*debt, 2),
                format_amount(icr.saturating_mul(100), 2)
            ),
            OperationResult::CollateralAdded { new_coll } => {
                format!("{} collateral now {}", op_type, format_amount(*new_coll, 4))
            }
            OperationResult::VaultClosed { coll_returned } => {
                format!("{} returned {}", op_type, format_amount(*coll_returned, 4))
            }
            OperationResult::SurplusClaimed { amount } => {
                format!("{} paid {}", op_type, format_amount(*amount, 4))
            }
            OperationResult::Liquidated(summary) => format!(
                "{} {} vault(s), {} skipped, offset {} redistributed {} ({:?})",
                op_type,
                summary.liquidated.len(),
                summary.skipped.len(),
                format_amount(summary.totals.debt_to_offset, 2),
                format_amount(summary.totals.debt_to_redistribute, 2),
                summary.mode
            ),
            OperationResult::PoolUpdated(update) => format!(
                "{} deposit {} -> {}, collateral gain {}, rewards {}",
                op_type,
                format_amount(update.compounded_before, 2),
                format_amount(update.new_deposit, 2),
                format_amount(update.coll_gain, 4),
                format_amount(update.reward_gain, 4)
            ),
            OperationResult::FrontEndRegistered => op_type.to_string(),
        }
    }

    fn label(&self, address: &Address) -> String {
        self.labels
            .get(address)
            .cloned()
            .unwrap_or_else(|| address.short())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct DepositorReport {
    depositor: String,
    compounded_deposit: String,
    collateral_gain: String,
    reward_gain: String,
}

#[derive(Debug, Serialize)]
struct VaultReport {
    owner: String,
    vault: String,
    coll: String,
    debt: String,
    icr_percent: String,
}

#[derive(Debug, Serialize)]
struct Report {
    timestamp: u64,
    price: String,
    mode: String,
    tcr_percent: String,
    system_coll: String,
    system_debt: String,
    total_deposits: String,
    p: String,
    scale: u64,
    epoch: u64,
    l_coll: String,
    l_debt: String,
    depositors: Vec<DepositorReport>,
    vaults: Vec<VaultReport>,
    vaults_liquidated: u64,
}

fn build_report(sim: &Simulator) -> anyhow::Result<Report> {
    let machine = &sim.machine;
    let status = machine.system_status()?;
    let rewards = &machine.accounting().rewards;
    let ledger = &machine.accounting().redistribution;

    let mut depositors = Vec::new();
    for depositor in machine.stability_pool().depositors() {
        depositors.push(DepositorReport {
            depositor: sim.label(depositor),
            compounded_deposit: format_amount(machine.compounded_deposit(depositor), 2),
            collateral_gain: format_amount(machine.collateral_gain(depositor)?, 4),
            reward_gain: format_amount(machine.reward_gain(depositor)?, 4),
        });
    }
    depositors.sort_by(|a, b| a.depositor.cmp(&b.depositor));

    let mut vaults = Vec::new();
    for vault in machine.vaults().iter().filter(|v| v.is_active()) {
        let position = machine.vault_position(&vault.id)?;
        vaults.push(VaultReport {
            owner: sim.label(&vault.owner),
            vault: vault.id.short(),
            coll: format_amount(position.coll, 4),
            debt: format_amount(position.debt, 2),
            icr_percent: format_amount(position.icr(status.price).saturating_mul(100), 2),
        });
    }
    vaults.sort_by(|a, b| a.owner.cmp(&b.owner));

    Ok(Report {
        timestamp: machine.timestamp(),
        price: format_amount(status.price, 2),
        mode: format!("{:?}", status.mode),
        tcr_percent: format_amount(status.tcr.saturating_mul(100), 2),
        system_coll: format_amount(status.total_coll, 4),
        system_debt: format_amount(status.total_debt, 2),
        total_deposits: format_amount(machine.total_deposits(), 2),
        p: format_amount(rewards.p(), 18),
        scale: rewards.current_scale(),
        epoch: rewards.current_epoch(),
        l_coll: format_amount(ledger.l_coll(), 18),
        l_debt: format_amount(ledger.l_debt(), 18),
        depositors,
        vaults,
        vaults_liquidated: machine.engine().statistics().vaults_liquidated,
    })
}

fn print_report(report: &Report, term: &Term) -> anyhow::Result<()> {
    term.write_line("")?;
    term.write_line(&format!("{}", style("System").bold().underlined()))?;
    term.write_line(&format!("  Price:          {}", report.price))?;
    term.write_line(&format!("  Mode:           {} (TCR {}%)", style(&report.mode).yellow(), report.tcr_percent))?;
    term.write_line(&format!("  Collateral:     {}", report.system_coll))?;
    term.write_line(&format!("  Debt:           {}", report.system_debt))?;
    term.write_line(&format!("  Pool deposits:  {}", report.total_deposits))?;
    term.write_line(&format!("  P / scale / epoch: {} / {} / {}", report.p, report.scale, report.epoch))?;
    term.write_line(&format!("  Liquidated:     {}", report.vaults_liquidated))?;

    term.write_line("")?;
    term.write_line(&format!("{}", style("Depositors").bold().underlined()))?;
    for d in &report.depositors {
        term.write_line(&format!(
            "  {:<12} deposit {:>14}  coll gain {:>12}  rewards {:>12}",
            d.depositor, d.compounded_deposit, d.collateral_gain, d.reward_gain
        ))?;
    }

    term.write_line("")?;
    term.write_line(&format!("{}", style("Vaults").bold().underlined()))?;
    for v in &report.vaults {
        term.write_line(&format!(
            "  {:<12} {}  coll {:>12}  debt {:>14}  ICR {:>8}%",
            v.owner, v.vault, v.coll, v.debt, v.icr_percent
        ))?;
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════════════════════

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let term = Term::stdout();
    if let Err(e) = run(&cli, &term) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli, term: &Term) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading {}", cli.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw).context("parsing scenario")?;

    let config = match &cli.config {
        Some(path) => ProtocolConfig::load(path)?,
        None => scenario.config,
    };
    let mut sim = Simulator::new(config, parse_amount(&scenario.initial_price)?)?;

    let mut failures = 0usize;
    for (index, step) in scenario.steps.iter().enumerate() {
        match sim.run_step(step) {
            Ok(line) => {
                term.write_line(&format!("{} [{:>3}] {}", style("✓").green(), index + 1, line))?;
            }
            Err(e) => {
                failures += 1;
                term.write_line(&format!("{} [{:>3}] {:#}", style("✗").red(), index + 1, e))?;
                if !cli.keep_going {
                    bail!("step {} failed", index + 1);
                }
            }
        }
    }

    sim.machine.verify_invariants()?;
    let report = build_report(&sim)?;
    if cli.json {
        term.write_line(&serde_json::to_string_pretty(&report)?)?;
    } else {
        print_report(&report, term)?;
    }

    if failures > 0 {
        term.write_line(&format!("\n{} {} step(s) failed", style("!").yellow(), failures))?;
    }
    Ok(())
}
