//! Fungible token ledgers.
//!
//! The protocol moves three assets: the stablecoin, the reward token and the
//! collateral itself. Each is held in a [`TokenLedger`]. State-changing protocol
//! calls assemble every movement they need as a list of [`LedgerOp`]s and hand
//! it to [`TokenLedger::execute`], which validates the whole batch before
//! applying any of it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;
use crate::utils::math::{safe_add, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A single balance movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOp {
    /// Create new tokens
    Mint {
        /// Recipient
        to: Address,
        /// Amount minted
        amount: u128,
    },
    /// Destroy tokens
    Burn {
        /// Holder
        from: Address,
        /// Amount burned
        amount: u128,
    },
    /// Move tokens between accounts
    Transfer {
        /// Sender
        from: Address,
        /// Recipient
        to: Address,
        /// Amount moved
        amount: u128,
    },
}

impl LedgerOp {
    /// Amount carried by the operation
    pub fn amount(&self) -> u128 {
        match *self {
            LedgerOp::Mint { amount, .. }
            | LedgerOp::Burn { amount, .. }
            | LedgerOp::Transfer { amount, .. } => amount,
        }
    }
}

fn insufficient(account: &Address, required: u128, available: u128) -> Error {
    Error::InsufficientBalance {
        account: account.to_string(),
        required,
        available,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN LEDGER TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Balance ledger for a fungible token.
///
/// Zero-amount operations are accepted as no-ops.
pub trait TokenLedger {
    /// Ticker used in logs
    fn symbol(&self) -> &str;

    /// Balance of an account
    fn balance_of(&self, account: &Address) -> u128;

    /// Total supply
    fn total_supply(&self) -> u128;

    /// Mint `amount` to `to`
    fn mint(&mut self, to: &Address, amount: u128) -> Result<()>;

    /// Burn `amount` from `from`
    fn burn(&mut self, from: &Address, amount: u128) -> Result<()>;

    /// Move `amount` from `from` to `to`
    fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<()>;

    /// Validate a batch against current balances without applying it.
    ///
    /// Operations are simulated in order, so a later debit may spend an earlier credit.
    fn check(&self, ops: &[LedgerOp]) -> Result<()> {
        let mut balances: HashMap<Address, u128> = HashMap::new();
        let mut supply = self.total_supply();

        for op in ops {
            match *op {
                LedgerOp::Mint { to, amount } => {
                    supply = safe_add(supply, amount)?;
                    let balance = balances.entry(to).or_insert_with(|| self.balance_of(&to));
                    *balance = safe_add(*balance, amount)?;
                }
                LedgerOp::Burn { from, amount } => {
                    let balance = balances.entry(from).or_insert_with(|| self.balance_of(&from));
                    if *balance < amount {
                        return Err(insufficient(&from, amount, *balance));
                    }
                    *balance -= amount;
                    supply = supply.saturating_sub(amount);
                }
                LedgerOp::Transfer { from, to, amount } => {
                    let balance = balances.entry(from).or_insert_with(|| self.balance_of(&from));
                    if *balance < amount {
                        return Err(insufficient(&from, amount, *balance));
                    }
                    *balance -= amount;
                    let balance = balances.entry(to).or_insert_with(|| self.balance_of(&to));
                    *balance = safe_add(*balance, amount)?;
                }
            }
        }
        Ok(())
    }

    /// Apply a batch atomically: either every operation succeeds or none is applied
    fn execute(&mut self, ops: &[LedgerOp]) -> Result<()> {
        self.check(ops)?;
        for op in ops {
            match *op {
                LedgerOp::Mint { to, amount } => self.mint(&to, amount)?,
                LedgerOp::Burn { from, amount } => self.burn(&from, amount)?,
                LedgerOp::Transfer { from, to, amount } => self.transfer(&from, &to, amount)?,
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of a recorded ledger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenOperation {
    /// Tokens were minted
    Mint,
    /// Tokens were burned
    Burn,
    /// Tokens were transferred
    Transfer,
}

/// A recorded ledger event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// Kind of operation
    pub operation: TokenOperation,
    /// Debited account
    pub from: Option<Address>,
    /// Credited account
    pub to: Option<Address>,
    /// Amount moved
    pub amount: u128,
}

/// In-memory token ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    symbol: String,
    balances: HashMap<Address, u128>,
    total_supply: u128,
    events: Vec<TokenEvent>,
    max_events: usize,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            balances: HashMap::new(),
            total_supply: 0,
            events: Vec::new(),
            max_events: 1_000,
        }
    }

    /// Number of accounts with a non-zero balance
    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Verify that balances add up to the total supply
    pub fn verify_supply_invariant(&self) -> bool {
        self.balances
            .values()
            .try_fold(0u128, |acc, b| acc.checked_add(*b))
            == Some(self.total_supply)
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self) -> &[TokenEvent] {
        &self.events
    }

    fn set_balance(&mut self, account: &Address, balance: u128) {
        if balance == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, balance);
        }
    }

    fn add_event(&mut self, event: TokenEvent) {
        self.events.push(event);
        if self.events.len() > self.max_events {
            self.events.remove(0);
        }
    }
}

impl TokenLedger for Ledger {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn balance_of(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn total_supply(&self) -> u128 {
        self.total_supply
    }

    fn mint(&mut self, to: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let new_supply = safe_add(self.total_supply, amount)?;
        let new_balance = safe_add(self.balance_of(to), amount)?;
        self.total_supply = new_supply;
        self.set_balance(to, new_balance);

        self.add_event(TokenEvent {
            operation: TokenOperation::Mint,
            from: None,
            to: Some(*to),
            amount,
        });
        Ok(())
    }

    fn burn(&mut self, from: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(insufficient(from, amount, balance));
        }
        self.set_balance(from, balance - amount);
        self.total_supply = safe_sub(self.total_supply, amount)?;

        self.add_event(TokenEvent {
            operation: TokenOperation::Burn,
            from: Some(*from),
            to: None,
            amount,
        });
        Ok(())
    }

    fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(insufficient(from, amount, from_balance));
        }
        let to_balance = safe_add(self.balance_of(to), amount)?;
        self.set_balance(from, from_balance - amount);
        self.set_balance(to, to_balance);

        self.add_event(TokenEvent {
            operation: TokenOperation::Transfer,
            from: Some(*from),
            to: Some(*to),
            amount,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::from_label("alice")
    }

    fn bob() -> Address {
        Address::from_label("bob")
    }

    #[test]
    fn test_mint_burn() {
        let mut ledger = Ledger::new("VUSD");
        ledger.mint(&alice(), 1_000).unwrap();
        assert_eq!(ledger.balance_of(&alice()), 1_000);
        assert_eq!(ledger.total_supply(), 1_000);

        ledger.burn(&alice(), 400).unwrap();
        assert_eq!(ledger.balance_of(&alice()), 600);
        assert_eq!(ledger.total_supply(), 600);
        assert!(ledger.verify_supply_invariant());
    }

    #[test]
    fn test_burn_insufficient() {
        let mut ledger = Ledger::new("VUSD");
        ledger.mint(&alice(), 100).unwrap();
        let err = ledger.burn(&alice(), 101).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance { required: 101, available: 100, .. }
        ));
    }

    #[test]
    fn test_transfer() {
        let mut ledger = Ledger::new("VUSD");
        ledger.mint(&alice(), 1_000).unwrap();
        ledger.transfer(&alice(), &bob(), 1_000).unwrap();
        assert_eq!(ledger.balance_of(&alice()), 0);
        assert_eq!(ledger.balance_of(&bob()), 1_000);
        assert_eq!(ledger.holder_count(), 1);
    }

    #[test]
    fn test_zero_amounts_are_noops() {
        let mut ledger = Ledger::new("VUSD");
        ledger.mint(&alice(), 0).unwrap();
        ledger.transfer(&alice(), &bob(), 0).unwrap();
        ledger.burn(&alice(), 0).unwrap();
        assert!(ledger.recent_events().is_empty());
    }

    #[test]
    fn test_execute_is_all_or_nothing() {
        let mut ledger = Ledger::new("VUSD");
        ledger.mint(&alice(), 500).unwrap();

        let ops = [
            LedgerOp::Transfer { from: alice(), to: bob(), amount: 300 },
            LedgerOp::Burn { from: alice(), amount: 300 },
        ];
        assert!(ledger.execute(&ops).is_err());
        assert_eq!(ledger.balance_of(&alice()), 500);
        assert_eq!(ledger.balance_of(&bob()), 0);
    }

    #[test]
    fn test_check_spends_earlier_credits() {
        let mut ledger = Ledger::new("VUSD");
        let ops = [
            LedgerOp::Mint { to: alice(), amount: 100 },
            LedgerOp::Transfer { from: alice(), to: bob(), amount: 100 },
            LedgerOp::Burn { from: bob(), amount: 40 },
        ];
        ledger.execute(&ops).unwrap();
        assert_eq!(ledger.balance_of(&bob()), 60);
        assert_eq!(ledger.total_supply(), 60);
        assert_eq!(ops[1].amount(), 100);
    }
}
