//! # Vaultline Protocol
//!
//! Liquidation and stability-pool accounting for a collateralized-debt
//! stablecoin system.
//!
//! ## Architecture
//!
//! The protocol consists of several core modules:
//!
//! - **Core**: Configuration, vaults, the ordered vault registry, token ledgers
//!   and pool totals
//! - **Oracle**: Price source consumed by every operation
//! - **Liquidation**: Liquidation engine, stability pool accounting,
//!   redistribution and community issuance
//! - **Protocol**: State machine executing operations atomically
//!
//! Liquidating a batch of vaults touches the shared accumulators once, so its
//! cost does not depend on the number of stability pool depositors.
//!
//! ## Example
//!
//! ```rust,ignore
//! use vaultline::prelude::*;
//!
//! let feed = PriceFeed::with_price(2_000 * ONE, now)?;
//! let mut machine: ProtocolStateMachine = ProtocolStateMachine::new(ProtocolConfig::default(), feed)?;
//!
//! machine.fund_collateral(&owner, 10 * ONE)?;
//! machine.open_vault(owner, 10 * ONE, 2_000 * ONE)?;
//! machine.provide_to_pool(owner, 1_000 * ONE, None)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod liquidation;
pub mod oracle;
pub mod protocol;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::{IssuanceParams, ProtocolConfig, ProtocolParams},
        registry::{PositionRegistry, SortedVaults},
        token::{Ledger, LedgerOp, TokenLedger},
        vault::{Vault, VaultStatus},
    };
    pub use crate::error::{Error, Result};
    pub use crate::liquidation::{
        engine::LiquidationEngine,
        recovery::{SystemMode, SystemStatus},
        stability_pool::StabilityPool,
    };
    pub use crate::oracle::price_feed::{PriceData, PriceFeed, PriceSource};
    pub use crate::protocol::{
        operations::{OperationResult, ProtocolOperation},
        state_machine::ProtocolStateMachine,
    };
    pub use crate::utils::{
        constants::ONE,
        crypto::{Address, Hash, VaultId},
    };
}

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "Vaultline";
