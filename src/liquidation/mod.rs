//! Liquidation module for the Vaultline protocol.
//!
//! This module handles liquidations and the stability pool:
//! - Liquidation engine for undercollateralized vaults
//! - Product/sum accumulator behind stability pool deposits
//! - Deposit and front-end records of the stability pool
//! - Community issuance of the reward token
//! - Redistribution mechanism for debt the pool cannot absorb
//! - Recovery mode rules for system-wide crisis

pub mod accumulator;
pub mod engine;
pub mod issuance;
pub mod recovery;
pub mod redistribution;
pub mod stability_pool;

pub use accumulator::*;
pub use engine::*;
pub use issuance::*;
pub use recovery::*;
pub use redistribution::*;
pub use stability_pool::*;
