//! Core modules for the Vaultline protocol.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and protocol parameters
//! - Vaults and their ordered registry
//! - Token ledgers
//! - System pool accounting

pub mod config;
pub mod pools;
pub mod registry;
pub mod token;
pub mod vault;

pub use config::*;
pub use pools::*;
pub use registry::*;
pub use token::*;
pub use vault::*;
