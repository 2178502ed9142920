//! Utility modules for the Vaultline protocol.
//!
//! This module contains shared utilities used across the protocol:
//! - Identifiers and hashing
//! - Fixed-point arithmetic
//! - Constants

pub mod constants;
pub mod crypto;
pub mod math;

pub use constants::*;
pub use crypto::*;
pub use math::*;
