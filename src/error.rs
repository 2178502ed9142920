//! Error types for the Vaultline protocol.
//!
//! Every rejected call surfaces one of these variants. Variants are grouped by
//! the subsystem that raises them, and [`Error::kind`] maps each one onto the
//! failure taxonomy used by callers to decide whether a retry makes sense.

use thiserror::Error;

/// Result type alias for Vaultline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; nothing was mutated and the caller may retry with corrected input
    Precondition,
    /// The call would break a protocol invariant; nothing was mutated
    InvariantGuard,
    /// An external collaborator (oracle, token ledger) failed
    Collaborator,
    /// Arithmetic or internal failure
    Internal,
}

/// Main error type for the Vaultline protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Vault Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Vault does not exist or is closed
    #[error("Vault does not exist or is not active: {0}")]
    VaultNotActive(String),

    /// Collateralization ratio below the required minimum
    #[error("Collateral ratio {current} below required {minimum}")]
    CollateralizationRatioTooLow {
        /// Current ratio (18 decimals)
        current: u128,
        /// Required ratio (18 decimals)
        minimum: u128,
    },

    /// Net debt below protocol minimum
    #[error("Net debt {amount} below minimum {minimum}")]
    DebtBelowMinimum {
        /// Requested net debt
        amount: u128,
        /// Protocol minimum
        minimum: u128,
    },

    /// Operation is blocked while the system is in Recovery Mode
    #[error("Operation not permitted in Recovery Mode")]
    RecoveryMode,

    // ═══════════════════════════════════════════════════════════════════
    // Liquidation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// None of the candidates qualified for liquidation
    #[error("No liquidatable vaults")]
    NoLiquidatableVaults,

    /// The last active vault can never be liquidated or closed
    #[error("Operation would leave the system without active vaults")]
    EmptySystem,

    /// Malformed call argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ═══════════════════════════════════════════════════════════════════
    // Stability Pool Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Depositor has no active deposit
    #[error("No active stability deposit for {0}")]
    NoDeposit(String),

    /// Account already holds a deposit
    #[error("Account {0} already has an active stability deposit")]
    DepositExists(String),

    /// Front end is already registered
    #[error("Front end {0} is already registered")]
    AlreadyRegistered(String),

    /// Front end tag does not refer to a registered front end
    #[error("Front end {0} is not registered")]
    UnregisteredFrontEnd(String),

    /// Kickback rate outside [0, 1]
    #[error("Kickback rate {0} outside [0, 1e18]")]
    InvalidRate(u128),

    /// Withdrawals are frozen while a vault sits below MCR
    #[error("Cannot withdraw while there are vaults with ICR < MCR")]
    UndercollateralizedVaultsExist,

    /// Depositor has no collateral gain to redirect
    #[error("Depositor {0} has no collateral gain")]
    NoCollateralGain(String),

    /// Owner has no collateral surplus to claim
    #[error("No collateral surplus available for {0}")]
    NoSurplus(String),

    // ═══════════════════════════════════════════════════════════════════
    // Collaborator Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Price is stale or unavailable
    #[error("Price is stale: last update {last_update}s ago, max allowed {max_age}s")]
    StalePrice {
        /// Seconds since last update
        last_update: u64,
        /// Maximum allowed age in seconds
        max_age: u64,
    },

    /// Token ledger balance insufficient
    #[error("Insufficient balance for {account}: required {required}, available {available}")]
    InsufficientBalance {
        /// Account that was debited
        account: String,
        /// Required amount
        required: u128,
        /// Available amount
        available: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Authorization / Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Caller is not allowed to act on the target
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ═══════════════════════════════════════════════════════════════════
    // Serialization / Configuration Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::VaultNotActive(_)
            | Error::CollateralizationRatioTooLow { .. }
            | Error::DebtBelowMinimum { .. }
            | Error::RecoveryMode
            | Error::NoLiquidatableVaults
            | Error::InvalidArgument(_)
            | Error::NoDeposit(_)
            | Error::DepositExists(_)
            | Error::AlreadyRegistered(_)
            | Error::UnregisteredFrontEnd(_)
            | Error::InvalidRate(_)
            | Error::NoCollateralGain(_)
            | Error::NoSurplus(_)
            | Error::Unauthorized(_)
            | Error::InvalidParameter { .. }
            | Error::ZeroAmount
            | Error::Config(_) => ErrorKind::Precondition,

            Error::EmptySystem | Error::UndercollateralizedVaultsExist => ErrorKind::InvariantGuard,

            Error::StalePrice { .. } | Error::InsufficientBalance { .. } => ErrorKind::Collaborator,

            Error::Overflow { .. }
            | Error::Underflow { .. }
            | Error::InvariantViolation(_)
            | Error::Serialization(_)
            | Error::Deserialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller can retry with corrected input
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Precondition | ErrorKind::Collaborator)
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_) | Error::Overflow { .. } | Error::Underflow { .. }
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Vault errors: 1xxx
            Error::VaultNotActive(_) => 1001,
            Error::CollateralizationRatioTooLow { .. } => 1002,
            Error::DebtBelowMinimum { .. } => 1003,
            Error::RecoveryMode => 1004,

            // Liquidation errors: 2xxx
            Error::NoLiquidatableVaults => 2001,
            Error::EmptySystem => 2002,
            Error::InvalidArgument(_) => 2003,

            // Stability pool errors: 3xxx
            Error::NoDeposit(_) => 3001,
            Error::DepositExists(_) => 3002,
            Error::AlreadyRegistered(_) => 3003,
            Error::UnregisteredFrontEnd(_) => 3004,
            Error::InvalidRate(_) => 3005,
            Error::UndercollateralizedVaultsExist => 3006,
            Error::NoCollateralGain(_) => 3007,
            Error::NoSurplus(_) => 3008,

            // Collaborator errors: 4xxx
            Error::StalePrice { .. } => 4001,
            Error::InsufficientBalance { .. } => 4002,

            // Validation errors: 5xxx
            Error::Unauthorized(_) => 5001,
            Error::InvalidParameter { .. } => 5002,
            Error::ZeroAmount => 5003,
            Error::Overflow { .. } => 5004,
            Error::Underflow { .. } => 5005,
            Error::InvariantViolation(_) => 5006,

            // Serialization and configuration errors: 7xxx
            Error::Serialization(_) => 7001,
            Error::Deserialization(_) => 7002,
            Error::Config(_) => 7003,
        }
    }
}
