//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and modification.
//! Amounts and ratios are raw 18-decimal fixed-point values unless noted otherwise.

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// 18-decimal fixed-point precision (1.0 = 10^18)
pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Fixed-point one
pub const ONE: u128 = DECIMAL_PRECISION;

/// Precision used for nominal collateral ratios (collateral / debt, price-free)
pub const NICR_PRECISION: u128 = 100_000_000_000_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum Collateral Ratio (MCR) - 110%
/// Below this ratio, a vault can be liquidated in Normal Mode
pub const MCR: u128 = 1_100_000_000_000_000_000;

/// Critical Collateral Ratio (CCR) - 150%
/// When system TCR falls below this, Recovery Mode activates
pub const CCR: u128 = 1_500_000_000_000_000_000;

/// Collateral cap for the 100% <= ICR < MCR band in Recovery Mode - 100%
pub const RECOVERY_CAP_RATIO: u128 = ONE;

// ═══════════════════════════════════════════════════════════════════════════════
// GAS COMPENSATION & DEBT LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Stablecoin reserve minted to the gas pool for every vault, paid to the liquidator
pub const GAS_COMPENSATION: u128 = 200 * ONE;

/// Minimum net debt (debt excluding the gas reserve) of a vault
pub const MIN_NET_DEBT: u128 = 1_800 * ONE;

/// Divisor for the collateral gas compensation (1/200 = 0.5%)
pub const PERCENT_DIVISOR: u128 = 200;

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Factor applied to P when it falls below the precision floor
pub const SCALE_FACTOR: u128 = 1_000_000_000;

/// Floor under which P gets rescaled
pub const P_PRECISION_FLOOR: u128 = SCALE_FACTOR;

// ═══════════════════════════════════════════════════════════════════════════════
// COMMUNITY ISSUANCE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-minute decay of the remaining issuance (halves the issuance every year)
pub const ISSUANCE_FACTOR: u128 = 999_998_681_227_695_000;

/// Maximum reward-token supply emitted to the stability pool
pub const ISSUANCE_SUPPLY_CAP: u128 = 167_705_382 * ONE;

/// Seconds per minute
pub const SECONDS_IN_ONE_MINUTE: u64 = 60;

/// Upper bound on the exponent accepted by `dec_pow` (1000 years of minutes)
pub const MAX_DEC_POW_MINUTES: u64 = 525_600_000;

// ═══════════════════════════════════════════════════════════════════════════════
// ORACLE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum price staleness in seconds (4 hours)
pub const MAX_PRICE_STALENESS_SECS: u64 = 14_400;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIER CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Length of an account address in bytes
pub const ADDRESS_LENGTH: usize = 20;

/// Length of a hash in bytes (SHA256)
pub const HASH_LENGTH: usize = 32;

/// Length of a vault ID in bytes
pub const VAULT_ID_LENGTH: usize = 32;
