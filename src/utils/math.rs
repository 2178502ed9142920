//! Fixed-point arithmetic and mathematical utilities.
//!
//! All amounts are raw `u128` values with 18 decimals. Products of two such
//! values routinely exceed 128 bits, so every multiply-then-divide goes through
//! a 256-bit intermediate and is checked on the way back down.

use primitive_types::U256;
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::utils::constants::{DECIMAL_PRECISION, MAX_DEC_POW_MINUTES, NICR_PRECISION};

// ═══════════════════════════════════════════════════════════════════════════════
// 256-BIT HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Narrow a 256-bit value back to `u128`
pub fn to_u128(value: U256, operation: &str) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        return Err(Error::Overflow {
            operation: operation.to_string(),
        });
    }
    Ok(value.low_u128())
}

fn division_by_zero() -> Error {
    Error::InvalidParameter {
        name: "divisor".into(),
        reason: "division by zero".into(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Computes `(a * b) / c`, rounding down
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(division_by_zero());
    }
    let result = U256::from(a) * U256::from(b) / U256::from(c);
    to_u128(result, "mul_div")
}

/// Computes `(a * b) / c`, rounding up
pub fn mul_div_ceil(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(division_by_zero());
    }
    let numerator = U256::from(a) * U256::from(b);
    let divisor = U256::from(c);
    let (quotient, remainder) = numerator.div_mod(divisor);
    let result = if remainder.is_zero() {
        quotient
    } else {
        quotient + U256::one()
    };
    to_u128(result, "mul_div_ceil")
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECIMAL EXPONENTIATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Multiply two 18-decimal values, rounding half up
pub fn dec_mul(x: u128, y: u128) -> Result<u128> {
    let product = U256::from(x) * U256::from(y);
    let rounded = (product + U256::from(DECIMAL_PRECISION / 2)) / U256::from(DECIMAL_PRECISION);
    to_u128(rounded, "dec_mul")
}

/// Raise an 18-decimal `base` to an integer power by repeated squaring.
///
/// The exponent is capped at [`MAX_DEC_POW_MINUTES`]; `base` is expected to be
/// at most `ONE`, which keeps every intermediate within range.
pub fn dec_pow(base: u128, minutes: u64) -> Result<u128> {
    let mut n = minutes.min(MAX_DEC_POW_MINUTES);
    if n == 0 {
        return Ok(DECIMAL_PRECISION);
    }

    let mut y = DECIMAL_PRECISION;
    let mut x = base;
    while n > 1 {
        if n % 2 == 0 {
            x = dec_mul(x, x)?;
            n /= 2;
        } else {
            y = dec_mul(x, y)?;
            x = dec_mul(x, x)?;
            n = (n - 1) / 2;
        }
    }
    dec_mul(x, y)
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CALCULATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral ratio `coll * price / debt` (18 decimals).
///
/// A debt-free position has an infinite ratio, reported as `u128::MAX`.
pub fn compute_cr(coll: u128, debt: u128, price: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    let ratio = U256::from(coll) * U256::from(price) / U256::from(debt);
    if ratio > U256::from(u128::MAX) {
        u128::MAX
    } else {
        ratio.low_u128()
    }
}

/// Price-independent collateral ratio used to order vaults
pub fn compute_nominal_cr(coll: u128, debt: u128) -> u128 {
    if debt == 0 {
        return u128::MAX;
    }
    let ratio = U256::from(coll) * U256::from(NICR_PRECISION) / U256::from(debt);
    if ratio > U256::from(u128::MAX) {
        u128::MAX
    } else {
        ratio.low_u128()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPLAY
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert a raw 18-decimal amount into a [`Decimal`] for display.
///
/// Values too large for the 96-bit mantissa lose their lowest digits.
pub fn to_decimal(raw: u128) -> Decimal {
    let mut value = raw;
    let mut scale = 18u32;
    loop {
        if let Ok(mantissa) = i128::try_from(value) {
            if let Ok(decimal) = Decimal::try_from_i128_with_scale(mantissa, scale) {
                return decimal.normalize();
            }
        }
        if scale == 0 {
            return Decimal::MAX;
        }
        value /= 10;
        scale -= 1;
    }
}

/// Render a raw amount with at most `dp` decimal places
pub fn format_amount(raw: u128, dp: u32) -> String {
    to_decimal(raw).round_dp(dp).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::{ISSUANCE_FACTOR, ONE};

    #[test]
    fn test_safe_arithmetic() {
        assert_eq!(safe_add(1, 2).unwrap(), 3);
        assert!(safe_add(u128::MAX, 1).is_err());

        assert_eq!(safe_sub(5, 3).unwrap(), 2);
        assert!(matches!(safe_sub(3, 5), Err(Error::Underflow { .. })));
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // 1e27 * 1e21 overflows u128 but the quotient does not
        let a = 1_000_000_000 * ONE;
        let b = 1_000 * ONE;
        assert_eq!(mul_div(a, b, ONE).unwrap(), 1_000_000_000_000 * ONE);
        assert!(mul_div(1, 1, 0).is_err());
        assert!(mul_div(u128::MAX, 2, 1).is_err());
    }

    #[test]
    fn test_mul_div_ceil() {
        assert_eq!(mul_div_ceil(10, 1, 3).unwrap(), 4);
        assert_eq!(mul_div_ceil(9, 1, 3).unwrap(), 3);
        assert_eq!(mul_div(10, 1, 3).unwrap(), 3);
    }

    #[test]
    fn test_dec_mul_rounds_half_up() {
        assert_eq!(dec_mul(ONE, ONE).unwrap(), ONE);
        assert_eq!(dec_mul(ONE / 2, ONE / 2).unwrap(), ONE / 4);
        // 1.5e-18 rounds to 2e-18
        assert_eq!(dec_mul(3, ONE / 2).unwrap(), 2);
    }

    #[test]
    fn test_dec_pow() {
        assert_eq!(dec_pow(ONE / 2, 0).unwrap(), ONE);
        assert_eq!(dec_pow(ONE / 2, 1).unwrap(), ONE / 2);
        assert_eq!(dec_pow(ONE / 2, 3).unwrap(), ONE / 8);

        // One year of minutes halves the issuance factor
        let year = dec_pow(ISSUANCE_FACTOR, 525_600).unwrap();
        let diff = if year > ONE / 2 { year - ONE / 2 } else { ONE / 2 - year };
        assert!(diff < ONE / 1_000_000, "got {}", year);
    }

    #[test]
    fn test_dec_pow_exponent_capped() {
        let capped = dec_pow(ISSUANCE_FACTOR, MAX_DEC_POW_MINUTES).unwrap();
        let beyond = dec_pow(ISSUANCE_FACTOR, MAX_DEC_POW_MINUTES * 2).unwrap();
        assert_eq!(capped, beyond);
    }

    #[test]
    fn test_collateral_ratio() {
        // 1 unit at price 200 against 100 debt = 200%
        assert_eq!(compute_cr(ONE, 100 * ONE, 200 * ONE), 2 * ONE);
        assert_eq!(compute_cr(ONE, 0, 200 * ONE), u128::MAX);
    }

    #[test]
    fn test_nominal_ratio() {
        assert_eq!(compute_nominal_cr(ONE, 100 * ONE), NICR_PRECISION / 100);
        assert!(compute_nominal_cr(2 * ONE, 100 * ONE) > compute_nominal_cr(ONE, 100 * ONE));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1_500_000_000_000_000_000, 4), "1.5");
        assert_eq!(format_amount(6_666_666_666_666_666_666_666, 2), "6666.67");
        assert_eq!(format_amount(0, 2), "0");
        // does not panic at the top of the range
        let _ = format_amount(u128::MAX, 2);
    }
}
