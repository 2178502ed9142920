//! Community issuance of the reward token.
//!
//! Total issuance follows `supplyCap * (1 - F^minutes)` where `F` is the
//! per-minute [`ISSUANCE_FACTOR`](crate::utils::constants::ISSUANCE_FACTOR),
//! so half of the remaining supply is emitted every year. Each trigger returns
//! the amount emitted since the previous one, which the stability pool folds
//! into its reward sum `G`.

use serde::{Deserialize, Serialize};

use crate::core::config::IssuanceParams;
use crate::error::Result;
use crate::utils::constants::{DECIMAL_PRECISION, SECONDS_IN_ONE_MINUTE};
use crate::utils::math::{dec_pow, mul_div};

/// Time-decaying reward emission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityIssuance {
    params: IssuanceParams,
    total_issued: u128,
}

impl CommunityIssuance {
    /// Create an issuance schedule
    pub fn new(params: IssuanceParams) -> Self {
        Self {
            params,
            total_issued: 0,
        }
    }

    /// Amount issued so far
    pub fn total_issued(&self) -> u128 {
        self.total_issued
    }

    /// Supply cap of the schedule
    pub fn supply_cap(&self) -> u128 {
        self.params.supply_cap
    }

    /// Fraction of the supply cap issued by `now` (18 decimals)
    pub fn cumulative_issuance_fraction(&self, now: u64) -> Result<u128> {
        let minutes = now.saturating_sub(self.params.deployment_time) / SECONDS_IN_ONE_MINUTE;
        let remaining = dec_pow(self.params.issuance_factor, minutes)?;
        Ok(DECIMAL_PRECISION.saturating_sub(remaining))
    }

    /// Total that should have been issued by `now`
    pub fn total_issuance_at(&self, now: u64) -> Result<u128> {
        let fraction = self.cumulative_issuance_fraction(now)?;
        mul_div(self.params.supply_cap, fraction, DECIMAL_PRECISION)
    }

    /// Advance the schedule to `now` and return the newly issued amount
    pub fn issue(&mut self, now: u64) -> Result<u128> {
        let latest = self.total_issuance_at(now)?;
        let issuance = latest.saturating_sub(self.total_issued);
        self.total_issued = self.total_issued.max(latest);
        if issuance > 0 {
            tracing::trace!(issuance, total = self.total_issued, "reward tokens issued");
        }
        Ok(issuance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::ONE;

    const HOUR: u64 = 3_600;
    const YEAR: u64 = 31_536_000;

    fn assert_close(actual: u128, expected: u128, tolerance: u128) {
        let diff = if actual > expected { actual - expected } else { expected - actual };
        assert!(diff <= tolerance, "expected {}, got {} (diff {})", expected, actual, diff);
    }

    #[test]
    fn test_nothing_issued_at_deployment() {
        let mut issuance = CommunityIssuance::new(IssuanceParams::default());
        assert_eq!(issuance.cumulative_issuance_fraction(0).unwrap(), 0);
        assert_eq!(issuance.issue(59).unwrap(), 0);
    }

    #[test]
    fn test_fraction_after_one_minute() {
        let issuance = CommunityIssuance::new(IssuanceParams::default());
        let fraction = issuance.cumulative_issuance_fraction(60).unwrap();
        assert_close(fraction, 1_318_772_305_025, 1_000);
    }

    #[test]
    fn test_total_after_one_hour() {
        let mut issuance = CommunityIssuance::new(IssuanceParams::default());
        let issued = issuance.issue(HOUR).unwrap();
        assert_close(issued, 13_269_396_554_220_261_614_874, 1_000_000_000_000_000);
    }

    #[test]
    fn test_total_after_ten_years() {
        let mut issuance = CommunityIssuance::new(IssuanceParams::default());
        let issued = issuance.issue(10 * YEAR).unwrap();
        assert_close(issued, 167_541_607_212_890_570_328_045_468, 1_000_000_000_000_000);
    }

    #[test]
    fn test_half_issued_after_one_year() {
        let issuance = CommunityIssuance::new(IssuanceParams::default());
        let fraction = issuance.cumulative_issuance_fraction(YEAR).unwrap();
        assert_close(fraction, ONE / 2, ONE / 1_000_000);
    }

    #[test]
    fn test_issue_returns_increments() {
        let mut issuance = CommunityIssuance::new(IssuanceParams::default());
        let first = issuance.issue(HOUR).unwrap();
        let second = issuance.issue(2 * HOUR).unwrap();
        assert!(second > 0 && second < first);
        assert_eq!(issuance.total_issued(), first + second);
        assert_eq!(issuance.issue(2 * HOUR).unwrap(), 0);
    }

    #[test]
    fn test_deployment_time_offset() {
        let params = IssuanceParams {
            deployment_time: 1_000,
            ..Default::default()
        };
        let issuance = CommunityIssuance::new(params);
        assert_eq!(issuance.cumulative_issuance_fraction(500).unwrap(), 0);
        assert_eq!(
            issuance.cumulative_issuance_fraction(1_000 + HOUR).unwrap(),
            CommunityIssuance::new(IssuanceParams::default())
                .cumulative_issuance_fraction(HOUR)
                .unwrap()
        );
    }

    #[test]
    fn test_disabled_issuance() {
        let mut issuance = CommunityIssuance::new(IssuanceParams::disabled());
        assert_eq!(issuance.issue(10 * YEAR).unwrap(), 0);
    }
}
