//! Price feed implementation.
//!
//! The protocol reads one collateral/debt exchange rate per state-changing call
//! through [`PriceSource`]. [`PriceFeed`] is the in-process implementation: it
//! stores pushed prices and refuses to serve one older than its staleness window.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::constants::MAX_PRICE_STALENESS_SECS;
use crate::utils::math::format_amount;

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Oracle interface consumed by the protocol
pub trait PriceSource {
    /// Current price (18 decimals) as seen at `now`, or `StalePrice`
    fn fetch_price(&self, now: u64) -> Result<u128>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE DATA
// ═══════════════════════════════════════════════════════════════════════════════

/// A single price data point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceData {
    /// Price of one collateral unit in debt units (18 decimals)
    pub price: u128,
    /// Unix timestamp when price was recorded
    pub timestamp: u64,
}

impl PriceData {
    /// Create a new price data point
    pub fn new(price: u128, timestamp: u64) -> Self {
        Self { price, timestamp }
    }

    /// Check if price is fresh
    pub fn is_fresh(&self, current_time: u64, max_age: u64) -> bool {
        self.age(current_time) <= max_age
    }

    /// Get age of price in seconds
    pub fn age(&self, current_time: u64) -> u64 {
        current_time.saturating_sub(self.timestamp)
    }

    /// Format price for display
    pub fn format_price(&self) -> String {
        format_amount(self.price, 2)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE FEED
// ═══════════════════════════════════════════════════════════════════════════════

/// Push-based price feed with a staleness window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeed {
    /// Current price
    current: PriceData,
    /// Maximum price staleness in seconds
    max_staleness: u64,
}

impl Default for PriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceFeed {
    /// Create a new price feed
    pub fn new() -> Self {
        Self {
            current: PriceData::default(),
            max_staleness: MAX_PRICE_STALENESS_SECS,
        }
    }

    /// Create with a custom staleness window
    pub fn with_max_staleness(max_staleness: u64) -> Self {
        Self {
            max_staleness,
            ..Self::new()
        }
    }

    /// Create a feed already holding `price` at `timestamp`
    pub fn with_price(price: u128, timestamp: u64) -> Result<Self> {
        let mut feed = Self::new();
        feed.update(PriceData::new(price, timestamp))?;
        Ok(feed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PRICE UPDATES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Update price with validation
    pub fn update(&mut self, price: PriceData) -> Result<()> {
        if price.price == 0 {
            return Err(Error::InvalidParameter {
                name: "price".into(),
                reason: "price cannot be zero".into(),
            });
        }

        if self.current.timestamp > 0 && price.timestamp < self.current.timestamp {
            return Err(Error::InvalidParameter {
                name: "timestamp".into(),
                reason: "price timestamp is older than current".into(),
            });
        }

        self.current = price;

        tracing::debug!(price = %price.format_price(), timestamp = price.timestamp, "price updated");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get current price data without a staleness check
    pub fn current(&self) -> PriceData {
        self.current
    }

    /// Maximum accepted age in seconds
    pub fn max_staleness(&self) -> u64 {
        self.max_staleness
    }

    /// Get current price with staleness validation
    pub fn get_price(&self, current_time: u64) -> Result<PriceData> {
        if self.current.price == 0 {
            return Err(Error::StalePrice {
                last_update: u64::MAX,
                max_age: self.max_staleness,
            });
        }

        if !self.current.is_fresh(current_time, self.max_staleness) {
            return Err(Error::StalePrice {
                last_update: self.current.age(current_time),
                max_age: self.max_staleness,
            });
        }

        Ok(self.current)
    }
}

impl PriceSource for PriceFeed {
    fn fetch_price(&self, now: u64) -> Result<u128> {
        self.get_price(now).map(|data| data.price)
    }
}
