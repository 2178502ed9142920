//! Oracle module for price feeds.
//!
//! The protocol consumes prices through the [`PriceSource`] trait; a failed
//! read aborts the calling operation before any state is touched.

pub mod price_feed;

pub use price_feed::*;
