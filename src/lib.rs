//! Trellis
//!
//! Trellis finds the best combination of discount offers for a single purchase, prices it
//! deterministically and turns it into an ordered plan a shopper can follow.

pub mod cache;
pub mod compatibility;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod fixtures;
pub mod money;
pub mod observability;
pub mod offers;
pub mod personalization;
pub mod prelude;
pub mod products;
pub mod ranking;
pub mod receipt;
pub mod savings;
pub mod sequence;
pub mod tags;
pub mod warnings;
