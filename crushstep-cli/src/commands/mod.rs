//! CLI Commands

pub mod rebalance;

pub use rebalance::run as rebalance;
