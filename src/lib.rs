//! vetledger - reversible schema evolution for a veterinary clinic store
//!
//! Ordered, reversible migration steps whose reversal never silently destroys
//! the data their forward application touched, plus maintenance of the
//! denormalized visit/appointment metrics that summarize appointment history.

pub mod clinic;
pub mod config;
pub mod metrics;
pub mod migration;
pub mod storage;
pub mod utils;
