//! VOLWATCH: periodic price sampler with rolling stats and volatility alerts
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod clock;
pub mod config;
pub mod types;
pub mod source;
pub mod storage;
pub mod notify;
pub mod engine;
