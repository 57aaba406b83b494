//! Live Price Curve - Library Root
//!
//! Keeps a product's order count live (cache, ground-truth fetch,
//! change-feed push, polling fallback) and reprices it on a bonding
//! curve. Re-exports all modules for integration tests and benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
