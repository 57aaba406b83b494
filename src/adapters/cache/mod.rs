//! Cache Adapters - Storage Behind the Stats Cache
//!
//! Provides the in-process `CacheBackend` used by default. A shared
//! network cache would live here as a sibling backend.

pub mod memory;

pub use memory::MemoryCacheBackend;
