//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, WebSockets, in-process storage).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `api`: Aggregate view client (ground-truth order counts)
//! - `cache`: Storage behind the stats cache
//! - `feeds`: Realtime change feed over WebSocket
//! - `metrics`: Prometheus metrics export and health checks

pub mod api;
pub mod cache;
pub mod feeds;
pub mod metrics;
