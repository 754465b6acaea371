//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, WebSockets, file I/O). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `feeds`: Market data ingestion (Coinbase WebSocket, REST pollers)
//! - `metrics`: Prometheus metrics export and health checks
//! - `notify`: Alert sink implementations

pub mod feeds;
pub mod metrics;
pub mod notify;
