//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the engine's core workflow.
//!
//! Use cases:
//! - `FeedCoordinator`: routes config to feeds, normalizes updates,
//!   writes the cache and triggers alert evaluation

pub mod coordinator;

pub use coordinator::FeedCoordinator;
