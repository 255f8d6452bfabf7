//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`coordinator::FetchCoordinator`]: per-symbol request coalescing
//! - [`batch::BatchPlanner`]: batch partitioning and per-symbol isolation

/// Per-symbol fetch coalescing and cache commits.
pub mod coordinator;

/// Batch request planning.
pub mod batch;
