//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (upstream quote provider).
pub mod ports;

/// Application services for fetch coordination and batch planning.
pub mod services;
