//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Command handlers write through the per-user unit of work; query handlers
//! read committed state.

pub mod handlers;

pub use handlers::billing::*;
