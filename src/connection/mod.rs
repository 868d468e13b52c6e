//! Connection management for db-sheets.
//!
//! Centralizes connection lifecycle for a pipeline run.

pub mod manager;

pub use manager::{ActiveConnection, ConnectionCheck, ConnectionManager};
