//! db-sheets - resolve declarative query definitions into tabular result sets
//! across SQL backends.
//!
//! This library exposes the core modules for use by the `sqlsheet` binary and
//! integration tests.

pub mod config;
pub mod connection;
pub mod db;
pub mod definition;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod vars;
