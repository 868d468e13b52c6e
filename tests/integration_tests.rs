//! Integration tests for db-sheets.
//!
//! Mock-backed and SQLite tests always run. Tests against a live server need
//! the DATABASE_URL environment variable and skip when it is not set.
//!
//! Run with: `cargo test --test integration_tests`

mod integration;
