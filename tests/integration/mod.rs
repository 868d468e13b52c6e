//! Integration tests for db-sheets.

pub mod connection_test;
pub mod definition_test;
pub mod pipeline_test;
pub mod sqlite_test;
