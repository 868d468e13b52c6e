//! Error types for db-sheets.
//!
//! Defines the main error enum used throughout the pipeline. Configuration and
//! parse failures abort a run; execution failures are reported per sheet.

use std::fmt;
use thiserror::Error;

/// Main error type for db-sheets operations.
#[derive(Error, Debug)]
pub enum SheetError {
    /// Connection configuration errors (missing keys, unsupported vendor, bad port).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Query definition errors (malformed document, whitelist violation, bad reference).
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Vendor-classified execution failures. Always carries the SQL that failed.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration failures. Fatal to the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("DB connection ID not found: {key}")]
    ConfigMissing { key: String },

    #[error("Unsupported database type: {vendor}")]
    UnsupportedVendor { vendor: String },

    #[error("Required configuration is missing: {}", fields.join(", "))]
    RequiredFieldsMissing { fields: Vec<String> },

    #[error("Port number must be between 1-65535 (got {port})")]
    PortOutOfRange { port: i64 },

    #[error("Invalid connection store: {0}")]
    InvalidStore(String),

    #[error("{0}")]
    Io(String),
}

/// Query definition failures. Fatal to the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed query definition: {0}")]
    Malformed(String),

    #[error("Query definition failed validation ({} violation(s))", violations.len())]
    Validation { violations: Vec<String> },

    #[error("Query definition not found: {reference} (sheet: {sheet})")]
    QueryDefNotFound { sheet: String, reference: String },

    #[error("Query definition declares no sheets")]
    MissingSheets,
}

/// Fixed taxonomy vendor errors are mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Auth,
    Connection,
    UnknownSchema,
    Timeout,
    Generic,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Connection => write!(f, "connection"),
            Self::UnknownSchema => write!(f, "unknown-schema"),
            Self::Timeout => write!(f, "timeout"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// A failure reported by a vendor driver.
///
/// `code` holds the native error code (SQLSTATE, ORA-nnnnn, driver code) when the
/// driver exposes one. `class` starts as [`ErrorClass::Generic`] and is refined by
/// the owning dialect's classifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionError {
    pub class: ErrorClass,
    pub code: Option<String>,
    pub message: String,
    pub sql: String,
}

impl ExecutionError {
    /// Creates an unclassified execution error.
    pub fn new(code: Option<String>, message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Generic,
            code,
            message: message.into(),
            sql: sql.into(),
        }
    }

    /// Returns a copy tagged with the given class.
    pub fn with_class(mut self, class: ErrorClass) -> Self {
        self.class = class;
        self
    }
}

impl SheetError {
    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a malformed-document parse error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Parse(ParseError::Malformed(msg.into()))
    }

    /// Creates an I/O flavoured configuration error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Io(msg.into()))
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::Parse(_) => "Parse Error",
            Self::Execution(_) => "Execution Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// True when the error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Execution(_))
    }
}

/// Result type alias using SheetError.
pub type Result<T> = std::result::Result<T, SheetError>;
