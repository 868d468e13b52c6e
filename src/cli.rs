//! Command-line argument parsing for sqlsheet.

use clap::{Args, Parser, Subcommand};
use db_sheets::db::Language;
use db_sheets::definition::coerce::coerce;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Resolve query definitions into sheets of query results.
#[derive(Parser, Debug)]
#[command(name = "sqlsheet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Connection config file path
    #[arg(long, global = true, value_name = "PATH", env = "SQLSHEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Message language for database errors (en, kr)
    #[arg(long, global = true, value_name = "LANG", default_value = "en")]
    pub lang: String,

    /// Write logs to a file instead of stderr (default location if PATH is omitted)
    #[arg(long, global = true, value_name = "PATH", num_args = 0..=1)]
    pub log_file: Option<Option<PathBuf>>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every enabled sheet and report the results
    Export(ExportArgs),

    /// Parse and validate a query definition without touching a database
    Validate(DefinitionArgs),

    /// Test every configured connection
    ListDbs,
}

/// Where the query definition comes from.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct DefinitionArgs {
    /// XML query definition
    #[arg(long, value_name = "PATH")]
    pub xml: Option<PathBuf>,

    /// JSON query definition
    #[arg(long, value_name = "PATH")]
    pub query: Option<PathBuf>,
}

impl DefinitionArgs {
    pub fn path(&self) -> Option<&PathBuf> {
        self.xml.as_ref().or(self.query.as_ref())
    }
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub definition: DefinitionArgs,

    /// Default connection key
    #[arg(long, value_name = "KEY")]
    pub db: Option<String>,

    /// Variable override, repeatable (KEY=VALUE)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Output path (overrides the document's output)
    #[arg(long, value_name = "PATH")]
    pub out: Option<String>,

    /// Print the resolved sheets as JSON
    #[arg(long)]
    pub json: bool,
}

impl ExportArgs {
    /// Command-line variables, coerced like document variables.
    pub fn variables(&self) -> Map<String, Value> {
        self.vars
            .iter()
            .map(|(key, value)| (key.clone(), coerce(value)))
            .collect()
    }
}

/// Splits `KEY=VALUE` at the first `=`.
fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid variable '{s}'. Expected KEY=VALUE")),
    }
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the connection config path to use.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(db_sheets::config::ConnectionStore::default_path)
    }

    /// Returns the log file to write to, if file logging was requested.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .map(|path| path.clone().unwrap_or_else(db_sheets::logging::default_log_path))
    }

    pub fn language(&self) -> Language {
        Language::parse(&self.lang)
    }
}
