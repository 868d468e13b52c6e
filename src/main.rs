//! sqlsheet - resolve query definitions into sheets of query results.

mod cli;

use cli::{Cli, Command, DefinitionArgs, ExportArgs};
use db_sheets::config::ConnectionStore;
use db_sheets::connection::ConnectionManager;
use db_sheets::definition::QueryDefinition;
use db_sheets::error::{ConfigError, ParseError, Result, SheetError};
use db_sheets::logging;
use db_sheets::pipeline::{Pipeline, PipelineOptions, SheetStatus};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    match cli.log_path() {
        Some(path) => logging::init_file_logging(&path),
        None => logging::init_stderr_logging(),
    }

    match run(&cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            eprintln!("{}: {}", e.category(), e);
            std::process::exit(1);
        }
    }
}

/// Runs the selected command. `Ok(false)` means the command ran but reported
/// failures.
async fn run(cli: &Cli) -> Result<bool> {
    match &cli.command {
        Command::Export(args) => export(cli, args).await,
        Command::Validate(args) => validate(args),
        Command::ListDbs => list_dbs(cli).await,
    }
}

fn load_definition(args: &DefinitionArgs) -> Result<QueryDefinition> {
    let path = args
        .path()
        .ok_or_else(|| SheetError::Config(ConfigError::ConfigMissing {
            key: "--xml or --query".to_string(),
        }))?;
    QueryDefinition::load_from_file(path)
}

fn load_store(cli: &Cli) -> Result<ConnectionStore> {
    let config_path = cli.config_path();
    info!("Loading connections from: {}", config_path.display());
    ConnectionStore::load_from_file(&config_path)
}

async fn export(cli: &Cli, args: &ExportArgs) -> Result<bool> {
    let definition = load_definition(&args.definition)?;
    let store = load_store(cli)?;
    let mut manager = ConnectionManager::new(store, cli.language());

    let options = PipelineOptions {
        variables: args.variables(),
        db: args.db.clone(),
        output: args.out.clone(),
    };
    let output = Pipeline::new(definition, options).run(&mut manager).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&output)
            .map_err(|e| SheetError::internal(format!("Failed to serialize output: {e}")))?;
        println!("{json}");
    } else {
        if let Some(path) = &output.output_path {
            println!("Output: {path}");
        }
        for sheet in &output.sheets {
            match &sheet.status {
                SheetStatus::Exported => println!(
                    "  {} [{}]: {} row(s)",
                    sheet.display_name, sheet.connection_key, sheet.record_count
                ),
                SheetStatus::Failed { message } => println!(
                    "  {} [{}]: FAILED - {}",
                    sheet.display_name, sheet.connection_key, message
                ),
            }
        }
    }

    let failed = output.failed().count();
    if failed > 0 {
        warn!("{} sheet(s) failed", failed);
    }
    Ok(output.is_complete())
}

fn validate(args: &DefinitionArgs) -> Result<bool> {
    let definition = load_definition(args)?;

    let issues = definition.sheet_name_issues();
    if !issues.is_empty() {
        let violations = issues
            .into_iter()
            .flat_map(|(name, problems)| {
                problems
                    .into_iter()
                    .map(move |p| format!("sheet name \"{name}\": {p}"))
            })
            .collect();
        return Err(ParseError::Validation { violations }.into());
    }

    println!(
        "Query definition is valid: {} sheet(s) ({} enabled), {} variable(s), {} fragment(s), {} dynamic variable(s)",
        definition.sheets.len(),
        definition.enabled_sheets().count(),
        definition.variables.len(),
        definition.query_defs.len(),
        definition.dynamic_vars.len()
    );
    for sheet in &definition.sheets {
        match &sheet.query_ref {
            Some(reference) => println!("  {} -> {}", sheet.name, reference),
            None => println!("  {}", sheet.name),
        }
    }
    Ok(true)
}

async fn list_dbs(cli: &Cli) -> Result<bool> {
    let store = load_store(cli)?;
    if store.is_empty() {
        println!("No connections configured.");
        return Ok(true);
    }

    println!("Testing {} connection(s):", store.len());
    let mut manager = ConnectionManager::new(store, cli.language());
    let checks = manager.check_all().await;

    for check in &checks {
        match &check.outcome {
            Ok(()) => println!("  {}: OK ({})", check.key, check.target),
            Err(message) => println!("  {}: FAILED - {}", check.key, message),
        }
    }

    let failed = checks.iter().filter(|c| !c.is_ok()).count();
    println!(
        "{} succeeded, {} failed",
        checks.len() - failed,
        failed
    );
    Ok(failed == 0)
}
