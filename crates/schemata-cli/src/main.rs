use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use schemata::{
    Database, FailurePolicy, MigrateConfig, MigrationPlan, MigrationReport, Migrator, Outcome,
    TransactionOutcome, introspect,
};
use tracing_subscriber::EnvFilter;

mod config;
mod schema_file;

use schema_file::{SchemaFile, SchemaFileError};

/// Declarative schema migrations for MySQL, PostgreSQL, SQLite and SQL Server.
#[derive(Parser, Debug)]
#[command(name = "schemata", version)]
struct Cli {
    /// Backend kind (mysql, mariadb, postgres, sqlite, sqlserver)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Database URL, or a file path for SQLite
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Prefix of every managed table
    #[arg(long, global = true)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the DDL that would bring the database in line with a schema file
    Plan {
        /// Schema file (TOML)
        #[arg(long)]
        schema: PathBuf,
    },
    /// Apply a schema file
    Migrate {
        /// Schema file (TOML)
        #[arg(long)]
        schema: PathBuf,

        /// Keep going after a failed statement (MySQL family only)
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Dump the managed part of the live schema
    Inspect,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    SchemaFile(#[from] SchemaFileError),

    #[error(transparent)]
    Schemata(#[from] schemata::Error),
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every statement succeeded.
fn run(cli: Cli) -> Result<bool, CliError> {
    let (config, path) = config::load(config::Overrides {
        backend: cli.backend,
        url: cli.database_url,
        prefix: cli.prefix,
    })?;
    if let Some(path) = &path {
        tracing::debug!(path = %path.display(), "loaded configuration");
    }
    print_target(&config);
    let mut db = config.connect()?;

    match cli.command {
        Commands::Plan { schema } => {
            let plan = plan(&mut db, &schema)?;
            print_plan(&plan);
            Ok(true)
        }
        Commands::Migrate {
            schema,
            continue_on_error,
        } => {
            let plan = plan(&mut db, &schema)?;
            if plan.is_empty() {
                println!("{}", "Schema is up to date.".green());
                return Ok(true);
            }
            let policy = if continue_on_error {
                FailurePolicy::Continue
            } else {
                config.on_error
            };
            let report = Migrator::new(&mut db).with_policy(policy).run(&plan);
            print_report(&report);
            Ok(report.is_success())
        }
        Commands::Inspect => {
            let live = introspect(&mut db)?;
            if live.is_empty() {
                println!("No tables with prefix {:?}.", db.prefix());
            }
            for table in live.iter_tables() {
                println!("{}", table.name.bold());
                for column in &table.columns {
                    println!("    {}: {}", column.name, column);
                }
                if let Some(pk) = &table.primary_key {
                    println!("    PRIMARY KEY ({})", pk.columns.join(", "));
                }
                for index in &table.indexes {
                    let kind = if index.unique { "UNIQUE INDEX" } else { "INDEX" };
                    println!("    {kind} {} ({})", index.name, index.columns.join(", "));
                }
                for fk in &table.foreign_keys {
                    println!(
                        "    {} ({}) -> {} ({})",
                        fk.name().cyan(),
                        fk.columns().join(", "),
                        fk.foreign_table(),
                        fk.foreign_columns().join(", ")
                    );
                }
                println!();
            }
            Ok(true)
        }
    }
}

fn plan(db: &mut Database, path: &std::path::Path) -> Result<MigrationPlan, CliError> {
    let target = SchemaFile::load(path)?.build(db.driver(), db.prefix())?;
    let live = introspect(db)?;
    Ok(MigrationPlan::new(db.driver(), &target, &live)?)
}

fn print_target(config: &MigrateConfig) {
    println!(
        "{} {} ({}, prefix {:?})",
        "database:".dimmed(),
        config.redacted_url(),
        config.backend,
        config.prefix
    );
}

fn print_plan(plan: &MigrationPlan) {
    if plan.is_empty() {
        println!("{}", "No changes detected.".green());
        return;
    }
    for op in plan.operations() {
        println!("{}", op.to_string().yellow());
    }
    println!();
    print!("{plan}");
}

fn print_report(report: &MigrationReport) {
    for statement in &report.outcomes {
        let first_line = statement.sql.lines().next().unwrap_or_default();
        match &statement.outcome {
            Outcome::Applied => println!(
                "{} {first_line} {}",
                "✓".green(),
                format!("({:.1?})", statement.elapsed).dimmed()
            ),
            Outcome::Failed { message } => {
                println!("{} {first_line}", "✗".red());
                println!("    {}", message.red());
            }
            Outcome::Skipped => println!("{} {}", "-".dimmed(), first_line.dimmed()),
        }
    }

    let summary = format!(
        "{} applied, {} failed, {} skipped",
        report.applied(),
        report.failures().count(),
        report.skipped()
    );
    match &report.transaction {
        TransactionOutcome::Committed => println!("{summary}; committed"),
        TransactionOutcome::RolledBack => println!("{summary}; {}", "rolled back".red()),
        TransactionOutcome::NotTransactional => println!("{summary}"),
        TransactionOutcome::ControlFailed { sql, message } => {
            println!("{summary}");
            println!("{} {sql}: {message}", "control statement failed:".red());
        }
    }
    for failure in &report.cleanup {
        println!(
            "{} {}: {}",
            "cleanup failed:".red(),
            failure.sql,
            failure.message
        );
    }
}
