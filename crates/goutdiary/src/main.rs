use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;

use goutdiary::config::{Config, PostgresConfig};
use goutdiary::storage::{bootstrap, count_rows, initialize, Backend, MigrationOutcome};
use goutdiary_core::sql::schema;

/// Gout diary storage - pick a backend, evolve its schema, migrate old data
#[derive(Parser, Debug)]
#[command(name = "goutdiary")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Embedded database file, used when PostgreSQL is unavailable
    #[arg(long, env = "DB_PATH")]
    db_path: Option<PathBuf>,

    /// PostgreSQL host; overrides DB_HOST
    #[arg(long)]
    db_host: Option<String>,

    /// PostgreSQL port; overrides DB_PORT
    #[arg(long)]
    db_port: Option<u16>,

    /// PostgreSQL database name; overrides DB_NAME
    #[arg(long)]
    db_name: Option<String>,

    /// PostgreSQL user; overrides DB_USER
    #[arg(long)]
    db_user: Option<String>,

    /// Never try PostgreSQL, even when a host is configured
    #[arg(long)]
    sqlite_only: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    /// Environment configuration with the flags applied on top.
    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(path) = &self.db_path {
            config.sqlite_path = path.clone();
        }
        if let Some(host) = &self.db_host {
            config.postgres = Some(match config.postgres.take() {
                Some(postgres) => PostgresConfig {
                    host: host.clone(),
                    ..postgres
                },
                None => PostgresConfig::new(host.clone()),
            });
        }
        if let Some(postgres) = config.postgres.as_mut() {
            if let Some(port) = self.db_port {
                postgres.port = port;
            }
            if let Some(name) = &self.db_name {
                postgres.database = name.clone();
            }
            if let Some(user) = &self.db_user {
                postgres.user = user.clone();
            }
        }
        if self.sqlite_only {
            config.postgres = None;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the backend, bring its schema up to date and migrate, then exit
    Init,
    /// Print the active backend and the row count of every table
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct Status {
    backend: String,
    tables: Vec<TableCount>,
}

#[derive(Debug, Serialize)]
struct TableCount {
    table: &'static str,
    rows: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    goutdiary::init_tracing();

    let config = cli.config();

    match cli.command.unwrap_or(Command::Init) {
        Command::Init => init(&config).await,
        Command::Status { json } => status(&config, json).await,
    }
}

async fn init(config: &Config) -> Result<()> {
    let database = bootstrap(config).await?;

    let report = database.schema_report();
    if !report.is_unchanged() {
        tracing::info!(
            created = report.created_tables.len(),
            added_columns = report.added_columns.len(),
            skipped = report.skipped.len(),
            "Schema updated"
        );
    }
    if let Some(MigrationOutcome::Completed(migration)) = database.migration() {
        tracing::info!(
            users = migration.copied(schema::USERS),
            readings = migration.copied(schema::READINGS),
            meals = migration.copied(schema::MEALS),
            orphaned_components = migration.orphaned_components(),
            "Migration completed"
        );
    }

    database.close().await;
    Ok(())
}

async fn status(config: &Config, json: bool) -> Result<()> {
    let (backend, _) = initialize(config).await?;

    let mut tables = Vec::new();
    for table in schema::tables() {
        tables.push(TableCount {
            table: table.name,
            rows: count_rows(backend.as_ref(), table.name).await?,
        });
    }
    let status = Status {
        backend: backend.describe(),
        tables,
    };
    backend.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("backend: {}", status.backend);
        for entry in &status.tables {
            println!("{:<20} {}", entry.table, entry.rows);
        }
    }
    Ok(())
}
