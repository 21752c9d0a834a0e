use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tablekeeper_core::{DatabaseManifest, StoreConfig};
use tablekeeper_sqlite::{
    DatabaseDefinition, DatabaseRegistry, Definition, MigrationOutcome, MigrationStatus, helper,
    migration,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Output format for reports.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tablekeeper")]
#[command(about = "Inspect, migrate, and recreate versioned SQLite databases")]
#[command(version)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the stored version and table row counts of a database file.
    Status(StatusArgs),
    /// Open a manifest's database, creating or migrating it as needed.
    Open(OpenArgs),
    /// Drop and recreate every manifest table. All rows are lost.
    Recreate(RecreateArgs),
}

#[derive(Debug, Args)]
struct StatusArgs {
    /// Database file path.
    #[arg(long)]
    db: PathBuf,
    /// Manifest whose tables to report (default: every table in the file).
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Output format.
    #[arg(long, default_value = "text")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct OpenArgs {
    /// Database manifest (YAML).
    #[arg(long)]
    manifest: PathBuf,
    /// Store configuration (YAML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for database files, overriding the configuration.
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Output format.
    #[arg(long, default_value = "text")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct RecreateArgs {
    /// Database manifest (YAML).
    #[arg(long)]
    manifest: PathBuf,
    /// Existing database file path.
    #[arg(long)]
    db: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Status(args) => run_status(args),
        Command::Open(args) => run_open(args),
        Command::Recreate(args) => run_recreate(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

fn run_status(args: StatusArgs) -> Result<(), String> {
    let tables = match &args.manifest {
        Some(path) => load_manifest(path)?.tables,
        None => Vec::new(),
    };
    let conn = open_existing(&args.db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let status = migration::status(&conn, &tables)
        .map_err(|e| format!("Failed to read status of '{}': {e}", args.db.display()))?;

    match args.format {
        CliOutputFormat::Json => print_json(&status),
        CliOutputFormat::Text => {
            print_status(&args.db, &status);
            Ok(())
        }
    }
}

fn print_status(db: &std::path::Path, status: &MigrationStatus) {
    println!("Database: {}", db.display());
    println!("  Version: {}", status.version);
    if status.tables.is_empty() {
        println!("  Tables: none");
    } else {
        println!("  Tables:");
        for table in &status.tables {
            match table.rows {
                Some(rows) => println!("    {}: {rows} rows", table.name),
                None => println!("    {}: missing", table.name),
            }
        }
    }
    if !status.undeclared.is_empty() {
        println!("  Undeclared tables: {}", status.undeclared.join(", "));
    }
}

// ---------------------------------------------------------------------------
// Open
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OpenReport {
    database: String,
    path: PathBuf,
    #[serde(flatten)]
    outcome: MigrationOutcome,
}

fn run_open(args: OpenArgs) -> Result<(), String> {
    let manifest = load_manifest(&args.manifest)?;
    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = args.dir {
        config.directory = dir;
    }
    debug!(directory = %config.directory.display(), "store configuration");

    let registry = DatabaseRegistry::new(config);
    let database = registry
        .add_database(Definition::from_manifest(&manifest))
        .map_err(|e| format!("Invalid manifest '{}': {e}", args.manifest.display()))?;
    let opened = database.open();
    let outcome = database.last_outcome();
    let path = database.path().to_path_buf();
    registry.shutdown_and_clear();

    opened.map_err(|e| format!("Failed to open database '{}': {e}", manifest.name))?;
    let outcome = outcome.ok_or_else(|| "Database opened without an outcome".to_string())?;

    match args.format {
        CliOutputFormat::Json => print_json(&OpenReport {
            database: manifest.name,
            path,
            outcome,
        }),
        CliOutputFormat::Text => {
            println!("{}", describe_outcome(&manifest.name, &outcome));
            println!("  Path: {}", path.display());
            Ok(())
        }
    }
}

fn describe_outcome(name: &str, outcome: &MigrationOutcome) -> String {
    match outcome {
        MigrationOutcome::Opened { version } => {
            format!("Opened '{name}' at version {version} (no changes)")
        }
        MigrationOutcome::Created { version } => {
            format!("Created '{name}' at version {version}")
        }
        MigrationOutcome::Migrated {
            direction,
            from,
            to,
            steps,
        } => {
            let steps: Vec<String> = steps.iter().map(u32::to_string).collect();
            let steps = if steps.is_empty() {
                "none".to_string()
            } else {
                steps.join(", ")
            };
            format!("Migrated '{name}' ({direction}) from version {from} to {to}; steps: {steps}")
        }
        MigrationOutcome::Recreated {
            direction,
            from,
            to,
            failed_version,
            error,
        } => format!(
            "Recreated '{name}' at version {to}: {direction} from {from} failed at step \
             {failed_version} ({error}); all tables are empty"
        ),
    }
}

// ---------------------------------------------------------------------------
// Recreate
// ---------------------------------------------------------------------------

fn run_recreate(args: RecreateArgs) -> Result<(), String> {
    let manifest = load_manifest(&args.manifest)?;
    let definition = Definition::from_manifest(&manifest);
    let mut conn = open_existing(&args.db, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    helper::recreate(&mut conn, &definition)
        .map_err(|e| format!("Failed to recreate '{}': {e}", args.db.display()))?;
    println!(
        "Recreated {} table(s) in '{}'",
        definition.tables().len(),
        args.db.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_manifest(path: &std::path::Path) -> Result<DatabaseManifest, String> {
    DatabaseManifest::load(path)
        .map_err(|e| format!("Failed to load manifest '{}': {e}", path.display()))
}

fn open_existing(path: &std::path::Path, flags: OpenFlags) -> Result<Connection, String> {
    if !path.exists() {
        return Err(format!("Database file '{}' does not exist", path.display()));
    }
    Connection::open_with_flags(path, flags | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .map_err(|e| format!("Failed to open database '{}': {e}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize output: {e}"))?;
    println!("{json}");
    Ok(())
}
