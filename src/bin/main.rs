//! Filmworks ETL CLI

use clap::{Parser, Subcommand};
use filmworks_etl::{EtlConfig, MigrationClient};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "filmworks-etl")]
#[command(author, version, about = "Migrate a movies catalog from SQLite to PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration (default)
    Run,
    /// Test connectivity
    Test,
    /// Show source vs destination row counts
    Status,
    /// Check consistency between source and destination
    Verify {
        /// Also compare timestamp-free row content, not just counts and ids
        #[arg(long)]
        full_content: bool,
    },
    /// Generate sample config
    Init {
        #[arg(short, long, default_value = "filmworks-etl.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.quiet, cli.json);

    match run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // Handle init command first - it doesn't need config
    if let Some(Commands::Init { output }) = cli.command {
        return run_init(&output);
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        None | Some(Commands::Run) => run_migration(config, cli.json, cli.quiet).await,
        Some(Commands::Test) => run_test(config, cli.json).await,
        Some(Commands::Status) => run_status(config, cli.json).await,
        Some(Commands::Verify { full_content }) => {
            run_verify(config, full_content, cli.json).await
        }
        Some(Commands::Init { .. }) => unreachable!(), // Handled above
    }
}

fn load_config(path: Option<&str>) -> Result<EtlConfig, Box<dyn std::error::Error>> {
    if let Some(p) = path {
        info!("Loading config from: {}", p);
        return Ok(EtlConfig::from_file(p)?);
    }

    for default in &["filmworks-etl.toml", ".filmworks-etl.toml"] {
        if std::path::Path::new(default).exists() {
            info!("Loading config from: {}", default);
            return Ok(EtlConfig::from_file(default)?);
        }
    }

    info!("Loading config from environment");
    Ok(EtlConfig::from_env()?)
}

async fn run_migration(
    config: EtlConfig,
    json: bool,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !quiet && !json {
        println!("Filmworks ETL v{}\n", filmworks_etl::VERSION);
    }

    let client = MigrationClient::new(config).await?;
    let result = client.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !quiet {
        println!("✓ Migration completed");
        println!("\nDuration: {}ms", result.duration_ms);
        println!(
            "Total: {} extracted, {} inserted, {} already present\n",
            result.total_extracted(),
            result.total_inserted(),
            result.total_skipped()
        );

        for tr in &result.tables {
            println!(
                "  ✓ {}: {} extracted, {} inserted ({} batches, {}ms)",
                tr.table, tr.extracted, tr.inserted, tr.batches, tr.duration_ms
            );
        }
    }

    Ok(())
}

async fn run_test(config: EtlConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !json {
        println!("Testing connectivity...\n");
    }

    let client = MigrationClient::new(config).await?;
    client.test_connectivity().await?;

    if json {
        println!(r#"{{"sqlite":"ok","postgres":"ok"}}"#);
    } else {
        println!("\n✓ All connectivity tests passed!");
    }
    Ok(())
}

async fn run_status(config: EtlConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let client = MigrationClient::new(config).await?;
    let statuses = client.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        println!("Source vs destination\n");
        for status in &statuses {
            println!(
                "  {}: {} source, {} destination",
                status.table, status.source_rows, status.destination_rows
            );
        }
        let pending: i64 = statuses
            .iter()
            .map(|s| (s.source_rows - s.destination_rows).max(0))
            .sum();
        println!("\nTotal: {} rows not yet migrated", pending);
    }
    Ok(())
}

async fn run_verify(
    config: EtlConfig,
    full_content: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = MigrationClient::new(config).await?;
    let report = client.verify(full_content).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Consistency check\n");
        for table in &report.tables {
            let icon = if table.is_consistent() { "✓" } else { "✗" };
            match table.content_mismatches {
                Some(mismatches) => println!(
                    "  {} {}: {} source, {} destination, {} missing ids, {} content mismatches",
                    icon,
                    table.table,
                    table.source_rows,
                    table.destination_rows,
                    table.missing_ids,
                    mismatches
                ),
                None => println!(
                    "  {} {}: {} source, {} destination, {} missing ids",
                    icon, table.table, table.source_rows, table.destination_rows, table.missing_ids
                ),
            }
        }
    }

    if report.is_consistent() {
        if !json {
            println!("\n✓ Stores are consistent");
        }
        Ok(())
    } else {
        Err("Stores diverge".into())
    }
}

fn run_init(output: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = r#"# Filmworks ETL Configuration

[sqlite]
path = "db.sqlite"

[postgres]
host = "127.0.0.1"
port = 5432
user = "app"
password = "123qwe"
dbname = "movies_database"

[etl]
batch_size = 500
page_size = 5000
auto_create_tables = false

[retry]
max_retries = 0

[logging]
level = "info"
"#;

    std::fs::write(output, config)?;
    println!("✓ Created: {}", output);
    println!("\nEdit the file or use environment variables:");
    println!("  SQLITE_PATH, DB_USER, DB_PASSWORD, DB_HOST, DB_PORT, DB_NAME");
    Ok(())
}

fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if quiet {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // When JSON output is enabled, send logs to stderr to avoid mixing with JSON on stdout
    if json_output {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}
