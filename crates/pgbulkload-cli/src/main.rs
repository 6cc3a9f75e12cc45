//! pgbulkload CLI - streaming bulk loads into PostgreSQL.

use clap::{Parser, Subcommand};
use pgbulkload::{LoadConfig, LoadError, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pgbulkload")]
#[command(about = "Streaming bulk data loader for PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML/JSON configuration file
    #[arg(short, long, default_value = "load.yaml")]
    config: PathBuf,

    /// Output the final report as JSON to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the load
    Load {
        /// Override the target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// TRUNCATE target tables before loading
        #[arg(long)]
        truncate: bool,

        /// Load data only; skip all schema changes
        #[arg(long)]
        data_only: bool,

        /// Create schema only; skip the data load
        #[arg(long)]
        schema_only: bool,
    },

    /// Test connectivity on both sides and print the table plan
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, LoadError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| LoadError::Config(e.to_string()))?;

    let mut config = LoadConfig::load(&cli.config)?;
    info!("loaded configuration from {:?}", cli.config);

    let cancel = setup_signal_handler();

    match cli.command {
        Commands::Load {
            target_schema,
            truncate,
            data_only,
            schema_only,
        } => {
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            if truncate {
                config.schema.truncate = true;
            }
            if data_only {
                config.schema.data_only = true;
            }
            if schema_only {
                config.schema.schema_only = true;
            }
            config.validate()?;

            let report = Orchestrator::new(config).run(cancel).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\n{}", report.render());
                println!(
                    "Loaded {} rows in {:.2}s ({} rows/sec)",
                    report.rows_loaded, report.duration_seconds, report.rows_per_second
                );
            }

            if report.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Check => {
            let check = Orchestrator::new(config).check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&check)?);
            } else {
                println!("Source: {}", check.source);
                println!("Target: {}", check.target);
                println!("Tables ({}):", check.tables.len());
                for table in &check.tables {
                    println!("  {}", table);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// SIGINT/SIGTERM cancel the run cooperatively; the pipelines observe the
/// token and roll back in-flight batches.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Shutting down gracefully...");
        token.cancel();
    });

    let token = cancel.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Shutting down gracefully...");
        token.cancel();
    });

    cancel
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
    });
    cancel
}
