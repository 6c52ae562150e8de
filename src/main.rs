use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use graphql_ops::{
    config::{Config, LogFormat},
    ComplexityAnalyzer, Endpoint, ExecutionManager, Query, ResultStorageEngine,
};

/// GraphQL execution core: complexity analysis, resilient execution, result storage.
#[derive(Parser, Debug)]
#[command(name = "graphql-ops", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score a query file and print its complexity metrics as JSON
    Analyze {
        /// File containing the GraphQL query
        file: PathBuf,
    },

    /// Execute a query file against an endpoint and print the result as JSON
    Execute {
        /// GraphQL endpoint URL
        #[arg(long)]
        url: String,

        /// Variables as a JSON object
        #[arg(long)]
        variables: Option<String>,

        /// Skip result storage
        #[arg(long)]
        no_store: bool,

        /// File containing the GraphQL query
        file: PathBuf,
    },

    /// Probe an endpoint with a `__typename` query
    Health {
        /// GraphQL endpoint URL
        #[arg(long)]
        url: String,
    },

    /// Print result storage analytics
    StorageStats,

    /// Delete stored results older than the given age
    Cleanup {
        /// Maximum age in hours
        #[arg(long, default_value = "168")]
        max_age_hours: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "graphql-ops starting");

    if let Err(e) = run(cli.command, config).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Analyze { file } => {
            let text = read_query(&file)?;
            let metrics = ComplexityAnalyzer::new().analyze(&text);
            let (min_ms, max_ms) = ComplexityAnalyzer::estimate_execution_time(metrics.complexity_score);
            let output = serde_json::json!({
                "metrics": metrics,
                "estimated_execution_ms": { "min": min_ms, "max": max_ms },
                "optimizations": ComplexityAnalyzer::suggest_optimizations(&metrics),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Execute {
            url,
            variables,
            no_store,
            file,
        } => {
            let text = read_query(&file)?;
            let variables = variables
                .map(|v| serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&v))
                .transpose()
                .context("--variables must be a JSON object")?;

            let manager = if no_store {
                ExecutionManager::new(config.execution.clone(), config.circuit_breaker.clone())
            } else {
                let storage = open_storage(&config).await?;
                ExecutionManager::with_storage(
                    config.execution.clone(),
                    config.circuit_breaker.clone(),
                    Arc::new(storage),
                )
            };

            let endpoint = endpoint_from_config(&url, &config);
            let name = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "query".to_string());
            let query = Query::new(name, text);
            let result = manager.execute_single(&query, &endpoint, variables, None).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Health { url } => {
            let manager =
                ExecutionManager::new(config.execution.clone(), config.circuit_breaker.clone());
            let health = manager
                .check_endpoint_health(&endpoint_from_config(&url, &config))
                .await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::StorageStats => {
            let storage = open_storage(&config).await?;
            let analytics = storage.get_storage_analytics().await?;
            println!("{}", serde_json::to_string_pretty(&analytics)?);
        }
        Commands::Cleanup { max_age_hours } => {
            let storage = open_storage(&config).await?;
            let removed = storage
                .cleanup_expired(Duration::from_secs(max_age_hours.saturating_mul(3600)))
                .await?;
            println!("Removed {} expired results", removed);
        }
    }
    Ok(())
}

fn read_query(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read query file {}", file.display()))
}

async fn open_storage(config: &Config) -> anyhow::Result<ResultStorageEngine> {
    ResultStorageEngine::from_config(&config.storage, &config.database)
        .await
        .context("Failed to initialize result storage")
}

/// Ad-hoc endpoint using request defaults from the environment.
fn endpoint_from_config(url: &str, config: &Config) -> Endpoint {
    Endpoint::new(url, url)
        .with_timeout_seconds((config.request.timeout_ms / 1000).max(1))
        .with_retries(
            config.request.max_retries,
            config.request.retry_delay_ms as f64 / 1000.0,
        )
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
