//! tablewatch CLI
//!
//! Installs change triggers, watches a configuration table, and reads or
//! writes keys of one namespace through the config cache.

mod settings;
mod watch;

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use settings::{LoggingConfig, Settings};
use tablewatch_config_cache::ConfigCache;
use tablewatch_postgres::connect;

#[derive(Parser)]
#[command(name = "tablewatch")]
#[command(about = "Watch PostgreSQL table changes and mirror namespaced configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "TABLEWATCH_CONFIG",
        global = true
    )]
    config: Option<String>,

    /// PostgreSQL connection string
    #[arg(long, value_name = "URL", global = true)]
    database_url: Option<String>,

    /// Namespace to read and write
    #[arg(short, long, value_name = "NAMESPACE", global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the table if needed and install its change trigger
    Build,
    /// Log every change until interrupted
    Watch,
    /// Print the value of a key
    Get {
        key: String,
    },
    /// Insert or overwrite a key
    Set {
        key: String,
        value: String,
    },
    /// Delete a key
    Remove {
        key: String,
    },
    /// Print every key of the namespace as JSON
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    // Merge environment variables (they override config file)
    settings.merge_env();

    // CLI flags have highest precedence
    if let Some(url) = cli.database_url {
        settings.database_url = url;
    }
    if let Some(namespace) = cli.namespace {
        settings.namespace = namespace;
    }

    init_tracing(&settings.logging)?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    let pool = connect(&settings.database_url, &settings.pool_config()).await?;
    let cache = ConfigCache::new(pool, settings.cache_options())?;

    match cli.command {
        Commands::Build => {
            cache.build().await?;
            println!(
                "Installed change trigger on {} (channel {})",
                cache.table(),
                cache.watcher().channel()
            );
        }
        Commands::Watch => watch::run(&cache).await?,
        Commands::Get { key } => {
            cache.initialize().await?;
            let value = cache.get(&key);
            cache.shutdown().await?;
            match value {
                Some(value) => println!("{}", value),
                None => bail!("Key '{}' not found in namespace '{}'", key, cache.namespace()),
            }
        }
        Commands::Set { key, value } => {
            cache.set(&key, &value).await?;
            println!("Set {}/{}", cache.namespace(), key);
        }
        Commands::Remove { key } => {
            if cache.remove(&key).await? {
                println!("Removed {}/{}", cache.namespace(), key);
            } else {
                println!("Key '{}' not found in namespace '{}'", key, cache.namespace());
            }
        }
        Commands::List => {
            cache.initialize().await?;
            let entries: BTreeMap<String, String> = cache.list().into_iter().collect();
            cache.shutdown().await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

/// Install the global subscriber with the configured level and sqlx query control
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = match logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));

    // sqlx logs every statement at INFO/DEBUG
    if !logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Warning: Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
