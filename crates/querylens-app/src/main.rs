//! QueryLens operator binary - composition root.
//!
//! Ties the QueryLens crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open the conversation store, learning engine and golden registry
//! 3. Run one operator command and print its output to stdout
//! 4. Flush every store before exiting
//!
//! Logs go to stderr so command output can be piped.

mod cli;
mod commands;

use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use querylens_core::config::{expand_home, QueryLensConfig};
use querylens_learning::{GoldenQueryRegistry, LearningEngine};
use querylens_storage::ConversationStore;

use cli::{CliArgs, Command};
use commands::Stores;

/// Open every durable store under `data_dir`.
fn open_stores(config: &QueryLensConfig, data_dir: &Path) -> Result<Stores, Box<dyn std::error::Error>> {
    let conversation_path = config.conversation_path(data_dir);
    let conversations = ConversationStore::open(&conversation_path, config.conversation.max_turns)?;
    tracing::info!(path = %conversation_path.display(), "Conversation store opened");

    let patterns_path = config.patterns_path(data_dir);
    let learning = LearningEngine::open(&patterns_path, config.learning.clone())
        .with_sql_tool_name(config.stream.sql_tool_name.clone());
    learning.load()?;
    tracing::info!(path = %patterns_path.display(), "Learned patterns loaded");

    let golden_path = config.golden_path(data_dir);
    let golden = GoldenQueryRegistry::open(&golden_path)?;
    tracing::info!(path = %golden_path.display(), "Golden query registry opened");

    Ok(Stores {
        conversations,
        learning,
        golden,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = QueryLensConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting QueryLens v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    if let Command::InitConfig { force } = args.command {
        println!("{}", commands::init_config(&config, &config_file, force)?);
        return Ok(());
    }

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let stores = open_stores(&config, &data_dir)?;

    let result = commands::execute(args.command, &stores);

    // Shutdown.
    if let Err(e) = stores.flush() {
        tracing::error!(error = %e, "Failed to flush stores on shutdown");
    }

    let output = result?;
    println!("{}", output);
    Ok(())
}
