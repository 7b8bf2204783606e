//! YD Wallet - wallet session and balance tooling over a JSON-RPC node
//!
//! Accounts come from `provider.accounts` in the config (watch-only); the
//! node itself is only asked for chain id and balances.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use yd_wallet::cli::commands;
use yd_wallet::config::Config;
use yd_wallet::format::DEFAULT_DATE_PATTERN;

/// YD Wallet - wallet session manager
#[derive(Parser)]
#[command(name = "yd-wallet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a wallet session and print its state
    Connect,

    /// Fetch the balance of an address once
    Balance {
        /// 0x-prefixed address
        address: String,
    },

    /// Poll the balance of an address
    Watch {
        /// 0x-prefixed address
        address: String,

        /// Polling interval (default: balance.refresh_interval_ms)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many results
        #[arg(long)]
        count: Option<usize>,
    },

    /// Ask the wallet to switch to another chain
    SwitchChain {
        /// Chain id in decimal
        chain_id: u64,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Formatting helpers
    Format {
        #[command(subcommand)]
        action: FormatAction,
    },

    /// Key-value storage commands
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },
}

#[derive(Subcommand)]
enum FormatAction {
    /// Shorten an address, or print its EIP-55 checksum form
    Address {
        address: String,

        #[arg(long, default_value = "6")]
        start: usize,

        #[arg(long, default_value = "4")]
        end: usize,

        /// Print the checksummed address instead
        #[arg(long)]
        checksum: bool,
    },

    /// Convert wei (decimal or 0x hex) to ETH
    Wei { wei: String },

    /// Human-readable byte count
    Size { bytes: u64 },

    /// Number with thousands separators
    Number {
        #[arg(allow_hyphen_values = true)]
        value: f64,

        #[arg(short, long, default_value = "2")]
        decimals: usize,
    },

    /// Render a millisecond timestamp (default: now)
    Date {
        timestamp_ms: Option<i64>,

        #[arg(short, long, default_value = DEFAULT_DATE_PATTERN)]
        pattern: String,
    },
}

#[derive(Subcommand)]
enum StorageAction {
    /// Print a value, or list keys when no key is given
    Get { key: Option<String> },

    /// Store a value (JSON, or a plain string)
    Set { key: String, value: String },

    /// Remove a key
    Remove { key: String },

    /// Remove every key
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("yd_wallet=info".parse()?),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Connect => commands::connect(&config).await,
        Commands::Balance { address } => commands::balance(&config, &address).await,
        Commands::Watch {
            address,
            interval_ms,
            count,
        } => commands::watch(&config, &address, interval_ms, count).await,
        Commands::SwitchChain { chain_id } => commands::switch_chain(&config, chain_id).await,
        Commands::Config => commands::show_config(&config),
        Commands::Format { action } => match action {
            FormatAction::Address {
                address,
                start,
                end,
                checksum,
            } => commands::format_address(&address, start, end, checksum),
            FormatAction::Wei { wei } => commands::format_wei(&wei),
            FormatAction::Size { bytes } => commands::format_size(bytes),
            FormatAction::Number { value, decimals } => commands::format_number(value, decimals),
            FormatAction::Date {
                timestamp_ms,
                pattern,
            } => commands::format_date(timestamp_ms, &pattern),
        },
        Commands::Storage { action } => match action {
            StorageAction::Get { key } => commands::storage_get(&config, key.as_deref()),
            StorageAction::Set { key, value } => commands::storage_set(&config, &key, &value),
            StorageAction::Remove { key } => commands::storage_remove(&config, &key),
            StorageAction::Clear { force } => commands::storage_clear(&config, force),
        },
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
