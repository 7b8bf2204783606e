//! CLI command implementations

use anyhow::Result;
use dialoguer::Confirm;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::balance::{BalanceOptions, BalanceWatcher};
use crate::config::Config;
use crate::format;
use crate::provider::http::HttpProvider;
use crate::provider::{fetch_balance, Provider};
use crate::session::{SessionOptions, WalletSession, WalletState};
use crate::storage::{JsonFileStore, KeyValueStore};
use crate::units;

fn http_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let provider = HttpProvider::from_config(&config.provider)?;
    info!("Using JSON-RPC endpoint {}", provider.rpc_url());
    Ok(Arc::new(provider))
}

fn open_storage(config: &Config) -> Option<Arc<dyn KeyValueStore>> {
    match JsonFileStore::open(&config.storage.path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("Storage unavailable, address will not be remembered: {}", e);
            None
        }
    }
}

fn ensure_address(address: &str) -> Result<()> {
    if !format::is_valid_address(address) {
        anyhow::bail!("Invalid address: {}", address);
    }
    Ok(())
}

async fn connected_session(config: &Config) -> Result<WalletSession> {
    let options = SessionOptions::default().on_error(|e| warn!("Wallet error: {}", e));
    let session =
        WalletSession::with_storage(Some(http_provider(config)?), options, open_storage(config));

    session.connect().await?;
    Ok(session)
}

fn print_state(state: &WalletState) {
    println!("\n=== WALLET SESSION ===\n");
    println!("Status:  {}", state.status());
    println!(
        "Address: {}",
        state.address.as_deref().unwrap_or("(none)")
    );
    match state.chain_id {
        Some(id) => println!("Chain:   {} ({})", id, units::to_hex_quantity(id)),
        None => println!("Chain:   (unknown)"),
    }
    match state.formatted_balance() {
        Some(eth) => println!("Balance: {} ETH", eth),
        None => println!("Balance: (unavailable)"),
    }
    if let Some(error) = &state.error {
        println!("Error:   {}", error);
    }
}

/// Connect a session and print the resulting state
pub async fn connect(config: &Config) -> Result<()> {
    info!("Connecting wallet session...");
    let session = connected_session(config).await?;
    print_state(&session.state());
    Ok(())
}

/// One-shot balance lookup
pub async fn balance(config: &Config, address: &str) -> Result<()> {
    ensure_address(address)?;
    let provider = http_provider(config)?;

    let wei = fetch_balance(provider.as_ref(), address).await?;
    println!("Address: {}", format::shorten_address(address));
    println!("Balance: {} wei", wei);
    println!("         {} ETH", units::wei_to_eth(&wei)?);
    Ok(())
}

/// Poll a balance until `count` results arrive or Ctrl-C
pub async fn watch(
    config: &Config,
    address: &str,
    interval_ms: Option<u64>,
    count: Option<usize>,
) -> Result<()> {
    ensure_address(address)?;
    let interval_ms = interval_ms.unwrap_or(config.balance.refresh_interval_ms);
    if interval_ms == 0 {
        anyhow::bail!("Interval must be positive");
    }

    let watcher = BalanceWatcher::watching(
        Some(http_provider(config)?),
        Some(address.to_string()),
        BalanceOptions::polling(Duration::from_millis(interval_ms))
            .on_balance_changed(|wei| info!("Balance changed: {} wei", wei)),
    );
    let mut rx = watcher.subscribe();
    let mut seen = 0usize;

    println!(
        "Watching {} every {}ms (Ctrl-C to stop)",
        format::shorten_address(address),
        interval_ms
    );

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if state.loading {
                    continue;
                }

                let now = chrono::Local::now();
                let stamp = format::format_date(&now, "HH:mm:ss");
                match (&state.formatted_balance, &state.error) {
                    (_, Some(error)) => println!("[{}] error: {}", stamp, error),
                    (Some(eth), None) => println!("[{}] {} ETH", stamp, eth),
                    (None, None) => continue,
                }

                seen += 1;
                if count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping balance watch");
                break;
            }
        }
    }

    Ok(())
}

/// Connect, then ask the wallet to switch chains
pub async fn switch_chain(config: &Config, chain_id: u64) -> Result<()> {
    let session = connected_session(config).await?;

    info!("Switching to chain {}", chain_id);
    if let Err(e) = session.switch_chain(chain_id).await {
        anyhow::bail!("Chain switch failed: {}", e);
    }

    print_state(&session.state());
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

pub fn format_address(address: &str, start: usize, end: usize, checksum: bool) -> Result<()> {
    if checksum {
        println!("{}", format::to_checksum_address(address)?);
    } else {
        println!("{}", format::format_address(address, start, end));
    }
    Ok(())
}

pub fn format_wei(wei: &str) -> Result<()> {
    println!("{} ETH", units::wei_to_eth(wei)?);
    Ok(())
}

pub fn format_size(bytes: u64) -> Result<()> {
    println!("{}", format::format_file_size(bytes));
    Ok(())
}

pub fn format_number(value: f64, decimals: usize) -> Result<()> {
    println!("{}", format::format_number(value, decimals));
    Ok(())
}

/// Format a millisecond timestamp, or the current time when absent
pub fn format_date(timestamp_ms: Option<i64>, pattern: &str) -> Result<()> {
    let rendered = match timestamp_ms {
        Some(ms) => format::format_timestamp_ms(ms, pattern)
            .ok_or_else(|| anyhow::anyhow!("Timestamp out of range: {}", ms))?,
        None => format::format_date(&chrono::Local::now(), pattern),
    };
    println!("{}", rendered);
    Ok(())
}

fn storage_or_fail(config: &Config) -> Result<JsonFileStore> {
    JsonFileStore::open(&config.storage.path).map_err(|e| anyhow::anyhow!("{}", e))
}

pub fn storage_get(config: &Config, key: Option<&str>) -> Result<()> {
    let store = storage_or_fail(config)?;

    match key {
        Some(key) => match store.get(key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(not set)"),
        },
        None => {
            let keys = store.keys();
            if keys.is_empty() {
                println!("Storage at {} is empty.", store.path().display());
            }
            for key in keys {
                println!("{}", key);
            }
        }
    }
    Ok(())
}

/// Store `raw` as JSON, or as a plain string when it does not parse
pub fn storage_set(config: &Config, key: &str, raw: &str) -> Result<()> {
    let store = storage_or_fail(config)?;
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    store.set(key, value);
    info!("Stored {} in {}", key, store.path().display());
    Ok(())
}

pub fn storage_remove(config: &Config, key: &str) -> Result<()> {
    let store = storage_or_fail(config)?;
    store.remove(key);
    info!("Removed {}", key);
    Ok(())
}

pub fn storage_clear(config: &Config, force: bool) -> Result<()> {
    let store = storage_or_fail(config)?;

    // Confirmation prompt (unless --force)
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Remove all {} keys from {}?",
                store.keys().len(),
                store.path().display()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Clear cancelled by user");
            return Ok(());
        }
    }

    store.clear();
    info!("Storage cleared");
    Ok(())
}
