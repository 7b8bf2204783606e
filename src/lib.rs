//! YD Wallet Library
//!
//! Wallet session state, balance polling and display helpers over an
//! EIP-1193 style provider.

pub mod balance;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod provider;
pub mod session;
pub mod storage;
pub mod store;
pub mod units;

// Re-export commonly used types
pub use balance::{BalanceOptions, BalanceState, BalanceWatcher};
pub use config::Config;
pub use error::{Error, Result};
pub use provider::{Provider, ProviderEvent};
pub use session::{SessionOptions, SessionStatus, WalletSession, WalletState};
pub use store::Store;
