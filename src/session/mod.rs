//! Wallet session module
//!
//! Connection state machine over a [`crate::provider::Provider`]:
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──accounts+chain──▶ Connected
//!      ▲                          │                          │ balance failed
//!      │                          └──request failed──▶ Error  ▼
//!      └──────── disconnect() / accountsChanged([]) ── ConnectedWithError
//! ```

pub mod manager;
pub mod types;

pub use manager::{WalletSession, LAST_ADDRESS_KEY};
pub use types::{SessionOptions, SessionStatus, WalletState};
