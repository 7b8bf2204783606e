//! Wallet session state and options

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Connection state owned by a [`super::WalletSession`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub connected: bool,
    /// Account identifier as returned by the provider
    pub address: Option<String>,
    /// Decimal chain id
    pub chain_id: Option<u64>,
    /// Base-unit balance as a decimal string
    pub balance: Option<String>,
    /// Last failure message, cleared on the next attempt
    pub error: Option<String>,
    pub connecting: bool,
}

impl WalletState {
    pub fn status(&self) -> SessionStatus {
        if self.connecting {
            SessionStatus::Connecting
        } else if self.connected {
            if self.error.is_some() || self.balance.is_none() {
                SessionStatus::ConnectedWithError
            } else {
                SessionStatus::Connected
            }
        } else if self.error.is_some() {
            SessionStatus::Error
        } else {
            SessionStatus::Disconnected
        }
    }

    /// Balance in ETH with four decimal places
    pub fn formatted_balance(&self) -> Option<String> {
        self.balance
            .as_deref()
            .and_then(|wei| crate::units::wei_to_eth(wei).ok())
    }

    /// `0x1234...5678` form of the address
    pub fn display_address(&self) -> Option<String> {
        self.address.as_deref().map(crate::format::shorten_address)
    }
}

/// Coarse state-machine view of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the balance (or a follow-up request) failed
    ConnectedWithError,
    /// Last connect attempt failed
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::ConnectedWithError => "connected (degraded)",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

pub type AccountsCallback = Arc<dyn Fn(&[String]) + Send + Sync>;
pub type ChainCallback = Arc<dyn Fn(u64) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Session configuration
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Reconnect silently if the wallet already authorized this origin
    pub auto_connect: bool,
    pub on_accounts_changed: Option<AccountsCallback>,
    pub on_chain_changed: Option<ChainCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl SessionOptions {
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    pub fn on_accounts_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.on_accounts_changed = Some(Arc::new(f));
        self
    }

    pub fn on_chain_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.on_chain_changed = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("auto_connect", &self.auto_connect)
            .field("on_accounts_changed", &self.on_accounts_changed.is_some())
            .field("on_chain_changed", &self.on_chain_changed.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> WalletState {
        WalletState {
            connected: true,
            address: Some("0x1234567890123456789012345678901234567890".to_string()),
            chain_id: Some(1),
            balance: Some("1500000000000000000".to_string()),
            error: None,
            connecting: false,
        }
    }

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(WalletState::default().status(), SessionStatus::Disconnected);
    }

    #[test]
    fn test_status_derivation() {
        let mut state = connected();
        assert_eq!(state.status(), SessionStatus::Connected);

        state.balance = None;
        assert_eq!(state.status(), SessionStatus::ConnectedWithError);

        let failed = WalletState {
            error: Some("provider not found".to_string()),
            ..Default::default()
        };
        assert_eq!(failed.status(), SessionStatus::Error);

        let connecting = WalletState {
            connecting: true,
            ..Default::default()
        };
        assert_eq!(connecting.status(), SessionStatus::Connecting);
    }

    #[test]
    fn test_display_helpers() {
        let state = connected();
        assert_eq!(state.formatted_balance().as_deref(), Some("1.5000"));
        assert_eq!(state.display_address().as_deref(), Some("0x1234...7890"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(connected()).unwrap();
        assert_eq!(json["chainId"], 1);
        assert_eq!(json["connecting"], false);
    }
}
