//! Wallet provider capability
//!
//! Models the injected EIP-1193 object (`window.ethereum`) as a trait so the
//! session manager can run against a real endpoint, a test double, or
//! nothing at all (`None`).
//!
//! # Methods used
//!
//! | method                       | params                        |
//! |------------------------------|-------------------------------|
//! | `eth_requestAccounts`        | none                          |
//! | `eth_accounts`               | none                          |
//! | `eth_chainId`                | none                          |
//! | `eth_getBalance`             | `[address, "latest"]`         |
//! | `wallet_switchEthereumChain` | `[{ "chainId": "0x<hex>" }]`  |

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

pub mod http;
pub mod mock;

pub use http::HttpProvider;
pub use mock::MockProvider;

pub const METHOD_REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
pub const METHOD_ACCOUNTS: &str = "eth_accounts";
pub const METHOD_CHAIN_ID: &str = "eth_chainId";
pub const METHOD_GET_BALANCE: &str = "eth_getBalance";
pub const METHOD_SWITCH_CHAIN: &str = "wallet_switchEthereumChain";

/// A single provider request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Ask the wallet for account access (may prompt the user)
    pub fn request_accounts() -> Self {
        Self::new(METHOD_REQUEST_ACCOUNTS, Value::Null)
    }

    /// Already-authorized accounts, never prompts
    pub fn accounts() -> Self {
        Self::new(METHOD_ACCOUNTS, Value::Null)
    }

    pub fn chain_id() -> Self {
        Self::new(METHOD_CHAIN_ID, Value::Null)
    }

    /// Latest balance of `address`
    pub fn get_balance(address: &str) -> Self {
        Self::new(METHOD_GET_BALANCE, json!([address, "latest"]))
    }

    /// Switch the wallet to `chain_id`
    pub fn switch_chain(chain_id: u64) -> Self {
        Self::new(
            METHOD_SWITCH_CHAIN,
            json!([{ "chainId": crate::units::to_hex_quantity(chain_id) }]),
        )
    }
}

/// Error object returned by a provider (EIP-1193 / JSON-RPC shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    /// `wallet_switchEthereumChain` target was never added to the wallet
    pub const CHAIN_NOT_ADDED: i64 = 4902;
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(Self::USER_REJECTED, "User rejected the request.")
    }

    pub fn unsupported(method: &str) -> Self {
        Self::new(
            Self::UNSUPPORTED_METHOD,
            format!("The provider does not support {}", method),
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for ProviderError {}

/// Kinds of events a provider pushes out-of-band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AccountsChanged,
    ChainChanged,
}

impl EventKind {
    /// Event name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AccountsChanged => "accountsChanged",
            EventKind::ChainChanged => "chainChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event pushed by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// New ordered account list; empty means the wallet locked or revoked access
    AccountsChanged(Vec<String>),
    /// New chain id as a hex string
    ChainChanged(String),
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProviderEvent::AccountsChanged(_) => EventKind::AccountsChanged,
            ProviderEvent::ChainChanged(_) => EventKind::ChainChanged,
        }
    }
}

/// Event handler registered with [`Provider::on`]
pub type Listener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

/// Handle returned by [`Provider::on`], used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The wallet capability consumed by sessions and balance watchers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a request and wait for its result
    async fn request(&self, request: RpcRequest) -> std::result::Result<Value, ProviderError>;

    /// Register an event handler
    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId;

    /// Remove a handler; returns false if it was not registered
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Listener bookkeeping shared by provider implementations
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<ListenerId, (EventKind, Listener)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, (kind, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Invoke every listener registered for the event's kind
    pub fn emit(&self, event: &ProviderEvent) {
        let kind = event.kind();
        // Collect first so a listener may add/remove listeners without deadlocking
        let targets: Vec<Listener> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .map(|entry| entry.value().1.clone())
            .collect();

        debug!("Emitting {} to {} listener(s)", kind, targets.len());
        for listener in targets {
            listener(event);
        }
    }

    /// Number of listeners registered for `kind`
    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Scoped event subscription
///
/// Registers one forwarding listener per kind and removes all of them when
/// dropped. Events arrive on the channel returned by [`subscribe`].
pub struct Subscription {
    provider: Arc<dyn Provider>,
    ids: Vec<ListenerId>,
}

impl Subscription {
    pub fn listener_count(&self) -> usize {
        self.ids.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.provider.remove_listener(id);
        }
    }
}

/// Subscribe to `kinds` on `provider`, forwarding events into a channel
pub fn subscribe(
    provider: &Arc<dyn Provider>,
    kinds: &[EventKind],
) -> (Subscription, mpsc::UnboundedReceiver<ProviderEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let ids = kinds
        .iter()
        .map(|kind| {
            let tx = tx.clone();
            let listener: Listener = Arc::new(move |event: &ProviderEvent| {
                if tx.send(event.clone()).is_err() {
                    debug!("Provider event channel closed, dropping {}", event.kind());
                }
            });
            provider.on(*kind, listener)
        })
        .collect();

    (
        Subscription {
            provider: provider.clone(),
            ids,
        },
        rx,
    )
}

/// Decode an `eth_accounts` / `eth_requestAccounts` result
pub fn parse_accounts(method: &str, value: Value) -> crate::Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value(other).map_err(|e| crate::Error::InvalidResponse {
            method: method.to_string(),
            detail: e.to_string(),
        }),
    }
}

/// Decode a result that must be a string (chain id, balance)
pub fn parse_string(method: &str, value: Value) -> crate::Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(crate::Error::InvalidResponse {
            method: method.to_string(),
            detail: format!("expected a string, got {}", other),
        }),
    }
}

/// Fetch the latest balance of `address` as a decimal wei string
pub async fn fetch_balance(provider: &dyn Provider, address: &str) -> crate::Result<String> {
    let value = provider
        .request(RpcRequest::get_balance(address))
        .await
        .map_err(|e| crate::Error::BalanceFetch(e.to_string()))?;

    let raw = parse_string(METHOD_GET_BALANCE, value)?;
    crate::units::to_decimal_string(&raw).map_err(|e| crate::Error::BalanceFetch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_request_shapes() {
        let req = RpcRequest::get_balance("0xabc");
        assert_eq!(req.method, "eth_getBalance");
        assert_eq!(req.params, json!(["0xabc", "latest"]));

        let req = RpcRequest::switch_chain(137);
        assert_eq!(req.method, "wallet_switchEthereumChain");
        assert_eq!(req.params, json!([{ "chainId": "0x89" }]));

        let req = RpcRequest::request_accounts();
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({ "method": "eth_requestAccounts" }));
    }

    #[test]
    fn test_registry_emit_by_kind() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = registry.add(
            EventKind::ChainChanged,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.emit(&ProviderEvent::AccountsChanged(vec![]));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        registry.emit(&ProviderEvent::ChainChanged("0x1".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.emit(&ProviderEvent::ChainChanged("0x1".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_forwards_and_releases() {
        let mock = Arc::new(MockProvider::new());
        let provider: Arc<dyn Provider> = mock.clone();

        let (sub, mut rx) = subscribe(
            &provider,
            &[EventKind::AccountsChanged, EventKind::ChainChanged],
        );
        assert_eq!(sub.listener_count(), 2);
        assert_eq!(mock.listener_count(EventKind::AccountsChanged), 1);

        mock.emit(ProviderEvent::ChainChanged("0x5".to_string()));
        assert_eq!(
            rx.recv().await,
            Some(ProviderEvent::ChainChanged("0x5".to_string()))
        );

        drop(sub);
        assert_eq!(mock.listener_count(EventKind::AccountsChanged), 0);
        assert_eq!(mock.listener_count(EventKind::ChainChanged), 0);
    }

    #[test]
    fn test_parse_accounts() {
        let accounts = parse_accounts("eth_accounts", json!(["0x1", "0x2"])).unwrap();
        assert_eq!(accounts, vec!["0x1".to_string(), "0x2".to_string()]);
        assert!(parse_accounts("eth_accounts", Value::Null).unwrap().is_empty());
        assert!(parse_accounts("eth_accounts", json!(42)).is_err());
    }
}
