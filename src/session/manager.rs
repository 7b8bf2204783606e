//! Wallet session manager
//!
//! Owns one [`WalletState`] and drives it through connect, disconnect,
//! balance refresh and chain switching. Provider notifications are consumed
//! on a background task for as long as the session lives.
//!
//! # Stale results
//!
//! Every `connect()` and `disconnect()` bumps a generation counter inside the
//! same store update that changes the state. A connect attempt only applies
//! its result if the generation is still the one it started with, so a
//! disconnect issued while a request is in flight wins.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::provider::{
    self, fetch_balance, parse_accounts, parse_string, EventKind, Provider, ProviderError,
    ProviderEvent, RpcRequest, Subscription, METHOD_ACCOUNTS, METHOD_CHAIN_ID,
    METHOD_REQUEST_ACCOUNTS,
};
use crate::storage::KeyValueStore;
use crate::store::Store;
use crate::units;

use super::types::{SessionOptions, SessionStatus, WalletState};

/// Storage key holding the last connected address
pub const LAST_ADDRESS_KEY: &str = "wallet.lastAddress";

/// Result of a successful handshake
struct Connection {
    address: String,
    chain_id: u64,
    balance: Option<String>,
}

struct SessionInner {
    provider: Option<Arc<dyn Provider>>,
    store: Store<WalletState>,
    generation: AtomicU64,
    auto_connect_attempted: AtomicBool,
    options: SessionOptions,
    storage: Option<Arc<dyn KeyValueStore>>,
}

/// A wallet connection session bound to one provider
///
/// Must be created inside a Tokio runtime: construction spawns the task that
/// consumes provider notifications (and the auto-connect probe when enabled).
/// Dropping the session removes its provider listeners and stops both tasks.
pub struct WalletSession {
    inner: Arc<SessionInner>,
    tasks: Vec<JoinHandle<()>>,
    _subscription: Option<Subscription>,
}

impl WalletSession {
    pub fn new(provider: Option<Arc<dyn Provider>>, options: SessionOptions) -> Self {
        Self::with_storage(provider, options, None)
    }

    /// Create a session that remembers the last connected address in `storage`
    pub fn with_storage(
        provider: Option<Arc<dyn Provider>>,
        options: SessionOptions,
        storage: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let auto_connect = options.auto_connect;
        let inner = Arc::new(SessionInner {
            provider,
            store: Store::new(WalletState::default()),
            generation: AtomicU64::new(0),
            auto_connect_attempted: AtomicBool::new(false),
            options,
            storage,
        });

        let mut tasks = Vec::new();
        let mut subscription = None;

        if let Some(provider) = inner.provider.clone() {
            let (sub, mut events) = provider::subscribe(
                &provider,
                &[EventKind::AccountsChanged, EventKind::ChainChanged],
            );
            subscription = Some(sub);

            let weak: Weak<SessionInner> = Arc::downgrade(&inner);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    inner.handle_event(event).await;
                }
                debug!("Wallet session event loop finished");
            }));

            if auto_connect {
                let inner = inner.clone();
                tasks.push(tokio::spawn(async move {
                    inner.try_auto_connect().await;
                }));
            }
        } else {
            debug!("Wallet session created without a provider");
        }

        Self {
            inner,
            tasks,
            _subscription: subscription,
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> Arc<WalletState> {
        self.inner.store.get()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.store.get().status()
    }

    /// Receive every new state snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<WalletState>> {
        self.inner.store.subscribe()
    }

    pub fn has_provider(&self) -> bool {
        self.inner.provider.is_some()
    }

    /// Ask the wallet for account access and load chain id and balance.
    ///
    /// Failures end up in `state.error` and are also returned. A call made
    /// while already connected, or while another attempt is in flight,
    /// returns `Ok(())` without touching the provider.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Forget the connection. Never calls the provider.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Re-read the balance of the current address; failures are only logged
    pub async fn refresh_balance(&self) {
        self.inner.refresh_balance().await;
    }

    /// Ask the wallet to switch to `chain_id`
    pub async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        self.inner.switch_chain(chain_id).await
    }

    /// Connect silently if the wallet already authorized us. Runs at most once.
    pub async fn try_auto_connect(&self) {
        self.inner.try_auto_connect().await;
    }

    /// Apply an `accountsChanged` notification
    pub async fn handle_accounts_changed(&self, accounts: Vec<String>) {
        self.inner.handle_accounts_changed(accounts).await;
    }

    /// Apply a `chainChanged` notification (hex chain id)
    pub async fn handle_chain_changed(&self, chain_id_hex: &str) {
        self.inner.handle_chain_changed(chain_id_hex).await;
    }
}

impl Drop for WalletSession {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl SessionInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn notify_error(&self, err: &Error) {
        if let Some(cb) = &self.options.on_error {
            cb(err);
        }
    }

    async fn connect(&self) -> Result<()> {
        let Some(provider) = self.provider.clone() else {
            warn!("Connect requested but no wallet provider is available");
            let err = Error::ProviderMissing;
            self.store.update(|draft| {
                draft.error = Some(err.to_string());
                draft.connecting = false;
            });
            self.notify_error(&err);
            return Err(err);
        };

        let started = self.store.update(|draft| {
            // Already connected, or an attempt is in flight
            if draft.connecting || draft.connected {
                return None;
            }
            draft.connecting = true;
            draft.error = None;
            Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
        });

        let Some(generation) = started else {
            debug!("Wallet already connected or connecting, ignoring connect");
            return Ok(());
        };

        info!("Connecting wallet (attempt {})", generation);

        match self.handshake(provider.as_ref()).await {
            Ok(Some(conn)) => {
                let applied = self.store.update(|draft| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    draft.connected = true;
                    draft.address = Some(conn.address.clone());
                    draft.chain_id = Some(conn.chain_id);
                    draft.balance = conn.balance.clone();
                    draft.connecting = false;
                    draft.error = None;
                    true
                });

                if applied {
                    info!("Wallet connected: {} on chain {}", conn.address, conn.chain_id);
                    self.remember_address(Some(&conn.address));
                } else {
                    debug!("Discarding connect result from attempt {}", generation);
                }
                Ok(())
            }
            Ok(None) => {
                self.store.update(|draft| {
                    if self.is_current(generation) {
                        draft.connecting = false;
                    }
                });
                info!("Wallet returned no accounts");
                Ok(())
            }
            Err(err) => {
                let applied = self.store.update(|draft| {
                    if !self.is_current(generation) {
                        return false;
                    }
                    draft.error = Some(err.to_string());
                    draft.connecting = false;
                    draft.connected = false;
                    true
                });

                if !applied {
                    debug!("Discarding connect failure from attempt {}: {}", generation, err);
                    return Ok(());
                }

                warn!("Wallet connect failed: {}", err);
                self.notify_error(&err);
                Err(err)
            }
        }
    }

    async fn handshake(&self, provider: &dyn Provider) -> Result<Option<Connection>> {
        let accounts = parse_accounts(
            METHOD_REQUEST_ACCOUNTS,
            provider.request(RpcRequest::request_accounts()).await?,
        )?;

        let Some(address) = accounts.into_iter().next() else {
            return Ok(None);
        };

        let chain_hex = parse_string(
            METHOD_CHAIN_ID,
            provider.request(RpcRequest::chain_id()).await?,
        )?;
        let chain_id = units::parse_chain_id(&chain_hex)?;

        let balance = match fetch_balance(provider, &address).await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("Failed to fetch balance: {}", e);
                None
            }
        };

        Ok(Some(Connection {
            address,
            chain_id,
            balance,
        }))
    }

    fn disconnect(&self) {
        self.store.update(|draft| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *draft = WalletState::default();
        });
        self.remember_address(None);
        info!("Wallet disconnected");
    }

    async fn refresh_balance(&self) {
        let Some(address) = self.store.get().address.clone() else {
            return;
        };
        let Some(provider) = self.provider.as_ref() else {
            return;
        };

        match fetch_balance(provider.as_ref(), &address).await {
            Ok(balance) => {
                self.store.update(|draft| {
                    // The account may have changed while the request was out
                    if draft.address.as_deref() == Some(address.as_str()) {
                        draft.balance = Some(balance);
                    }
                });
            }
            Err(e) => warn!("Failed to refresh balance: {}", e),
        }
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        let provider = self.provider.as_ref().ok_or(Error::ProviderMissing)?;

        match provider.request(RpcRequest::switch_chain(chain_id)).await {
            Ok(_) => {
                self.store.update(|draft| draft.chain_id = Some(chain_id));
                info!("Switched to chain {}", chain_id);
                if let Some(cb) = &self.options.on_chain_changed {
                    cb(chain_id);
                }
                Ok(())
            }
            Err(e) if e.code == ProviderError::CHAIN_NOT_ADDED => {
                warn!("Chain {} has not been added to the wallet", chain_id);
                Err(Error::ChainNotAdded(chain_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn try_auto_connect(&self) {
        if self.auto_connect_attempted.swap(true, Ordering::SeqCst) {
            return;
        }

        let state = self.store.get();
        if state.connected || state.connecting {
            return;
        }

        let Some(provider) = self.provider.clone() else {
            return;
        };

        let authorized = provider
            .request(RpcRequest::accounts())
            .await
            .map_err(Error::from)
            .and_then(|value| parse_accounts(METHOD_ACCOUNTS, value));

        match authorized {
            Ok(accounts) if !accounts.is_empty() => {
                info!("Wallet already authorized, auto-connecting");
                // connect() records its own failure in state
                let _ = self.connect().await;
            }
            Ok(_) => debug!("No authorized accounts, skipping auto-connect"),
            Err(e) => debug!("Auto-connect probe failed: {}", e),
        }
    }

    async fn handle_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => self.handle_accounts_changed(accounts).await,
            ProviderEvent::ChainChanged(chain_id) => self.handle_chain_changed(&chain_id).await,
        }
    }

    async fn handle_accounts_changed(&self, accounts: Vec<String>) {
        match accounts.first() {
            None => {
                info!("Wallet reported no accounts");
                self.disconnect();
            }
            Some(first) => {
                info!("Active account changed to {}", first);
                let connected = self.store.update(|draft| {
                    draft.address = Some(first.clone());
                    draft.connected
                });
                if connected {
                    self.remember_address(Some(first));
                }
                self.refresh_balance().await;
            }
        }

        if let Some(cb) = &self.options.on_accounts_changed {
            cb(&accounts);
        }
    }

    async fn handle_chain_changed(&self, chain_id_hex: &str) {
        let chain_id = match units::parse_chain_id(chain_id_hex) {
            Ok(id) => id,
            Err(e) => {
                warn!("Ignoring chainChanged with bad chain id {}: {}", chain_id_hex, e);
                return;
            }
        };

        info!("Chain changed to {}", chain_id);
        self.store.update(|draft| draft.chain_id = Some(chain_id));
        self.refresh_balance().await;

        if let Some(cb) = &self.options.on_chain_changed {
            cb(chain_id);
        }
    }

    fn remember_address(&self, address: Option<&str>) {
        let Some(storage) = &self.storage else {
            return;
        };
        match address {
            Some(addr) => storage.set(LAST_ADDRESS_KEY, Value::String(addr.to_string())),
            None => storage.remove(LAST_ADDRESS_KEY),
        }
    }
}
