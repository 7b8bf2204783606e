//! Balance watcher for a single address
//!
//! Fetches the balance whenever the watched address changes and, when
//! auto-refresh is enabled, keeps polling on a fixed interval until the
//! address changes again or the watcher is dropped. It also re-fetches on
//! `accountsChanged`, independently of any [`crate::session::WalletSession`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::provider::{self, fetch_balance, EventKind, Provider, Subscription};
use crate::store::Store;
use crate::units;

/// Balance state owned by a [`BalanceWatcher`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceState {
    /// Wei as a decimal string
    pub balance: Option<String>,
    /// ETH with four decimal places, derived from `balance` in the same update
    pub formatted_balance: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
}

pub type BalanceCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BalanceOptions {
    pub auto_refresh: bool,
    /// Polling cadence; ignored unless `auto_refresh` is set and non-zero
    pub refresh_interval: Option<Duration>,
    pub on_balance_changed: Option<BalanceCallback>,
}

impl BalanceOptions {
    /// Poll every `every`
    pub fn polling(every: Duration) -> Self {
        Self {
            auto_refresh: true,
            refresh_interval: Some(every),
            on_balance_changed: None,
        }
    }

    pub fn on_balance_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_balance_changed = Some(Arc::new(f));
        self
    }

    fn poll_period(&self) -> Option<Duration> {
        match self.refresh_interval {
            Some(period) if self.auto_refresh && !period.is_zero() => Some(period),
            _ => None,
        }
    }
}

impl fmt::Debug for BalanceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BalanceOptions")
            .field("auto_refresh", &self.auto_refresh)
            .field("refresh_interval", &self.refresh_interval)
            .field("on_balance_changed", &self.on_balance_changed.is_some())
            .finish()
    }
}

struct WatcherInner {
    provider: Option<Arc<dyn Provider>>,
    store: Store<BalanceState>,
    address: Store<Option<String>>,
    /// Bumped on every address change; older fetches are discarded
    generation: AtomicU64,
    on_balance_changed: Option<BalanceCallback>,
}

impl WatcherInner {
    async fn fetch(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let current = |g: u64| self.generation.load(Ordering::SeqCst) == g;

        let Some(address) = (*self.address.get()).clone() else {
            self.store.update(|draft| {
                draft.balance = None;
                draft.formatted_balance = None;
                draft.loading = false;
            });
            return;
        };

        let Some(provider) = self.provider.as_ref() else {
            self.store.update(|draft| {
                draft.error = Some(Error::ProviderMissing.to_string());
                draft.loading = false;
            });
            return;
        };

        self.store.update(|draft| {
            draft.loading = true;
            draft.error = None;
        });

        let result = fetch_balance(provider.as_ref(), &address).await.and_then(|wei| {
            let formatted = units::wei_to_eth(&wei)?;
            Ok((wei, formatted))
        });

        match result {
            Ok((wei, formatted)) => {
                let applied = self.store.update(|draft| {
                    if !current(generation) {
                        return false;
                    }
                    draft.balance = Some(wei.clone());
                    draft.formatted_balance = Some(formatted.clone());
                    draft.loading = false;
                    true
                });

                if applied {
                    debug!("Balance of {}: {} ETH", address, formatted);
                    if let Some(cb) = &self.on_balance_changed {
                        cb(&wei);
                    }
                }
            }
            Err(e) => {
                warn!("Failed to fetch balance for {}: {}", address, e);
                self.store.update(|draft| {
                    if current(generation) {
                        draft.error = Some(e.to_string());
                        draft.loading = false;
                    }
                });
            }
        }
    }
}

/// Polling task for the current address; aborting it stops the schedule
struct Schedule {
    handle: JoinHandle<()>,
}

impl Schedule {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Watches the balance of one (changeable) address
///
/// Must be used inside a Tokio runtime.
pub struct BalanceWatcher {
    inner: Arc<WatcherInner>,
    poll_period: Option<Duration>,
    schedule: Option<Schedule>,
    listener_task: Option<JoinHandle<()>>,
    _subscription: Option<Subscription>,
}

impl BalanceWatcher {
    pub fn new(provider: Option<Arc<dyn Provider>>, options: BalanceOptions) -> Self {
        let inner = Arc::new(WatcherInner {
            provider,
            store: Store::new(BalanceState::default()),
            address: Store::new(None),
            generation: AtomicU64::new(0),
            on_balance_changed: options.on_balance_changed.clone(),
        });

        let mut listener_task = None;
        let mut subscription = None;

        if let Some(provider) = inner.provider.clone() {
            let (sub, mut events) = provider::subscribe(&provider, &[EventKind::AccountsChanged]);
            subscription = Some(sub);

            let weak: Weak<WatcherInner> = Arc::downgrade(&inner);
            listener_task = Some(tokio::spawn(async move {
                while events.recv().await.is_some() {
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    inner.fetch().await;
                }
            }));
        }

        Self {
            inner,
            poll_period: options.poll_period(),
            schedule: None,
            listener_task,
            _subscription: subscription,
        }
    }

    /// Convenience: create and start watching `address`
    pub fn watching(
        provider: Option<Arc<dyn Provider>>,
        address: Option<String>,
        options: BalanceOptions,
    ) -> Self {
        let mut watcher = Self::new(provider, options);
        watcher.set_address(address);
        watcher
    }

    pub fn state(&self) -> Arc<BalanceState> {
        self.inner.store.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<BalanceState>> {
        self.inner.store.subscribe()
    }

    pub fn address(&self) -> Option<String> {
        (*self.inner.address.get()).clone()
    }

    pub fn is_polling(&self) -> bool {
        self.schedule.is_some() && self.poll_period.is_some()
    }

    /// Change the watched address.
    ///
    /// Cancels the running schedule, then fetches immediately and starts a
    /// new schedule for `Some`. Setting the same address again does nothing.
    pub fn set_address(&mut self, address: Option<String>) {
        if *self.inner.address.get() == address {
            return;
        }

        if let Some(schedule) = self.schedule.take() {
            schedule.cancel();
        }

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.address.set(address.clone());

        let Some(address) = address else {
            self.inner.store.update(|draft| {
                draft.balance = None;
                draft.formatted_balance = None;
                draft.loading = false;
            });
            debug!("Balance watcher cleared");
            return;
        };

        match self.poll_period {
            Some(period) => info!("Watching balance of {} every {:?}", address, period),
            None => info!("Fetching balance of {}", address),
        }

        let handle = tokio::spawn(run_schedule(self.inner.clone(), self.poll_period));
        self.schedule = Some(Schedule { handle });
    }

    /// Fetch now for the current address
    pub async fn refresh_balance(&self) {
        self.inner.fetch().await;
    }
}

impl Drop for BalanceWatcher {
    fn drop(&mut self) {
        if let Some(schedule) = self.schedule.take() {
            schedule.cancel();
        }
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
    }
}

async fn run_schedule(inner: Arc<WatcherInner>, period: Option<Duration>) {
    let Some(period) = period else {
        inner.fetch().await;
        return;
    };

    // First tick completes immediately
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        inner.fetch().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, ProviderError, ProviderEvent, METHOD_GET_BALANCE};
    use serde_json::json;
    use std::sync::Mutex;

    const ADDRESS: &str = "0x1234567890123456789012345678901234567890";
    const OTHER: &str = "0x00000000000000000000000000000000000000bb";

    fn wallet() -> Arc<MockProvider> {
        Arc::new(MockProvider::with_account(ADDRESS, "0x1", "0x14d1120d7b160000"))
    }

    fn dyn_provider(mock: &Arc<MockProvider>) -> Option<Arc<dyn Provider>> {
        let provider: Arc<dyn Provider> = mock.clone();
        Some(provider)
    }

    fn fetches_for(mock: &MockProvider, address: &str) -> usize {
        mock.requests()
            .iter()
            .filter(|r| r.method == METHOD_GET_BALANCE && r.params[0] == json!(address))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_cadence() {
        let mock = wallet();
        let mut watcher = BalanceWatcher::watching(
            dyn_provider(&mock),
            Some(ADDRESS.to_string()),
            BalanceOptions::polling(Duration::from_millis(1000)),
        );
        assert!(watcher.is_polling());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.request_count(METHOD_GET_BALANCE), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mock.request_count(METHOD_GET_BALANCE), 2);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mock.request_count(METHOD_GET_BALANCE), 3);

        watcher.set_address(None);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(mock.request_count(METHOD_GET_BALANCE), 3);
        assert_eq!(*watcher.state(), BalanceState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let mock = wallet();
        let watcher = BalanceWatcher::watching(
            dyn_provider(&mock),
            Some(ADDRESS.to_string()),
            BalanceOptions::polling(Duration::from_millis(1000)),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.listener_count(EventKind::AccountsChanged), 1);

        drop(watcher);
        tokio::time::sleep(Duration::from_millis(5000)).await;

        assert_eq!(mock.request_count(METHOD_GET_BALANCE), 1);
        assert_eq!(mock.listener_count(EventKind::AccountsChanged), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_change_restarts_schedule() {
        let mock = wallet();
        let mut watcher = BalanceWatcher::watching(
            dyn_provider(&mock),
            Some(ADDRESS.to_string()),
            BalanceOptions::polling(Duration::from_millis(1000)),
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fetches_for(&mock, ADDRESS), 2);

        watcher.set_address(Some(OTHER.to_string()));
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(fetches_for(&mock, ADDRESS), 2);
        assert_eq!(fetches_for(&mock, OTHER), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_fetch_without_auto_refresh() {
        let mock = wallet();
        let watcher = BalanceWatcher::watching(
            dyn_provider(&mock),
            Some(ADDRESS.to_string()),
            BalanceOptions {
                auto_refresh: false,
                refresh_interval: Some(Duration::from_millis(1000)),
                on_balance_changed: None,
            },
        );
        assert!(!watcher.is_polling());

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(mock.request_count(METHOD_GET_BALANCE), 1);
    }

    #[tokio::test]
    async fn test_success_populates_state_and_callback() {
        let mock = wallet();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut watcher = BalanceWatcher::new(
            dyn_provider(&mock),
            BalanceOptions::default()
                .on_balance_changed(move |wei| sink.lock().unwrap().push(wei.to_string())),
        );

        watcher.set_address(Some(ADDRESS.to_string()));
        watcher.refresh_balance().await;

        let state = watcher.state();
        assert_eq!(state.balance.as_deref(), Some("1500000000000000000"));
        assert_eq!(state.formatted_balance.as_deref(), Some("1.5000"));
        assert!(!state.loading);
        assert_eq!(state.error, None);
        assert!(seen.lock().unwrap().contains(&"1500000000000000000".to_string()));
    }

    #[tokio::test]
    async fn test_failure_sets_error() {
        let mock = wallet();
        mock.respond(METHOD_GET_BALANCE, Err(ProviderError::new(-32000, "rate limited")));
        let mut watcher = BalanceWatcher::new(dyn_provider(&mock), BalanceOptions::default());
        watcher.set_address(Some(ADDRESS.to_string()));

        watcher.refresh_balance().await;

        let state = watcher.state();
        assert!(!state.loading);
        assert!(state.error.as_deref().unwrap_or_default().contains("rate limited"));
        assert_eq!(state.balance, None);
        assert_eq!(state.formatted_balance, None);
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let mut watcher = BalanceWatcher::new(None, BalanceOptions::default());
        watcher.set_address(Some(ADDRESS.to_string()));

        watcher.refresh_balance().await;

        assert_eq!(watcher.state().error.as_deref(), Some("provider not found"));
        assert!(!watcher.state().loading);
    }

    #[tokio::test]
    async fn test_loading_while_in_flight() {
        let mock = wallet();
        mock.hold(METHOD_GET_BALANCE);
        let watcher = BalanceWatcher::watching(
            dyn_provider(&mock),
            Some(ADDRESS.to_string()),
            BalanceOptions::default(),
        );

        let mut rx = watcher.subscribe();
        rx.wait_for(|s| s.loading).await.unwrap();
        assert_eq!(watcher.state().balance, None);

        mock.release(METHOD_GET_BALANCE, 1);
        rx.wait_for(|s| !s.loading && s.balance.is_some()).await.unwrap();
        assert_eq!(watcher.state().formatted_balance.as_deref(), Some("1.5000"));
    }

    #[tokio::test]
    async fn test_address_change_aborts_in_flight_fetch() {
        let mock = wallet();
        mock.hold(METHOD_GET_BALANCE);
        let mut watcher = BalanceWatcher::watching(
            dyn_provider(&mock),
            Some(ADDRESS.to_string()),
            BalanceOptions::default(),
        );
        let mut rx = watcher.subscribe();
        rx.wait_for(|s| s.loading).await.unwrap();

        watcher.set_address(Some(OTHER.to_string()));
        mock.release(METHOD_GET_BALANCE, 1);
        rx.wait_for(|s| !s.loading && s.balance.is_some()).await.unwrap();

        assert_eq!(fetches_for(&mock, ADDRESS), 1);
        assert_eq!(fetches_for(&mock, OTHER), 1);
        assert_eq!(watcher.address().as_deref(), Some(OTHER));
        assert_eq!(watcher.state().formatted_balance.as_deref(), Some("1.5000"));
    }

    #[tokio::test]
    async fn test_accounts_changed_refetches() {
        let mock = wallet();
        let watcher = BalanceWatcher::watching(
            dyn_provider(&mock),
            Some(ADDRESS.to_string()),
            BalanceOptions::default(),
        );
        let mut rx = watcher.subscribe();
        rx.wait_for(|s| s.balance.is_some()).await.unwrap();

        mock.respond(METHOD_GET_BALANCE, Ok(json!("0x0")));
        mock.emit(ProviderEvent::AccountsChanged(vec![OTHER.to_string()]));

        rx.wait_for(|s| s.balance.as_deref() == Some("0")).await.unwrap();
        // Still watching its own address
        assert_eq!(fetches_for(&mock, ADDRESS), 2);
    }
}
