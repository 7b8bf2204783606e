//! Draft-update state container
//!
//! Holds an immutable snapshot (`Arc<T>`) and produces the next snapshot by
//! applying edits to a throwaway draft. Subtrees kept behind `Arc` are shared
//! between snapshots until a producer touches them (`Arc::make_mut`).
//!
//! ```
//! use yd_wallet::store::Store;
//!
//! #[derive(Clone, Default)]
//! struct Counter { count: u32, name: String }
//!
//! let store = Store::new(Counter::default());
//! store.update(|draft| {
//!     draft.count += 1;
//!     draft.name = "updated".to_string();
//! });
//! assert_eq!(store.get().count, 1);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

/// A mutable working copy handed to a producer for a single update
pub type Draft<'a, T> = &'a mut T;

/// Producer accepted by [`Store::apply`]: a replacement value or a mutator
pub enum Update<T> {
    /// Replace the whole value
    Replace(T),
    /// Edit a draft of the current value
    Produce(Box<dyn FnOnce(&mut T) + Send>),
}

impl<T> Update<T> {
    /// Wrap a mutator closure
    pub fn produce<F>(f: F) -> Self
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        Update::Produce(Box::new(f))
    }
}

impl<T> From<T> for Update<T> {
    fn from(value: T) -> Self {
        Update::Replace(value)
    }
}

impl<T> fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Replace(_) => f.write_str("Update::Replace(..)"),
            Update::Produce(_) => f.write_str("Update::Produce(..)"),
        }
    }
}

/// State container exposing `(state, update)`
pub struct Store<T> {
    tx: watch::Sender<Arc<T>>,
    /// Held by writers so updates apply one after another
    write: Mutex<()>,
}

impl<T: Clone> Store<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self {
            tx,
            write: Mutex::new(()),
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last fully applied snapshot
    pub fn get(&self) -> Arc<T> {
        self.tx.borrow().clone()
    }

    /// Apply edits to a draft of the current value and publish the result.
    ///
    /// The producer runs under the store's write lock, so concurrent updates
    /// are applied one after another and readers never see a half-edited
    /// value. Whatever the producer returns is handed back to the caller.
    /// Calling `update` again from inside the producer deadlocks.
    pub fn update<R, F>(&self, producer: F) -> R
    where
        F: FnOnce(Draft<'_, T>) -> R,
    {
        let _guard = self.lock_writes();
        let mut draft = T::clone(&self.tx.borrow());
        let out = producer(&mut draft);
        self.tx.send_replace(Arc::new(draft));
        out
    }

    /// Replace the current value
    pub fn set(&self, value: T) {
        let _guard = self.lock_writes();
        self.tx.send_replace(Arc::new(value));
    }

    /// Apply either form of [`Update`]
    pub fn apply(&self, update: Update<T>) {
        match update {
            Update::Replace(value) => self.set(value),
            Update::Produce(f) => self.update(f),
        }
    }

    /// Watch for new snapshots
    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

impl<T: Clone + Default> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("value", &*self.tx.borrow()).finish()
    }
}
