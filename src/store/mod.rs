//! Keyed JSON document storage with change subscriptions.
//!
//! A deployment only ever uses one key, but nothing below assumes that.
//! Readers learn about new content through [`DocumentStore::subscribe`];
//! how the change is detected (filesystem events, in-process publish) is up
//! to the implementation.

pub mod error;
pub mod file;
pub mod memory;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::watch;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;

lazy_static::lazy_static! {
    /// Keys become file names, so keep them to a safe alphabet.
    static ref KEY_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").unwrap();
}

pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if KEY_REGEX.is_match(key) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current document for `key`, or `None` if it has never been written.
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the document for `key`. Last write wins.
    async fn write(&self, key: &str, document: &Value) -> Result<(), StoreError>;

    /// Writes the document only if `key` is empty.
    /// Returns `StoreError::AlreadyExists` otherwise, leaving the stored
    /// document untouched.
    async fn create(&self, key: &str, document: &Value) -> Result<(), StoreError>;

    /// Registers interest in changes to `key`. The returned subscription
    /// owns whatever resource backs it and releases it on drop.
    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError>;

    /// Number of subscriptions currently alive.
    fn active_subscriptions(&self) -> usize;

    /// Short backend name for diagnostics.
    fn backend(&self) -> &'static str;
}

/// A change feed for one document.
///
/// Signals are coalesced: if several changes land before the holder calls
/// [`Subscription::changed`] again, it wakes up once.
pub struct Subscription {
    changes: watch::Receiver<u64>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    pub(crate) fn new(changes: watch::Receiver<u64>, guard: SubscriptionGuard) -> Self {
        Self {
            changes,
            _guard: guard,
        }
    }

    /// Waits for the next change. Returns `false` once the source is gone
    /// and no further changes can arrive.
    pub async fn changed(&mut self) -> bool {
        self.changes.changed().await.is_ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("version", &*self.changes.borrow())
            .finish()
    }
}

/// Keeps the live-subscription count honest and holds the filesystem
/// watcher, if any, for exactly as long as the subscription lives.
pub(crate) struct SubscriptionGuard {
    watcher: Option<notify::RecommendedWatcher>,
    active: Arc<AtomicUsize>,
}

impl SubscriptionGuard {
    pub(crate) fn new(active: Arc<AtomicUsize>, watcher: Option<notify::RecommendedWatcher>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { watcher, active }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        // Stop the watcher before the count drops so a zero count really
        // means no watch is registered.
        drop(self.watcher.take());
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
