//! In-process store. Changes are published straight to subscribers instead
//! of being discovered through the filesystem.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::{validate_key, DocumentStore, StoreError, Subscription, SubscriptionGuard};

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<String, Value>,
    channels: HashMap<String, watch::Sender<u64>>,
}

impl Inner {
    fn channel(&mut self, key: &str) -> &watch::Sender<u64> {
        self.channels
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(0u64).0)
    }

    fn publish(&mut self, key: &str) {
        self.channel(key)
            .send_modify(|version| *version = version.wrapping_add(1));
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    active: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drops a document, as an external process deleting the file would.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        let removed = inner.documents.remove(key);
        if removed.is_some() {
            inner.publish(key);
        }
        removed
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        Ok(self.lock().documents.get(key).cloned())
    }

    async fn write(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut inner = self.lock();
        inner.documents.insert(key.to_string(), document.clone());
        inner.publish(key);
        Ok(())
    }

    async fn create(&self, key: &str, document: &Value) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut inner = self.lock();
        if inner.documents.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        inner.documents.insert(key.to_string(), document.clone());
        inner.publish(key);
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Subscription, StoreError> {
        validate_key(key)?;
        let rx = self.lock().channel(key).subscribe();
        Ok(Subscription::new(
            rx,
            SubscriptionGuard::new(self.active.clone(), None),
        ))
    }

    fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
