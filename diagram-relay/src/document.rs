//! Canonical text per document key, scoped to one room.
//!
//! Each key owns its own async mutex so that reconciliation is serialized
//! per document while edits to different documents run in parallel. The
//! outer map lock is only held long enough to find or create a slot.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::protocol::DocKey;

type Slot = Arc<Mutex<Option<String>>>;

/// Exclusive access to one document's canonical text.
///
/// Held across the whole read-modify-write of a reconciliation.
pub struct DocumentGuard {
    slot: OwnedMutexGuard<Option<String>>,
}

impl DocumentGuard {
    /// Current canonical text, or `fallback` if the document was never written.
    pub fn text_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.slot.as_deref().unwrap_or(fallback)
    }

    pub fn text(&self) -> Option<&str> {
        self.slot.as_deref()
    }

    pub fn replace(&mut self, text: String) {
        *self.slot = Some(text);
    }
}

/// Document key → canonical text.
#[derive(Default)]
pub struct DocumentStore {
    slots: RwLock<HashMap<DocKey, Slot>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock one document for exclusive read-modify-write.
    pub async fn lock(&self, key: &DocKey) -> DocumentGuard {
        let slot = self.slot(key).await;
        DocumentGuard {
            slot: slot.lock_owned().await,
        }
    }

    /// Canonical text for `key`, or `fallback` if there is none yet.
    pub async fn get(&self, key: &DocKey, fallback: &str) -> String {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(key).cloned()
        };
        match slot {
            Some(slot) => slot.lock().await.as_deref().unwrap_or(fallback).to_owned(),
            None => fallback.to_owned(),
        }
    }

    /// Replace canonical text, waiting for any in-flight reconciliation.
    pub async fn set(&self, key: &DocKey, text: impl Into<String>) {
        self.lock(key).await.replace(text.into());
    }

    /// Number of documents that have been touched.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    async fn slot(&self, key: &DocKey) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(key) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().await;
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}
