//! Instrumented store for tests.
//!
//! [`ScriptedStore`] wraps a [`MemoryStore`] and records every call made
//! through it. Tests can queue stale snapshots for a key, which are served
//! instead of the live value on the next fetches, and inject failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::store::{Fetched, KeyValueStore, Revision, WriteOptions};
use crate::{KeyPath, MemoryStore};

/// A recorded write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub key: KeyPath,
    pub value: Value,
    pub options: WriteOptions,
    pub outcome: std::result::Result<Revision, StoreError>,
}

#[derive(Debug, Default)]
struct Script {
    fetches: HashMap<KeyPath, usize>,
    writes: Vec<WriteCall>,
    removes: Vec<KeyPath>,
    stale: HashMap<KeyPath, VecDeque<Option<Value>>>,
    fail_fetch: HashMap<KeyPath, StoreError>,
    fail_write: HashMap<KeyPath, StoreError>,
    fail_remove: HashMap<KeyPath, StoreError>,
}

/// A recording, fault-injecting store.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    inner: Arc<MemoryStore>,
    script: Mutex<Script>,
}

impl ScriptedStore {
    /// Wrap a fresh in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing store.
    pub fn wrap(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            script: Mutex::default(),
        }
    }

    /// The live store underneath.
    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `value` instead of the live value on the next fetch of `key`.
    /// Queued snapshots are served in order, one per fetch.
    pub fn queue_snapshot(&self, key: &KeyPath, value: Option<Value>) {
        self.script()
            .stale
            .entry(key.clone())
            .or_default()
            .push_back(value);
    }

    /// Fail every fetch of `key` with `error`.
    pub fn fail_fetches(&self, key: &KeyPath, error: StoreError) {
        self.script().fail_fetch.insert(key.clone(), error);
    }

    /// Fail every write to `key` with `error`.
    pub fn fail_writes(&self, key: &KeyPath, error: StoreError) {
        self.script().fail_write.insert(key.clone(), error);
    }

    /// Fail every removal of `key` with `error`.
    pub fn fail_removes(&self, key: &KeyPath, error: StoreError) {
        self.script().fail_remove.insert(key.clone(), error);
    }

    /// Number of fetches issued for `key`.
    pub fn fetch_count(&self, key: &KeyPath) -> usize {
        self.script().fetches.get(key).copied().unwrap_or(0)
    }

    /// Every write issued, in order.
    pub fn writes(&self) -> Vec<WriteCall> {
        self.script().writes.clone()
    }

    /// Writes issued to keys at or below `key`.
    pub fn writes_under(&self, key: &KeyPath) -> Vec<WriteCall> {
        self.script()
            .writes
            .iter()
            .filter(|w| key.covers(&w.key))
            .cloned()
            .collect()
    }

    /// Every removal issued, in order.
    pub fn removes(&self) -> Vec<KeyPath> {
        self.script().removes.clone()
    }

    /// Forget recorded calls, keeping queued snapshots and failures.
    pub fn reset_calls(&self) {
        let mut script = self.script();
        script.fetches.clear();
        script.writes.clear();
        script.removes.clear();
    }
}

#[async_trait]
impl KeyValueStore for ScriptedStore {
    async fn fetch(&self, key: &KeyPath) -> Result<Fetched> {
        let stale = {
            let mut script = self.script();
            *script.fetches.entry(key.clone()).or_default() += 1;
            if let Some(err) = script.fail_fetch.get(key) {
                return Err(err.clone());
            }
            script.stale.get_mut(key).and_then(VecDeque::pop_front)
        };

        let live = self.inner.fetch(key).await?;
        Ok(match stale {
            Some(value) => Fetched {
                value,
                revision: live.revision,
            },
            None => live,
        })
    }

    async fn write(&self, key: &KeyPath, value: Value, options: WriteOptions) -> Result<Revision> {
        let injected = self.script().fail_write.get(key).cloned();
        let outcome = match injected {
            Some(err) => Err(err),
            None => self.inner.write(key, value.clone(), options.clone()).await,
        };
        self.script().writes.push(WriteCall {
            key: key.clone(),
            value,
            options,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>> {
        let injected = {
            let mut script = self.script();
            script.removes.push(key.clone());
            script.fail_remove.get(key).cloned()
        };
        match injected {
            Some(err) => Err(err),
            None => self.inner.remove(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn serves_queued_snapshots_once() {
        let store = ScriptedStore::new();
        let key = KeyPath::new("hue/locks");
        store
            .inner()
            .write(&key.join("aa"), json!("p1"), WriteOptions::overwrite())
            .await
            .unwrap();
        store.queue_snapshot(&key, None);

        assert_eq!(store.fetch(&key).await.unwrap().value, None);
        assert_eq!(store.fetch(&key).await.unwrap().value, Some(json!({"aa": "p1"})));
        assert_eq!(store.fetch_count(&key), 2);
    }

    #[tokio::test]
    async fn records_write_outcomes() {
        let store = ScriptedStore::new();
        let key = KeyPath::new("hue/locks/aa");

        store.write(&key, json!("p1"), WriteOptions::exclusive()).await.unwrap();
        let err = store
            .write(&key, json!("p2"), WriteOptions::exclusive())
            .await
            .unwrap_err();

        assert!(err.is_collision());
        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].outcome.is_ok());
        assert!(writes[1].outcome.as_ref().unwrap_err().is_collision());
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = ScriptedStore::new();
        let key = KeyPath::new("k");
        store.fail_writes(&key, StoreError::Unavailable("offline".into()));
        store.fail_removes(&key, StoreError::PermissionDenied { key: key.clone() });

        assert_eq!(
            store.write(&key, json!(1), WriteOptions::overwrite()).await,
            Err(StoreError::Unavailable("offline".into()))
        );
        assert!(store.remove(&key).await.is_err());
        assert!(store.inner().is_empty().await);
    }
}
