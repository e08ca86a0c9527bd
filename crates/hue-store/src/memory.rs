//! In-process store implementation.
//!
//! Values are kept as leaves in an ordered map keyed by [`KeyPath`]. Writing
//! an object flattens it into one leaf per scalar, and fetching a namespace
//! reassembles the object from the leaves below it. Each leaf remembers the
//! key its lifetime is tied to, so removing a participant record also
//! removes every lock written with that record as its cascade target.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

use crate::error::{Result, StoreError};
use crate::store::{Fetched, KeyValueStore, Revision, StoreEvent, WriteOptions};
use crate::KeyPath;

/// Capacity of the change notification channel.
const EVENT_CAPACITY: usize = 1024;

/// A stored leaf value.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The value.
    pub value: Value,
    /// Revision of the write that produced this value.
    pub revision: Revision,
    /// Key whose removal also removes this entry.
    pub cascade: Option<KeyPath>,
}

/// Store contents.
#[derive(Debug, Default)]
pub struct MemoryState {
    /// Leaf entries.
    entries: BTreeMap<KeyPath, Entry>,
    /// Revision of the latest mutation.
    revision: Revision,
}

impl MemoryState {
    /// Create empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Number of leaf entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a leaf entry.
    pub fn entry(&self, key: &KeyPath) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Leaves at or below `key`.
    fn covered<'a>(&'a self, key: &'a KeyPath) -> impl Iterator<Item = (&'a KeyPath, &'a Entry)> {
        self.entries.iter().filter(move |(k, _)| key.covers(k))
    }

    /// True if `key` or anything below it holds a value.
    pub fn is_occupied(&self, key: &KeyPath) -> bool {
        self.covered(key).next().is_some()
    }

    /// Read a key, assembling namespaces into objects.
    pub fn get(&self, key: &KeyPath) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            return Some(entry.value.clone());
        }
        let mut root = Map::new();
        let mut found = false;
        for (k, entry) in self.covered(key) {
            if let Some(segments) = key.relative(k) {
                insert_nested(&mut root, &segments, entry.value.clone());
                found = true;
            }
        }
        found.then_some(Value::Object(root))
    }

    /// Write a value. Returns the revision and the leaves written.
    pub fn put(
        &mut self,
        key: &KeyPath,
        value: Value,
        options: &WriteOptions,
    ) -> Result<(Revision, Vec<(KeyPath, Value)>)> {
        if key.is_root() {
            return Err(StoreError::InvalidKey {
                key: key.clone(),
                reason: "cannot write the store root".into(),
            });
        }
        if options.exclusive && self.is_occupied(key) {
            return Err(StoreError::Collision { key: key.clone() });
        }

        // A scalar above the key turns into a namespace.
        let mut ancestor = key.parent();
        while let Some(parent) = ancestor {
            self.entries.remove(&parent);
            ancestor = parent.parent();
        }
        self.entries.retain(|k, _| !key.covers(k));

        let revision = self.revision.next();
        self.revision = revision;

        let mut leaves = Vec::new();
        flatten(key, value, &mut leaves);
        for (leaf, value) in &leaves {
            self.entries.insert(
                leaf.clone(),
                Entry {
                    value: value.clone(),
                    revision,
                    cascade: options.cascade.clone(),
                },
            );
        }
        Ok((revision, leaves))
    }

    /// Remove a key, its descendants and every entry cascading from them.
    ///
    /// Returns the previous value at `key`, the revision, and every removed
    /// leaf key (including cascaded ones).
    pub fn delete(&mut self, key: &KeyPath) -> (Option<Value>, Revision, Vec<KeyPath>) {
        let previous = self.get(key);

        let mut removed: Vec<KeyPath> = Vec::new();
        let mut frontier = vec![key.clone()];
        while let Some(target) = frontier.pop() {
            let doomed: Vec<KeyPath> = self
                .entries
                .iter()
                .filter(|(k, entry)| {
                    target.covers(k)
                        || entry
                            .cascade
                            .as_ref()
                            .is_some_and(|owner| target.covers(owner))
                })
                .map(|(k, _)| k.clone())
                .collect();
            for k in doomed {
                if self.entries.remove(&k).is_some() {
                    frontier.push(k.clone());
                    removed.push(k);
                }
            }
        }

        if !removed.is_empty() {
            self.revision = self.revision.next();
        }
        (previous, self.revision, removed)
    }

    /// Iterate over all leaves.
    pub fn entries(&self) -> impl Iterator<Item = (&KeyPath, &Entry)> {
        self.entries.iter()
    }
}

/// Split an object into one leaf per scalar value.
fn flatten(key: &KeyPath, value: Value, out: &mut Vec<(KeyPath, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (child, value) in map {
                flatten(&key.join(&child), value, out);
            }
        }
        other => out.push((key.clone(), other)),
    }
}

fn insert_nested(node: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let child = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_nested(map, rest, value);
            }
        }
    }
}

/// Shared in-memory store.
///
/// All mutations go through one mutex, which makes exclusive writes a true
/// compare-and-set across every task sharing the store. An optional latency
/// is awaited before each operation so concurrent callers interleave the way
/// they would against a remote store.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<StoreEvent>,
    latency: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::new()),
            events,
            latency: None,
        }
    }

    /// Simulate a round trip of `latency` on every operation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Current store revision.
    pub async fn revision(&self) -> Revision {
        self.state.lock().await.revision()
    }

    /// Number of leaf entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    async fn round_trip(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn fetch(&self, key: &KeyPath) -> Result<Fetched> {
        self.round_trip().await;
        let state = self.state.lock().await;
        trace!(%key, revision = %state.revision(), "fetch");
        Ok(Fetched {
            value: state.get(key),
            revision: state.revision(),
        })
    }

    async fn write(&self, key: &KeyPath, value: Value, options: WriteOptions) -> Result<Revision> {
        self.round_trip().await;
        let (revision, leaves) = {
            let mut state = self.state.lock().await;
            state.put(key, value, &options)?
        };
        debug!(%key, %revision, exclusive = options.exclusive, "write");
        for (key, value) in leaves {
            self.publish(StoreEvent::Written {
                key,
                value,
                revision,
            });
        }
        Ok(revision)
    }

    async fn remove(&self, key: &KeyPath) -> Result<Option<Value>> {
        self.round_trip().await;
        let (previous, revision, removed) = {
            let mut state = self.state.lock().await;
            state.delete(key)
        };
        debug!(%key, %revision, removed = removed.len(), "remove");
        for key in removed {
            self.publish(StoreEvent::Removed { key, revision });
        }
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_and_get_scalar() {
        let mut state = MemoryState::new();
        let key = KeyPath::new("hue/locks/ff0000");

        state.put(&key, json!("p1"), &WriteOptions::overwrite()).unwrap();

        assert_eq!(state.get(&key), Some(json!("p1")));
        assert_eq!(state.revision(), Revision(1));
    }

    #[test]
    fn namespace_reads_as_object() {
        let mut state = MemoryState::new();
        let ns = KeyPath::new("hue/locks");
        state.put(&ns.join("aa"), json!("p1"), &WriteOptions::overwrite()).unwrap();
        state.put(&ns.join("bb"), json!("p2"), &WriteOptions::overwrite()).unwrap();

        assert_eq!(state.get(&ns), Some(json!({"aa": "p1", "bb": "p2"})));
        assert_eq!(state.get(&KeyPath::new("hue")), Some(json!({"locks": {"aa": "p1", "bb": "p2"}})));
        assert_eq!(state.get(&KeyPath::new("missing")), None);
    }

    #[test]
    fn object_writes_flatten() {
        let mut state = MemoryState::new();
        let user = KeyPath::new(".users/1");
        state
            .put(&user, json!({"id": "1", "avatarColor": "#f5a623"}), &WriteOptions::overwrite())
            .unwrap();

        assert_eq!(state.len(), 2);
        assert_eq!(state.get(&user.join("avatarColor")), Some(json!("#f5a623")));
        assert_eq!(state.get(&user), Some(json!({"id": "1", "avatarColor": "#f5a623"})));
    }

    #[test]
    fn overwrite_replaces_subtree() {
        let mut state = MemoryState::new();
        let user = KeyPath::new(".users/1");
        state
            .put(&user, json!({"id": "1", "avatarColor": "#f5a623"}), &WriteOptions::overwrite())
            .unwrap();
        state.put(&user, json!({"id": "1"}), &WriteOptions::overwrite()).unwrap();

        assert_eq!(state.get(&user), Some(json!({"id": "1"})));
    }

    #[test]
    fn exclusive_write_collides() {
        let mut state = MemoryState::new();
        let key = KeyPath::new("hue/locks/ff0000");

        state.put(&key, json!("p1"), &WriteOptions::exclusive()).unwrap();
        let err = state.put(&key, json!("p2"), &WriteOptions::exclusive()).unwrap_err();

        assert!(err.is_collision());
        assert_eq!(state.get(&key), Some(json!("p1")));
    }

    #[test]
    fn exclusive_write_collides_with_namespace() {
        let mut state = MemoryState::new();
        state
            .put(&KeyPath::new("a/b"), json!(1), &WriteOptions::overwrite())
            .unwrap();
        let err = state
            .put(&KeyPath::new("a"), json!(2), &WriteOptions::exclusive())
            .unwrap_err();
        assert!(err.is_collision());
    }

    #[test]
    fn root_write_rejected() {
        let mut state = MemoryState::new();
        let err = state
            .put(&KeyPath::root(), json!(1), &WriteOptions::overwrite())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[test]
    fn writing_below_scalar_replaces_it() {
        let mut state = MemoryState::new();
        state.put(&KeyPath::new("a"), json!("x"), &WriteOptions::overwrite()).unwrap();
        state.put(&KeyPath::new("a/b"), json!("y"), &WriteOptions::overwrite()).unwrap();
        assert_eq!(state.get(&KeyPath::new("a")), Some(json!({"b": "y"})));
    }

    #[test]
    fn delete_cascades() {
        let mut state = MemoryState::new();
        let user = KeyPath::new(".users/1");
        let lock = KeyPath::new("hue/locks/ff0000");
        let other = KeyPath::new("hue/locks/00ff00");

        state.put(&user, json!({"id": "1"}), &WriteOptions::overwrite()).unwrap();
        state
            .put(&lock, json!("1"), &WriteOptions::exclusive().cascade(user.clone()))
            .unwrap();
        state.put(&other, json!("2"), &WriteOptions::exclusive()).unwrap();

        let (previous, _, removed) = state.delete(&user);

        assert_eq!(previous, Some(json!({"id": "1"})));
        assert!(removed.contains(&lock));
        assert_eq!(state.get(&lock), None);
        assert_eq!(state.get(&other), Some(json!("2")));
        let left: Vec<_> = state.entries().map(|(k, e)| (k.clone(), e.cascade.clone())).collect();
        assert_eq!(left, vec![(other, None)]);
    }

    #[test]
    fn delete_cascades_transitively() {
        let mut state = MemoryState::new();
        let a = KeyPath::new("a");
        let b = KeyPath::new("b");
        let c = KeyPath::new("c");
        state.put(&a, json!(1), &WriteOptions::overwrite()).unwrap();
        state.put(&b, json!(2), &WriteOptions::overwrite().cascade(a.clone())).unwrap();
        state.put(&c, json!(3), &WriteOptions::overwrite().cascade(b.clone())).unwrap();

        let (_, _, removed) = state.delete(&a);

        assert_eq!(removed.len(), 3);
        assert!(state.is_empty());
    }

    #[test]
    fn delete_missing_keeps_revision() {
        let mut state = MemoryState::new();
        let (previous, revision, removed) = state.delete(&KeyPath::new("nothing"));
        assert_eq!(previous, None);
        assert_eq!(revision, Revision(0));
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn store_publishes_events() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();
        let key = KeyPath::new("hue/locks/ff0000");

        store.write(&key, json!("p1"), WriteOptions::exclusive()).await.unwrap();
        store.remove(&key).await.unwrap();

        let written = events.recv().await.unwrap();
        assert_eq!(written.key(), &key);
        assert_eq!(
            written,
            StoreEvent::Written {
                key: key.clone(),
                value: json!("p1"),
                revision: Revision(1),
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Removed {
                key,
                revision: Revision(2),
            }
        );
    }

    #[tokio::test]
    async fn fetch_reports_revision() {
        let store = MemoryStore::new();
        let key = KeyPath::new("k");
        let revision = store.write(&key, json!(1), WriteOptions::overwrite()).await.unwrap();

        let fetched = store.fetch(&key).await.unwrap();
        assert_eq!(fetched.value, Some(json!(1)));
        assert_eq!(fetched.revision, revision);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exclusive_write_has_one_winner() {
        let store = std::sync::Arc::new(MemoryStore::new().with_latency(Duration::from_millis(1)));
        let key = KeyPath::new("hue/locks/ff0000");

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                store.write(&key, json!(i), WriteOptions::exclusive()).await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
