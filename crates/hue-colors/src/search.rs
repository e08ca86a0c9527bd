//! Lock search: claim the first free palette color.
//!
//! The search walks the palette colors that the current lock table snapshot
//! shows as free and tries an exclusive write of the participant id into
//! each slot. A collision means another participant won that slot, so the
//! next candidate is tried. If every candidate collides the snapshot was
//! stale; the table is fetched again and the walk restarts, up to
//! `max_refetches` times.

use hue_store::{KeyPath, KeyValueStore, ParticipantId, WriteOptions};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::color::{Color, Palette};
use crate::error::Result;
use crate::locks::LockTable;

/// Outcome of one pass over the free candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanOutcome {
    /// A lock was taken.
    Acquired(Color),
    /// The snapshot shows every palette color locked.
    Exhausted,
    /// Every candidate collided: the snapshot is out of date.
    Stale,
}

/// One lock search for one participant.
pub struct LockSearch<'a> {
    store: &'a dyn KeyValueStore,
    palette: &'a Palette,
    namespace: &'a KeyPath,
    participant: &'a ParticipantId,
    owner: &'a KeyPath,
    locks: LockTable,
    max_refetches: u32,
}

impl<'a> LockSearch<'a> {
    /// Prepare a search.
    ///
    /// `owner` is the participant record key; locks taken by the search are
    /// removed by the store when that record is removed.
    pub fn new(
        store: &'a dyn KeyValueStore,
        palette: &'a Palette,
        namespace: &'a KeyPath,
        participant: &'a ParticipantId,
        owner: &'a KeyPath,
        locks: LockTable,
    ) -> Self {
        Self {
            store,
            palette,
            namespace,
            participant,
            owner,
            locks,
            max_refetches: crate::config::DEFAULT_MAX_REFETCHES,
        }
    }

    /// Bound the number of lock table re-fetches. A stale snapshot is always
    /// re-checked at least once, so zero counts as one.
    #[must_use]
    pub fn max_refetches(mut self, max_refetches: u32) -> Self {
        self.max_refetches = max_refetches.max(1);
        self
    }

    /// Run the search.
    ///
    /// Returns a freshly locked palette color, or the default color when the
    /// palette is fully locked. Only store errors other than collisions fail
    /// the search.
    pub async fn acquire(mut self) -> Result<Color> {
        let mut refetches = 0;
        loop {
            match self.scan().await? {
                ScanOutcome::Acquired(color) => {
                    info!(participant = %self.participant, %color, "acquired color lock");
                    return Ok(color);
                }
                ScanOutcome::Exhausted => {
                    debug!(
                        participant = %self.participant,
                        locked = self.locks.len(),
                        "palette exhausted, using default color"
                    );
                    return Ok(self.palette.default_color().clone());
                }
                ScanOutcome::Stale if refetches >= self.max_refetches => {
                    warn!(
                        participant = %self.participant,
                        refetches,
                        "lock table kept changing, using default color"
                    );
                    return Ok(self.palette.default_color().clone());
                }
                ScanOutcome::Stale => {
                    refetches += 1;
                    debug!(
                        participant = %self.participant,
                        refetches,
                        revision = %self.locks.revision(),
                        "all candidates collided, re-fetching lock table"
                    );
                    self.locks = LockTable::fetch(self.store, self.namespace).await?;
                }
            }
        }
    }

    async fn scan(&self) -> Result<ScanOutcome> {
        let mut candidates = self.palette.available(&self.locks);
        if candidates.is_empty() {
            return Ok(ScanOutcome::Exhausted);
        }

        while let Some(candidate) = candidates.pop_front() {
            let key = self.namespace.join(candidate.storage_token());
            let options = WriteOptions::exclusive().cascade(self.owner.clone());
            match self
                .store
                .write(&key, Value::String(self.participant.to_string()), options)
                .await
            {
                Ok(_) => return Ok(ScanOutcome::Acquired(candidate)),
                Err(err) if err.is_collision() => {
                    debug!(participant = %self.participant, color = %candidate, "color taken, trying next");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(ScanOutcome::Stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::DEFAULT_COLOR;
    use hue_store::scripted::ScriptedStore;
    use hue_store::{MemoryStore, StoreError};
    use serde_json::json;
    use std::sync::Arc;

    fn palette() -> Palette {
        Palette::new(
            ["#aa0000", "#bb0000", "#cc0000", "#dd0000"]
                .into_iter()
                .map(Color::new)
                .collect(),
            Color::new(DEFAULT_COLOR),
        )
        .unwrap()
    }

    fn ns() -> KeyPath {
        KeyPath::new("hue/locks")
    }

    async fn lock(store: &MemoryStore, token: &str, holder: &str) {
        store
            .write(&ns().join(token), json!(holder), WriteOptions::exclusive())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn takes_first_free_color() {
        let store = MemoryStore::new();
        lock(&store, "aa0000", "other").await;
        let locks = LockTable::fetch(&store, &ns()).await.unwrap();

        let palette = palette();
        let (ns, me, owner) = (ns(), ParticipantId::new("me"), KeyPath::new(".users/me"));
        let color = LockSearch::new(&store, &palette, &ns, &me, &owner, locks)
            .acquire()
            .await
            .unwrap();

        assert_eq!(color, Color::new("#bb0000"));
        assert_eq!(store.fetch(&ns.join("bb0000")).await.unwrap().value, Some(json!("me")));
    }

    #[tokio::test]
    async fn exhausted_palette_takes_no_lock() {
        let store = ScriptedStore::new();
        for token in ["aa0000", "bb0000", "cc0000", "dd0000"] {
            lock(store.inner(), token, "other").await;
        }
        let locks = LockTable::fetch(&store, &ns()).await.unwrap();

        let palette = palette();
        let (ns, me, owner) = (ns(), ParticipantId::new("me"), KeyPath::new(".users/me"));
        let color = LockSearch::new(&store, &palette, &ns, &me, &owner, locks)
            .acquire()
            .await
            .unwrap();

        assert_eq!(color, Color::new(DEFAULT_COLOR));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn collision_moves_to_next_candidate() {
        let store = ScriptedStore::new();
        // The snapshot is empty but #aa0000 is already taken.
        lock(store.inner(), "aa0000", "other").await;

        let palette = palette();
        let (ns, me, owner) = (ns(), ParticipantId::new("me"), KeyPath::new(".users/me"));
        let color = LockSearch::new(&store, &palette, &ns, &me, &owner, LockTable::default())
            .acquire()
            .await
            .unwrap();

        assert_eq!(color, Color::new("#bb0000"));
        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].outcome.as_ref().unwrap_err().is_collision());
        assert_eq!(writes[1].options, WriteOptions::exclusive().cascade(owner.clone()));
        assert_eq!(store.fetch_count(&ns), 0);
    }

    #[tokio::test]
    async fn stale_snapshot_refetches_then_succeeds() {
        let store = ScriptedStore::new();
        for token in ["aa0000", "bb0000", "cc0000"] {
            lock(store.inner(), token, "other").await;
        }
        // Snapshot says #dd0000 is taken too, live table has it free.
        let mut holders = std::collections::BTreeMap::new();
        holders.insert("dd0000".to_string(), ParticipantId::new("gone"));
        let stale = LockTable::from_holders(holders, Default::default());

        let palette = palette();
        let (ns, me, owner) = (ns(), ParticipantId::new("me"), KeyPath::new(".users/me"));
        let color = LockSearch::new(&store, &palette, &ns, &me, &owner, stale)
            .acquire()
            .await
            .unwrap();

        assert_eq!(color, Color::new("#dd0000"));
        assert_eq!(store.fetch_count(&ns), 1);
    }

    #[tokio::test]
    async fn zero_bound_still_rechecks_stale_snapshot() {
        let store = ScriptedStore::new();
        lock(store.inner(), "aa0000", "other").await;
        // The snapshot shows everything but #aa0000 taken; live only #aa0000 is.
        let mut holders = std::collections::BTreeMap::new();
        for token in ["bb0000", "cc0000", "dd0000"] {
            holders.insert(token.to_string(), ParticipantId::new("gone"));
        }
        let stale = LockTable::from_holders(holders, Default::default());

        let palette = palette();
        let (ns, me, owner) = (ns(), ParticipantId::new("me"), KeyPath::new(".users/me"));
        let color = LockSearch::new(&store, &palette, &ns, &me, &owner, stale)
            .max_refetches(0)
            .acquire()
            .await
            .unwrap();

        assert_eq!(color, Color::new("#bb0000"));
        assert_eq!(store.fetch_count(&ns), 1);
    }

    #[tokio::test]
    async fn refetch_bound_degrades_to_default() {
        let store = ScriptedStore::new();
        for token in ["aa0000", "bb0000", "cc0000", "dd0000"] {
            lock(store.inner(), token, "other").await;
        }
        let ns = ns();
        // Every fetch claims the table is empty.
        for _ in 0..3 {
            store.queue_snapshot(&ns, None);
        }

        let palette = palette();
        let (me, owner) = (ParticipantId::new("me"), KeyPath::new(".users/me"));
        let color = LockSearch::new(&store, &palette, &ns, &me, &owner, LockTable::default())
            .max_refetches(2)
            .acquire()
            .await
            .unwrap();

        assert_eq!(color, Color::new(DEFAULT_COLOR));
        assert_eq!(store.fetch_count(&ns), 2);
        assert_eq!(store.writes().len(), 12);
    }

    #[tokio::test]
    async fn store_errors_abort() {
        let store = ScriptedStore::new();
        let ns = ns();
        store.fail_writes(&ns.join("aa0000"), StoreError::Unavailable("offline".into()));

        let palette = palette();
        let (me, owner) = (ParticipantId::new("me"), KeyPath::new(".users/me"));
        let err = LockSearch::new(&store, &palette, &ns, &me, &owner, LockTable::default())
            .acquire()
            .await
            .unwrap_err();

        assert!(matches!(err, crate::Error::Store(StoreError::Unavailable(_))));
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_searches_never_share_a_color() {
        let store = Arc::new(MemoryStore::new());
        let palette = Arc::new(palette());

        let mut tasks = Vec::new();
        for i in 0..6 {
            let store = store.clone();
            let palette = palette.clone();
            tasks.push(tokio::spawn(async move {
                let (ns, me) = (ns(), ParticipantId::new(format!("p{i}")));
                let owner = me.record_key();
                LockSearch::new(&*store, &palette, &ns, &me, &owner, LockTable::default())
                    .acquire()
                    .await
            }));
        }

        let mut colors = Vec::new();
        for task in tasks {
            colors.push(task.await.unwrap().unwrap());
        }
        let defaults = colors.iter().filter(|c| c.as_str() == DEFAULT_COLOR).count();
        let mut locked: Vec<_> = colors.iter().filter(|c| c.as_str() != DEFAULT_COLOR).collect();
        locked.sort();
        locked.dedup();

        assert_eq!(locked.len(), 4);
        assert_eq!(defaults, 2);
    }
}
