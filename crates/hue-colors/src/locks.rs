//! Lock table snapshots.

use std::collections::BTreeMap;

use hue_store::{KeyPath, KeyValueStore, ParticipantId, Revision, StoreError};
use serde_json::Value;

use crate::color::{Color, Palette};

/// Snapshot of the lock namespace: storage token → holder.
///
/// A slot whose value is not a string is locked with no known holder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTable {
    holders: BTreeMap<String, Option<ParticipantId>>,
    revision: Revision,
}

impl LockTable {
    /// Build a table from known holders.
    pub fn from_holders(holders: BTreeMap<String, ParticipantId>, revision: Revision) -> Self {
        Self {
            holders: holders.into_iter().map(|(token, id)| (token, Some(id))).collect(),
            revision,
        }
    }

    /// Interpret the value read from the lock namespace.
    ///
    /// An absent or null namespace is an empty table. A slot holding
    /// something other than a string still counts as locked, but belongs to
    /// nobody.
    pub fn from_value(
        namespace: &KeyPath,
        value: Option<Value>,
        revision: Revision,
    ) -> Result<Self, StoreError> {
        let map = match value {
            None | Some(Value::Null) => return Ok(Self::from_holders(BTreeMap::new(), revision)),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(StoreError::InvalidValue {
                    key: namespace.clone(),
                    reason: format!("expected a lock table object, found {other}"),
                })
            }
        };

        let holders = map
            .into_iter()
            .map(|(token, holder)| match holder {
                Value::String(id) => (token, Some(ParticipantId::new(id))),
                _ => (token, None),
            })
            .collect();
        Ok(Self { holders, revision })
    }

    /// Read the lock namespace from the store.
    pub async fn fetch(store: &dyn KeyValueStore, namespace: &KeyPath) -> Result<Self, StoreError> {
        let fetched = store.fetch(namespace).await?;
        Self::from_value(namespace, fetched.value, fetched.revision)
    }

    /// Revision the snapshot was taken at.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Check if a storage token is locked.
    pub fn is_locked(&self, token: &str) -> bool {
        self.holders.contains_key(token)
    }

    /// Holder of a storage token.
    pub fn holder(&self, token: &str) -> Option<&ParticipantId> {
        self.holders.get(token).and_then(Option::as_ref)
    }

    /// Storage tokens locked by `participant`.
    pub fn tokens_held_by<'a>(
        &'a self,
        participant: &'a ParticipantId,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.holders
            .iter()
            .filter(move |&(_, holder)| holder.as_ref() == Some(participant))
            .map(|(token, _)| token.as_str())
    }

    /// The color locked to `participant`, normalized to its palette form.
    ///
    /// If the participant somehow holds several locks, a palette member wins
    /// over a stale token.
    pub fn color_held_by(&self, participant: &ParticipantId, palette: &Palette) -> Option<Color> {
        let held: Vec<Color> = self
            .tokens_held_by(participant)
            .map(|token| palette.resolve(token))
            .collect();
        held.iter()
            .find(|color| palette.contains(color))
            .or_else(|| held.first())
            .cloned()
    }

    /// Number of locked slots.
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    /// Check if no slot is locked.
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns() -> KeyPath {
        KeyPath::new("hue/locks")
    }

    #[test]
    fn empty_namespace_is_empty_table() {
        let table = LockTable::from_value(&ns(), None, Revision(3)).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.revision(), Revision(3));

        let table = LockTable::from_value(&ns(), Some(Value::Null), Revision(3)).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn scalar_namespace_is_rejected() {
        let err = LockTable::from_value(&ns(), Some(json!("nope")), Revision(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
    }

    #[test]
    fn non_string_holders_still_lock() {
        let table = LockTable::from_value(&ns(), Some(json!({"aa": 7})), Revision(1)).unwrap();
        assert!(table.is_locked("aa"));
        assert_eq!(table.holder("aa"), None);
    }

    #[test]
    fn numeric_holder_is_not_a_participant() {
        let palette = Palette::default();
        let me = ParticipantId::new("1234");
        let table = LockTable::from_value(
            &ns(),
            Some(json!({"4a90e2": 1234, "f5a623": ["1234"]})),
            Revision(1),
        )
        .unwrap();

        assert_eq!(table.tokens_held_by(&me).count(), 0);
        assert_eq!(table.color_held_by(&me, &palette), None);
        assert!(table.is_locked("4a90e2"));
    }

    #[test]
    fn finds_color_held_by_participant() {
        let palette = Palette::default();
        let me = ParticipantId::new("1234");
        let table = LockTable::from_value(
            &ns(),
            Some(json!({"4a90e2": "1234", "f5a623": "5678"})),
            Revision(1),
        )
        .unwrap();

        assert_eq!(table.color_held_by(&me, &palette), Some(Color::new("#4a90e2")));
        assert_eq!(table.color_held_by(&ParticipantId::new("nobody"), &palette), None);
    }

    #[test]
    fn palette_member_wins_over_stale_token() {
        let palette = Palette::default();
        let me = ParticipantId::new("1234");
        // "000001" sorts first but is not a palette member.
        let table = LockTable::from_value(
            &ns(),
            Some(json!({"000001": "1234", "7ed321": "1234"})),
            Revision(1),
        )
        .unwrap();

        assert_eq!(table.color_held_by(&me, &palette), Some(Color::new("#7ed321")));
        assert_eq!(table.tokens_held_by(&me).count(), 2);
    }

    #[test]
    fn stale_token_is_reported_with_prefix() {
        let palette = Palette::default();
        let me = ParticipantId::new("1234");
        let table =
            LockTable::from_value(&ns(), Some(json!({"000001": "1234"})), Revision(1)).unwrap();

        assert_eq!(table.color_held_by(&me, &palette), Some(Color::new("#000001")));
    }
}
