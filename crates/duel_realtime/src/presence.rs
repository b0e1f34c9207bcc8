//! Presence table maintained from `presence_state` and `presence_diff` frames.
//!
//! The table maps a presence key (a participant id) to the list of metadata
//! records tracked under that key, one per physical session. It is always the
//! result of the most recent full sync plus the diffs applied after it; diffs
//! that arrive before the first sync are discarded because they have nothing
//! to be relative to.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One tracked metadata record.
pub type PresenceMeta = Map<String, Value>;

/// Snapshot of the whole table, keyed by presence key in sorted order.
pub type PresenceSnapshot = BTreeMap<String, Vec<PresenceMeta>>;

/// Presence table for a single channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceTable {
    entries: PresenceSnapshot,
    synced: bool,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the table with a full `presence_state` payload.
    pub fn apply_state(&mut self, payload: &Value) {
        self.entries = normalize(payload);
        self.synced = true;
    }

    /// Merges a `presence_diff` payload (`{joins, leaves}`) into the table.
    ///
    /// Joins are merged by meta identity; leaves remove the metas with a
    /// matching identity and drop keys left empty.
    ///
    /// # Returns
    ///
    /// `false` if the diff was ignored because no full sync has been applied.
    pub fn apply_diff(&mut self, payload: &Value) -> bool {
        if !self.synced {
            return false;
        }

        let joins = normalize(payload.get("joins").unwrap_or(&Value::Null));
        let leaves = normalize(payload.get("leaves").unwrap_or(&Value::Null));

        for (key, metas) in joins {
            let existing = self.entries.remove(&key).unwrap_or_default();
            self.entries.insert(key, merge_metas(existing, metas));
        }

        for (key, metas) in leaves {
            let Some(existing) = self.entries.get_mut(&key) else {
                continue;
            };
            let leaving: Vec<String> = metas.iter().map(meta_identity).collect();
            existing.retain(|meta| !leaving.contains(&meta_identity(meta)));
            if existing.is_empty() {
                self.entries.remove(&key);
            }
        }

        true
    }

    /// Forgets everything, including whether a sync has been seen.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.synced = false;
    }

    /// Keeps the entries but refuses diffs until the next full sync.
    pub fn mark_stale(&mut self) {
        self.synced = false;
    }

    /// Presence keys currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<&[PresenceMeta]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Returns an owned copy of the table.
    pub fn snapshot(&self) -> PresenceSnapshot {
        self.entries.clone()
    }
}

/// Normalizes a presence payload.
///
/// Each key may map to an array of metas or to `{"metas": [...]}`; any other
/// shape yields an empty list. Non-object metas are skipped.
pub fn normalize(payload: &Value) -> PresenceSnapshot {
    let mut normalized = PresenceSnapshot::new();
    let Some(object) = payload.as_object() else {
        return normalized;
    };

    for (key, value) in object {
        let metas = match value {
            Value::Array(items) => items.as_slice(),
            Value::Object(inner) => match inner.get("metas") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };
        let metas = metas
            .iter()
            .filter_map(|meta| meta.as_object().cloned())
            .collect();
        normalized.insert(key.clone(), metas);
    }

    normalized
}

/// Identity of a meta: its `phx_ref`, or its JSON text when it has none.
fn meta_identity(meta: &PresenceMeta) -> String {
    match meta.get("phx_ref") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => Value::Object(meta.clone()).to_string(),
    }
}

fn merge_metas(existing: Vec<PresenceMeta>, incoming: Vec<PresenceMeta>) -> Vec<PresenceMeta> {
    let mut merged: Vec<(String, PresenceMeta)> = Vec::with_capacity(existing.len() + incoming.len());
    for meta in existing.into_iter().chain(incoming) {
        let identity = meta_identity(&meta);
        match merged.iter_mut().find(|(id, _)| *id == identity) {
            Some(slot) => slot.1 = meta,
            None => merged.push((identity, meta)),
        }
    }
    merged.into_iter().map(|(_, meta)| meta).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn test_normalize_both_shapes() {
        let table = normalize(&json!({
            "a": [{"phx_ref": "1", "name": "A"}],
            "b": {"metas": [{"phx_ref": "2"}, 5, "x"]},
            "c": 17,
        }));
        assert_eq!(table["a"].len(), 1);
        assert_eq!(table["b"].len(), 1);
        assert!(table["c"].is_empty());
    }

    #[test]
    fn test_diff_ignored_before_sync() {
        let mut table = PresenceTable::new();
        let applied = table.apply_diff(&json!({"joins": {"a": [{"phx_ref": "1"}]}, "leaves": {}}));
        assert!(!applied);
        assert!(table.keys().is_empty());
    }

    #[test]
    fn test_join_merge_and_leave() {
        let mut table = PresenceTable::new();
        table.apply_state(&json!({"a": {"metas": [{"phx_ref": "1"}]}}));
        table.apply_diff(&json!({
            "joins": {"a": {"metas": [{"phx_ref": "1", "name": "again"}, {"phx_ref": "2"}]},
                      "b": {"metas": [{"phx_ref": "3"}]}},
            "leaves": {}
        }));
        assert_eq!(table.keys(), vec!["a", "b"]);
        let a = table.get("a").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0]["name"], "again");

        table.apply_diff(&json!({"joins": {}, "leaves": {"a": {"metas": [{"phx_ref": "1"}, {"phx_ref": "2"}]}}}));
        assert_eq!(table.keys(), vec!["b"]);
    }

    #[test]
    fn test_leave_unknown_key_is_noop() {
        let mut table = PresenceTable::new();
        table.apply_state(&json!({"a": [{"phx_ref": "1"}]}));
        table.apply_diff(&json!({"leaves": {"zz": [{"phx_ref": "1"}]}}));
        assert_eq!(table.keys(), vec!["a"]);
    }

    #[test]
    fn test_meta_without_ref_uses_json_identity() {
        let mut table = PresenceTable::new();
        table.apply_state(&json!({}));
        table.apply_diff(&json!({"joins": {"a": [{"name": "x"}, {"name": "x"}, {"name": "y"}]}}));
        assert_eq!(table.get("a").unwrap().len(), 2);
        table.apply_diff(&json!({"leaves": {"a": [{"name": "x"}]}}));
        assert_eq!(table.get("a").unwrap().len(), 1);
    }

    #[test]
    fn test_state_replaces_table() {
        let mut table = PresenceTable::new();
        table.apply_state(&json!({"a": [{"phx_ref": "1"}]}));
        table.apply_state(&json!({"b": [{"phx_ref": "9"}]}));
        assert_eq!(table.keys(), vec!["b"]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(u8, u8),
        Leave(u8, u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0u8..4).prop_map(|(k, r)| Op::Join(k, r)),
            (0u8..4, 0u8..4).prop_map(|(k, r)| Op::Leave(k, r)),
        ]
    }

    fn diff_for(op: &Op) -> Value {
        match op {
            Op::Join(k, r) => json!({
                "joins": { format!("k{k}"): { "metas": [{ "phx_ref": format!("{k}-{r}") }] } },
                "leaves": {}
            }),
            Op::Leave(k, r) => json!({
                "joins": {},
                "leaves": { format!("k{k}"): { "metas": [{ "phx_ref": format!("{k}-{r}") }] } }
            }),
        }
    }

    proptest! {
        #[test]
        fn prop_diffs_match_replay_from_empty(
            initial in proptest::collection::vec(op_strategy(), 0..12),
            later in proptest::collection::vec(op_strategy(), 0..24),
        ) {
            // Reference model: a set of (key, ref) pairs.
            let mut model: BTreeSet<(u8, u8)> = BTreeSet::new();
            let replay = |ops: &[Op], model: &mut BTreeSet<(u8, u8)>| {
                for op in ops {
                    match *op {
                        Op::Join(k, r) => { model.insert((k, r)); }
                        Op::Leave(k, r) => { model.remove(&(k, r)); }
                    }
                }
            };
            replay(&initial, &mut model);

            // Build a full sync from the model, then apply the later diffs.
            let mut state = Map::new();
            for (k, r) in &model {
                let entry = state
                    .entry(format!("k{k}"))
                    .or_insert_with(|| json!({"metas": []}));
                entry["metas"].as_array_mut().unwrap().push(json!({"phx_ref": format!("{k}-{r}")}));
            }
            let mut table = PresenceTable::new();
            table.apply_state(&Value::Object(state));
            for op in &later {
                table.apply_diff(&diff_for(op));
            }

            replay(&later, &mut model);

            let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for (k, r) in &model {
                expected.entry(format!("k{k}")).or_default().insert(format!("{k}-{r}"));
            }
            let actual: BTreeMap<String, BTreeSet<String>> = table
                .snapshot()
                .into_iter()
                .map(|(key, metas)| {
                    let refs = metas
                        .iter()
                        .map(|m| m["phx_ref"].as_str().unwrap().to_string())
                        .collect();
                    (key, refs)
                })
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
