//! Reverse indexes.
//!
//! For each indexed `(type, field, value)` the index store holds the list of
//! root ids whose document contains at least one record of that type with
//! that value. Keys have the form `type/field/value`, or `type/value` for the
//! identifier, with every component percent-encoded like
//! `encodeURIComponent`, so distinct triples never share a key.

use crate::{
    error::Result, schema::Topology, tree::Node, KvStore, Record, RecordId, RootList, TypeDef,
    TypeName, ID_FIELD,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Number, Value};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::sync::Arc;

/// Percent-encode everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

/// Canonical text of an indexable value. `null`, arrays and objects are not
/// indexable.
pub fn index_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(canonical_number(n)),
        _ => None,
    }
}

// 2^53: every integral f64 below this converts to i64 exactly
const MAX_SAFE_FLOAT: f64 = 9_007_199_254_740_992.0;

fn canonical_number(n: &Number) -> String {
    if let Some(f) = n.as_f64().filter(|_| n.is_f64()) {
        if f.fract() == 0.0 && f.abs() < MAX_SAFE_FLOAT {
            return (f as i64).to_string();
        }
    }
    n.to_string()
}

/// Index key for a canonical value.
pub fn index_key(type_name: &str, field: &str, value: &str) -> String {
    let mut key = encode_component(type_name);
    key.push('/');
    if field != ID_FIELD {
        key.push_str(&encode_component(field));
        key.push('/');
    }
    key.push_str(&encode_component(value));
    key
}

/// Fields of `def` that are reverse-indexed. The root type's identifier is
/// not: root documents are stored under their id already.
pub fn indexed_fields<'a>(def: &'a TypeDef, topology: &Topology) -> Vec<&'a str> {
    let is_root = topology.is_root(&def.name);
    def.indexes()
        .filter(|field| !(is_root && *field == ID_FIELD))
        .collect()
}

/// One `(type, field, canonical value)` triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub type_name: TypeName,
    pub field: String,
    pub value: String,
}

impl IndexEntry {
    pub fn key(&self) -> String {
        index_key(&self.type_name, &self.field, &self.value)
    }

    /// Whether some record of this entry's type in `root` still holds the
    /// value.
    fn present_in(&self, root: &Node, topology: &Topology) -> bool {
        root.nodes_at(topology.path_to_type(&self.type_name))
            .into_iter()
            .any(|node| {
                node.fields.get(&self.field).and_then(index_value).as_deref()
                    == Some(self.value.as_str())
            })
    }
}

/// Index changes caused by one mutation of one root document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    added: BTreeSet<IndexEntry>,
    removed: BTreeSet<IndexEntry>,
}

impl IndexDelta {
    /// Record the transition of one record from `old` to `new` state.
    /// `None` means the record did not exist before or no longer exists.
    pub fn record_change(
        &mut self,
        type_name: &str,
        indexed: &[&str],
        old: Option<&Record>,
        new: Option<&Record>,
    ) {
        for field in indexed {
            let before = old.and_then(|r| r.get(*field)).and_then(index_value);
            let after = new.and_then(|r| r.get(*field)).and_then(index_value);
            if before == after {
                continue;
            }

            let entry = |value: String| IndexEntry {
                type_name: type_name.to_string(),
                field: field.to_string(),
                value,
            };
            if let Some(value) = before {
                self.removed.insert(entry(value));
            }
            if let Some(value) = after {
                self.added.insert(entry(value));
            }
        }
    }

    /// Drop removals for values that other records in the updated root
    /// still hold. `None` means the root document is gone.
    pub fn retain_present(&mut self, root: Option<&Node>, topology: &Topology) {
        if let Some(root) = root {
            self.removed.retain(|entry| !entry.present_in(root, topology));
        }
        let added = &self.added;
        self.removed.retain(|entry| !added.contains(entry));
    }

    pub fn added(&self) -> impl Iterator<Item = &IndexEntry> {
        self.added.iter()
    }

    pub fn removed(&self) -> impl Iterator<Item = &IndexEntry> {
        self.removed.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

enum IndexOp {
    Add(String),
    Remove(String),
}

/// Reads and maintains the index store.
pub struct IndexManager {
    store: Arc<dyn KvStore<RootList>>,
    fanout: usize,
}

impl IndexManager {
    /// `fanout` bounds how many index keys one mutation updates at once.
    pub fn new(store: Arc<dyn KvStore<RootList>>, fanout: usize) -> Self {
        Self {
            store,
            fanout: fanout.max(1),
        }
    }

    /// Root ids listed under `key`.
    pub async fn lookup(&self, key: &str) -> Result<Option<RootList>> {
        self.store.get(key).await
    }

    /// Apply a delta for `root_id`. Keys are disjoint, so all updates run
    /// concurrently.
    pub async fn apply(&self, root_id: &str, delta: IndexDelta) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            root = %root_id,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "updating indexes"
        );

        let ops = delta
            .added
            .iter()
            .map(|entry| IndexOp::Add(entry.key()))
            .chain(delta.removed.iter().map(|entry| IndexOp::Remove(entry.key())))
            .collect::<Vec<_>>();

        stream::iter(ops)
            .map(|op| async move {
                match op {
                    IndexOp::Add(key) => self.add(&key, root_id).await,
                    IndexOp::Remove(key) => self.remove(&key, root_id).await,
                }
            })
            .buffer_unordered(self.fanout)
            .try_collect::<Vec<()>>()
            .await?;

        Ok(())
    }

    async fn add(&self, key: &str, root_id: &str) -> Result<()> {
        let mut roots = self.store.get(key).await?.unwrap_or_default();
        if roots.iter().any(|r| r == root_id) {
            return Ok(());
        }
        roots.push(root_id.to_string());
        self.store.set(key, roots).await
    }

    async fn remove(&self, key: &str, root_id: &str) -> Result<()> {
        let Some(mut roots) = self.store.get(key).await? else {
            tracing::warn!(key = %key, root = %root_id, "index entry already gone");
            return Ok(());
        };

        let Some(pos) = roots.iter().position(|r| r == root_id) else {
            tracing::warn!(key = %key, root = %root_id, "root missing from index entry");
            return Ok(());
        };

        roots.remove(pos);
        if roots.is_empty() {
            self.store.delete(key).await?;
            Ok(())
        } else {
            self.store.set(key, roots).await
        }
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("fanout", &self.fanout)
            .finish()
    }
}

/// Intersect `candidates` with `list`, keeping the order of `candidates`.
pub(crate) fn intersect(candidates: &mut Vec<RecordId>, list: &[RecordId]) {
    candidates.retain(|id| list.contains(id));
}
