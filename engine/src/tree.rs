//! Physical document tree.
//!
//! A root record and every record nested below it are persisted together as
//! one JSON document. Child collections sit under synthetic virtual keys
//! (`"$" + child type`) mapping child id to the nested document:
//!
//! ```json
//! {
//!   "id": "r1",
//!   "required": 5,
//!   "$child": {
//!     "c1": { "id": "c1", "name": "x", "parent": "r1", "$leaf": {} }
//!   }
//! }
//! ```
//!
//! In memory the document is a [`Node`] tree. Child collections keep their
//! insertion order, which is also the order they serialise in.

use crate::{
    error::Result, schema::RESERVED_PREFIX, Document, Error, Record, TypeName, ID_FIELD,
};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Virtual key holding the `child_type` collection inside a parent document.
pub fn virtual_key(child_type: &str) -> String {
    format!("{RESERVED_PREFIX}{child_type}")
}

/// One record and the records nested below it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// Declared fields plus `id`
    pub fields: Record,
    /// Child collections by child type, in insertion order
    pub children: BTreeMap<TypeName, Vec<Node>>,
}

impl Node {
    /// Create a node with an empty collection for each direct child type.
    pub fn new(fields: Record, child_types: &[TypeName]) -> Self {
        Self {
            fields,
            children: child_types
                .iter()
                .map(|child| (child.clone(), Vec::new()))
                .collect(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The caller-facing record, without child collections.
    pub fn to_type_object(&self) -> Record {
        self.fields.clone()
    }

    /// Swap in new fields and return the old ones. Child collections are
    /// kept, so a full replace never drops attached children.
    pub fn replace_fields(&mut self, fields: Record) -> Record {
        std::mem::replace(&mut self.fields, fields)
    }

    /// Every node reached by following `path` from this node, across all
    /// branches, in document order.
    pub fn nodes_at(&self, path: &[TypeName]) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_at(path, &mut out);
        out
    }

    fn collect_at<'a>(&'a self, path: &[TypeName], out: &mut Vec<&'a Node>) {
        match path.split_first() {
            None => out.push(self),
            Some((head, rest)) => {
                for child in self.children.get(head).into_iter().flatten() {
                    child.collect_at(rest, out);
                }
            }
        }
    }

    /// Find the node with `id` at the end of `path`.
    pub fn find(&self, path: &[TypeName], id: &str) -> Option<&Node> {
        self.nodes_at(path).into_iter().find(|node| node.id() == Some(id))
    }

    pub fn find_mut(&mut self, path: &[TypeName], id: &str) -> Option<&mut Node> {
        match path.split_first() {
            None => {
                let found = self.id() == Some(id);
                found.then_some(self)
            }
            Some((head, rest)) => self
                .children
                .get_mut(head)?
                .iter_mut()
                .find_map(|child| child.find_mut(rest, id)),
        }
    }

    /// The collection holding the node with `id` at the end of a non-empty
    /// `path`.
    pub fn container_mut(&mut self, path: &[TypeName], id: &str) -> Option<&mut Vec<Node>> {
        let (head, rest) = path.split_first()?;
        let slot = self.children.get_mut(head)?;

        if rest.is_empty() {
            let found = slot.iter().any(|node| node.id() == Some(id));
            return found.then_some(slot);
        }

        slot.iter_mut()
            .find_map(|child| child.container_mut(rest, id))
    }

    /// Cut the node with `id` (and its subtree) out of this tree.
    pub fn remove(&mut self, path: &[TypeName], id: &str) -> Option<Node> {
        let container = self.container_mut(path, id)?;
        let pos = container.iter().position(|node| node.id() == Some(id))?;
        Some(container.remove(pos))
    }

    /// Visit this node and every descendant with its type name.
    pub fn walk<F>(&self, type_name: &str, visit: &mut F)
    where
        F: FnMut(&str, &Node),
    {
        visit(type_name, self);
        for (child_type, nodes) in &self.children {
            for node in nodes {
                node.walk(child_type, visit);
            }
        }
    }

    /// Decode the document stored under `key`.
    pub fn decode(key: &str, document: Document) -> Result<Self> {
        serde_json::from_value(document).map_err(|e| Error::CorruptDocument {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Encode into the physical document shape.
    pub fn encode(&self) -> Result<Document> {
        serde_json::to_value(self).map_err(|e| Error::CorruptDocument {
            key: self.id().unwrap_or_default().to_string(),
            reason: e.to_string(),
        })
    }

    fn from_map(map: Map<String, Value>) -> std::result::Result<Self, String> {
        let mut node = Node::default();

        for (key, value) in map {
            if !key.starts_with(RESERVED_PREFIX) {
                node.fields.insert(key, value);
                continue;
            }
            let child_type = &key[RESERVED_PREFIX.len_utf8()..];

            let Value::Object(entries) = value else {
                return Err(format!("child collection '{key}' is not an object"));
            };

            let mut nodes = Vec::with_capacity(entries.len());
            for (child_id, child) in entries {
                let Value::Object(child) = child else {
                    return Err(format!("child '{child_id}' in '{key}' is not an object"));
                };
                let child = Node::from_map(child)?;
                if child.id() != Some(child_id.as_str()) {
                    return Err(format!("child '{child_id}' in '{key}' carries another id"));
                }
                nodes.push(child);
            }
            node.children.insert(child_type.to_string(), nodes);
        }

        Ok(node)
    }
}

struct Collection<'a>(&'a [Node]);

impl Serialize for Collection<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for node in self.0 {
            map.serialize_entry(node.id().unwrap_or_default(), node)?;
        }
        map.end()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.children.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        for (child_type, nodes) in &self.children {
            map.serialize_entry(&virtual_key(child_type), &Collection(nodes))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Node::from_map(map).map_err(de::Error::custom)
    }
}
