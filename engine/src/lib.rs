//! # Grove Engine
//!
//! A schema-driven, indexed object store built on two plain key-value
//! backends: one holding physical tree documents, one holding reverse
//! indexes.
//!
//! The engine turns a flat key-value substrate into a constrained,
//! relational-like store with cascading deletes and index-backed lookup.
//! Backends only need get/set/delete/enumerate-by-key.
//!
//! ## Core Concepts
//!
//! ### Types
//!
//! Record types are declared with a field schema. A field is a `string`,
//! `boolean`, `number` or a reference `id:<type>` to a parent type, each
//! optionally nullable (`?`). Exactly one type has no reference field: the
//! root type. Every other type references exactly one parent, and the
//! references form a tree of types. The registry validates this the first
//! time data is touched and freezes.
//!
//! ### Documents
//!
//! Each root record and everything nested below it is stored as a single
//! document in the value store. Child records live under synthetic
//! `"$<child type>"` keys of their parent. Deleting a record deletes its
//! whole subtree.
//!
//! ### Indexes
//!
//! For every indexed `(type, field, value)` the index store keeps the list of
//! root ids whose document contains a matching record. Identifiers are always
//! indexed. Queries use only the indexes that exist; a query that no index
//! can narrow is rejected instead of scanning.
//!
//! ## Quick Start
//!
//! ```rust
//! use grove_engine::{Record, Store};
//! use serde_json::json;
//!
//! fn record(value: serde_json::Value) -> Record {
//!     value.as_object().cloned().unwrap_or_default()
//! }
//!
//! futures::executor::block_on(async {
//!     // 1. Define the schema
//!     let mut store = Store::in_memory();
//!     store.define_type("team", [("name", "string")])?;
//!     store.define_type("member", [("nick", "string"), ("team", "id:team")])?;
//!     store.create_index("member", "nick")?;
//!
//!     // 2. Create records
//!     let team = store.create("team", record(json!({"name": "core"}))).await?;
//!     let team_id = team["id"].as_str().unwrap_or_default();
//!     store
//!         .create("member", record(json!({"nick": "ada", "team": team_id})))
//!         .await?;
//!
//!     // 3. Query
//!     let members = store.find("member", &record(json!({"team": team_id}))).await?;
//!     assert_eq!(members.len(), 1);
//!
//!     // 4. Deleting the team removes its members
//!     store.delete("team", team_id).await?;
//!     assert!(store.find("member", &record(json!({"nick": "ada"}))).await?.is_empty());
//!     Ok::<_, grove_engine::Error>(())
//! })
//! .unwrap();
//! ```
//!
//! ## Concurrency
//!
//! All data operations are async. The engine holds no locks: writes that
//! touch the same root document race on the whole document, so embedders
//! must serialise writes per root id.

pub mod backend;
pub mod config;
pub mod error;
pub mod index;
pub mod locate;
pub mod query;
pub mod schema;
pub mod store;
pub mod tree;

// Re-export main types at crate root
pub use backend::{KvStore, MemoryKv};
pub use config::{ConfigError, StoreConfig};
pub use error::{Error, ErrorKind, Result};
pub use index::{IndexDelta, IndexEntry, IndexManager};
pub use query::RootSet;
pub use schema::{FieldDef, FieldKind, FieldType, Registry, RegistryState, Topology, TypeDef};
pub use store::Store;
pub use tree::Node;

/// Type aliases for clarity
pub type TypeName = String;
pub type RecordId = String;
/// Caller-facing record: declared fields plus `id`
pub type Record = serde_json::Map<String, serde_json::Value>;
/// Query filter keyed by field name
pub type Filter = serde_json::Map<String, serde_json::Value>;
/// Physical document stored in the value store
pub type Document = serde_json::Value;
/// Root ids stored under one index key
pub type RootList = Vec<RecordId>;

/// Name of the identifier field every record carries.
pub const ID_FIELD: &str = "id";
