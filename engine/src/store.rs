//! Store - the CRUD engine.
//!
//! The Store owns the type registry and the two backends. Every write loads
//! the affected root document, changes it in memory, writes the whole
//! document back and then brings the indexes up to date.

use crate::{
    error::Result,
    index::{indexed_fields, IndexDelta, IndexManager},
    locate::{containing_record, missing_from_root},
    schema::{Registry, RegistryState, Topology, TypeDef, RESERVED_PREFIX},
    tree::Node,
    Document, Error, KvStore, MemoryKv, Record, RecordId, RootList, StoreConfig, TypeName,
    ID_FIELD,
};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Schema-driven object store over a value store and an index store.
pub struct Store {
    pub(crate) registry: Registry,
    pub(crate) values: Arc<dyn KvStore<Document>>,
    pub(crate) index: IndexManager,
    config: StoreConfig,
}

impl Store {
    /// Create a store over the given backends with default configuration.
    pub fn new(values: Arc<dyn KvStore<Document>>, indexes: Arc<dyn KvStore<RootList>>) -> Self {
        Self::with_config(values, indexes, StoreConfig::default())
    }

    pub fn with_config(
        values: Arc<dyn KvStore<Document>>,
        indexes: Arc<dyn KvStore<RootList>>,
        config: StoreConfig,
    ) -> Self {
        Self {
            registry: Registry::new(),
            values,
            index: IndexManager::new(indexes, config.index_fanout),
            config,
        }
    }

    /// Create a store over two fresh [`MemoryKv`] backends.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryKv::<Document>::new()),
            Arc::new(MemoryKv::<RootList>::new()),
        )
    }

    /// Get the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_state(&self) -> RegistryState {
        self.registry.state()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register a record type. See [`Registry::define_type`].
    pub fn define_type<I, K, V>(&mut self, name: impl Into<TypeName>, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        self.registry.define_type(name, fields)
    }

    /// Index `field` of `type_name`. See [`Registry::create_index`].
    pub fn create_index(&mut self, type_name: &str, field: &str) -> Result<()> {
        self.registry.create_index(type_name, field)
    }

    /// Create a record with a fresh id and return it.
    ///
    /// A record of a non-root type is nested under the parent named by its
    /// reference field, which must exist.
    pub async fn create(&self, type_name: &str, value: Record) -> Result<Record> {
        let (def, topology) = self.registry.resolve(type_name)?;

        let id = Uuid::new_v4().to_string();
        let mut record = Record::new();
        record.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        record.extend(value.into_iter().filter(|(key, _)| key != ID_FIELD));
        self.check_record(def, &record)?;

        let node = Node::new(record.clone(), topology.children(type_name));

        let (root_id, root) = match topology.parent(type_name) {
            None => (id.clone(), node),
            Some(parent) => {
                let parent_id = record
                    .get(&parent.field)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::InvalidRecord(format!(
                            "'{type_name}.{}' must hold the parent id",
                            parent.field
                        ))
                    })?;

                let (root_id, mut root) = self
                    .get_root(topology, &parent.type_name, parent_id)
                    .await?
                    .ok_or_else(|| Error::not_found(&parent.type_name, parent_id))?;

                root.find_mut(topology.path_to_type(&parent.type_name), parent_id)
                    .ok_or_else(|| missing_from_root(&root_id, &parent.type_name, parent_id))?
                    .children
                    .entry(type_name.to_string())
                    .or_default()
                    .push(node);

                (root_id, root)
            }
        };

        self.save_root(&root_id, &root).await?;

        let mut delta = IndexDelta::default();
        delta.record_change(type_name, &indexed_fields(def, topology), None, Some(&record));
        self.index.apply(&root_id, delta).await?;

        tracing::debug!(type_name = %type_name, id = %id, root = %root_id, "record created");
        Ok(record)
    }

    /// Get a record by type and id.
    pub async fn get(&self, type_name: &str, id: &str) -> Result<Option<Record>> {
        let (_, topology) = self.registry.resolve(type_name)?;
        let Some((root_id, root)) = self.get_root(topology, type_name, id).await? else {
            return Ok(None);
        };
        let node = containing_record(&root, &root_id, topology, type_name, id)?;
        Ok(Some(node.to_type_object()))
    }

    /// Check if a record exists.
    pub async fn has(&self, type_name: &str, id: &str) -> Result<bool> {
        let (_, topology) = self.registry.resolve(type_name)?;
        if topology.is_root(type_name) {
            return Ok(self.values.get(id).await?.is_some());
        }

        match self.get_root(topology, type_name, id).await? {
            Some((root_id, root)) => {
                containing_record(&root, &root_id, topology, type_name, id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace a whole record. The record's `id` selects the target.
    ///
    /// The reference field must keep its value; child records stay attached.
    pub async fn set(&self, type_name: &str, record: Record) -> Result<()> {
        let (def, topology) = self.registry.resolve(type_name)?;
        let id = record
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidRecord(format!("{type_name} record has no id")))?
            .to_string();
        self.check_record(def, &record)?;

        let (root_id, mut root) = self.root_for_update(topology, type_name, &id).await?;
        let node = root
            .find_mut(topology.path_to_type(type_name), &id)
            .ok_or_else(|| missing_from_root(&root_id, type_name, &id))?;

        if let Some(parent) = topology.parent(type_name) {
            if node.fields.get(&parent.field) != record.get(&parent.field) {
                return Err(Error::UnsupportedOperation(format!(
                    "cannot change reference field '{type_name}.{}'",
                    parent.field
                )));
            }
        }

        let old = node.replace_fields(record);
        let new = node.fields.clone();

        self.save_root(&root_id, &root).await?;
        self.reindex(def, topology, &root_id, &root, &old, &new).await?;

        tracing::debug!(type_name = %type_name, id = %id, root = %root_id, "record replaced");
        Ok(())
    }

    /// Update one field of a record.
    pub async fn set_field(
        &self,
        type_name: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let (def, topology) = self.registry.resolve(type_name)?;

        if field == ID_FIELD {
            return Err(Error::UnsupportedOperation(format!(
                "cannot change the id of {type_name} {id}"
            )));
        }
        reject_reserved(type_name, field)?;
        if self.config.validate_records {
            def.field(field)
                .ok_or_else(|| Error::UnknownField {
                    type_name: type_name.to_string(),
                    field: field.to_string(),
                })?
                .validate(Some(&value))?;
        }

        let (root_id, mut root) = self.root_for_update(topology, type_name, id).await?;
        let node = root
            .find_mut(topology.path_to_type(type_name), id)
            .ok_or_else(|| missing_from_root(&root_id, type_name, id))?;

        let is_reference = topology
            .parent(type_name)
            .is_some_and(|parent| parent.field == field);
        if is_reference && node.fields.get(field) != Some(&value) {
            return Err(Error::UnsupportedOperation(format!(
                "cannot change reference field '{type_name}.{field}'"
            )));
        }

        let old = node.fields.clone();
        node.fields.insert(field.to_string(), value);
        let new = node.fields.clone();

        self.save_root(&root_id, &root).await?;
        self.reindex(def, topology, &root_id, &root, &old, &new).await?;

        tracing::debug!(type_name = %type_name, id = %id, field = %field, "field updated");
        Ok(())
    }

    /// Delete a record and everything nested below it.
    ///
    /// Deleting a record that does not exist is a no-op.
    pub async fn delete(&self, type_name: &str, id: &str) -> Result<()> {
        let (_, topology) = self.registry.resolve(type_name)?;

        let Some((root_id, mut root)) = self.get_root(topology, type_name, id).await? else {
            tracing::debug!(type_name = %type_name, id = %id, "nothing to delete");
            return Ok(());
        };

        let (removed, remaining) = if topology.is_root(type_name) {
            self.values.delete(&root_id).await?;
            (root, None)
        } else {
            let Some(removed) = root.remove(topology.path_to_type(type_name), id) else {
                tracing::warn!(
                    type_name = %type_name,
                    id = %id,
                    root = %root_id,
                    "indexed record missing from its root, skipping delete"
                );
                return Ok(());
            };
            self.save_root(&root_id, &root).await?;
            (removed, Some(root))
        };

        // Every record of the removed subtree loses its index contributions
        let mut delta = IndexDelta::default();
        let mut collect = |child_type: &str, node: &Node| {
            if let Some(def) = self.registry.get(child_type) {
                delta.record_change(
                    child_type,
                    &indexed_fields(def, topology),
                    Some(&node.fields),
                    None,
                );
            }
        };
        removed.walk(type_name, &mut collect);
        delta.retain_present(remaining.as_ref(), topology);
        self.index.apply(&root_id, delta).await?;

        tracing::debug!(type_name = %type_name, id = %id, root = %root_id, "record deleted");
        Ok(())
    }

    /// Stream every record of `type_name`, scanning all root documents.
    ///
    /// Each call starts a new scan.
    pub fn entries<'a>(&'a self, type_name: &'a str) -> BoxStream<'a, Result<Record>> {
        let path = match self.registry.resolve(type_name) {
            Ok((_, topology)) => topology.path_to_type(type_name),
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        self.values
            .entries()
            .map(move |entry| -> Result<Vec<Result<Record>>> {
                let (key, document) = entry?;
                let root = Node::decode(&key, document)?;
                Ok(root
                    .nodes_at(path)
                    .into_iter()
                    .map(|node| Ok(node.to_type_object()))
                    .collect())
            })
            .map_ok(stream::iter)
            .try_flatten()
            .boxed()
    }

    fn check_record(&self, def: &TypeDef, record: &Record) -> Result<()> {
        // Reserved keys would be read back as child collections
        for key in record.keys() {
            reject_reserved(&def.name, key)?;
        }
        if self.config.validate_records {
            def.validate_record(record)?;
        }
        Ok(())
    }

    async fn root_for_update(
        &self,
        topology: &Topology,
        type_name: &str,
        id: &str,
    ) -> Result<(RecordId, Node)> {
        self.get_root(topology, type_name, id)
            .await?
            .ok_or_else(|| Error::not_found(type_name, id))
    }

    async fn reindex(
        &self,
        def: &TypeDef,
        topology: &Topology,
        root_id: &str,
        root: &Node,
        old: &Record,
        new: &Record,
    ) -> Result<()> {
        let mut delta = IndexDelta::default();
        delta.record_change(&def.name, &indexed_fields(def, topology), Some(old), Some(new));
        delta.retain_present(Some(root), topology);
        self.index.apply(root_id, delta).await
    }
}

fn reject_reserved(type_name: &str, field: &str) -> Result<()> {
    if field.starts_with(RESERVED_PREFIX) {
        return Err(Error::InvalidRecord(format!(
            "field '{type_name}.{field}' uses the reserved prefix '{RESERVED_PREFIX}'"
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("registry", &self.registry)
            .field("index", &self.index)
            .field("config", &self.config)
            .finish()
    }
}
