//! Root locator.
//!
//! Finds the physical root document that nests a record. Root records are
//! fetched by id directly; any other record goes through its identifier
//! index first.

use crate::{
    error::Result, index::index_key, schema::Topology, tree::Node, Error, RecordId, Store,
    TypeName, ID_FIELD,
};

impl Store {
    /// Load the root document containing `(type_name, id)`.
    ///
    /// Returns `None` when the identifier index or the document is missing.
    /// An identifier index listing more than one root is also treated as
    /// missing.
    pub(crate) async fn get_root(
        &self,
        topology: &Topology,
        type_name: &str,
        id: &str,
    ) -> Result<Option<(RecordId, Node)>> {
        let root_id = if topology.is_root(type_name) {
            id.to_string()
        } else {
            let key = index_key(type_name, ID_FIELD, id);
            match self.index.lookup(&key).await? {
                Some(roots) if roots.len() == 1 => roots.into_iter().next().unwrap_or_default(),
                Some(roots) => {
                    tracing::warn!(
                        key = %key,
                        roots = roots.len(),
                        "identifier index does not resolve to a single root"
                    );
                    return Ok(None);
                }
                None => return Ok(None),
            }
        };

        Ok(self
            .load_root(&root_id)
            .await?
            .map(|root| (root_id, root)))
    }

    /// Child collections to walk from a root document down to `type_name`.
    pub fn path_to_type(&self, type_name: &str) -> Result<&[TypeName]> {
        let (_, topology) = self.registry.resolve(type_name)?;
        Ok(topology.path_to_type(type_name))
    }

    pub(crate) async fn load_root(&self, root_id: &str) -> Result<Option<Node>> {
        match self.values.get(root_id).await? {
            Some(document) => Node::decode(root_id, document).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) async fn save_root(&self, root_id: &str, root: &Node) -> Result<()> {
        self.values.set(root_id, root.encode()?).await
    }
}

/// The record `(type_name, id)` inside `root`.
///
/// Callers only get here after an index pointed at `root`, so a miss means
/// the index and the tree disagree.
pub(crate) fn containing_record<'a>(
    root: &'a Node,
    root_id: &str,
    topology: &Topology,
    type_name: &str,
    id: &str,
) -> Result<&'a Node> {
    root.find(topology.path_to_type(type_name), id)
        .ok_or_else(|| missing_from_root(root_id, type_name, id))
}

pub(crate) fn missing_from_root(root_id: &str, type_name: &str, id: &str) -> Error {
    Error::Inconsistent(format!(
        "{type_name} {id} is indexed under root {root_id} but missing from it"
    ))
}
