//! Query solver.
//!
//! A filter maps field names to values. Plain values match by equality. The
//! value under a type's reference field is a filter on the parent type (a
//! bare id means `{"id": <id>}`), which may nest further up to the root.
//!
//! Solving starts from the indexes: every index-backed key narrows the set
//! of candidate root documents, and that set flows up the reference chain.
//! The leaf of the chain must be narrowed by some index, since scanning
//! every document of a type is refused.

use crate::{
    error::Result,
    index::{index_key, index_value, indexed_fields, intersect},
    tree::Node,
    Error, Filter, Record, RecordId, Store, ID_FIELD,
};
use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;

/// Candidate root documents for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootSet {
    /// No index applied; nothing is known about the candidates
    Indeterminate,
    /// Exactly these roots can hold matches (possibly none)
    Known(Vec<RecordId>),
}

impl RootSet {
    pub fn into_known(self) -> Option<Vec<RecordId>> {
        match self {
            RootSet::Indeterminate => None,
            RootSet::Known(ids) => Some(ids),
        }
    }
}

impl Store {
    /// Records of `type_name` matching `filter`.
    pub async fn find(&self, type_name: &str, filter: &Filter) -> Result<Vec<Record>> {
        let nodes = self.solve_query(type_name, filter, None).await?;
        Ok(nodes.iter().map(Node::to_type_object).collect())
    }

    /// Ids of the records of `type_name` matching `filter`.
    ///
    /// For the root type, when every filter key is index-backed and holds a
    /// value of the field's declared kind, the ids come straight from the
    /// indexes without loading documents. Index keys do not tell `"5"` from
    /// `5`, so any other filter goes through the full solver.
    pub async fn find_ids(&self, type_name: &str, filter: &Filter) -> Result<Vec<RecordId>> {
        let (def, topology) = self.registry.resolve(type_name)?;

        if topology.is_root(type_name) && !filter.is_empty() {
            let indexed = indexed_fields(def, topology);
            let covered = filter.iter().all(|(field, value)| {
                indexed.contains(&field.as_str())
                    && index_value(value).is_some()
                    && def.field(field).is_some_and(|f| f.accepts(value))
            });
            if covered {
                if let RootSet::Known(ids) = self.find_indexed_roots(type_name, filter, None).await? {
                    return Ok(ids);
                }
            }
        }

        let nodes = self.solve_query(type_name, filter, None).await?;
        Ok(nodes
            .iter()
            .filter_map(|node| node.id().map(str::to_string))
            .collect())
    }

    /// Root documents that can hold matches for `filter`, judged only by
    /// the indexes on `type_name`, narrowed by `known` if given.
    pub async fn find_indexed_roots(
        &self,
        type_name: &str,
        filter: &Filter,
        known: Option<&[RecordId]>,
    ) -> Result<RootSet> {
        let (def, topology) = self.registry.resolve(type_name)?;

        if topology.is_root(type_name) {
            if let Some(id) = filter.get(ID_FIELD).and_then(index_value) {
                let allowed = known.map_or(true, |known| known.contains(&id));
                return Ok(RootSet::Known(if allowed { vec![id] } else { Vec::new() }));
            }
        }

        let indexed = indexed_fields(def, topology);
        let keys: Vec<String> = filter
            .iter()
            .filter(|(field, _)| indexed.contains(&field.as_str()))
            .filter_map(|(field, value)| {
                index_value(value).map(|value| index_key(type_name, field, &value))
            })
            .collect();

        let lists = future::try_join_all(keys.iter().map(|key| self.index.lookup(key))).await?;
        let mut lists = lists.into_iter().map(Option::unwrap_or_default);

        let mut candidates = match (known, lists.next()) {
            (None, None) => return Ok(RootSet::Indeterminate),
            (None, Some(first)) => first,
            (Some(known), first) => {
                let mut candidates = known.to_vec();
                if let Some(first) = first {
                    intersect(&mut candidates, &first);
                }
                candidates
            }
        };
        for list in lists {
            intersect(&mut candidates, &list);
        }

        Ok(RootSet::Known(candidates))
    }

    /// Resolve `filter` on `type_name` into matching nodes, each with its
    /// subtree.
    pub fn solve_query<'a>(
        &'a self,
        type_name: &'a str,
        filter: &'a Filter,
        root_ids: Option<Vec<RecordId>>,
    ) -> BoxFuture<'a, Result<Vec<Node>>> {
        async move {
            let (_, topology) = self.registry.resolve(type_name)?;
            let roots = self
                .find_indexed_roots(type_name, filter, root_ids.as_deref())
                .await?;

            let parent_filter = topology
                .parent(type_name)
                .and_then(|parent| filter.get(&parent.field).map(|value| (parent, value)));

            let (candidates, consumed) = match parent_filter {
                None => {
                    let RootSet::Known(ids) = roots else {
                        return Err(Error::IndexRequired(type_name.to_string()));
                    };
                    let path = topology.path_to_type(type_name);
                    let loaded =
                        future::try_join_all(ids.iter().map(|id| self.load_root(id))).await?;
                    let nodes: Vec<Node> = loaded
                        .iter()
                        .flatten()
                        .flat_map(|root| root.nodes_at(path))
                        .cloned()
                        .collect();
                    (nodes, None)
                }
                Some((parent, value)) => {
                    let sub_filter = match value {
                        Value::Object(nested) => nested.clone(),
                        id => Filter::from_iter([(ID_FIELD.to_string(), id.clone())]),
                    };
                    let parents = self
                        .solve_query(&parent.type_name, &sub_filter, roots.into_known())
                        .await?;
                    let nodes: Vec<Node> = parents
                        .into_iter()
                        .flat_map(|mut parent| parent.children.remove(type_name).unwrap_or_default())
                        .collect();
                    (nodes, Some(parent.field.as_str()))
                }
            };

            tracing::trace!(
                type_name = %type_name,
                candidates = candidates.len(),
                "query candidates collected"
            );

            Ok(candidates
                .into_iter()
                .filter(|node| matches_filter(node, filter, consumed))
                .collect())
        }
        .boxed()
    }
}

/// In-memory equality check of every filter key except `consumed`.
fn matches_filter(node: &Node, filter: &Filter, consumed: Option<&str>) -> bool {
    filter
        .iter()
        .filter(|(field, _)| Some(field.as_str()) != consumed)
        .all(|(field, expected)| {
            let actual = node.fields.get(field).unwrap_or(&Value::Null);
            values_equal(actual, expected)
        })
}

/// JSON equality where numbers compare by value, so `5` matches `5.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_f64() || y.is_f64() => {
            x.as_f64() == y.as_f64()
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(value: Value) -> Node {
        Node::new(value.as_object().cloned().unwrap(), &[])
    }

    fn filter(value: Value) -> Filter {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(values_equal(&json!(5), &json!(5.0)));
        assert!(!values_equal(&json!(5), &json!(6)));
        assert!(!values_equal(&json!("5"), &json!(5)));
        assert!(values_equal(&json!(null), &json!(null)));
    }

    #[test]
    fn filter_skips_consumed_key() {
        let n = node(json!({"id": "c1", "name": "x", "parent": "r1"}));

        assert!(matches_filter(&n, &filter(json!({"name": "x"})), None));
        assert!(!matches_filter(&n, &filter(json!({"name": "y"})), None));
        assert!(matches_filter(
            &n,
            &filter(json!({"name": "x", "parent": {"required": 5}})),
            Some("parent")
        ));
    }

    #[test]
    fn absent_field_matches_null() {
        let n = node(json!({"id": "c1"}));
        assert!(matches_filter(&n, &filter(json!({"note": null})), None));
        assert!(!matches_filter(&n, &filter(json!({"note": "x"})), None));
    }

    #[test]
    fn root_set_into_known() {
        assert_eq!(RootSet::Indeterminate.into_known(), None);
        assert_eq!(
            RootSet::Known(vec!["r1".into()]).into_known(),
            Some(vec!["r1".to_string()])
        );
    }
}
