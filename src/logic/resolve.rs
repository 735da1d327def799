use crate::error::RestError;
use crate::model::{
    ColumnValue, Member, Relation, RelationKind, ResourceChain, ResourceNode, Schema, Table,
};
use crate::store::{RowData, RowStore};
use axum::http::Method;
use itertools::Itertools;

/// Converts a request path into a chain of schema-validated resource
/// locators, checking existence, cardinality, and relationship kind at
/// each segment against the live row graph.
pub struct PathResolver;

/// The edge a segment resolved to, before any row lookup.
enum Edge {
    /// A child/reference column on the current row's table.
    Column {
        via_table: String,
        column: String,
        table: String,
        kind: RelationKind,
        is_plural: bool,
        is_map: bool,
    },
    /// A table addressed at the root by plural name, owned from the far
    /// side (child column on `owner_table`).
    BackRef {
        table: String,
        owner_table: String,
        column: String,
    },
    /// A free-standing root table addressed at the root by plural name.
    TopLevel { table: String },
}

impl PathResolver {
    /// Resolve `path` (e.g. `system/bridges/bridge_normal/ports`) into a
    /// root-to-leaf chain. A trailing id that matches no row is an error
    /// for every method except POST, whose handler treats it as the
    /// creation path.
    pub fn resolve(
        path: &str,
        schema: &Schema,
        store: &dyn RowStore,
        method: &Method,
    ) -> Result<ResourceChain, RestError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let root = schema.root_table();
        let root_segment = root.name.to_lowercase();

        if segments.first().copied() != Some(root_segment.as_str()) {
            return Err(RestError::not_found(format!(
                "unknown resource '{}'",
                segments.first().copied().unwrap_or("")
            )));
        }

        // The root is resolved unconditionally, not looked up.
        let root_row = store.list_rows(&root.name).into_iter().next();
        let mut chain = ResourceChain {
            nodes: vec![ResourceNode {
                table: root.name.clone(),
                relation: Relation::Root,
                row: root_row.as_ref().map(|r| r.uuid),
                index: None,
                key: None,
                is_collection: false,
                members: Vec::new(),
            }],
        };

        let mut pos = 1;
        while pos < segments.len() {
            let name = segments[pos];
            pos += 1;

            let current = chain.last();
            if current.is_collection {
                // Collections are leaves; only an id may follow, and ids
                // were consumed together with their relation segment.
                return Err(RestError::not_found(format!(
                    "cannot traverse into '{}' from a collection",
                    name
                )));
            }
            let current_table = schema
                .table(&current.table)
                .ok_or_else(|| RestError::Internal(format!("table {} vanished", current.table)))?;

            let edge = Self::resolve_edge(schema, current_table, &current.relation, name)?;

            // Rows below the root need a resolved owner to read the
            // owning column from.
            let owner_row: Option<RowData> = match &edge {
                Edge::Column { .. } => {
                    let Some(owner) = current.row else {
                        return Err(RestError::not_found(format!(
                            "'{}' has no resolved row to traverse from",
                            current.table
                        )));
                    };
                    store.get_row(&owner)
                }
                _ => None,
            };

            match edge {
                Edge::Column {
                    via_table,
                    column,
                    table,
                    kind,
                    is_plural,
                    is_map,
                } => {
                    let relation = match kind {
                        RelationKind::Child => Relation::Child {
                            via_table: via_table.clone(),
                            column: column.clone(),
                        },
                        RelationKind::Reference => Relation::Reference {
                            via_table: via_table.clone(),
                            column: column.clone(),
                        },
                        RelationKind::Parent => unreachable!("parent edges are rejected earlier"),
                    };
                    let value = owner_row.as_ref().and_then(|r| r.get(&column).cloned());
                    if !is_plural {
                        // Singular edge: the segment itself addresses the
                        // one row; an id segment would be a cardinality
                        // mismatch and falls through as an unknown
                        // relation on the child table.
                        let row = match &value {
                            Some(ColumnValue::Scalar(d)) => d.as_uuid(),
                            _ => None,
                        };
                        chain.nodes.push(ResourceNode {
                            table,
                            relation,
                            row,
                            index: None,
                            key: None,
                            is_collection: false,
                            members: Vec::new(),
                        });
                        continue;
                    }

                    let members = Self::column_members(&value, is_map);
                    Self::push_collection_or_row(
                        &mut chain, schema, store, method, &segments, &mut pos, table, relation,
                        members, is_map,
                    )?;
                }
                Edge::BackRef {
                    table,
                    owner_table,
                    column,
                } => {
                    let relation = Relation::BackReference {
                        owner_table,
                        column,
                    };
                    let members = Self::table_members(store, &table);
                    Self::push_collection_or_row(
                        &mut chain, schema, store, method, &segments, &mut pos, table, relation,
                        members, false,
                    )?;
                }
                Edge::TopLevel { table } => {
                    let members = Self::table_members(store, &table);
                    Self::push_collection_or_row(
                        &mut chain,
                        schema,
                        store,
                        method,
                        &segments,
                        &mut pos,
                        table,
                        Relation::TopLevel,
                        members,
                        false,
                    )?;
                }
            }
        }

        Ok(chain)
    }

    /// Look a relation name up against the current table: plural resource
    /// names first, then schema-declared child/reference column names.
    /// Parent edges are never traversable downward.
    fn resolve_edge(
        schema: &Schema,
        current: &Table,
        current_relation: &Relation,
        name: &str,
    ) -> Result<Edge, RestError> {
        let at_root = *current_relation == Relation::Root;

        if at_root {
            if let Some(target) = schema.table_by_plural(name) {
                if let Some((owner, reference)) =
                    schema.child_edges_into(&target.name).into_iter().next()
                {
                    // Collections owned by the root resolve through the
                    // owning column so membership stays scoped to it.
                    if owner.name != current.name {
                        return Ok(Edge::BackRef {
                            table: target.name.clone(),
                            owner_table: owner.name.clone(),
                            column: reference.column.clone(),
                        });
                    }
                } else if target.is_root {
                    return Ok(Edge::TopLevel {
                        table: target.name.clone(),
                    });
                }
            }
        }

        if let Some(reference) = current.reference(name) {
            if reference.kind == RelationKind::Parent {
                return Err(RestError::not_found(format!(
                    "'{}' is a parent relation and cannot be traversed",
                    name
                )));
            }
            return Ok(Edge::Column {
                via_table: current.name.clone(),
                column: reference.column.clone(),
                table: reference.table.clone(),
                kind: reference.kind,
                is_plural: reference.is_plural,
                is_map: reference.is_map(),
            });
        }

        if at_root {
            if let Some(target) = schema.table_by_plural(name) {
                if let Some((owner, reference)) =
                    schema.child_edges_into(&target.name).into_iter().next()
                {
                    return Ok(Edge::BackRef {
                        table: target.name.clone(),
                        owner_table: owner.name.clone(),
                        column: reference.column.clone(),
                    });
                }
            }
        }

        Err(RestError::not_found(format!("unknown resource '{}'", name)))
    }

    /// Consume the optional id segment(s) after a plural relation and push
    /// either a collection node or a resolved row node.
    #[allow(clippy::too_many_arguments)]
    fn push_collection_or_row(
        chain: &mut ResourceChain,
        schema: &Schema,
        store: &dyn RowStore,
        method: &Method,
        segments: &[&str],
        pos: &mut usize,
        table: String,
        relation: Relation,
        members: Vec<Member>,
        is_map: bool,
    ) -> Result<(), RestError> {
        if *pos >= segments.len() {
            chain.nodes.push(ResourceNode {
                table,
                relation,
                row: None,
                index: None,
                key: None,
                is_collection: true,
                members,
            });
            return Ok(());
        }

        let table_def = schema
            .table(&table)
            .ok_or_else(|| RestError::Internal(format!("table {} vanished", table)))?;

        // Key/value references are addressed by map key; indexed tables
        // consume one segment per index column.
        let (id, key, row) = if is_map {
            let key = segments[*pos].to_string();
            *pos += 1;
            let row = members
                .iter()
                .find(|m| m.key.as_deref() == Some(key.as_str()))
                .map(|m| m.uuid);
            (key.clone(), Some(key), row)
        } else {
            let width = table_def.indexes.len().max(1);
            let take = width.min(segments.len() - *pos);
            let id = segments[*pos..*pos + take].iter().join("/");
            *pos += take;
            let row = members
                .iter()
                .filter_map(|m| store.get_row(&m.uuid))
                .find(|r| r.index(table_def) == id)
                .map(|r| r.uuid);
            (id, None, row)
        };

        let trailing = *pos >= segments.len();
        if row.is_none() && !(trailing && *method == Method::POST) {
            return Err(RestError::not_found(format!(
                "no '{}' resource with id '{}'",
                table, id
            )));
        }

        chain.nodes.push(ResourceNode {
            table,
            relation,
            row,
            index: Some(id),
            key,
            is_collection: false,
            members: Vec::new(),
        });
        Ok(())
    }

    fn column_members(value: &Option<ColumnValue>, is_map: bool) -> Vec<Member> {
        match value {
            Some(ColumnValue::List(items)) => items
                .iter()
                .filter_map(|d| d.as_uuid())
                .map(|uuid| Member { key: None, uuid })
                .collect(),
            Some(ColumnValue::Map(entries)) => entries
                .iter()
                .filter_map(|(k, d)| {
                    d.as_uuid().map(|uuid| Member {
                        key: Some(k.clone()),
                        uuid,
                    })
                })
                .collect(),
            Some(ColumnValue::Scalar(d)) if !is_map => d
                .as_uuid()
                .map(|uuid| Member { key: None, uuid })
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn table_members(store: &dyn RowStore, table: &str) -> Vec<Member> {
        store
            .list_rows(table)
            .into_iter()
            .map(|r| Member {
                key: None,
                uuid: r.uuid,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    async fn fixture() -> (Arc<Schema>, MemoryStore) {
        let schema = Arc::new(Schema::load(seed::switch_schema()).unwrap());
        let store = MemoryStore::new(schema.clone());
        seed::load_seed_data(&store, &schema).await.unwrap();
        (schema, store)
    }

    #[tokio::test]
    async fn resolves_root() {
        let (schema, store) = fixture().await;
        let chain = PathResolver::resolve("system", &schema, &store, &Method::GET).unwrap();
        assert_eq!(chain.nodes.len(), 1);
        assert_eq!(chain.last().relation, Relation::Root);
        assert!(chain.last().row.is_some());
    }

    #[tokio::test]
    async fn collapses_extra_slashes() {
        let (schema, store) = fixture().await;
        let chain =
            PathResolver::resolve("system//bridges///bridge_normal", &schema, &store, &Method::GET)
                .unwrap();
        assert_eq!(chain.nodes.len(), 2);
        assert_eq!(chain.last().index.as_deref(), Some("bridge_normal"));
        assert!(chain.last().row.is_some());
    }

    #[tokio::test]
    async fn resolves_child_collection() {
        let (schema, store) = fixture().await;
        let chain = PathResolver::resolve("system/bridges", &schema, &store, &Method::GET).unwrap();
        let leaf = chain.last();
        assert!(leaf.is_collection);
        assert_eq!(leaf.table, "Bridge");
        assert_eq!(leaf.members.len(), 1);
        assert!(matches!(leaf.relation, Relation::Child { .. }));
    }

    #[tokio::test]
    async fn resolves_back_reference_collection() {
        let (schema, store) = fixture().await;
        let chain = PathResolver::resolve("system/ports", &schema, &store, &Method::GET).unwrap();
        let leaf = chain.last();
        assert!(leaf.is_collection);
        assert_eq!(leaf.table, "Port");
        match &leaf.relation {
            Relation::BackReference {
                owner_table,
                column,
            } => {
                assert_eq!(owner_table, "Bridge");
                assert_eq!(column, "ports");
            }
            other => panic!("expected back-reference, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolves_keyed_vlan() {
        let (schema, store) = fixture().await;
        let chain = PathResolver::resolve(
            "system/bridges/bridge_normal/vlans/1",
            &schema,
            &store,
            &Method::GET,
        )
        .unwrap();
        let leaf = chain.last();
        assert_eq!(leaf.table, "VLAN");
        assert_eq!(leaf.key.as_deref(), Some("1"));
        assert!(leaf.row.is_some());
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let (schema, store) = fixture().await;
        let err = PathResolver::resolve("system/bridges/nope", &schema, &store, &Method::GET)
            .unwrap_err();
        assert!(matches!(err, RestError::NotFound(_)));
    }

    #[tokio::test]
    async fn trailing_missing_id_is_legal_for_post() {
        let (schema, store) = fixture().await;
        let chain =
            PathResolver::resolve("system/bridges/nope", &schema, &store, &Method::POST).unwrap();
        assert!(chain.last().row.is_none());
        assert_eq!(chain.last().index.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn unknown_relation_is_not_found() {
        let (schema, store) = fixture().await;
        let err =
            PathResolver::resolve("system/gadgets", &schema, &store, &Method::GET).unwrap_err();
        assert!(matches!(err, RestError::NotFound(_)));
    }

    #[tokio::test]
    async fn parent_edges_are_not_traversable() {
        let schema = Arc::new(
            Schema::load(serde_json::json!({
                "name": "P",
                "version": "1.0.0",
                "tables": {
                    "System": {"isRoot": true, "maxRows": 1, "columns": {
                        "hostname": {"category": "configuration", "type": "string"},
                        "bridges": {
                            "category": "configuration",
                            "relationship": "child",
                            "type": {"key": {"type": "uuid", "refTable": "Bridge"},
                                     "min": 0, "max": "unlimited"}
                        }
                    }},
                    "Bridge": {"indexes": ["name"], "columns": {
                        "name": {"category": "configuration", "type": "string"},
                        "owner": {
                            "category": "configuration",
                            "relationship": "parent",
                            "type": {"key": {"type": "uuid", "refTable": "System"}}
                        }
                    }}
                }
            }))
            .unwrap(),
        );
        let store = MemoryStore::new(schema.clone());
        let system = uuid::Uuid::new_v4();
        let bridge = uuid::Uuid::new_v4();
        let changes = crate::store::ChangeSet {
            ops: vec![
                crate::store::RowOp::Insert {
                    uuid: system,
                    table: "System".to_string(),
                },
                crate::store::RowOp::Insert {
                    uuid: bridge,
                    table: "Bridge".to_string(),
                },
                crate::store::RowOp::Set {
                    uuid: bridge,
                    column: "name".to_string(),
                    value: ColumnValue::Scalar(crate::model::Datum::Str("br0".to_string())),
                },
                crate::store::RowOp::Set {
                    uuid: system,
                    column: "bridges".to_string(),
                    value: ColumnValue::List(vec![crate::model::Datum::Uuid(bridge)]),
                },
            ],
        };
        store.submit(changes).await.done.await.unwrap();

        let err = PathResolver::resolve("system/bridges/br0/owner", &schema, &store, &Method::GET)
            .unwrap_err();
        assert!(matches!(err, RestError::NotFound(_)));
    }

    #[tokio::test]
    async fn mid_chain_missing_row_fails() {
        let (schema, store) = fixture().await;
        let err = PathResolver::resolve(
            "system/bridges/nope/ports",
            &schema,
            &store,
            &Method::GET,
        )
        .unwrap_err();
        assert!(matches!(err, RestError::NotFound(_)));
    }
}
