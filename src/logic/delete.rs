use crate::error::RestError;
use crate::logic::validate::{ValidationArgs, ValidatorRegistry, WriteOp};
use crate::model::{ColumnValue, Relation, ResourceChain, Schema};
use crate::store::{RowStore, Transaction};
use log::debug;
use std::collections::HashSet;
use uuid::Uuid;

/// Deletes rows according to the relation kind the chain reached them
/// through: owned subtrees cascade, plain references only unlink, and a
/// full reverse-reference sweep guarantees no dangling row references
/// survive a row's removal.
pub struct DeleteEngine;

impl DeleteEngine {
    pub fn delete(
        chain: &ResourceChain,
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
        validators: &ValidatorRegistry,
    ) -> Result<(), RestError> {
        let leaf = chain.last();
        let uuid = leaf
            .row
            .ok_or_else(|| RestError::not_found("resource not found"))?;
        let table = schema
            .table(&leaf.table)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", leaf.table)))?;
        let row = store
            .get_row(&uuid)
            .ok_or_else(|| RestError::not_found("resource not found"))?;

        // Policy checks run before the recursive walk begins.
        if !table.mutable {
            return Err(RestError::MethodNotAllowed(format!(
                "rows of read-only table {} cannot be deleted",
                table.plural
            )));
        }
        validators.run(&ValidationArgs {
            op: WriteOp::Delete,
            table,
            row: Some(&row),
            index: leaf.index.as_deref(),
        })?;

        match &leaf.relation {
            Relation::Reference { via_table, column } => {
                // Non-owning edge: remove only the reference, never the
                // referenced row.
                let owner = chain
                    .parent()
                    .and_then(|n| n.row)
                    .ok_or_else(|| RestError::not_found("owning resource not found"))?;
                Self::unlink(owner, column, uuid, store, txn)?;
                debug!("unlinked {} from {}.{}", uuid, via_table, column);
                Ok(())
            }
            Relation::Root => Err(RestError::MethodNotAllowed(
                "the system resource cannot be deleted".into(),
            )),
            Relation::Child { .. } | Relation::BackReference { .. } | Relation::TopLevel => {
                // Owned subtree first, leaves before owners.
                let mut ordered = Vec::new();
                let mut seen = HashSet::new();
                Self::collect_subtree(uuid, &leaf.table, schema, store, &mut ordered, &mut seen);

                let deleted: HashSet<Uuid> = ordered.iter().copied().collect();
                Self::sweep_references(&deleted, schema, store, txn);
                for target in &ordered {
                    txn.delete(*target);
                }
                debug!(
                    "deleting {} row(s) rooted at {} {}",
                    ordered.len(),
                    leaf.table,
                    uuid
                );
                Ok(())
            }
        }
    }

    /// Depth-first, pre-order over the declared children list, pushing
    /// leaf rows before the row that owns them.
    fn collect_subtree(
        uuid: Uuid,
        table_name: &str,
        schema: &Schema,
        store: &dyn RowStore,
        out: &mut Vec<Uuid>,
        seen: &mut HashSet<Uuid>,
    ) {
        if !seen.insert(uuid) {
            return;
        }
        let (Some(table), Some(row)) = (schema.table(table_name), store.get_row(&uuid)) else {
            return;
        };
        for reference in table.child_columns() {
            if let Some(value) = row.get(&reference.column) {
                for child in value.ref_uuids() {
                    Self::collect_subtree(child, &reference.table, schema, store, out, seen);
                }
            }
        }
        out.push(uuid);
    }

    /// Full-graph reverse-reference sweep: remove every reference to any
    /// deleted row from every surviving row, using the schema's reverse
    /// reference map to bound the scan.
    fn sweep_references(
        deleted: &HashSet<Uuid>,
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
    ) {
        let mut deleted_tables: HashSet<String> = HashSet::new();
        for uuid in deleted {
            if let Some(row) = store.get_row(uuid) {
                deleted_tables.insert(row.table);
            }
        }

        let mut scanned: HashSet<(Uuid, String)> = HashSet::new();
        for target_table in &deleted_tables {
            let Some(referencers) = schema.references_table_map.get(target_table) else {
                continue;
            };
            for (ref_table, columns) in referencers {
                for row in store.list_rows(ref_table) {
                    if deleted.contains(&row.uuid) {
                        continue;
                    }
                    for column in columns {
                        if !scanned.insert((row.uuid, column.clone())) {
                            continue;
                        }
                        let Some(value) = row.get(column) else {
                            continue;
                        };
                        let mut updated = value.clone();
                        let mut changed = false;
                        for uuid in deleted {
                            changed |= updated.remove_ref(uuid);
                        }
                        if !changed {
                            continue;
                        }
                        match updated {
                            ColumnValue::Scalar(_) => txn.clear(row.uuid, column),
                            other => txn.set(row.uuid, column, other),
                        }
                    }
                }
            }
        }
    }

    fn unlink(
        owner: Uuid,
        column: &str,
        target: Uuid,
        store: &dyn RowStore,
        txn: &mut Transaction,
    ) -> Result<(), RestError> {
        let owner_row = store
            .get_row(&owner)
            .ok_or_else(|| RestError::not_found("owning resource not found"))?;
        let Some(value) = owner_row.get(column) else {
            return Err(RestError::not_found("reference not present"));
        };
        let mut updated = value.clone();
        if !updated.remove_ref(&target) {
            return Err(RestError::not_found("reference not present"));
        }
        match updated {
            ColumnValue::Scalar(_) => txn.clear(owner, column),
            other => txn.set(owner, column, other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::resolve::PathResolver;
    use crate::logic::validate::ValidatorRegistry;
    use crate::logic::write::{RowWriter, WriteContext};
    use crate::seed;
    use crate::store::{MemoryStore, TransactionCoordinator};
    use axum::http::Method;
    use std::sync::Arc;

    async fn fixture() -> (Arc<Schema>, MemoryStore) {
        let schema = Arc::new(Schema::load(seed::switch_schema()).unwrap());
        let store = MemoryStore::new(schema.clone());
        seed::load_seed_data(&store, &schema).await.unwrap();
        (schema, store)
    }

    async fn post(
        schema: &Schema,
        store: &MemoryStore,
        path: &str,
        body: serde_json::Value,
    ) {
        let chain = PathResolver::resolve(path, schema, store, &Method::POST).unwrap();
        let (config, referenced_by) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        let validators = ValidatorRegistry::with_defaults();
        RowWriter::create(
            &chain, config, &referenced_by, schema, store, &mut txn, &mut ctx, &validators,
        )
        .unwrap();
        TransactionCoordinator::commit(store, &mut txn).await.unwrap();
    }

    async fn delete(
        schema: &Schema,
        store: &MemoryStore,
        path: &str,
    ) -> Result<(), RestError> {
        let chain = PathResolver::resolve(path, schema, store, &Method::DELETE)?;
        let mut txn = Transaction::new();
        let validators = ValidatorRegistry::with_defaults();
        DeleteEngine::delete(&chain, schema, store, &mut txn, &validators)?;
        TransactionCoordinator::commit(store, &mut txn).await
    }

    #[tokio::test]
    async fn cascade_deletes_children_before_owner() {
        let (schema, store) = fixture().await;
        post(
            &schema,
            &store,
            "system/bridges",
            serde_json::json!({
                "configuration": {
                    "name": "br1",
                    "ports": [{"name": "br1-p1"}, {"name": "br1-p2"}],
                    "vlans": {"30": {"id": 30, "name": "VLAN30"}}
                }
            }),
        )
        .await;

        delete(&schema, &store, "system/bridges/br1").await.unwrap();
        assert!(store.find_row("Bridge", "br1").is_none());
        assert!(store.find_row("Port", "br1-p1").is_none());
        assert!(store.find_row("Port", "br1-p2").is_none());
        assert!(store.find_row("VLAN", "30").is_none());
        // The owning reference in System is gone too.
        let system = store.list_rows("System").into_iter().next().unwrap();
        let bridges = system.get("bridges").unwrap().ref_uuids();
        assert_eq!(bridges.len(), 1);
    }

    #[tokio::test]
    async fn reference_delete_only_unlinks() {
        let (schema, store) = fixture().await;
        post(
            &schema,
            &store,
            "system/ports",
            serde_json::json!({
                "configuration": {"name": "Port-1"},
                "referenced_by": [{"uri": "/rest/v1/system/bridges/bridge_normal"}]
            }),
        )
        .await;
        // Wire the port into the default VRF's plain reference list.
        {
            let chain = PathResolver::resolve(
                "system/vrfs/vrf_default",
                &schema,
                &store,
                &Method::PUT,
            )
            .unwrap();
            let body = serde_json::json!({
                "configuration": {
                    "name": "vrf_default",
                    "ports": ["/rest/v1/system/ports/Port-1"]
                }
            });
            let (config, _) = RowWriter::parse_body(&body).unwrap();
            let mut txn = Transaction::new();
            let mut ctx = WriteContext::new();
            let validators = ValidatorRegistry::with_defaults();
            RowWriter::update(
                &chain, config, &schema, &store, &mut txn, &mut ctx, &validators,
            )
            .unwrap();
            TransactionCoordinator::commit(&store, &mut txn).await.unwrap();
        }

        delete(&schema, &store, "system/vrfs/vrf_default/ports/Port-1")
            .await
            .unwrap();
        // Row survives; only the VRF's reference is gone.
        assert!(store.find_row("Port", "Port-1").is_some());
        let vrf = store.find_row("VRF", "vrf_default").unwrap();
        assert!(vrf.get("ports").map(|v| v.is_empty()).unwrap_or(true));
        let bridge = store.find_row("Bridge", "bridge_normal").unwrap();
        assert_eq!(bridge.get("ports").unwrap().ref_uuids().len(), 1);
    }

    #[tokio::test]
    async fn back_reference_delete_sweeps_all_references() {
        let (schema, store) = fixture().await;
        post(
            &schema,
            &store,
            "system/ports",
            serde_json::json!({
                "configuration": {"name": "Port-1"},
                "referenced_by": [{"uri": "/rest/v1/system/bridges/bridge_normal"}]
            }),
        )
        .await;

        delete(&schema, &store, "system/ports/Port-1").await.unwrap();
        assert!(store.find_row("Port", "Port-1").is_none());
        let bridge = store.find_row("Bridge", "bridge_normal").unwrap();
        assert!(bridge.get("ports").map(|v| v.is_empty()).unwrap_or(true));
    }

    #[tokio::test]
    async fn default_rows_are_protected() {
        let (schema, store) = fixture().await;
        for path in [
            "system/bridges/bridge_normal",
            "system/vrfs/vrf_default",
            "system/bridges/bridge_normal/vlans/1",
            "system/interfaces/eth0",
        ] {
            let err = delete(&schema, &store, path).await.unwrap_err();
            assert!(
                matches!(err, RestError::MethodNotAllowed(_)),
                "expected 405 for {path}"
            );
        }
    }

    #[tokio::test]
    async fn root_cannot_be_deleted() {
        let (schema, store) = fixture().await;
        let err = delete(&schema, &store, "system").await.unwrap_err();
        assert!(matches!(err, RestError::MethodNotAllowed(_)));
    }
}
