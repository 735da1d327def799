use crate::model::Schema;
use crate::store::traits::{
    ChangeSet, CommitOutcome, PendingTxn, RowData, RowOp, RowStore,
};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Default, Clone)]
struct Graph {
    rows: HashMap<Uuid, RowData>,
    by_table: HashMap<String, Vec<Uuid>>,
}

/// In-process row graph implementing the engine interface. Writers apply
/// whole changesets under the write lock; readers serialize the committed
/// snapshot and never block on an in-flight changeset.
pub struct MemoryStore {
    schema: Arc<Schema>,
    ready: AtomicBool,
    inner: RwLock<Graph>,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            ready: AtomicBool::new(true),
            inner: RwLock::new(Graph::default()),
        }
    }

    /// Simulate the database connection dropping. Test hook.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn apply(&self, changes: &ChangeSet) -> CommitOutcome {
        let mut guard = self.inner.write();
        // Work on a copy so a failing op leaves nothing partially applied.
        let mut graph = guard.clone();
        let mut changed = false;

        for op in &changes.ops {
            match op {
                RowOp::Insert { uuid, table } => {
                    let Some(table_def) = self.schema.table(table) else {
                        return CommitOutcome::error(format!("unknown table {}", table));
                    };
                    let existing = graph
                        .by_table
                        .get(table.as_str())
                        .map(|v| v.len())
                        .unwrap_or(0);
                    if existing >= table_def.max_rows {
                        return CommitOutcome::error(format!(
                            "table {} is limited to {} row(s)",
                            table, table_def.max_rows
                        ));
                    }
                    graph.rows.insert(*uuid, RowData::new(*uuid, table.clone()));
                    graph
                        .by_table
                        .entry(table.clone())
                        .or_default()
                        .push(*uuid);
                    changed = true;
                }
                RowOp::Set {
                    uuid,
                    column,
                    value,
                } => {
                    let Some(row) = graph.rows.get_mut(uuid) else {
                        return CommitOutcome::error(format!("no such row {}", uuid));
                    };
                    if row.columns.get(column) != Some(value) {
                        row.columns.insert(column.clone(), value.clone());
                        changed = true;
                    }
                }
                RowOp::Clear { uuid, column } => {
                    let Some(row) = graph.rows.get_mut(uuid) else {
                        return CommitOutcome::error(format!("no such row {}", uuid));
                    };
                    if row.columns.remove(column).is_some() {
                        changed = true;
                    }
                }
                RowOp::Delete { uuid } => {
                    let Some(row) = graph.rows.remove(uuid) else {
                        return CommitOutcome::error(format!("no such row {}", uuid));
                    };
                    if let Some(order) = graph.by_table.get_mut(&row.table) {
                        order.retain(|u| u != uuid);
                    }
                    changed = true;
                }
            }
        }

        // Index uniqueness over the post-apply graph; a violated index
        // aborts the whole changeset.
        for (table_name, order) in &graph.by_table {
            if let Some(table_def) = self.schema.table(table_name) {
                if table_def.indexes.is_empty() {
                    continue;
                }
                let mut seen = HashMap::new();
                for uuid in order {
                    if let Some(row) = graph.rows.get(uuid) {
                        let index = row.index(table_def);
                        if let Some(previous) = seen.insert(index.clone(), *uuid) {
                            return CommitOutcome::error(format!(
                                "duplicate index '{}' in table {} ({} vs {})",
                                index, table_name, previous, uuid
                            ));
                        }
                    }
                }
            }
        }

        *guard = graph;
        if changed {
            CommitOutcome::success()
        } else {
            CommitOutcome::unchanged()
        }
    }
}

#[async_trait::async_trait]
impl RowStore for MemoryStore {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn get_row(&self, uuid: &Uuid) -> Option<RowData> {
        self.inner.read().rows.get(uuid).cloned()
    }

    fn list_rows(&self, table: &str) -> Vec<RowData> {
        let guard = self.inner.read();
        guard
            .by_table
            .get(table)
            .map(|order| {
                order
                    .iter()
                    .filter_map(|u| guard.rows.get(u).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn count_rows(&self, table: &str) -> usize {
        self.inner
            .read()
            .by_table
            .get(table)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    fn find_row(&self, table: &str, index: &str) -> Option<RowData> {
        let table_def = self.schema.table(table)?;
        let guard = self.inner.read();
        let order = guard.by_table.get(table)?;
        order
            .iter()
            .filter_map(|u| guard.rows.get(u))
            .find(|row| row.index(table_def) == index)
            .cloned()
    }

    async fn submit(&self, changes: ChangeSet) -> PendingTxn {
        let (tx, rx) = oneshot::channel();
        let outcome = self.apply(&changes);
        debug!(
            "changeset of {} op(s) committed: {:?}",
            changes.ops.len(),
            outcome.status
        );
        // The receiver side observes the terminal state through the
        // completion signal, exactly as it would from a remote engine.
        let _ = tx.send(outcome);
        PendingTxn { done: rx }
    }
}
