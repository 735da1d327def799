use crate::error::RestError;
use crate::model::ColumnValue;
use crate::store::traits::{ChangeSet, CommitOutcome, RowOp, RowStore, TxnStatus};
use log::{debug, warn};
use uuid::Uuid;

/// Request-local write transaction: staged operations plus completion
/// state. Created per write request, discarded after the response.
#[derive(Debug)]
pub struct Transaction {
    changes: ChangeSet,
    pub status: TxnStatus,
    pub message: Option<String>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            changes: ChangeSet::default(),
            status: TxnStatus::Uncommitted,
            message: None,
        }
    }

    /// Stage a row insert, returning the handle the new row will have.
    pub fn insert(&mut self, table: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.changes.ops.push(RowOp::Insert {
            uuid,
            table: table.to_string(),
        });
        uuid
    }

    pub fn set(&mut self, row: Uuid, column: &str, value: ColumnValue) {
        self.changes.ops.push(RowOp::Set {
            uuid: row,
            column: column.to_string(),
            value,
        });
    }

    pub fn clear(&mut self, row: Uuid, column: &str) {
        self.changes.ops.push(RowOp::Clear {
            uuid: row,
            column: column.to_string(),
        });
    }

    pub fn delete(&mut self, row: Uuid) {
        self.changes.ops.push(RowOp::Delete { uuid: row });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn op_count(&self) -> usize {
        self.changes.ops.len()
    }

    /// Discard staged work. Safe to call in any state.
    pub fn abort(&mut self) {
        self.changes.ops.clear();
        self.status = TxnStatus::Aborted;
    }
}

/// Submits transactions and correlates the engine's asynchronous
/// completion back to the suspended caller.
pub struct TransactionCoordinator;

impl TransactionCoordinator {
    /// Commit the staged changes and wait for the terminal state. On any
    /// terminal state other than Success/Unchanged the transaction is
    /// aborted before the error is surfaced, so no partially-applied
    /// transaction is ever left pending.
    pub async fn commit(store: &dyn RowStore, txn: &mut Transaction) -> Result<(), RestError> {
        if txn.is_empty() {
            txn.status = TxnStatus::Unchanged;
            return Ok(());
        }
        if !store.ready() {
            txn.abort();
            return Err(RestError::Unavailable("database connection is down".into()));
        }

        let pending = store.submit(std::mem::take(&mut txn.changes)).await;
        txn.status = TxnStatus::Incomplete;

        // Suspension point: resumes when the engine observes the
        // transaction's terminal state.
        let outcome = pending
            .done
            .await
            .unwrap_or_else(|_| CommitOutcome::error("commit completion signal lost"));

        txn.status = outcome.status;
        txn.message = outcome.message;
        debug!("transaction completed: {:?}", txn.status);

        if txn.status.is_success() {
            Ok(())
        } else {
            let message = txn
                .message
                .clone()
                .unwrap_or_else(|| format!("{:?}", txn.status));
            warn!("transaction failed ({:?}): {}", txn.status, message);
            txn.abort();
            Err(RestError::Transaction(message))
        }
    }
}
