use crate::model::{encode_index, ColumnValue, Table};
use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Transient copy of one database row. The core never owns rows; it holds
/// these snapshots for the duration of one request.
#[derive(Debug, Clone)]
pub struct RowData {
    pub uuid: Uuid,
    pub table: String,
    pub columns: HashMap<String, ColumnValue>,
}

impl RowData {
    pub fn new(uuid: Uuid, table: impl Into<String>) -> Self {
        Self {
            uuid,
            table: table.into(),
            columns: HashMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.get(column)
    }

    /// The row's computed index: the ordered tuple of index-column values,
    /// escaped and joined, or the uuid when the table declares no indexes.
    pub fn index(&self, table: &Table) -> String {
        if table.indexes.is_empty() {
            return self.uuid.to_string();
        }
        let components: Vec<String> = table
            .indexes
            .iter()
            .map(|col| match self.columns.get(col) {
                Some(ColumnValue::Scalar(d)) => d.index_text(),
                _ => String::new(),
            })
            .collect();
        encode_index(&components)
    }
}

/// One staged mutation. A changeset applies atomically or not at all.
#[derive(Debug, Clone)]
pub enum RowOp {
    Insert { uuid: Uuid, table: String },
    Set {
        uuid: Uuid,
        column: String,
        value: ColumnValue,
    },
    Clear { uuid: Uuid, column: String },
    Delete { uuid: Uuid },
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub ops: Vec<RowOp>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Terminal and non-terminal transaction states, mirroring the database
/// engine's commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Uncommitted,
    Incomplete,
    Success,
    Unchanged,
    Aborted,
    Error,
    TryAgain,
    NotLocked,
}

impl TxnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxnStatus::Uncommitted | TxnStatus::Incomplete)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxnStatus::Success | TxnStatus::Unchanged)
    }
}

/// What the engine reports when a submitted transaction reaches a terminal
/// state.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub status: TxnStatus,
    pub message: Option<String>,
}

impl CommitOutcome {
    pub fn success() -> Self {
        Self {
            status: TxnStatus::Success,
            message: None,
        }
    }

    pub fn unchanged() -> Self {
        Self {
            status: TxnStatus::Unchanged,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TxnStatus::Error,
            message: Some(message.into()),
        }
    }
}

/// Handle for a submitted transaction. The commit-completion signal fires
/// exactly once, when the engine observes the terminal state.
#[derive(Debug)]
pub struct PendingTxn {
    pub done: oneshot::Receiver<CommitOutcome>,
}

/// The narrow interface the core consumes from the database engine: row
/// lookups over the committed snapshot, plus asynchronous commit.
#[async_trait::async_trait]
pub trait RowStore: Send + Sync {
    /// Whether the database connection is usable. `false` maps to 503.
    fn ready(&self) -> bool;

    fn get_row(&self, uuid: &Uuid) -> Option<RowData>;

    /// All committed rows of a table, in insertion order.
    fn list_rows(&self, table: &str) -> Vec<RowData>;

    fn count_rows(&self, table: &str) -> usize;

    /// Look a row up by its computed index.
    fn find_row(&self, table: &str, index: &str) -> Option<RowData>;

    /// Stage a changeset for commit. The returned handle's completion
    /// signal resolves once the engine reaches a terminal state; nothing
    /// is partially applied on failure.
    async fn submit(&self, changes: ChangeSet) -> PendingTxn;
}
