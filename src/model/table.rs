use crate::model::common::{BaseType, Category, ColumnValue, RelationKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Column category, either fixed by the schema or resolved per-row from
/// another column's value.
#[derive(Debug, Clone, PartialEq)]
pub enum CategorySpec {
    Fixed(Category),
    Dynamic {
        /// Column whose string value selects the effective category.
        follows: String,
        mapping: HashMap<String, Category>,
        default: Category,
    },
}

impl CategorySpec {
    pub fn declared(&self) -> Category {
        match self {
            CategorySpec::Fixed(c) => *c,
            CategorySpec::Dynamic { default, .. } => *default,
        }
    }
}

/// Value bounds declared for a column or for one key of a map column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// Per-key type/range override for map-valued columns.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySpec {
    pub base: BaseType,
    pub bounds: ValueBounds,
}

/// A non-reference column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub category: CategorySpec,
    pub base: BaseType,
    pub bounds: ValueBounds,
    pub n_min: usize,
    pub n_max: usize,
    pub is_map: bool,
    pub key_base: Option<BaseType>,
    pub mutable: bool,
    pub key_specs: HashMap<String, KeySpec>,
}

impl Column {
    pub fn is_scalar(&self) -> bool {
        !self.is_map && self.n_max == 1
    }

    pub fn is_list(&self) -> bool {
        !self.is_map && self.n_max > 1
    }

    pub fn is_optional(&self) -> bool {
        self.n_min == 0
    }

    /// The value an absent optional column resets to on full replace.
    /// Scalars have no empty form; they are simply removed from the row.
    pub fn empty_value(&self) -> Option<ColumnValue> {
        if self.is_map {
            Some(ColumnValue::Map(BTreeMap::new()))
        } else if self.is_list() {
            Some(ColumnValue::List(Vec::new()))
        } else {
            None
        }
    }
}

/// A typed edge from one table's column to another table.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub column: String,
    pub table: String,
    pub kind: RelationKind,
    pub is_plural: bool,
    /// `Some` for key/value references (map keyed by this base type).
    pub key_base: Option<BaseType>,
    pub mutable: bool,
    pub category: Category,
    pub n_min: usize,
}

impl Reference {
    pub fn is_map(&self) -> bool {
        self.key_base.is_some()
    }
}

/// One table of the schema. Constructed at load time; `mutable` and
/// `parent` are back-filled once every table has parsed.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub plural: String,
    pub is_root: bool,
    pub max_rows: usize,
    pub mutable: bool,
    /// Ordered index column names; empty means rows are addressed by uuid.
    pub indexes: Vec<String>,
    pub parent: Option<String>,
    pub columns: BTreeMap<String, Column>,
    pub references: BTreeMap<String, Reference>,
}

impl Table {
    pub fn is_plural(&self) -> bool {
        self.max_rows != 1
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn reference(&self, name: &str) -> Option<&Reference> {
        self.references.get(name)
    }

    /// Names of this table's child relation columns, in declaration order.
    pub fn child_columns(&self) -> Vec<&Reference> {
        self.references
            .values()
            .filter(|r| r.kind == RelationKind::Child)
            .collect()
    }

    /// Columns of the given fixed category (dynamic columns group under
    /// their declared default here; reads re-group per-row).
    pub fn columns_of(&self, category: Category) -> impl Iterator<Item = &Column> {
        self.columns
            .values()
            .filter(move |c| c.category.declared() == category)
    }
}

/// Summary row for the schema listing endpoint.
#[derive(Debug, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub plural: String,
    #[serde(rename = "isRoot")]
    pub is_root: bool,
    pub mutable: bool,
    pub indexes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl From<&Table> for TableSummary {
    fn from(table: &Table) -> Self {
        Self {
            name: table.name.clone(),
            plural: table.plural.clone(),
            is_root: table.is_root,
            mutable: table.mutable,
            indexes: table.indexes.clone(),
            parent: table.parent.clone(),
        }
    }
}
