use crate::error::SchemaError;
use crate::model::common::{BaseType, Category, RelationKind};
use crate::model::table::{
    CategorySpec, Column, KeySpec, Reference, Table, TableSummary, ValueBounds,
};
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// In-memory schema model. Built once at startup from the JSON schema
/// description and read-only for the process lifetime.
#[derive(Debug)]
pub struct Schema {
    pub name: String,
    pub version: String,
    pub tables: BTreeMap<String, Table>,
    /// plural resource name -> table name
    pub plural_map: BTreeMap<String, String>,
    /// reference column name -> referenced table (first-seen wins)
    pub reference_map: BTreeMap<String, String>,
    /// referenced table -> {referencing table: [column names]}
    pub references_table_map: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    root: String,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    name: String,
    version: String,
    tables: BTreeMap<String, RawTable>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    columns: BTreeMap<String, RawColumn>,
    #[serde(default)]
    indexes: Vec<String>,
    #[serde(default, rename = "isRoot")]
    is_root: bool,
    #[serde(rename = "maxRows")]
    max_rows: Option<usize>,
    plural: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    category: Option<serde_json::Value>,
    #[serde(rename = "type")]
    ty: serde_json::Value,
    relationship: Option<String>,
    #[serde(default = "default_true")]
    mutable: bool,
    #[serde(default, rename = "keysWithTypes")]
    keys_with_types: BTreeMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// One side (key or value) of a column type declaration.
#[derive(Debug, Clone)]
struct BaseSpec {
    base: BaseType,
    bounds: ValueBounds,
    ref_table: Option<String>,
}

fn parse_base_spec(column: &str, value: &serde_json::Value) -> Result<BaseSpec, SchemaError> {
    match value {
        serde_json::Value::String(name) => {
            let base = BaseType::parse(name).ok_or_else(|| {
                SchemaError::UnknownBaseType(name.clone(), column.to_string())
            })?;
            Ok(BaseSpec {
                base,
                bounds: ValueBounds::default(),
                ref_table: None,
            })
        }
        serde_json::Value::Object(obj) => {
            let name = obj
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SchemaError::MissingField(format!("{column}.type")))?;
            let base = BaseType::parse(name).ok_or_else(|| {
                SchemaError::UnknownBaseType(name.to_string(), column.to_string())
            })?;
            let num = |key: &str| obj.get(key).and_then(|v| v.as_f64());
            let len = |key: &str| obj.get(key).and_then(|v| v.as_u64()).map(|v| v as usize);
            Ok(BaseSpec {
                base,
                bounds: ValueBounds {
                    min: num("minInteger").or_else(|| num("minReal")),
                    max: num("maxInteger").or_else(|| num("maxReal")),
                    min_length: len("minLength"),
                    max_length: len("maxLength"),
                },
                ref_table: obj
                    .get("refTable")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            })
        }
        other => Err(SchemaError::UnknownBaseType(
            other.to_string(),
            column.to_string(),
        )),
    }
}

/// Parsed form of a column's `type` field: key spec, optional value spec
/// (present for map columns), and cardinality.
struct TypeSpec {
    key: BaseSpec,
    value: Option<BaseSpec>,
    n_min: usize,
    n_max: usize,
}

fn parse_type_spec(column: &str, ty: &serde_json::Value) -> Result<TypeSpec, SchemaError> {
    match ty {
        serde_json::Value::String(_) => Ok(TypeSpec {
            key: parse_base_spec(column, ty)?,
            value: None,
            n_min: 1,
            n_max: 1,
        }),
        serde_json::Value::Object(obj) => {
            let key_raw = obj
                .get("key")
                .ok_or_else(|| SchemaError::MissingField(format!("{column}.type.key")))?;
            let key = parse_base_spec(column, key_raw)?;
            let value = obj
                .get("value")
                .map(|v| parse_base_spec(column, v))
                .transpose()?;
            let n_min = obj.get("min").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
            let n_max = match obj.get("max") {
                Some(serde_json::Value::String(s)) if s == "unlimited" => usize::MAX,
                Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(1) as usize,
                None => 1,
                Some(other) => {
                    return Err(SchemaError::UnknownBaseType(
                        other.to_string(),
                        format!("{column}.type.max"),
                    ))
                }
            };
            Ok(TypeSpec {
                key,
                value,
                n_min,
                n_max,
            })
        }
        other => Err(SchemaError::UnknownBaseType(
            other.to_string(),
            column.to_string(),
        )),
    }
}

fn parse_category(raw: &serde_json::Value) -> Option<CategorySpec> {
    match raw {
        serde_json::Value::String(name) => Category::parse(name).map(CategorySpec::Fixed),
        serde_json::Value::Object(obj) => {
            let follows = obj.get("follows")?.as_str()?.to_string();
            let default = Category::parse(obj.get("default")?.as_str()?)?;
            let mut mapping = HashMap::new();
            for (value, cat) in obj.get("mapping")?.as_object()? {
                mapping.insert(value.clone(), Category::parse(cat.as_str()?)?);
            }
            Some(CategorySpec::Dynamic {
                follows,
                mapping,
                default,
            })
        }
        _ => None,
    }
}

fn valid_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

impl Schema {
    pub fn from_str(description: &str) -> Result<Schema, SchemaError> {
        let raw: RawSchema = serde_json::from_str(description)?;
        Self::build(raw)
    }

    pub fn load(description: serde_json::Value) -> Result<Schema, SchemaError> {
        let raw: RawSchema = serde_json::from_value(description)?;
        Self::build(raw)
    }

    fn build(raw: RawSchema) -> Result<Schema, SchemaError> {
        if !valid_version(&raw.version) {
            return Err(SchemaError::BadVersion(raw.version));
        }

        let mut tables: BTreeMap<String, Table> = BTreeMap::new();
        for (table_name, raw_table) in &raw.tables {
            tables.insert(table_name.clone(), Self::build_table(table_name, raw_table)?);
        }

        // Reference targets must exist before any back-fill runs.
        for table in tables.values() {
            for reference in table.references.values() {
                if !tables.contains_key(&reference.table) {
                    return Err(SchemaError::UnknownRefTable(
                        reference.column.clone(),
                        reference.table.clone(),
                    ));
                }
            }
        }

        // Pass 1: back-fill parent pointers from child declarations. Child
        // and parent declarations may appear in either table's entry, so
        // this cannot happen while tables parse.
        let mut parents: BTreeMap<String, String> = BTreeMap::new();
        for table in tables.values() {
            for reference in table.references.values() {
                if reference.kind == RelationKind::Child {
                    parents
                        .entry(reference.table.clone())
                        .or_insert_with(|| table.name.clone());
                }
            }
        }
        for (child, parent) in parents {
            if let Some(table) = tables.get_mut(&child) {
                table.parent = Some(parent);
            }
        }

        // Pass 2: compute mutability. A table can be created/deleted over
        // REST iff at least one of its index columns is configuration
        // category, directly or through a configuration-category reference.
        let mutability: BTreeMap<String, bool> = tables
            .values()
            .map(|table| {
                let mutable = table.indexes.iter().any(|index_col| {
                    if let Some(column) = table.columns.get(index_col) {
                        column.category.declared() == Category::Configuration
                    } else if let Some(reference) = table.references.get(index_col) {
                        reference.category == Category::Configuration
                    } else {
                        false
                    }
                });
                (table.name.clone(), mutable)
            })
            .collect();
        for (name, mutable) in mutability {
            if let Some(table) = tables.get_mut(&name) {
                table.mutable = mutable;
            }
        }

        // Derived maps.
        let mut plural_map = BTreeMap::new();
        let mut reference_map = BTreeMap::new();
        let mut references_table_map: BTreeMap<String, BTreeMap<String, Vec<String>>> =
            BTreeMap::new();
        let mut root = None;
        for table in tables.values() {
            plural_map
                .entry(table.plural.clone())
                .or_insert_with(|| table.name.clone());
            if table.is_root && !table.is_plural() {
                root.get_or_insert_with(|| table.name.clone());
            }
            for reference in table.references.values() {
                if reference.kind == RelationKind::Parent {
                    continue;
                }
                reference_map
                    .entry(reference.column.clone())
                    .or_insert_with(|| reference.table.clone());
                references_table_map
                    .entry(reference.table.clone())
                    .or_default()
                    .entry(table.name.clone())
                    .or_default()
                    .push(reference.column.clone());
            }
        }

        let root = root.ok_or_else(|| SchemaError::MissingField("singular root table".into()))?;

        Ok(Schema {
            name: raw.name,
            version: raw.version,
            tables,
            plural_map,
            reference_map,
            references_table_map,
            root,
        })
    }

    fn build_table(name: &str, raw: &RawTable) -> Result<Table, SchemaError> {
        let mut columns = BTreeMap::new();
        let mut references = BTreeMap::new();

        for (col_name, raw_col) in &raw.columns {
            let spec = parse_type_spec(col_name, &raw_col.ty)?;

            if let Some(relationship) = &raw_col.relationship {
                let kind = match relationship.as_str() {
                    "child" => RelationKind::Child,
                    "parent" => RelationKind::Parent,
                    "reference" => RelationKind::Reference,
                    other => {
                        debug!("skipping column {name}.{col_name}: unknown relationship '{other}'");
                        continue;
                    }
                };
                let ref_table = spec
                    .value
                    .as_ref()
                    .and_then(|v| v.ref_table.clone())
                    .or_else(|| spec.key.ref_table.clone());
                let Some(ref_table) = ref_table else {
                    debug!("skipping column {name}.{col_name}: relationship without refTable");
                    continue;
                };
                let category = match &raw_col.category {
                    Some(raw_cat) => match parse_category(raw_cat) {
                        Some(CategorySpec::Fixed(c)) => c,
                        _ => {
                            debug!("skipping column {name}.{col_name}: unrecognized category");
                            continue;
                        }
                    },
                    None => Category::Configuration,
                };
                // Key/value references keep uuids on the value side.
                let key_base = if spec.value.as_ref().and_then(|v| v.ref_table.as_ref()).is_some()
                {
                    Some(spec.key.base)
                } else {
                    None
                };
                references.insert(
                    col_name.clone(),
                    Reference {
                        column: col_name.clone(),
                        table: ref_table,
                        kind,
                        is_plural: spec.n_max > 1,
                        key_base,
                        mutable: raw_col.mutable,
                        category,
                        n_min: spec.n_min,
                    },
                );
                continue;
            }

            let Some(raw_cat) = &raw_col.category else {
                debug!("skipping column {name}.{col_name}: no category");
                continue;
            };
            let Some(category) = parse_category(raw_cat) else {
                debug!("skipping column {name}.{col_name}: unrecognized category");
                continue;
            };

            let mut key_specs = HashMap::new();
            for (key, raw_spec) in &raw_col.keys_with_types {
                let parsed = parse_base_spec(&format!("{col_name}.{key}"), raw_spec)?;
                key_specs.insert(
                    key.clone(),
                    KeySpec {
                        base: parsed.base,
                        bounds: parsed.bounds,
                    },
                );
            }

            let is_map = spec.value.is_some();
            let (base, bounds, key_base) = if let Some(value_spec) = spec.value {
                (value_spec.base, value_spec.bounds, Some(spec.key.base))
            } else {
                (spec.key.base, spec.key.bounds, None)
            };

            columns.insert(
                col_name.clone(),
                Column {
                    name: col_name.clone(),
                    category,
                    base,
                    bounds,
                    n_min: spec.n_min,
                    n_max: spec.n_max,
                    is_map,
                    key_base,
                    mutable: raw_col.mutable,
                    key_specs,
                },
            );
        }

        Ok(Table {
            name: name.to_string(),
            plural: raw
                .plural
                .clone()
                .unwrap_or_else(|| format!("{}s", name.to_lowercase())),
            is_root: raw.is_root,
            max_rows: raw.max_rows.unwrap_or(usize::MAX),
            mutable: false,
            indexes: raw.indexes.clone(),
            parent: None,
            columns,
            references,
        })
    }

    pub fn root_table(&self) -> &Table {
        &self.tables[&self.root]
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_by_plural(&self, plural: &str) -> Option<&Table> {
        self.plural_map.get(plural).and_then(|n| self.tables.get(n))
    }

    /// Tables that declare a child column pointing at `target`, with the
    /// column names. Used for back-reference discovery.
    pub fn child_edges_into(&self, target: &str) -> Vec<(&Table, &Reference)> {
        self.tables
            .values()
            .flat_map(|t| {
                t.references
                    .values()
                    .filter(|r| r.kind == RelationKind::Child && r.table == target)
                    .map(move |r| (t, r))
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<TableSummary> {
        self.tables.values().map(TableSummary::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_schema() -> serde_json::Value {
        serde_json::json!({
            "name": "Tiny",
            "version": "1.0.0",
            "tables": {
                "System": {
                    "isRoot": true,
                    "maxRows": 1,
                    "columns": {
                        "hostname": {"category": "configuration", "type": "string"},
                        "bridges": {
                            "category": "configuration",
                            "relationship": "child",
                            "type": {"key": {"type": "uuid", "refTable": "Bridge"},
                                     "min": 0, "max": "unlimited"}
                        }
                    }
                },
                "Bridge": {
                    "indexes": ["name"],
                    "columns": {
                        "name": {"category": "configuration", "mutable": false, "type": "string"},
                        "internal": {"type": "boolean"},
                        "status": {"category": "status",
                                   "type": {"key": "string", "value": "string",
                                            "min": 0, "max": "unlimited"}}
                    }
                }
            }
        })
    }

    #[test]
    fn loads_and_backfills_parent() {
        let schema = Schema::load(tiny_schema()).unwrap();
        assert_eq!(schema.root_table().name, "System");
        let bridge = schema.table("Bridge").unwrap();
        assert_eq!(bridge.parent.as_deref(), Some("System"));
        assert_eq!(schema.plural_map["bridges"], "Bridge");
        assert_eq!(schema.reference_map["bridges"], "Bridge");
    }

    #[test]
    fn cardinality_tracks_max_rows() {
        let schema = Schema::load(tiny_schema()).unwrap();
        assert!(!schema.table("System").unwrap().is_plural());
        assert!(schema.table("Bridge").unwrap().is_plural());
    }

    #[test]
    fn mutability_follows_index_category() {
        let schema = Schema::load(tiny_schema()).unwrap();
        assert!(schema.table("Bridge").unwrap().mutable);
        // Root with no index columns is immutable by construction.
        assert!(!schema.table("System").unwrap().mutable);
    }

    #[test]
    fn uncategorized_columns_are_skipped() {
        let schema = Schema::load(tiny_schema()).unwrap();
        let bridge = schema.table("Bridge").unwrap();
        assert!(bridge.column("internal").is_none());
        assert!(bridge.column("status").is_some());
    }

    #[test]
    fn bad_version_fails_fast() {
        let mut desc = tiny_schema();
        desc["version"] = serde_json::json!("1.0");
        assert!(matches!(
            Schema::load(desc),
            Err(SchemaError::BadVersion(_))
        ));
    }

    #[test]
    fn unknown_base_type_fails_fast() {
        let mut desc = tiny_schema();
        desc["tables"]["Bridge"]["columns"]["name"]["type"] = serde_json::json!("blob");
        assert!(matches!(
            Schema::load(desc),
            Err(SchemaError::UnknownBaseType(..))
        ));
    }

    #[test]
    fn reference_to_unknown_table_fails_fast() {
        let mut desc = tiny_schema();
        desc["tables"]["System"]["columns"]["bridges"]["type"]["key"]["refTable"] =
            serde_json::json!("Nope");
        assert!(matches!(
            Schema::load(desc),
            Err(SchemaError::UnknownRefTable(..))
        ));
    }

    #[test]
    fn map_column_shape() {
        let schema = Schema::load(tiny_schema()).unwrap();
        let status = schema.table("Bridge").unwrap().column("status").unwrap();
        assert!(status.is_map);
        assert_eq!(status.key_base, Some(BaseType::String));
        assert_eq!(status.base, BaseType::String);
    }

    #[test]
    fn dynamic_category_parses() {
        let mut desc = tiny_schema();
        desc["tables"]["Bridge"]["columns"]["mode"] = serde_json::json!({
            "category": {"follows": "name",
                         "mapping": {"internal": "status"},
                         "default": "configuration"},
            "type": "string"
        });
        let schema = Schema::load(desc).unwrap();
        let mode = schema.table("Bridge").unwrap().column("mode").unwrap();
        match &mode.category {
            CategorySpec::Dynamic { follows, default, .. } => {
                assert_eq!(follows, "name");
                assert_eq!(*default, Category::Configuration);
            }
            other => panic!("expected dynamic category, got {other:?}"),
        }
    }
}
