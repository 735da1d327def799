use crate::error::RestError;
use crate::logic::resolve::PathResolver;
use crate::logic::serialize::URI_PREFIX;
use crate::logic::validate::{ValidationArgs, ValidatorRegistry, WriteOp};
use crate::model::{
    BaseType, Category, ColumnValue, Column, Datum, Reference, RelationKind, Relation,
    ResourceChain, Schema, Table,
};
use crate::store::{RowData, RowStore, Transaction};
use axum::http::Method;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Request-scoped map of rows staged earlier in the same bulk write,
/// keyed by (table, index). Lets later siblings resolve forward
/// references to rows that do not exist in the committed graph yet.
#[derive(Default)]
pub struct WriteContext {
    staged: HashMap<(String, String), Uuid>,
}

impl WriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: &str, index: &str, uuid: Uuid) {
        self.staged
            .insert((table.to_string(), index.to_string()), uuid);
    }

    pub fn lookup(&self, table: &str, index: &str) -> Option<Uuid> {
        self.staged
            .get(&(table.to_string(), index.to_string()))
            .copied()
    }
}

/// An entry of the body's `referenced_by` list, wiring ownership of a
/// row created through a back-referenced top-level collection.
#[derive(Debug, Clone)]
pub struct ReferencedBy {
    pub uri: String,
    pub attribute: Option<String>,
}

/// Applies verified configuration data to the row graph: inserts,
/// updates, reference wiring, and recursive child population.
pub struct RowWriter;

impl RowWriter {
    /// Extract `{"configuration": {...}}` plus the optional
    /// `referenced_by` list from a request body.
    pub fn parse_body(
        body: &serde_json::Value,
    ) -> Result<(&serde_json::Map<String, serde_json::Value>, Vec<ReferencedBy>), RestError> {
        let object = body
            .as_object()
            .ok_or_else(|| RestError::validation("request body must be a JSON object"))?;
        let config = object
            .get("configuration")
            .and_then(|c| c.as_object())
            .ok_or_else(|| {
                RestError::validation("request body must carry a 'configuration' object")
            })?;
        let mut referenced_by = Vec::new();
        if let Some(raw) = object.get("referenced_by") {
            let entries = raw.as_array().ok_or_else(|| {
                RestError::validation("'referenced_by' must be a list")
            })?;
            for entry in entries {
                let uri = entry
                    .get("uri")
                    .and_then(|u| u.as_str())
                    .ok_or_else(|| {
                        RestError::validation("'referenced_by' entries need a 'uri'")
                    })?;
                referenced_by.push(ReferencedBy {
                    uri: uri.to_string(),
                    attribute: entry
                        .get("attribute")
                        .and_then(|a| a.as_str())
                        .map(|s| s.to_string()),
                });
            }
        }
        Ok((config, referenced_by))
    }

    /// Create a row in the collection the chain addresses, wiring it into
    /// its owner. Returns the new row's handle.
    pub fn create(
        chain: &ResourceChain,
        config: &serde_json::Map<String, serde_json::Value>,
        referenced_by: &[ReferencedBy],
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
        ctx: &mut WriteContext,
        validators: &ValidatorRegistry,
    ) -> Result<Uuid, RestError> {
        let leaf = chain.last();
        let table = schema
            .table(&leaf.table)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", leaf.table)))?;
        if !table.mutable {
            return Err(RestError::MethodNotAllowed(format!(
                "cannot create rows in read-only table {}",
                table.plural
            )));
        }
        validators.run(&ValidationArgs {
            op: WriteOp::Create,
            table,
            row: None,
            index: leaf.index.as_deref(),
        })?;

        match &leaf.relation {
            Relation::Child { .. } | Relation::Reference { .. } if !referenced_by.is_empty() => {
                return Err(RestError::validation(
                    "'referenced_by' only applies to top-level collections",
                ));
            }
            Relation::BackReference { .. } if referenced_by.is_empty() => {
                return Err(RestError::validation(
                    "'referenced_by' is required when creating into this collection",
                ));
            }
            _ => {}
        }

        let uuid = Self::write_row(table, config, None, schema, store, txn, ctx)?;

        match &leaf.relation {
            Relation::Child { via_table, column }
            | Relation::Reference { via_table, column } => {
                let owner = chain
                    .parent()
                    .and_then(|n| n.row)
                    .ok_or_else(|| RestError::not_found("owning resource not found"))?;
                Self::wire_into(
                    owner,
                    via_table,
                    column,
                    uuid,
                    table,
                    config,
                    schema,
                    store,
                    txn,
                )?;
            }
            Relation::BackReference { .. } | Relation::TopLevel => {
                for entry in referenced_by {
                    Self::wire_referenced_by(entry, uuid, table, config, schema, store, txn)?;
                }
            }
            Relation::Root => {
                return Err(RestError::MethodNotAllowed(
                    "the system resource cannot be created".into(),
                ));
            }
        }
        Ok(uuid)
    }

    /// Full replace of a row's configuration group.
    pub fn update(
        chain: &ResourceChain,
        config: &serde_json::Map<String, serde_json::Value>,
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
        ctx: &mut WriteContext,
        validators: &ValidatorRegistry,
    ) -> Result<Uuid, RestError> {
        let leaf = chain.last();
        let table = schema
            .table(&leaf.table)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", leaf.table)))?;
        let uuid = leaf
            .row
            .ok_or_else(|| RestError::not_found("resource not found"))?;
        let row = store
            .get_row(&uuid)
            .ok_or_else(|| RestError::not_found("resource not found"))?;
        validators.run(&ValidationArgs {
            op: WriteOp::Update,
            table,
            row: Some(&row),
            index: leaf.index.as_deref(),
        })?;
        Self::write_row(table, config, Some(&row), schema, store, txn, ctx)?;
        Ok(uuid)
    }

    /// Whether a submitted configuration group is semantically identical
    /// to the row's current configuration. Used for safe-idempotent PUT
    /// under a stale etag.
    pub fn config_equals_current(
        table: &Table,
        config: &serde_json::Map<String, serde_json::Value>,
        row: &RowData,
        schema: &Schema,
        store: &dyn RowStore,
    ) -> bool {
        for (key, value) in config {
            if let Some(column) = table.column(key) {
                match Self::parse_column_value(column, value) {
                    Ok(parsed) => {
                        if row.get(key) != Some(&parsed) {
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            } else if let Some(reference) = table.reference(key) {
                let ctx = WriteContext::new();
                match Self::resolve_reference_uuids(reference, value, schema, store, &ctx) {
                    Some(resolved) => {
                        if row.get(key) != Some(&resolved) {
                            return false;
                        }
                    }
                    // Nested child data never counts as equal.
                    None => return false,
                }
            } else {
                return false;
            }
        }
        // Columns the body omits must be empty on the row.
        for column in table.columns_of(Category::Configuration) {
            if config.contains_key(&column.name) {
                continue;
            }
            if row.get(&column.name).map(|v| !v.is_empty()).unwrap_or(false)
                && column.mutable
                && column.is_optional()
            {
                return false;
            }
        }
        true
    }

    /// Recursive insert-or-update. Children nested under child relation
    /// names are written first, then the column that points to them.
    fn write_row(
        table: &Table,
        config: &serde_json::Map<String, serde_json::Value>,
        existing: Option<&RowData>,
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
        ctx: &mut WriteContext,
    ) -> Result<Uuid, RestError> {
        // Reject unknown keys before staging anything.
        for key in config.keys() {
            let known = table
                .column(key)
                .map(|c| c.category.declared() == Category::Configuration)
                .unwrap_or(false)
                || table
                    .reference(key)
                    .map(|r| {
                        r.kind != RelationKind::Parent && r.category == Category::Configuration
                    })
                    .unwrap_or(false);
            if !known {
                return Err(RestError::field_validation(
                    format!("unknown configuration attribute '{}'", key),
                    vec![key.clone()],
                ));
            }
        }

        let uuid = match existing {
            Some(row) => row.uuid,
            None => {
                // Required scalars and every index column must be present.
                let mut missing = Vec::new();
                for column in table.columns_of(Category::Configuration) {
                    let required =
                        !column.is_optional() || table.indexes.contains(&column.name);
                    if required && !config.contains_key(&column.name) {
                        missing.push(column.name.clone());
                    }
                }
                if !missing.is_empty() {
                    return Err(RestError::field_validation(
                        "missing required configuration attributes",
                        missing,
                    ));
                }

                let index = Self::index_from_config(table, config)?;
                if store.find_row(&table.name, &index).is_some()
                    || ctx.lookup(&table.name, &index).is_some()
                {
                    return Err(RestError::Conflict(format!(
                        "a '{}' resource with id '{}' already exists",
                        table.name, index
                    )));
                }
                let uuid = txn.insert(&table.name);
                ctx.register(&table.name, &index, uuid);
                uuid
            }
        };

        // Value columns.
        for column in table.columns_of(Category::Configuration) {
            match config.get(&column.name) {
                Some(raw) => {
                    let parsed = Self::parse_column_value(column, raw)?;
                    let current = existing.and_then(|r| r.get(&column.name));
                    if current == Some(&parsed) {
                        continue;
                    }
                    if existing.is_some() && !column.mutable {
                        return Err(RestError::field_validation(
                            format!("attribute '{}' is immutable", column.name),
                            vec![column.name.clone()],
                        ));
                    }
                    txn.set(uuid, &column.name, parsed);
                }
                None => {
                    // Full replace: absent optional columns reset.
                    if existing.is_some() && column.mutable && column.is_optional() {
                        let has_value = existing
                            .and_then(|r| r.get(&column.name))
                            .map(|v| !v.is_empty())
                            .unwrap_or(false);
                        if has_value {
                            match column.empty_value() {
                                Some(empty) => txn.set(uuid, &column.name, empty),
                                None => txn.clear(uuid, &column.name),
                            }
                        }
                    }
                }
            }
        }

        // Reference columns: nested child data recurses first, so every
        // column points at rows that are already staged.
        for reference in table.references.values() {
            if reference.kind == RelationKind::Parent
                || reference.category != Category::Configuration
            {
                continue;
            }
            let Some(raw) = config.get(&reference.column) else {
                continue;
            };
            let value =
                Self::build_reference_value(reference, raw, schema, store, txn, ctx)?;
            let current = existing.and_then(|r| r.get(&reference.column));
            if current != Some(&value) {
                if existing.is_some() && !reference.mutable {
                    return Err(RestError::field_validation(
                        format!("attribute '{}' is immutable", reference.column),
                        vec![reference.column.clone()],
                    ));
                }
                txn.set(uuid, &reference.column, value);
            }
        }

        Ok(uuid)
    }

    /// Resolve a reference column's submitted value into row handles,
    /// recursively writing nested child entries.
    fn build_reference_value(
        reference: &Reference,
        raw: &serde_json::Value,
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
        ctx: &mut WriteContext,
    ) -> Result<ColumnValue, RestError> {
        let target = schema
            .table(&reference.table)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", reference.table)))?;

        let mut resolve_one = |entry: &serde_json::Value| -> Result<Uuid, RestError> {
            match entry {
                serde_json::Value::String(text) => {
                    Self::resolve_ref_text(text, target, schema, store, ctx).ok_or_else(|| {
                        RestError::field_validation(
                            format!(
                                "'{}' references a nonexistent {} resource '{}'",
                                reference.column, reference.table, text
                            ),
                            vec![reference.column.clone()],
                        )
                    })
                }
                serde_json::Value::Object(nested) if reference.kind == RelationKind::Child => {
                    let existing = Self::index_from_config(target, nested)
                        .ok()
                        .and_then(|idx| {
                            ctx.lookup(&target.name, &idx)
                                .or_else(|| store.find_row(&target.name, &idx).map(|r| r.uuid))
                        })
                        .and_then(|u| store.get_row(&u));
                    Self::write_row(target, nested, existing.as_ref(), schema, store, txn, ctx)
                }
                _ => Err(RestError::field_validation(
                    format!("invalid value for reference attribute '{}'", reference.column),
                    vec![reference.column.clone()],
                )),
            }
        };

        if reference.is_map() {
            let entries = raw.as_object().ok_or_else(|| {
                RestError::field_validation(
                    format!("attribute '{}' must be a key/value object", reference.column),
                    vec![reference.column.clone()],
                )
            })?;
            let mut out = BTreeMap::new();
            for (key, entry) in entries {
                if reference.key_base == Some(BaseType::Integer)
                    && key.parse::<i64>().is_err()
                {
                    return Err(RestError::field_validation(
                        format!("key '{}' of '{}' must be an integer", key, reference.column),
                        vec![reference.column.clone()],
                    ));
                }
                out.insert(key.clone(), Datum::Uuid(resolve_one(entry)?));
            }
            Ok(ColumnValue::Map(out))
        } else if reference.is_plural {
            let entries = raw.as_array().ok_or_else(|| {
                RestError::field_validation(
                    format!("attribute '{}' must be a list", reference.column),
                    vec![reference.column.clone()],
                )
            })?;
            let mut out = Vec::new();
            for entry in entries {
                out.push(Datum::Uuid(resolve_one(entry)?));
            }
            Ok(ColumnValue::List(out))
        } else {
            Ok(ColumnValue::Scalar(Datum::Uuid(resolve_one(raw)?)))
        }
    }

    /// Resolve reference URIs without recursing into nested data; `None`
    /// when any entry is unresolvable or carries nested objects.
    fn resolve_reference_uuids(
        reference: &Reference,
        raw: &serde_json::Value,
        schema: &Schema,
        store: &dyn RowStore,
        ctx: &WriteContext,
    ) -> Option<ColumnValue> {
        let target = schema.table(&reference.table)?;
        let resolve_one = |entry: &serde_json::Value| -> Option<Uuid> {
            entry
                .as_str()
                .and_then(|text| Self::resolve_ref_text(text, target, schema, store, ctx))
        };
        if reference.is_map() {
            let entries = raw.as_object()?;
            let mut out = BTreeMap::new();
            for (key, entry) in entries {
                out.insert(key.clone(), Datum::Uuid(resolve_one(entry)?));
            }
            Some(ColumnValue::Map(out))
        } else if reference.is_plural {
            let entries = raw.as_array()?;
            let mut out = Vec::new();
            for entry in entries {
                out.push(Datum::Uuid(resolve_one(entry)?));
            }
            Some(ColumnValue::List(out))
        } else {
            resolve_one(raw).map(|u| ColumnValue::Scalar(Datum::Uuid(u)))
        }
    }

    /// Resolve a reference given as an absolute URI or a bare index,
    /// including rows staged earlier in the same bulk write.
    fn resolve_ref_text(
        text: &str,
        target: &Table,
        schema: &Schema,
        store: &dyn RowStore,
        ctx: &WriteContext,
    ) -> Option<Uuid> {
        if let Some(path) = text.strip_prefix(URI_PREFIX) {
            let chain = PathResolver::resolve(path, schema, store, &Method::GET).ok()?;
            let leaf = chain.last();
            if leaf.table != target.name {
                return None;
            }
            return leaf.row;
        }
        ctx.lookup(&target.name, text)
            .or_else(|| store.find_row(&target.name, text).map(|r| r.uuid))
    }

    /// Computed index of a new row from its submitted configuration.
    fn index_from_config(
        table: &Table,
        config: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, RestError> {
        if table.indexes.is_empty() {
            // Uuid-indexed rows get their identity at insert time; the
            // caller registers them under the generated uuid.
            return Ok(Uuid::new_v4().to_string());
        }
        let mut components = Vec::new();
        for index_col in &table.indexes {
            let column = table.column(index_col).ok_or_else(|| {
                RestError::Internal(format!("index column {} missing", index_col))
            })?;
            let raw = config.get(index_col).ok_or_else(|| {
                RestError::field_validation(
                    format!("missing index attribute '{}'", index_col),
                    vec![index_col.clone()],
                )
            })?;
            let datum = Datum::from_json(raw, column.base).ok_or_else(|| {
                RestError::field_validation(
                    format!("invalid value for index attribute '{}'", index_col),
                    vec![index_col.clone()],
                )
            })?;
            components.push(datum.index_text());
        }
        Ok(crate::model::encode_index(&components))
    }

    /// Parse and bounds-check one submitted column value.
    fn parse_column_value(
        column: &Column,
        raw: &serde_json::Value,
    ) -> Result<ColumnValue, RestError> {
        let field_err = |message: String| {
            RestError::field_validation(message, vec![column.name.clone()])
        };

        let check_bounds = |datum: &Datum, bounds: &crate::model::ValueBounds| -> Result<(), RestError> {
            match datum {
                Datum::Integer(n) => {
                    let v = *n as f64;
                    if bounds.min.map(|m| v < m).unwrap_or(false)
                        || bounds.max.map(|m| v > m).unwrap_or(false)
                    {
                        return Err(field_err(format!(
                            "value {} for '{}' is out of range",
                            n, column.name
                        )));
                    }
                }
                Datum::Real(r) => {
                    if bounds.min.map(|m| *r < m).unwrap_or(false)
                        || bounds.max.map(|m| *r > m).unwrap_or(false)
                    {
                        return Err(field_err(format!(
                            "value {} for '{}' is out of range",
                            r, column.name
                        )));
                    }
                }
                Datum::Str(s) => {
                    if bounds.min_length.map(|m| s.len() < m).unwrap_or(false)
                        || bounds.max_length.map(|m| s.len() > m).unwrap_or(false)
                    {
                        return Err(field_err(format!(
                            "length of '{}' is out of range",
                            column.name
                        )));
                    }
                }
                _ => {}
            }
            Ok(())
        };

        if column.is_map {
            let entries = raw.as_object().ok_or_else(|| {
                field_err(format!("attribute '{}' must be a key/value object", column.name))
            })?;
            let mut out = BTreeMap::new();
            for (key, value) in entries {
                let (base, bounds) = match column.key_specs.get(key) {
                    Some(spec) => (spec.base, &spec.bounds),
                    None => (column.base, &column.bounds),
                };
                if column.key_base == Some(BaseType::Integer) && key.parse::<i64>().is_err() {
                    return Err(field_err(format!(
                        "key '{}' of '{}' must be an integer",
                        key, column.name
                    )));
                }
                let datum = Datum::from_json(value, base).ok_or_else(|| {
                    field_err(format!(
                        "invalid value for key '{}' of '{}'",
                        key, column.name
                    ))
                })?;
                check_bounds(&datum, bounds)?;
                out.insert(key.clone(), datum);
            }
            Ok(ColumnValue::Map(out))
        } else if column.is_list() {
            let entries = raw.as_array().ok_or_else(|| {
                field_err(format!("attribute '{}' must be a list", column.name))
            })?;
            if entries.len() > column.n_max {
                return Err(field_err(format!(
                    "attribute '{}' accepts at most {} values",
                    column.name, column.n_max
                )));
            }
            let mut out = Vec::new();
            for value in entries {
                let datum = Datum::from_json(value, column.base).ok_or_else(|| {
                    field_err(format!("invalid value in list attribute '{}'", column.name))
                })?;
                check_bounds(&datum, &column.bounds)?;
                out.push(datum);
            }
            Ok(ColumnValue::List(out))
        } else {
            let datum = Datum::from_json(raw, column.base).ok_or_else(|| {
                field_err(format!("invalid value for attribute '{}'", column.name))
            })?;
            check_bounds(&datum, &column.bounds)?;
            Ok(ColumnValue::Scalar(datum))
        }
    }

    /// Append a newly created row to the owning column reached through
    /// the request path.
    #[allow(clippy::too_many_arguments)]
    fn wire_into(
        owner: Uuid,
        owner_table_name: &str,
        column: &str,
        new_row: Uuid,
        table: &Table,
        config: &serde_json::Map<String, serde_json::Value>,
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
    ) -> Result<(), RestError> {
        let owner_table = schema
            .table(owner_table_name)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", owner_table_name)))?;
        let reference = owner_table
            .reference(column)
            .ok_or_else(|| RestError::Internal(format!("unknown column {}", column)))?;
        let owner_row = store
            .get_row(&owner)
            .ok_or_else(|| RestError::not_found("owning resource not found"))?;
        let current = owner_row.get(column);

        let value = if reference.is_map() {
            let key = Self::index_from_config(table, config)?;
            let mut entries = match current {
                Some(ColumnValue::Map(m)) => m.clone(),
                _ => BTreeMap::new(),
            };
            if entries.contains_key(&key) {
                return Err(RestError::Conflict(format!(
                    "key '{}' already present in '{}'",
                    key, column
                )));
            }
            entries.insert(key, Datum::Uuid(new_row));
            ColumnValue::Map(entries)
        } else if reference.is_plural {
            let mut items = match current {
                Some(ColumnValue::List(l)) => l.clone(),
                _ => Vec::new(),
            };
            items.push(Datum::Uuid(new_row));
            ColumnValue::List(items)
        } else {
            if current.map(|v| !v.is_empty()).unwrap_or(false) {
                return Err(RestError::Conflict(format!(
                    "'{}' already references a resource",
                    column
                )));
            }
            ColumnValue::Scalar(Datum::Uuid(new_row))
        };
        txn.set(owner, column, value);
        Ok(())
    }

    /// Wire ownership from a `referenced_by` entry: resolve the owner's
    /// URI and append the new row to the named (or only) child column.
    fn wire_referenced_by(
        entry: &ReferencedBy,
        new_row: Uuid,
        table: &Table,
        config: &serde_json::Map<String, serde_json::Value>,
        schema: &Schema,
        store: &dyn RowStore,
        txn: &mut Transaction,
    ) -> Result<(), RestError> {
        let path = entry.uri.strip_prefix(URI_PREFIX).unwrap_or(&entry.uri);
        let chain = PathResolver::resolve(path, schema, store, &Method::GET)
            .map_err(|_| RestError::validation(format!("bad referenced_by uri '{}'", entry.uri)))?;
        let leaf = chain.last();
        let owner = leaf.row.ok_or_else(|| {
            RestError::validation(format!("referenced_by uri '{}' has no row", entry.uri))
        })?;
        let owner_table = schema
            .table(&leaf.table)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", leaf.table)))?;

        let column = match &entry.attribute {
            Some(attribute) => {
                let reference = owner_table.reference(attribute).ok_or_else(|| {
                    RestError::validation(format!(
                        "'{}' is not a relation of {}",
                        attribute, owner_table.name
                    ))
                })?;
                if reference.kind != RelationKind::Child || reference.table != table.name {
                    return Err(RestError::validation(format!(
                        "'{}' does not own {} rows",
                        attribute, table.plural
                    )));
                }
                reference.column.clone()
            }
            None => owner_table
                .references
                .values()
                .find(|r| r.kind == RelationKind::Child && r.table == table.name)
                .map(|r| r.column.clone())
                .ok_or_else(|| {
                    RestError::validation(format!(
                        "{} does not own {} rows",
                        owner_table.name, table.plural
                    ))
                })?,
        };
        Self::wire_into(
            owner,
            &owner_table.name.clone(),
            &column,
            new_row,
            table,
            config,
            schema,
            store,
            txn,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;
    use crate::store::{MemoryStore, TransactionCoordinator};
    use std::sync::Arc;

    async fn fixture() -> (Arc<Schema>, MemoryStore) {
        let schema = Arc::new(Schema::load(seed::switch_schema()).unwrap());
        let store = MemoryStore::new(schema.clone());
        seed::load_seed_data(&store, &schema).await.unwrap();
        (schema, store)
    }

    fn chain_for(
        schema: &Schema,
        store: &MemoryStore,
        path: &str,
        method: Method,
    ) -> ResourceChain {
        PathResolver::resolve(path, schema, store, &method).unwrap()
    }

    async fn commit(store: &MemoryStore, txn: &mut Transaction) {
        TransactionCoordinator::commit(store, txn).await.unwrap();
    }

    #[tokio::test]
    async fn create_port_with_referenced_by() {
        let (schema, store) = fixture().await;
        let chain = chain_for(&schema, &store, "system/ports", Method::POST);
        let body = serde_json::json!({
            "configuration": {
                "name": "Port-1",
                "admin": "up",
                "interfaces": ["/rest/v1/system/interfaces/eth0"]
            },
            "referenced_by": [{"uri": "/rest/v1/system/bridges/bridge_normal"}]
        });
        let (config, referenced_by) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        let validators = ValidatorRegistry::with_defaults();
        RowWriter::create(
            &chain, config, &referenced_by, &schema, &store, &mut txn, &mut ctx, &validators,
        )
        .unwrap();
        commit(&store, &mut txn).await;

        let port = store.find_row("Port", "Port-1").unwrap();
        assert_eq!(
            port.get("admin"),
            Some(&ColumnValue::Scalar(Datum::Str("up".into())))
        );
        let eth0 = store.find_row("Interface", "eth0").unwrap();
        assert_eq!(
            port.get("interfaces"),
            Some(&ColumnValue::List(vec![Datum::Uuid(eth0.uuid)]))
        );
        let bridge = store.find_row("Bridge", "bridge_normal").unwrap();
        assert_eq!(
            bridge.get("ports"),
            Some(&ColumnValue::List(vec![Datum::Uuid(port.uuid)]))
        );
    }

    #[tokio::test]
    async fn create_rejects_unresolvable_reference() {
        let (schema, store) = fixture().await;
        let chain = chain_for(&schema, &store, "system/ports", Method::POST);
        let body = serde_json::json!({
            "configuration": {
                "name": "Port-1",
                "interfaces": ["/rest/v1/system/interfaces/eth99"]
            },
            "referenced_by": [{"uri": "/rest/v1/system/bridges/bridge_normal"}]
        });
        let (config, referenced_by) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        let validators = ValidatorRegistry::with_defaults();
        let err = RowWriter::create(
            &chain, config, &referenced_by, &schema, &store, &mut txn, &mut ctx, &validators,
        )
        .unwrap_err();
        assert!(matches!(err, RestError::Validation { .. }));
    }

    #[tokio::test]
    async fn create_duplicate_index_conflicts() {
        let (schema, store) = fixture().await;
        let chain = chain_for(&schema, &store, "system/bridges", Method::POST);
        let body = serde_json::json!({"configuration": {"name": "bridge_normal"}});
        let (config, referenced_by) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        let validators = ValidatorRegistry::with_defaults();
        let err = RowWriter::create(
            &chain, config, &referenced_by, &schema, &store, &mut txn, &mut ctx, &validators,
        )
        .unwrap_err();
        assert!(matches!(err, RestError::Conflict(_)));
    }

    #[tokio::test]
    async fn nested_children_write_leaves_first() {
        let (schema, store) = fixture().await;
        let chain = chain_for(&schema, &store, "system/bridges", Method::POST);
        let body = serde_json::json!({
            "configuration": {
                "name": "br1",
                "ports": [
                    {"name": "br1-p1", "admin": "up"},
                    {"name": "br1-p2"}
                ],
                "vlans": {
                    "20": {"id": 20, "name": "VLAN20"}
                }
            }
        });
        let (config, referenced_by) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        let validators = ValidatorRegistry::with_defaults();
        RowWriter::create(
            &chain, config, &referenced_by, &schema, &store, &mut txn, &mut ctx, &validators,
        )
        .unwrap();
        commit(&store, &mut txn).await;

        let bridge = store.find_row("Bridge", "br1").unwrap();
        let p1 = store.find_row("Port", "br1-p1").unwrap();
        let p2 = store.find_row("Port", "br1-p2").unwrap();
        assert_eq!(
            bridge.get("ports"),
            Some(&ColumnValue::List(vec![
                Datum::Uuid(p1.uuid),
                Datum::Uuid(p2.uuid)
            ]))
        );
        let vlan = store.find_row("VLAN", "20").unwrap();
        match bridge.get("vlans") {
            Some(ColumnValue::Map(entries)) => {
                assert_eq!(entries.get("20"), Some(&Datum::Uuid(vlan.uuid)));
            }
            other => panic!("expected vlan map, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_replaces_and_clears_optionals() {
        let (schema, store) = fixture().await;
        // Give the bridge a datapath_type first.
        let chain = chain_for(&schema, &store, "system/bridges/bridge_normal", Method::PUT);
        let validators = ValidatorRegistry::with_defaults();
        let body = serde_json::json!({
            "configuration": {"name": "bridge_normal", "datapath_type": "netdev"}
        });
        let (config, _) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        RowWriter::update(&chain, config, &schema, &store, &mut txn, &mut ctx, &validators)
            .unwrap();
        commit(&store, &mut txn).await;
        let bridge = store.find_row("Bridge", "bridge_normal").unwrap();
        assert_eq!(
            bridge.get("datapath_type"),
            Some(&ColumnValue::Scalar(Datum::Str("netdev".into())))
        );

        // Full replace without datapath_type clears it.
        let body = serde_json::json!({"configuration": {"name": "bridge_normal"}});
        let (config, _) = RowWriter::parse_body(&body).unwrap();
        let chain = chain_for(&schema, &store, "system/bridges/bridge_normal", Method::PUT);
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        RowWriter::update(&chain, config, &schema, &store, &mut txn, &mut ctx, &validators)
            .unwrap();
        commit(&store, &mut txn).await;
        let bridge = store.find_row("Bridge", "bridge_normal").unwrap();
        assert!(bridge.get("datapath_type").is_none());
    }

    #[tokio::test]
    async fn update_rejects_immutable_change() {
        let (schema, store) = fixture().await;
        let chain = chain_for(&schema, &store, "system/bridges/bridge_normal", Method::PUT);
        let validators = ValidatorRegistry::with_defaults();
        let body = serde_json::json!({"configuration": {"name": "renamed"}});
        let (config, _) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        let err = RowWriter::update(
            &chain, config, &schema, &store, &mut txn, &mut ctx, &validators,
        )
        .unwrap_err();
        assert!(matches!(err, RestError::Validation { .. }));
    }

    #[tokio::test]
    async fn out_of_range_value_is_field_error() {
        let (schema, store) = fixture().await;
        let chain = chain_for(&schema, &store, "system/ports", Method::POST);
        let body = serde_json::json!({
            "configuration": {"name": "p1", "tag": 5000},
            "referenced_by": [{"uri": "/rest/v1/system/bridges/bridge_normal"}]
        });
        let (config, referenced_by) = RowWriter::parse_body(&body).unwrap();
        let mut txn = Transaction::new();
        let mut ctx = WriteContext::new();
        let validators = ValidatorRegistry::with_defaults();
        let err = RowWriter::create(
            &chain, config, &referenced_by, &schema, &store, &mut txn, &mut ctx, &validators,
        )
        .unwrap_err();
        match err {
            RestError::Validation { fields, .. } => assert_eq!(fields, vec!["tag".to_string()]),
            other => panic!("expected field validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn config_equality_for_idempotent_put() {
        let (schema, store) = fixture().await;
        let table = schema.table("Bridge").unwrap();
        let row = store.find_row("Bridge", "bridge_normal").unwrap();
        let same = serde_json::json!({"name": "bridge_normal"});
        assert!(RowWriter::config_equals_current(
            table,
            same.as_object().unwrap(),
            &row,
            &schema,
            &store
        ));
        let different = serde_json::json!({"name": "bridge_normal", "datapath_type": "netdev"});
        assert!(!RowWriter::config_equals_current(
            table,
            different.as_object().unwrap(),
            &row,
            &schema,
            &store
        ));
    }
}
