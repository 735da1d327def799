use crate::error::RestError;
use crate::model::{Category, CategorySpec, ColumnValue, Datum, RelationKind, Schema};
use crate::store::{RowData, RowStore};
use std::collections::HashMap;
use uuid::Uuid;

pub const URI_PREFIX: &str = "/rest/v1";

/// Serializes rows to their REST representation: three attribute groups,
/// references expanded inline or rendered as URIs depending on the
/// requested depth.
pub struct RowReader;

impl RowReader {
    /// Read one row. `depth_counter` is the number of reference hops
    /// already taken; references expand inline while it is below `depth`
    /// and render as URIs at the boundary.
    pub fn read(
        store: &dyn RowStore,
        schema: &Schema,
        table_name: &str,
        uuid: Uuid,
        depth: usize,
        depth_counter: usize,
        selector: Option<Category>,
        keep_empty: bool,
    ) -> Result<serde_json::Value, RestError> {
        let table = schema
            .table(table_name)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", table_name)))?;
        let row = store
            .get_row(&uuid)
            .ok_or_else(|| RestError::not_found(format!("{} row is gone", table_name)))?;

        // Pass 1: per-row effective categories (dynamic categories follow
        // another column's value).
        let categories = Self::effective_categories(table, &row);

        // Pass 2: materialize all three groups to the requested depth.
        let mut groups: HashMap<Category, serde_json::Map<String, serde_json::Value>> =
            HashMap::new();

        for column in table.columns.values() {
            let category = categories
                .get(column.name.as_str())
                .copied()
                .unwrap_or_else(|| column.category.declared());
            let Some(value) = row.get(&column.name) else {
                continue;
            };
            if value.is_empty() && !keep_empty {
                continue;
            }
            let rendered = match value {
                ColumnValue::Scalar(d) => d.to_json(),
                ColumnValue::List(items) => {
                    serde_json::Value::Array(items.iter().map(Datum::to_json).collect())
                }
                ColumnValue::Map(entries) => serde_json::Value::Object(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                ),
            };
            groups
                .entry(category)
                .or_default()
                .insert(column.name.clone(), rendered);
        }

        for reference in table.references.values() {
            if reference.kind == RelationKind::Parent {
                continue;
            }
            let Some(value) = row.get(&reference.column) else {
                continue;
            };
            if value.is_empty() && !keep_empty {
                continue;
            }
            let expand = depth_counter < depth;
            let rendered = Self::render_reference(
                store,
                schema,
                &reference.table,
                value,
                expand,
                depth,
                depth_counter,
                selector,
                keep_empty,
            )?;
            if rendered.is_null() {
                continue;
            }
            groups
                .entry(reference.category)
                .or_default()
                .insert(reference.column.clone(), rendered);
        }

        // Pass 3: project through the selector.
        let mut out = serde_json::Map::new();
        match selector {
            Some(cat) => {
                out.insert(
                    cat.as_str().to_string(),
                    serde_json::Value::Object(groups.remove(&cat).unwrap_or_default()),
                );
            }
            None => {
                for cat in [Category::Configuration, Category::Status, Category::Statistics] {
                    out.insert(
                        cat.as_str().to_string(),
                        serde_json::Value::Object(groups.remove(&cat).unwrap_or_default()),
                    );
                }
            }
        }
        Ok(serde_json::Value::Object(out))
    }

    /// Canonical URI of a row, walking child edges up to the root. Rows
    /// not currently owned by anything render under their top-level
    /// plural collection.
    pub fn row_uri(
        store: &dyn RowStore,
        schema: &Schema,
        table_name: &str,
        uuid: Uuid,
    ) -> Option<String> {
        let table = schema.table(table_name)?;
        let root = schema.root_table();
        if table.name == root.name {
            return Some(format!("{}/{}", URI_PREFIX, root.name.to_lowercase()));
        }
        let row = store.get_row(&uuid)?;

        if let Some(parent_name) = &table.parent {
            let parent = schema.table(parent_name)?;
            for owner in store.list_rows(parent_name) {
                for reference in parent.references.values() {
                    if reference.kind != RelationKind::Child || reference.table != table.name {
                        continue;
                    }
                    match owner.get(&reference.column) {
                        Some(ColumnValue::List(items))
                            if items.iter().any(|d| d.as_uuid() == Some(uuid)) =>
                        {
                            let base =
                                Self::row_uri(store, schema, parent_name, owner.uuid)?;
                            return Some(format!(
                                "{}/{}/{}",
                                base,
                                reference.column,
                                row.index(table)
                            ));
                        }
                        Some(ColumnValue::Map(entries)) => {
                            if let Some((key, _)) = entries
                                .iter()
                                .find(|(_, d)| d.as_uuid() == Some(uuid))
                            {
                                let base =
                                    Self::row_uri(store, schema, parent_name, owner.uuid)?;
                                return Some(format!("{}/{}/{}", base, reference.column, key));
                            }
                        }
                        Some(ColumnValue::Scalar(d)) if d.as_uuid() == Some(uuid) => {
                            let base =
                                Self::row_uri(store, schema, parent_name, owner.uuid)?;
                            return Some(format!("{}/{}", base, reference.column));
                        }
                        _ => {}
                    }
                }
            }
        }

        Some(format!(
            "{}/system/{}/{}",
            URI_PREFIX,
            table.plural,
            row.index(table)
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn render_reference(
        store: &dyn RowStore,
        schema: &Schema,
        target_table: &str,
        value: &ColumnValue,
        expand: bool,
        depth: usize,
        depth_counter: usize,
        selector: Option<Category>,
        keep_empty: bool,
    ) -> Result<serde_json::Value, RestError> {
        let render_one = |uuid: Uuid| -> Result<Option<serde_json::Value>, RestError> {
            if expand {
                if store.get_row(&uuid).is_none() {
                    return Ok(None);
                }
                Ok(Some(Self::read(
                    store,
                    schema,
                    target_table,
                    uuid,
                    depth,
                    depth_counter + 1,
                    selector,
                    keep_empty,
                )?))
            } else {
                Ok(Self::row_uri(store, schema, target_table, uuid)
                    .map(serde_json::Value::String))
            }
        };

        match value {
            ColumnValue::Scalar(d) => match d.as_uuid() {
                Some(uuid) => Ok(render_one(uuid)?.unwrap_or(serde_json::Value::Null)),
                None => Ok(serde_json::Value::Null),
            },
            ColumnValue::List(items) => {
                let mut rendered = Vec::new();
                for item in items {
                    if let Some(uuid) = item.as_uuid() {
                        if let Some(v) = render_one(uuid)? {
                            rendered.push(v);
                        }
                    }
                }
                Ok(serde_json::Value::Array(rendered))
            }
            ColumnValue::Map(entries) => {
                let mut rendered = serde_json::Map::new();
                for (key, item) in entries {
                    if let Some(uuid) = item.as_uuid() {
                        if let Some(v) = render_one(uuid)? {
                            rendered.insert(key.clone(), v);
                        }
                    }
                }
                Ok(serde_json::Value::Object(rendered))
            }
        }
    }

    fn effective_categories<'a>(
        table: &'a crate::model::Table,
        row: &RowData,
    ) -> HashMap<&'a str, Category> {
        let mut out = HashMap::new();
        for column in table.columns.values() {
            let category = match &column.category {
                CategorySpec::Fixed(c) => *c,
                CategorySpec::Dynamic {
                    follows,
                    mapping,
                    default,
                } => match row.get(follows) {
                    Some(ColumnValue::Scalar(Datum::Str(v))) => {
                        mapping.get(v).copied().unwrap_or(*default)
                    }
                    _ => *default,
                },
            };
            out.insert(column.name.as_str(), category);
        }
        out
    }
}
