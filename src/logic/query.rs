use crate::error::RestError;
use crate::logic::serialize::{RowReader, URI_PREFIX};
use crate::model::{Category, ColumnValue, Datum, ResourceChain, Schema, Table};
use crate::store::{RowData, RowStore};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One sort key: column name plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

/// Parsed and validated query parameters for a GET.
#[derive(Debug, Default)]
pub struct QueryParams {
    pub depth: usize,
    pub selector: Option<Category>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub sort: Vec<SortKey>,
    pub filters: BTreeMap<String, Vec<String>>,
}

const MAX_DEPTH: usize = 10;

impl QueryParams {
    /// Parse a raw query string (`&`- or `;`-separated) against the
    /// target table, enforcing every combination rule for GETs.
    pub fn parse(
        raw: Option<&str>,
        table: &Table,
        is_collection: bool,
    ) -> Result<QueryParams, RestError> {
        let mut params = QueryParams::default();
        let Some(raw) = raw else {
            return Ok(params);
        };

        for pair in raw.split(['&', ';']).filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (decode_component(k), decode_component(v)),
                None => (decode_component(pair), String::new()),
            };
            match key.as_str() {
                "depth" => {
                    let depth: i64 = value
                        .parse()
                        .map_err(|_| RestError::validation("depth must be an integer"))?;
                    if !(0..=MAX_DEPTH as i64).contains(&depth) {
                        return Err(RestError::validation(format!(
                            "depth must be between 0 and {}",
                            MAX_DEPTH
                        )));
                    }
                    params.depth = depth as usize;
                }
                "selector" => {
                    params.selector = Some(Category::parse(&value).ok_or_else(|| {
                        RestError::validation(format!("unknown selector '{}'", value))
                    })?);
                }
                "offset" => {
                    let offset: i64 = value
                        .parse()
                        .map_err(|_| RestError::validation("offset must be an integer"))?;
                    if offset < 0 {
                        return Err(RestError::validation("offset must not be negative"));
                    }
                    params.offset = Some(offset as usize);
                }
                "limit" => {
                    let limit: i64 = value
                        .parse()
                        .map_err(|_| RestError::validation("limit must be an integer"))?;
                    if limit < 1 {
                        return Err(RestError::validation("limit must be at least 1"));
                    }
                    params.limit = Some(limit as usize);
                }
                "sort" => {
                    for item in value.split(',').filter(|s| !s.is_empty()) {
                        let (column, descending) = match item.strip_prefix('-') {
                            Some(rest) => (rest.to_string(), true),
                            None => (item.to_string(), false),
                        };
                        if table.column(&column).is_none() {
                            return Err(RestError::field_validation(
                                format!("unknown sort column '{}'", column),
                                vec![column],
                            ));
                        }
                        params.sort.push(SortKey { column, descending });
                    }
                }
                other => {
                    if table.column(other).is_none() {
                        return Err(RestError::field_validation(
                            format!("unknown filter column '{}'", other),
                            vec![other.to_string()],
                        ));
                    }
                    params
                        .filters
                        .entry(other.to_string())
                        .or_default()
                        .push(value);
                }
            }
        }

        if !is_collection && (params.offset.is_some() || params.limit.is_some()) {
            return Err(RestError::validation(
                "offset/limit only apply to collection resources",
            ));
        }
        if is_collection
            && params.depth == 0
            && (params.offset.is_some()
                || params.limit.is_some()
                || !params.sort.is_empty()
                || !params.filters.is_empty())
        {
            return Err(RestError::validation(
                "filter, sort and pagination require depth >= 1",
            ));
        }
        Ok(params)
    }
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match u8::from_str_radix(&raw[i + 1..i + 3], 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Executes validated query parameters over a resolved collection:
/// depth expansion, equality filters, multi-key sort, then pagination.
pub struct QueryEngine;

impl QueryEngine {
    /// `request_path` is the normalized request path (no trailing slash),
    /// used to build member URIs for depth-0 listings.
    pub fn query(
        chain: &ResourceChain,
        params: &QueryParams,
        schema: &Schema,
        store: &dyn RowStore,
        request_path: &str,
    ) -> Result<serde_json::Value, RestError> {
        let node = chain.last();
        let table = schema
            .table(&node.table)
            .ok_or_else(|| RestError::Internal(format!("unknown table {}", node.table)))?;

        if params.depth == 0 {
            let base = format!("{}/{}", URI_PREFIX, request_path.trim_matches('/'));
            let uris: Vec<serde_json::Value> = node
                .members
                .iter()
                .filter_map(|member| {
                    let suffix = match &member.key {
                        Some(key) => key.clone(),
                        None => store.get_row(&member.uuid)?.index(table),
                    };
                    Some(serde_json::Value::String(format!("{}/{}", base, suffix)))
                })
                .collect();
            return Ok(serde_json::Value::Array(uris));
        }

        let mut rows: Vec<RowData> = node
            .members
            .iter()
            .filter_map(|m| store.get_row(&m.uuid))
            .collect();

        for (column_name, wanted) in &params.filters {
            let column = table
                .column(column_name)
                .ok_or_else(|| RestError::validation(format!("unknown column '{}'", column_name)))?;
            let candidates: Vec<Option<Datum>> = wanted
                .iter()
                .map(|text| Datum::from_text(text, column.base))
                .collect();
            rows.retain(|row| {
                candidates.iter().any(|candidate| match candidate {
                    Some(datum) => row
                        .get(column_name)
                        .map(|value| value_matches(value, datum))
                        .unwrap_or(false),
                    None => false,
                })
            });
        }

        for key in params.sort.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = compare_rows(a, b, &key.column);
                if key.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let total = rows.len();
        let offset = params.offset.unwrap_or(0);
        if offset > total {
            return Err(RestError::validation(format!(
                "offset {} is beyond the result size {}",
                offset, total
            )));
        }
        let end = match params.limit {
            Some(limit) => (offset + limit).min(total),
            None => total,
        };

        let mut out = Vec::with_capacity(end - offset);
        for row in &rows[offset..end] {
            out.push(RowReader::read(
                store,
                schema,
                &node.table,
                row.uuid,
                params.depth,
                1,
                params.selector,
                false,
            )?);
        }
        Ok(serde_json::Value::Array(out))
    }
}

fn value_matches(value: &ColumnValue, wanted: &Datum) -> bool {
    match value {
        ColumnValue::Scalar(d) => d == wanted,
        ColumnValue::List(items) => items.contains(wanted),
        ColumnValue::Map(entries) => entries.values().any(|d| d == wanted),
    }
}

/// Rows missing the sort column order before rows that have it.
fn compare_rows(a: &RowData, b: &RowData, column: &str) -> Ordering {
    let scalar = |row: &RowData| match row.get(column) {
        Some(ColumnValue::Scalar(d)) => Some(d.clone()),
        _ => None,
    };
    match (scalar(a), scalar(b)) {
        (Some(x), Some(y)) => crate::model::datum_cmp(&x, &y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::resolve::PathResolver;
    use crate::seed;
    use crate::store::{ChangeSet, MemoryStore, RowOp, RowStore};
    use axum::http::Method;
    use std::sync::Arc;
    use uuid::Uuid;

    fn port_table(schema: &Schema) -> &Table {
        schema.table("Port").unwrap()
    }

    /// Seeded switch plus `count` ports named Port-1..Port-N wired into
    /// the default bridge.
    async fn fixture_with_ports(count: usize) -> (Arc<Schema>, MemoryStore) {
        let schema = Arc::new(Schema::load(seed::switch_schema()).unwrap());
        let store = MemoryStore::new(schema.clone());
        seed::load_seed_data(&store, &schema).await.unwrap();

        let bridge = store.find_row("Bridge", "bridge_normal").unwrap();
        let mut ops = Vec::new();
        let mut port_refs = Vec::new();
        for i in 1..=count {
            let uuid = Uuid::new_v4();
            ops.push(RowOp::Insert {
                uuid,
                table: "Port".to_string(),
            });
            ops.push(RowOp::Set {
                uuid,
                column: "name".to_string(),
                value: ColumnValue::Scalar(Datum::Str(format!("Port-{}", i))),
            });
            ops.push(RowOp::Set {
                uuid,
                column: "admin".to_string(),
                value: ColumnValue::Scalar(Datum::Str(
                    if i % 2 == 0 { "up" } else { "down" }.to_string(),
                )),
            });
            ops.push(RowOp::Set {
                uuid,
                column: "tag".to_string(),
                value: ColumnValue::Scalar(Datum::Integer(i as i64)),
            });
            port_refs.push(Datum::Uuid(uuid));
        }
        ops.push(RowOp::Set {
            uuid: bridge.uuid,
            column: "ports".to_string(),
            value: ColumnValue::List(port_refs),
        });
        let outcome = store.submit(ChangeSet { ops }).await.done.await.unwrap();
        assert!(outcome.status.is_success());
        (schema, store)
    }

    fn run(
        schema: &Schema,
        store: &MemoryStore,
        path: &str,
        query: &str,
    ) -> Result<serde_json::Value, RestError> {
        let chain = PathResolver::resolve(path, schema, store, &Method::GET)?;
        let table = schema.table(&chain.last().table).unwrap();
        let params = QueryParams::parse(Some(query), table, chain.last().is_collection)?;
        QueryEngine::query(&chain, &params, schema, store, path)
    }

    #[tokio::test]
    async fn depth_zero_lists_uris() {
        let (schema, store) = fixture_with_ports(3).await;
        let result = run(&schema, &store, "system/ports", "").unwrap();
        let uris = result.as_array().unwrap();
        assert_eq!(uris.len(), 3);
        assert_eq!(uris[0], "/rest/v1/system/ports/Port-1");
    }

    #[tokio::test]
    async fn sort_offset_limit_window() {
        let (schema, store) = fixture_with_ports(10).await;
        let result = run(
            &schema,
            &store,
            "system/ports",
            "depth=1;sort=name;offset=0;limit=10",
        )
        .unwrap();
        let rows = result.as_array().unwrap();
        assert_eq!(rows.len(), 10);
        // Case-insensitive ascending by name; Port-10 sorts before Port-2.
        assert_eq!(rows[0]["configuration"]["name"], "Port-1");
        assert_eq!(rows[1]["configuration"]["name"], "Port-10");
        assert_eq!(rows[2]["configuration"]["name"], "Port-2");
    }

    #[tokio::test]
    async fn pagination_window_invariant() {
        let (schema, store) = fixture_with_ports(7).await;
        for (offset, limit, expect) in [(0usize, 3usize, 3usize), (5, 5, 2), (7, 1, 0)] {
            let result = run(
                &schema,
                &store,
                "system/ports",
                &format!("depth=1;sort=tag;offset={};limit={}", offset, limit),
            )
            .unwrap();
            assert_eq!(result.as_array().unwrap().len(), expect);
        }
    }

    #[tokio::test]
    async fn offset_beyond_result_is_rejected() {
        let (schema, store) = fixture_with_ports(3).await;
        let err = run(&schema, &store, "system/ports", "depth=1;offset=4").unwrap_err();
        assert!(matches!(err, RestError::Validation { .. }));
    }

    #[tokio::test]
    async fn filters_are_ored_per_column() {
        let (schema, store) = fixture_with_ports(6).await;
        let result = run(
            &schema,
            &store,
            "system/ports",
            "depth=1;tag=1;tag=2;admin=down",
        )
        .unwrap();
        // tag in {1,2} AND admin=down -> only Port-1.
        let rows = result.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["configuration"]["name"], "Port-1");
    }

    #[tokio::test]
    async fn multi_key_sort_breaks_ties_in_order() {
        let (schema, store) = fixture_with_ports(4).await;
        let result = run(
            &schema,
            &store,
            "system/ports",
            "depth=1;sort=admin,-tag",
        )
        .unwrap();
        let names: Vec<String> = result
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["configuration"]["name"].as_str().unwrap().to_string())
            .collect();
        // admin groups first (down < up), descending tag inside each.
        assert_eq!(names, vec!["Port-3", "Port-1", "Port-4", "Port-2"]);
    }

    #[tokio::test]
    async fn depth_rules_are_enforced() {
        let (schema, store) = fixture_with_ports(2).await;
        let table = port_table(&schema);
        assert!(QueryParams::parse(Some("depth=11"), table, true).is_err());
        assert!(QueryParams::parse(Some("depth=x"), table, true).is_err());
        assert!(QueryParams::parse(Some("depth=-1"), table, true).is_err());
        // sort/filter/pagination at depth 0 on a collection.
        assert!(QueryParams::parse(Some("sort=name"), table, true).is_err());
        assert!(QueryParams::parse(Some("admin=up"), table, true).is_err());
        assert!(QueryParams::parse(Some("offset=1"), table, true).is_err());
        // offset/limit never apply to a single resource.
        assert!(QueryParams::parse(Some("depth=1;limit=2"), table, false).is_err());
        // limit below 1 and unknown columns.
        assert!(QueryParams::parse(Some("depth=1;limit=0"), table, true).is_err());
        assert!(QueryParams::parse(Some("depth=1;sort=bogus"), table, true).is_err());
        assert!(QueryParams::parse(Some("depth=1;bogus=1"), table, true).is_err());
        let _ = store;
    }

    #[tokio::test]
    async fn sort_stability_across_key_prefixes() {
        let (schema, store) = fixture_with_ports(6).await;
        let multi = run(&schema, &store, "system/ports", "depth=1;sort=admin,tag").unwrap();
        let single = run(&schema, &store, "system/ports", "depth=1;sort=admin").unwrap();
        let names =
            |v: &serde_json::Value| -> Vec<String> {
                v.as_array()
                    .unwrap()
                    .iter()
                    .map(|r| r["configuration"]["name"].as_str().unwrap().to_string())
                    .collect()
            };
        // Ties on admin keep their relative order under both sorts.
        assert_eq!(names(&multi), names(&single));
    }
}
