use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Base value type of a column, declared in the schema description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseType {
    Integer,
    Real,
    Boolean,
    String,
    Uuid,
}

impl BaseType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(BaseType::Integer),
            "real" => Some(BaseType::Real),
            "boolean" => Some(BaseType::Boolean),
            "string" => Some(BaseType::String),
            "uuid" => Some(BaseType::Uuid),
            _ => None,
        }
    }
}

/// REST-visible attribute group a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Configuration,
    Status,
    Statistics,
}

impl Category {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "configuration" => Some(Category::Configuration),
            "status" => Some(Category::Status),
            "statistics" => Some(Category::Statistics),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Configuration => "configuration",
            Category::Status => "status",
            Category::Statistics => "statistics",
        }
    }
}

/// Relationship kind of a reference column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Owning edge: the referenced rows' lifecycle follows this column.
    Child,
    /// Back-pointer to the owning table; never traversable downward.
    Parent,
    /// Non-owning foreign key.
    Reference,
}

/// A single column value. References are stored as `Datum::Uuid`.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Str(String),
    Uuid(Uuid),
}

impl Datum {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Datum::Integer(n) => serde_json::Value::from(*n),
            Datum::Real(r) => serde_json::Value::from(*r),
            Datum::Boolean(b) => serde_json::Value::Bool(*b),
            Datum::Str(s) => serde_json::Value::String(s.clone()),
            Datum::Uuid(u) => serde_json::Value::String(u.to_string()),
        }
    }

    /// Parse a JSON value into a datum of the given base type. Integers are
    /// accepted for real columns; everything else must match exactly.
    pub fn from_json(value: &serde_json::Value, base: BaseType) -> Option<Datum> {
        match (base, value) {
            (BaseType::Integer, serde_json::Value::Number(n)) => n.as_i64().map(Datum::Integer),
            (BaseType::Real, serde_json::Value::Number(n)) => n.as_f64().map(Datum::Real),
            (BaseType::Boolean, serde_json::Value::Bool(b)) => Some(Datum::Boolean(*b)),
            (BaseType::String, serde_json::Value::String(s)) => Some(Datum::Str(s.clone())),
            (BaseType::Uuid, serde_json::Value::String(s)) => {
                Uuid::parse_str(s).ok().map(Datum::Uuid)
            }
            _ => None,
        }
    }

    /// Parse a raw query-string token into a datum of the given base type.
    pub fn from_text(text: &str, base: BaseType) -> Option<Datum> {
        match base {
            BaseType::Integer => text.parse().ok().map(Datum::Integer),
            BaseType::Real => text.parse().ok().map(Datum::Real),
            BaseType::Boolean => match text {
                "true" => Some(Datum::Boolean(true)),
                "false" => Some(Datum::Boolean(false)),
                _ => None,
            },
            BaseType::String => Some(Datum::Str(text.to_string())),
            BaseType::Uuid => Uuid::parse_str(text).ok().map(Datum::Uuid),
        }
    }

    /// Rendering used for index tuple components.
    pub fn index_text(&self) -> String {
        match self {
            Datum::Str(s) => s.clone(),
            Datum::Integer(n) => n.to_string(),
            Datum::Real(r) => r.to_string(),
            Datum::Boolean(b) => b.to_string(),
            Datum::Uuid(u) => u.to_string(),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Datum::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

/// Value-type-preserving comparison: numbers numerically, strings
/// case-insensitively, booleans false-before-true. Mixed types order by a
/// fixed type rank so sorts stay total.
pub fn datum_cmp(a: &Datum, b: &Datum) -> Ordering {
    fn rank(d: &Datum) -> u8 {
        match d {
            Datum::Boolean(_) => 0,
            Datum::Integer(_) | Datum::Real(_) => 1,
            Datum::Str(_) => 2,
            Datum::Uuid(_) => 3,
        }
    }
    match (a, b) {
        (Datum::Integer(x), Datum::Integer(y)) => x.cmp(y),
        (Datum::Real(x), Datum::Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Datum::Integer(x), Datum::Real(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Datum::Real(x), Datum::Integer(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (Datum::Boolean(x), Datum::Boolean(y)) => x.cmp(y),
        (Datum::Str(x), Datum::Str(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Datum::Uuid(x), Datum::Uuid(y)) => x.cmp(y),
        (x, y) => rank(x).cmp(&rank(y)),
    }
}

/// Shape of a stored column value, fixed per column at schema-load time.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Scalar(Datum),
    List(Vec<Datum>),
    Map(BTreeMap<String, Datum>),
}

impl ColumnValue {
    pub fn is_empty(&self) -> bool {
        match self {
            ColumnValue::Scalar(_) => false,
            ColumnValue::List(items) => items.is_empty(),
            ColumnValue::Map(entries) => entries.is_empty(),
        }
    }

    /// All row references held by this value, in declaration order.
    pub fn ref_uuids(&self) -> Vec<Uuid> {
        match self {
            ColumnValue::Scalar(d) => d.as_uuid().into_iter().collect(),
            ColumnValue::List(items) => items.iter().filter_map(Datum::as_uuid).collect(),
            ColumnValue::Map(entries) => entries.values().filter_map(Datum::as_uuid).collect(),
        }
    }

    /// Drop every reference to `target`, returning whether anything changed.
    /// Scalars cannot shrink in place; callers clear the whole column when
    /// this returns true for a scalar.
    pub fn remove_ref(&mut self, target: &Uuid) -> bool {
        match self {
            ColumnValue::Scalar(d) => d.as_uuid() == Some(*target),
            ColumnValue::List(items) => {
                let before = items.len();
                items.retain(|d| d.as_uuid() != Some(*target));
                items.len() != before
            }
            ColumnValue::Map(entries) => {
                let before = entries.len();
                entries.retain(|_, d| d.as_uuid() != Some(*target));
                entries.len() != before
            }
        }
    }
}

/// Escape one component of a computed row index so that `/` stays a safe
/// tuple separator.
pub fn escape_index_component(component: &str) -> String {
    component.replace('%', "%25").replace('/', "%2F")
}

pub fn unescape_index_component(component: &str) -> String {
    component.replace("%2F", "/").replace("%25", "%")
}

/// Join ordered index-column values into the row's computed index.
pub fn encode_index(components: &[String]) -> String {
    components
        .iter()
        .map(|c| escape_index_component(c))
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_escaping_round_trips() {
        let raw = "a/b%c";
        let escaped = escape_index_component(raw);
        assert_eq!(escaped, "a%2Fb%25c");
        assert_eq!(unescape_index_component(&escaped), raw);
    }

    #[test]
    fn encode_index_joins_components() {
        let idx = encode_index(&["br0".to_string(), "vlan/1".to_string()]);
        assert_eq!(idx, "br0/vlan%2F1");
    }

    #[test]
    fn datum_cmp_strings_case_insensitive() {
        assert_eq!(
            datum_cmp(&Datum::Str("Port-1".into()), &Datum::Str("port-1".into())),
            Ordering::Equal
        );
        assert_eq!(
            datum_cmp(&Datum::Str("alpha".into()), &Datum::Str("Beta".into())),
            Ordering::Less
        );
    }

    #[test]
    fn datum_cmp_mixed_numeric() {
        assert_eq!(
            datum_cmp(&Datum::Integer(2), &Datum::Real(2.5)),
            Ordering::Less
        );
    }

    #[test]
    fn from_json_rejects_mismatched_types() {
        assert!(Datum::from_json(&serde_json::json!("1"), BaseType::Integer).is_none());
        assert!(Datum::from_json(&serde_json::json!(1), BaseType::String).is_none());
        assert_eq!(
            Datum::from_json(&serde_json::json!(3), BaseType::Real),
            Some(Datum::Real(3.0))
        );
    }

    #[test]
    fn remove_ref_from_list() {
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        let mut value = ColumnValue::List(vec![Datum::Uuid(keep), Datum::Uuid(drop)]);
        assert!(value.remove_ref(&drop));
        assert_eq!(value.ref_uuids(), vec![keep]);
        assert!(!value.remove_ref(&drop));
    }
}
