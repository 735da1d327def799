use crate::error::RestError;
use serde::Deserialize;
use serde_json::Value;

/// One RFC-6902 operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

/// Applies an ordered patch document to a fetched resource
/// representation. Application is all-or-nothing: a failing operation
/// leaves the caller's document untouched.
pub struct PatchEngine;

impl PatchEngine {
    pub fn parse(body: &Value) -> Result<Vec<PatchOp>, RestError> {
        let items = body
            .as_array()
            .ok_or_else(|| RestError::validation("PATCH body must be a JSON array"))?;
        items
            .iter()
            .map(|item| {
                serde_json::from_value(item.clone())
                    .map_err(|e| RestError::validation(format!("bad patch operation: {}", e)))
            })
            .collect()
    }

    /// Apply `ops` to a copy of `doc`. Returns the patched document and
    /// whether any state-mutating operation actually changed it; a
    /// `test`-only patch reports no update needed.
    pub fn apply(doc: &Value, ops: &[PatchOp]) -> Result<(Value, bool), RestError> {
        let mut work = doc.clone();
        for op in ops {
            match op {
                PatchOp::Test { path, value } => {
                    let current = Self::get(&work, path)?.ok_or_else(|| {
                        RestError::validation(format!("test target '{}' does not exist", path))
                    })?;
                    if current != value {
                        return Err(RestError::validation(format!(
                            "test failed at '{}'",
                            path
                        )));
                    }
                }
                PatchOp::Add { path, value } => {
                    Self::add(&mut work, path, value.clone())?;
                }
                PatchOp::Remove { path } => {
                    Self::remove(&mut work, path)?;
                }
                PatchOp::Replace { path, value } => {
                    if Self::get(&work, path)?.is_none() {
                        return Err(RestError::validation(format!(
                            "replace target '{}' does not exist",
                            path
                        )));
                    }
                    if path.is_empty() {
                        work = value.clone();
                    } else {
                        Self::remove(&mut work, path)?;
                        Self::add(&mut work, path, value.clone())?;
                    }
                }
                PatchOp::Move { from, path } => {
                    if path.starts_with(&format!("{}/", from)) {
                        return Err(RestError::validation(format!(
                            "cannot move '{}' into its own descendant '{}'",
                            from, path
                        )));
                    }
                    let value = Self::get(&work, from)?
                        .ok_or_else(|| {
                            RestError::validation(format!(
                                "move source '{}' does not exist",
                                from
                            ))
                        })?
                        .clone();
                    if from == path {
                        continue;
                    }
                    Self::remove(&mut work, from)?;
                    Self::add(&mut work, path, value)?;
                }
                PatchOp::Copy { from, path } => {
                    let value = Self::get(&work, from)?
                        .ok_or_else(|| {
                            RestError::validation(format!(
                                "copy source '{}' does not exist",
                                from
                            ))
                        })?
                        .clone();
                    Self::add(&mut work, path, value)?;
                }
            }
        }
        let mutated = work != *doc;
        Ok((work, mutated))
    }

    /// Split an RFC-6901 pointer into unescaped tokens.
    fn tokens(pointer: &str) -> Result<Vec<String>, RestError> {
        if pointer.is_empty() {
            return Ok(Vec::new());
        }
        let rest = pointer.strip_prefix('/').ok_or_else(|| {
            RestError::validation(format!("bad JSON pointer '{}'", pointer))
        })?;
        Ok(rest
            .split('/')
            .map(|token| token.replace("~1", "/").replace("~0", "~"))
            .collect())
    }

    fn get<'a>(doc: &'a Value, pointer: &str) -> Result<Option<&'a Value>, RestError> {
        let mut current = doc;
        for token in Self::tokens(pointer)? {
            current = match current {
                Value::Object(map) => match map.get(&token) {
                    Some(next) => next,
                    None => return Ok(None),
                },
                Value::Array(items) => match token.parse::<usize>().ok().and_then(|i| items.get(i))
                {
                    Some(next) => next,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    fn add(doc: &mut Value, pointer: &str, value: Value) -> Result<(), RestError> {
        let tokens = Self::tokens(pointer)?;
        let Some((last, parents)) = tokens.split_last() else {
            *doc = value;
            return Ok(());
        };
        let parent = Self::navigate(doc, parents, pointer)?;
        match parent {
            Value::Object(map) => {
                // Adding over an existing member replaces it.
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::Array(items) => {
                if last == "-" {
                    items.push(value);
                    return Ok(());
                }
                let index: usize = last.parse().map_err(|_| {
                    RestError::validation(format!("bad array index '{}' in '{}'", last, pointer))
                })?;
                if index > items.len() {
                    return Err(RestError::validation(format!(
                        "array index {} out of bounds in '{}'",
                        index, pointer
                    )));
                }
                items.insert(index, value);
                Ok(())
            }
            _ => Err(RestError::validation(format!(
                "'{}' does not point into a container",
                pointer
            ))),
        }
    }

    fn remove(doc: &mut Value, pointer: &str) -> Result<(), RestError> {
        let tokens = Self::tokens(pointer)?;
        let Some((last, parents)) = tokens.split_last() else {
            return Err(RestError::validation("cannot remove the whole document"));
        };
        let parent = Self::navigate(doc, parents, pointer)?;
        match parent {
            Value::Object(map) => map.remove(last).map(|_| ()).ok_or_else(|| {
                RestError::validation(format!("remove target '{}' does not exist", pointer))
            }),
            Value::Array(items) => {
                let index: usize = last.parse().map_err(|_| {
                    RestError::validation(format!("bad array index '{}' in '{}'", last, pointer))
                })?;
                if index >= items.len() {
                    return Err(RestError::validation(format!(
                        "array index {} out of bounds in '{}'",
                        index, pointer
                    )));
                }
                items.remove(index);
                Ok(())
            }
            _ => Err(RestError::validation(format!(
                "'{}' does not point into a container",
                pointer
            ))),
        }
    }

    fn navigate<'a>(
        doc: &'a mut Value,
        tokens: &[String],
        pointer: &str,
    ) -> Result<&'a mut Value, RestError> {
        let mut current = doc;
        for token in tokens {
            current = match current {
                Value::Object(map) => map.get_mut(token),
                Value::Array(items) => {
                    token.parse::<usize>().ok().and_then(|i| items.get_mut(i))
                }
                _ => None,
            }
            .ok_or_else(|| {
                RestError::validation(format!(
                    "path '{}' does not resolve at '{}'",
                    pointer, token
                ))
            })?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "configuration": {
                "hostname": "switch",
                "other_config": {"a~b": "1", "c/d": "2"},
                "flood_vlans": [10, 20, 30]
            }
        })
    }

    #[test]
    fn add_replaces_existing_scalar() {
        let ops = PatchEngine::parse(&json!([
            {"op": "add", "path": "/configuration/hostname", "value": "core1"}
        ]))
        .unwrap();
        let (patched, mutated) = PatchEngine::apply(&doc(), &ops).unwrap();
        assert!(mutated);
        assert_eq!(patched["configuration"]["hostname"], "core1");
    }

    #[test]
    fn add_inserts_at_array_index_and_appends() {
        let ops = PatchEngine::parse(&json!([
            {"op": "add", "path": "/configuration/flood_vlans/1", "value": 15},
            {"op": "add", "path": "/configuration/flood_vlans/-", "value": 40}
        ]))
        .unwrap();
        let (patched, _) = PatchEngine::apply(&doc(), &ops).unwrap();
        assert_eq!(
            patched["configuration"]["flood_vlans"],
            json!([10, 15, 20, 30, 40])
        );
    }

    #[test]
    fn escaped_pointer_tokens_resolve() {
        let ops = PatchEngine::parse(&json!([
            {"op": "test", "path": "/configuration/other_config/a~0b", "value": "1"},
            {"op": "replace", "path": "/configuration/other_config/c~1d", "value": "3"}
        ]))
        .unwrap();
        let (patched, mutated) = PatchEngine::apply(&doc(), &ops).unwrap();
        assert!(mutated);
        assert_eq!(patched["configuration"]["other_config"]["c/d"], "3");
    }

    #[test]
    fn failing_test_aborts_with_no_effect() {
        let original = doc();
        let ops = PatchEngine::parse(&json!([
            {"op": "replace", "path": "/configuration/hostname", "value": "core1"},
            {"op": "test", "path": "/configuration/hostname", "value": "something-else"}
        ]))
        .unwrap();
        let err = PatchEngine::apply(&original, &ops).unwrap_err();
        assert!(matches!(err, RestError::Validation { .. }));
        // The caller's document is untouched by construction.
        assert_eq!(original, doc());
    }

    #[test]
    fn test_only_patch_reports_no_update() {
        let ops = PatchEngine::parse(&json!([
            {"op": "test", "path": "/configuration/hostname", "value": "switch"}
        ]))
        .unwrap();
        let (_, mutated) = PatchEngine::apply(&doc(), &ops).unwrap();
        assert!(!mutated);
    }

    #[test]
    fn move_into_descendant_is_rejected() {
        let ops = PatchEngine::parse(&json!([
            {"op": "move", "from": "/configuration",
             "path": "/configuration/other_config"}
        ]))
        .unwrap();
        assert!(PatchEngine::apply(&doc(), &ops).is_err());
    }

    #[test]
    fn move_and_copy_resolve_from() {
        let ops = PatchEngine::parse(&json!([
            {"op": "copy", "from": "/configuration/hostname", "path": "/configuration/backup"},
            {"op": "move", "from": "/configuration/backup", "path": "/configuration/alias"}
        ]))
        .unwrap();
        let (patched, _) = PatchEngine::apply(&doc(), &ops).unwrap();
        assert_eq!(patched["configuration"]["alias"], "switch");
        assert!(patched["configuration"].get("backup").is_none());

        let bad = PatchEngine::parse(&json!([
            {"op": "copy", "from": "/configuration/nope", "path": "/configuration/x"}
        ]))
        .unwrap();
        assert!(PatchEngine::apply(&doc(), &bad).is_err());
    }

    #[test]
    fn remove_missing_member_fails() {
        let ops = PatchEngine::parse(&json!([
            {"op": "remove", "path": "/configuration/nope"}
        ]))
        .unwrap();
        assert!(PatchEngine::apply(&doc(), &ops).is_err());
    }
}
