use indexmap::IndexMap;
use log::debug;
use serde_yaml::{Mapping, Value};

use crate::error::{CidError, Result};

use super::model::PipelineConfig;

/// Parses `dotted.path=value` entries into an ordered override map.
///
/// The value is read as a YAML scalar or flow collection, so `true`, `3` and
/// `[a, b]` keep their types. An empty value is the empty string. When the
/// same path is given twice the last entry wins.
///
/// # Errors
///
/// Returns `MalformedOverride` if an entry has no `=`, an empty path, or an
/// empty path segment.
pub fn parse_overrides<S: AsRef<str>>(entries: &[S]) -> Result<IndexMap<String, Value>> {
    let mut overrides = IndexMap::new();

    for entry in entries {
        let entry = entry.as_ref();
        let Some((path, raw_value)) = entry.split_once('=') else {
            return Err(CidError::malformed_override(entry, "expected 'key=value'"));
        };

        let path = path.trim();
        if path.is_empty() {
            return Err(CidError::malformed_override(entry, "the key is empty"));
        }
        if path.split('.').any(|segment| segment.trim().is_empty()) {
            return Err(CidError::malformed_override(entry, "the key has an empty segment"));
        }

        overrides.insert(path.to_string(), parse_value(raw_value.trim()));
    }

    Ok(overrides)
}

fn parse_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    // Only flow mappings count as mappings; `a: b` stays text
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Mapping(map)) if raw.starts_with('{') => Value::Mapping(map),
        Ok(Value::Mapping(_) | Value::Tagged(_)) | Err(_) => Value::String(raw.to_string()),
        Ok(value) => value,
    }
}

/// Applies overrides onto a copy of `base` and returns the candidate tree.
///
/// Missing intermediate mappings are created and leaves are replaced
/// wholesale. The candidate is not validated; run it through the checker
/// before saving it. `base` is left untouched.
///
/// # Errors
///
/// Returns `MalformedOverride` when a path descends through a list or a
/// scalar value.
pub fn apply_overrides(
    base: &PipelineConfig,
    overrides: &IndexMap<String, Value>,
) -> Result<Value> {
    let mut candidate = serde_yaml::to_value(base)?;

    for (path, value) in overrides {
        set_path(&mut candidate, path, value.clone())?;
        debug!("Applied override {path}");
    }

    Ok(candidate)
}

/// Reads the value at a dotted path, if every segment is a mapping key.
pub fn get_path<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(tree, |node, segment| node.as_mapping()?.get(segment))
}

fn set_path(tree: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(CidError::malformed_override(path, "the key is empty"));
    };

    let mut node = tree;
    let mut walked = Vec::with_capacity(parents.len());
    for segment in parents {
        let map = as_mapping_mut(node, path, &walked)?;
        let key = Value::String((*segment).to_string());
        if !map.get(&key).is_some_and(|v| !v.is_null()) {
            map.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        node = map.get_mut(&key).ok_or_else(|| {
            CidError::malformed_override(path, "failed to create intermediate mapping")
        })?;
        walked.push(*segment);
    }

    let map = as_mapping_mut(node, path, &walked)?;
    map.insert(Value::String((*leaf).to_string()), value);
    Ok(())
}

fn as_mapping_mut<'a>(node: &'a mut Value, path: &str, walked: &[&str]) -> Result<&'a mut Mapping> {
    let at = if walked.is_empty() {
        "the root".to_string()
    } else {
        format!("'{}'", walked.join("."))
    };
    match node {
        Value::Mapping(map) => Ok(map),
        Value::Sequence(_) => Err(CidError::malformed_override(
            path,
            format!("{at} is a list; list elements cannot be overridden by path"),
        )),
        _ => Err(CidError::malformed_override(
            path,
            format!("{at} is not a mapping"),
        )),
    }
}
