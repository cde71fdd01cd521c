//! Path-addressable configuration tree.
//!
//! One experiment's settings and live internal state, stored as a tagged
//! variant value (`serde_json::Value`) behind typed accessors. Paths are
//! slash-separated; numeric segments index sequences (`Variables/0/Name`).
//!
//! Serialization is canonical: object keys are stored sorted (serde_json's
//! default map is a BTreeMap) and `deserialize(serialize(t)) == t` holds
//! structurally.

use crate::models::{GeneronError, Result};
use serde_json::{Map, Value};

/// Human-readable kind name of a value, used in type-mismatch reports.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Nested key-value store for one experiment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigTree {
    root: Value,
}

impl ConfigTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// Wrap an existing value; the root must be a mapping.
    pub fn from_value(root: Value) -> Result<Self> {
        if !root.is_object() {
            return Err(GeneronError::Parse(format!(
                "configuration root must be a mapping, found {}",
                value_kind(&root)
            )));
        }
        Ok(Self { root })
    }

    /// Borrow the underlying value.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Look up a path, if present.
    pub fn get_opt(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in split(path) {
            node = match node {
                Value::Object(map) => map.get(segment)?,
                Value::Array(seq) => seq.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Look up a path; absent paths are an error naming the full path.
    pub fn get(&self, path: &str) -> Result<&Value> {
        self.get_opt(path).ok_or_else(|| GeneronError::KeyNotFound {
            path: path.to_string(),
        })
    }

    /// Whether a path is present.
    pub fn contains(&self, path: &str) -> bool {
        self.get_opt(path).is_some()
    }

    /// Typed accessor: floating-point number.
    pub fn get_f64(&self, path: &str) -> Result<f64> {
        let v = self.get(path)?;
        v.as_f64().ok_or_else(|| mismatch(path, "number", v))
    }

    /// Typed accessor: non-negative integer. Integral floats are accepted.
    pub fn get_u64(&self, path: &str) -> Result<u64> {
        let v = self.get(path)?;
        if let Some(n) = v.as_u64() {
            return Ok(n);
        }
        if let Some(f) = v.as_f64() {
            if f >= 0.0 && f.fract() == 0.0 {
                return Ok(f as u64);
            }
        }
        Err(mismatch(path, "integer", v))
    }

    /// Typed accessor: string slice.
    pub fn get_str(&self, path: &str) -> Result<&str> {
        let v = self.get(path)?;
        v.as_str().ok_or_else(|| mismatch(path, "string", v))
    }

    /// Typed accessor: boolean.
    pub fn get_bool(&self, path: &str) -> Result<bool> {
        let v = self.get(path)?;
        v.as_bool().ok_or_else(|| mismatch(path, "bool", v))
    }

    /// Optional variants: `Ok(None)` when absent, type error when mistyped.
    pub fn get_f64_opt(&self, path: &str) -> Result<Option<f64>> {
        match self.get_opt(path) {
            None => Ok(None),
            Some(_) => self.get_f64(path).map(Some),
        }
    }

    /// See [`ConfigTree::get_f64_opt`].
    pub fn get_u64_opt(&self, path: &str) -> Result<Option<u64>> {
        match self.get_opt(path) {
            None => Ok(None),
            Some(_) => self.get_u64(path).map(Some),
        }
    }

    /// See [`ConfigTree::get_f64_opt`].
    pub fn get_str_opt(&self, path: &str) -> Result<Option<&str>> {
        match self.get_opt(path) {
            None => Ok(None),
            Some(v) => Ok(Some(
                v.as_str().ok_or_else(|| mismatch(path, "string", v))?,
            )),
        }
    }

    /// Number of entries in a sequence at `path`; 0 when absent.
    pub fn sequence_len(&self, path: &str) -> usize {
        self.get_opt(path)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// Set a value, creating intermediate mappings/sequences as needed.
    ///
    /// Overwriting a previously-typed leaf with an incompatible kind fails
    /// with `TypeMismatch`; numbers are mutually compatible, and `null`
    /// leaves accept anything.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let slot = navigate_mut(&mut self.root, path)?;
        if !compatible(slot, &value) {
            return Err(GeneronError::TypeMismatch {
                path: path.to_string(),
                expected: value_kind(slot),
                found: value_kind(&value),
            });
        }
        *slot = value;
        Ok(())
    }

    /// Set a value without the leaf-type compatibility check.
    ///
    /// Used for wholesale subtree replacement when restoring a checkpoint.
    pub fn overwrite(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let slot = navigate_mut(&mut self.root, path)?;
        *slot = value.into();
        Ok(())
    }

    /// Set a value only when the path is currently absent. Returns whether
    /// the default was applied.
    pub fn set_default(&mut self, path: &str, value: impl Into<Value>) -> Result<bool> {
        if self.contains(path) {
            return Ok(false);
        }
        self.set(path, value)?;
        Ok(true)
    }

    /// Remove a leaf or subtree; no-op when absent.
    pub fn remove(&mut self, path: &str) {
        let segments: Vec<&str> = split(path).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut node = &mut self.root;
        for segment in parents {
            node = match node {
                Value::Object(map) => match map.get_mut(*segment) {
                    Some(v) => v,
                    None => return,
                },
                Value::Array(seq) => {
                    let Some(idx) = segment.parse::<usize>().ok() else {
                        return;
                    };
                    match seq.get_mut(idx) {
                        Some(v) => v,
                        None => return,
                    }
                }
                _ => return,
            };
        }
        if let Value::Object(map) = node {
            map.remove(*last);
        }
    }

    /// Canonical snapshot: pretty-printed JSON with sorted keys.
    pub fn serialize(&self) -> String {
        // Object-rooted values cannot fail to serialize.
        serde_json::to_string_pretty(&self.root).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse a canonical snapshot back into a tree.
    pub fn deserialize(text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| GeneronError::Parse(format!("invalid configuration snapshot: {e}")))?;
        Self::from_value(root)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn mismatch(path: &str, expected: &'static str, found: &Value) -> GeneronError {
    GeneronError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: value_kind(found),
    }
}

/// Leaf compatibility rule for `set`.
fn compatible(existing: &Value, incoming: &Value) -> bool {
    match (existing, incoming) {
        (Value::Null, _) => true,
        (Value::Number(_), Value::Number(_)) => true,
        (a, b) => value_kind(a) == value_kind(b),
    }
}

/// Walk to the slot named by `path`, creating missing intermediates.
fn navigate_mut<'a>(root: &'a mut Value, path: &str) -> Result<&'a mut Value> {
    let segments: Vec<&str> = split(path).collect();
    if segments.is_empty() {
        return Err(GeneronError::KeyNotFound {
            path: path.to_string(),
        });
    }
    let mut node = root;
    for (i, segment) in segments.iter().enumerate() {
        let index = segment.parse::<usize>().ok();
        // A null or missing intermediate becomes a mapping, or a sequence
        // when the segment is numeric.
        if node.is_null() {
            *node = if index.is_some() {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            };
        }
        node = match node {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            Value::Array(seq) => {
                let idx = index.ok_or_else(|| GeneronError::TypeMismatch {
                    path: segments[..=i].join("/"),
                    expected: "sequence index",
                    found: "string",
                })?;
                while seq.len() <= idx {
                    seq.push(Value::Null);
                }
                &mut seq[idx]
            }
            other => {
                return Err(GeneronError::TypeMismatch {
                    path: segments[..i].join("/"),
                    expected: "mapping or sequence",
                    found: value_kind(other),
                })
            }
        };
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_set_and_get() {
        let mut t = ConfigTree::new();
        t.set("Solver/Type", "Optimizer/Population").unwrap();
        t.set("Solver/Termination Criteria/Max Generations", 100)
            .unwrap();
        assert_eq!(t.get_str("Solver/Type").unwrap(), "Optimizer/Population");
        assert_eq!(
            t.get_u64("Solver/Termination Criteria/Max Generations")
                .unwrap(),
            100
        );
    }

    #[test]
    fn sequence_paths_auto_extend() {
        let mut t = ConfigTree::new();
        t.set("Variables/2/Name", "Z").unwrap();
        t.set("Variables/0/Name", "X").unwrap();
        assert_eq!(t.sequence_len("Variables"), 3);
        assert_eq!(t.get_str("Variables/0/Name").unwrap(), "X");
        assert_eq!(t.get_str("Variables/2/Name").unwrap(), "Z");
        assert!(t.get("Variables/1/Name").is_err());
    }

    #[test]
    fn missing_key_reports_full_path() {
        let t = ConfigTree::new();
        let err = t.get("Solver/Population Size").unwrap_err();
        match err {
            GeneronError::KeyNotFound { path } => assert_eq!(path, "Solver/Population Size"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn incompatible_leaf_overwrite_rejected() {
        let mut t = ConfigTree::new();
        t.set("Random Seed", 1337).unwrap();
        assert!(t.set("Random Seed", "coffee").is_err());
        // Numbers stay mutually compatible.
        t.set("Random Seed", 42.0).unwrap();
        // Overwrite bypasses the check for checkpoint restoration.
        t.overwrite("Random Seed", "forced").unwrap();
        assert_eq!(t.get_str("Random Seed").unwrap(), "forced");
    }

    #[test]
    fn serialize_round_trip_is_exact() {
        let mut t = ConfigTree::new();
        t.set("Problem/Type", "Evaluation/Direct").unwrap();
        t.set("Variables/0/Name", "X").unwrap();
        t.set("Variables/0/Lower Bound", -10.0).unwrap();
        t.set("Variables/0/Upper Bound", 10.0).unwrap();
        t.set("Solver/Internal/Best Ever Value", json!(1.25)).unwrap();
        t.set("Console Output/Frequency", 10).unwrap();

        let text = t.serialize();
        let back = ConfigTree::deserialize(&text).unwrap();
        assert_eq!(back, t);
        // Canonical form is stable under re-serialization.
        assert_eq!(back.serialize(), text);
    }

    #[test]
    fn set_default_only_fills_absent_paths() {
        let mut t = ConfigTree::new();
        t.set("Results Output/Frequency", 5).unwrap();
        assert!(!t.set_default("Results Output/Frequency", 1).unwrap());
        assert!(t.set_default("Console Output/Frequency", 1).unwrap());
        assert_eq!(t.get_u64("Results Output/Frequency").unwrap(), 5);
    }

    #[test]
    fn remove_is_silent_on_missing() {
        let mut t = ConfigTree::new();
        t.set("General/Run ID", "abc").unwrap();
        t.remove("General/Run ID");
        t.remove("General/Run ID");
        assert!(!t.contains("General/Run ID"));
    }
}
