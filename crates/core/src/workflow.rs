//! Executor job documents and the bindings used to fill them.
//!
//! A [`Workflow`] is an API-format node graph: a JSON object mapping node
//! ids to `{"class_type": ..., "inputs": {...}}`. The graph is treated as
//! an opaque, immutable value. Runtime parameters (prompt text, seed,
//! dimensions, ...) are written through a [`WorkflowBindings`] map that
//! tells us which node field each parameter lands in, so no code here
//! knows the shape of any particular graph.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Field paths
// ---------------------------------------------------------------------------

/// Address of a single value inside a workflow: a node id followed by the
/// keys to walk inside that node, e.g. `137.inputs.seed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    node_id: String,
    keys: Vec<String>,
}

impl FieldPath {
    /// Build a path from a node id and the keys below it. A path with no
    /// keys cannot be written to; use [`FromStr`] for untrusted input.
    pub fn new(node_id: &str, keys: &[&str]) -> Self {
        Self {
            node_id: node_id.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Shorthand for the common `<node>.inputs.<field>` case.
    pub fn input(node_id: &str, field: &str) -> Self {
        Self::new(node_id, &["inputs", field])
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let node_id = parts.next().unwrap_or_default().trim();
        let keys: Vec<String> = parts.map(|p| p.trim().to_string()).collect();

        if node_id.is_empty() || keys.is_empty() || keys.iter().any(|k| k.is_empty()) {
            return Err(CoreError::Validation(format!(
                "Invalid field path '{s}': expected '<node_id>.<key>[.<key>...]'"
            )));
        }

        Ok(Self {
            node_id: node_id.to_string(),
            keys,
        })
    }
}

impl TryFrom<String> for FieldPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_id, self.keys.join("."))
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// One destination for a named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    pub target: FieldPath,
    /// Added to integer values before writing (e.g. a second sampler
    /// seeded with `seed + 1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Parameter name -> workflow fields it is written to.
///
/// Serialized as a plain JSON object so that binding maps can live in a
/// sidecar file next to the workflow template:
///
/// ```json
/// { "seed": [{ "target": "81.inputs.noise_seed" },
///            { "target": "82.inputs.noise_seed", "offset": 1 }] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowBindings {
    params: BTreeMap<String, Vec<FieldBinding>>,
}

impl WorkflowBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `param` to `<node_id>.inputs.<field>`.
    pub fn bind(self, param: &str, node_id: &str, field: &str) -> Self {
        self.bind_path(param, FieldPath::input(node_id, field), None)
    }

    /// Bind `param` to `<node_id>.inputs.<field>` with an integer offset.
    pub fn bind_offset(self, param: &str, node_id: &str, field: &str, offset: i64) -> Self {
        self.bind_path(param, FieldPath::input(node_id, field), Some(offset))
    }

    /// Bind `param` to an arbitrary path.
    pub fn bind_path(mut self, param: &str, target: FieldPath, offset: Option<i64>) -> Self {
        self.params
            .entry(param.to_string())
            .or_default()
            .push(FieldBinding { target, offset });
        self
    }

    /// Targets for a parameter, empty if it is not bound.
    pub fn targets(&self, param: &str) -> &[FieldBinding] {
        self.params.get(param).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of all bound parameters.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Load a binding map from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = read_file(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            CoreError::Validation(format!("Invalid bindings file {}: {e}", path.display()))
        })
    }

    /// Check that every target names a node present in `workflow`.
    pub fn validate_against(&self, workflow: &Workflow) -> Result<(), CoreError> {
        for (param, bindings) in &self.params {
            for binding in bindings {
                if workflow.node(binding.target.node_id()).is_none() {
                    return Err(CoreError::Validation(format!(
                        "Parameter '{param}' is bound to {} but node '{}' is not in the workflow",
                        binding.target,
                        binding.target.node_id(),
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workflow document
// ---------------------------------------------------------------------------

/// An immutable API-format workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    nodes: Map<String, Value>,
}

impl Workflow {
    /// Wrap a JSON value, which must be an object of node objects.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(nodes) = value else {
            return Err(CoreError::Validation(
                "Workflow must be a JSON object keyed by node id".into(),
            ));
        };

        if let Some((id, _)) = nodes.iter().find(|(_, node)| !node.is_object()) {
            return Err(CoreError::Validation(format!(
                "Workflow node '{id}' is not a JSON object"
            )));
        }

        Ok(Self { nodes })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Workflow is not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Read and parse a workflow file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        Self::from_json_str(&read_file(path)?)
    }

    pub fn node(&self, node_id: &str) -> Option<&Value> {
        self.nodes.get(node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Read the value at `path`, if present.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.keys()
            .iter()
            .try_fold(self.node(path.node_id())?, |current, key| current.get(key))
    }

    /// The document as a JSON value, ready for submission.
    pub fn to_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }

    /// Return a copy with a single field replaced.
    pub fn with_field(&self, path: &FieldPath, value: Value) -> Result<Self, CoreError> {
        let mut copy = self.clone();
        copy.set(path, value)?;
        Ok(copy)
    }

    /// Return a copy with every bound parameter in `values` written to its
    /// targets. Values whose name has no binding are skipped: not every
    /// workflow exposes every parameter.
    pub fn with_values<'a, I>(
        &self,
        bindings: &WorkflowBindings,
        values: I,
    ) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let mut copy = self.clone();
        for (param, value) in values {
            for binding in bindings.targets(param) {
                let value = apply_offset(param, &value, binding.offset)?;
                copy.set(&binding.target, value)?;
            }
        }
        Ok(copy)
    }

    fn set(&mut self, path: &FieldPath, value: Value) -> Result<(), CoreError> {
        let mut current = self.nodes.get_mut(path.node_id()).ok_or_else(|| {
            CoreError::Validation(format!(
                "Cannot set {path}: node '{}' is not in the workflow",
                path.node_id()
            ))
        })?;

        let (last, parents) = path
            .keys()
            .split_last()
            .ok_or_else(|| {
                CoreError::Internal(format!("Empty field path for node {}", path.node_id()))
            })?;

        for key in parents {
            let object = current.as_object_mut().ok_or_else(|| {
                CoreError::Validation(format!("Cannot set {path}: '{key}' has a non-object parent"))
            })?;
            current = object
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let object = current.as_object_mut().ok_or_else(|| {
            CoreError::Validation(format!("Cannot set {path}: parent of '{last}' is not an object"))
        })?;
        object.insert(last.clone(), value);
        Ok(())
    }
}

fn apply_offset(param: &str, value: &Value, offset: Option<i64>) -> Result<Value, CoreError> {
    let Some(offset) = offset else {
        return Ok(value.clone());
    };

    if let Some(n) = value.as_u64() {
        let shifted = i128::from(n) + i128::from(offset);
        return u64::try_from(shifted)
            .map(Value::from)
            .map_err(|_| CoreError::Validation(format!("Offset pushes '{param}' out of range")));
    }
    if let Some(n) = value.as_i64() {
        return n
            .checked_add(offset)
            .map(Value::from)
            .ok_or_else(|| CoreError::Validation(format!("Offset pushes '{param}' out of range")));
    }

    Err(CoreError::Validation(format!(
        "Parameter '{param}' has an offset binding but is not an integer"
    )))
}

fn read_file(path: &Path) -> Result<String, CoreError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CoreError::NotFound {
            entity: "file",
            id: path.display().to_string(),
        },
        _ => CoreError::Internal(format!("Failed to read {}: {e}", path.display())),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
