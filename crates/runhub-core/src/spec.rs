//! Structured-plus-open configuration bags.
//!
//! A [`Spec`] is a set of typed known fields, described by a static
//! [`SpecSchema`], plus an open extension map that keeps every key the
//! schema does not name. Functions, Tasks and Runs all carry one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};

/// Value type accepted by a known field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    StringList,
    StringMap,
    Integer,
    Boolean,
    Object,
    Any,
}

impl FieldType {
    /// Returns true if the JSON value has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            FieldType::StringMap => value
                .as_object()
                .is_some_and(|map| map.values().all(Value::is_string)),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::StringList => write!(f, "list of strings"),
            FieldType::StringMap => write!(f, "map of strings"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Object => write!(f, "object"),
            FieldType::Any => write!(f, "any"),
        }
    }
}

/// A known field of a spec kind.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

impl FieldDef {
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

/// Schema descriptor for one spec kind.
#[derive(Debug, Clone, Copy)]
pub struct SpecSchema {
    pub kind: &'static str,
    pub fields: &'static [FieldDef],
}

impl SpecSchema {
    /// Schema with no known fields: everything lands in the extension map.
    pub const fn open(kind: &'static str) -> Self {
        Self { kind, fields: &[] }
    }

    /// Look up a known field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// How conflicting keys are resolved by [`merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The override value replaces the base value (last write wins).
    #[default]
    OverrideWins,
    /// The base value is kept; the override only fills absent keys.
    KeepBase,
}

/// Configuration bag with typed known fields and an open extension map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spec {
    /// Spec kind (schema name).
    pub kind: String,

    /// Fields named by the schema, type-checked at configure time.
    #[serde(default)]
    known: BTreeMap<String, Value>,

    /// Keys the schema does not name, preserved verbatim.
    #[serde(default)]
    extra: BTreeMap<String, Value>,
}

impl Spec {
    /// Create an empty spec of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            known: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Configure a spec from a flat map, validating it against `schema`.
    ///
    /// Null values are treated as absent. Fails with
    /// [`CoreError::InvalidSpec`] when a known field has the wrong type or a
    /// required field is missing.
    pub fn configure(schema: &SpecSchema, map: &Map<String, Value>) -> CoreResult<Self> {
        let mut spec = Spec::new(schema.kind);

        for (key, value) in map {
            match schema.field(key) {
                Some(_) if value.is_null() => {}
                Some(def) => {
                    if !def.ty.accepts(value) {
                        return Err(CoreError::InvalidSpec(format!(
                            "{}: field '{}' must be {}",
                            schema.kind, key, def.ty
                        )));
                    }
                    spec.known.insert(key.clone(), value.clone());
                }
                None => {
                    spec.extra.insert(key.clone(), value.clone());
                }
            }
        }

        if let Some(missing) = schema
            .fields
            .iter()
            .find(|def| def.required && !spec.known.contains_key(def.name))
        {
            return Err(CoreError::InvalidSpec(format!(
                "{}: required field '{}' is missing",
                schema.kind, missing.name
            )));
        }

        Ok(spec)
    }

    /// Configure a spec from a JSON value, which must be an object.
    pub fn from_value(schema: &SpecSchema, value: &Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Self::configure(schema, map),
            Value::Null => Self::configure(schema, &Map::new()),
            other => Err(CoreError::InvalidSpec(format!(
                "{}: expected an object, got {}",
                schema.kind, other
            ))),
        }
    }

    /// Flatten known fields and extensions back into one map.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (k, v) in self.extra.iter().chain(self.known.iter()) {
            map.insert(k.clone(), v.clone());
        }
        map
    }

    /// True if the spec carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.extra.is_empty()
    }

    /// Get a field, looking at known fields first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.known.get(name).or_else(|| self.extra.get(name))
    }

    /// True if `name` is one of the typed known fields.
    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains_key(name)
    }

    /// Get a string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Get a string field, failing with [`CoreError::MissingField`].
    pub fn require_str(&self, name: &str) -> CoreResult<&str> {
        self.get_str(name)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::MissingField(name.to_string()))
    }

    /// Get a list of strings. A plain string is split on whitespace.
    pub fn get_str_list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// Get a map of strings. Non-string values are rendered as JSON.
    pub fn get_str_map(&self, name: &str) -> BTreeMap<String, String> {
        match self.get(name) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Set an extension value, returning the updated spec.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if self.known.contains_key(&key) {
            self.known.insert(key, value);
        } else {
            self.extra.insert(key, value);
        }
        self
    }

    fn put(&mut self, key: &str, value: &Value, known: bool, policy: MergePolicy) {
        let present = self.known.contains_key(key) || self.extra.contains_key(key);
        if present && policy == MergePolicy::KeepBase {
            return;
        }
        if known || self.known.contains_key(key) {
            self.extra.remove(key);
            self.known.insert(key.to_string(), value.clone());
        } else {
            self.extra.insert(key.to_string(), value.clone());
        }
    }
}

/// Merge two specs into a new one without touching either input.
///
/// Non-null keys of `override_spec` are applied onto `base` under `policy`;
/// keys absent from the override are inherited unchanged. A key that is known
/// on either side stays known in the result. The base kind is kept unless it
/// is empty.
pub fn merge(base: &Spec, override_spec: &Spec, policy: MergePolicy) -> Spec {
    let mut out = base.clone();
    if out.kind.is_empty() {
        out.kind = override_spec.kind.clone();
    }

    for (key, value) in &override_spec.known {
        if !value.is_null() {
            out.put(key, value, true, policy);
        }
    }
    for (key, value) in &override_spec.extra {
        if !value.is_null() {
            out.put(key, value, false, policy);
        }
    }

    out
}

/// Apply a raw override map onto a spec with override-wins semantics.
pub fn apply_overrides(base: &Spec, overrides: &Map<String, Value>) -> Spec {
    let mut patch = Spec::new(base.kind.clone());
    for (k, v) in overrides {
        patch.extra.insert(k.clone(), v.clone());
    }
    merge(base, &patch, MergePolicy::OverrideWins)
}
