//! Schema-driven conversion between wire JSON and typed [`Record`]s.
//!
//! Unmarshal is strict: primitives are type-checked exactly, required fields
//! must be present and every input key must be claimed by a field of the
//! selected [`View`] (or consumed by a field hook). Marshal emits only the
//! explicitly-set fields of a record.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value as JsonValue};

use crate::record::Record;
use crate::registry::SchemaRegistry;
use crate::schema::{FieldType, JsonMap, Schema, UnionDef, UniqueKeys, View};
use crate::value::Value;

/// Largest integer magnitude representable exactly in an IEEE double.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One step of an error path: an object key or a list index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(idx: usize) -> Self {
        Self::Index(idx)
    }
}

fn write_path(f: &mut fmt::Formatter<'_>, path: &[PathSegment], message: &str) -> fmt::Result {
    if path.is_empty() {
        return f.write_str(message);
    }
    for (i, segment) in path.iter().enumerate() {
        match segment {
            PathSegment::Key(key) if i == 0 => f.write_str(key)?,
            PathSegment::Key(key) => write!(f, ".{key}")?,
            PathSegment::Index(idx) => write!(f, "[{idx}]")?,
        }
    }
    write!(f, ": {message}")
}

/// Untrusted input did not match a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ValidationError {
    pub path: Vec<PathSegment>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    /// Prefixes the path with `segment`.
    #[must_use]
    pub fn at(mut self, segment: impl Into<PathSegment>) -> Self {
        self.path.insert(0, segment.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_path(f, &self.path, &self.message)
    }
}

/// A record held a value its schema cannot encode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct MarshalError {
    pub path: Vec<PathSegment>,
    pub message: String,
}

impl MarshalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    /// Prefixes the path with `segment`.
    #[must_use]
    pub fn at(mut self, segment: impl Into<PathSegment>) -> Self {
        self.path.insert(0, segment.into());
        self
    }
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_path(f, &self.path, &self.message)
    }
}

fn json_kind(raw: &JsonValue) -> &'static str {
    match raw {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) if n.is_f64() => "number",
        JsonValue::Number(_) => "integer",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn type_error(expected: &FieldType, raw: &JsonValue) -> ValidationError {
    ValidationError::new(format!("expected {expected}, got {}", json_kind(raw)))
}

fn mismatch(expected: &FieldType, value: &Value) -> MarshalError {
    MarshalError::new(format!("expected {expected}, got {}", value.kind_name()))
}

// ---------------------------------------------------------------------------
// HookContext
// ---------------------------------------------------------------------------

/// State handed to field hooks and record codecs.
pub struct HookContext<'a> {
    pub marshaller: &'a Marshaller,
    pub view: View,
    /// Schema whose fields are being processed.
    pub schema: &'a Arc<Schema>,
}

// ---------------------------------------------------------------------------
// Marshaller
// ---------------------------------------------------------------------------

/// Converts between JSON and records using an injected [`SchemaRegistry`].
#[derive(Debug, Clone)]
pub struct Marshaller {
    registry: Arc<SchemaRegistry>,
}

impl Marshaller {
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn cx<'a>(&'a self, schema: &'a Arc<Schema>, view: View) -> HookContext<'a> {
        HookContext {
            marshaller: self,
            view,
            schema,
        }
    }

    // -- unmarshal ----------------------------------------------------------

    /// Reads a record of `schema` from `raw` using `view`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] with the path of the first offending
    /// value.
    pub fn unmarshal(
        &self,
        schema: &Arc<Schema>,
        view: View,
        raw: &JsonValue,
    ) -> Result<Record, ValidationError> {
        let cx = self.cx(schema, view);
        if let Some(codec) = schema.codec() {
            return codec.unmarshal(raw, &cx);
        }
        let Some(object) = raw.as_object() else {
            return Err(ValidationError::new(format!(
                "expected {} object, got {}",
                schema.name(),
                json_kind(raw)
            )));
        };

        let mut claimed: HashSet<String> = HashSet::new();
        let mut record = Record::new(schema);

        for (idx, field) in schema.view(view).entries() {
            let key = field.wire_key();
            claimed.insert(key.to_string());
            if let Some(hook) = field.field_hook() {
                let output = hook.unmarshal(object, field, &cx)?;
                claimed.extend(output.consumed);
                if let Some(value) = output.value {
                    field
                        .check(&value)
                        .map_err(|reason| ValidationError::new(reason).at(key))?;
                    record.set_slot(idx, value);
                }
                continue;
            }

            match object.get(key) {
                Some(raw_value) => {
                    let value = self
                        .unmarshal_value(field.ty(), view, raw_value, schema)
                        .map_err(|e| e.at(key))?;
                    field
                        .check(&value)
                        .map_err(|reason| ValidationError::new(reason).at(key))?;
                    record.set_slot(idx, value);
                }
                None if field.is_required() => {
                    return Err(ValidationError::new("missing required property").at(key));
                }
                None => {}
            }
        }

        let unknown: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|key| !claimed.contains(*key))
            .collect();
        if !unknown.is_empty() {
            let noun = if unknown.len() == 1 {
                "property"
            } else {
                "properties"
            };
            return Err(ValidationError::new(format!(
                "unknown {noun}: {}",
                unknown.join(", ")
            )));
        }
        Ok(record)
    }

    /// Reads a single value of type `ty`. `enclosing` is the schema
    /// `SelfRef` resolves to.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when `raw` does not match `ty`.
    pub fn unmarshal_value(
        &self,
        ty: &FieldType,
        view: View,
        raw: &JsonValue,
        enclosing: &Arc<Schema>,
    ) -> Result<Value, ValidationError> {
        match ty {
            FieldType::String => raw
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| type_error(ty, raw)),
            FieldType::Int | FieldType::UnsignedInt => {
                let n = integer(raw).ok_or_else(|| type_error(ty, raw))?;
                check_int_range(ty, n).map_err(ValidationError::new)?;
                Ok(Value::Int(n))
            }
            FieldType::Float => raw
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| type_error(ty, raw)),
            FieldType::Bool => raw
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| type_error(ty, raw)),
            FieldType::Date => {
                let text = raw.as_str().ok_or_else(|| type_error(ty, raw))?;
                DateTime::parse_from_rfc3339(text)
                    .map(|d| Value::Date(d.with_timezone(&Utc)))
                    .map_err(|e| ValidationError::new(format!("invalid date {text:?}: {e}")))
            }
            FieldType::Any => Ok(Value::Raw(raw.clone())),
            FieldType::Enum(def) => {
                let wire = raw.as_str().ok_or_else(|| type_error(ty, raw))?;
                def.member_for_wire(wire)
                    .map(|member| Value::Enum(member.to_string()))
                    .ok_or_else(|| {
                        ValidationError::new(format!(
                            "invalid {} value {wire:?}; expected one of: {}",
                            def.name(),
                            def.wire_values().join(", ")
                        ))
                    })
            }
            FieldType::Record(_) | FieldType::Named(_) | FieldType::SelfRef => {
                let schema = self.resolve_schema(ty, enclosing).ok_or_else(|| {
                    ValidationError::new(format!("unknown schema {ty}"))
                })?;
                self.unmarshal(&schema, view, raw).map(Value::Record)
            }
            FieldType::Optional(inner) => {
                if raw.is_null() {
                    Ok(Value::Null)
                } else {
                    self.unmarshal_value(inner, view, raw, enclosing)
                }
            }
            FieldType::List(inner) => {
                let items = raw.as_array().ok_or_else(|| type_error(ty, raw))?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.unmarshal_value(inner, view, item, enclosing)
                            .map_err(|e| e.at(i))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            FieldType::Map(key_ty, value_ty) => {
                let object = raw.as_object().ok_or_else(|| type_error(ty, raw))?;
                let mut out = BTreeMap::new();
                for (key, item) in object {
                    check_map_key(key_ty, key).map_err(|e| e.at(key.as_str()))?;
                    let value = self
                        .unmarshal_value(value_ty, view, item, enclosing)
                        .map_err(|e| e.at(key.as_str()))?;
                    out.insert(key.clone(), value);
                }
                Ok(Value::Map(out))
            }
            FieldType::Union(def) => self.unmarshal_union(def, ty, view, raw, enclosing),
        }
    }

    /// Resolves record-like types to their schema.
    fn resolve_schema(&self, ty: &FieldType, enclosing: &Arc<Schema>) -> Option<Arc<Schema>> {
        match ty {
            FieldType::Record(schema) => Some(Arc::clone(schema)),
            FieldType::Named(name) => self.registry.get(name).cloned(),
            FieldType::SelfRef => Some(Arc::clone(enclosing)),
            _ => None,
        }
    }

    /// Whether `raw` has the JSON kind `ty` reads.
    fn kind_matches(&self, ty: &FieldType, raw: &JsonValue, enclosing: &Arc<Schema>) -> bool {
        match ty {
            FieldType::String | FieldType::Date | FieldType::Enum(_) => raw.is_string(),
            FieldType::Int | FieldType::UnsignedInt => integer(raw).is_some(),
            FieldType::Float => raw.is_number(),
            FieldType::Bool => raw.is_boolean(),
            FieldType::Any => true,
            FieldType::Optional(inner) => raw.is_null() || self.kind_matches(inner, raw, enclosing),
            FieldType::List(_) => raw.is_array(),
            FieldType::Map(..) => raw.is_object(),
            FieldType::Record(_) | FieldType::Named(_) | FieldType::SelfRef => {
                match self.resolve_schema(ty, enclosing) {
                    Some(schema) => match schema.codec() {
                        Some(codec) => codec.accepts(raw),
                        None => raw.is_object(),
                    },
                    None => false,
                }
            }
            FieldType::Union(def) => def
                .members()
                .iter()
                .any(|member| self.kind_matches(member, raw, enclosing)),
        }
    }

    fn unmarshal_union(
        &self,
        def: &UnionDef,
        ty: &FieldType,
        view: View,
        raw: &JsonValue,
        enclosing: &Arc<Schema>,
    ) -> Result<Value, ValidationError> {
        // 1. recognizers
        for member in def.members() {
            if let Some(schema) = self.resolve_schema(member, enclosing) {
                if schema.claims(raw) {
                    return self.unmarshal_value(member, view, raw, enclosing);
                }
            }
        }

        // 2. JSON kind
        let candidates: Vec<usize> = def
            .members()
            .iter()
            .enumerate()
            .filter(|(_, member)| self.kind_matches(member, raw, enclosing))
            .map(|(i, _)| i)
            .collect();

        match candidates.as_slice() {
            [] => Err(ValidationError::new(format!(
                "{} does not match any member of {ty}",
                json_kind(raw)
            ))),
            [only] => self.unmarshal_value(&def.members()[*only], view, raw, enclosing),
            _ if raw.is_object() => {
                // 3. keys unique to one record member
                let unique = self.unique_keys(def, view, enclosing);
                let present: BTreeSet<&str> = raw
                    .as_object()
                    .map(|o| o.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                let matched: Vec<usize> = candidates
                    .iter()
                    .copied()
                    .filter(|&i| {
                        unique[i]
                            .as_ref()
                            .is_some_and(|keys| keys.iter().any(|k| present.contains(k.as_str())))
                    })
                    .collect();
                match matched.as_slice() {
                    [only] => self.unmarshal_value(&def.members()[*only], view, raw, enclosing),
                    _ => Err(ValidationError::new(format!(
                        "ambiguous object for {ty}: cannot tell members apart"
                    ))),
                }
            }
            _ => {
                let mut last = None;
                for &i in &candidates {
                    match self.unmarshal_value(&def.members()[i], view, raw, enclosing) {
                        Ok(value) => return Ok(value),
                        Err(err) => last = Some(err),
                    }
                }
                Err(last.unwrap_or_else(|| type_error(ty, raw)))
            }
        }
    }

    fn unique_keys(&self, def: &UnionDef, view: View, enclosing: &Arc<Schema>) -> UniqueKeys {
        if let Some(hit) = def.cached_unique_keys(view, enclosing.name()) {
            return hit;
        }

        let key_sets: Vec<Option<BTreeSet<String>>> = def
            .members()
            .iter()
            .map(|member| {
                self.resolve_schema(member, enclosing)
                    .filter(|schema| schema.codec().is_none())
                    .map(|schema| schema.view(view).keys().map(str::to_string).collect())
            })
            .collect();

        let unique: Vec<Option<BTreeSet<String>>> = key_sets
            .iter()
            .enumerate()
            .map(|(i, keys)| {
                keys.as_ref().map(|keys| {
                    keys.iter()
                        .filter(|key| {
                            !key_sets.iter().enumerate().any(|(j, other)| {
                                j != i && other.as_ref().is_some_and(|o| o.contains(*key))
                            })
                        })
                        .cloned()
                        .collect()
                })
            })
            .collect();

        let unique = Arc::new(unique);
        def.store_unique_keys(view, enclosing.name(), Arc::clone(&unique));
        unique
    }

    // -- marshal ------------------------------------------------------------

    /// Writes the explicitly-set fields of `record` visible in `view`.
    ///
    /// # Errors
    ///
    /// Returns a [`MarshalError`] with the path of the first value that does
    /// not fit its declared type.
    pub fn marshal(&self, record: &Record, view: View) -> Result<JsonValue, MarshalError> {
        let schema = record.schema();
        let cx = self.cx(schema, view);
        if let Some(codec) = schema.codec() {
            return codec.marshal(record, &cx);
        }

        let mut out = JsonMap::new();
        for (idx, field) in schema.view(view).entries() {
            if let Some(hook) = field.field_hook() {
                hook.marshal(&mut out, record, field, &cx)?;
                continue;
            }
            let Some(value) = record.slot(idx) else {
                continue;
            };
            let json = self
                .marshal_value(field.ty(), value, view, schema)
                .map_err(|e| e.at(field.wire_key()))?;
            out.insert(field.wire_key().to_string(), json);
        }
        Ok(JsonValue::Object(out))
    }

    /// Encodes one value as type `ty`.
    ///
    /// # Errors
    ///
    /// Returns a [`MarshalError`] when `value` does not fit `ty`.
    pub fn marshal_value(
        &self,
        ty: &FieldType,
        value: &Value,
        view: View,
        enclosing: &Arc<Schema>,
    ) -> Result<JsonValue, MarshalError> {
        if let Value::Raw(raw) = value {
            return if accepts_raw(ty) {
                Ok(raw.clone())
            } else {
                Err(mismatch(ty, value))
            };
        }

        match (ty, value) {
            (FieldType::Optional(_), Value::Null) => Ok(JsonValue::Null),
            (FieldType::Optional(inner), _) => self.marshal_value(inner, value, view, enclosing),
            (FieldType::String, Value::String(s)) => Ok(JsonValue::String(s.clone())),
            (FieldType::Int | FieldType::UnsignedInt, Value::Int(n)) => {
                check_int_range(ty, *n).map_err(MarshalError::new)?;
                Ok(JsonValue::Number((*n).into()))
            }
            (FieldType::Float, Value::Float(f)) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| MarshalError::new(format!("{f} is not a finite number"))),
            (FieldType::Float, Value::Int(n)) => Ok(JsonValue::Number((*n).into())),
            (FieldType::Bool, Value::Bool(b)) => Ok(JsonValue::Bool(*b)),
            (FieldType::Date, Value::Date(d)) => Ok(JsonValue::String(format_date(d))),
            (FieldType::Enum(def), Value::Enum(member)) => def
                .wire_for(member)
                .map(|wire| JsonValue::String(wire.to_string()))
                .ok_or_else(|| {
                    MarshalError::new(format!("{member:?} is not a member of {}", def.name()))
                }),
            (FieldType::Enum(def), Value::String(wire)) if def.member_for_wire(wire).is_some() => {
                Ok(JsonValue::String(wire.clone()))
            }
            (FieldType::Any, _) => self.to_json(value, view),
            (FieldType::Record(_) | FieldType::Named(_) | FieldType::SelfRef, Value::Record(r)) => {
                let expected = self.expected_name(ty, enclosing);
                if r.schema().name() != expected {
                    return Err(MarshalError::new(format!(
                        "expected {expected} record, got {}",
                        r.schema().name()
                    )));
                }
                self.marshal(r, view)
            }
            (FieldType::List(inner), Value::List(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    self.marshal_value(inner, item, view, enclosing)
                        .map_err(|e| e.at(i))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            (FieldType::Map(_, value_ty), Value::Map(entries)) => {
                let mut out = JsonMap::new();
                for (key, item) in entries {
                    let json = self
                        .marshal_value(value_ty, item, view, enclosing)
                        .map_err(|e| e.at(key.as_str()))?;
                    out.insert(key.clone(), json);
                }
                Ok(JsonValue::Object(out))
            }
            (FieldType::Union(def), _) => {
                let member = def
                    .members()
                    .iter()
                    .find(|member| self.value_matches(member, value, enclosing))
                    .ok_or_else(|| mismatch(ty, value))?;
                self.marshal_value(member, value, view, enclosing)
            }
            _ => Err(mismatch(ty, value)),
        }
    }

    fn expected_name<'a>(&'a self, ty: &'a FieldType, enclosing: &'a Arc<Schema>) -> &'a str {
        match ty {
            FieldType::Record(schema) => schema.name(),
            FieldType::Named(name) => name,
            _ => enclosing.name(),
        }
    }

    /// Shallow check used to pick a union member when marshaling.
    fn value_matches(&self, ty: &FieldType, value: &Value, enclosing: &Arc<Schema>) -> bool {
        match (ty, value) {
            (FieldType::Optional(_), Value::Null) | (FieldType::Any, _) => true,
            (FieldType::Optional(inner), _) => self.value_matches(inner, value, enclosing),
            (FieldType::String, Value::String(_))
            | (FieldType::Int | FieldType::UnsignedInt, Value::Int(_))
            | (FieldType::Float, Value::Float(_) | Value::Int(_))
            | (FieldType::Bool, Value::Bool(_))
            | (FieldType::Date, Value::Date(_))
            | (FieldType::List(_), Value::List(_))
            | (FieldType::Map(..), Value::Map(_)) => true,
            (FieldType::Enum(def), Value::Enum(member)) => def.has_member(member),
            (FieldType::Record(_) | FieldType::Named(_) | FieldType::SelfRef, Value::Record(r)) => {
                r.schema().name() == self.expected_name(ty, enclosing)
            }
            (FieldType::Record(_) | FieldType::Named(_) | FieldType::SelfRef, Value::Raw(_)) => true,
            (FieldType::Union(def), _) => def
                .members()
                .iter()
                .any(|member| self.value_matches(member, value, enclosing)),
            _ => false,
        }
    }

    /// Untyped encoding used for `Any` slots.
    fn to_json(&self, value: &Value, view: View) -> Result<JsonValue, MarshalError> {
        Ok(match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(n) => JsonValue::Number((*n).into()),
            Value::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
            Value::String(s) | Value::Enum(s) => JsonValue::String(s.clone()),
            Value::Date(d) => JsonValue::String(format_date(d)),
            Value::List(items) => JsonValue::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.to_json(item, view).map_err(|e| e.at(i)))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => {
                let mut out = JsonMap::new();
                for (key, item) in entries {
                    out.insert(
                        key.clone(),
                        self.to_json(item, view).map_err(|e| e.at(key.as_str()))?,
                    );
                }
                JsonValue::Object(out)
            }
            Value::Record(record) => self.marshal(record, view)?,
            Value::Raw(raw) => raw.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Integral JSON number as `i64`. Floats (even `1.0`) are rejected.
fn integer(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(n) if !n.is_f64() => n.as_i64(),
        _ => None,
    }
}

fn check_int_range(ty: &FieldType, n: i64) -> Result<(), String> {
    if matches!(ty, FieldType::UnsignedInt) && n < 0 {
        return Err(format!("{n} is negative; expected UnsignedInt"));
    }
    if !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&n) {
        return Err(format!("{n} is outside the safe integer range"));
    }
    Ok(())
}

fn check_map_key(ty: &FieldType, key: &str) -> Result<(), ValidationError> {
    match ty {
        FieldType::String | FieldType::Any => Ok(()),
        FieldType::Int | FieldType::UnsignedInt => {
            let n: i64 = key
                .parse()
                .map_err(|_| ValidationError::new(format!("map key {key:?} is not an integer")))?;
            check_int_range(ty, n).map_err(ValidationError::new)
        }
        FieldType::Enum(def) if def.member_for_wire(key).is_some() => Ok(()),
        FieldType::Enum(def) => Err(ValidationError::new(format!(
            "invalid {} key {key:?}; expected one of: {}",
            def.name(),
            def.wire_values().join(", ")
        ))),
        other => Err(ValidationError::new(format!(
            "unsupported map key type {other}"
        ))),
    }
}

fn accepts_raw(ty: &FieldType) -> bool {
    match ty {
        FieldType::Any
        | FieldType::Record(_)
        | FieldType::Named(_)
        | FieldType::SelfRef
        | FieldType::Union(_) => true,
        FieldType::Optional(inner) => accepts_raw(inner),
        _ => false,
    }
}

/// `UTCDate` wire form: second precision, `Z` suffix.
#[must_use]
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumDef, Field};
    use serde_json::json;

    fn marshaller() -> Marshaller {
        Marshaller::new(Arc::new(SchemaRegistry::new()))
    }

    fn mailbox() -> Arc<Schema> {
        Schema::builder("Mailbox")
            .field(Field::new("id", FieldType::String).server_set())
            .field(Field::new("name", FieldType::String))
            .field(Field::optional("parent_id", FieldType::String))
            .field(Field::new("sort_order", FieldType::UnsignedInt).with_default(0))
            .field(
                Field::new("total_emails", FieldType::UnsignedInt)
                    .with_default(0)
                    .server_set(),
            )
            .build()
            .unwrap()
    }

    // ---- partial serialization ----

    #[test]
    fn only_explicit_fields_are_emitted() {
        let m = marshaller();
        let schema = mailbox();
        let empty = Record::new(&schema);
        assert_eq!(m.marshal(&empty, View::Server).unwrap(), json!({}));

        let record = Record::new(&schema)
            .with("id", "mb1")
            .unwrap()
            .with("parent_id", Value::Null)
            .unwrap();
        assert_eq!(
            m.marshal(&record, View::Server).unwrap(),
            json!({"id": "mb1", "parentId": null})
        );
    }

    #[test]
    fn client_view_omits_server_set_on_marshal() {
        let m = marshaller();
        let record = Record::new(&mailbox())
            .with("id", "mb1")
            .unwrap()
            .with("name", "Inbox")
            .unwrap();
        assert_eq!(
            m.marshal(&record, View::Client).unwrap(),
            json!({"name": "Inbox"})
        );
    }

    #[test]
    fn marshal_unmarshal_preserves_set_fields() {
        let m = marshaller();
        let schema = mailbox();
        let raw = json!({"id": "a", "name": "Inbox", "totalEmails": 3});
        let record = m.unmarshal(&schema, View::Server, &raw).unwrap();
        assert!(!record.is_set("parent_id"));
        assert_eq!(m.marshal(&record, View::Server).unwrap(), raw);
    }

    // ---- strictness ----

    #[test]
    fn server_set_key_rejected_in_client_view() {
        let err = marshaller()
            .unmarshal(&mailbox(), View::Client, &json!({"name": "x", "id": "y"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown property: id");
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = marshaller()
            .unmarshal(&mailbox(), View::Server, &json!({"id": "a", "name": "x", "bar": 1}))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown property: bar");
    }

    #[test]
    fn missing_required_names_key() {
        let err = marshaller()
            .unmarshal(&mailbox(), View::Client, &json!({}))
            .unwrap_err();
        assert_eq!(err.path, vec![PathSegment::Key("name".to_string())]);
        assert_eq!(err.to_string(), "name: missing required property");
    }

    #[test]
    fn primitives_are_not_coerced() {
        let m = marshaller();
        let schema = mailbox();
        for bad in [
            json!({"name": 1}),
            json!({"name": "x", "sortOrder": "1"}),
            json!({"name": "x", "sortOrder": true}),
            json!({"name": "x", "sortOrder": 1.0}),
            json!({"name": "x", "sortOrder": -1}),
            json!({"name": null}),
        ] {
            assert!(m.unmarshal(&schema, View::Client, &bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn int_range_is_enforced() {
        let m = marshaller();
        let schema = mailbox();
        let too_big = json!({"name": "x", "sortOrder": MAX_SAFE_INTEGER + 1});
        assert!(m.unmarshal(&schema, View::Client, &too_big).is_err());
        let max = json!({"name": "x", "sortOrder": MAX_SAFE_INTEGER});
        assert!(m.unmarshal(&schema, View::Client, &max).is_ok());
    }

    // ---- optional vs list of optional ----

    fn holder() -> Arc<Schema> {
        Schema::builder("Holder")
            .field(Field::optional("ids", FieldType::string_list()))
            .field(
                Field::new("slots", FieldType::list(FieldType::optional(FieldType::String)))
                    .with_default(Vec::<String>::new()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn optional_list_accepts_null_but_not_null_elements() {
        let m = marshaller();
        let schema = holder();
        let record = m
            .unmarshal(&schema, View::Client, &json!({"ids": null}))
            .unwrap();
        assert_eq!(record.explicit("ids"), Some(&Value::Null));

        let err = m
            .unmarshal(&schema, View::Client, &json!({"ids": ["a", null]}))
            .unwrap_err();
        assert_eq!(err.to_string(), "ids[1]: expected String, got null");
    }

    #[test]
    fn list_of_optional_accepts_null_elements_but_not_null() {
        let m = marshaller();
        let schema = holder();
        let record = m
            .unmarshal(&schema, View::Client, &json!({"slots": ["a", null]}))
            .unwrap();
        assert_eq!(
            record.explicit("slots"),
            Some(&Value::List(vec![Value::from("a"), Value::Null]))
        );
        assert!(m
            .unmarshal(&schema, View::Client, &json!({"slots": null}))
            .is_err());
    }

    // ---- enums, dates, maps ----

    fn keyword_holder() -> Arc<Schema> {
        let op = EnumDef::new("Operator", [("And", "AND"), ("Or", "OR"), ("Not", "NOT")]);
        Schema::builder("Holder")
            .field(Field::optional("operator", FieldType::Enum(op)))
            .field(Field::optional("received_at", FieldType::Date))
            .field(Field::optional("keywords", FieldType::string_set()))
            .build()
            .unwrap()
    }

    #[test]
    fn enum_round_trips_by_wire_value() {
        let m = marshaller();
        let schema = keyword_holder();
        let record = m
            .unmarshal(&schema, View::Client, &json!({"operator": "OR"}))
            .unwrap();
        assert_eq!(record.explicit("operator"), Some(&Value::member("Or")));
        assert_eq!(
            m.marshal(&record, View::Client).unwrap(),
            json!({"operator": "OR"})
        );
    }

    #[test]
    fn invalid_enum_lists_wire_values() {
        let err = marshaller()
            .unmarshal(&keyword_holder(), View::Client, &json!({"operator": "XOR"}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "operator: invalid Operator value \"XOR\"; expected one of: AND, OR, NOT"
        );
    }

    #[test]
    fn dates_normalize_to_utc() {
        let m = marshaller();
        let schema = keyword_holder();
        let record = m
            .unmarshal(
                &schema,
                View::Client,
                &json!({"receivedAt": "2024-03-01T10:00:00+02:00"}),
            )
            .unwrap();
        assert_eq!(
            m.marshal(&record, View::Client).unwrap(),
            json!({"receivedAt": "2024-03-01T08:00:00Z"})
        );
        assert!(m
            .unmarshal(&schema, View::Client, &json!({"receivedAt": "yesterday"}))
            .is_err());
    }

    #[test]
    fn map_values_are_validated() {
        let m = marshaller();
        let schema = keyword_holder();
        let err = m
            .unmarshal(
                &schema,
                View::Client,
                &json!({"keywords": {"$seen": true, "$flagged": "yes"}}),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "keywords.$flagged: expected Boolean, got string");
    }

    // ---- unions ----

    fn filter_schemas() -> (Arc<Schema>, Arc<Schema>) {
        let condition = Schema::builder("MailboxFilterCondition")
            .field(Field::optional("parent_id", FieldType::String))
            .field(Field::optional("name", FieldType::String))
            .build()
            .unwrap();
        let op = EnumDef::new("Operator", [("And", "AND"), ("Or", "OR"), ("Not", "NOT")]);
        let operator = Schema::builder("FilterOperator")
            .field(Field::new("operator", FieldType::Enum(op)))
            .field(Field::new(
                "conditions",
                FieldType::list(FieldType::union(vec![
                    FieldType::SelfRef,
                    FieldType::record(&condition),
                ])),
            ))
            .build()
            .unwrap();
        let args = Schema::builder("QueryArgs")
            .field(Field::optional(
                "filter",
                FieldType::union(vec![
                    FieldType::record(&operator),
                    FieldType::record(&condition),
                ]),
            ))
            .build()
            .unwrap();
        (args, operator)
    }

    #[test]
    fn union_picks_member_by_unique_keys() {
        let m = marshaller();
        let (args, _) = filter_schemas();
        let raw = json!({"filter": {
            "operator": "OR",
            "conditions": [
                {"name": "Inbox"},
                {"operator": "NOT", "conditions": [{"parentId": "p"}]},
            ],
        }});
        let record = m.unmarshal(&args, View::Client, &raw).unwrap();
        let filter = record.record("filter").unwrap();
        assert_eq!(filter.schema().name(), "FilterOperator");
        let conditions = filter.list("conditions").unwrap();
        assert_eq!(
            conditions[0].as_record().unwrap().schema().name(),
            "MailboxFilterCondition"
        );
        assert_eq!(
            conditions[1].as_record().unwrap().schema().name(),
            "FilterOperator"
        );
        assert_eq!(m.marshal(&record, View::Client).unwrap(), raw);
    }

    #[test]
    fn union_resolution_is_deterministic() {
        let m = marshaller();
        let (args, _) = filter_schemas();
        let raw = json!({"filter": {"name": "Inbox"}});
        let first = m.unmarshal(&args, View::Client, &raw).unwrap();
        for _ in 0..3 {
            assert_eq!(m.unmarshal(&args, View::Client, &raw).unwrap(), first);
        }
    }

    #[test]
    fn empty_object_is_ambiguous() {
        let (args, _) = filter_schemas();
        let err = marshaller()
            .unmarshal(&args, View::Client, &json!({"filter": {}}))
            .unwrap_err();
        assert!(err.message.starts_with("ambiguous object"), "{err}");
        assert_eq!(err.path, vec![PathSegment::Key("filter".to_string())]);
    }

    #[test]
    fn shared_keys_do_not_pick_a_member() {
        let a = Schema::builder("A")
            .field(Field::optional("shared", FieldType::String))
            .field(Field::optional("a", FieldType::String))
            .build()
            .unwrap();
        let b = Schema::builder("B")
            .field(Field::optional("shared", FieldType::String))
            .field(Field::optional("b", FieldType::String))
            .build()
            .unwrap();
        let holder = Schema::builder("Holder")
            .field(Field::new(
                "v",
                FieldType::union(vec![FieldType::record(&a), FieldType::record(&b)]),
            ))
            .build()
            .unwrap();
        let m = marshaller();
        let pick = |raw: JsonValue| {
            m.unmarshal(&holder, View::Client, &json!({"v": raw}))
                .map(|r| r.record("v").unwrap().schema().name().to_string())
        };

        assert_eq!(pick(json!({"shared": "x", "a": "1"})).unwrap(), "A");
        assert_eq!(pick(json!({"shared": "x", "b": "1"})).unwrap(), "B");
        let err = pick(json!({"shared": "x"})).unwrap_err();
        assert!(err.message.starts_with("ambiguous object"), "{err}");
        assert_eq!(err.path, vec![PathSegment::Key("v".to_string())]);
    }

    #[test]
    fn nested_errors_carry_full_path() {
        let (args, _) = filter_schemas();
        let raw = json!({"filter": {"operator": "AND", "conditions": [{"name": "a"}, {"name": 1}]}});
        let err = marshaller()
            .unmarshal(&args, View::Client, &raw)
            .unwrap_err();
        assert_eq!(err.to_string(), "filter.conditions[1].name: expected String, got integer");
    }

    #[test]
    fn primitive_union_takes_first_that_validates() {
        let schema = Schema::builder("Holder")
            .field(Field::new(
                "value",
                FieldType::union(vec![FieldType::UnsignedInt, FieldType::Int, FieldType::String]),
            ))
            .build()
            .unwrap();
        let m = marshaller();
        let neg = m.unmarshal(&schema, View::Client, &json!({"value": -5})).unwrap();
        assert_eq!(neg.int("value"), Some(-5));
        let text = m.unmarshal(&schema, View::Client, &json!({"value": "x"})).unwrap();
        assert_eq!(text.str("value"), Some("x"));
        assert!(m.unmarshal(&schema, View::Client, &json!({"value": true})).is_err());
    }

    #[test]
    fn recognizer_claims_before_kind_matching() {
        let tagged = Schema::builder("Tagged")
            .field(Field::new("tag", FieldType::String))
            .recognizer(|raw| raw.get("tag").is_some())
            .build()
            .unwrap();
        let other = Schema::builder("Other")
            .field(Field::optional("tag", FieldType::String))
            .field(Field::optional("note", FieldType::String))
            .build()
            .unwrap();
        let schema = Schema::builder("Holder")
            .field(Field::new(
                "item",
                FieldType::union(vec![FieldType::record(&other), FieldType::record(&tagged)]),
            ))
            .build()
            .unwrap();
        let record = marshaller()
            .unmarshal(&schema, View::Client, &json!({"item": {"tag": "x"}}))
            .unwrap();
        assert_eq!(record.record("item").unwrap().schema().name(), "Tagged");
    }

    // ---- named references ----

    #[test]
    fn named_types_resolve_through_registry() {
        let part = Schema::builder("Part")
            .field(Field::new("part_id", FieldType::String))
            .field(Field::optional("sub_parts", FieldType::list(FieldType::named("Part"))))
            .build()
            .unwrap();
        let mut registry = SchemaRegistry::new();
        registry.register(Arc::clone(&part)).unwrap();
        let m = Marshaller::new(Arc::new(registry));

        let raw = json!({"partId": "1", "subParts": [{"partId": "1.1", "subParts": null}]});
        let record = m.unmarshal(&part, View::Server, &raw).unwrap();
        assert_eq!(m.marshal(&record, View::Server).unwrap(), raw);

        let orphan = Schema::builder("Orphan")
            .field(Field::new("x", FieldType::named("Missing")))
            .build()
            .unwrap();
        let err = m.unmarshal(&orphan, View::Server, &json!({"x": {}})).unwrap_err();
        assert_eq!(err.to_string(), "x: unknown schema Missing");
    }

    // ---- marshal side ----

    #[test]
    fn raw_passes_through_record_slots() {
        let (_, operator) = filter_schemas();
        let schema = Schema::builder("Holder")
            .field(Field::new("filter", FieldType::record(&operator)))
            .field(Field::optional("name", FieldType::String))
            .build()
            .unwrap();
        let m = marshaller();
        let record = Record::new(&schema)
            .with("filter", json!({"anything": [1, 2]}))
            .unwrap();
        assert_eq!(
            m.marshal(&record, View::Server).unwrap(),
            json!({"filter": {"anything": [1, 2]}})
        );

        let bad = Record::new(&schema).with("name", json!("x")).unwrap();
        assert!(m.marshal(&bad, View::Server).is_err());
    }

    #[test]
    fn marshal_type_mismatch_names_path() {
        let m = marshaller();
        let record = Record::new(&mailbox()).with("name", 5).unwrap();
        let err = m.marshal(&record, View::Server).unwrap_err();
        assert_eq!(err.to_string(), "name: expected String, got int");
    }

    #[test]
    fn wrong_record_schema_is_rejected() {
        let (args, operator) = filter_schemas();
        let record = Record::new(&args)
            .with("filter", Record::new(&mailbox()))
            .unwrap();
        assert!(marshaller().marshal(&record, View::Server).is_err());
        let ok = Record::new(&args)
            .with(
                "filter",
                Record::new(&operator)
                    .with("operator", Value::member("And"))
                    .unwrap()
                    .with("conditions", Vec::<Value>::new())
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(
            marshaller().marshal(&ok, View::Server).unwrap(),
            json!({"filter": {"operator": "AND", "conditions": []}})
        );
    }

    #[test]
    fn validator_failure_is_a_validation_error() {
        let schema = Schema::builder("Holder")
            .field(Field::optional("limit", FieldType::UnsignedInt).validate(|v| {
                match v.as_int() {
                    Some(0) => Err("must be positive".to_string()),
                    _ => Ok(()),
                }
            }))
            .build()
            .unwrap();
        let m = marshaller();
        let err = m
            .unmarshal(&schema, View::Client, &json!({"limit": 0}))
            .unwrap_err();
        assert_eq!(err.to_string(), "limit: must be positive");
        assert!(m.unmarshal(&schema, View::Client, &json!({"limit": null})).is_ok());
    }
}
