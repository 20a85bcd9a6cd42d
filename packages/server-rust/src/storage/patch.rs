//! Applies `/set` update patches to stored records.
//!
//! A patch maps wire property names (or `property/key` paths into map
//! properties) to new values; `null` resets a property. Values are read with
//! the client view of the item schema, so server-set properties cannot be
//! patched.

use jmap_core::marshal::Marshaller;
use jmap_core::schema::JsonMap;
use jmap_core::{FieldType, Record, Value, View};

/// A patch that could not be applied. `properties` names the offending
/// wire keys for the `invalidProperties` set error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{description}")]
pub struct PatchError {
    pub properties: Vec<String>,
    pub description: String,
}

impl PatchError {
    fn new(property: &str, description: impl Into<String>) -> Self {
        Self {
            properties: vec![property.to_string()],
            description: description.into(),
        }
    }
}

/// Applies `patch` to a copy of `record` and returns it.
///
/// # Errors
///
/// Returns a [`PatchError`] for unknown or server-set properties and for
/// values that fail validation.
pub fn apply_patch(
    marshaller: &Marshaller,
    record: &Record,
    patch: &JsonMap,
) -> Result<Record, PatchError> {
    let schema = record.schema();
    let view = schema.view(View::Client);
    let mut updated = record.clone();

    for (key, raw) in patch {
        let (property, entry) = match key.split_once('/') {
            Some((property, entry)) => (property, Some(unescape(entry))),
            None => (key.as_str(), None),
        };
        let Some(field) = view.field_by_key(property) else {
            return Err(PatchError::new(key, format!("cannot patch property {property:?}")));
        };

        match entry {
            None => {
                let value = marshaller
                    .unmarshal_value(field.ty(), View::Client, raw, schema)
                    .map_err(|e| PatchError::new(key, e.to_string()))?;
                field
                    .check(&value)
                    .map_err(|reason| PatchError::new(key, reason))?;
                updated
                    .set(field.name(), value)
                    .map_err(|e| PatchError::new(key, e.to_string()))?;
            }
            Some(entry) => {
                let value_ty = map_value_type(field.ty())
                    .ok_or_else(|| PatchError::new(key, format!("{property} is not a map")))?;
                let mut map = updated
                    .get(field.name())
                    .and_then(Value::as_map)
                    .cloned()
                    .unwrap_or_default();
                if raw.is_null() {
                    map.remove(&entry);
                } else {
                    let value = marshaller
                        .unmarshal_value(value_ty, View::Client, raw, schema)
                        .map_err(|e| PatchError::new(key, e.to_string()))?;
                    map.insert(entry, value);
                }
                updated
                    .set(field.name(), Value::Map(map))
                    .map_err(|e| PatchError::new(key, e.to_string()))?;
            }
        }
    }
    Ok(updated)
}

fn map_value_type(ty: &FieldType) -> Option<&FieldType> {
    match ty {
        FieldType::Map(_, value) => Some(value),
        FieldType::Optional(inner) => map_value_type(inner),
        _ => None,
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[cfg(test)]
mod tests {
    use super::*;
    use jmap_core::{Field, Schema, SchemaRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn note() -> Arc<Schema> {
        Schema::builder("Note")
            .field(Field::new("id", FieldType::String).server_set())
            .field(Field::new("title", FieldType::String))
            .field(Field::new("tags", FieldType::string_set()).with_default(Value::Map(Default::default())))
            .build()
            .unwrap()
    }

    fn patch(raw: serde_json::Value) -> JsonMap {
        raw.as_object().cloned().unwrap()
    }

    fn marshaller() -> Marshaller {
        Marshaller::new(Arc::new(SchemaRegistry::new()))
    }

    fn stored() -> Record {
        Record::new(&note())
            .with("id", "n1")
            .unwrap()
            .with("title", "old")
            .unwrap()
    }

    #[test]
    fn replaces_whole_properties() {
        let out = apply_patch(&marshaller(), &stored(), &patch(json!({"title": "new"}))).unwrap();
        assert_eq!(out.str("title"), Some("new"));
        assert_eq!(out.str("id"), Some("n1"));
    }

    #[test]
    fn map_paths_set_and_remove_entries() {
        let m = marshaller();
        let out = apply_patch(&m, &stored(), &patch(json!({"tags/$seen": true, "tags/a~1b": true}))).unwrap();
        let tags = out.map("tags").unwrap();
        assert!(tags.contains_key("$seen"));
        assert!(tags.contains_key("a/b"));

        let out = apply_patch(&m, &out, &patch(json!({"tags/$seen": null}))).unwrap();
        assert!(!out.map("tags").unwrap().contains_key("$seen"));
    }

    #[test]
    fn server_set_properties_are_rejected() {
        let err = apply_patch(&marshaller(), &stored(), &patch(json!({"id": "n2"}))).unwrap_err();
        assert_eq!(err.properties, vec!["id"]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = apply_patch(&marshaller(), &stored(), &patch(json!({"title": 5}))).unwrap_err();
        assert_eq!(err.properties, vec!["title"]);
        assert_eq!(err.description, "expected String, got integer");
    }
}
