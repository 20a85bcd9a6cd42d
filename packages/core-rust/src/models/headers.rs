//! Header field queries and the custom hooks built on them.
//!
//! JMAP lets clients ask for any header in a chosen parsed form with a
//! property string such as `header:From:asAddresses:all`. On the wire these
//! are plain strings (inside `properties`) or object keys (on `Email`), so the
//! schemas here use a [`RecordCodec`] and [`FieldHook`]s rather than the
//! field-driven path.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::case::to_camel_case;
use crate::marshal::{HookContext, MarshalError, ValidationError};
use crate::record::{Record, RecordError};
use crate::schema::{
    EnumDef, Field, FieldHook, FieldType, HookOutput, JsonMap, RecordCodec, Schema, SchemaError,
    View,
};
use crate::value::Value;

/// Prefix shared by every header query string.
pub const HEADER_PREFIX: &str = "header:";

// ---------------------------------------------------------------------------
// HeaderQuery
// ---------------------------------------------------------------------------

/// A parsed `header:Name[:asForm][:all]` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderQuery {
    /// Header name as given (header names are case-insensitive).
    pub name: String,
    /// Wire value of the requested form (`Raw`, `Addresses`, ...).
    pub form: String,
    /// Whether every instance of the header is requested.
    pub all: bool,
}

impl HeaderQuery {
    /// Parses a query string, checking the form against `forms`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the string is not a header query.
    pub fn parse(text: &str, forms: &EnumDef) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::new(format!("not a valid header field query: {text}"));
        let rest = text.strip_prefix(HEADER_PREFIX).ok_or_else(invalid)?;
        let mut parts = rest.split(':').peekable();

        let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(invalid)?;

        let mut form = "Raw".to_string();
        if let Some(wire) = parts.peek().and_then(|p| p.strip_prefix("as")) {
            if forms.member_for_wire(wire).is_none() {
                return Err(ValidationError::new(format!(
                    "invalid header form {wire:?}; expected one of: {}",
                    forms.wire_values().join(", ")
                )));
            }
            form = wire.to_string();
            parts.next();
        }

        let all = parts.next_if_eq(&"all").is_some();

        let leftover: Vec<&str> = parts.collect();
        if !leftover.is_empty() {
            return Err(ValidationError::new(format!(
                "unrecognized header query parts: {}",
                leftover.join(":")
            )));
        }

        Ok(Self {
            name: name.to_string(),
            form,
            all,
        })
    }

    /// Reads the query out of a `HeaderFieldQuery` or `QueriedHeaderField`
    /// record.
    #[must_use]
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            name: record.str("name")?.to_string(),
            form: record.str("form").unwrap_or("Raw").to_string(),
            all: record.bool("all").unwrap_or(false),
        })
    }

    /// Canonical string form, always with an explicit `as` form.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = format!("{HEADER_PREFIX}{}:as{}", self.name, self.form);
        if self.all {
            out.push_str(":all");
        }
        out
    }
}

fn query_string(record: &Record) -> Result<String, MarshalError> {
    if let Some(original) = record.str("original") {
        return Ok(original.to_string());
    }
    HeaderQuery::from_record(record)
        .map(|q| q.canonical())
        .ok_or_else(|| MarshalError::new("header query has no name"))
}

fn is_header_query(raw: &JsonValue) -> bool {
    raw.as_str().is_some_and(|s| s.starts_with(HEADER_PREFIX))
}

// ---------------------------------------------------------------------------
// HeaderFieldQuery codec
// ---------------------------------------------------------------------------

struct HeaderQueryCodec {
    forms: Arc<EnumDef>,
}

impl RecordCodec for HeaderQueryCodec {
    fn unmarshal(&self, raw: &JsonValue, cx: &HookContext<'_>) -> Result<Record, ValidationError> {
        let text = raw.as_str().ok_or_else(|| {
            ValidationError::new("expected header field query string")
        })?;
        let query = HeaderQuery::parse(text, &self.forms)?;
        let member = self
            .forms
            .member_for_wire(&query.form)
            .unwrap_or("Raw")
            .to_string();
        let mut record = Record::new(cx.schema);
        record
            .set("name", query.name)
            .and_then(|r| r.set("form", Value::Enum(member)))
            .and_then(|r| r.set("all", query.all))
            .and_then(|r| r.set("original", text))
            .map_err(|e| ValidationError::new(e.to_string()))?;
        Ok(record)
    }

    fn marshal(&self, record: &Record, _cx: &HookContext<'_>) -> Result<JsonValue, MarshalError> {
        query_string(record).map(JsonValue::String)
    }

    fn accepts(&self, raw: &JsonValue) -> bool {
        raw.is_string()
    }
}

// ---------------------------------------------------------------------------
// HeaderSchemas
// ---------------------------------------------------------------------------

/// The header form enum and the two header query schemas.
#[derive(Debug, Clone)]
pub struct HeaderSchemas {
    pub form: Arc<EnumDef>,
    /// `HeaderFieldQuery`: the string form used in `properties`.
    pub query: Arc<Schema>,
    /// `QueriedHeaderField`: a query plus the header value found for it.
    pub queried: Arc<Schema>,
}

impl HeaderSchemas {
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if a schema definition is inconsistent.
    pub fn new() -> Result<Self, SchemaError> {
        let form = EnumDef::new(
            "HeaderFieldForm",
            [
                ("Raw", "Raw"),
                ("Text", "Text"),
                ("Addresses", "Addresses"),
                ("GroupedAddresses", "GroupedAddresses"),
                ("MessageIds", "MessageIds"),
                ("Date", "Date"),
                ("URLs", "URLs"),
            ],
        );

        let query_fields = Schema::builder("HeaderFieldQueryFields")
            .field(Field::new("name", FieldType::String))
            .field(
                Field::new("form", FieldType::optional(FieldType::Enum(Arc::clone(&form))))
                    .with_default(Value::member("Raw")),
            )
            .field(Field::new("all", FieldType::Bool).with_default(false))
            .field(Field::optional("original", FieldType::String))
            .build()?;

        let query = Schema::builder("HeaderFieldQuery")
            .extend(&query_fields)
            .codec(HeaderQueryCodec {
                forms: Arc::clone(&form),
            })
            .recognizer(is_header_query)
            .build()?;

        let queried = Schema::builder("QueriedHeaderField")
            .extend(&query_fields)
            .field(Field::new("value", FieldType::Any))
            .build()?;

        Ok(Self {
            form,
            query,
            queried,
        })
    }

    /// A `QueriedHeaderField` record for `query` holding `value`.
    ///
    /// # Errors
    ///
    /// Propagates record errors (none for a well-formed schema).
    pub fn queried_field(
        &self,
        query: &HeaderQuery,
        original: Option<&str>,
        value: JsonValue,
    ) -> Result<Record, RecordError> {
        let member = self
            .form
            .member_for_wire(&query.form)
            .unwrap_or("Raw")
            .to_string();
        let mut record = Record::new(&self.queried)
            .with("name", query.name.as_str())?
            .with("form", Value::Enum(member))?
            .with("all", query.all)?
            .with("value", value)?;
        if let Some(original) = original {
            record.set("original", original)?;
        }
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Flattened headers hook
// ---------------------------------------------------------------------------

/// Maps every `header:*` key of an object to a `QueriedHeaderField` in a
/// list field, and back.
pub struct FlattenedHeadersHook {
    headers: HeaderSchemas,
}

impl FlattenedHeadersHook {
    #[must_use]
    pub fn new(headers: &HeaderSchemas) -> Self {
        Self {
            headers: headers.clone(),
        }
    }
}

impl FieldHook for FlattenedHeadersHook {
    fn unmarshal(
        &self,
        data: &JsonMap,
        _field: &Field,
        _cx: &HookContext<'_>,
    ) -> Result<HookOutput, ValidationError> {
        let mut items = Vec::new();
        let mut consumed = Vec::new();
        for (key, value) in data {
            if !key.starts_with(HEADER_PREFIX) {
                continue;
            }
            let query = HeaderQuery::parse(key, &self.headers.form).map_err(|e| e.at(key.as_str()))?;
            let record = self
                .headers
                .queried_field(&query, Some(key.as_str()), value.clone())
                .map_err(|e| ValidationError::new(e.to_string()))?;
            items.push(Value::Record(record));
            consumed.push(key.clone());
        }
        Ok(HookOutput {
            value: (!items.is_empty()).then_some(Value::List(items)),
            consumed,
        })
    }

    fn marshal(
        &self,
        out: &mut JsonMap,
        record: &Record,
        field: &Field,
        cx: &HookContext<'_>,
    ) -> Result<(), MarshalError> {
        let Some(items) = record.explicit(field.name()).and_then(Value::as_list) else {
            return Ok(());
        };
        for item in items {
            let Some(queried) = item.as_record() else {
                return Err(MarshalError::new("header field must be a record").at(field.wire_key()));
            };
            let key = query_string(queried)?;
            let value = match queried.get("value") {
                Some(v) => cx
                    .marshaller
                    .marshal_value(&FieldType::Any, v, cx.view, cx.schema)
                    .map_err(|e| e.at(key.as_str()))?,
                None => JsonValue::Null,
            };
            out.insert(key, value);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Properties hook
// ---------------------------------------------------------------------------

/// The `properties` argument of `/get`: camelCase names on the wire,
/// snake_case field names in the record, each checked against the item
/// schema. With header support, `header:*` strings become
/// `HeaderFieldQuery` records.
pub struct PropertiesHook {
    item: Arc<Schema>,
    header_query: Option<Arc<Schema>>,
}

impl PropertiesHook {
    #[must_use]
    pub fn new(item: &Arc<Schema>, headers: Option<&HeaderSchemas>) -> Self {
        Self {
            item: Arc::clone(item),
            header_query: headers.map(|h| Arc::clone(&h.query)),
        }
    }
}

impl FieldHook for PropertiesHook {
    fn unmarshal(
        &self,
        data: &JsonMap,
        field: &Field,
        cx: &HookContext<'_>,
    ) -> Result<HookOutput, ValidationError> {
        let key = field.wire_key();
        let items = match data.get(key) {
            None => return Ok(HookOutput::default()),
            Some(JsonValue::Null) => {
                return Ok(HookOutput {
                    value: Some(Value::Null),
                    consumed: Vec::new(),
                })
            }
            Some(JsonValue::Array(items)) => items,
            Some(_) => {
                return Err(ValidationError::new("expected list of property names").at(key));
            }
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let Some(text) = item.as_str() else {
                return Err(ValidationError::new("property name must be a string")
                    .at(i)
                    .at(key));
            };
            match &self.header_query {
                Some(schema) if text.starts_with(HEADER_PREFIX) => {
                    let record = cx
                        .marshaller
                        .unmarshal(schema, cx.view, item)
                        .map_err(|e| e.at(i).at(key))?;
                    out.push(Value::Record(record));
                }
                _ => {
                    let Some(property) = self.item.view(View::Server).field_by_key(text) else {
                        return Err(ValidationError::new(format!(
                            "unknown {} property {text:?}",
                            self.item.name()
                        ))
                        .at(i)
                        .at(key));
                    };
                    out.push(Value::String(property.name().to_string()));
                }
            }
        }
        Ok(HookOutput {
            value: Some(Value::List(out)),
            consumed: Vec::new(),
        })
    }

    fn marshal(
        &self,
        out: &mut JsonMap,
        record: &Record,
        field: &Field,
        cx: &HookContext<'_>,
    ) -> Result<(), MarshalError> {
        let key = field.wire_key();
        let json = match record.explicit(field.name()) {
            None => return Ok(()),
            Some(Value::Null) => JsonValue::Null,
            Some(Value::List(items)) => {
                let mut names = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    names.push(match item {
                        Value::String(name) => JsonValue::String(
                            self.item
                                .field(name)
                                .map_or_else(|| to_camel_case(name), |f| f.wire_key().to_string()),
                        ),
                        Value::Record(query) => cx
                            .marshaller
                            .marshal(query, cx.view)
                            .map_err(|e| e.at(i).at(key))?,
                        other => {
                            return Err(MarshalError::new(format!(
                                "property must be a name or header query, got {}",
                                other.kind_name()
                            ))
                            .at(i)
                            .at(key))
                        }
                    });
                }
                JsonValue::Array(names)
            }
            Some(other) => {
                return Err(MarshalError::new(format!(
                    "expected list of properties, got {}",
                    other.kind_name()
                ))
                .at(key))
            }
        };
        out.insert(key.to_string(), json);
        Ok(())
    }
}
