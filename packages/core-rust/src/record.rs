//! Typed record instances.
//!
//! A [`Record`] holds one slot per schema field. Only slots that were
//! explicitly assigned are marshaled; reads of an unset slot fall back to the
//! field's declared default.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::schema::{Field, Schema};
use crate::value::Value;

/// Errors raised when addressing a record field by name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("{schema} has no field named {field}")]
    UnknownField { schema: String, field: String },
}

/// An instance of a [`Schema`].
#[derive(Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Option<Value>>,
}

impl Record {
    /// An empty record: every field unset.
    #[must_use]
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            values: vec![None; schema.fields().len()],
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn index(&self, name: &str) -> Result<usize, RecordError> {
        self.schema
            .field_index(name)
            .ok_or_else(|| RecordError::UnknownField {
                schema: self.schema.name().to_string(),
                field: name.to_string(),
            })
    }

    /// Explicitly assigns a field.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::UnknownField`] if the schema has no such field.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self, RecordError> {
        let idx = self.index(name)?;
        self.values[idx] = Some(value.into());
        Ok(self)
    }

    /// Owned variant of [`Record::set`] for builder-style construction.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::UnknownField`] if the schema has no such field.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self, RecordError> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Returns the field to its unset state. Unknown names are ignored.
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        let idx = self.schema.field_index(name)?;
        self.values[idx].take()
    }

    pub(crate) fn set_slot(&mut self, idx: usize, value: Value) {
        self.values[idx] = Some(value);
    }

    pub(crate) fn slot(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).and_then(Option::as_ref)
    }

    /// The explicit value, or the field default when unset.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = self.schema.field_index(name)?;
        self.values[idx]
            .as_ref()
            .or_else(|| self.schema.fields()[idx].default_value())
    }

    /// The explicit value only.
    #[must_use]
    pub fn explicit(&self, name: &str) -> Option<&Value> {
        let idx = self.schema.field_index(name)?;
        self.values[idx].as_ref()
    }

    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.explicit(name).is_some()
    }

    /// Fields with an explicit value, in declaration order.
    pub fn set_fields(&self) -> impl Iterator<Item = (&Field, &Value)> {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .filter_map(|(field, value)| value.as_ref().map(|v| (field, v)))
    }

    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn list(&self, name: &str) -> Option<&[Value]> {
        self.get(name).and_then(Value::as_list)
    }

    #[must_use]
    pub fn record(&self, name: &str) -> Option<&Record> {
        self.get(name).and_then(Value::as_record)
    }

    #[must_use]
    pub fn map(&self, name: &str) -> Option<&BTreeMap<String, Value>> {
        self.get(name).and_then(Value::as_map)
    }

    /// String elements of a list field; non-string elements are skipped.
    #[must_use]
    pub fn strings(&self, name: &str) -> Option<Vec<&str>> {
        self.list(name)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.values == other.values
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.schema.name());
        for (field, value) in self.set_fields() {
            out.field(field.name(), value);
        }
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    fn thread() -> Arc<Schema> {
        Schema::builder("Thread")
            .field(Field::new("id", FieldType::String))
            .field(Field::new("email_ids", FieldType::string_list()).with_default(Vec::<String>::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn get_falls_back_to_default() {
        let record = Record::new(&thread());
        assert!(!record.is_set("email_ids"));
        assert_eq!(record.get("email_ids"), Some(&Value::List(vec![])));
        assert_eq!(record.explicit("email_ids"), None);
        assert_eq!(record.get("id"), None);
    }

    #[test]
    fn set_and_unset() {
        let mut record = Record::new(&thread());
        record.set("id", "t1").unwrap();
        assert_eq!(record.str("id"), Some("t1"));
        assert_eq!(record.unset("id"), Some(Value::from("t1")));
        assert!(!record.is_set("id"));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let err = Record::new(&thread()).with("subject", "x").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Thread has no field named subject"
        );
    }

    #[test]
    fn equality_uses_explicit_values() {
        let schema = thread();
        let a = Record::new(&schema).with("id", "t1").unwrap();
        let b = Record::new(&schema).with("id", "t1").unwrap();
        let c = Record::new(&schema)
            .with("id", "t1")
            .unwrap()
            .with("email_ids", Vec::<String>::new())
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
