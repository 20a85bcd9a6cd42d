//! Core (RFC 8620) schemas shared by every capability.

use std::sync::Arc;

use crate::registry::{RegistryError, SchemaRegistry};
use crate::schema::{Field, FieldType, Schema, SchemaError};

pub const CORE_URN: &str = "urn:ietf:params:jmap:core";
pub const MAIL_URN: &str = "urn:ietf:params:jmap:mail";
pub const CALENDARS_URN: &str = "urn:ietf:params:jmap:calendars";
pub const CONTACTS_URN: &str = "urn:ietf:params:jmap:contacts";

/// Schemas every module builds on.
#[derive(Debug, Clone)]
pub struct CoreSchemas {
    /// An entry of the session resource's `accounts` map.
    pub account: Arc<Schema>,
    /// `{"resultOf", "name", "path"}`. The executor decodes references itself;
    /// this schema documents the shape and lets modules echo them.
    pub result_reference: Arc<Schema>,
    /// A `/query` sort criterion.
    pub comparator: Arc<Schema>,
    /// Per-object failure reported by `/set`.
    pub set_error: Arc<Schema>,
}

impl CoreSchemas {
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if a schema definition is inconsistent.
    pub fn new() -> Result<Self, SchemaError> {
        let account = Schema::builder("Account")
            .field(Field::new("name", FieldType::String))
            .field(Field::new("is_personal", FieldType::Bool))
            .field(Field::new("is_read_only", FieldType::Bool))
            .field(Field::new("has_data_for", FieldType::string_list()).with_default(Vec::<String>::new()))
            .build()?;

        let result_reference = Schema::builder("ResultReference")
            .field(Field::new("result_of", FieldType::String))
            .field(Field::new("name", FieldType::String))
            .field(Field::new("path", FieldType::String))
            .build()?;

        let comparator = Schema::builder("Comparator")
            .field(Field::new("property", FieldType::String))
            .field(Field::new("is_ascending", FieldType::Bool).with_default(true))
            .field(Field::new("collation", FieldType::String).with_default(""))
            .build()?;

        let set_error = Schema::builder("SetError")
            .field(Field::new("type", FieldType::String))
            .field(Field::optional("description", FieldType::String))
            .field(Field::optional("properties", FieldType::string_list()))
            .build()?;

        Ok(Self {
            account,
            result_reference,
            comparator,
            set_error,
        })
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if any name is already taken.
    pub fn register(&self, registry: &mut SchemaRegistry) -> Result<(), RegistryError> {
        registry.register_all([
            Arc::clone(&self.account),
            Arc::clone(&self.result_reference),
            Arc::clone(&self.comparator),
            Arc::clone(&self.set_error),
        ])
    }
}
