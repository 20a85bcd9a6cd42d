//! Named schema registry.
//!
//! Resolves [`FieldType::Named`](crate::schema::FieldType::Named) references,
//! which lets schemas refer to each other before both exist. The registry is
//! built once at startup and handed to the [`Marshaller`](crate::Marshaller)
//! behind an `Arc`; there is no process-global registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::Schema;

/// Errors raised while populating a [`SchemaRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("schema already registered: {0}")]
    Duplicate(String),
}

/// Name-indexed collection of schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is taken.
    pub fn register(&mut self, schema: Arc<Schema>) -> Result<(), RegistryError> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.schemas.insert(name, schema);
        Ok(())
    }

    /// Registers every schema in order, stopping at the first duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] on the first name collision.
    pub fn register_all(
        &mut self,
        schemas: impl IntoIterator<Item = Arc<Schema>>,
    ) -> Result<(), RegistryError> {
        schemas.into_iter().try_for_each(|schema| self.register(schema))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};

    fn schema(name: &str) -> Arc<Schema> {
        Schema::builder(name)
            .field(Field::new("id", FieldType::String))
            .build()
            .unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("Thread")).unwrap();
        registry.register(schema("Email")).unwrap();
        assert!(registry.contains("Email"));
        assert_eq!(registry.get("Thread").unwrap().name(), "Thread");
        assert!(registry.get("Mailbox").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Email", "Thread"]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("Email")).unwrap();
        assert_eq!(
            registry.register(schema("Email")),
            Err(RegistryError::Duplicate("Email".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }
}
