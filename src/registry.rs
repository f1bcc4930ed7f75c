use std::collections::HashMap;

use crate::errors::DbError;
use crate::query::{CompileRequest, CompiledQuery, compile};
use crate::replication::ChangeEvent;

/// Static description of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub identity: String,
    /// Backing collection.
    pub table_name: String,
    pub primary_key: String,
    pub cache: bool,
}

impl ModelDescriptor {
    pub fn new(identity: impl Into<String>, table_name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self { identity: identity.into(), table_name: table_name.into(), primary_key: primary_key.into(), cache: false }
    }

    #[must_use]
    pub fn cached(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}

/// Model identity to descriptor, plus the reverse table lookup used to route
/// change events. Pass it by reference to whatever needs it.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
    tables: HashMap<String, String>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a model. Returns the previous descriptor for the same
    /// identity. When two models share a table, the latest registration owns
    /// the reverse mapping.
    pub fn register(&mut self, desc: ModelDescriptor) -> Option<ModelDescriptor> {
        let previous = self.models.remove(&desc.identity);
        if let Some(prev) = &previous {
            if self.tables.get(&prev.table_name) == Some(&prev.identity) {
                self.tables.remove(&prev.table_name);
            }
        }
        self.tables.insert(desc.table_name.clone(), desc.identity.clone());
        self.models.insert(desc.identity.clone(), desc);
        previous
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&ModelDescriptor> {
        self.models.get(identity)
    }

    #[must_use]
    pub fn by_table(&self, table: &str) -> Option<&ModelDescriptor> {
        self.tables.get(table).and_then(|id| self.models.get(id))
    }

    /// Model that owns the collection an event came from.
    #[must_use]
    pub fn resolve_event(&self, event: &ChangeEvent) -> Option<&ModelDescriptor> {
        self.by_table(&event.collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Compiles `req` against the model's collection and primary key,
    /// overriding whatever the request carried for either.
    ///
    /// # Errors
    /// Returns `NoSuchModel` for an unregistered identity, otherwise whatever
    /// [`compile`] returns.
    pub fn compile(&self, identity: &str, req: CompileRequest) -> Result<CompiledQuery, DbError> {
        let desc = self.get(identity).ok_or_else(|| DbError::NoSuchModel(identity.to_string()))?;
        let req = CompileRequest {
            model: Some(desc.table_name.clone()),
            pk_column_name: Some(desc.primary_key.clone()),
            ..req
        };
        compile(&req)
    }
}
