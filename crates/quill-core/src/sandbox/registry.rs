//! Named operations the sandbox knows how to run.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::{OperationDefinition, QuillError, SafetyCategory};
use crate::ports::Operation;

struct Registered {
    definition: OperationDefinition,
    body: Arc<dyn Operation>,
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: RwLock<HashMap<String, Registered>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name.
    pub fn register(&self, definition: OperationDefinition, body: Arc<dyn Operation>) {
        tracing::info!(
            operation = %definition.name,
            category = %definition.category,
            max_duration_ms = definition.max_duration.as_millis() as u64,
            "operation registered"
        );
        self.operations
            .write()
            .insert(definition.name.clone(), Registered { definition, body });
    }

    pub fn get(&self, name: &str) -> Result<OperationDefinition, QuillError> {
        self.operations
            .read()
            .get(name)
            .map(|r| r.definition.clone())
            .ok_or_else(|| QuillError::UnknownOperation(name.to_string()))
    }

    /// Definitions ordered by name, optionally restricted to one category.
    pub fn list(&self, category: Option<SafetyCategory>) -> Vec<OperationDefinition> {
        let mut defs: Vec<OperationDefinition> = self
            .operations
            .read()
            .values()
            .filter(|r| category.is_none_or(|c| r.definition.category == c))
            .map(|r| r.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.operations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.read().is_empty()
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<(OperationDefinition, Arc<dyn Operation>)> {
        self.operations
            .read()
            .get(name)
            .map(|r| (r.definition.clone(), Arc::clone(&r.body)))
    }
}
