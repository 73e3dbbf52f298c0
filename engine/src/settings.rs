//! Construction-time configuration for a cache.

use std::fmt;
use std::sync::Arc;

use crate::{processors::OperationProcessor, KeyMap, QueryOperators, Schema};

/// Settings a [`Cache`](crate::Cache) is built from.
///
/// Only the schema is required. Without a key map the cache creates its own;
/// without processors it uses
/// [`default_processors`](crate::processors::default_processors); without
/// query operators it uses the built-in evaluators.
pub struct CacheSettings {
    /// Schema shared by every fork of the cache
    pub schema: Arc<Schema>,
    /// Key map, shared when several caches resolve the same keys
    pub key_map: Option<Arc<KeyMap>>,
    /// Processors in registration order
    pub processors: Option<Vec<Box<dyn OperationProcessor>>>,
    /// Query evaluator table
    pub query_operators: Option<QueryOperators>,
}

impl CacheSettings {
    /// Settings with the given schema and every other option defaulted.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            key_map: None,
            processors: None,
            query_operators: None,
        }
    }

    /// Builder-style method to share a key map.
    pub fn with_key_map(mut self, key_map: Arc<KeyMap>) -> Self {
        self.key_map = Some(key_map);
        self
    }

    /// Builder-style method to replace the processor list.
    pub fn with_processors(mut self, processors: Vec<Box<dyn OperationProcessor>>) -> Self {
        self.processors = Some(processors);
        self
    }

    /// Builder-style method to replace the query operator table.
    pub fn with_query_operators(mut self, operators: QueryOperators) -> Self {
        self.query_operators = Some(operators);
        self
    }
}

impl fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSettings")
            .field("schema_version", &self.schema.version)
            .field("key_map", &self.key_map.is_some())
            .field(
                "processors",
                &self
                    .processors
                    .as_ref()
                    .map(|p| p.iter().map(|p| p.name()).collect::<Vec<_>>()),
            )
            .field("query_operators", &self.query_operators.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::SchemaValidationProcessor;

    #[test]
    fn builder() {
        let key_map = KeyMap::new_shared();
        let settings = CacheSettings::new(Arc::new(Schema::new(2)))
            .with_key_map(key_map.clone())
            .with_processors(vec![Box::new(SchemaValidationProcessor)]);

        assert!(Arc::ptr_eq(settings.key_map.as_ref().unwrap(), &key_map));
        assert_eq!(settings.processors.as_ref().map(Vec::len), Some(1));
        assert!(settings.query_operators.is_none());

        let debug = format!("{:?}", settings);
        assert!(debug.contains("schema-validation"));
    }
}
