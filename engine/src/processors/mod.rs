//! Operation processors.
//!
//! A processor hooks into the patch pipeline around every applied operation.
//! The cache calls each hook on every processor in registration order:
//!
//! 1. `validate` for every caller-supplied operation, before anything mutates
//! 2. `before`, whose operations are applied first
//! 3. `after`, collected against pre-operation state
//! 4. `immediate`, right after the operation is written
//! 5. the collected `after` operations are applied
//! 6. `finally`, whose operations are applied last
//!
//! Registration order matters: schema validation must run before any
//! processor derives cascades from an operation.

mod cache_integrity;
mod schema_consistency;
mod schema_validation;

pub use cache_integrity::CacheIntegrityProcessor;
pub use schema_consistency::SchemaConsistencyProcessor;
pub use schema_validation::SchemaValidationProcessor;

pub(crate) use schema_validation::validate_record;

use crate::{cache::CacheState, error::Result, RecordOperation};

/// A hook into the patch pipeline. Every method defaults to a no-op.
pub trait OperationProcessor: Send {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Called when the cache is reset, with the base state if there is one.
    fn reset(&mut self, _base: Option<&CacheState>) {}

    /// Called after the cache's schema has been upgraded.
    fn upgrade(&mut self, _state: &CacheState) {}

    /// Reject an operation before any operation in its batch is applied.
    fn validate(&self, _state: &CacheState, _operation: &RecordOperation) -> Result<()> {
        Ok(())
    }

    /// Operations to apply before `operation`.
    fn before(
        &self,
        _state: &CacheState,
        _operation: &RecordOperation,
    ) -> Result<Vec<RecordOperation>> {
        Ok(Vec::new())
    }

    /// Operations to apply after `operation`, computed before it is applied.
    fn after(
        &self,
        _state: &CacheState,
        _operation: &RecordOperation,
    ) -> Result<Vec<RecordOperation>> {
        Ok(Vec::new())
    }

    /// Bookkeeping run right after `operation` is written.
    fn immediate(&mut self, _state: &mut CacheState, _operation: &RecordOperation) {}

    /// Operations to apply once `operation` and its `after` cascade settled.
    fn finally(
        &self,
        _state: &CacheState,
        _operation: &RecordOperation,
    ) -> Result<Vec<RecordOperation>> {
        Ok(Vec::new())
    }
}

/// Schema validation, schema consistency and cache integrity, in that order.
pub fn default_processors() -> Vec<Box<dyn OperationProcessor>> {
    vec![
        Box::new(SchemaValidationProcessor),
        Box::new(SchemaConsistencyProcessor),
        Box::new(CacheIntegrityProcessor),
    ]
}
