//! Cache - the in-memory record store.
//!
//! The cache owns one persistent map of records per model, the relationship
//! indices, and an ordered list of processors. Every mutation goes through
//! [`Cache::patch`], which returns the inverse operations that undo it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::Result,
    events::{CacheEvent, EventReceiver, Listeners},
    processors::{default_processors, OperationProcessor},
    snapshot::{CacheSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION},
    transforms, CacheSettings, Error, InverseRelationship, InverseRelationshipAccessor,
    IntoOperations, KeyMap, ModelName, PersistentMap, QueryExpression, QueryOperators,
    QueryResult, Record, RecordId, RecordIdentity, RecordOperation, RelationshipAccessor, Schema,
    TransformBuilder,
};

/// Records of one model, keyed by id.
pub type RecordMap = PersistentMap<RecordId, Record>;

/// Everything processors and query evaluators can see.
///
/// Cloning is cheap: every map is persistent.
#[derive(Debug, Clone)]
pub struct CacheState {
    schema: Arc<Schema>,
    key_map: Arc<KeyMap>,
    records: HashMap<ModelName, RecordMap>,
    relationships: RelationshipAccessor,
    inverse_relationships: InverseRelationshipAccessor,
}

impl CacheState {
    /// Empty state for the given settings.
    pub fn new(settings: &CacheSettings) -> Self {
        let records = settings
            .schema
            .models
            .keys()
            .map(|name| (name.clone(), RecordMap::new()))
            .collect();

        Self {
            schema: settings.schema.clone(),
            key_map: settings
                .key_map
                .clone()
                .unwrap_or_else(KeyMap::new_shared),
            records,
            relationships: RelationshipAccessor::new(),
            inverse_relationships: InverseRelationshipAccessor::new(),
        }
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get the key map.
    pub fn key_map(&self) -> &Arc<KeyMap> {
        &self.key_map
    }

    /// Get a record by identity.
    pub fn record(&self, identity: &RecordIdentity) -> Option<&Record> {
        self.records.get(&identity.record_type)?.get(&identity.id)
    }

    /// Get a record, failing if the model is not defined.
    pub fn current(&self, record_type: &str, id: &str) -> Result<Option<&Record>> {
        Ok(self.records(record_type)?.get(id))
    }

    /// All records of a model.
    pub fn records(&self, record_type: &str) -> Result<&RecordMap> {
        self.records
            .get(record_type)
            .ok_or_else(|| Error::ModelNotDefined(record_type.to_string()))
    }

    /// Forward relationship index.
    pub fn relationships(&self) -> &RelationshipAccessor {
        &self.relationships
    }

    /// Mutable forward relationship index, for processor bookkeeping.
    pub fn relationships_mut(&mut self) -> &mut RelationshipAccessor {
        &mut self.relationships
    }

    /// Reverse relationship index.
    pub fn inverse_relationships(&self) -> &InverseRelationshipAccessor {
        &self.inverse_relationships
    }

    /// Mutable reverse relationship index, for processor bookkeeping.
    pub fn inverse_relationships_mut(&mut self) -> &mut InverseRelationshipAccessor {
        &mut self.inverse_relationships
    }

    /// Write a record, pushing its keys to the key map and dropping the ones
    /// it no longer carries.
    pub(crate) fn put_record(&mut self, record: Record) -> Result<()> {
        let records = self
            .records
            .get_mut(&record.record_type)
            .ok_or_else(|| Error::ModelNotDefined(record.record_type.clone()))?;
        if let Some(previous) = records.get(&record.id) {
            for key_name in previous.keys.keys() {
                if !record.keys.contains_key(key_name) {
                    self.key_map
                        .remove_key(&record.record_type, key_name, &record.id);
                }
            }
        }
        if !record.keys.is_empty() {
            self.key_map.push_record(&record);
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Remove a record, returning it if it existed.
    pub(crate) fn take_record(&mut self, identity: &RecordIdentity) -> Result<Option<Record>> {
        Ok(self
            .records
            .get_mut(&identity.record_type)
            .ok_or_else(|| Error::ModelNotDefined(identity.record_type.clone()))?
            .remove(&identity.id))
    }

    /// Share every map with `base`, or start empty.
    fn reset_from(&mut self, base: Option<&CacheState>) {
        self.records = self
            .schema
            .models
            .keys()
            .map(|name| {
                let map = base
                    .and_then(|b| b.records.get(name))
                    .cloned()
                    .unwrap_or_default();
                (name.clone(), map)
            })
            .collect();

        match base {
            Some(base) => {
                self.relationships = base.relationships.clone();
                self.inverse_relationships = base.inverse_relationships.clone();
            }
            None => {
                self.relationships = RelationshipAccessor::new();
                self.inverse_relationships = InverseRelationshipAccessor::new();
            }
        }
    }

    /// Rebuild both relationship indices from the stored records.
    fn reindex(&mut self) {
        let mut relationships = RelationshipAccessor::new();
        let mut inverse = InverseRelationshipAccessor::new();

        for record in self.records.values().flat_map(|map| map.values()) {
            relationships.add_record(record);
            for (name, data) in &record.relationships {
                for related in data.identities() {
                    inverse.add(
                        related,
                        InverseRelationship::new(record.identity(), name.as_str()),
                    );
                }
            }
        }

        self.relationships = relationships;
        self.inverse_relationships = inverse;
    }

    fn record_count(&self) -> usize {
        self.records.values().map(|map| map.len()).sum()
    }
}

/// Result of a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchResult {
    /// Operations that undo the patch, most recent first
    pub inverse: Vec<RecordOperation>,
    /// Result of each caller-supplied operation, in submission order
    pub data: Vec<Option<Record>>,
}

/// The main cache holding all state.
pub struct Cache {
    state: CacheState,
    processors: Vec<Box<dyn OperationProcessor>>,
    query_operators: QueryOperators,
    listeners: Listeners,
}

impl Cache {
    /// Create an empty cache.
    ///
    /// Fails if the schema is not internally consistent.
    pub fn new(settings: CacheSettings) -> Result<Self> {
        settings.schema.check()?;
        Ok(Self::build(settings, None))
    }

    /// Create a cache forked from `base`.
    pub fn with_base(settings: CacheSettings, base: &Cache) -> Result<Self> {
        settings.schema.check()?;
        Ok(Self::build(settings, Some(base)))
    }

    fn build(settings: CacheSettings, base: Option<&Cache>) -> Self {
        let state = CacheState::new(&settings);
        let mut cache = Self {
            state,
            processors: settings.processors.unwrap_or_else(default_processors),
            query_operators: settings.query_operators.unwrap_or_default(),
            listeners: Listeners::new(),
        };
        cache.reset(base);
        cache
    }

    /// A new cache sharing this cache's schema, key map and query operators,
    /// starting from its current records.
    ///
    /// Runs in O(number of models); no record is copied.
    pub fn fork(&self) -> Cache {
        let settings = CacheSettings::new(self.state.schema.clone())
            .with_key_map(self.state.key_map.clone())
            .with_query_operators(self.query_operators.clone());
        Self::build(settings, Some(self))
    }

    /// Subscribe to patch and reset events.
    pub fn subscribe(&mut self) -> EventReceiver {
        self.listeners.subscribe()
    }

    /// State visible to processors and query evaluators.
    pub fn state(&self) -> &CacheState {
        &self.state
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        self.state.schema()
    }

    /// Get the key map.
    pub fn key_map(&self) -> &Arc<KeyMap> {
        self.state.key_map()
    }

    /// Get a record by identity.
    pub fn record(&self, identity: &RecordIdentity) -> Option<&Record> {
        self.state.record(identity)
    }

    /// All records of a model.
    pub fn records(&self, record_type: &str) -> Result<&RecordMap> {
        self.state.records(record_type)
    }

    /// Forward relationship index.
    pub fn relationships(&self) -> &RelationshipAccessor {
        self.state.relationships()
    }

    /// Reverse relationship index.
    pub fn inverse_relationships(&self) -> &InverseRelationshipAccessor {
        self.state.inverse_relationships()
    }

    /// Processor names in registration order.
    pub fn processor_names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Apply one or more operations.
    ///
    /// Every operation is validated by every processor before anything is
    /// applied. Errors raised after that point leave cascades that already
    /// ran in place.
    pub fn patch(&mut self, operations: impl IntoOperations) -> Result<PatchResult> {
        let operations = operations.into_operations();

        for operation in &operations {
            for processor in &self.processors {
                if let Err(e) = processor.validate(&self.state, operation) {
                    tracing::debug!(
                        processor = processor.name(),
                        op = operation.op_name(),
                        record = %operation.identity(),
                        error = %e,
                        "Operation rejected"
                    );
                    return Err(e);
                }
            }
        }

        let mut result = PatchResult::default();
        for operation in &operations {
            self.apply_operation(operation, &mut result, true)?;
        }
        Ok(result)
    }

    /// Apply the operations produced by `build`.
    pub fn patch_with<F, O>(&mut self, build: F) -> Result<PatchResult>
    where
        F: FnOnce(&TransformBuilder) -> O,
        O: IntoOperations,
    {
        self.patch(build(&TransformBuilder))
    }

    fn apply_operation(
        &mut self,
        operation: &RecordOperation,
        result: &mut PatchResult,
        primary: bool,
    ) -> Result<()> {
        let mut inverse = transforms::inverse(&self.state, operation)?;
        if inverse.is_empty() {
            tracing::debug!(
                op = operation.op_name(),
                record = %operation.identity(),
                primary,
                "Skipping no-op"
            );
            if primary {
                let current = self
                    .state
                    .current(operation.record_type(), operation.record_id())?
                    .cloned();
                result.data.push(current);
            }
            return Ok(());
        }

        for op in self.collect(|p, state| p.before(state, operation))? {
            self.apply_operation(&op, result, false)?;
        }

        let after = self.collect(|p, state| p.after(state, operation))?;

        let data = transforms::patch(&mut self.state, operation)?;
        inverse.append(&mut result.inverse);
        result.inverse = inverse;
        tracing::debug!(
            op = operation.op_name(),
            record = %operation.identity(),
            primary,
            "Applied operation"
        );

        for processor in &mut self.processors {
            processor.immediate(&mut self.state, operation);
        }

        self.listeners.emit(CacheEvent::Patch {
            operation: operation.clone(),
            data: data.clone(),
        });

        if primary {
            result.data.push(data);
        }

        for op in after {
            self.apply_operation(&op, result, false)?;
        }

        for op in self.collect(|p, state| p.finally(state, operation))? {
            self.apply_operation(&op, result, false)?;
        }

        Ok(())
    }

    /// Flatten one hook's operations across processors, in registration order.
    fn collect<F>(&self, hook: F) -> Result<Vec<RecordOperation>>
    where
        F: Fn(&dyn OperationProcessor, &CacheState) -> Result<Vec<RecordOperation>>,
    {
        let mut ops = Vec::new();
        for processor in &self.processors {
            ops.extend(hook(processor.as_ref(), &self.state)?);
        }
        Ok(ops)
    }

    /// Evaluate a query.
    pub fn query(&self, expression: &QueryExpression) -> Result<QueryResult> {
        self.query_operators.evaluate(&self.state, expression)
    }

    /// Parse and evaluate a JSON query.
    pub fn query_json(&self, query: serde_json::Value) -> Result<QueryResult> {
        self.query(&QueryExpression::from_json(query)?)
    }

    /// Reset to `base`'s records and relationships, or to empty.
    ///
    /// Maps are shared with `base`, so this runs in O(number of models).
    pub fn reset(&mut self, base: Option<&Cache>) {
        let base = base.map(|b| &b.state);
        self.state.reset_from(base);
        for processor in &mut self.processors {
            processor.reset(base);
        }

        tracing::info!(
            models = self.state.records.len(),
            records = self.state.record_count(),
            forked = base.is_some(),
            "Cache reset"
        );
        self.listeners.emit(CacheEvent::Reset);
    }

    /// Switch to a newer schema, keeping existing records.
    ///
    /// Models new to `schema` get empty maps.
    pub fn upgrade(&mut self, schema: Arc<Schema>) -> Result<()> {
        let current = self.state.schema.version;
        if schema.version < current {
            return Err(Error::SchemaDowngrade {
                current,
                proposed: schema.version,
            });
        }
        schema.check()?;

        for name in schema.models.keys() {
            self.state.records.entry(name.clone()).or_default();
        }
        self.state.schema = schema;

        for processor in &mut self.processors {
            processor.upgrade(&self.state);
        }

        tracing::info!(
            from = current,
            to = self.state.schema.version,
            models = self.state.records.len(),
            "Schema upgraded"
        );
        Ok(())
    }

    /// Export every record as a snapshot.
    pub fn export_state(&self) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::new(self.state.schema.version);
        for record in self.state.records.values().flat_map(|map| map.values()) {
            snapshot.add_record(record.clone());
        }
        snapshot
    }

    /// Replace every record with the snapshot's.
    ///
    /// Processors do not run; both relationship indices are rebuilt from the
    /// imported records and their keys are pushed to the key map.
    pub fn import_state(&mut self, snapshot: CacheSnapshot) -> Result<()> {
        snapshot.validate(&self.state.schema)?;

        let mut records: HashMap<ModelName, RecordMap> = self
            .state
            .schema
            .models
            .keys()
            .map(|name| (name.clone(), RecordMap::new()))
            .collect();

        for (model_name, model_records) in snapshot.records {
            let map = records.entry(model_name).or_default();
            for (id, record) in model_records {
                if !record.keys.is_empty() {
                    self.state.key_map.push_record(&record);
                }
                map.insert(id, record);
            }
        }

        self.state.records = records;
        self.state.reindex();

        for processor in &mut self.processors {
            processor.reset(Some(&self.state));
        }

        tracing::info!(
            models = self.state.records.len(),
            records = self.state.record_count(),
            "Imported cache state"
        );
        self.listeners.emit(CacheEvent::Reset);
        Ok(())
    }

    /// Get snapshot metadata without full export.
    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version: self.state.schema.version,
            model_count: self
                .state
                .records
                .values()
                .filter(|map| !map.is_empty())
                .count(),
            record_count: self.state.record_count(),
        }
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("schema_version", &self.state.schema.version)
            .field("records", &self.state.record_count())
            .field("processors", &self.processor_names())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
