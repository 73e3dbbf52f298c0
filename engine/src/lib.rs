//! # Record Cache
//!
//! A forkable in-memory record cache for local-first applications.
//!
//! Records are grouped by model and described by a [`Schema`]. Every change
//! is an explicit [`RecordOperation`], and every patch returns the inverse
//! operations that undo it. Relationships declared with an inverse are kept
//! mirrored on both sides automatically.
//!
//! ## Design Principles
//!
//! - **No IO**: the cache has no knowledge of files, network, or platform
//! - **Cheap forks**: record maps are persistent, so a fork shares structure
//!   with its base and costs O(number of models)
//! - **Invertible**: applying a patch's inverse restores prior state
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] has a `(type, id)` identity, optional alternate keys,
//! attributes, and relationships. Keys are indexed in a shared [`KeyMap`].
//!
//! ### Operations
//!
//! Nine operations cover every change, from [`RecordOperation::AddRecord`]
//! to [`RecordOperation::ReplaceRelatedRecord`]. Build them directly or with
//! a [`TransformBuilder`] via [`Cache::patch_with`].
//!
//! ### Processors
//!
//! Each applied operation passes through an ordered list of
//! [`OperationProcessor`]s. The defaults validate against the schema, mirror
//! inverse relationships, and maintain the relationship indices.
//!
//! ### Queries
//!
//! [`QueryExpression`]s are evaluated by [`QueryOperators`], with filtering,
//! sorting and paging for `findRecords`.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use record_cache::{
//!     Cache, CacheSettings, FieldType, ModelDef, QueryExpression, Record, RecordIdentity,
//!     RecordOperation, RelationshipDef, Schema,
//! };
//! use serde_json::json;
//!
//! // 1. Define a schema
//! let schema = Schema::new(1)
//!     .with_model(
//!         "planet",
//!         ModelDef::new()
//!             .with_attribute("name", FieldType::String)
//!             .with_relationship("moons", RelationshipDef::has_many("moon").with_inverse("planet")),
//!     )
//!     .with_model(
//!         "moon",
//!         ModelDef::new()
//!             .with_relationship("planet", RelationshipDef::has_one("planet").with_inverse("moons")),
//!     );
//!
//! // 2. Create a cache
//! let mut cache = Cache::new(CacheSettings::new(Arc::new(schema))).unwrap();
//!
//! // 3. Apply operations
//! let earth = RecordIdentity::new("planet", "earth");
//! let result = cache
//!     .patch(vec![
//!         RecordOperation::add_record(
//!             Record::new("planet", "earth").with_attribute("name", json!("Earth")),
//!         ),
//!         RecordOperation::add_record(
//!             Record::new("moon", "luna").with_has_one("planet", Some(earth.clone())),
//!         ),
//!     ])
//!     .unwrap();
//!
//! // The inverse relationship was mirrored
//! let planet = cache.record(&earth).unwrap();
//! assert_eq!(planet.related_records("moons"), &[RecordIdentity::new("moon", "luna")]);
//!
//! // 4. Undo
//! cache.patch(result.inverse).unwrap();
//! let remaining = cache.query(&QueryExpression::find_records("planet")).unwrap();
//! assert!(remaining.into_records().is_empty());
//! ```
//!
//! ## Events
//!
//! [`Cache::subscribe`] returns a channel receiving a [`CacheEvent`] for every
//! applied operation, cascades included, and for every reset.
//!
//! ## Persistence
//!
//! Use [`Cache::export_state`] and [`Cache::import_state`] with
//! [`CacheSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

pub mod cache;
pub mod error;
pub mod events;
pub mod identity_set;
pub mod key_map;
pub mod operation;
pub mod persistent_map;
pub mod processors;
pub mod query;
pub mod record;
pub mod relationships;
pub mod schema;
pub mod settings;
pub mod snapshot;
pub mod transforms;

// Re-export main types at crate root
pub use cache::{Cache, CacheState, PatchResult, RecordMap};
pub use error::Error;
pub use events::{CacheEvent, EventReceiver, Listeners};
pub use identity_set::IdentitySet;
pub use key_map::KeyMap;
pub use operation::{IntoOperations, RecordOperation, TransformBuilder};
pub use persistent_map::PersistentMap;
pub use processors::{
    default_processors, CacheIntegrityProcessor, OperationProcessor, SchemaConsistencyProcessor,
    SchemaValidationProcessor,
};
pub use query::{
    FilterSpecifier, PageSpecifier, QueryEvaluator, QueryExpression, QueryOperators, QueryResult,
    SetComparison, SortOrder, SortSpecifier, ValueComparison,
};
pub use record::{merge_records, Record, RecordIdentity, RelationshipData};
pub use relationships::{
    InverseRelationship, InverseRelationshipAccessor, RelationshipAccessor, RelationshipValue,
};
pub use schema::{AttributeDef, Dependent, FieldType, ModelDef, RelationshipDef, Schema};
pub use settings::CacheSettings;
pub use snapshot::{CacheSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type RecordId = String;
pub type ModelName = String;
pub type SchemaVersion = u32;
