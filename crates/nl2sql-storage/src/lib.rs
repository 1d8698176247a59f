//! SurrealDB-backed persistence for the nl2sql pipeline.
//!
//! ## Key Components
//!
//! - [`SurrealHandle`]: connection handle implementing
//!   `nl2sql_core::SchemaSnapshotStore` and `nl2sql_core::ArtifactStore`
//! - [`SchemaSnapshotRecord`] / [`ArtifactRecord`]: row shapes for the
//!   `schema_snapshots` and `artifacts` tables

mod error;
mod handle;
pub mod registry;
pub mod runs;
mod schema;

pub use error::StorageError;
pub use handle::SurrealHandle;
pub use registry::{DatasourceFixture, Registry, TableFixture};
pub use schema::{ArtifactRecord, SchemaSnapshotRecord};

/// Result type for nl2sql-storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
