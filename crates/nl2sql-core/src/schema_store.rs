//! Fingerprinted, versioned schema snapshot store.
//!
//! Two backends satisfy this trait with identical contracts: the in-memory
//! one below (used in tests and as a default), and a `surrealdb`-backed
//! persistent one in `nl2sql-storage`.

use crate::domain::{SchemaContract, SchemaMetadata, SchemaSnapshot, SchemaVersion};
use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[async_trait]
pub trait SchemaSnapshotStore: Send + Sync {
    async fn register(&self, ds_id: &str, contract: SchemaContract, metadata: SchemaMetadata) -> Result<SchemaVersion>;
    async fn get(&self, ds_id: &str, version: Option<&str>) -> Result<SchemaSnapshot>;
    async fn latest_version(&self, ds_id: &str) -> Result<Option<SchemaVersion>>;
}

/// In-memory implementation; keeps up to `max_versions` per datasource,
/// evicting the oldest by lexicographic version order beyond that.
pub struct InMemorySchemaStore {
    max_versions: usize,
    snapshots: Mutex<BTreeMap<String, Vec<SchemaSnapshot>>>,
}

impl InMemorySchemaStore {
    pub fn new(max_versions: usize) -> Self {
        Self { max_versions, snapshots: Mutex::new(BTreeMap::new()) }
    }
}

impl Default for InMemorySchemaStore {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl SchemaSnapshotStore for InMemorySchemaStore {
    async fn register(&self, ds_id: &str, contract: SchemaContract, metadata: SchemaMetadata) -> Result<SchemaVersion> {
        let contract = contract.canonicalize();
        let fingerprint = contract.fingerprint()?;

        let mut guard = self.snapshots.lock().unwrap();
        let versions = guard.entry(ds_id.to_string()).or_default();

        if let Some(existing) = versions.iter().find(|s| s.fingerprint == fingerprint) {
            return Ok(existing.version.clone());
        }

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let version = SchemaVersion::new(&timestamp, &fingerprint);
        versions.push(SchemaSnapshot {
            ds_id: ds_id.to_string(),
            version: version.clone(),
            fingerprint,
            contract,
            metadata,
        });
        versions.sort_by(|a, b| a.version.cmp(&b.version));
        while versions.len() > self.max_versions {
            versions.remove(0);
        }
        Ok(version)
    }

    async fn get(&self, ds_id: &str, version: Option<&str>) -> Result<SchemaSnapshot> {
        let guard = self.snapshots.lock().unwrap();
        let versions = guard
            .get(ds_id)
            .ok_or_else(|| Nl2SqlError::SchemaNotFound { ds_id: ds_id.to_string(), version: version.map(String::from) })?;

        match version {
            Some(v) => versions
                .iter()
                .find(|s| s.version.as_str() == v)
                .cloned()
                .ok_or_else(|| Nl2SqlError::SchemaNotFound { ds_id: ds_id.to_string(), version: Some(v.to_string()) }),
            None => versions
                .iter()
                .max_by(|a, b| a.version.cmp(&b.version))
                .cloned()
                .ok_or_else(|| Nl2SqlError::SchemaNotFound { ds_id: ds_id.to_string(), version: None }),
        }
    }

    async fn latest_version(&self, ds_id: &str) -> Result<Option<SchemaVersion>> {
        let guard = self.snapshots.lock().unwrap();
        Ok(guard
            .get(ds_id)
            .and_then(|versions| versions.iter().max_by(|a, b| a.version.cmp(&b.version)))
            .map(|s| s.version.clone()))
    }
}
