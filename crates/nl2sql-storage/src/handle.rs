//! SurrealDB Handle - Connection and Operations
//!
//! Manages the connection and implements [`SchemaSnapshotStore`] and
//! [`ArtifactStore`] against two tables:
//! - `schema_snapshots`: one row per `(ds_id, version)`
//! - `artifacts`: one row per persisted `ArtifactRef`

use async_trait::async_trait;
use chrono::Utc;
use nl2sql_core::domain::{ArtifactRef, ResultFrame, SchemaContract, SchemaMetadata, SchemaSnapshot, SchemaVersion};
use nl2sql_core::error::Nl2SqlError;
use nl2sql_core::{ArtifactStore, SchemaSnapshotStore};
use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::schema::{ArtifactRecord, SchemaSnapshotRecord};
use crate::Result;

/// SurrealDB connection handle backing the pipeline's persistent stores.
pub struct SurrealHandle {
    db: Surreal<Db>,
}

impl SurrealHandle {
    /// Connect to SurrealDB and set up schema.
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        info!("connecting to SurrealDB (in-memory)");

        let db = Surreal::new::<Mem>(()).await.map_err(StorageError::from)?;

        db.use_ns("nl2sql").use_db("main").await.map_err(StorageError::from)?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;

        info!("SurrealDB connected and schema initialized");
        Ok(handle)
    }

    /// Connect to a file-backed `surrealkv://` store rooted at `path`,
    /// creating it if absent. Unlike [`Self::setup_db`], state here survives
    /// across process restarts — the shape the CLI's register/query
    /// invocations need.
    #[instrument(skip_all)]
    pub async fn setup_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "connecting to SurrealDB (file-backed)");

        let db = Surreal::new::<SurrealKv>(path.to_string_lossy().to_string())
            .await
            .map_err(StorageError::from)?;

        db.use_ns("nl2sql").use_db("main").await.map_err(StorageError::from)?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;

        info!("SurrealDB connected and schema initialized");
        Ok(handle)
    }

    /// `NL2SQL_DATA_DIR` selects a file-backed store; otherwise an
    /// in-memory one (single-process only, e.g. the server binary).
    pub async fn setup_from_env() -> Result<Self> {
        match std::env::var("NL2SQL_DATA_DIR") {
            Ok(dir) => Self::setup_file(dir).await,
            Err(_) => Self::setup_db().await,
        }
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("initializing schema_snapshots/artifacts schema");

        let schema = r#"
            DEFINE TABLE schema_snapshots SCHEMAFULL;
            DEFINE FIELD ds_id ON schema_snapshots TYPE string;
            DEFINE FIELD version ON schema_snapshots TYPE string;
            DEFINE FIELD fingerprint ON schema_snapshots TYPE string;
            DEFINE FIELD contract ON schema_snapshots FLEXIBLE TYPE object;
            DEFINE FIELD metadata ON schema_snapshots FLEXIBLE TYPE object;
            DEFINE FIELD created_at ON schema_snapshots TYPE datetime;
            DEFINE INDEX idx_schema_ds_version ON schema_snapshots FIELDS ds_id, version UNIQUE;

            DEFINE TABLE artifacts SCHEMALESS;
            DEFINE INDEX idx_artifact_ref_uri ON artifacts FIELDS ref.uri UNIQUE;
        "#;

        self.db.query(schema).await.map_err(|e| StorageError::SchemaSetup(e.to_string()))?;

        debug!("schema initialized");
        Ok(())
    }
}

#[async_trait]
impl SchemaSnapshotStore for SurrealHandle {
    #[instrument(skip(self, contract, metadata), fields(ds_id = %ds_id))]
    async fn register(
        &self,
        ds_id: &str,
        contract: SchemaContract,
        metadata: SchemaMetadata,
    ) -> nl2sql_core::error::Result<SchemaVersion> {
        let contract = contract.canonicalize();
        let fingerprint = contract.fingerprint()?;

        let ds_owned = ds_id.to_string();
        let fp_owned = fingerprint.clone();
        let mut result = self
            .db
            .query("SELECT * FROM schema_snapshots WHERE ds_id = $ds AND fingerprint = $fp")
            .bind(("ds", ds_owned))
            .bind(("fp", fp_owned))
            .await
            .map_err(StorageError::from)?;
        let existing: Vec<SchemaSnapshotRecord> = result.take(0).map_err(StorageError::from)?;
        if let Some(record) = existing.into_iter().next() {
            return Ok(SchemaVersion(record.version));
        }

        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let version = SchemaVersion::new(&timestamp, &fingerprint);
        let record = SchemaSnapshotRecord {
            ds_id: ds_id.to_string(),
            version: version.as_str().to_string(),
            fingerprint: fingerprint.clone(),
            contract,
            metadata,
            created_at: Utc::now(),
        };

        let _created: Option<SchemaSnapshotRecord> =
            self.db.create("schema_snapshots").content(record).await.map_err(StorageError::from)?;

        info!(version = %version.as_str(), "schema snapshot registered");
        Ok(version)
    }

    #[instrument(skip(self), fields(ds_id = %ds_id, version = ?version))]
    async fn get(&self, ds_id: &str, version: Option<&str>) -> nl2sql_core::error::Result<SchemaSnapshot> {
        let ds_owned = ds_id.to_string();
        let mut result = self
            .db
            .query("SELECT * FROM schema_snapshots WHERE ds_id = $ds")
            .bind(("ds", ds_owned))
            .await
            .map_err(StorageError::from)?;
        let records: Vec<SchemaSnapshotRecord> = result.take(0).map_err(StorageError::from)?;

        let chosen = match version {
            Some(v) => records.into_iter().find(|r| r.version == v),
            None => records.into_iter().max_by(|a, b| a.version.cmp(&b.version)),
        };

        let record = chosen.ok_or_else(|| Nl2SqlError::SchemaNotFound {
            ds_id: ds_id.to_string(),
            version: version.map(String::from),
        })?;

        Ok(SchemaSnapshot {
            ds_id: record.ds_id,
            version: SchemaVersion(record.version),
            fingerprint: record.fingerprint,
            contract: record.contract,
            metadata: record.metadata,
        })
    }

    #[instrument(skip(self), fields(ds_id = %ds_id))]
    async fn latest_version(&self, ds_id: &str) -> nl2sql_core::error::Result<Option<SchemaVersion>> {
        let ds_owned = ds_id.to_string();
        let mut result = self
            .db
            .query("SELECT * FROM schema_snapshots WHERE ds_id = $ds")
            .bind(("ds", ds_owned))
            .await
            .map_err(StorageError::from)?;
        let records: Vec<SchemaSnapshotRecord> = result.take(0).map_err(StorageError::from)?;
        Ok(records.into_iter().max_by(|a, b| a.version.cmp(&b.version)).map(|r| SchemaVersion(r.version)))
    }
}

#[async_trait]
impl ArtifactStore for SurrealHandle {
    #[instrument(skip(self, frame), fields(tenant_id = %tenant_id, request_id = %request_id, node_id = %node_id))]
    async fn put(
        &self,
        tenant_id: &str,
        request_id: &str,
        node_id: &str,
        schema_version: Option<&str>,
        frame: &ResultFrame,
    ) -> nl2sql_core::error::Result<ArtifactRef> {
        let version = schema_version.unwrap_or("unversioned");
        let path = format!("{tenant_id}/{request_id}/{node_id}/{version}/part-00000.json");
        let content_hash = ArtifactRef::content_hash_of(&frame.columns, frame.row_count, &path)?;

        let artifact_ref = ArtifactRef {
            uri: format!("surreal://{path}"),
            backend: "surrealdb".to_string(),
            format: "json".to_string(),
            content_hash,
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            schema_version: schema_version.map(String::from),
            created_at: Utc::now(),
        };

        let record = ArtifactRecord {
            node_id: node_id.to_string(),
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            artifact_ref: artifact_ref.clone(),
            columns: frame.columns.clone(),
            rows: frame.rows.clone(),
        };

        let _created: Option<ArtifactRecord> = self.db.create("artifacts").content(record).await.map_err(StorageError::from)?;

        debug!(uri = %artifact_ref.uri, "artifact persisted");
        Ok(artifact_ref)
    }

    #[instrument(skip(self, reference), fields(uri = %reference.uri))]
    async fn load(&self, reference: &ArtifactRef) -> nl2sql_core::error::Result<ResultFrame> {
        let uri_owned = reference.uri.clone();
        let mut result = self
            .db
            .query("SELECT * FROM artifacts WHERE ref.uri = $uri")
            .bind(("uri", uri_owned))
            .await
            .map_err(StorageError::from)?;
        let records: Vec<ArtifactRecord> = result.take(0).map_err(StorageError::from)?;
        let record = records.into_iter().next().ok_or_else(|| Nl2SqlError::ArtifactNotFound(reference.uri.clone()))?;
        Ok(ResultFrame::ok(record.columns, record.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nl2sql_core::domain::{ColumnContract, TableContract};
    use std::collections::BTreeMap;

    fn contract() -> SchemaContract {
        let mut tables = BTreeMap::new();
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), ColumnContract { data_type: "int".into(), nullable: false });
        tables.insert("machines".to_string(), TableContract { columns, primary_key: vec!["id".into()], foreign_keys: vec![] });
        SchemaContract { tables }
    }

    #[tokio::test]
    async fn connects_and_initializes_schema() {
        let handle = SurrealHandle::setup_db().await;
        assert!(handle.is_ok(), "failed to connect: {:?}", handle.err());
    }

    #[tokio::test]
    async fn register_then_get_roundtrips_snapshot() {
        let handle = SurrealHandle::setup_db().await.unwrap();
        let version = handle.register("ops", contract(), SchemaMetadata::default()).await.unwrap();

        let snapshot = handle.get("ops", Some(version.as_str())).await.unwrap();
        assert_eq!(snapshot.ds_id, "ops");
        assert_eq!(snapshot.version, version);
    }

    #[tokio::test]
    async fn register_twice_with_same_contract_yields_same_version() {
        let handle = SurrealHandle::setup_db().await.unwrap();
        let v1 = handle.register("ops", contract(), SchemaMetadata::default()).await.unwrap();
        let v2 = handle.register("ops", contract(), SchemaMetadata::default()).await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn latest_version_tracks_most_recent_registration() {
        let handle = SurrealHandle::setup_db().await.unwrap();
        let v1 = handle.register("ops", contract(), SchemaMetadata::default()).await.unwrap();
        assert_eq!(handle.latest_version("ops").await.unwrap(), Some(v1));
    }

    #[tokio::test]
    async fn missing_datasource_is_schema_not_found() {
        let handle = SurrealHandle::setup_db().await.unwrap();
        assert!(handle.get("missing", None).await.is_err());
    }

    #[tokio::test]
    async fn put_then_load_roundtrips_artifact() {
        let handle = SurrealHandle::setup_db().await.unwrap();
        let frame = ResultFrame::ok(vec!["id".into()], vec![vec![serde_json::json!(1)]]);
        let reference = handle.put("t1", "r1", "scan_a", Some("v1"), &frame).await.unwrap();
        let loaded = handle.load(&reference).await.unwrap();
        assert_eq!(loaded.row_count, 1);
    }

    #[tokio::test]
    async fn missing_artifact_is_artifact_not_found() {
        let handle = SurrealHandle::setup_db().await.unwrap();
        let fake_ref = ArtifactRef {
            uri: "surreal://nonexistent".into(),
            backend: "surrealdb".into(),
            format: "json".into(),
            content_hash: "x".into(),
            tenant_id: "t".into(),
            request_id: "r".into(),
            schema_version: None,
            created_at: Utc::now(),
        };
        assert!(handle.load(&fake_ref).await.is_err());
    }
}
