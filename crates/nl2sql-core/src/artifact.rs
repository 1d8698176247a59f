//! Artifact store abstraction: persists per-node `ResultFrame`s and hands
//! back an [`ArtifactRef`] the rest of the pipeline treats as an opaque
//! pointer. Concrete blob backends (local FS, object store) are external
//! collaborators; this module defines the trait, the path template, and a
//! local-filesystem implementation good enough to run the pipeline
//! end-to-end without any cloud dependency.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{ArtifactRef, ResultFrame};
use crate::error::{Nl2SqlError, Result};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        tenant_id: &str,
        request_id: &str,
        node_id: &str,
        schema_version: Option<&str>,
        frame: &ResultFrame,
    ) -> Result<ArtifactRef>;

    async fn load(&self, reference: &ArtifactRef) -> Result<ResultFrame>;
}

/// `<base>/<tenant_id>/<request_id>/<node_id>/<schema_version>/part-00000.<format>`.
/// `schema_version` defaults to `"unversioned"` when the subquery carried
/// none.
fn render_path(base: &str, tenant_id: &str, request_id: &str, node_id: &str, schema_version: Option<&str>, format: &str) -> String {
    let version = schema_version.unwrap_or("unversioned");
    format!("{base}/{tenant_id}/{request_id}/{node_id}/{version}/part-00000.{format}")
}

/// Local-filesystem backend: writes each frame as a JSON-lines-style blob
/// under `base_dir`. A columnar format would cut storage further; JSON here
/// keeps the core free of a parquet dependency while preserving the path
/// template and content-hash contract exactly.
pub struct LocalArtifactStore {
    base_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(
        &self,
        tenant_id: &str,
        request_id: &str,
        node_id: &str,
        schema_version: Option<&str>,
        frame: &ResultFrame,
    ) -> Result<ArtifactRef> {
        let path = render_path(
            self.base_dir.to_string_lossy().as_ref(),
            tenant_id,
            request_id,
            node_id,
            schema_version,
            "json",
        );
        let full_path = PathBuf::from(&path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(frame)?;
        tokio::fs::write(&full_path, &body).await?;

        let content_hash = ArtifactRef::content_hash_of(&frame.columns, frame.row_count, &path)?;
        Ok(ArtifactRef {
            uri: format!("file://{path}"),
            backend: "local".to_string(),
            format: "json".to_string(),
            content_hash,
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            schema_version: schema_version.map(String::from),
            created_at: Utc::now(),
        })
    }

    async fn load(&self, reference: &ArtifactRef) -> Result<ResultFrame> {
        let path = reference
            .uri
            .strip_prefix("file://")
            .ok_or_else(|| Nl2SqlError::ArtifactNotFound(reference.uri.clone()))?;
        let body = tokio::fs::read(path)
            .await
            .map_err(|_| Nl2SqlError::ArtifactNotFound(reference.uri.clone()))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// In-memory backend for tests: identical contract, no filesystem IO.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    frames: std::sync::Mutex<std::collections::BTreeMap<String, ResultFrame>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        tenant_id: &str,
        request_id: &str,
        node_id: &str,
        schema_version: Option<&str>,
        frame: &ResultFrame,
    ) -> Result<ArtifactRef> {
        let path = render_path("mem", tenant_id, request_id, node_id, schema_version, "json");
        let content_hash = ArtifactRef::content_hash_of(&frame.columns, frame.row_count, &path)?;
        self.frames.lock().unwrap().insert(path.clone(), frame.clone());
        Ok(ArtifactRef {
            uri: format!("mem://{path}"),
            backend: "memory".to_string(),
            format: "json".to_string(),
            content_hash,
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            schema_version: schema_version.map(String::from),
            created_at: Utc::now(),
        })
    }

    async fn load(&self, reference: &ArtifactRef) -> Result<ResultFrame> {
        let path = reference
            .uri
            .strip_prefix("mem://")
            .ok_or_else(|| Nl2SqlError::ArtifactNotFound(reference.uri.clone()))?;
        self.frames
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Nl2SqlError::ArtifactNotFound(reference.uri.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_load_roundtrips_frame() {
        let store = InMemoryArtifactStore::new();
        let frame = ResultFrame::ok(vec!["id".into()], vec![vec![serde_json::json!(1)]]);
        let reference = store.put("t1", "r1", "scan_a", Some("v1"), &frame).await.unwrap();
        let loaded = store.load(&reference).await.unwrap();
        assert_eq!(loaded.row_count, 1);
    }

    #[tokio::test]
    async fn content_hash_is_idempotent_for_identical_frame() {
        let store = InMemoryArtifactStore::new();
        let frame = ResultFrame::ok(vec!["id".into()], vec![vec![serde_json::json!(1)]]);
        let r1 = store.put("t1", "r1", "scan_a", Some("v1"), &frame).await.unwrap();
        let r2 = store.put("t1", "r1", "scan_a", Some("v1"), &frame).await.unwrap();
        assert_eq!(r1.content_hash, r2.content_hash);
    }

    #[tokio::test]
    async fn missing_artifact_errors() {
        let store = InMemoryArtifactStore::new();
        let fake_ref = ArtifactRef {
            uri: "mem://nonexistent".into(),
            backend: "memory".into(),
            format: "json".into(),
            content_hash: "x".into(),
            tenant_id: "t".into(),
            request_id: "r".into(),
            schema_version: None,
            created_at: Utc::now(),
        };
        assert!(store.load(&fake_ref).await.is_err());
    }

    #[tokio::test]
    async fn local_store_writes_and_reads_via_path_template() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let frame = ResultFrame::ok(vec!["id".into()], vec![vec![serde_json::json!(7)]]);
        let reference = store.put("t1", "r1", "scan_a", Some("v1"), &frame).await.unwrap();
        assert!(reference.uri.contains("t1/r1/scan_a/v1/part-00000.json"));
        let loaded = store.load(&reference).await.unwrap();
        assert_eq!(loaded.rows[0][0], serde_json::json!(7));
    }
}
