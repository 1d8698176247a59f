//! SurrealDB record shapes for the persistent schema-snapshot and artifact tables.
//!
//! Tables:
//! - `schema_snapshots`: one row per `(ds_id, version)`, payload = canonical
//!   contract + metadata JSON.
//! - `artifacts`: one row per persisted `ArtifactRef`.

use chrono::{DateTime, Utc};
use nl2sql_core::domain::{ArtifactRef, SchemaContract, SchemaMetadata};
use serde::{Deserialize, Serialize};

/// Serializes chrono `DateTime<Utc>` as SurrealDB's native datetime type.
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// A row in `schema_snapshots`: keyed by `(ds_id, version)`, unique on that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshotRecord {
    pub ds_id: String,
    pub version: String,
    pub fingerprint: String,
    pub contract: SchemaContract,
    pub metadata: SchemaMetadata,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

/// A row in `artifacts`: one per persisted [`ArtifactRef`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub node_id: String,
    pub tenant_id: String,
    pub request_id: String,
    #[serde(rename = "ref")]
    pub artifact_ref: ArtifactRef,
    /// Row-dicts form of the persisted frame, so `load` can reconstitute it
    /// without a real columnar-format reader.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}
