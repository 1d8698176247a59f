//! Schema contracts, metadata, and fingerprinted/versioned snapshots.

use crate::error::Result;
use crate::ids::compute_digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single column's declared type information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnContract {
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
}

/// One table's shape: columns (ordered by name for canonicalization), PK, FKs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContract {
    pub columns: BTreeMap<String, ColumnContract>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Canonical structure for a datasource's schema: an ordered map of table
/// name to shape. Canonicalization sorts tables, columns, and FK lists by
/// name; `BTreeMap`/sorted `Vec` give us that for free on serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SchemaContract {
    pub tables: BTreeMap<String, TableContract>,
}

impl SchemaContract {
    /// Canonicalize: sort FK lists within each table by `(column, references_table)`.
    pub fn canonicalize(mut self) -> Self {
        for table in self.tables.values_mut() {
            table.foreign_keys.sort();
        }
        self
    }

    /// SHA-256 over the canonical JSON of this contract.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = self.clone().canonicalize();
        let value = serde_json::to_value(&canonical)?;
        Ok(compute_digest(&value)?)
    }
}

/// Column-level statistics and descriptive metadata, kept apart from the
/// structural contract so re-describing a table never changes its fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColumnMetadata {
    pub row_count: Option<u64>,
    pub null_fraction: Option<f64>,
    pub min: Option<serde_json::Value>,
    pub max: Option<serde_json::Value>,
    pub top_k: Vec<serde_json::Value>,
    pub description: Option<String>,
    pub synonyms: Vec<String>,
    pub pii: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaMetadata {
    /// Keyed by `table.column`.
    pub columns: BTreeMap<String, ColumnMetadata>,
    pub table_descriptions: BTreeMap<String, String>,
}

/// A version identifier: `YYYYMMDDhhmmss_<fingerprint[:8]>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion(pub String);

impl SchemaVersion {
    pub fn new(timestamp: &str, fingerprint: &str) -> Self {
        Self(format!("{timestamp}_{}", &fingerprint[..8.min(fingerprint.len())]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A versioned, fingerprinted pair of contract and metadata: the
/// authoritative source of truth validators and generators consult.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub ds_id: String,
    pub version: SchemaVersion,
    pub fingerprint: String,
    pub contract: SchemaContract,
    pub metadata: SchemaMetadata,
}
