//! Typed, vectorizable chunks derived from a schema snapshot.

use crate::domain::schema::SchemaSnapshot;
use crate::error::Result;
use crate::ids::stable_id_prefixed;
use serde::{Deserialize, Serialize};

/// Discriminated union of chunk kinds embedded into the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chunk {
    Datasource {
        ds_id: String,
        schema_version: String,
        description: String,
        sample_questions: Vec<String>,
    },
    Table {
        ds_id: String,
        schema_version: String,
        table: String,
        pk: Vec<String>,
        columns: Vec<String>,
        fk_summaries: Vec<String>,
        row_count: Option<u64>,
    },
    Column {
        ds_id: String,
        schema_version: String,
        table: String,
        column: String,
        data_type: String,
        synonyms: Vec<String>,
        pii: bool,
    },
    Relationship {
        ds_id: String,
        schema_version: String,
        from_table: String,
        to_table: String,
        join_cols: Vec<(String, String)>,
        cardinality: String,
    },
}

impl Chunk {
    pub fn ds_id(&self) -> &str {
        match self {
            Chunk::Datasource { ds_id, .. }
            | Chunk::Table { ds_id, .. }
            | Chunk::Column { ds_id, .. }
            | Chunk::Relationship { ds_id, .. } => ds_id,
        }
    }

    pub fn schema_version(&self) -> &str {
        match self {
            Chunk::Datasource { schema_version, .. }
            | Chunk::Table { schema_version, .. }
            | Chunk::Column { schema_version, .. }
            | Chunk::Relationship { schema_version, .. } => schema_version,
        }
    }

    /// Deterministic chunk ID: the schema version is always folded in so
    /// re-indexing after a schema change never collides with stale chunks.
    pub fn id(&self) -> Result<String> {
        Ok(stable_id_prefixed("chunk", self)?)
    }

    /// Flattened text used as the embedding input for this chunk.
    pub fn embed_text(&self) -> String {
        match self {
            Chunk::Datasource { description, sample_questions, .. } => {
                format!("{description} {}", sample_questions.join(" "))
            }
            Chunk::Table { table, columns, .. } => format!("{table} {}", columns.join(" ")),
            Chunk::Column { table, column, synonyms, .. } => {
                format!("{table}.{column} {}", synonyms.join(" "))
            }
            Chunk::Relationship { from_table, to_table, .. } => {
                format!("{from_table} -> {to_table}")
            }
        }
    }
}

/// Build the four chunk kinds for one datasource from its authoritative
/// snapshot: one `Datasource` chunk, one `Table` chunk and N `Column` chunks
/// per table (columns sorted by name since the contract already stores them
/// in a `BTreeMap`), and one `Relationship` chunk per foreign key. Every
/// chunk carries `ds_id` and `snapshot.version` so a later `refresh` under a
/// new schema version never collides with the chunks it replaces.
pub fn build_chunks(ds_id: &str, snapshot: &SchemaSnapshot, description: &str, sample_questions: Vec<String>) -> Vec<Chunk> {
    let schema_version = snapshot.version.as_str().to_string();
    let mut chunks = vec![Chunk::Datasource {
        ds_id: ds_id.to_string(),
        schema_version: schema_version.clone(),
        description: description.to_string(),
        sample_questions,
    }];

    for (table_name, table) in &snapshot.contract.tables {
        let column_names: Vec<String> = table.columns.keys().cloned().collect();
        let fk_summaries: Vec<String> = table
            .foreign_keys
            .iter()
            .map(|fk| format!("{}.{} -> {}.{}", table_name, fk.column, fk.references_table, fk.references_column))
            .collect();
        let row_count = snapshot
            .metadata
            .columns
            .get(&format!("{table_name}.{}", table.primary_key.first().cloned().unwrap_or_default()))
            .and_then(|m| m.row_count);

        chunks.push(Chunk::Table {
            ds_id: ds_id.to_string(),
            schema_version: schema_version.clone(),
            table: table_name.clone(),
            pk: table.primary_key.clone(),
            columns: column_names,
            fk_summaries,
            row_count,
        });

        for (column_name, column) in &table.columns {
            let meta_key = format!("{table_name}.{column_name}");
            let meta = snapshot.metadata.columns.get(&meta_key);
            chunks.push(Chunk::Column {
                ds_id: ds_id.to_string(),
                schema_version: schema_version.clone(),
                table: table_name.clone(),
                column: column_name.clone(),
                data_type: column.data_type.clone(),
                synonyms: meta.map(|m| m.synonyms.clone()).unwrap_or_default(),
                pii: meta.map(|m| m.pii).unwrap_or(false),
            });
        }

        for fk in &table.foreign_keys {
            chunks.push(Chunk::Relationship {
                ds_id: ds_id.to_string(),
                schema_version: schema_version.clone(),
                from_table: table_name.clone(),
                to_table: fk.references_table.clone(),
                join_cols: vec![(fk.column.clone(), fk.references_column.clone())],
                cardinality: "many_to_one".to_string(),
            });
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{ColumnContract, ForeignKey, SchemaContract, SchemaMetadata, SchemaVersion, TableContract};
    use std::collections::BTreeMap;

    fn sample_snapshot() -> SchemaSnapshot {
        let mut machines_cols = BTreeMap::new();
        machines_cols.insert("id".to_string(), ColumnContract { data_type: "int".into(), nullable: false });
        machines_cols.insert("status".to_string(), ColumnContract { data_type: "text".into(), nullable: false });

        let mut orders_cols = BTreeMap::new();
        orders_cols.insert("id".to_string(), ColumnContract { data_type: "int".into(), nullable: false });
        orders_cols.insert("machine_id".to_string(), ColumnContract { data_type: "int".into(), nullable: false });

        let mut tables = BTreeMap::new();
        tables.insert(
            "machines".to_string(),
            TableContract { columns: machines_cols, primary_key: vec!["id".into()], foreign_keys: vec![] },
        );
        tables.insert(
            "orders".to_string(),
            TableContract {
                columns: orders_cols,
                primary_key: vec!["id".into()],
                foreign_keys: vec![ForeignKey {
                    column: "machine_id".into(),
                    references_table: "machines".into(),
                    references_column: "id".into(),
                }],
            },
        );

        SchemaSnapshot {
            ds_id: "ops".into(),
            version: SchemaVersion::new("20260101000000", "deadbeefcafef00d"),
            fingerprint: "deadbeefcafef00d".into(),
            contract: SchemaContract { tables },
            metadata: SchemaMetadata::default(),
        }
    }

    #[test]
    fn builds_one_datasource_chunk_and_per_table_chunks() {
        let snapshot = sample_snapshot();
        let chunks = build_chunks("ops", &snapshot, "operations data", vec!["how many machines?".into()]);

        let ds_count = chunks.iter().filter(|c| matches!(c, Chunk::Datasource { .. })).count();
        assert_eq!(ds_count, 1);

        let table_count = chunks.iter().filter(|c| matches!(c, Chunk::Table { .. })).count();
        assert_eq!(table_count, 2);

        let relationship_count = chunks.iter().filter(|c| matches!(c, Chunk::Relationship { .. })).count();
        assert_eq!(relationship_count, 1);
    }

    #[test]
    fn table_chunk_columns_are_sorted_by_name() {
        let snapshot = sample_snapshot();
        let chunks = build_chunks("ops", &snapshot, "d", vec![]);
        let machines = chunks
            .iter()
            .find_map(|c| match c {
                Chunk::Table { table, columns, .. } if table == "machines" => Some(columns.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(machines, vec!["id".to_string(), "status".to_string()]);
    }

    #[test]
    fn every_chunk_carries_the_snapshot_schema_version() {
        let snapshot = sample_snapshot();
        let chunks = build_chunks("ops", &snapshot, "d", vec![]);
        for chunk in &chunks {
            assert_eq!(chunk.schema_version(), snapshot.version.as_str());
            assert_eq!(chunk.ds_id(), "ops");
        }
    }

    #[test]
    fn chunk_id_embeds_schema_version() {
        let a = Chunk::Table {
            ds_id: "ops".into(),
            schema_version: "v1".into(),
            table: "machines".into(),
            pk: vec!["id".into()],
            columns: vec!["id".into(), "name".into()],
            fk_summaries: vec![],
            row_count: None,
        };
        let mut b = a.clone();
        if let Chunk::Table { schema_version, .. } = &mut b {
            *schema_version = "v2".into();
        }
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn chunk_id_is_deterministic() {
        let c = Chunk::Column {
            ds_id: "ops".into(),
            schema_version: "v1".into(),
            table: "machines".into(),
            column: "name".into(),
            data_type: "text".into(),
            synonyms: vec![],
            pii: false,
        };
        assert_eq!(c.id().unwrap(), c.id().unwrap());
    }
}
