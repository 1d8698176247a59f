//! Vector index over schema chunks: refresh, RBAC-filtered retrieval, and
//! maximum-marginal-relevance ranking.
//!
//! The in-memory implementation embeds chunk text as a bag-of-words vector.
//! It exists to give the pipeline a deterministic, dependency-free backend
//! for tests and small deployments; a real backend would swap the embedding
//! and similarity search for an ANN index without touching this trait.

use crate::domain::Chunk;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Pre-filter applied before any ranking: retrieval never sees chunks
/// outside the caller's resolved datasource set.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilter {
    pub allowed_ds_ids: BTreeSet<String>,
}

impl RetrievalFilter {
    pub fn new(allowed_ds_ids: impl IntoIterator<Item = String>) -> Self {
        Self { allowed_ds_ids: allowed_ds_ids.into_iter().collect() }
    }

    fn admits(&self, ds_id: &str) -> bool {
        self.allowed_ds_ids.contains(ds_id)
    }
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Full-replace of `ds_id`'s chunks under the schema version they carry.
    async fn refresh(&self, ds_id: &str, chunks: Vec<Chunk>) -> Result<()>;

    async fn retrieve_datasource_candidates(&self, query: &str, k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>>;

    /// Table/metric chunks (`Chunk::Table`) relevant to `query`.
    async fn retrieve_schema_context(&self, query: &str, k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>>;

    /// Column chunks (`Chunk::Column`) relevant to `query`.
    async fn retrieve_column_candidates(&self, query: &str, k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>>;

    /// Column and relationship chunks scoped to `tables`, for final plan context.
    async fn retrieve_planning_context(&self, query: &str, tables: &[String], k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>>;
}

/// Sparse bag-of-words embedding: token -> count, normalized by L2 norm at
/// comparison time so cosine similarity is a plain dot product over norms.
#[derive(Debug, Clone, Default)]
struct Embedding(BTreeMap<String, f64>);

impl Embedding {
    fn of(text: &str) -> Self {
        let mut counts: BTreeMap<String, f64> = BTreeMap::new();
        for token in text.to_lowercase().split_whitespace() {
            let token: String = token.chars().filter(|c| c.is_alphanumeric()).collect();
            if token.is_empty() {
                continue;
            }
            *counts.entry(token).or_insert(0.0) += 1.0;
        }
        Self(counts)
    }

    fn norm(&self) -> f64 {
        self.0.values().map(|v| v * v).sum::<f64>().sqrt()
    }

    fn cosine(&self, other: &Embedding) -> f64 {
        let (na, nb) = (self.norm(), other.norm());
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        let dot: f64 = self.0.iter().filter_map(|(k, v)| other.0.get(k).map(|ov| v * ov)).sum();
        dot / (na * nb)
    }
}

const LAMBDA_MULT: f64 = 0.7;

/// Select `k` of `candidates` by maximum-marginal-relevance: greedily pick
/// the candidate maximizing `lambda * sim(query, d) - (1 - lambda) * max
/// sim(d, already_selected)`, balancing relevance against diversity.
fn mmr_select(query_emb: &Embedding, candidates: Vec<(Chunk, Embedding)>, k: usize) -> Vec<ScoredChunk> {
    let mut pool: Vec<(Chunk, Embedding, f64)> = candidates
        .into_iter()
        .map(|(chunk, emb)| {
            let relevance = query_emb.cosine(&emb);
            (chunk, emb, relevance)
        })
        .collect();

    let mut selected: Vec<ScoredChunk> = Vec::new();
    let mut selected_embs: Vec<Embedding> = Vec::new();

    while selected.len() < k && !pool.is_empty() {
        let mut best_idx = 0usize;
        let mut best_score = f64::MIN;
        for (idx, (_, emb, relevance)) in pool.iter().enumerate() {
            let diversity_penalty = selected_embs.iter().map(|s| emb.cosine(s)).fold(0.0_f64, f64::max);
            let mmr_score = LAMBDA_MULT * relevance - (1.0 - LAMBDA_MULT) * diversity_penalty;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx = idx;
            }
        }
        let (chunk, emb, relevance) = pool.remove(best_idx);
        selected_embs.push(emb);
        selected.push(ScoredChunk { chunk, score: relevance });
    }

    selected
}

/// In-memory vector index: keeps all chunks per datasource and ranks by
/// cosine-similarity MMR. `fetch_k = 4*k` candidates enter the MMR pass.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    by_ds: Mutex<BTreeMap<String, Vec<(Chunk, Embedding)>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn rank<F>(&self, query: &str, k: usize, filter: &RetrievalFilter, keep: F) -> Vec<ScoredChunk>
    where
        F: Fn(&Chunk) -> bool,
    {
        let guard = self.by_ds.lock().unwrap();
        let fetch_k = k.saturating_mul(4).max(k);
        let query_emb = Embedding::of(query);

        let mut candidates: Vec<(Chunk, Embedding, f64)> = guard
            .iter()
            .filter(|(ds_id, _)| filter.admits(ds_id))
            .flat_map(|(_, chunks)| chunks.iter())
            .filter(|(chunk, _)| keep(chunk))
            .map(|(chunk, emb)| {
                let relevance = query_emb.cosine(emb);
                (chunk.clone(), emb.clone(), relevance)
            })
            .collect();

        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(fetch_k);

        let pool: Vec<(Chunk, Embedding)> = candidates.into_iter().map(|(c, e, _)| (c, e)).collect();
        mmr_select(&query_emb, pool, k)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn refresh(&self, ds_id: &str, chunks: Vec<Chunk>) -> Result<()> {
        let embedded: Vec<(Chunk, Embedding)> = chunks.into_iter().map(|c| {
            let emb = Embedding::of(&c.embed_text());
            (c, emb)
        }).collect();
        self.by_ds.lock().unwrap().insert(ds_id.to_string(), embedded);
        Ok(())
    }

    async fn retrieve_datasource_candidates(&self, query: &str, k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>> {
        Ok(self.rank(query, k, filter, |c| matches!(c, Chunk::Datasource { .. })))
    }

    async fn retrieve_schema_context(&self, query: &str, k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>> {
        Ok(self.rank(query, k, filter, |c| matches!(c, Chunk::Table { .. })))
    }

    async fn retrieve_column_candidates(&self, query: &str, k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>> {
        Ok(self.rank(query, k, filter, |c| matches!(c, Chunk::Column { .. })))
    }

    async fn retrieve_planning_context(&self, query: &str, tables: &[String], k: usize, filter: &RetrievalFilter) -> Result<Vec<ScoredChunk>> {
        let table_set: BTreeSet<&str> = tables.iter().map(|s| s.as_str()).collect();
        Ok(self.rank(query, k, filter, |c| match c {
            Chunk::Column { table, .. } => table_set.contains(table.as_str()),
            Chunk::Relationship { from_table, to_table, .. } => {
                table_set.contains(from_table.as_str()) || table_set.contains(to_table.as_str())
            }
            _ => false,
        }))
    }
}
