use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// The persisted unit: one fact, its embedding, and where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Tenant/user partition key.
    pub scope_id: String,
    pub source_table: String,
    pub source_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// One similarity-search hit, highest similarity first in result lists.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub source_table: String,
    pub source_id: String,
    pub content: String,
    pub similarity: f32,
}

/// A glossary formula; `title` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbEntry {
    pub title: String,
    pub content: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or overwrite the document keyed by `(source_table,
    /// source_id)`. Exactly one document exists per key afterwards.
    async fn upsert(&self, document: Document) -> Result<(), CoreError>;

    /// Similarity search over one scope's documents. A threshold of 0
    /// disables filtering; results come back in descending similarity,
    /// ties broken by insertion order, at most `match_count` of them.
    async fn search(
        &self,
        scope_id: &str,
        query_embedding: &[f32],
        match_threshold: f32,
        match_count: usize,
    ) -> Result<Vec<ScoredDocument>, CoreError>;

    async fn count(&self, scope_id: Option<&str>) -> Result<usize, CoreError>;
}

#[async_trait]
pub trait KbStore: Send + Sync {
    /// Every glossary entry, in insertion order.
    async fn entries(&self) -> Result<Vec<KbEntry>, CoreError>;

    /// Insert or overwrite by title.
    async fn upsert_entry(&self, entry: KbEntry) -> Result<(), CoreError>;
}
