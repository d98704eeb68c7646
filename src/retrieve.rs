//! Similarity-scoped retrieval.
//!
//! Embeds the query once and asks the document store for the closest facts
//! belonging to one scope. The default threshold is zero on purpose: for
//! financial questions, omitting a relevant row costs more than including a
//! mildly noisy one, and the policy layer downstream self-filters.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::docstore::{DocumentStore, ScoredDocument};
use crate::embed::Embedder;
use crate::errors::CoreError;

pub struct Retriever {
    embedder: Arc<Embedder>,
    store: Arc<dyn DocumentStore>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        embedder: Arc<Embedder>,
        store: Arc<dyn DocumentStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    /// Top matches for a query within one scope, best first.
    pub async fn retrieve(
        &self,
        scope_id: &str,
        query: &str,
        match_count: usize,
    ) -> Result<Vec<ScoredDocument>, CoreError> {
        let query_embedding = self.embedder.embed(query).await?;

        let hits = self
            .store
            .search(
                scope_id,
                &query_embedding,
                self.config.match_threshold,
                match_count,
            )
            .await?;

        tracing::debug!(scope_id, hits = hits.len(), "retrieval complete");
        Ok(hits)
    }
}
