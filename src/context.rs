//! Context assembly.
//!
//! One bounded text block with two always-present sections: the full KB
//! glossary (never relevance-filtered) and the retrieved facts, verbatim,
//! joined by an explicit separator so an answer can cite individual rows.
//! Assembly is all-or-nothing: if either source fails, no block is built.

use std::sync::Arc;

use crate::docstore::KbStore;
use crate::errors::CoreError;
use crate::retrieve::Retriever;

const RECORD_SEPARATOR: &str = "\n---\n";

pub struct ContextAssembler {
    retriever: Retriever,
    kb: Arc<dyn KbStore>,
}

impl ContextAssembler {
    pub fn new(retriever: Retriever, kb: Arc<dyn KbStore>) -> Self {
        Self { retriever, kb }
    }

    pub async fn assemble(
        &self,
        scope_id: &str,
        query: &str,
        match_count: usize,
    ) -> Result<String, CoreError> {
        let entries = self.kb.entries().await?;
        let hits = self.retriever.retrieve(scope_id, query, match_count).await?;

        let mut block = String::new();

        block.push_str("Financial formulas and definitions:\n");
        if entries.is_empty() {
            block.push_str("(none)\n");
        } else {
            for entry in &entries {
                block.push_str(&format!("{}: {}\n", entry.title, entry.content));
            }
        }

        block.push_str("\nRelevant records:\n");
        if hits.is_empty() {
            block.push_str("(none)");
        } else {
            let facts: Vec<&str> = hits.iter().map(|hit| hit.content.as_str()).collect();
            block.push_str(&facts.join(RECORD_SEPARATOR));
        }

        Ok(block)
    }
}
