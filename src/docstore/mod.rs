//! Persisted document and knowledge-base storage.
//!
//! A `Document` is one indexed fact with its embedding and provenance,
//! unique per `(source_table, source_id)`. The KB holds glossary formulas
//! that are always fed to the model regardless of query relevance.

mod sqlite;
mod store;

pub use sqlite::SqliteDocumentStore;
pub use store::{Document, DocumentStore, KbEntry, KbStore, ScoredDocument};
