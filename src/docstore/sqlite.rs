//! SQLite-backed document and KB store.
//!
//! Embeddings live next to their facts as little-endian f32 blobs; search
//! is brute-force cosine over one scope's documents, which keeps the store
//! a single file with no extension dependencies.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::store::{Document, DocumentStore, KbEntry, KbStore, ScoredDocument};
use crate::errors::CoreError;

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub async fn with_path(db_path: PathBuf) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(CoreError::persistence)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                scope_id TEXT NOT NULL,
                source_table TEXT NOT NULL,
                source_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                indexed_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (source_table, source_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::persistence)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_scope ON documents(scope_id)")
            .execute(&self.pool)
            .await
            .map_err(CoreError::persistence)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kb_entries (
                title TEXT PRIMARY KEY,
                content TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::persistence)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn upsert(&self, document: Document) -> Result<(), CoreError> {
        let blob = Self::serialize_embedding(&document.embedding);

        sqlx::query(
            "INSERT INTO documents (scope_id, source_table, source_id, content, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (source_table, source_id) DO UPDATE SET
                scope_id = excluded.scope_id,
                content = excluded.content,
                embedding = excluded.embedding,
                indexed_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(&document.scope_id)
        .bind(&document.source_table)
        .bind(&document.source_id)
        .bind(&document.content)
        .bind(&blob)
        .execute(&self.pool)
        .await
        .map_err(CoreError::persistence)?;

        Ok(())
    }

    async fn search(
        &self,
        scope_id: &str,
        query_embedding: &[f32],
        match_threshold: f32,
        match_count: usize,
    ) -> Result<Vec<ScoredDocument>, CoreError> {
        let rows = sqlx::query(
            "SELECT rowid, source_table, source_id, content, embedding
             FROM documents
             WHERE scope_id = ?1",
        )
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::persistence)?;

        let mut scored: Vec<(i64, ScoredDocument)> = rows
            .iter()
            .map(|row| {
                let rowid: i64 = row.get("rowid");
                let embedding_bytes: Vec<u8> = row.get("embedding");
                let stored = Self::deserialize_embedding(&embedding_bytes);
                let similarity = Self::cosine_similarity(query_embedding, &stored);

                (
                    rowid,
                    ScoredDocument {
                        source_table: row.get("source_table"),
                        source_id: row.get("source_id"),
                        content: row.get("content"),
                        similarity,
                    },
                )
            })
            .filter(|(_, doc)| match_threshold <= 0.0 || doc.similarity >= match_threshold)
            .collect();

        // Descending similarity; rowid (insertion order) is the stable
        // tie-break for equal scores.
        scored.sort_by(|(rowid_a, a), (rowid_b, b)| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(rowid_a.cmp(rowid_b))
        });
        scored.truncate(match_count);

        Ok(scored.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn count(&self, scope_id: Option<&str>) -> Result<usize, CoreError> {
        let count: i64 = if let Some(scope_id) = scope_id {
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE scope_id = ?1")
                .bind(scope_id)
                .fetch_one(&self.pool)
                .await
                .map_err(CoreError::persistence)?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM documents")
                .fetch_one(&self.pool)
                .await
                .map_err(CoreError::persistence)?
        };

        Ok(count as usize)
    }
}

#[async_trait]
impl KbStore for SqliteDocumentStore {
    async fn entries(&self) -> Result<Vec<KbEntry>, CoreError> {
        let rows = sqlx::query("SELECT title, content FROM kb_entries ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::persistence)?;

        Ok(rows
            .iter()
            .map(|row| KbEntry {
                title: row.get("title"),
                content: row.get("content"),
            })
            .collect())
    }

    async fn upsert_entry(&self, entry: KbEntry) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO kb_entries (title, content) VALUES (?1, ?2)
             ON CONFLICT (title) DO UPDATE SET content = excluded.content",
        )
        .bind(&entry.title)
        .bind(&entry.content)
        .execute(&self.pool)
        .await
        .map_err(CoreError::persistence)?;

        Ok(())
    }
}
