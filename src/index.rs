//! Offline indexing: ledger rows → facts → embeddings → documents.
//!
//! Tables are processed in a fixed order and rows in store order, so run
//! logs are deterministic and diagnosable. Any row failure aborts the whole
//! run; re-running after a fix converges because every write is an upsert.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt, TryStreamExt};

use crate::docstore::{Document, DocumentStore};
use crate::embed::Embedder;
use crate::errors::CoreError;
use crate::facts::FactSerializer;
use crate::records::{RecordReader, SourceRow};

/// Ledger tables indexed, in order.
pub const SOURCE_TABLES: [&str; 6] = [
    "accounts",
    "categories",
    "account_balances",
    "monthly_category_totals",
    "invoices",
    "kb_entries",
];

/// Sequential keeps embedding throughput bounded and logs strictly ordered;
/// Bounded(n) overlaps up to n embedding calls within one table while
/// preserving cross-table order. Both converge to identical stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStrategy {
    Sequential,
    Bounded(usize),
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub tables: Vec<(String, usize)>,
    pub documents: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct Indexer {
    records: Arc<dyn RecordReader>,
    serializer: FactSerializer,
    embedder: Arc<Embedder>,
    store: Arc<dyn DocumentStore>,
    tables: Vec<String>,
    strategy: IndexStrategy,
}

impl Indexer {
    pub fn new(
        records: Arc<dyn RecordReader>,
        embedder: Arc<Embedder>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            serializer: FactSerializer::new(records.clone()),
            records,
            embedder,
            store,
            tables: SOURCE_TABLES.iter().map(|t| t.to_string()).collect(),
            strategy: IndexStrategy::Sequential,
        }
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_strategy(mut self, strategy: IndexStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Index every row of every configured table for one scope.
    pub async fn run(&self, scope_id: &str) -> Result<IndexReport, CoreError> {
        let started_at = Utc::now();
        let mut report = IndexReport {
            tables: Vec::with_capacity(self.tables.len()),
            documents: 0,
            started_at,
            finished_at: started_at,
        };

        for table in &self.tables {
            let rows = self.records.fetch_all(table).await?;
            let row_count = rows.len();
            tracing::info!(table = %table, rows = row_count, "indexing table");

            let documents = match self.strategy {
                IndexStrategy::Sequential => {
                    let mut documents = Vec::with_capacity(row_count);
                    for row in &rows {
                        documents.push(self.build_document(scope_id, row).await?);
                    }
                    documents
                }
                IndexStrategy::Bounded(workers) => {
                    stream::iter(rows.iter())
                        .map(|row| self.build_document(scope_id, row))
                        .buffered(workers.max(1))
                        .try_collect()
                        .await?
                }
            };

            for document in documents {
                self.store.upsert(document).await?;
            }

            report.tables.push((table.clone(), row_count));
            report.documents += row_count;
        }

        report.finished_at = Utc::now();
        tracing::info!(
            documents = report.documents,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "index run complete"
        );
        Ok(report)
    }

    async fn build_document(
        &self,
        scope_id: &str,
        row: &SourceRow,
    ) -> Result<Document, CoreError> {
        let content = self.serializer.serialize(row).await?;
        let embedding = self
            .embedder
            .embed(&content)
            .await
            .map_err(|err| err.annotate(&format!("table={} row={}", row.table, row.id)))?;

        Ok(Document {
            scope_id: scope_id.to_string(),
            source_table: row.table.clone(),
            source_id: row.id.clone(),
            content,
            embedding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbedConfig;
    use crate::docstore::SqliteDocumentStore;
    use crate::llm::{ChatRequest, LlmProvider};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeLedger {
        tables: Mutex<HashMap<String, Vec<SourceRow>>>,
    }

    impl FakeLedger {
        fn new() -> Self {
            Self {
                tables: Mutex::new(HashMap::new()),
            }
        }

        fn insert(&self, table: &str, id: &str, fields: Vec<(&str, serde_json::Value)>) {
            let row = SourceRow {
                table: table.to_string(),
                id: id.to_string(),
                fields: fields
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
            };
            self.tables
                .lock()
                .unwrap()
                .entry(table.to_string())
                .or_default()
                .push(row);
        }

        fn replace_field(&self, table: &str, id: &str, key: &str, value: serde_json::Value) {
            let mut tables = self.tables.lock().unwrap();
            let rows = tables.get_mut(table).unwrap();
            let row = rows.iter_mut().find(|row| row.id == id).unwrap();
            for (name, existing) in row.fields.iter_mut() {
                if name == key {
                    *existing = value.clone();
                }
            }
        }
    }

    #[async_trait]
    impl RecordReader for FakeLedger {
        async fn fetch_all(&self, table: &str) -> Result<Vec<SourceRow>, CoreError> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .get(table)
                .cloned()
                .unwrap_or_default())
        }

        async fn lookup_field(
            &self,
            table: &str,
            id: &str,
            column: &str,
        ) -> Result<Option<String>, CoreError> {
            let tables = self.tables.lock().unwrap();
            let Some(rows) = tables.get(table) else {
                return Ok(None);
            };
            Ok(rows
                .iter()
                .find(|row| row.id == id)
                .and_then(|row| row.get(column))
                .and_then(|value| value.as_str().map(|s| s.to_string())))
        }
    }

    /// Deterministic stand-in: a text always embeds to the same vector.
    struct HashEmbedProvider;

    #[async_trait]
    impl LlmProvider for HashEmbedProvider {
        fn name(&self) -> &str {
            "hash-embed"
        }

        async fn health_check(&self) -> Result<bool, CoreError> {
            Ok(true)
        }

        async fn chat(&self, _request: ChatRequest, _model: &str) -> Result<String, CoreError> {
            unimplemented!("not used by indexer tests")
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model: &str,
        ) -> Result<Vec<Vec<f32>>, CoreError> {
            Ok(inputs
                .iter()
                .map(|text| {
                    let sum: u32 = text.bytes().map(u32::from).sum();
                    vec![text.len() as f32, (sum % 997) as f32]
                })
                .collect())
        }
    }

    fn embedder() -> Arc<Embedder> {
        Arc::new(Embedder::new(
            Arc::new(HashEmbedProvider),
            "test-embed".to_string(),
            EmbedConfig::default(),
            Duration::from_secs(1),
        ))
    }

    async fn store() -> Arc<SqliteDocumentStore> {
        let tmp = std::env::temp_dir().join(format!(
            "ledgerlens-index-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        Arc::new(SqliteDocumentStore::with_path(tmp).await.unwrap())
    }

    fn seeded_ledger() -> Arc<FakeLedger> {
        let ledger = FakeLedger::new();
        ledger.insert(
            "categories",
            "cat-1",
            vec![("id", json!("cat-1")), ("name", json!("Payroll"))],
        );
        ledger.insert(
            "account_balances",
            "b1",
            vec![
                ("id", json!("b1")),
                ("name", json!("Main Checking")),
                ("type", json!("cash")),
                ("date", json!("2025-03-31")),
                ("balance", json!(15900)),
            ],
        );
        ledger.insert(
            "monthly_category_totals",
            "m1",
            vec![
                ("id", json!("m1")),
                ("category_id", json!("cat-1")),
                ("month", json!("2025-03")),
                ("total", json!(8200)),
            ],
        );
        Arc::new(ledger)
    }

    #[tokio::test]
    async fn reindexing_unchanged_rows_keeps_document_count() {
        let ledger = seeded_ledger();
        let store = store().await;
        let indexer = Indexer::new(ledger, embedder(), store.clone());

        let first = indexer.run("u1").await.unwrap();
        assert_eq!(first.documents, 3);
        assert_eq!(store.count(None).await.unwrap(), 3);

        let second = indexer.run("u1").await.unwrap();
        assert_eq!(second.documents, 3);
        assert_eq!(store.count(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn changed_row_updates_document_in_place() {
        let ledger = seeded_ledger();
        let store = store().await;
        let indexer = Indexer::new(ledger.clone(), embedder(), store.clone());

        indexer.run("u1").await.unwrap();
        ledger.replace_field("account_balances", "b1", "balance", json!(200));
        indexer.run("u1").await.unwrap();

        assert_eq!(store.count(None).await.unwrap(), 3);
        let hits = store.search("u1", &[1.0, 0.0], 0.0, 10).await.unwrap();
        let balance = hits
            .iter()
            .find(|hit| hit.source_id == "b1")
            .expect("balance document present");
        assert!(balance.content.contains("cash_balance=200"));
    }

    #[tokio::test]
    async fn broken_reference_aborts_the_run() {
        let ledger = seeded_ledger();
        ledger.insert(
            "monthly_category_totals",
            "m2",
            vec![
                ("id", json!("m2")),
                ("category_id", json!("cat-missing")),
                ("month", json!("2025-04")),
                ("total", json!(50)),
            ],
        );
        let store = store().await;
        let indexer = Indexer::new(ledger, embedder(), store);

        let err = indexer.run("u1").await.unwrap_err();
        assert!(matches!(err, CoreError::DataIntegrity { .. }));
    }

    #[tokio::test]
    async fn bounded_strategy_converges_to_sequential_state() {
        let ledger = seeded_ledger();

        let sequential_store = store().await;
        Indexer::new(ledger.clone(), embedder(), sequential_store.clone())
            .run("u1")
            .await
            .unwrap();

        let bounded_store = store().await;
        Indexer::new(ledger, embedder(), bounded_store.clone())
            .with_strategy(IndexStrategy::Bounded(4))
            .run("u1")
            .await
            .unwrap();

        let seq = sequential_store.search("u1", &[1.0, 0.0], 0.0, 10).await.unwrap();
        let par = bounded_store.search("u1", &[1.0, 0.0], 0.0, 10).await.unwrap();
        let seq_contents: Vec<&str> = seq.iter().map(|d| d.content.as_str()).collect();
        let par_contents: Vec<&str> = par.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(seq_contents, par_contents);
    }
}
