//! Application wiring.
//!
//! Every component takes its collaborators through its constructor; this is
//! the one place that builds the object graph. No module-level singletons.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, AppPaths};
use crate::context::ContextAssembler;
use crate::docstore::SqliteDocumentStore;
use crate::embed::Embedder;
use crate::errors::CoreError;
use crate::history::SqliteHistory;
use crate::index::Indexer;
use crate::llm::OpenAiProvider;
use crate::qa::QaService;
use crate::records::SqliteRecords;
use crate::retrieve::Retriever;

pub struct AppState {
    pub config: AppConfig,
    pub paths: AppPaths,
    pub indexer: Indexer,
    pub qa: QaService,
}

impl AppState {
    pub async fn initialize(paths: AppPaths) -> Result<Self, CoreError> {
        let config = AppConfig::load(&paths)?;
        let request_timeout = Duration::from_secs(config.llm.request_timeout_secs);

        let provider = Arc::new(OpenAiProvider::new(
            config.llm.base_url.clone(),
            AppConfig::api_key(),
            request_timeout,
        )?);

        let records = Arc::new(SqliteRecords::open(paths.ledger_db_path.clone()).await?);
        let store = Arc::new(SqliteDocumentStore::with_path(paths.store_db_path.clone()).await?);
        let history = Arc::new(
            SqliteHistory::with_path(paths.store_db_path.clone(), config.history.max_turns)
                .await?,
        );

        let embedder = Arc::new(Embedder::new(
            provider.clone(),
            config.llm.embedding_model.clone(),
            config.embedding.clone(),
            request_timeout,
        ));

        let indexer = Indexer::new(records, embedder.clone(), store.clone());

        let retriever = Retriever::new(embedder, store.clone(), config.retrieval.clone());
        let assembler = ContextAssembler::new(retriever, store);
        let qa = QaService::new(
            history,
            assembler,
            provider,
            config.llm.chat_model.clone(),
            config.llm.max_answer_tokens,
            config.retrieval.match_count,
            request_timeout,
        );

        Ok(Self {
            config,
            paths,
            indexer,
            qa,
        })
    }
}
