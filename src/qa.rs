//! Question answering.
//!
//! Composes history, context assembly, and the language model into one
//! question → answer operation. The system policy is the enforcement point:
//! factual answers may only come from the supplied context, and a fixed
//! refusal is the required reply when the context cannot support one.

use std::sync::Arc;
use std::time::Duration;

use crate::context::ContextAssembler;
use crate::errors::CoreError;
use crate::history::{ChatTurn, ConversationLog, TurnRole};
use crate::llm::{ChatMessage, ChatRequest, LlmProvider};

/// The exact reply required when the context cannot answer the question.
pub const REFUSAL_ANSWER: &str = "I don't have that information in the provided records.";

fn system_policy() -> String {
    format!(
        "You are a financial records assistant.\n\
Answer questions using ONLY the context provided in this conversation.\n\
Never invent, estimate, or recall figures from anywhere else.\n\
If the context does not contain the information needed, reply with exactly:\n\
{REFUSAL_ANSWER}\n\
You may explain or restate your own earlier answers from this conversation \
even if the reasoning behind them is not in the current context."
    )
}

#[derive(Debug, Clone)]
pub struct QaOutcome {
    pub answer: String,
    /// Set when the answer was produced but could not be recorded, so the
    /// next turn will not remember this exchange.
    pub history_warning: Option<String>,
}

pub struct QaService {
    log: Arc<dyn ConversationLog>,
    assembler: ContextAssembler,
    llm: Arc<dyn LlmProvider>,
    chat_model: String,
    max_answer_tokens: i32,
    match_count: usize,
    call_timeout: Duration,
}

impl QaService {
    pub fn new(
        log: Arc<dyn ConversationLog>,
        assembler: ContextAssembler,
        llm: Arc<dyn LlmProvider>,
        chat_model: String,
        max_answer_tokens: i32,
        match_count: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            log,
            assembler,
            llm,
            chat_model,
            max_answer_tokens,
            match_count,
            call_timeout,
        }
    }

    /// Answer one question for one scope.
    ///
    /// On upstream failure nothing is persisted. On a history save failure
    /// the produced answer is still returned, with the continuity gap
    /// surfaced in `history_warning`.
    pub async fn ask(&self, scope_id: &str, question: &str) -> Result<QaOutcome, CoreError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CoreError::Validation("question must not be empty".to_string()));
        }

        let mut history = self.log.load(scope_id).await;
        let context = self
            .assembler
            .assemble(scope_id, question, self.match_count)
            .await?;

        let mut messages: Vec<ChatMessage> = history
            .iter()
            .map(|turn| match turn.role {
                TurnRole::User => ChatMessage::user(turn.content.clone()),
                TurnRole::Assistant => ChatMessage::assistant(turn.content.clone()),
            })
            .collect();
        messages.push(ChatMessage::system(system_policy()));
        messages.push(ChatMessage::user(format!("Context:\n{context}")));
        messages.push(ChatMessage::user(question.to_string()));

        let request = ChatRequest::deterministic(messages, self.max_answer_tokens);
        let answer = match tokio::time::timeout(
            self.call_timeout,
            self.llm.chat(request, &self.chat_model),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(CoreError::Upstream {
                    service: "chat",
                    detail: format!("deadline of {:?} exceeded", self.call_timeout),
                })
            }
        };

        history.push(ChatTurn::user(question));
        history.push(ChatTurn::assistant(answer.clone()));

        let history_warning = match self.log.save(scope_id, history).await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(scope_id, "history save failed after answering: {err}");
                Some(format!(
                    "answer produced, but this exchange could not be saved: {err}"
                ))
            }
        };

        Ok(QaOutcome {
            answer,
            history_warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbedConfig, RetrievalConfig};
    use crate::docstore::{Document, DocumentStore, KbEntry, KbStore, SqliteDocumentStore};
    use crate::embed::Embedder;
    use crate::retrieve::Retriever;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted provider: unit embeddings, canned or failing chat replies,
    /// and a transcript of every chat request it saw.
    struct ScriptedProvider {
        reply: Result<String, &'static str>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn answering(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(detail: &'static str) -> Self {
            Self {
                reply: Err(detail),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<bool, CoreError> {
            Ok(true)
        }

        async fn chat(&self, request: ChatRequest, _model: &str) -> Result<String, CoreError> {
            self.requests.lock().unwrap().push(request);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(detail) => Err(CoreError::Upstream {
                    service: "chat",
                    detail: detail.to_string(),
                }),
            }
        }

        async fn embed(
            &self,
            inputs: &[String],
            _model: &str,
        ) -> Result<Vec<Vec<f32>>, CoreError> {
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct MemoryLog {
        state: Mutex<HashMap<String, Vec<ChatTurn>>>,
        fail_saves: bool,
    }

    impl MemoryLog {
        fn new(fail_saves: bool) -> Self {
            Self {
                state: Mutex::new(HashMap::new()),
                fail_saves,
            }
        }
    }

    #[async_trait]
    impl ConversationLog for MemoryLog {
        async fn load(&self, scope_id: &str) -> Vec<ChatTurn> {
            self.state
                .lock()
                .unwrap()
                .get(scope_id)
                .cloned()
                .unwrap_or_default()
        }

        async fn save(&self, scope_id: &str, turns: Vec<ChatTurn>) -> Result<(), CoreError> {
            if self.fail_saves {
                return Err(CoreError::Persistence("disk full".to_string()));
            }
            self.state.lock().unwrap().insert(scope_id.to_string(), turns);
            Ok(())
        }
    }

    async fn service(
        provider: Arc<ScriptedProvider>,
        log: Arc<MemoryLog>,
    ) -> (QaService, Arc<SqliteDocumentStore>) {
        let tmp = std::env::temp_dir().join(format!(
            "ledgerlens-qa-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        let store = Arc::new(SqliteDocumentStore::with_path(tmp).await.unwrap());

        let embedder = Arc::new(Embedder::new(
            provider.clone(),
            "test-embed".to_string(),
            EmbedConfig::default(),
            Duration::from_secs(1),
        ));
        let retriever = Retriever::new(embedder, store.clone(), RetrievalConfig::default());
        let assembler = ContextAssembler::new(retriever, store.clone());

        let qa = QaService::new(
            log,
            assembler,
            provider,
            "test-chat".to_string(),
            512,
            5,
            Duration::from_secs(5),
        );
        (qa, store)
    }

    #[tokio::test]
    async fn blank_question_is_rejected_without_side_effects() {
        let provider = Arc::new(ScriptedProvider::answering("should not run"));
        let log = Arc::new(MemoryLog::new(false));
        let (qa, _store) = service(provider.clone(), log.clone()).await;

        let err = qa.ask("u1", "   ").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(provider.requests.lock().unwrap().is_empty());
        assert!(log.load("u1").await.is_empty());
    }

    #[tokio::test]
    async fn empty_context_refusal_passes_through_verbatim() {
        let provider = Arc::new(ScriptedProvider::answering(REFUSAL_ANSWER));
        let log = Arc::new(MemoryLog::new(false));
        let (qa, _store) = service(provider, log).await;

        let outcome = qa.ask("u1", "What was Q1 revenue?").await.unwrap();
        assert_eq!(outcome.answer, REFUSAL_ANSWER);
        assert!(outcome.history_warning.is_none());
    }

    #[tokio::test]
    async fn message_sequence_and_decoding_are_fixed() {
        let provider = Arc::new(ScriptedProvider::answering("The balance is 15900."));
        let log = Arc::new(MemoryLog::new(false));
        log.save(
            "u1",
            vec![
                ChatTurn::user("earlier question"),
                ChatTurn::assistant("earlier answer"),
            ],
        )
        .await
        .unwrap();
        let (qa, store) = service(provider.clone(), log).await;

        store
            .upsert(Document {
                scope_id: "u1".to_string(),
                source_table: "account_balances".to_string(),
                source_id: "b1".to_string(),
                content: "Account Balance | cash_balance=15900".to_string(),
                embedding: vec![1.0, 0.0],
            })
            .await
            .unwrap();
        store
            .upsert_entry(KbEntry {
                title: "Net Profit".to_string(),
                content: "revenue - expenses".to_string(),
            })
            .await
            .unwrap();

        qa.ask("u1", "What is the checking balance?").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.max_tokens, Some(512));

        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "system", "user", "user"]);
        assert_eq!(request.messages[0].content, "earlier question");
        assert!(request.messages[2].content.contains(REFUSAL_ANSWER));
        assert!(request.messages[3].content.contains("cash_balance=15900"));
        assert!(request.messages[3].content.contains("Net Profit"));
        assert_eq!(request.messages[4].content, "What is the checking balance?");
    }

    #[tokio::test]
    async fn successful_turn_is_persisted() {
        let provider = Arc::new(ScriptedProvider::answering("42"));
        let log = Arc::new(MemoryLog::new(false));
        let (qa, _store) = service(provider, log.clone()).await;

        qa.ask("u1", "How many invoices?").await.unwrap();

        let turns = log.load("u1").await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], ChatTurn::user("How many invoices?"));
        assert_eq!(turns[1], ChatTurn::assistant("42"));
    }

    #[tokio::test]
    async fn upstream_failure_persists_nothing() {
        let provider = Arc::new(ScriptedProvider::failing("model offline"));
        let log = Arc::new(MemoryLog::new(false));
        let (qa, _store) = service(provider, log.clone()).await;

        let err = qa.ask("u1", "What was Q1 revenue?").await.unwrap_err();
        assert!(matches!(err, CoreError::Upstream { service: "chat", .. }));
        assert!(log.load("u1").await.is_empty());
    }

    #[tokio::test]
    async fn save_failure_still_returns_the_answer() {
        let provider = Arc::new(ScriptedProvider::answering("42"));
        let log = Arc::new(MemoryLog::new(true));
        let (qa, _store) = service(provider, log).await;

        let outcome = qa.ask("u1", "How many invoices?").await.unwrap();
        assert_eq!(outcome.answer, "42");
        let warning = outcome.history_warning.expect("warning surfaced");
        assert!(warning.contains("could not be saved"));
    }
}
