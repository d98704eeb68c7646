//! Per-scope conversation history.
//!
//! Each scope keeps an ordered, bounded log of user/assistant turns that
//! survives across invocations. Reads degrade gracefully: a missing or
//! unreadable log is an empty one, never a failed question. Writes replace
//! one scope's log in a single keyed upsert, so concurrent saves for
//! different scopes cannot trample each other.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// At most the last N turns for one scope; empty when nothing was
    /// stored or the stored state cannot be read.
    async fn load(&self, scope_id: &str) -> Vec<ChatTurn>;

    /// Replace one scope's log with `turns`, trimmed to the last N
    /// (oldest dropped first).
    async fn save(&self, scope_id: &str, turns: Vec<ChatTurn>) -> Result<(), CoreError>;
}

pub struct SqliteHistory {
    pool: SqlitePool,
    max_turns: usize,
}

impl SqliteHistory {
    pub async fn with_path(db_path: PathBuf, max_turns: usize) -> Result<Self, CoreError> {
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

        let store = Self {
            pool,
            max_turns: max_turns.max(1),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), CoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_histories (
                scope_id TEXT PRIMARY KEY,
                turns TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(CoreError::persistence)?;

        Ok(())
    }

    fn trim(&self, mut turns: Vec<ChatTurn>) -> Vec<ChatTurn> {
        if turns.len() > self.max_turns {
            turns.drain(..turns.len() - self.max_turns);
        }
        turns
    }
}

#[async_trait]
impl ConversationLog for SqliteHistory {
    async fn load(&self, scope_id: &str) -> Vec<ChatTurn> {
        let row = match sqlx::query("SELECT turns FROM chat_histories WHERE scope_id = ?1")
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(scope_id, "history read failed, starting empty: {err}");
                return Vec::new();
            }
        };

        let Some(row) = row else {
            return Vec::new();
        };

        let raw: String = row.get("turns");
        match serde_json::from_str::<Vec<ChatTurn>>(&raw) {
            Ok(turns) => self.trim(turns),
            Err(err) => {
                tracing::warn!(scope_id, "stored history unparsable, starting empty: {err}");
                Vec::new()
            }
        }
    }

    async fn save(&self, scope_id: &str, turns: Vec<ChatTurn>) -> Result<(), CoreError> {
        let trimmed = self.trim(turns);
        let payload = serde_json::to_string(&trimmed).map_err(CoreError::persistence)?;

        sqlx::query(
            "INSERT INTO chat_histories (scope_id, turns) VALUES (?1, ?2)
             ON CONFLICT (scope_id) DO UPDATE SET
                turns = excluded.turns,
                updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(scope_id)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(CoreError::persistence)?;

        Ok(())
    }
}
