use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::CoreError;

const CONFIG_FILE: &str = "ledgerlens.toml";
const API_KEY_ENV: &str = "LEDGERLENS_API_KEY";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Business ledger database, read-only from this process.
    pub ledger_db_path: PathBuf,
    /// Derived state: documents, KB entries, conversation history.
    pub store_db_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        let log_dir = data_dir.join("logs");
        let ledger_db_path = data_dir.join("ledger.db");
        let store_db_path = data_dir.join("ledgerlens.db");
        let config_path = data_dir.join(CONFIG_FILE);

        for dir in [&data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            log_dir,
            ledger_db_path,
            store_db_path,
            config_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("LEDGERLENS_DATA_DIR") {
        return PathBuf::from(dir);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if manifest_dir.join(CONFIG_FILE).exists() {
        return manifest_dir;
    }

    env::current_dir().unwrap_or(manifest_dir)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    /// Hard ceiling on generated answer length, in tokens.
    pub max_answer_tokens: i32,
    /// Deadline for a single chat or embedding request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            max_answer_tokens: 512,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Inputs longer than this are truncated at a char boundary, with a
    /// warning, before the embedding call.
    pub max_input_chars: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 8000,
            max_attempts: 3,
            backoff_base_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 0.0 disables similarity filtering entirely; recall over precision.
    pub match_threshold: f32,
    pub match_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.0,
            match_count: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Turns kept per scope; oldest evicted first.
    pub max_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_turns: 10 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbedConfig,
    pub retrieval: RetrievalConfig,
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Load the TOML config file, falling back to defaults when the file is
    /// absent. A present-but-malformed file is an error, not a silent
    /// fallback.
    pub fn load(paths: &AppPaths) -> Result<Self, CoreError> {
        if !paths.config_path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&paths.config_path).map_err(CoreError::persistence)?;
        toml::from_str(&raw)
            .map_err(|err| CoreError::Validation(format!("invalid {CONFIG_FILE}: {err}")))
    }

    /// The API key never lives in the config file.
    pub fn api_key() -> Option<String> {
        env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty())
    }
}
