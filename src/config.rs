//! Session and client configuration
//!
//! `SessionConfig` is loaded once when a session starts and saved when it
//! ends; nothing reads settings from ambient storage in between.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const ON_PREM_MODEL: &str = "llama3";
pub const ON_PREM_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Configuration load/save failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Retrieval search strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Similarity,
    #[default]
    Mmr,
    SimilarityScoreThreshold,
}

/// Parameters forwarded to the retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub k: u32,
    pub fetch_k: Option<u32>,
    pub score_threshold: Option<f32>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 20,
            fetch_k: None,
            score_threshold: None,
        }
    }
}

/// Knowledge-index settings for retrieval-augmented requests
///
/// Missing fields take their defaults, so records written by older clients
/// still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub provider: String,
    #[serde(rename = "embedding")]
    pub embedding_model: String,
    pub index_name: String,
    pub search_type: SearchType,
    #[serde(rename = "search_kwargs")]
    pub search_params: SearchParams,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            provider: "redis".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            index_name: String::new(),
            search_type: SearchType::default(),
            search_params: SearchParams::default(),
        }
    }
}

impl RetrievalConfig {
    /// Retrieval is configured when an index has been selected
    pub fn is_enabled(&self) -> bool {
        !self.index_name.trim().is_empty()
    }
}

/// Per-session settings persisted across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
    pub tools: Vec<String>,
    pub retrieval: RetrievalConfig,
    /// Forward `doc` stream events to subscribers instead of only logging them
    pub surface_documents: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tools: vec![],
            retrieval: RetrievalConfig::default(),
            surface_documents: false,
        }
    }
}

impl SessionConfig {
    /// Defaults for a self-hosted deployment
    pub fn on_prem() -> Self {
        let mut config = Self {
            model: ON_PREM_MODEL.to_string(),
            ..Self::default()
        };
        config.retrieval.embedding_model = ON_PREM_EMBEDDING_MODEL.to_string();
        config
    }

    /// Load from `path`; a missing file yields `fallback`
    pub fn load(path: &Path, fallback: SessionConfig) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No saved session config, using defaults");
                return Ok(fallback);
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(io_err)
    }
}

/// Connection settings for the generation and persistence services
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub api_url: String,
    /// Bearer token for the `Authorization` header
    pub token: Option<String>,
    /// Where `SessionConfig` is loaded from and saved to
    pub session_path: PathBuf,
    pub on_prem: bool,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let base = PathBuf::from(home).join(".chat-session");

        let token_path = std::env::var("CHAT_TOKEN_PATH")
            .map_or_else(|_| base.join("token"), PathBuf::from);
        let token = std::env::var("CHAT_API_TOKEN")
            .ok()
            .or_else(|| read_token(&token_path));

        Self {
            api_url: std::env::var("CHAT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            token,
            session_path: std::env::var("CHAT_SESSION_PATH")
                .map_or_else(|_| base.join("session.json"), PathBuf::from),
            on_prem: std::env::var("CHAT_ON_PREM").is_ok_and(|v| v == "1" || v == "true"),
        }
    }

    /// Session defaults for this deployment
    pub fn default_session(&self) -> SessionConfig {
        if self.on_prem {
            SessionConfig::on_prem()
        } else {
            SessionConfig::default()
        }
    }
}

/// Read a locally persisted credential
fn read_token(path: &Path) -> Option<String> {
    let token = std::fs::read_to_string(path).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
