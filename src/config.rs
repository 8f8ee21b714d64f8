//! Client configuration

use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

/// Settings for talking to the service and persisting the session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the answering service
    pub api_base_url: String,
    /// Directory holding the persisted session slot
    pub session_dir: PathBuf,
    /// Title for conversations created without one
    pub default_title: String,
}

impl ClientConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let session_dir = std::env::var("RAG_CHAT_HOME").map_or_else(
            |_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".rag-chat")
            },
            PathBuf::from,
        );

        Self {
            api_base_url: std::env::var("RAG_CHAT_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            session_dir,
            default_title: std::env::var("RAG_CHAT_DEFAULT_TITLE")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string()),
        }
    }

    /// Configuration rooted in a given directory, with defaults otherwise
    #[must_use]
    pub fn with_session_dir(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            session_dir: session_dir.into(),
            default_title: DEFAULT_CONVERSATION_TITLE.to_string(),
        }
    }
}
