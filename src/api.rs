//! Gateway to the remote answering service
//!
//! Every remote operation the client needs is one method on [`ChatApi`]. Each
//! call makes exactly one attempt: no retries, no caching.

mod error;
mod http;
mod types;

pub use error::{ApiError, ApiErrorKind};
pub use http::HttpApi;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Typed access to the service's REST endpoints
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_user(&self, username: &str, email: &str) -> Result<User, ApiError>;

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError>;

    /// Look a user up by email. Absent users fail with a 404 service error.
    async fn find_user_by_email(&self, email: &str) -> Result<User, ApiError>;

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, ApiError>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError>;

    /// Conversations for a user, in the order the service returns them
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ApiError>;

    /// Delete a conversation; the service cascades to its messages
    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ApiError>;

    /// Messages for a conversation, oldest first
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;

    /// Ask the answering pipeline a question, optionally scoped to a conversation
    async fn submit_query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError>;
}

// ============================================================================
// Logging wrapper
// ============================================================================

/// Logs duration and outcome of every call made through the inner gateway
pub struct LoggingApi {
    inner: Arc<dyn ChatApi>,
}

impl LoggingApi {
    #[must_use]
    pub fn new(inner: Arc<dyn ChatApi>) -> Self {
        Self { inner }
    }

    fn record<T>(operation: &'static str, started: Instant, result: &Result<T, ApiError>) {
        let duration_ms = started.elapsed().as_millis();
        match result {
            Ok(_) => {
                tracing::debug!(operation, duration_ms = %duration_ms, "API call completed");
            }
            Err(e) => {
                tracing::warn!(
                    operation,
                    duration_ms = %duration_ms,
                    status = ?e.kind.status(),
                    error = %e.message,
                    "API call failed"
                );
            }
        }
    }
}

#[async_trait]
impl ChatApi for LoggingApi {
    async fn create_user(&self, username: &str, email: &str) -> Result<User, ApiError> {
        let started = Instant::now();
        let result = self.inner.create_user(username, email).await;
        Self::record("create_user", started, &result);
        result
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        let started = Instant::now();
        let result = self.inner.get_user(user_id).await;
        Self::record("get_user", started, &result);
        result
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, ApiError> {
        let started = Instant::now();
        let result = self.inner.find_user_by_email(email).await;
        Self::record("find_user_by_email", started, &result);
        result
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        let started = Instant::now();
        let result = self.inner.create_conversation(user_id, title).await;
        Self::record("create_conversation", started, &result);
        result
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let started = Instant::now();
        let result = self.inner.get_conversation(conversation_id).await;
        Self::record("get_conversation", started, &result);
        result
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ApiError> {
        let started = Instant::now();
        let result = self.inner.list_conversations(user_id).await;
        Self::record("list_conversations", started, &result);
        result
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        let started = Instant::now();
        let result = self.inner.delete_conversation(conversation_id).await;
        Self::record("delete_conversation", started, &result);
        result
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let started = Instant::now();
        let result = self.inner.list_messages(conversation_id).await;
        Self::record("list_messages", started, &result);
        result
    }

    async fn submit_query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        let started = Instant::now();
        let result = self.inner.submit_query(request).await;
        Self::record("submit_query", started, &result);
        result
    }
}
