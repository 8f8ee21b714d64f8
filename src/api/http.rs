//! reqwest-backed gateway

use super::types::{
    Conversation, CreateConversationRequest, CreateUserRequest, ErrorBody, Message,
    QueryRequest, QueryResponse, User,
};
use super::{ApiError, ChatApi};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Gateway speaking JSON over HTTP to the answering service
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpApi {
    /// Gateway for the service rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Fails with a validation error when `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::validation(format!("Invalid API URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::validation(format!(
                "Invalid API URL '{base_url}': not a base URL"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// Join path segments onto the base URL, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    async fn send<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let (status, bytes) = self.execute(method, url, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ApiError::service(status.as_u16(), format!("Malformed response from server: {e}"))
        })
    }

    /// Issue one request and return the status and body of a 2xx response
    async fn execute<B>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<(StatusCode, Vec<u8>), ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        tracing::trace!(%method, %url, "Sending request");
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            ApiError::network(format!("Network error while contacting the server: {e}"))
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(classify_error(status, &bytes));
        }
        Ok((status, bytes.to_vec()))
    }
}

/// Prefer the service's `detail` field; otherwise describe the status line.
fn classify_error(status: StatusCode, body: &[u8]) -> ApiError {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail)
        .and_then(|detail| match detail {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

    let message = detail.unwrap_or_else(|| {
        format!(
            "Error {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown status")
        )
    });
    ApiError::service(status.as_u16(), message)
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn create_user(&self, username: &str, email: &str) -> Result<User, ApiError> {
        let url = self.endpoint(&["api", "user"]);
        let body = CreateUserRequest { username, email };
        self.send(Method::POST, url, Some(&body)).await
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        let url = self.endpoint(&["api", "user", user_id]);
        self.send::<(), _>(Method::GET, url, None).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, ApiError> {
        let url = self.endpoint(&["api", "user", "by-email", email]);
        self.send::<(), _>(Method::GET, url, None).await
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        let url = self.endpoint(&["api", "conversation"]);
        let body = CreateConversationRequest { user_id, title };
        self.send(Method::POST, url, Some(&body)).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let url = self.endpoint(&["api", "conversation", conversation_id]);
        self.send::<(), _>(Method::GET, url, None).await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ApiError> {
        let url = self.endpoint(&["api", "user", user_id, "conversations"]);
        self.send::<(), _>(Method::GET, url, None).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "conversation", conversation_id]);
        // The confirmation body carries nothing we need
        self.execute::<()>(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = self.endpoint(&["api", "conversation", conversation_id, "messages"]);
        self.send::<(), _>(Method::GET, url, None).await
    }

    async fn submit_query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        let url = self.endpoint(&["api", "rag"]);
        self.send(Method::POST, url, Some(request)).await
    }
}
