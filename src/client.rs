//! Client assembly
//!
//! Wires the gateway, session, store and the two coordinators together.

use crate::api::{ApiError, ChatApi, HttpApi, LoggingApi};
use crate::auth::Auth;
use crate::config::ClientConfig;
use crate::conversations::{ConfirmDelete, ConversationList};
use crate::send::SendCoordinator;
use crate::session::{Session, SessionSlot};
use crate::store::ConversationStore;
use std::sync::Arc;

/// Everything the outer surface needs, sharing one store and session
pub struct ChatClient {
    pub config: ClientConfig,
    api: Arc<dyn ChatApi>,
    pub session: Arc<Session>,
    pub store: Arc<ConversationStore>,
    pub sender: Arc<SendCoordinator>,
    pub conversations: Arc<ConversationList>,
    pub auth: Arc<Auth>,
}

impl ChatClient {
    /// Build a client talking HTTP to `config.api_base_url`
    ///
    /// # Errors
    ///
    /// Fails when `config.api_base_url` is not a usable URL.
    pub fn connect(config: ClientConfig, confirm: Arc<dyn ConfirmDelete>) -> Result<Self, ApiError> {
        let http: Arc<dyn ChatApi> = Arc::new(HttpApi::new(&config.api_base_url)?);
        let api: Arc<dyn ChatApi> = Arc::new(LoggingApi::new(http));
        Ok(Self::with_api(config, api, confirm))
    }

    /// Build a client over any gateway
    #[must_use]
    pub fn with_api(
        config: ClientConfig,
        api: Arc<dyn ChatApi>,
        confirm: Arc<dyn ConfirmDelete>,
    ) -> Self {
        let session = Arc::new(Session::restore(SessionSlot::in_dir(&config.session_dir)));
        let store = Arc::new(ConversationStore::new(api.clone()));
        let sender = Arc::new(SendCoordinator::new(
            api.clone(),
            store.clone(),
            session.clone(),
            config.default_title.clone(),
        ));
        let conversations = Arc::new(ConversationList::new(
            api.clone(),
            store.clone(),
            session.clone(),
            confirm,
            config.default_title.clone(),
        ));
        let auth = Arc::new(Auth::new(api.clone(), session.clone(), store.clone()));

        Self {
            config,
            api,
            session,
            store,
            sender,
            conversations,
            auth,
        }
    }

    /// Sign out and forget the conversation list
    pub fn logout(&self) {
        self.auth.logout();
        self.conversations.reset();
    }

    /// Check that a restored user still exists on the service. A user the
    /// service no longer knows is signed out; other failures keep the session.
    ///
    /// # Errors
    ///
    /// Returns any gateway error other than 404.
    pub async fn verify_session(&self) -> Result<bool, ApiError> {
        let Some(user) = self.session.current_user() else {
            return Ok(false);
        };
        match self.api.get_user(&user.id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                tracing::info!(user_id = %user.id, "Stored user no longer exists; signing out");
                self.logout();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
