//! Conversation list manager
//!
//! Keeps the signed-in user's conversation list and handles creating and
//! deleting conversations. Message content is left to the store.

use crate::api::{ApiError, ChatApi, Conversation};
use crate::session::Session;
use crate::store::ConversationStore;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Asks the user before a conversation is deleted
#[async_trait]
pub trait ConfirmDelete: Send + Sync {
    /// Return true to go ahead with the delete
    async fn confirm_delete(&self, conversation_id: &str, title: Option<&str>) -> bool;
}

/// What the conversation sidebar shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListView {
    pub conversations: Vec<Conversation>,
    pub is_loading: bool,
    pub is_creating: bool,
    /// Inline error from the last failed operation
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Conversation),
    /// Another creation is still running
    AlreadyCreating,
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { was_active: bool },
    /// The user declined; no request was made
    Cancelled,
}

/// Clears the creating flag however the creation ends
struct CreatingGuard<'a> {
    view: &'a Mutex<ListView>,
}

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_creating = false;
    }
}

pub struct ConversationList {
    api: Arc<dyn ChatApi>,
    store: Arc<ConversationStore>,
    session: Arc<Session>,
    confirm: Arc<dyn ConfirmDelete>,
    default_title: String,
    view: Mutex<ListView>,
}

impl ConversationList {
    #[must_use]
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: Arc<ConversationStore>,
        session: Arc<Session>,
        confirm: Arc<dyn ConfirmDelete>,
        default_title: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            session,
            confirm,
            default_title: default_title.into(),
            view: Mutex::new(ListView::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> ListView {
        self.lock().clone()
    }

    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    /// Forget the list, e.g. after signing out
    pub fn reset(&self) {
        *self.lock() = ListView::default();
    }

    /// Fetch the current user's conversations.
    ///
    /// Signed out, nothing is requested and the list is left as it is. A
    /// failed request keeps the previous list and records the error.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when the list cannot be fetched.
    pub async fn load(&self) -> Result<(), ApiError> {
        let Some(user) = self.session.current_user() else {
            tracing::debug!("Not signed in; skipping conversation list load");
            return Ok(());
        };

        {
            let mut view = self.lock();
            view.is_loading = true;
            view.error = None;
        }

        let result = self.api.list_conversations(&user.id).await;

        let mut view = self.lock();
        view.is_loading = false;
        match result {
            Ok(conversations) => {
                tracing::debug!(user_id = %user.id, count = conversations.len(), "Conversation list loaded");
                view.conversations = conversations;
                Ok(())
            }
            Err(e) => {
                view.error = Some(e.message.clone());
                Err(e)
            }
        }
    }

    /// Create an empty conversation and make it active.
    ///
    /// Only one creation runs at a time; a second call while one is in flight
    /// returns [`CreateOutcome::AlreadyCreating`] without a request.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when the service refuses the creation.
    pub async fn create_new(&self) -> Result<CreateOutcome, ApiError> {
        let Some(user) = self.session.current_user() else {
            return Ok(CreateOutcome::SignedOut);
        };

        {
            let mut view = self.lock();
            if view.is_creating {
                return Ok(CreateOutcome::AlreadyCreating);
            }
            view.is_creating = true;
            view.error = None;
        }
        let _guard = CreatingGuard { view: &self.view };

        let conversation = match self
            .api
            .create_conversation(&user.id, Some(&self.default_title))
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                self.lock().error = Some(e.message.clone());
                return Err(e);
            }
        };
        tracing::info!(conv_id = %conversation.id, "Created conversation");

        // A failed reload is already recorded in the view; the conversation
        // exists either way.
        let _ = self.load().await;
        self.store.activate_new(&conversation.id);

        Ok(CreateOutcome::Created(conversation))
    }

    /// Fetch one conversation's current record from the service
    ///
    /// # Errors
    ///
    /// Returns a 404 service error for an unknown id.
    pub async fn details(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        self.api.get_conversation(conversation_id).await
    }

    /// Delete a conversation after the user confirms.
    ///
    /// If it was active, the store is reset before anything else happens. The
    /// list is reloaded afterwards whether or not it was active. A failed
    /// delete changes nothing locally.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when the delete request fails.
    pub async fn delete(&self, conversation_id: &str) -> Result<DeleteOutcome, ApiError> {
        let title = self
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| c.title.clone());

        if !self
            .confirm
            .confirm_delete(conversation_id, title.as_deref())
            .await
        {
            tracing::debug!(conv_id = %conversation_id, "Delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        if let Err(e) = self.api.delete_conversation(conversation_id).await {
            self.lock().error = Some(e.message.clone());
            return Err(e);
        }

        let was_active = self.store.deactivate_if_active(conversation_id);
        tracing::info!(conv_id = %conversation_id, was_active, "Deleted conversation");

        // A failed reload is already recorded in the view; the delete went
        // through either way.
        let _ = self.load().await;
        Ok(DeleteOutcome::Deleted { was_active })
    }
}
