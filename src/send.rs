//! Message send coordinator
//!
//! One send attempt runs `Idle -> Sending -> Idle`. The user's message is
//! appended to the transcript before the query goes out and is never taken
//! back. The outcome is always visible in the transcript: either the answer
//! or an assistant message describing the failure.
//!
//! A send keeps its conversation. If the user switches away while the query is
//! in flight, the answer is not shown in the new transcript; the service has
//! already stored it with the original conversation. The same holds for a
//! conversation created lazily: if the user opened another one while it was
//! being created, the send goes into the new conversation without taking the
//! view over.

use crate::api::{ApiError, ChatApi, Conversation, Message, QueryRequest, Role};
use crate::session::Session;
use crate::store::ConversationStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Why a send did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    BlankInput,
    AlreadySending,
    SignedOut,
}

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Rejected(SendRejection),
    /// No conversation was active and creating one failed; nothing was appended
    CreateFailed(ApiError),
    Answered {
        conversation_id: String,
        /// Set when this send created the conversation
        created: Option<Conversation>,
        reply: Message,
        /// False when the user had switched away before the answer arrived
        shown: bool,
    },
    /// The query failed; a synthetic assistant message carries the error
    Failed {
        conversation_id: String,
        created: Option<Conversation>,
        error: ApiError,
    },
}

/// Send state machine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending {
        conversation_id: Option<String>,
    },
}

/// Returns the coordinator to `Idle` however the attempt ends
struct SendingGuard<'a> {
    state: &'a Mutex<SendState>,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SendState::Idle;
    }
}

pub struct SendCoordinator {
    api: Arc<dyn ChatApi>,
    store: Arc<ConversationStore>,
    session: Arc<Session>,
    default_title: String,
    state: Mutex<SendState>,
    banner: Mutex<Option<String>>,
}

impl SendCoordinator {
    #[must_use]
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: Arc<ConversationStore>,
        session: Arc<Session>,
        default_title: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            session,
            default_title: default_title.into(),
            state: Mutex::new(SendState::Idle),
            banner: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> SendState {
        self.lock_state().clone()
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        matches!(*self.lock_state(), SendState::Sending { .. })
    }

    /// Last failure worth a banner, if not dismissed
    #[must_use]
    pub fn banner(&self) -> Option<String> {
        self.banner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn dismiss_banner(&self) {
        self.banner.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn set_banner(&self, message: &str) {
        *self.banner.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    pub async fn send(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Rejected(SendRejection::BlankInput);
        }
        let Some(user) = self.session.current_user() else {
            return SendOutcome::Rejected(SendRejection::SignedOut);
        };

        // Read before any await; a later switch shows up as a new generation
        let started_generation = self.store.generation();
        {
            let mut state = self.lock_state();
            if matches!(*state, SendState::Sending { .. }) {
                return SendOutcome::Rejected(SendRejection::AlreadySending);
            }
            *state = SendState::Sending {
                conversation_id: self.store.active_conversation_id(),
            };
        }
        let _guard = SendingGuard { state: &self.state };
        self.dismiss_banner();

        let (conversation_id, created, in_view) = match self.store.active_conversation_id() {
            Some(id) => (id, None, true),
            None => {
                match self
                    .api
                    .create_conversation(&user.id, Some(&self.default_title))
                    .await
                {
                    Ok(conversation) => {
                        tracing::info!(conv_id = %conversation.id, "Created conversation for first message");
                        let in_view = self
                            .store
                            .activate_new_if_idle(&conversation.id, started_generation);
                        *self.lock_state() = SendState::Sending {
                            conversation_id: Some(conversation.id.clone()),
                        };
                        (conversation.id.clone(), Some(conversation), in_view)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not create conversation; send aborted");
                        self.set_banner(&e.message);
                        return SendOutcome::CreateFailed(e);
                    }
                }
            }
        };

        // Visible before the query is issued, unless the user opened another
        // conversation while this one was being created
        if in_view {
            self.store
                .append(Message::local(&conversation_id, Role::User, text));
        } else {
            tracing::debug!(conv_id = %conversation_id, "Sending into a conversation that is not on screen");
        }

        let request = QueryRequest {
            query: text.to_string(),
            conversation_id: Some(conversation_id.clone()),
        };

        match self.api.submit_query(&request).await {
            Ok(response) => {
                let reply = Message::local(&conversation_id, Role::Assistant, response.response_text);
                let shown = self.store.append_to(&conversation_id, reply.clone());
                if !shown {
                    tracing::debug!(conv_id = %conversation_id, "Answer arrived after switching away");
                }
                SendOutcome::Answered {
                    conversation_id,
                    created,
                    reply,
                    shown,
                }
            }
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Query failed");
                let notice = Message::local(
                    &conversation_id,
                    Role::Assistant,
                    format!("Error: {}", e.message),
                );
                self.store.append_to(&conversation_id, notice);
                self.set_banner(&e.message);
                SendOutcome::Failed {
                    conversation_id,
                    created,
                    error: e,
                }
            }
        }
    }
}
