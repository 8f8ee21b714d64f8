//! Conversation store
//!
//! Owns the session view: which conversation is active, its transcript and
//! whether a reload is running. Nothing else mutates that state.
//!
//! Reloads are fenced. Every change of the active conversation (and every
//! refresh) starts a new generation and cancels the previous reload's token.
//! A reload only writes its result if its generation is still current, so a
//! slow response for a conversation the user already left is dropped.

mod event;

#[cfg(test)]
mod proptests;

pub use event::{SessionView, StoreEvent};

use crate::api::{ApiError, ChatApi, Message};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 256;

/// How a reload request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Server messages replaced the transcript
    Applied { count: usize },
    /// Superseded by a newer switch or refresh; nothing was written
    Stale,
    /// Switched to no conversation; transcript emptied without a request
    Cleared,
    /// Already showing that conversation
    Unchanged,
    /// Refresh requested with nothing active
    NoActive,
}

struct ReloadTicket {
    generation: u64,
    cancel: CancellationToken,
}

struct StoreInner {
    view: SessionView,
    generation: u64,
    reload_cancel: Option<CancellationToken>,
    /// Local messages the running reload must not drop: those appended while
    /// it is in flight, plus unconfirmed ones carried over by a refresh. They
    /// are kept on top of whatever the reload brings back.
    pending_tail: Vec<Message>,
    /// Server ids already on screen when the running reload started. Their
    /// messages cannot be the echo of a pending local one.
    known_ids: HashSet<String>,
}

impl StoreInner {
    /// Supersede any running reload
    fn next_generation(&mut self) -> ReloadTicket {
        if let Some(token) = self.reload_cancel.take() {
            token.cancel();
        }
        self.generation += 1;
        let cancel = CancellationToken::new();
        self.reload_cancel = Some(cancel.clone());
        ReloadTicket {
            generation: self.generation,
            cancel,
        }
    }

    /// New generation for a different conversation; nothing carries over
    fn switch_generation(&mut self) -> ReloadTicket {
        self.pending_tail.clear();
        self.known_ids.clear();
        self.next_generation()
    }

    /// New generation for the same conversation. Local messages the server
    /// has not confirmed yet survive the reload.
    fn refresh_generation(&mut self) -> ReloadTicket {
        let (local, server): (Vec<&Message>, Vec<&Message>) =
            self.view.messages.iter().partition(|m| m.is_local());
        self.known_ids = server.into_iter().map(|m| m.id.clone()).collect();
        self.pending_tail = local.into_iter().cloned().collect();
        self.next_generation()
    }

    fn reset_view(&mut self, conversation_id: Option<String>) {
        self.switch_generation();
        self.reload_cancel = None;
        self.view.active_conversation_id = conversation_id;
        self.view.messages.clear();
        self.view.is_loading_messages = false;
    }
}

/// Put the server list first, then every pending local message the server
/// has not echoed back. An echo is a message with the same role and content
/// that was not on screen before the reload; each echo confirms one local
/// message, matched from the newest end.
fn merge_pending(
    server: Vec<Message>,
    pending: Vec<Message>,
    known_ids: &HashSet<String>,
) -> Vec<Message> {
    let mut echoed = vec![false; server.len()];
    let mut unconfirmed = Vec::new();
    for local in pending {
        let echo = (0..server.len()).rev().find(|&i| {
            let m = &server[i];
            !echoed[i]
                && !known_ids.contains(&m.id)
                && m.role == local.role
                && m.content == local.content
        });
        match echo {
            Some(i) => echoed[i] = true,
            None => unconfirmed.push(local),
        }
    }
    let mut merged = server;
    merged.extend(unconfirmed);
    merged
}

/// Single source of truth for the session view
pub struct ConversationStore {
    api: Arc<dyn ChatApi>,
    inner: Mutex<StoreInner>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
    #[must_use]
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api,
            inner: Mutex::new(StoreInner {
                view: SessionView::default(),
                generation: 0,
                reload_cancel: None,
                pending_tail: Vec::new(),
                known_ids: HashSet::new(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Observe changes. Events are sent while the change is applied, so their
    /// order matches the order of mutations.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionView {
        self.lock().view.clone()
    }

    #[must_use]
    pub fn active_conversation_id(&self) -> Option<String> {
        self.lock().view.active_conversation_id.clone()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock().view.messages.clone()
    }

    #[must_use]
    pub fn is_loading_messages(&self) -> bool {
        self.lock().view.is_loading_messages
    }

    /// Current fencing generation
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    // ==================== Transitions ====================

    /// Switch the active conversation and load its messages.
    ///
    /// The transcript is emptied as soon as the switch happens. If another
    /// switch or refresh starts before the load answers, this call returns
    /// [`ReloadOutcome::Stale`] and leaves the view alone. A failed load leaves
    /// the transcript without server messages and returns the error.
    ///
    /// # Errors
    ///
    /// Returns the gateway error of a load that was still current when it failed.
    pub async fn set_active(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<ReloadOutcome, ApiError> {
        let Some(conversation_id) = conversation_id else {
            return Ok(if self.deactivate().is_some() {
                ReloadOutcome::Cleared
            } else {
                ReloadOutcome::Unchanged
            });
        };

        let ticket = {
            let mut inner = self.lock();
            if inner.view.active_conversation_id.as_deref() == Some(conversation_id) {
                return Ok(ReloadOutcome::Unchanged);
            }
            inner.view.active_conversation_id = Some(conversation_id.to_string());
            inner.view.messages.clear();
            inner.view.is_loading_messages = true;
            let ticket = inner.switch_generation();
            self.emit(StoreEvent::ActiveChanged {
                conversation_id: Some(conversation_id.to_string()),
            });
            self.emit(StoreEvent::LoadStarted {
                conversation_id: conversation_id.to_string(),
            });
            ticket
        };

        tracing::debug!(conv_id = %conversation_id, generation = ticket.generation, "Switched conversation");
        self.run_reload(conversation_id.to_string(), ticket).await
    }

    /// Reload the active conversation's messages from the server.
    ///
    /// Local messages the server has not stored yet, such as the user's side
    /// of a send still in flight, stay at the end of the transcript until the
    /// server list contains them.
    ///
    /// # Errors
    ///
    /// Returns the gateway error of a reload that was still current when it
    /// failed.
    pub async fn refresh(&self) -> Result<ReloadOutcome, ApiError> {
        let (conversation_id, ticket) = {
            let mut inner = self.lock();
            let Some(conversation_id) = inner.view.active_conversation_id.clone() else {
                return Ok(ReloadOutcome::NoActive);
            };
            inner.view.is_loading_messages = true;
            let ticket = inner.refresh_generation();
            self.emit(StoreEvent::LoadStarted {
                conversation_id: conversation_id.clone(),
            });
            (conversation_id, ticket)
        };

        self.run_reload(conversation_id, ticket).await
    }

    async fn run_reload(
        &self,
        conversation_id: String,
        ticket: ReloadTicket,
    ) -> Result<ReloadOutcome, ApiError> {
        let result = tokio::select! {
            biased;
            () = ticket.cancel.cancelled() => {
                tracing::debug!(conv_id = %conversation_id, generation = ticket.generation, "Reload superseded");
                return Ok(ReloadOutcome::Stale);
            }
            result = self.api.list_messages(&conversation_id) => result,
        };

        let mut inner = self.lock();
        if inner.generation != ticket.generation {
            tracing::debug!(
                conv_id = %conversation_id,
                generation = ticket.generation,
                current = inner.generation,
                "Discarding stale reload"
            );
            return Ok(ReloadOutcome::Stale);
        }

        inner.view.is_loading_messages = false;
        inner.reload_cancel = None;
        let tail = std::mem::take(&mut inner.pending_tail);
        let known_ids = std::mem::take(&mut inner.known_ids);

        match result {
            Ok(messages) => {
                let count = messages.len();
                inner.view.messages = merge_pending(messages, tail, &known_ids);
                tracing::debug!(conv_id = %conversation_id, count, "Messages loaded");
                self.emit(StoreEvent::MessagesReplaced {
                    conversation_id,
                    messages: inner.view.messages.clone(),
                });
                Ok(ReloadOutcome::Applied { count })
            }
            Err(e) => {
                inner.view.messages = tail;
                tracing::warn!(conv_id = %conversation_id, error = %e, "Failed to load messages");
                self.emit(StoreEvent::LoadFailed {
                    conversation_id,
                    message: e.message.clone(),
                });
                Err(e)
            }
        }
    }

    /// Make a conversation the server has just created active. It has no
    /// messages yet, so no reload is issued.
    pub fn activate_new(&self, conversation_id: &str) {
        let mut inner = self.lock();
        self.activate_new_locked(&mut inner, conversation_id);
    }

    /// [`Self::activate_new`], but only while nothing is active and no
    /// transition has happened since `generation` was read. Returns whether
    /// the conversation was activated.
    pub fn activate_new_if_idle(&self, conversation_id: &str, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.view.active_conversation_id.is_some() {
            tracing::debug!(conv_id = %conversation_id, generation, current = inner.generation, "View moved on; not activating");
            return false;
        }
        self.activate_new_locked(&mut inner, conversation_id);
        true
    }

    fn activate_new_locked(&self, inner: &mut StoreInner, conversation_id: &str) {
        inner.reset_view(Some(conversation_id.to_string()));
        tracing::debug!(conv_id = %conversation_id, generation = inner.generation, "Activated new conversation");
        self.emit(StoreEvent::ActiveChanged {
            conversation_id: Some(conversation_id.to_string()),
        });
    }

    /// Drop the active conversation and its transcript in one step.
    /// Returns the id that was active.
    pub fn deactivate(&self) -> Option<String> {
        let mut inner = self.lock();
        let previous = inner.view.active_conversation_id.clone();
        inner.reset_view(None);
        if previous.is_some() {
            self.emit(StoreEvent::ActiveChanged {
                conversation_id: None,
            });
        }
        previous
    }

    /// [`Self::deactivate`], but only if `conversation_id` is the active one
    pub fn deactivate_if_active(&self, conversation_id: &str) -> bool {
        let mut inner = self.lock();
        if inner.view.active_conversation_id.as_deref() != Some(conversation_id) {
            return false;
        }
        inner.reset_view(None);
        self.emit(StoreEvent::ActiveChanged {
            conversation_id: None,
        });
        true
    }

    /// Append to the transcript. Callers make sure the message belongs to the
    /// active conversation.
    pub fn append(&self, message: Message) {
        let mut inner = self.lock();
        if inner.view.is_loading_messages {
            inner.pending_tail.push(message.clone());
        }
        inner.view.messages.push(message.clone());
        self.emit(StoreEvent::MessageAppended { message });
    }

    /// Append only while `conversation_id` is still active.
    /// Returns whether the message was shown.
    pub fn append_to(&self, conversation_id: &str, message: Message) -> bool {
        let mut inner = self.lock();
        if inner.view.active_conversation_id.as_deref() != Some(conversation_id) {
            return false;
        }
        if inner.view.is_loading_messages {
            inner.pending_tail.push(message.clone());
        }
        inner.view.messages.push(message.clone());
        self.emit(StoreEvent::MessageAppended { message });
        true
    }

    /// Empty the transcript, keeping the active conversation
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.view.messages.clear();
        inner.pending_tail.clear();
        self.emit(StoreEvent::MessagesCleared);
    }
}
