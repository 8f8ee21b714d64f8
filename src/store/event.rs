//! Session view snapshot and change notifications

use crate::api::Message;

/// What the transcript currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub active_conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub is_loading_messages: bool,
}

/// Changes broadcast to subscribers, in the order they were applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Active conversation switched; the transcript starts out empty
    ActiveChanged { conversation_id: Option<String> },
    /// A reload began for the active conversation
    LoadStarted { conversation_id: String },
    /// A reload finished and replaced the transcript
    MessagesReplaced {
        conversation_id: String,
        messages: Vec<Message>,
    },
    MessageAppended { message: Message },
    MessagesCleared,
    /// A reload failed; the transcript holds no server messages
    LoadFailed {
        conversation_id: String,
        message: String,
    },
}
