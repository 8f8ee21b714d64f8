//! In-memory service for tests
//!
//! `FakeApi` behaves like the real service (ids, cascade on delete, the query
//! endpoint persisting both sides of the exchange) and adds knobs for tests:
//! queued failures, recorded calls and gates that hold a call until released.

#![allow(dead_code)]

use crate::api::{
    ApiError, ChatApi, Conversation, Message, QueryRequest, QueryResponse, Role, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Gateway operation, used to key failures, gates and call counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateUser,
    GetUser,
    FindUserByEmail,
    CreateConversation,
    GetConversation,
    ListConversations,
    DeleteConversation,
    ListMessages,
    SubmitQuery,
}

/// A recorded gateway call with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateUser { username: String, email: String },
    GetUser { user_id: String },
    FindUserByEmail { email: String },
    CreateConversation { user_id: String, title: Option<String> },
    GetConversation { conversation_id: String },
    ListConversations { user_id: String },
    DeleteConversation { conversation_id: String },
    ListMessages { conversation_id: String },
    SubmitQuery { query: String, conversation_id: Option<String> },
}

impl ApiCall {
    pub fn op(&self) -> Op {
        match self {
            Self::CreateUser { .. } => Op::CreateUser,
            Self::GetUser { .. } => Op::GetUser,
            Self::FindUserByEmail { .. } => Op::FindUserByEmail,
            Self::CreateConversation { .. } => Op::CreateConversation,
            Self::GetConversation { .. } => Op::GetConversation,
            Self::ListConversations { .. } => Op::ListConversations,
            Self::DeleteConversation { .. } => Op::DeleteConversation,
            Self::ListMessages { .. } => Op::ListMessages,
            Self::SubmitQuery { .. } => Op::SubmitQuery,
        }
    }

    /// The id a call is about, for per-target gates
    fn target(&self) -> Option<&str> {
        match self {
            Self::GetUser { user_id } | Self::ListConversations { user_id } => Some(user_id),
            Self::GetConversation { conversation_id }
            | Self::DeleteConversation { conversation_id }
            | Self::ListMessages { conversation_id } => Some(conversation_id),
            Self::SubmitQuery { conversation_id, .. } => conversation_id.as_deref(),
            Self::FindUserByEmail { email } => Some(email),
            Self::CreateUser { .. } | Self::CreateConversation { .. } => None,
        }
    }
}

/// Holds matching calls until released
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until a held call has arrived at the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one held call proceed
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct ServerState {
    users: Vec<User>,
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<Message>>,
    next_id: u64,
}

impl ServerState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn store_message(&mut self, conversation_id: &str, role: Role, content: &str) -> Message {
        let message = Message {
            id: self.mint("msg"),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }
}

/// In-memory stand-in for the answering service
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<ServerState>,
    failures: Mutex<HashMap<Op, VecDeque<ApiError>>>,
    gates: Mutex<HashMap<(Op, Option<String>), Arc<Gate>>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Seeding ====================

    pub fn add_user(&self, username: &str, email: &str) -> User {
        let mut state = self.state.lock().unwrap();
        let user = User {
            id: state.mint("user"),
            username: username.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        state.users.push(user.clone());
        user
    }

    pub fn seed_conversation(
        &self,
        user_id: &str,
        title: &str,
        messages: &[(Role, &str)],
    ) -> Conversation {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let conversation = Conversation {
            id: state.mint("conv"),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.conversations.push(conversation.clone());
        state.messages.insert(conversation.id.clone(), Vec::new());
        for (role, content) in messages {
            state.store_message(&conversation.id, *role, content);
        }
        conversation
    }

    pub fn push_server_message(&self, conversation_id: &str, role: Role, content: &str) -> Message {
        self.state
            .lock()
            .unwrap()
            .store_message(conversation_id, role, content)
    }

    // ==================== Inspection ====================

    pub fn server_messages(&self, conversation_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn server_conversations(&self) -> Vec<Conversation> {
        self.state.lock().unwrap().conversations.clone()
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.op() == op).count()
    }

    // ==================== Knobs ====================

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: Op, error: ApiError) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Hold every call of `op` until released, once per call
    pub fn hold(&self, op: Op) -> Arc<Gate> {
        self.install_gate(op, None)
    }

    /// Hold calls of `op` about one id
    pub fn hold_for(&self, op: Op, target: &str) -> Arc<Gate> {
        self.install_gate(op, Some(target.to_string()))
    }

    fn install_gate(&self, op: Op, target: Option<String>) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap().insert((op, target), gate.clone());
        gate
    }

    /// Record the call, wait at any gate, then yield a queued failure if any
    async fn enter(&self, call: ApiCall) -> Result<(), ApiError> {
        let op = call.op();
        let gate = {
            let gates = self.gates.lock().unwrap();
            call.target()
                .and_then(|t| gates.get(&(op, Some(t.to_string()))))
                .or_else(|| gates.get(&(op, None)))
                .cloned()
        };
        self.calls.lock().unwrap().push(call);

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn conversation_not_found() -> ApiError {
    ApiError::not_found("Conversation not found")
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn create_user(&self, username: &str, email: &str) -> Result<User, ApiError> {
        self.enter(ApiCall::CreateUser {
            username: username.to_string(),
            email: email.to_string(),
        })
        .await?;
        if self.state.lock().unwrap().users.iter().any(|u| u.email == email) {
            return Err(ApiError::service(400, "Email already registered"));
        }
        Ok(self.add_user(username, email))
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        self.enter(ApiCall::GetUser {
            user_id: user_id.to_string(),
        })
        .await?;
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, ApiError> {
        self.enter(ApiCall::FindUserByEmail {
            email: email.to_string(),
        })
        .await?;
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| ApiError::not_found("User not found"))
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        self.enter(ApiCall::CreateConversation {
            user_id: user_id.to_string(),
            title: title.map(String::from),
        })
        .await?;
        if !self.state.lock().unwrap().users.iter().any(|u| u.id == user_id) {
            return Err(ApiError::not_found("User not found"));
        }
        Ok(self.seed_conversation(user_id, title.unwrap_or("Untitled"), &[]))
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        self.enter(ApiCall::GetConversation {
            conversation_id: conversation_id.to_string(),
        })
        .await?;
        let state = self.state.lock().unwrap();
        state
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(conversation_not_found)
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ApiError> {
        self.enter(ApiCall::ListConversations {
            user_id: user_id.to_string(),
        })
        .await?;
        let state = self.state.lock().unwrap();
        // Newest first, like the service
        Ok(state
            .conversations
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.enter(ApiCall::DeleteConversation {
            conversation_id: conversation_id.to_string(),
        })
        .await?;
        let mut state = self.state.lock().unwrap();
        let before = state.conversations.len();
        state.conversations.retain(|c| c.id != conversation_id);
        if state.conversations.len() == before {
            return Err(conversation_not_found());
        }
        state.messages.remove(conversation_id);
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        self.enter(ApiCall::ListMessages {
            conversation_id: conversation_id.to_string(),
        })
        .await?;
        let state = self.state.lock().unwrap();
        state
            .messages
            .get(conversation_id)
            .cloned()
            .ok_or_else(conversation_not_found)
    }

    async fn submit_query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        self.enter(ApiCall::SubmitQuery {
            query: request.query.clone(),
            conversation_id: request.conversation_id.clone(),
        })
        .await?;
        let answer = format!("Answer to: {}", request.query);
        if let Some(conversation_id) = &request.conversation_id {
            let mut state = self.state.lock().unwrap();
            if !state.messages.contains_key(conversation_id) {
                return Err(conversation_not_found());
            }
            state.store_message(conversation_id, Role::User, &request.query);
            state.store_message(conversation_id, Role::Assistant, &answer);
        }
        Ok(QueryResponse {
            response_text: answer,
            original_query: request.query.clone(),
            excerpts: None,
        })
    }
}
