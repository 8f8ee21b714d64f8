//! rag_chat - client for a question-answering assistant
//!
//! Keeps the conversation on screen consistent while loads, sends and deletes
//! race each other. The remote service does the answering; this crate decides
//! what the transcript shows.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod conversations;
pub mod send;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ChatClient;
pub use config::ClientConfig;
