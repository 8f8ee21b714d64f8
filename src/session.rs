//! Signed-in user and its persisted slot
//!
//! The user survives restarts in one JSON file under a fixed key. A slot that
//! cannot be parsed is deleted and treated as empty.

use crate::api::User;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Fixed key naming the persisted user slot
pub const USER_SLOT_KEY: &str = "rag_chatbot_user";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Single-slot file store for the signed-in user
#[derive(Debug, Clone)]
pub struct SessionSlot {
    path: PathBuf,
}

impl SessionSlot {
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{USER_SLOT_KEY}.json")),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored user. Missing or corrupt slots yield `None`; a corrupt
    /// slot is removed.
    pub fn load(&self) -> Option<User> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not read session slot");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Discarding corrupt session slot");
                if let Err(e) = self.clear() {
                    tracing::warn!(error = %e, "Failed to remove corrupt session slot");
                }
                None
            }
        }
    }

    /// Write `user` to the slot, creating its directory
    ///
    /// # Errors
    ///
    /// Fails when the slot cannot be written.
    pub fn save(&self, user: &User) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(user)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Remove the slot; a missing slot is not an error.
    ///
    /// # Errors
    ///
    /// Fails when the slot exists but cannot be removed.
    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The signed-in user, if any
pub struct Session {
    slot: SessionSlot,
    user: Mutex<Option<User>>,
}

impl Session {
    /// Restore whatever user the slot holds
    #[must_use]
    pub fn restore(slot: SessionSlot) -> Self {
        let user = slot.load();
        if let Some(user) = &user {
            tracing::info!(user_id = %user.id, "Restored session");
        }
        Self {
            slot,
            user: Mutex::new(user),
        }
    }

    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.user.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.user.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Persistence is best effort: the in-memory session is set regardless.
    pub fn sign_in(&self, user: User) {
        if let Err(e) = self.slot.save(&user) {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to persist session");
        }
        tracing::info!(user_id = %user.id, "Signed in");
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = Some(user);
    }

    pub fn sign_out(&self) {
        if let Err(e) = self.slot.clear() {
            tracing::warn!(error = %e, "Failed to clear session slot");
        }
        let previous = self.user.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(user) = previous {
            tracing::info!(user_id = %user.id, "Signed out");
        }
    }
}
