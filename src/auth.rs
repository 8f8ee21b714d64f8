//! Sign-in, registration and sign-out
//!
//! Identity is whatever the service returns for an email; the password is
//! checked locally for presence and length only and is never sent.

use crate::api::{ApiError, ChatApi, User};
use crate::session::Session;
use crate::store::ConversationStore;
use std::sync::Arc;

pub const MIN_PASSWORD_LEN: usize = 6;

const MISSING_FIELDS: &str = "Please fill in all fields";
const NOT_REGISTERED: &str = "User not found. Please register first.";

pub struct Auth {
    api: Arc<dyn ChatApi>,
    session: Arc<Session>,
    store: Arc<ConversationStore>,
}

impl Auth {
    #[must_use]
    pub fn new(api: Arc<dyn ChatApi>, session: Arc<Session>, store: Arc<ConversationStore>) -> Self {
        Self {
            api,
            session,
            store,
        }
    }

    /// Sign in as the user registered under `email`.
    ///
    /// # Errors
    ///
    /// Fails with a validation error for blank fields, and with
    /// "User not found. Please register first." for an unknown email.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let email = email.trim();
        if email.is_empty() || password.trim().is_empty() {
            return Err(ApiError::validation(MISSING_FIELDS));
        }

        let user = self.api.find_user_by_email(email).await.map_err(|e| {
            if e.is_not_found() {
                ApiError::new(e.kind, NOT_REGISTERED)
            } else {
                e
            }
        })?;

        self.start_session(user.clone());
        Ok(user)
    }

    /// Create a user and sign in as it.
    ///
    /// # Errors
    ///
    /// Fails with a validation error for blank fields or a short password, or
    /// with the service's reason when it refuses the user.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, ApiError> {
        let (username, email) = (username.trim(), email.trim());
        if username.is_empty() || email.is_empty() || password.trim().is_empty() {
            return Err(ApiError::validation(MISSING_FIELDS));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let user = self.api.create_user(username, email).await?;
        self.start_session(user.clone());
        Ok(user)
    }

    /// Sign out and drop whatever conversation was on screen
    pub fn logout(&self) {
        self.session.sign_out();
        self.store.deactivate();
    }

    /// A different user must not see the previous user's transcript
    fn start_session(&self, user: User) {
        let switching = self
            .session
            .current_user()
            .is_some_and(|current| current.id != user.id);
        if switching {
            self.store.deactivate();
        }
        self.session.sign_in(user);
    }
}
