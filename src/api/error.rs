//! Gateway error types

use thiserror::Error;

/// The single failure type every gateway call reports.
///
/// `message` is always human-readable and safe to show in a banner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    #[must_use]
    pub fn service(status: u16, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Service { status }, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::service(404, message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Validation, message)
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Service { status: 404 })
    }
}

/// Where a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// No response arrived (connect, DNS, reset)
    Network,
    /// Non-2xx response, or a 2xx body that could not be read
    Service { status: u16 },
    /// Rejected locally before any request was made
    Validation,
}

impl ApiErrorKind {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status } => Some(*status),
            Self::Network | Self::Validation => None,
        }
    }
}
