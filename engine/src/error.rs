//! Error taxonomy for catalog calls.
//!
//! Every remote call made by the engine fails with one of three kinds, and
//! the reconciler decides what to do with an item purely by matching on the
//! kind.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single call against the remote catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Network blip, rate limit or timeout. Safe to retry.
    #[error("transient catalog error: {message}")]
    Transient {
        message: String,
        /// Delay requested by the remote service (e.g. a `Retry-After` header).
        retry_after: Option<Duration>,
    },

    /// The referenced product or collection no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication, permission or malformed request. Never retried.
    #[error("fatal catalog error: {0}")]
    Fatal(String),
}

impl CatalogError {
    /// A transient error without a server-provided retry hint.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// A transient error carrying the delay the remote service asked for.
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for catalog calls.
pub type Result<T> = std::result::Result<T, CatalogError>;
