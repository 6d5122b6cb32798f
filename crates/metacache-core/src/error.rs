//! Error types for metadata sessions and the cache.
//!
//! # Error Handling Strategy
//!
//! - [`SessionError`] is what a session implementation reports. The loaders recover
//!   [`SessionError::FeatureNotSupported`] locally as "no such metadata".
//!
//! - [`CacheError`] is what cache callers see. Only query failures, factory failures
//!   and cancellation reach them; [`CacheError::DuplicateName`] and
//!   [`CacheError::ParentUnresolved`] come from the low-level store API and are
//!   logged and absorbed by the loaders so that one malformed row does not abort a
//!   whole scan.

use thiserror::Error;

/// Failure reported by a [`crate::Session`] or [`crate::RowCursor`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The driver or data source does not provide this kind of metadata.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    #[error("SQL error: {message}")]
    Sql {
        message: String,
        sqlstate: Option<String>,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn sql(message: impl Into<String>) -> Self {
        Self::Sql {
            message: message.into(),
            sqlstate: None,
        }
    }

    pub fn is_feature_not_supported(&self) -> bool {
        matches!(self, Self::FeatureNotSupported(_))
    }
}

/// Failure surfaced by cache operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A metadata query failed. Cache state for the scope is left as it was.
    #[error("metadata query failed: {0}")]
    Query(#[source] SessionError),

    /// The caller cancelled the operation. Distinct from a failure.
    #[error("metadata load cancelled")]
    Cancelled,

    #[error("duplicate object name '{name}'")]
    DuplicateName { name: String },

    #[error("parent '{0}' is not in the parent collection")]
    ParentUnresolved(String),

    /// A row could not be turned into an object.
    #[error("cannot build object: {0}")]
    Factory(String),
}

impl CacheError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<SessionError> for CacheError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Cancelled => Self::Cancelled,
            other => Self::Query(other),
        }
    }
}
