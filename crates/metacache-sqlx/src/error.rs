use thiserror::Error;

/// Failure to set up a [`crate::SqlxSessionProvider`].
///
/// Query-time failures are reported as `metacache_core::SessionError` instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported database URL scheme: {0}")]
    UnsupportedUrl(String),

    #[error("failed to start metadata runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[cfg(feature = "metadata-provider")]
    #[error("failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),
}
