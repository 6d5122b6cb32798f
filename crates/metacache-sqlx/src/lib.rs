//! Live database sessions and information-schema factories for `metacache-core`.
//!
//! [`SqlxSessionProvider`] runs metadata queries over an SQLx `AnyPool`
//! (PostgreSQL, MySQL, SQLite). The cache is synchronous, so the provider owns a
//! tokio runtime and blocks on it; do not call into a cache backed by it from
//! inside another async runtime.
//!
//! The [`catalog`] module carries ready-made schema, table and column factories.

mod database;
mod error;

pub use database::DatabaseType;
pub use error::ProviderError;

#[cfg(feature = "metadata-provider")]
pub mod catalog;
#[cfg(feature = "metadata-provider")]
mod provider;
#[cfg(feature = "metadata-provider")]
mod session;

#[cfg(feature = "metadata-provider")]
pub use catalog::CatalogCaches;
#[cfg(feature = "metadata-provider")]
pub use provider::{ProviderConfig, SqlxSessionProvider};
