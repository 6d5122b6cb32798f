pub mod cache;
pub mod composite;
pub mod dialect;
pub mod error;
pub mod factory;
mod loader;
mod refresh;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types
pub use cache::MetadataCache;
pub use composite::CompositeIndex;
pub use dialect::{CaseSensitivity, Dialect, IdentifierRules, NameRules, NormalizationStrategy};
pub use error::{CacheError, SessionError};
pub use factory::{DependentCache, FixedParents, KeyColumns, ObjectFactory, ParentSource};
pub use session::{RowCursor, Session, SessionProvider};
pub use store::NamedObjectStore;
pub use types::{
    CacheOptions, CancelToken, LoadContext, MetadataObject, ObjectHandle, ObjectId, Row,
    Statement, Value,
};

// Test utilities (must be at end of file)
#[cfg(test)]
pub mod test_utils;
