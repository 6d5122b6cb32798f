//! Value types shared by the stores, loaders and the cache facade.
//!
//! Objects live behind [`ObjectHandle`]s so that refreshes write through to every
//! holder. Rows and statements are the currency of the session capability.

mod object;
mod options;
mod row;

pub use object::{MetadataObject, ObjectHandle, ObjectId};
pub use options::{CacheOptions, CancelToken, LoadContext};
pub use row::{Row, Statement, Value};
