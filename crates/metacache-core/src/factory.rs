//! Capabilities a cache consumes to build objects and find their parents.

use crate::error::CacheError;
use crate::session::Session;
use crate::types::{LoadContext, MetadataObject, ObjectHandle, ObjectId, Row, Statement};
use std::fmt;
use std::sync::Weak;

/// Result-set columns that identify a row's parent and the child it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumns {
    /// Column holding the parent key. `None` when the query is always filtered to
    /// one parent.
    pub parent: Option<String>,
    pub child: String,
}

impl KeyColumns {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            child: child.into(),
        }
    }

    pub fn child_only(child: impl Into<String>) -> Self {
        Self {
            parent: None,
            child: child.into(),
        }
    }
}

/// Builds the queries of one object type and turns their rows into objects
/// owned by parents of type `P`.
pub trait ObjectFactory<O: ?Sized, P, C>: Send + Sync
where
    P: MetadataObject,
    C: MetadataObject,
{
    /// Query for the children of `parent`, or of every parent when `None`.
    fn prepare_objects(&self, owner: &O, parent: Option<&ObjectHandle<P>>) -> Statement;

    /// Query for a single named child. `None` when the remote has no cheaper way
    /// than a bulk load.
    fn prepare_lookup(
        &self,
        owner: &O,
        parent: Option<&ObjectHandle<P>>,
        name: &str,
    ) -> Option<Statement> {
        let _ = (owner, parent, name);
        None
    }

    fn key_columns(&self, parent: Option<&ObjectHandle<P>>) -> KeyColumns;

    /// Key a parent is referenced by in result rows.
    fn parent_key(&self, parent: &P) -> String {
        parent.name().to_string()
    }

    /// Parent key carried by `row`.
    fn row_parent_key(&self, row: &Row, columns: &KeyColumns) -> Option<String> {
        columns
            .parent
            .as_deref()
            .and_then(|column| row.get_str(column))
            .map(str::to_string)
    }

    /// Builds one object. `Ok(None)` skips the row.
    fn create(
        &self,
        session: &mut dyn Session,
        owner: &O,
        parent: &ObjectHandle<P>,
        row: &Row,
    ) -> Result<Option<C>, CacheError>;

    /// Folds a further row of an object made of several rows (an index made of its
    /// columns) into `object`. Returns false when the row is a genuine duplicate.
    fn absorb_row(&self, object: &mut C, row: &Row) -> Result<bool, CacheError> {
        let _ = (object, row);
        Ok(false)
    }
}

/// Supplies the parents a cache's children hang off.
pub trait ParentSource<O: ?Sized, P: MetadataObject>: Send + Sync {
    fn parents(&self, ctx: &LoadContext, owner: &O) -> Result<Vec<ObjectHandle<P>>, CacheError>;

    /// Subscribes `dependent` to parent evictions. Static sources never evict.
    fn register_dependent(&self, dependent: Weak<dyn DependentCache>) {
        let _ = dependent;
    }
}

/// A cache keyed by objects of another cache.
pub trait DependentCache: Send + Sync {
    /// The parent `parent` left its cache. Its scope is no longer valid.
    fn parent_evicted(&self, parent: ObjectId);
}

/// A fixed parent list, typically the single root of a top-level cache.
#[derive(Clone)]
pub struct FixedParents<P> {
    parents: Vec<ObjectHandle<P>>,
}

impl<P: MetadataObject> FixedParents<P> {
    pub fn new(parents: Vec<ObjectHandle<P>>) -> Self {
        Self { parents }
    }

    pub fn single(parent: ObjectHandle<P>) -> Self {
        Self::new(vec![parent])
    }
}

impl<P: MetadataObject + fmt::Debug> fmt::Debug for FixedParents<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedParents")
            .field("parents", &self.parents)
            .finish()
    }
}

impl<O: ?Sized, P: MetadataObject> ParentSource<O, P> for FixedParents<P> {
    fn parents(&self, _ctx: &LoadContext, _owner: &O) -> Result<Vec<ObjectHandle<P>>, CacheError> {
        Ok(self.parents.clone())
    }
}
