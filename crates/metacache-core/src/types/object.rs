//! Cached domain objects and the handles callers hold on to.

use parking_lot::{RwLock, RwLockReadGuard};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A structural metadata entity (table, column, constraint, ...).
pub trait MetadataObject: Send + Sync + 'static {
    /// The object's name as the remote reports it (unquoted once persisted).
    fn name(&self) -> &str;

    /// False for objects created locally and not yet saved remotely.
    fn is_persisted(&self) -> bool {
        true
    }

    /// Copies freshly fetched state into this instance.
    ///
    /// The default replaces every field. Implementations holding local-only
    /// state override this to keep it.
    fn merge_from(&mut self, fresh: Self)
    where
        Self: Sized,
    {
        *self = fresh;
    }
}

/// Identity of a live cached instance.
///
/// Two handles share an id exactly when they point at the same instance. The id
/// stays valid as long as any handle to the instance is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

struct ObjectCell<T> {
    parent: Option<Weak<dyn Any + Send + Sync>>,
    parent_id: Option<ObjectId>,
    removed: AtomicBool,
    state: RwLock<T>,
}

/// Stable handle to the canonical instance of a cached object.
///
/// Refreshes write through the handle, so holders keep seeing the same instance
/// with updated state. A handle outlives its removal from the cache; check
/// [`ObjectHandle::is_removed`].
pub struct ObjectHandle<T> {
    cell: Arc<ObjectCell<T>>,
}

impl<T: MetadataObject> ObjectHandle<T> {
    /// Wraps an object that has no parent (a top-level object).
    pub fn new(value: T) -> Self {
        Self::from_cell(ObjectCell {
            parent: None,
            parent_id: None,
            removed: AtomicBool::new(false),
            state: RwLock::new(value),
        })
    }

    /// Wraps an object owned by `parent`. The link back to the parent is weak.
    pub fn with_parent<P: MetadataObject>(parent: &ObjectHandle<P>, value: T) -> Self {
        let erased: Arc<dyn Any + Send + Sync> = parent.cell.clone();
        Self::from_cell(ObjectCell {
            parent: Some(Arc::downgrade(&erased)),
            parent_id: Some(parent.id()),
            removed: AtomicBool::new(false),
            state: RwLock::new(value),
        })
    }

    fn from_cell(cell: ObjectCell<T>) -> Self {
        Self {
            cell: Arc::new(cell),
        }
    }

    pub fn id(&self) -> ObjectId {
        ObjectId(Arc::as_ptr(&self.cell) as *const () as usize)
    }

    pub fn parent_id(&self) -> Option<ObjectId> {
        self.cell.parent_id
    }

    /// Resolves the owning parent, if it is still alive and of type `P`.
    pub fn parent<P: MetadataObject>(&self) -> Option<ObjectHandle<P>> {
        let parent = self.cell.parent.as_ref()?.upgrade()?;
        parent
            .downcast::<ObjectCell<P>>()
            .ok()
            .map(|cell| ObjectHandle { cell })
    }

    /// Shared access to the current state.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.cell.state.read()
    }

    pub fn name(&self) -> String {
        self.read().name().to_string()
    }

    pub fn is_persisted(&self) -> bool {
        self.read().is_persisted()
    }

    /// True once the object was found deleted remotely or removed explicitly.
    pub fn is_removed(&self) -> bool {
        self.cell.removed.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn merge(&self, fresh: T) {
        self.cell.state.write().merge_from(fresh);
    }

    pub(crate) fn mark_removed(&self) {
        self.cell.removed.store(true, Ordering::Release);
    }
}

impl<T> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> PartialEq for ObjectHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Eq for ObjectHandle<T> {}

impl<T: MetadataObject + fmt::Debug> fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("state", &*self.cell.state.read())
            .field("removed", &self.is_removed())
            .finish()
    }
}
