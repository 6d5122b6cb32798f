//! Re-reading one cached object while keeping its identity.
//!
//! A refresh reloads the object under its current (unquoted) name and merges the
//! fresh state into the instance callers already hold. When the object is gone
//! remotely it is removed from its parent's store and marked removed. When the
//! parent scope was never fully loaded a targeted query buys nothing, so the
//! scope is bulk reloaded instead, merging into existing instances by name.
//!
//! Children of a refreshed container are keyed by the container's identity, not
//! its name, so a rename-tolerant merge leaves them in place.

use crate::cache::MetadataCache;
use crate::error::CacheError;
use crate::loader::{BulkLoader, LookupLoader, LookupOutcome};
use crate::types::{LoadContext, MetadataObject, ObjectHandle};
use tracing::{debug, info_span};

impl<O, P, C> MetadataCache<O, P, C>
where
    O: ?Sized + 'static,
    P: MetadataObject,
    C: MetadataObject,
{
    /// Reloads `existing` and returns the same handle with fresh state.
    ///
    /// Check [`ObjectHandle::is_removed`] on the result to detect a remote
    /// deletion. On failure the cached state is left untouched.
    pub fn refresh(
        &self,
        ctx: &LoadContext,
        owner: &O,
        existing: &ObjectHandle<C>,
    ) -> Result<ObjectHandle<C>, CacheError> {
        if !existing.is_persisted() || ctx.cache_only {
            return Ok(existing.clone());
        }
        let name = {
            let current = existing.name();
            self.rules.unquote(&current).into_owned()
        };
        let _span = info_span!("refresh", name = %name).entered();

        let parent = self
            .index
            .read()
            .parent_of(existing)
            .or_else(|| existing.parent::<P>());
        let Some(parent) = parent else {
            debug!("parent no longer exists, object removed");
            self.remove_object(existing, false);
            return Ok(existing.clone());
        };

        let guard = self.acquire_load_lock(ctx)?;
        let scoped = self.index.read().is_fully_loaded(Some(parent.id()));
        let outcome = if scoped {
            LookupLoader::new(self.parts()).find(ctx, owner, Some(&parent), &[], &name)?
        } else {
            LookupOutcome::Unsupported
        };

        let evicted = match outcome {
            LookupOutcome::Found { object, .. } => {
                let mut index = self.index.write();
                index.ensure_present(&parent, existing);
                index.replace(existing, object);
                Vec::new()
            }
            LookupOutcome::NotFound => {
                debug!("object no longer exists remotely");
                self.index.write().remove(existing, false)
            }
            LookupOutcome::Unsupported => {
                let load =
                    BulkLoader::new(self.parts()).load(ctx, owner, Some(&parent), &[])?;
                let mut index = self.index.write();
                index.ensure_present(&parent, existing);
                index.install(load)
            }
        };
        drop(guard);
        self.notify_evicted(evicted);
        Ok(existing.clone())
    }
}
