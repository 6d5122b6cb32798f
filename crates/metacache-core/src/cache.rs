//! The cache facade: get-all, get, refresh and invalidate over one object type.
//!
//! # Concurrency
//!
//! The index sits behind a read/write lock that is never held across remote I/O.
//! Reads of a loaded scope only take the read lock. Remote loads are serialised
//! by a per-cache load lock: a caller that finds a load in flight waits for it and
//! then re-checks the index, so the same scope is not queried twice. Waiting polls
//! the caller's cancellation token every [`CacheOptions::lock_wait_ms`].
//!
//! Dependent caches are notified of evicted parents only after both locks are
//! released.

use crate::composite::CompositeIndex;
use crate::dialect::{Dialect, IdentifierRules, NameRules};
use crate::error::CacheError;
use crate::factory::{DependentCache, ObjectFactory, ParentSource};
use crate::loader::{cached_answer, BulkLoader, LoaderParts, LookupLoader, LookupOutcome};
use crate::session::SessionProvider;
use crate::types::{CacheOptions, LoadContext, MetadataObject, ObjectHandle, ObjectId};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::trace;

/// Cache of the `C` children of `P` parents under owner `O`.
pub struct MetadataCache<O: ?Sized, P: MetadataObject, C: MetadataObject> {
    pub(crate) factory: Arc<dyn ObjectFactory<O, P, C>>,
    pub(crate) sessions: Arc<dyn SessionProvider<O>>,
    pub(crate) parents: Arc<dyn ParentSource<O, P>>,
    pub(crate) rules: Arc<dyn NameRules>,
    pub(crate) options: CacheOptions,
    pub(crate) index: RwLock<CompositeIndex<P, C>>,
    load_lock: Mutex<()>,
    dependents: Mutex<Vec<Weak<dyn DependentCache>>>,
}

impl<O, P, C> MetadataCache<O, P, C>
where
    O: ?Sized + 'static,
    P: MetadataObject,
    C: MetadataObject,
{
    /// Creates a cache whose names follow `dialect`, adjusted by
    /// [`CacheOptions::case_sensitivity`].
    pub fn new(
        factory: Arc<dyn ObjectFactory<O, P, C>>,
        sessions: Arc<dyn SessionProvider<O>>,
        parents: Arc<dyn ParentSource<O, P>>,
        dialect: Dialect,
        options: CacheOptions,
    ) -> Arc<Self> {
        let mut rules = IdentifierRules::new(dialect);
        if let Some(case_sensitivity) = options.case_sensitivity {
            rules = rules.with_case_sensitivity(case_sensitivity);
        }
        Self::with_rules(factory, sessions, parents, Arc::new(rules), options)
    }

    /// Creates a cache with custom naming rules.
    pub fn with_rules(
        factory: Arc<dyn ObjectFactory<O, P, C>>,
        sessions: Arc<dyn SessionProvider<O>>,
        parents: Arc<dyn ParentSource<O, P>>,
        rules: Arc<dyn NameRules>,
        options: CacheOptions,
    ) -> Arc<Self> {
        let cache = Arc::new(Self {
            factory,
            sessions,
            parents: Arc::clone(&parents),
            index: RwLock::new(CompositeIndex::new(Arc::clone(&rules))),
            rules,
            options,
            load_lock: Mutex::new(()),
            dependents: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&cache);
        let weak: Weak<dyn DependentCache> = weak;
        parents.register_dependent(weak);
        cache
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn rules(&self) -> &Arc<dyn NameRules> {
        &self.rules
    }

    pub(crate) fn parts(&self) -> LoaderParts<'_, O, P, C> {
        LoaderParts {
            factory: self.factory.as_ref(),
            sessions: self.sessions.as_ref(),
            rules: self.rules.as_ref(),
        }
    }

    /// Every child of `parent`, or of all parents for `None`, in load order.
    ///
    /// Issues at most one query, and none once the scope is loaded. An empty result
    /// is a valid answer for a container without children.
    pub fn get_all(
        &self,
        ctx: &LoadContext,
        owner: &O,
        parent: Option<&ObjectHandle<P>>,
    ) -> Result<Vec<ObjectHandle<C>>, CacheError> {
        let scope = parent.map(ObjectHandle::id);
        {
            let index = self.index.read();
            if ctx.cache_only || index.is_fully_loaded(scope) {
                trace!(cache_only = ctx.cache_only, "serving children from cache");
                return Ok(index.children(scope));
            }
        }
        self.load_scope(ctx, owner, parent, false)?;
        Ok(self.index.read().children(scope))
    }

    /// The child named `name`. `Ok(None)` when it does not exist remotely.
    pub fn get(
        &self,
        ctx: &LoadContext,
        owner: &O,
        parent: Option<&ObjectHandle<P>>,
        name: &str,
    ) -> Result<Option<ObjectHandle<C>>, CacheError> {
        let scope = parent.map(ObjectHandle::id);
        if let Some(answer) = cached_answer(ctx, &self.index.read(), scope, name) {
            return Ok(answer);
        }
        if !self.options.targeted_lookups {
            self.load_scope(ctx, owner, parent, false)?;
            return Ok(self.index.read().find(scope, name));
        }

        let guard = self.acquire_load_lock(ctx)?;
        // another caller may have loaded the scope while we waited
        if let Some(answer) = cached_answer(ctx, &self.index.read(), scope, name) {
            return Ok(answer);
        }
        let parents = match parent {
            Some(_) => Vec::new(),
            None => self.parents.parents(ctx, owner)?,
        };
        let outcome =
            LookupLoader::new(self.parts()).find(ctx, owner, parent, &parents, name)?;
        match outcome {
            LookupOutcome::Found { parent, object } => {
                Ok(Some(self.index.write().upsert(&parent, object)))
            }
            LookupOutcome::NotFound => {
                if self.options.negative_lookups {
                    self.index.write().record_missing(parent, name);
                }
                Ok(None)
            }
            LookupOutcome::Unsupported => {
                let evicted = self.bulk_load_locked(ctx, owner, parent)?;
                drop(guard);
                self.notify_evicted(evicted);
                Ok(self.index.read().find(scope, name))
            }
        }
    }

    /// Forgets the children of `parent`, or everything for `None`, including the
    /// negative lookups of that region. The next read queries again.
    pub fn invalidate(&self, parent: Option<&ObjectHandle<P>>) {
        let evicted = self.index.write().invalidate(parent.map(ObjectHandle::id));
        self.notify_evicted(evicted);
    }

    /// Registers a locally created object under `parent` without I/O.
    pub fn cache_object(
        &self,
        parent: &ObjectHandle<P>,
        object: C,
    ) -> Result<ObjectHandle<C>, CacheError> {
        let handle = ObjectHandle::with_parent(parent, object);
        self.index.write().insert(parent, handle)
    }

    /// Removes `object` from the cache and marks it removed.
    ///
    /// With `reset_all` the whole scope of its parent is forgotten as well.
    pub fn remove_object(&self, object: &ObjectHandle<C>, reset_all: bool) {
        let evicted = self.index.write().remove(object, reset_all);
        self.notify_evicted(evicted);
    }

    /// Assigns the complete child set of `parent` and marks it loaded.
    pub fn set_cache(&self, parent: &ObjectHandle<P>, objects: Vec<C>) -> Vec<ObjectHandle<C>> {
        let (evicted, children) = {
            let mut index = self.index.write();
            let evicted = index.bulk_assign(parent, objects, true);
            (evicted, index.children(Some(parent.id())))
        };
        self.notify_evicted(evicted);
        children
    }

    pub fn cached_children(&self, parent: Option<&ObjectHandle<P>>) -> Vec<ObjectHandle<C>> {
        self.index.read().children(parent.map(ObjectHandle::id))
    }

    pub fn cached_object(
        &self,
        parent: Option<&ObjectHandle<P>>,
        name: &str,
    ) -> Option<ObjectHandle<C>> {
        self.index.read().find(parent.map(ObjectHandle::id), name)
    }

    /// False until the scope was loaded by any path.
    pub fn is_fully_loaded(&self, parent: Option<&ObjectHandle<P>>) -> bool {
        self.index.read().is_fully_loaded(parent.map(ObjectHandle::id))
    }

    /// When the scope's last complete load finished.
    pub fn loaded_at(&self, parent: Option<&ObjectHandle<P>>) -> Option<DateTime<Utc>> {
        self.index.read().loaded_at(parent.map(ObjectHandle::id))
    }

    /// Bulk loads a scope unless it is loaded by the time the load lock is ours.
    /// `force` reloads regardless.
    pub(crate) fn load_scope(
        &self,
        ctx: &LoadContext,
        owner: &O,
        parent: Option<&ObjectHandle<P>>,
        force: bool,
    ) -> Result<(), CacheError> {
        let guard = self.acquire_load_lock(ctx)?;
        if !force && self.index.read().is_fully_loaded(parent.map(ObjectHandle::id)) {
            return Ok(());
        }
        let evicted = self.bulk_load_locked(ctx, owner, parent)?;
        drop(guard);
        self.notify_evicted(evicted);
        Ok(())
    }

    /// Runs a bulk load and installs it. The caller holds the load lock.
    pub(crate) fn bulk_load_locked(
        &self,
        ctx: &LoadContext,
        owner: &O,
        parent: Option<&ObjectHandle<P>>,
    ) -> Result<Vec<ObjectHandle<C>>, CacheError> {
        let parents = match parent {
            Some(_) => Vec::new(),
            None => self.parents.parents(ctx, owner)?,
        };
        let load = BulkLoader::new(self.parts()).load(ctx, owner, parent, &parents)?;
        Ok(self.index.write().install(load))
    }

    pub(crate) fn acquire_load_lock(&self, ctx: &LoadContext) -> Result<MutexGuard<'_, ()>, CacheError> {
        let slice = Duration::from_millis(self.options.lock_wait_ms.max(1));
        loop {
            ctx.check_cancelled()?;
            if let Some(guard) = self.load_lock.try_lock_for(slice) {
                return Ok(guard);
            }
            trace!("waiting for in-flight metadata load");
        }
    }

    /// Tells dependent caches that `evicted` left this cache.
    pub(crate) fn notify_evicted(&self, evicted: Vec<ObjectHandle<C>>) {
        if evicted.is_empty() {
            return;
        }
        let dependents: Vec<Arc<dyn DependentCache>> = {
            let mut registered = self.dependents.lock();
            registered.retain(|weak| weak.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for dependent in &dependents {
            for handle in &evicted {
                dependent.parent_evicted(handle.id());
            }
        }
    }
}

impl<O, P, C> ParentSource<O, C> for MetadataCache<O, P, C>
where
    O: ?Sized + 'static,
    P: MetadataObject,
    C: MetadataObject,
{
    fn parents(&self, ctx: &LoadContext, owner: &O) -> Result<Vec<ObjectHandle<C>>, CacheError> {
        self.get_all(ctx, owner, None)
    }

    fn register_dependent(&self, dependent: Weak<dyn DependentCache>) {
        self.dependents.lock().push(dependent);
    }
}

impl<O, P, C> DependentCache for MetadataCache<O, P, C>
where
    O: ?Sized + 'static,
    P: MetadataObject,
    C: MetadataObject,
{
    fn parent_evicted(&self, parent: ObjectId) {
        let evicted = self.index.write().evict_parent(parent);
        self.notify_evicted(evicted);
    }
}

impl<O: ?Sized, P: MetadataObject, C: MetadataObject> std::fmt::Debug for MetadataCache<O, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("rules", &self.rules)
            .field("options", &self.options)
            .field("index", &*self.index.read())
            .finish()
    }
}
