//! Parent to children index with per-parent and global load state.
//!
//! Each known parent owns a [`NamedObjectStore`] of its children, a set of names
//! that targeted lookups did not find, and the time of its last completed load.
//! The flattened view used for unfiltered reads is the concatenation of the
//! per-parent stores in the order parents became known, so it can never disagree
//! with them.
//!
//! The global flag is only set by an unfiltered load, which also marks every parent
//! it saw as loaded. A parent that becomes known afterwards clears the global flag.

use crate::dialect::NameRules;
use crate::error::CacheError;
use crate::store::NamedObjectStore;
use crate::types::{MetadataObject, ObjectHandle, ObjectId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Children of every parent, produced by one unfiltered load.
pub(crate) struct BulkLoad<P, C> {
    /// The parent the load was restricted to, if any.
    pub filter: Option<ObjectHandle<P>>,
    /// One group per parent, in parent order. Parents without rows get empty groups.
    pub groups: Vec<(ObjectHandle<P>, Vec<C>)>,
}

struct ParentEntry<P, C> {
    parent: ObjectHandle<P>,
    children: NamedObjectStore<C>,
    missing: HashSet<String>,
    loaded_at: Option<DateTime<Utc>>,
}

impl<P: MetadataObject, C: MetadataObject> ParentEntry<P, C> {
    fn new(parent: ObjectHandle<P>, rules: Arc<dyn NameRules>) -> Self {
        Self {
            parent,
            children: NamedObjectStore::new(rules),
            missing: HashSet::new(),
            loaded_at: None,
        }
    }
}

pub struct CompositeIndex<P, C> {
    rules: Arc<dyn NameRules>,
    entries: IndexMap<ObjectId, ParentEntry<P, C>>,
    global_loaded: bool,
    global_missing: HashSet<String>,
    loaded_at: Option<DateTime<Utc>>,
}

impl<P: MetadataObject, C: MetadataObject> CompositeIndex<P, C> {
    pub fn new(rules: Arc<dyn NameRules>) -> Self {
        Self {
            rules,
            entries: IndexMap::new(),
            global_loaded: false,
            global_missing: HashSet::new(),
            loaded_at: None,
        }
    }

    fn entry_mut(&mut self, parent: &ObjectHandle<P>) -> &mut ParentEntry<P, C> {
        let id = parent.id();
        if !self.entries.contains_key(&id) {
            // the unfiltered view no longer covers every parent
            self.global_loaded = false;
        }
        let rules = Arc::clone(&self.rules);
        self.entries
            .entry(id)
            .or_insert_with(|| ParentEntry::new(parent.clone(), rules))
    }

    /// Children of `parent`, or the flattened view for `None`. Empty when nothing
    /// is cached yet; use [`Self::is_fully_loaded`] to tell the cases apart.
    pub fn children(&self, parent: Option<ObjectId>) -> Vec<ObjectHandle<C>> {
        match parent {
            Some(id) => self
                .entries
                .get(&id)
                .map(|entry| entry.children.all())
                .unwrap_or_default(),
            None => self
                .entries
                .values()
                .flat_map(|entry| entry.children.iter().cloned())
                .collect(),
        }
    }

    /// Child named `name` under `parent`, or the first match in load order for `None`.
    pub fn find(&self, parent: Option<ObjectId>, name: &str) -> Option<ObjectHandle<C>> {
        match parent {
            Some(id) => self.entries.get(&id)?.children.get_by_name(name),
            None => self
                .entries
                .values()
                .find_map(|entry| entry.children.get_by_name(name)),
        }
    }

    pub fn is_fully_loaded(&self, parent: Option<ObjectId>) -> bool {
        match parent {
            Some(id) => self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.children.is_fully_loaded()),
            None => self.global_loaded,
        }
    }

    pub fn loaded_at(&self, parent: Option<ObjectId>) -> Option<DateTime<Utc>> {
        match parent {
            Some(id) => self.entries.get(&id).and_then(|entry| entry.loaded_at),
            None => self.loaded_at,
        }
    }

    pub fn parents(&self) -> Vec<ObjectHandle<P>> {
        self.entries.values().map(|e| e.parent.clone()).collect()
    }

    pub fn parent_of(&self, child: &ObjectHandle<C>) -> Option<ObjectHandle<P>> {
        let id = child.parent_id()?;
        self.entries.get(&id).map(|entry| entry.parent.clone())
    }

    /// True when a targeted lookup already reported `name` as absent.
    pub fn is_missing(&self, parent: Option<ObjectId>, name: &str) -> bool {
        let key = self.rules.lookup_key(name);
        match parent {
            Some(id) => self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.missing.contains(&key)),
            None => self.global_missing.contains(&key),
        }
    }

    /// Records a negative lookup unless the name is cached after all.
    pub fn record_missing(&mut self, parent: Option<&ObjectHandle<P>>, name: &str) {
        let key = self.rules.lookup_key(name);
        match parent {
            Some(parent) => {
                let entry = self.entry_mut(parent);
                if entry.children.get_by_name(name).is_none() {
                    entry.missing.insert(key);
                }
            }
            None => {
                if self.find(None, name).is_none() {
                    self.global_missing.insert(key);
                }
            }
        }
    }

    fn forget_missing(&mut self, parent: ObjectId, name: &str) {
        let key = self.rules.lookup_key(name);
        self.global_missing.remove(&key);
        if let Some(entry) = self.entries.get_mut(&parent) {
            entry.missing.remove(&key);
        }
    }

    /// Adds one child under `parent`.
    pub fn insert(
        &mut self,
        parent: &ObjectHandle<P>,
        child: ObjectHandle<C>,
    ) -> Result<ObjectHandle<C>, CacheError> {
        let name = child.name();
        self.entry_mut(parent).children.insert(child.clone())?;
        self.forget_missing(parent.id(), &name);
        Ok(child)
    }

    /// Adds `object` under `parent`, merging into an equally named cached child.
    pub fn upsert(&mut self, parent: &ObjectHandle<P>, object: C) -> ObjectHandle<C> {
        let name = object.name().to_string();
        let entry = self.entry_mut(parent);
        let handle = match entry.children.get_by_name(&name) {
            Some(existing) => entry.children.replace(&existing, object),
            None => {
                let handle = ObjectHandle::with_parent(parent, object);
                if let Err(err) = entry.children.insert(handle.clone()) {
                    warn!(error = %err, parent = %parent.name(), "dropping duplicate child");
                }
                handle
            }
        };
        self.forget_missing(parent.id(), &name);
        handle
    }

    /// Assigns `parent`'s children from freshly built objects.
    ///
    /// Objects whose folded name is already cached are merged into the cached
    /// instance so holders keep their identity. With `mark_loaded` the objects are
    /// the complete child set: cached children absent from it are marked removed
    /// and returned, the negative lookups of the scope are dropped and the scope is
    /// flagged loaded. Without it the assignment is additive.
    pub fn bulk_assign(
        &mut self,
        parent: &ObjectHandle<P>,
        objects: Vec<C>,
        mark_loaded: bool,
    ) -> Vec<ObjectHandle<C>> {
        let rules = Arc::clone(&self.rules);
        let entry = self.entry_mut(parent);
        let was_loaded = entry.children.is_fully_loaded();
        let mut previous = entry.children.clear();
        let mut assigned = NamedObjectStore::new(Arc::clone(&rules));
        let mut found = Vec::with_capacity(objects.len());

        for object in objects {
            found.push(rules.lookup_key(object.name()));
            let key = rules.fold_case(object.name()).into_owned();
            let existing = previous.iter().position(|h| {
                let current = h.read();
                current.is_persisted() && rules.fold_case(current.name()).as_ref() == key.as_str()
            });
            let handle = match existing {
                Some(pos) => {
                    let handle = previous.remove(pos);
                    handle.merge(object);
                    handle
                }
                None => ObjectHandle::with_parent(parent, object),
            };
            if let Err(err) = assigned.insert(handle) {
                warn!(error = %err, parent = %parent.name(), "dropping duplicate child");
            }
        }

        let mut evicted = Vec::new();
        for handle in previous {
            if mark_loaded && handle.read().is_persisted() {
                handle.mark_removed();
                evicted.push(handle);
            } else if let Err(err) = assigned.insert(handle) {
                warn!(error = %err, parent = %parent.name(), "dropping duplicate child");
            }
        }

        assigned.set_fully_loaded(mark_loaded || was_loaded);
        entry.children = assigned;
        if mark_loaded {
            entry.missing.clear();
            entry.loaded_at = Some(Utc::now());
            self.global_missing.clear();
        } else {
            for key in &found {
                entry.missing.remove(key);
            }
            for key in &found {
                self.global_missing.remove(key);
            }
        }
        evicted
    }

    /// Installs the result of a bulk load in one step.
    ///
    /// An unfiltered load also forgets parents it did not see and sets the global
    /// flag. Returns every child that left the index.
    pub(crate) fn install(&mut self, load: BulkLoad<P, C>) -> Vec<ObjectHandle<C>> {
        let mut evicted = Vec::new();
        if load.filter.is_none() {
            let seen: HashSet<ObjectId> = load.groups.iter().map(|(p, _)| p.id()).collect();
            let stale: Vec<ObjectId> = self
                .entries
                .keys()
                .filter(|id| !seen.contains(id))
                .copied()
                .collect();
            for id in stale {
                evicted.extend(self.evict_parent(id));
            }
        }

        for (parent, objects) in load.groups {
            evicted.extend(self.bulk_assign(&parent, objects, true));
        }

        if load.filter.is_none() {
            self.global_loaded = true;
            self.global_missing.clear();
            self.loaded_at = Some(Utc::now());
        }
        evicted
    }

    /// Forgets the scope of `parent`, or everything for `None`.
    ///
    /// Negative lookups of the global view are dropped either way, since a name
    /// missing globally may appear in the invalidated scope.
    pub fn invalidate(&mut self, parent: Option<ObjectId>) -> Vec<ObjectHandle<C>> {
        self.global_missing.clear();
        self.global_loaded = false;
        self.loaded_at = None;
        match parent {
            Some(id) => self
                .entries
                .shift_remove(&id)
                .map(|mut entry| entry.children.clear())
                .unwrap_or_default(),
            None => self
                .entries
                .drain(..)
                .flat_map(|(_, mut entry)| entry.children.clear())
                .collect(),
        }
    }

    /// Drops the scope of a parent that left its own cache. Children of a parent
    /// deleted remotely are marked removed.
    pub fn evict_parent(&mut self, parent: ObjectId) -> Vec<ObjectHandle<C>> {
        let Some(mut entry) = self.entries.shift_remove(&parent) else {
            return Vec::new();
        };
        let children = entry.children.clear();
        if entry.parent.is_removed() {
            for child in &children {
                child.mark_removed();
            }
        }
        // the global view is still complete for the remaining parents
        children
    }

    /// Removes one child. See [`NamedObjectStore::remove`].
    pub fn remove(&mut self, child: &ObjectHandle<C>, reset_all: bool) -> Vec<ObjectHandle<C>> {
        let evicted = match self.entry_id_of(child) {
            Some(id) => {
                let entry = match self.entries.get_mut(&id) {
                    Some(entry) => entry,
                    None => return Vec::new(),
                };
                let evicted = entry.children.remove(child, reset_all);
                if reset_all {
                    entry.loaded_at = None;
                }
                evicted
            }
            None => {
                child.mark_removed();
                vec![child.clone()]
            }
        };
        if reset_all {
            self.global_loaded = false;
        }
        evicted
    }

    fn entry_id_of(&self, child: &ObjectHandle<C>) -> Option<ObjectId> {
        if let Some(id) = child.parent_id() {
            if self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.children.contains(child))
            {
                return Some(id);
            }
        }
        self.entries
            .iter()
            .find(|(_, entry)| entry.children.contains(child))
            .map(|(id, _)| *id)
    }

    /// Merges `fresh` into `existing`, wherever it is cached.
    pub fn replace(&mut self, existing: &ObjectHandle<C>, fresh: C) -> ObjectHandle<C> {
        let name = fresh.name().to_string();
        match self.entry_id_of(existing) {
            Some(id) => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.children.replace(existing, fresh);
                }
                self.forget_missing(id, &name);
            }
            None => existing.merge(fresh),
        }
        existing.clone()
    }

    /// Puts `child` back under `parent` if it was evicted, so a following reload
    /// merges into it instead of creating a new instance.
    pub fn ensure_present(&mut self, parent: &ObjectHandle<P>, child: &ObjectHandle<C>) {
        let entry = self.entry_mut(parent);
        if !entry.children.contains(child) && !child.is_removed() {
            // an equally named instance already cached wins
            if let Err(err) = entry.children.insert(child.clone()) {
                warn!(error = %err, parent = %parent.name(), "keeping cached instance");
            }
        }
    }
}

impl<P: MetadataObject, C: MetadataObject> fmt::Debug for CompositeIndex<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.entries.values() {
            map.entry(&entry.parent.name(), &entry.children);
        }
        map.finish()
    }
}
