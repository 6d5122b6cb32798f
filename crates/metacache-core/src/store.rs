//! Ordered, name-indexed collection of cached objects.

use crate::dialect::NameRules;
use crate::error::CacheError;
use crate::types::{MetadataObject, ObjectHandle};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Objects of one scope in load order, with a lazily built name index.
///
/// At most one object per folded name. The index is derived from the sequence and
/// rebuilt on first lookup after any mutation.
pub struct NamedObjectStore<T> {
    rules: Arc<dyn NameRules>,
    objects: Vec<ObjectHandle<T>>,
    index: OnceLock<HashMap<String, usize>>,
    fully_loaded: bool,
}

impl<T: MetadataObject> NamedObjectStore<T> {
    pub fn new(rules: Arc<dyn NameRules>) -> Self {
        Self {
            rules,
            objects: Vec::new(),
            index: OnceLock::new(),
            fully_loaded: false,
        }
    }

    /// Folded key of an object. Only unpersisted names may still carry quotes.
    fn key_of(&self, object: &T) -> String {
        if object.is_persisted() {
            self.rules.fold_case(object.name()).into_owned()
        } else {
            self.rules.lookup_key(object.name())
        }
    }

    fn index(&self) -> &HashMap<String, usize> {
        self.index.get_or_init(|| {
            self.objects
                .iter()
                .enumerate()
                .map(|(pos, handle)| (self.key_of(&handle.read()), pos))
                .collect()
        })
    }

    fn invalidate_index(&mut self) {
        self.index = OnceLock::new();
    }

    /// Appends an object. Fails if its folded name is already taken.
    pub fn insert(&mut self, handle: ObjectHandle<T>) -> Result<(), CacheError> {
        let key = self.key_of(&handle.read());
        if self.index().contains_key(&key) {
            return Err(CacheError::DuplicateName {
                name: handle.name(),
            });
        }
        let pos = self.objects.len();
        self.objects.push(handle);
        if let Some(index) = self.index.get_mut() {
            index.insert(key, pos);
        }
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<ObjectHandle<T>> {
        let key = self.rules.lookup_key(name);
        self.index()
            .get(&key)
            .and_then(|&pos| self.objects.get(pos))
            .cloned()
    }

    pub fn contains(&self, handle: &ObjectHandle<T>) -> bool {
        self.position(handle).is_some()
    }

    fn position(&self, handle: &ObjectHandle<T>) -> Option<usize> {
        self.objects.iter().position(|h| h.ptr_eq(handle))
    }

    /// Snapshot of the sequence. Later mutations do not affect it.
    pub fn all(&self) -> Vec<ObjectHandle<T>> {
        self.objects.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectHandle<T>> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    pub fn set_fully_loaded(&mut self, loaded: bool) {
        self.fully_loaded = loaded;
    }

    /// Removes `handle` and marks it removed.
    ///
    /// With `reset_all` the store also forgets every sibling and its loaded flag, so
    /// the next read reloads the whole scope. Returns every handle that left the
    /// store, the removed one first.
    pub fn remove(&mut self, handle: &ObjectHandle<T>, reset_all: bool) -> Vec<ObjectHandle<T>> {
        let mut evicted = Vec::new();
        if let Some(pos) = self.position(handle) {
            let removed = self.objects.remove(pos);
            removed.mark_removed();
            evicted.push(removed);
        }
        if reset_all {
            self.fully_loaded = false;
            evicted.append(&mut self.objects);
        }
        self.invalidate_index();
        evicted
    }

    /// Merges `fresh` into `existing` in place and returns `existing`.
    ///
    /// `existing` keeps its position. If the merge changed its folded name the index
    /// is rebuilt.
    pub fn replace(&mut self, existing: &ObjectHandle<T>, fresh: T) -> ObjectHandle<T> {
        let before = self.key_of(&existing.read());
        existing.merge(fresh);
        if self.key_of(&existing.read()) != before {
            self.invalidate_index();
        }
        existing.clone()
    }

    /// Drops every object and the loaded flag. Returns the dropped handles.
    pub fn clear(&mut self) -> Vec<ObjectHandle<T>> {
        self.fully_loaded = false;
        self.invalidate_index();
        std::mem::take(&mut self.objects)
    }
}

impl<T: MetadataObject> fmt::Debug for NamedObjectStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.objects.iter().map(ObjectHandle::name).collect();
        f.debug_struct("NamedObjectStore")
            .field("objects", &names)
            .field("fully_loaded", &self.fully_loaded)
            .finish()
    }
}
