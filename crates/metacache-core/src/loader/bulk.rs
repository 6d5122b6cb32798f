use super::LoaderParts;
use crate::composite::BulkLoad;
use crate::error::CacheError;
use crate::types::{LoadContext, MetadataObject, ObjectHandle, ObjectId};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, info_span, warn};

/// Children collected for one parent while the rows stream in.
struct Group<P, C> {
    parent: ObjectHandle<P>,
    objects: Vec<C>,
    by_key: HashMap<String, usize>,
}

/// Runs the query for every child of every parent (or of one parent).
pub(crate) struct BulkLoader<'a, O: ?Sized, P: MetadataObject, C: MetadataObject> {
    parts: LoaderParts<'a, O, P, C>,
}

impl<'a, O: ?Sized, P: MetadataObject, C: MetadataObject> BulkLoader<'a, O, P, C> {
    pub(crate) fn new(parts: LoaderParts<'a, O, P, C>) -> Self {
        Self { parts }
    }

    /// Loads the children of `filter`, or of all `parents` when `filter` is `None`.
    ///
    /// Every parent in scope gets a group, empty if no row named it. Rows naming an
    /// unknown parent are skipped. A data source without this kind of metadata
    /// yields empty groups.
    pub(crate) fn load(
        &self,
        ctx: &LoadContext,
        owner: &O,
        filter: Option<&ObjectHandle<P>>,
        parents: &[ObjectHandle<P>],
    ) -> Result<BulkLoad<P, C>, CacheError> {
        let scope = filter.map(ObjectHandle::name);
        let _span = info_span!("bulk_load", parent = scope.as_deref().unwrap_or("*")).entered();

        let in_scope: Vec<ObjectHandle<P>> = match filter {
            Some(parent) => vec![parent.clone()],
            None => parents.to_vec(),
        };
        let mut groups: IndexMap<ObjectId, Group<P, C>> = in_scope
            .iter()
            .map(|parent| {
                let group = Group {
                    parent: parent.clone(),
                    objects: Vec::new(),
                    by_key: HashMap::new(),
                };
                (parent.id(), group)
            })
            .collect();

        let factory = self.parts.factory;
        let rules = self.parts.rules;
        let statement = factory.prepare_objects(owner, filter);
        let Some(mut active) = self.parts.execute(ctx, owner, "Load metadata objects", &statement)?
        else {
            return Ok(finish(filter, groups));
        };

        let columns = factory.key_columns(filter);
        let parent_keys = match filter {
            Some(_) => HashMap::new(),
            None => self.parts.parent_keys(&in_scope),
        };
        let mut rows = 0usize;

        while let Some(row) = active.cursor.next_row()? {
            ctx.check_cancelled()?;
            rows += 1;

            let parent = match filter {
                Some(parent) => parent.clone(),
                None => {
                    match self.parts.row_parent(&row, &columns, &in_scope, &parent_keys) {
                        Ok(parent) => parent,
                        Err(err) => {
                            debug!(error = %err, "skipping row");
                            continue;
                        }
                    }
                }
            };
            let Some(group) = groups.get_mut(&parent.id()) else {
                continue;
            };

            if let Some(name) = row.get_str(&columns.child) {
                let key = rules.fold_case(name).into_owned();
                if let Some(&pos) = group.by_key.get(&key) {
                    absorb_or_drop(factory.absorb_row(&mut group.objects[pos], &row)?, name);
                    continue;
                }
            }

            let Some(object) = factory.create(active.session.as_session(), owner, &parent, &row)?
            else {
                continue;
            };
            let key = rules.fold_case(object.name()).into_owned();
            if group.by_key.contains_key(&key) {
                absorb_or_drop(false, object.name());
                continue;
            }
            group.by_key.insert(key, group.objects.len());
            group.objects.push(object);
        }

        let load = finish(filter, groups);
        let objects: usize = load.groups.iter().map(|(_, objects)| objects.len()).sum();
        debug!(rows, objects, parents = load.groups.len(), "bulk load finished");
        Ok(load)
    }
}

fn absorb_or_drop(absorbed: bool, name: &str) {
    if !absorbed {
        let err = CacheError::DuplicateName {
            name: name.to_string(),
        };
        warn!(error = %err, "dropping duplicate row");
    }
}

fn finish<P, C>(
    filter: Option<&ObjectHandle<P>>,
    groups: IndexMap<ObjectId, Group<P, C>>,
) -> BulkLoad<P, C> {
    BulkLoad {
        filter: filter.cloned(),
        groups: groups
            .into_values()
            .map(|group| (group.parent, group.objects))
            .collect(),
    }
}
