use super::LoaderParts;
use crate::composite::CompositeIndex;
use crate::error::CacheError;
use crate::types::{LoadContext, MetadataObject, ObjectHandle, ObjectId};
use std::collections::HashMap;
use tracing::{debug, info_span, trace};

/// Result of a targeted lookup.
pub(crate) enum LookupOutcome<P, C> {
    Found { parent: ObjectHandle<P>, object: C },
    NotFound,
    /// The factory has no targeted query, or the remote cannot run it. The
    /// caller must bulk load.
    Unsupported,
}

/// Answers a `get` from the index when no query may or need be issued.
///
/// `Some(answer)` when the object is cached, the scope is fully loaded, the name
/// is a known negative, or the call is cache-only. `None` when only the remote can
/// answer.
pub(crate) fn cached_answer<P: MetadataObject, C: MetadataObject>(
    ctx: &LoadContext,
    index: &CompositeIndex<P, C>,
    parent: Option<ObjectId>,
    name: &str,
) -> Option<Option<ObjectHandle<C>>> {
    if let Some(found) = index.find(parent, name) {
        trace!(name, "cache hit");
        return Some(Some(found));
    }
    if ctx.cache_only || index.is_fully_loaded(parent) || index.is_missing(parent, name) {
        trace!(name, cache_only = ctx.cache_only, "answered from cache without query");
        return Some(None);
    }
    None
}

/// Runs a query constrained to one named object.
pub(crate) struct LookupLoader<'a, O: ?Sized, P: MetadataObject, C: MetadataObject> {
    parts: LoaderParts<'a, O, P, C>,
}

impl<'a, O: ?Sized, P: MetadataObject, C: MetadataObject> LookupLoader<'a, O, P, C> {
    pub(crate) fn new(parts: LoaderParts<'a, O, P, C>) -> Self {
        Self { parts }
    }

    /// Looks `name` up under `filter`, or under any of `parents` when `filter` is
    /// `None`.
    ///
    /// On a case-insensitive remote the first row is accepted whatever its case.
    /// Otherwise only a row carrying exactly the requested name matches. Further
    /// rows of the matched object are folded in with `absorb_row`.
    pub(crate) fn find(
        &self,
        ctx: &LoadContext,
        owner: &O,
        filter: Option<&ObjectHandle<P>>,
        parents: &[ObjectHandle<P>],
        name: &str,
    ) -> Result<LookupOutcome<P, C>, CacheError> {
        let scope = filter.map(ObjectHandle::name);
        let _span =
            info_span!("lookup", parent = scope.as_deref().unwrap_or("*"), name).entered();

        let factory = self.parts.factory;
        let rules = self.parts.rules;
        let requested = rules.unquote(name).into_owned();
        let Some(statement) = factory.prepare_lookup(owner, filter, &requested) else {
            return Ok(LookupOutcome::Unsupported);
        };
        let Some(mut active) = self.parts.execute(ctx, owner, "Find metadata object", &statement)?
        else {
            return Ok(LookupOutcome::Unsupported);
        };

        let columns = factory.key_columns(filter);
        let parent_keys = match filter {
            Some(_) => HashMap::new(),
            None => self.parts.parent_keys(parents),
        };
        let mut found: Option<(ObjectHandle<P>, C)> = None;

        while let Some(row) = active.cursor.next_row()? {
            ctx.check_cancelled()?;

            if let Some((_, object)) = found.as_mut() {
                let same_object = row
                    .get_str(&columns.child)
                    .is_some_and(|child| rules.fold_case(child) == rules.fold_case(object.name()));
                if same_object {
                    factory.absorb_row(object, &row)?;
                }
                continue;
            }

            let parent = match filter {
                Some(parent) => parent.clone(),
                None => match self.parts.row_parent(&row, &columns, parents, &parent_keys) {
                    Ok(parent) => parent,
                    Err(err) => {
                        debug!(error = %err, "skipping lookup row");
                        continue;
                    }
                },
            };
            let Some(object) = factory.create(active.session.as_session(), owner, &parent, &row)?
            else {
                continue;
            };
            if rules.is_case_insensitive_match() || object.name() == requested {
                found = Some((parent, object));
            } else {
                debug!(candidate = object.name(), "discarding lookup row with different case");
            }
        }

        Ok(match found {
            Some((parent, object)) => LookupOutcome::Found { parent, object },
            None => {
                debug!("object not found");
                LookupOutcome::NotFound
            }
        })
    }
}
