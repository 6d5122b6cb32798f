//! Remote loads: one query per bulk load or targeted lookup.
//!
//! Loaders never touch the index. They open a session, stream the rows into
//! objects and hand the finished result back, so a failure or cancellation part way
//! through leaves the cache exactly as it was.

use crate::dialect::NameRules;
use crate::error::{CacheError, SessionError};
use crate::factory::{KeyColumns, ObjectFactory};
use crate::session::{CursorGuard, SessionGuard, SessionProvider};
use crate::types::{LoadContext, MetadataObject, ObjectHandle, Row, Statement};
use std::collections::HashMap;
use tracing::debug;

mod bulk;
mod lookup;

pub(crate) use bulk::BulkLoader;
pub(crate) use lookup::{cached_answer, LookupLoader, LookupOutcome};

/// A running query. The cursor is released before its session.
pub(crate) struct ActiveQuery {
    pub cursor: CursorGuard,
    pub session: SessionGuard,
}

/// What loaders need from their cache.
pub(crate) struct LoaderParts<'a, O: ?Sized, P: MetadataObject, C: MetadataObject> {
    pub factory: &'a dyn ObjectFactory<O, P, C>,
    pub sessions: &'a dyn SessionProvider<O>,
    pub rules: &'a dyn NameRules,
}

impl<O: ?Sized, P: MetadataObject, C: MetadataObject> LoaderParts<'_, O, P, C> {
    /// Opens a session and starts `statement`.
    ///
    /// `Ok(None)` means the data source does not support this kind of metadata.
    fn execute(
        &self,
        ctx: &LoadContext,
        owner: &O,
        purpose: &str,
        statement: &Statement,
    ) -> Result<Option<ActiveQuery>, CacheError> {
        ctx.check_cancelled()?;
        let mut session = match self.sessions.open(owner, purpose) {
            Ok(session) => SessionGuard::new(session),
            Err(err) => return recover_unsupported(err, statement).map(|()| None),
        };
        match session.query(statement, &ctx.cancel) {
            Ok(cursor) => Ok(Some(ActiveQuery {
                cursor: CursorGuard::new(cursor),
                session,
            })),
            Err(err) => recover_unsupported(err, statement).map(|()| None),
        }
    }

    /// Maps each parent's folded key to its handle.
    fn parent_keys(&self, parents: &[ObjectHandle<P>]) -> HashMap<String, ObjectHandle<P>> {
        parents
            .iter()
            .map(|parent| {
                let key = self.factory.parent_key(&parent.read());
                (self.rules.fold_case(&key).into_owned(), parent.clone())
            })
            .collect()
    }

    /// Parent of a row from an unfiltered query. A row that names no parent
    /// belongs to the only parent in scope, if there is exactly one.
    fn row_parent(
        &self,
        row: &Row,
        columns: &KeyColumns,
        parents: &[ObjectHandle<P>],
        parent_keys: &HashMap<String, ObjectHandle<P>>,
    ) -> Result<ObjectHandle<P>, CacheError> {
        let Some(key) = self.factory.row_parent_key(row, columns) else {
            return match parents {
                [only] => Ok(only.clone()),
                _ => Err(CacheError::ParentUnresolved(String::new())),
            };
        };
        let folded = self.rules.fold_case(&key).into_owned();
        match parent_keys.get(&folded) {
            Some(parent) => Ok(parent.clone()),
            None => Err(CacheError::ParentUnresolved(key)),
        }
    }
}

fn recover_unsupported(err: SessionError, statement: &Statement) -> Result<(), CacheError> {
    if err.is_feature_not_supported() {
        debug!(error = %err, statement = %statement, "metadata not supported by data source");
        Ok(())
    } else {
        Err(err.into())
    }
}
