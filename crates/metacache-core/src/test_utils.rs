//! Test utilities: a minimal object type and a scripted in-memory remote.

use crate::error::{CacheError, SessionError};
use crate::factory::{KeyColumns, ObjectFactory};
use crate::session::{RowCursor, Session, SessionProvider};
use crate::types::{CancelToken, MetadataObject, ObjectHandle, Row, Statement};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A named object with one mutable attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Named {
    pub name: String,
    pub comment: Option<String>,
    pub persisted: bool,
}

impl Named {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            persisted: true,
        }
    }

    pub fn with_comment(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::new(name)
        }
    }

    /// Created locally, not saved remotely yet.
    pub fn unsaved(name: impl Into<String>) -> Self {
        Self {
            persisted: false,
            ..Self::new(name)
        }
    }
}

impl MetadataObject for Named {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// Counters of what the loaders did with sessions and cursors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionLog {
    pub queries: usize,
    pub cursors_cancelled: usize,
    pub cursors_closed: usize,
    pub sessions_closed: usize,
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, Result<Vec<Row>, SessionError>>,
    statements: Vec<String>,
    log: SessionLog,
}

/// Answers statements (keyed by their display form) from canned responses.
/// Unscripted statements fail.
#[derive(Clone, Default)]
pub struct ScriptedRemote {
    script: Arc<Mutex<Script>>,
}

/// Read access to a [`ScriptedRemote`]'s counters.
pub struct RemoteLog {
    script: Arc<Mutex<Script>>,
}

impl RemoteLog {
    pub fn snapshot(&self) -> SessionLog {
        self.script.lock().log
    }
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, statement: &str, rows: Vec<Vec<(&str, &str)>>) {
        let rows = rows.into_iter().map(Row::from_pairs).collect();
        self.script
            .lock()
            .responses
            .insert(statement.to_string(), Ok(rows));
    }

    pub fn fail(&self, statement: &str, err: SessionError) {
        self.script
            .lock()
            .responses
            .insert(statement.to_string(), Err(err));
    }

    pub fn log(&self) -> RemoteLog {
        RemoteLog {
            script: Arc::clone(&self.script),
        }
    }

    pub fn queries(&self) -> usize {
        self.script.lock().log.queries
    }

    pub fn statements(&self) -> Vec<String> {
        self.script.lock().statements.clone()
    }

    pub fn open_session(&self) -> Box<dyn Session> {
        Box::new(ScriptedSession {
            script: Arc::clone(&self.script),
        })
    }
}

impl<O: ?Sized> SessionProvider<O> for ScriptedRemote {
    fn open(&self, _owner: &O, _purpose: &str) -> Result<Box<dyn Session>, SessionError> {
        Ok(self.open_session())
    }
}

struct ScriptedSession {
    script: Arc<Mutex<Script>>,
}

impl Session for ScriptedSession {
    fn query(
        &mut self,
        statement: &Statement,
        _cancel: &CancelToken,
    ) -> Result<Box<dyn RowCursor>, SessionError> {
        let key = statement.to_string();
        let mut script = self.script.lock();
        script.log.queries += 1;
        script.statements.push(key.clone());
        match script.responses.get(&key) {
            Some(Ok(rows)) => Ok(Box::new(ScriptedCursor {
                rows: rows.clone().into_iter(),
                script: Arc::clone(&self.script),
            })),
            Some(Err(err)) => Err(err.clone()),
            None => Err(SessionError::sql(format!("unscripted statement: {key}"))),
        }
    }

    fn close(&mut self) {
        self.script.lock().log.sessions_closed += 1;
    }
}

struct ScriptedCursor {
    rows: std::vec::IntoIter<Row>,
    script: Arc<Mutex<Script>>,
}

impl RowCursor for ScriptedCursor {
    fn next_row(&mut self) -> Result<Option<Row>, SessionError> {
        Ok(self.rows.next())
    }

    fn cancel(&mut self) {
        self.script.lock().log.cursors_cancelled += 1;
    }

    fn close(&mut self) {
        self.script.lock().log.cursors_closed += 1;
    }
}

/// Children read from `name` / `comment` columns, parents keyed by a `parent`
/// column. Rows with `kind = 'view'` are declined.
///
/// Statements: `SELECT children` (optionally bound to the parent name) and
/// `SELECT child` bound to the parent name and the requested name.
pub struct NamedFactory {
    pub lookups: bool,
}

impl Default for NamedFactory {
    fn default() -> Self {
        Self { lookups: true }
    }
}

impl<O: ?Sized> ObjectFactory<O, Named, Named> for NamedFactory {
    fn prepare_objects(&self, _owner: &O, parent: Option<&ObjectHandle<Named>>) -> Statement {
        match parent {
            Some(parent) => Statement::new("SELECT children").bind(parent.name()),
            None => Statement::new("SELECT children"),
        }
    }

    fn prepare_lookup(
        &self,
        _owner: &O,
        parent: Option<&ObjectHandle<Named>>,
        name: &str,
    ) -> Option<Statement> {
        if !self.lookups {
            return None;
        }
        Some(match parent {
            Some(parent) => Statement::new("SELECT child").bind(parent.name()).bind(name),
            None => Statement::new("SELECT child").bind(name),
        })
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<Named>>) -> KeyColumns {
        KeyColumns::new("parent", "name")
    }

    fn create(
        &self,
        _session: &mut dyn Session,
        _owner: &O,
        _parent: &ObjectHandle<Named>,
        row: &Row,
    ) -> Result<Option<Named>, CacheError> {
        if row.get_str("kind") == Some("view") {
            return Ok(None);
        }
        let name = row
            .get_str("name")
            .ok_or_else(|| CacheError::Factory("row without name".into()))?;
        Ok(Some(Named {
            name: name.to_string(),
            comment: row.get_str("comment").map(str::to_string),
            persisted: true,
        }))
    }
}
