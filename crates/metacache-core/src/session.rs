//! The consumed "run a metadata query, iterate rows" capability.
//!
//! A [`SessionProvider`] opens a [`Session`] for one load call. The loaders wrap the
//! session and each cursor in guards so they are released on every exit path,
//! including errors and cancellation.

use crate::error::SessionError;
use crate::types::{CancelToken, Row, Statement};
use std::ops::{Deref, DerefMut};

/// Opens metadata sessions against the remote owned by `O`.
pub trait SessionProvider<O: ?Sized>: Send + Sync {
    /// `purpose` is a short human-readable label ("Load tables") for logs.
    fn open(&self, owner: &O, purpose: &str) -> Result<Box<dyn Session>, SessionError>;
}

/// One open metadata session. Held by a single load call.
pub trait Session: Send {
    /// Runs `statement`. Implementations should abort promptly once `cancel` fires
    /// and report [`SessionError::Cancelled`].
    fn query(
        &mut self,
        statement: &Statement,
        cancel: &CancelToken,
    ) -> Result<Box<dyn RowCursor>, SessionError>;

    /// Releases the session. Called exactly once by the loaders.
    fn close(&mut self) {}
}

/// Forward-only iterator over a result set.
pub trait RowCursor: Send {
    fn next_row(&mut self) -> Result<Option<Row>, SessionError>;

    /// Aborts a query whose rows are no longer wanted.
    fn cancel(&mut self) {}

    fn close(&mut self) {}
}

/// Closes the wrapped session on drop.
pub(crate) struct SessionGuard {
    inner: Box<dyn Session>,
}

impl SessionGuard {
    pub(crate) fn new(inner: Box<dyn Session>) -> Self {
        Self { inner }
    }

    pub(crate) fn as_session(&mut self) -> &mut dyn Session {
        self.inner.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Cancels a cursor abandoned before exhaustion, and always closes it.
pub(crate) struct CursorGuard {
    inner: Box<dyn RowCursor>,
    exhausted: bool,
}

impl CursorGuard {
    pub(crate) fn new(inner: Box<dyn RowCursor>) -> Self {
        Self {
            inner,
            exhausted: false,
        }
    }

    pub(crate) fn next_row(&mut self) -> Result<Option<Row>, SessionError> {
        let row = self.inner.next_row();
        if matches!(row, Ok(None)) {
            self.exhausted = true;
        }
        row
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        if !self.exhausted {
            self.inner.cancel();
        }
        self.inner.close();
    }
}

impl Deref for SessionGuard {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}
