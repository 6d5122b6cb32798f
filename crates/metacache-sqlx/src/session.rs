//! One pooled connection driven synchronously, and the translation of SQLx rows
//! and errors into the cache's terms.

use metacache_core::{CancelToken, Row, RowCursor, Session, SessionError, Statement, Value};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Any, Column, Row as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, trace};

/// How often a running query checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// SQLSTATE class 0A: feature not supported.
const FEATURE_NOT_SUPPORTED: &str = "0A000";

pub(crate) struct SqlxSession {
    runtime: Arc<Runtime>,
    connection: Option<PoolConnection<Any>>,
}

impl SqlxSession {
    pub(crate) fn new(runtime: Arc<Runtime>, connection: PoolConnection<Any>) -> Self {
        Self {
            runtime,
            connection: Some(connection),
        }
    }

    /// Hands the connection back to the pool. The pool spawns a task for that,
    /// so the drop must happen inside the runtime.
    fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _runtime = self.runtime.enter();
            drop(connection);
        }
    }
}

impl Drop for SqlxSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl Session for SqlxSession {
    fn query(
        &mut self,
        statement: &Statement,
        cancel: &CancelToken,
    ) -> Result<Box<dyn RowCursor>, SessionError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| SessionError::Connection("session already closed".into()))?;
        trace!(statement = %statement, "running metadata query");

        let query = bind_all(&statement.sql, &statement.params);
        let rows = self.runtime.block_on(async {
            tokio::select! {
                rows = query.fetch_all(&mut **connection) => rows.map_err(classify),
                () = cancelled(cancel) => Err(SessionError::Cancelled),
            }
        })?;

        let rows = convert_rows(&rows);
        debug!(rows = rows.len(), "metadata query returned");
        Ok(Box::new(SqlxCursor {
            rows: rows.into_iter(),
        }))
    }

    fn close(&mut self) {
        self.release();
    }
}

/// Rows fetched in full; the cache stops reading on cancellation.
struct SqlxCursor {
    rows: std::vec::IntoIter<Row>,
}

impl RowCursor for SqlxCursor {
    fn next_row(&mut self) -> Result<Option<Row>, SessionError> {
        Ok(self.rows.next())
    }
}

async fn cancelled(cancel: &CancelToken) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(CANCEL_POLL).await;
    }
}

fn bind_all<'q>(sql: &'q str, params: &'q [Value]) -> Query<'q, Any, AnyArguments<'q>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(value) => query.bind(*value),
            Value::Int(value) => query.bind(*value),
            Value::Float(value) => query.bind(*value),
            Value::Text(value) => query.bind(value.as_str()),
        };
    }
    query
}

fn convert_rows(rows: &[AnyRow]) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    rows.iter()
        .map(|row| {
            let values = (0..columns.len()).map(|index| decode(row, index)).collect();
            Row::new(Arc::clone(&columns), values)
        })
        .collect()
}

/// Decodes one cell, trying the representations the Any driver can produce.
fn decode(row: &AnyRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.into();
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return value.map(i64::from).into();
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.into();
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map_or(Value::Null, Value::Float);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.into();
    }
    Value::Null
}

/// Maps a driver error onto the session error the loaders understand.
pub(crate) fn classify(err: sqlx::Error) -> SessionError {
    match err {
        sqlx::Error::Database(db) => {
            let sqlstate = db.code().map(|code| code.into_owned());
            if sqlstate.as_deref() == Some(FEATURE_NOT_SUPPORTED) || mentions_unsupported(db.message())
            {
                SessionError::FeatureNotSupported(db.message().to_string())
            } else {
                SessionError::Sql {
                    message: db.message().to_string(),
                    sqlstate,
                }
            }
        }
        lost @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed) => SessionError::Connection(lost.to_string()),
        other => SessionError::sql(other.to_string()),
    }
}

fn mentions_unsupported(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("not supported") || message.contains("unsupported")
}
