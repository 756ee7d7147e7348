/// Connection Management Module
///
/// `LazyConnection` holds at most one raw connection and only opens it when a
/// cursor is first requested. `Cursor` is a single-statement view over that
/// connection which is closed on every exit path.

use super::driver::{ConnectionFactory, PlaceholderStyle, RawConnection, Value};
use crate::core::{DbError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Defers opening a raw connection until the first cursor is requested.
pub struct LazyConnection {
    factory: Arc<dyn ConnectionFactory>,
    connection: Option<Box<dyn RawConnection>>,
}

impl LazyConnection {
    /// Creates an empty lazy connection. Nothing is opened yet.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        LazyConnection {
            factory,
            connection: None,
        }
    }

    /// Whether a raw connection is currently materialized.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Identifier of the materialized raw connection, if any.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.id())
    }

    /// Returns a cursor on the raw connection, opening it first if needed.
    /// Later calls reuse the same raw connection until `cleanup`.
    pub fn cursor(&mut self) -> Result<Cursor<'_>> {
        if self.connection.is_none() {
            let connection = self.factory.connect()?;
            info!(connection = connection.id(), "[DB] open connection");
            self.connection = Some(connection);
        }

        let connection = self
            .connection
            .as_mut()
            .ok_or(DbError::NotInitialized("connection"))?;
        Ok(Cursor::new(&mut **connection))
    }

    /// Commits on the raw connection. Fails if no cursor was ever requested.
    pub fn commit(&mut self) -> Result<()> {
        self.raw_mut()?.commit()
    }

    /// Rolls back on the raw connection. Fails if no cursor was ever requested.
    pub fn rollback(&mut self) -> Result<()> {
        self.raw_mut()?.rollback()
    }

    /// Closes the raw connection if one is open. Idempotent: the reference is
    /// cleared before closing, so a second call finds nothing to close.
    pub fn cleanup(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            info!(connection = connection.id(), "[DB] close connection");
            connection.close()?;
        }
        Ok(())
    }

    fn raw_mut(&mut self) -> Result<&mut (dyn RawConnection + 'static)> {
        self.connection
            .as_deref_mut()
            .ok_or(DbError::NotInitialized("connection"))
    }
}

impl Drop for LazyConnection {
    fn drop(&mut self) {
        if let Some(connection) = &self.connection {
            warn!(
                connection = connection.id(),
                "[DB] lazy connection dropped without cleanup"
            );
        }
    }
}

/// A single-statement cursor. Results are buffered at execute time; the
/// cursor is closed explicitly or when it goes out of scope.
pub struct Cursor<'a> {
    connection: &'a mut dyn RawConnection,
    description: Option<Vec<String>>,
    rows: VecDeque<Vec<Value>>,
    rowcount: usize,
    closed: bool,
}

impl<'a> Cursor<'a> {
    fn new(connection: &'a mut dyn RawConnection) -> Self {
        Cursor {
            connection,
            description: None,
            rows: VecDeque::new(),
            rowcount: 0,
            closed: false,
        }
    }

    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.connection.placeholder_style()
    }

    /// Runs `sql` (already in the driver's native marker) with `args`.
    pub fn execute(&mut self, sql: &str, args: &[Value]) -> Result<()> {
        if self.closed {
            return Err(DbError::Query("cursor is closed".to_string()));
        }
        let outcome = self.connection.execute(sql, args)?;
        self.rowcount = outcome.rows_affected;
        self.description = outcome.columns;
        self.rows = outcome.rows.into();
        Ok(())
    }

    /// Rows affected by the last mutating statement.
    pub fn rowcount(&self) -> usize {
        self.rowcount
    }

    /// Column names of the last statement, `None` if it returned no rows.
    pub fn description(&self) -> Option<&[String]> {
        self.description.as_deref()
    }

    pub fn fetch_one(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }

    pub fn fetch_all(&mut self) -> Vec<Vec<Value>> {
        self.rows.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.rows.clear();
            self.description = None;
            debug!(connection = self.connection.id(), "[DB] cursor closed");
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingFactory;

    #[test]
    fn test_connection_is_lazy() {
        let factory = RecordingFactory::new();
        let mut lazy = LazyConnection::new(factory.shared());
        assert!(!lazy.is_open());
        assert_eq!(factory.opened(), 0);

        lazy.cursor().unwrap();
        assert!(lazy.is_open());
        assert_eq!(factory.opened(), 1);
        lazy.cleanup().unwrap();
    }

    #[test]
    fn test_cursor_reuses_connection() {
        let factory = RecordingFactory::new();
        let mut lazy = LazyConnection::new(factory.shared());

        lazy.cursor().unwrap();
        let first = lazy.connection_id().map(String::from);
        lazy.cursor().unwrap();
        assert_eq!(lazy.connection_id().map(String::from), first);
        assert_eq!(factory.opened(), 1);
        lazy.cleanup().unwrap();
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let factory = RecordingFactory::new();
        let mut lazy = LazyConnection::new(factory.shared());

        // Never opened: nothing to close
        lazy.cleanup().unwrap();
        assert_eq!(factory.closed(), 0);

        lazy.cursor().unwrap();
        lazy.cleanup().unwrap();
        lazy.cleanup().unwrap();
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.closed(), 1);
        assert!(!lazy.is_open());
    }

    #[test]
    fn test_commit_before_open_fails() {
        let factory = RecordingFactory::new();
        let mut lazy = LazyConnection::new(factory.shared());

        assert!(matches!(lazy.commit(), Err(DbError::NotInitialized("connection"))));
        assert!(matches!(lazy.rollback(), Err(DbError::NotInitialized("connection"))));
        assert_eq!(factory.commits(), 0);
    }

    #[test]
    fn test_commit_and_rollback_delegate() {
        let factory = RecordingFactory::new();
        let mut lazy = LazyConnection::new(factory.shared());
        lazy.cursor().unwrap();

        lazy.commit().unwrap();
        lazy.rollback().unwrap();
        assert_eq!(factory.commits(), 1);
        assert_eq!(factory.rollbacks(), 1);
        lazy.cleanup().unwrap();
    }

    #[test]
    fn test_connect_failure_leaves_connection_closed() {
        let factory = RecordingFactory::failing_connect();
        let mut lazy = LazyConnection::new(factory.shared());

        assert!(matches!(lazy.cursor(), Err(DbError::Driver(_))));
        assert!(!lazy.is_open());
    }

    #[test]
    fn test_cursor_buffers_results_and_closes() {
        let factory = RecordingFactory::with_rows(vec![
            vec![Value::Integer(1), Value::from("alice")],
            vec![Value::Integer(2), Value::from("bob")],
        ]);
        let mut lazy = LazyConnection::new(factory.shared());
        {
            let mut cursor = lazy.cursor().unwrap();
            cursor.execute("select id, name from users", &[]).unwrap();
            assert_eq!(cursor.description().unwrap(), &["id".to_string(), "name".to_string()]);
            assert_eq!(cursor.fetch_one().unwrap()[1], Value::from("alice"));
            assert_eq!(cursor.fetch_all().len(), 1);
            assert!(cursor.fetch_one().is_none());

            cursor.close();
            assert!(cursor.is_closed());
            assert!(cursor.execute("select 1", &[]).is_err());
        }
        lazy.cleanup().unwrap();
    }
}
