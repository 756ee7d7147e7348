/// Driver Module
///
/// The boundary between connection lifecycle management and the backing
/// store. A `ConnectionFactory` opens `RawConnection`s; everything above this
/// module only talks to those two traits. `SqliteFactory` is the bundled
/// implementation on top of rusqlite.

use crate::config::{DriverConfig, OptionValue};
use crate::core::{DbError, Result};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// A single SQL value, used both for statement arguments and result cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Converts a rusqlite cell. With `use_unicode` off, text comes back as raw
    /// bytes. Text that is not valid UTF-8 also comes back as bytes, unchanged.
    fn from_sql_ref(value: ValueRef<'_>, use_unicode: bool) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) if use_unicode => match std::str::from_utf8(t) {
                Ok(text) => Value::Text(text.to_string()),
                Err(_) => Value::Bytes(t.to_vec()),
            },
            ValueRef::Text(t) => Value::Bytes(t.to_vec()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Bytes(b) => ValueRef::Blob(b),
        }))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Native positional parameter marker of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    QuestionMark,
    /// `?1`, `?2`, ...
    Numbered,
    /// `$1`, `$2`, ...
    Dollar,
    /// `%s`
    Format,
}

impl PlaceholderStyle {
    /// Marker for the 1-based parameter `index`.
    pub fn marker(self, index: usize) -> String {
        match self {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::Numbered => format!("?{}", index),
            PlaceholderStyle::Dollar => format!("${}", index),
            PlaceholderStyle::Format => "%s".to_string(),
        }
    }
}

/// Everything a driver reports back for one executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutcome {
    /// Column names; `None` when the statement does not return rows
    pub columns: Option<Vec<String>>,
    /// Result rows, in driver order
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a mutating statement
    pub rows_affected: usize,
}

/// A live handle to the backing store.
///
/// Statements run strictly one after another; a connection is never shared
/// between threads while in use.
pub trait RawConnection: Send {
    /// Stable identifier used in log lines.
    fn id(&self) -> &str;

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Executes one statement whose SQL already uses the native marker.
    fn execute(&mut self, sql: &str, args: &[Value]) -> Result<StatementOutcome>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Closes the handle. Consumes it so a closed connection cannot be reused.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Produces new raw connections from a fixed configuration.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RawConnection>>;
}

const SUPPORTED_CHARSETS: &[&str] = &["utf8", "utf8mb4", "utf-8"];

/// Opens SQLite connections. `database` is the file path (or `:memory:`);
/// network fields of the configuration are only reported in logs.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    config: DriverConfig,
    autocommit: bool,
    use_unicode: bool,
    foreign_keys: bool,
}

impl SqliteFactory {
    pub fn new(config: DriverConfig) -> Result<Self> {
        let options = config.effective_options();

        if let Some(charset) = options.get("charset") {
            let supported = charset
                .as_str()
                .map(|c| SUPPORTED_CHARSETS.contains(&c.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !supported {
                return Err(DbError::Config(format!("Unsupported charset: {:?}", charset)));
            }
        }

        let flag = |key: &str, default: bool| -> Result<bool> {
            match options.get(key) {
                None => Ok(default),
                Some(OptionValue::Bool(b)) => Ok(*b),
                Some(other) => Err(DbError::Config(format!(
                    "Option '{}' must be a boolean, got {:?}",
                    key, other
                ))),
            }
        };

        Ok(SqliteFactory {
            autocommit: flag("autocommit", false)?,
            use_unicode: flag("use_unicode", true)?,
            foreign_keys: flag("foreign_keys", true)?,
            config,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl ConnectionFactory for SqliteFactory {
    fn connect(&self) -> Result<Box<dyn RawConnection>> {
        let conn = Connection::open(&self.config.database)?;
        conn.pragma_update(None, "foreign_keys", self.foreign_keys)?;

        let id = Uuid::new_v4().to_string();
        info!(
            connection = %id,
            database = %self.config.database,
            user = %self.config.user,
            host = %self.config.host,
            port = self.config.port,
            "[DB] sqlite connection opened"
        );

        Ok(Box::new(SqliteConnection {
            id,
            conn,
            autocommit: self.autocommit,
            use_unicode: self.use_unicode,
        }))
    }
}

/// rusqlite-backed raw connection.
///
/// With `autocommit` off, the first statement after a commit or rollback
/// opens a transaction that stays open until the next commit or rollback.
pub struct SqliteConnection {
    id: String,
    conn: Connection,
    autocommit: bool,
    use_unicode: bool,
}

impl RawConnection for SqliteConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }

    fn execute(&mut self, sql: &str, args: &[Value]) -> Result<StatementOutcome> {
        if !self.autocommit && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }

        let use_unicode = self.use_unicode;
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let params = rusqlite::params_from_iter(args.iter());

        if column_count == 0 {
            let rows_affected = stmt.execute(params)?;
            return Ok(StatementOutcome {
                columns: None,
                rows: Vec::new(),
                rows_affected,
            });
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        // INSERT/UPDATE/DELETE ... RETURNING produce rows and change rows
        let readonly = stmt.readonly();
        let mut rows = Vec::new();
        let mut cursor = stmt.query(params)?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(Value::from_sql_ref(row.get_ref(i)?, use_unicode));
            }
            rows.push(values);
        }
        drop(cursor);

        let rows_affected = if readonly { 0 } else { self.conn.changes() as usize };
        Ok(StatementOutcome {
            columns: Some(columns),
            rows,
            rows_affected,
        })
    }

    fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!(connection = %self.id, "[DB] closing sqlite handle");
        self.conn.close().map_err(|(_, e)| DbError::from(e))
    }
}
