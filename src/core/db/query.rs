/// Query Execution Module
///
/// Runs single statements against the context's current connection.
/// Statement templates use `?` as a generic placeholder, rewritten to the
/// driver's native marker before execution.
///
/// The mutating path (`update`, `insert`) establishes its own connection
/// scope and auto-commits when no transaction is open. The read path
/// (`select`, `select_one`, `select_int`) never commits.

use super::context::{with_connection, ExecutionContext};
use super::driver::{PlaceholderStyle, Value};
use crate::core::{DbError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds an argument slice for statement helpers, converting each
/// expression with `Value::from`.
///
/// ```
/// assert_eq!(transwrap::args![1, "alice", None::<String>].len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        &[] as &[$crate::Value]
    };
    ($($arg:expr),+ $(,)?) => {
        &[$($crate::Value::from($arg)),+] as &[$crate::Value]
    };
}

// Quoted literals and identifiers are matched first so a `?` inside them
// is left alone.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|\?"#).expect("placeholder pattern is valid")
});

/// Rewrites every `?` outside quotes into `style`'s native marker and
/// returns the new SQL with the number of placeholders found.
pub fn translate_placeholders(sql: &str, style: PlaceholderStyle) -> (String, usize) {
    let mut count = 0;
    let translated = PLACEHOLDER.replace_all(sql, |caps: &Captures<'_>| {
        let matched = &caps[0];
        if matched == "?" {
            count += 1;
            style.marker(count)
        } else {
            matched.to_string()
        }
    });
    (translated.into_owned(), count)
}

fn prepare_sql(sql: &str, style: PlaceholderStyle, args: &[Value]) -> Result<String> {
    let (translated, expected) = translate_placeholders(sql, style);
    if expected != args.len() {
        return Err(DbError::Query(format!(
            "statement has {} placeholders but {} arguments were given",
            expected,
            args.len()
        )));
    }
    debug!(sql = %translated, args = args.len(), "[DB] sql");
    Ok(translated)
}

/// Conversion from a result cell into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(b.clone()),
            Value::Text(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// One result row with fields addressable by column name.
///
/// Rows from the same statement share their column names. When a name
/// occurs twice, the later column wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(names: Arc<[String]>, values: Vec<Value>) -> Self {
        Row { names, values }
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.names
            .iter()
            .rposition(|n| n == name)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| DbError::NoSuchField(name.to_string()))
    }

    /// Typed field access; a type mismatch is a `Query` error.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get(name)?;
        T::from_value(value).ok_or_else(|| {
            DbError::Query(format!(
                "field '{}' holds {:?}, not {}",
                name,
                value,
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }

    /// The row as a JSON object keyed by column name.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| DbError::Query(format!("Failed to serialize row: {}", e)))
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Result of the read routine, shaped by its `first` flag.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    One(Option<Row>),
    All(Vec<Row>),
}

/// Read routine. Does not establish a connection scope: the caller must
/// already be inside one, otherwise this fails with `NotInitialized`.
///
/// The statement must produce column metadata. Issuing a non-row-returning
/// statement here is a caller error and fails with `Query`.
pub fn fetch(ctx: &mut ExecutionContext, sql: &str, args: &[Value], first: bool) -> Result<Fetched> {
    if !ctx.is_init() {
        return Err(DbError::NotInitialized("execution context"));
    }
    let mut cursor = ctx.cursor()?;
    let sql = prepare_sql(sql, cursor.placeholder_style(), args)?;
    cursor.execute(&sql, args)?;

    let names: Arc<[String]> = cursor
        .description()
        .map(Arc::from)
        .ok_or_else(|| DbError::Query(format!("statement returned no columns: {}", sql)))?;

    if first {
        return Ok(Fetched::One(cursor.fetch_one().map(|values| Row::new(names, values))));
    }
    let rows = cursor
        .fetch_all()
        .into_iter()
        .map(|values| Row::new(Arc::clone(&names), values))
        .collect();
    Ok(Fetched::All(rows))
}

/// Runs a query and returns every row, possibly none.
pub fn select(ctx: &mut ExecutionContext, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
    with_connection(ctx, |ctx| match fetch(ctx, sql, args, false)? {
        Fetched::All(rows) => Ok(rows),
        Fetched::One(row) => Ok(row.into_iter().collect()),
    })
}

/// Runs a query and returns its first row, or `None` when nothing matched.
pub fn select_one(ctx: &mut ExecutionContext, sql: &str, args: &[Value]) -> Result<Option<Row>> {
    with_connection(ctx, |ctx| match fetch(ctx, sql, args, true)? {
        Fetched::One(row) => Ok(row),
        Fetched::All(rows) => Ok(rows.into_iter().next()),
    })
}

/// Runs a query expected to yield exactly one integer column in one row,
/// such as `select count(*) from user`.
pub fn select_int(ctx: &mut ExecutionContext, sql: &str, args: &[Value]) -> Result<i64> {
    let row = select_one(ctx, sql, args)?
        .ok_or_else(|| DbError::Query(format!("no row returned: {}", sql)))?;
    match row.values() {
        [Value::Integer(i)] => Ok(*i),
        other => Err(DbError::Query(format!(
            "expected a single integer column, got {:?}",
            other
        ))),
    }
}

/// Runs a mutating statement and returns the affected row count.
///
/// Commits right away when no transaction is open on the context. Driver
/// failures, including a failed commit, are returned as-is; nothing is
/// rolled back here.
pub fn update(ctx: &mut ExecutionContext, sql: &str, args: &[Value]) -> Result<usize> {
    with_connection(ctx, |ctx| {
        let affected = {
            let mut cursor = ctx.cursor()?;
            let sql = prepare_sql(sql, cursor.placeholder_style(), args)?;
            cursor.execute(&sql, args)?;
            cursor.rowcount()
        };
        if ctx.depth() == 0 {
            info!("[DB] auto commit");
            ctx.commit()?;
        }
        Ok(affected)
    })
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Inserts one row built from `(column, value)` pairs.
pub fn insert(ctx: &mut ExecutionContext, table: &str, fields: &[(&str, Value)]) -> Result<usize> {
    if fields.is_empty() {
        return Err(DbError::Query(format!("insert into '{}' without columns", table)));
    }
    let columns: Vec<String> = fields.iter().map(|(name, _)| quote_identifier(name)).collect();
    let markers = vec!["?"; fields.len()].join(",");
    let sql = format!(
        "insert into {} ({}) values ({})",
        quote_identifier(table),
        columns.join(","),
        markers
    );
    let args: Vec<Value> = fields.iter().map(|(_, value)| value.clone()).collect();
    update(ctx, &sql, &args)
}
