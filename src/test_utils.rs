/// # Test Utilities Module
///
/// Fixtures shared by the unit tests:
/// - `RecordingFactory`, a fake driver that counts opens, closes, commits
///   and rollbacks and records every statement it receives
/// - `SqliteFixture`, a real SQLite database in a temporary file
/// - tracing setup for test output

use crate::config::DriverConfig;
use crate::core::db::driver::{ConnectionFactory, PlaceholderStyle, RawConnection, StatementOutcome, Value};
use crate::core::{DbError, Result};
use crate::engine::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Installs a fmt subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

/// Fake connection factory.
///
/// Statements starting with `select` return the configured rows under the
/// columns `id, name`; statements containing `fail` return a driver error;
/// everything else reports one affected row.
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory {
    counters: Arc<Counters>,
    rows: Vec<Vec<Value>>,
    fail_connect: bool,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Vec<Value>>) -> Self {
        RecordingFactory {
            rows,
            ..Self::default()
        }
    }

    pub fn failing_connect() -> Self {
        RecordingFactory {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn shared(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self.clone())
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.counters
            .statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl ConnectionFactory for RecordingFactory {
    fn connect(&self) -> Result<Box<dyn RawConnection>> {
        if self.fail_connect {
            return Err(DbError::driver("connection refused"));
        }
        let serial = self.counters.opened.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(RecordingConnection {
            id: format!("fake-{}", serial),
            counters: Arc::clone(&self.counters),
            rows: self.rows.clone(),
        }))
    }
}

struct RecordingConnection {
    id: String,
    counters: Arc<Counters>,
    rows: Vec<Vec<Value>>,
}

impl RawConnection for RecordingConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Format
    }

    fn execute(&mut self, sql: &str, _args: &[Value]) -> Result<StatementOutcome> {
        if let Ok(mut statements) = self.counters.statements.lock() {
            statements.push(sql.to_string());
        }
        if sql.contains("fail") {
            return Err(DbError::driver(format!("statement failed: {}", sql)));
        }
        if sql.trim_start().to_lowercase().starts_with("select") {
            return Ok(StatementOutcome {
                columns: Some(vec!["id".to_string(), "name".to_string()]),
                rows: self.rows.clone(),
                rows_affected: 0,
            });
        }
        Ok(StatementOutcome {
            columns: None,
            rows: Vec::new(),
            rows_affected: 1,
        })
    }

    fn commit(&mut self) -> Result<()> {
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// SQLite database in a temporary directory, removed on drop.
pub struct SqliteFixture {
    _dir: TempDir,
    pub engine: Engine,
}

impl SqliteFixture {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        let config = DriverConfig::new("root", "", path.to_string_lossy().into_owned());
        let engine = Engine::new(config).expect("Failed to create engine");
        SqliteFixture { _dir: dir, engine }
    }
}
