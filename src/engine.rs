//! Engine lifecycle: a configured connection factory and the holder that
//! allows it to be initialized only once.

use crate::config::DriverConfig;
use crate::core::db::{ConnectionFactory, ExecutionContext, SqliteFactory};
use crate::core::{DbError, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A configured connection factory shared by every execution context.
#[derive(Clone)]
pub struct Engine {
    id: Uuid,
    factory: Arc<dyn ConnectionFactory>,
}

impl Engine {
    /// Builds an engine backed by SQLite. No connection is opened here.
    pub fn new(config: DriverConfig) -> Result<Self> {
        let factory = SqliteFactory::new(config)?;
        Ok(Self::with_factory(Arc::new(factory)))
    }

    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        let id = Uuid::new_v4();
        info!(engine = %id, "Init engine ok");
        Engine { id, factory }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A fresh, uninitialized context for the calling thread.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(&self.factory))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("id", &self.id).finish()
    }
}

/// Holds at most one engine for its whole lifetime.
///
/// ```
/// use transwrap::{DbError, DriverConfig, EngineCell};
///
/// static ENGINE: EngineCell = EngineCell::new();
///
/// ENGINE.init(DriverConfig::new("root", "", ":memory:")).unwrap();
/// let again = ENGINE.init(DriverConfig::new("root", "", ":memory:"));
/// assert!(matches!(again, Err(DbError::AlreadyInitialized("engine"))));
/// ```
#[derive(Debug, Default)]
pub struct EngineCell {
    cell: OnceCell<Engine>,
}

impl EngineCell {
    pub const fn new() -> Self {
        EngineCell {
            cell: OnceCell::new(),
        }
    }

    /// Builds and stores a SQLite engine. Fails with `AlreadyInitialized`
    /// if an engine is already stored.
    pub fn init(&self, config: DriverConfig) -> Result<&Engine> {
        if self.is_initialized() {
            return Err(DbError::AlreadyInitialized("engine"));
        }
        self.install(Engine::new(config)?)
    }

    /// Stores an already-built engine.
    pub fn install(&self, engine: Engine) -> Result<&Engine> {
        self.cell
            .set(engine)
            .map_err(|_| DbError::AlreadyInitialized("engine"))?;
        self.get()
    }

    pub fn get(&self) -> Result<&Engine> {
        self.cell.get().ok_or(DbError::NotInitialized("engine"))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}
