/// Error Module
///
/// Every failure in the crate surfaces as a `DbError`. Nothing is recovered
/// locally: driver errors are wrapped without translating their message.
use thiserror::Error;

/// Boxed error produced by a connection driver.
pub type DriverSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for connection lifecycle, statement execution and configuration.
#[derive(Error, Debug)]
pub enum DbError {
    /// A single-initialization resource was initialized a second time
    #[error("{0} is already initialized")]
    AlreadyInitialized(&'static str),

    /// An operation needed a resource that does not exist yet
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Opaque failure from the backing store (connect, execute, commit, rollback)
    #[error("Driver error: {0}")]
    Driver(#[source] DriverSource),

    /// Row field lookup by an unknown column name
    #[error("No such field: {0}")]
    NoSuchField(String),

    /// Caller contract violations detected before reaching the driver
    #[error("Query error: {0}")]
    Query(String),

    /// Transaction-related errors
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Wraps any driver-side error.
    pub fn driver<E>(err: E) -> Self
    where
        E: Into<DriverSource>,
    {
        DbError::Driver(err.into())
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::Driver(Box::new(err))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;
