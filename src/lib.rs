// Configuration and engine lifecycle
pub mod config;
pub mod engine;

// Connection lifecycle and statement execution
pub mod core;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::config::{DriverConfig, OptionValue};
pub use crate::core::db::{
    fetch, insert, select, select_int, select_one, translate_placeholders, update, with_connection,
    with_transaction, ConnectionFactory, ConnectionScope, Cursor, ExecutionContext, Fetched, FromValue,
    LazyConnection, PlaceholderStyle, RawConnection, Row, SqliteFactory, StatementOutcome,
    TransactionScope, Value,
};
pub use crate::core::{DbError, Result};
pub use crate::engine::{Engine, EngineCell};
