/// Core Module
///
/// Connection lifecycle, statement execution and the shared error type.

pub mod db;
pub mod error;

pub use error::{DbError, DriverSource, Result};
