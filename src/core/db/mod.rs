/// Database Module
///
/// Connection lifecycle and statement execution, split by concern:
/// - **Driver boundary** (`driver.rs`): values, raw connections, connection factories
/// - **Lazy connections** (`connection.rs`): deferred opening, cursors, idempotent cleanup
/// - **Scoping** (`context.rs`): per-thread context, reentrant connection and transaction guards
/// - **Statements** (`query.rs`): placeholder translation, mutating and read paths, rows
///
/// ## Usage
///
/// ```no_run
/// use transwrap::{args, update, select_one, DriverConfig, Engine};
///
/// let engine = Engine::new(DriverConfig::new("root", "", "app.db"))?;
/// let mut ctx = engine.context();
/// update(&mut ctx, "insert into user (id, name) values (?, ?)", args![1, "alice"])?;
/// let row = select_one(&mut ctx, "select name from user where id=?", args![1])?;
/// # Ok::<(), transwrap::DbError>(())
/// ```
pub mod connection;
pub mod context;
pub mod driver;
pub mod query;

pub use connection::*;
pub use context::*;
pub use driver::*;
pub use query::*;
