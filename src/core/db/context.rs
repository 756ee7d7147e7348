/// Execution Context Module
///
/// An `ExecutionContext` holds the lazy connection shared by every unit of
/// work running on one thread, plus the transaction nesting depth.
/// `ConnectionScope` and `TransactionScope` are the reentrant guards that
/// bracket units of work: the first scope to find the context uninitialized
/// owns the teardown, nested scopes borrow what is already there.

use super::connection::{Cursor, LazyConnection};
use super::driver::ConnectionFactory;
use crate::core::{DbError, Result};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-thread connection state.
///
/// The context is `!Send`: it stays on the thread that created it, so the
/// connection it holds is never used from two threads.
pub struct ExecutionContext {
    factory: Arc<dyn ConnectionFactory>,
    connection: Option<LazyConnection>,
    depth: usize,
    rollback_only: bool,
    _not_send: PhantomData<Rc<()>>,
}

impl ExecutionContext {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        ExecutionContext {
            factory,
            connection: None,
            depth: 0,
            rollback_only: false,
            _not_send: PhantomData,
        }
    }

    /// True iff a lazy connection is held.
    pub fn is_init(&self) -> bool {
        self.connection.is_some()
    }

    /// Installs a fresh lazy connection and resets the depth.
    ///
    /// Fails with `AlreadyInitialized` if a connection is already held; the
    /// held connection is left untouched.
    pub fn init(&mut self) -> Result<()> {
        if self.is_init() {
            return Err(DbError::AlreadyInitialized("execution context"));
        }
        info!("[DB] open lazy connection");
        self.connection = Some(LazyConnection::new(Arc::clone(&self.factory)));
        self.depth = 0;
        self.rollback_only = false;
        Ok(())
    }

    /// Closes the raw connection (if it was ever opened) and releases the
    /// lazy connection, leaving the context uninitialized.
    pub fn cleanup(&mut self) -> Result<()> {
        let mut connection = self
            .connection
            .take()
            .ok_or(DbError::NotInitialized("execution context"))?;
        self.depth = 0;
        self.rollback_only = false;
        connection.cleanup()
    }

    pub fn cursor(&mut self) -> Result<Cursor<'_>> {
        self.lazy_mut()?.cursor()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.lazy_mut()?.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.lazy_mut()?.rollback()
    }

    /// Number of transaction scopes currently open on this context.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Set when an inner transaction rolled back; the outermost transaction
    /// can then only roll back.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub fn connection(&self) -> Option<&LazyConnection> {
        self.connection.as_ref()
    }

    /// Whether a raw connection has actually been opened.
    pub fn has_open_connection(&self) -> bool {
        self.connection.as_ref().map_or(false, LazyConnection::is_open)
    }

    fn lazy_mut(&mut self) -> Result<&mut LazyConnection> {
        self.connection
            .as_mut()
            .ok_or(DbError::NotInitialized("execution context"))
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.cleanup() {
                warn!(error = %e, "[DB] failed to close connection of dropped context");
            }
        }
    }
}

/// Reentrant guard establishing or reusing the context's connection.
///
/// Dereferences to the `ExecutionContext`, so nested scopes are entered
/// through the outer guard: `ConnectionScope::enter(&mut outer)`.
pub struct ConnectionScope<'a> {
    ctx: &'a mut ExecutionContext,
    owns_connection: bool,
}

impl<'a> ConnectionScope<'a> {
    pub fn enter(ctx: &'a mut ExecutionContext) -> Result<Self> {
        let owns_connection = if ctx.is_init() {
            false
        } else {
            ctx.init()?;
            true
        };
        debug!(owns_connection, "[DB] connection scope entered");
        Ok(ConnectionScope {
            ctx,
            owns_connection,
        })
    }

    /// Whether this scope initialized the context and must clean it up.
    pub fn owns_connection(&self) -> bool {
        self.owns_connection
    }

    /// Leaves the scope, reporting a failure to close the connection.
    /// Dropping the guard does the same but can only log the failure.
    pub fn exit(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.owns_connection, false) {
            return Ok(());
        }
        debug!("[DB] connection scope exited, cleaning up");
        self.ctx.cleanup()
    }
}

impl Deref for ConnectionScope<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        &*self.ctx
    }
}

impl DerefMut for ConnectionScope<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        &mut *self.ctx
    }
}

impl Drop for ConnectionScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "[DB] cleanup on scope exit failed");
        }
    }
}

/// Transaction guard nested inside a connection scope.
///
/// Entering increments the context depth, leaving decrements it. Only the
/// outermost transaction talks to the driver: `commit` commits, `rollback`
/// or dropping without either rolls back. Inner transactions fold into the
/// outer one; an inner rollback marks the context rollback-only, and the
/// outer `commit` then rolls back and fails.
pub struct TransactionScope<'a> {
    scope: ConnectionScope<'a>,
    outermost: bool,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    pub fn enter(ctx: &'a mut ExecutionContext) -> Result<Self> {
        let mut scope = ConnectionScope::enter(ctx)?;
        scope.depth += 1;
        let outermost = scope.depth == 1;
        debug!(depth = scope.depth, "[DB] transaction begin");
        Ok(TransactionScope {
            scope,
            outermost,
            finished: false,
        })
    }

    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Commits if this is the outermost transaction. A failed commit is
    /// rolled back and the commit error returned. If an inner transaction
    /// rolled back, this rolls back instead and fails with `Transaction`.
    pub fn commit(mut self) -> Result<()> {
        if !self.leave() {
            return Ok(());
        }
        if std::mem::replace(&mut self.scope.rollback_only, false) {
            warn!("[DB] inner transaction rolled back, rolling back instead of commit");
            self.rollback_driver()?;
            self.scope.release()?;
            return Err(DbError::Transaction(
                "inner transaction rolled back, outer transaction was rolled back".to_string(),
            ));
        }
        if self.scope.has_open_connection() {
            info!("[DB] commit");
            if let Err(e) = self.scope.commit() {
                warn!(error = %e, "[DB] commit failed, rolling back");
                if let Err(rollback_err) = self.scope.rollback() {
                    warn!(error = %rollback_err, "[DB] rollback after failed commit failed");
                }
                return Err(e);
            }
        }
        self.scope.release()
    }

    /// Rolls back if this is the outermost transaction; otherwise marks the
    /// context rollback-only.
    pub fn rollback(mut self) -> Result<()> {
        if !self.leave() {
            self.mark_rollback_only();
            return Ok(());
        }
        self.scope.rollback_only = false;
        self.rollback_driver()?;
        self.scope.release()
    }

    /// Marks the transaction finished and decrements the depth. Returns true
    /// for the outermost transaction.
    fn leave(&mut self) -> bool {
        self.finished = true;
        self.scope.depth = self.scope.depth.saturating_sub(1);
        debug!(depth = self.scope.depth, "[DB] transaction end");
        self.outermost
    }

    fn mark_rollback_only(&mut self) {
        warn!(depth = self.scope.depth, "[DB] inner transaction rolled back, marking rollback-only");
        self.scope.rollback_only = true;
    }

    fn rollback_driver(&mut self) -> Result<()> {
        if self.scope.has_open_connection() {
            info!("[DB] rollback");
            self.scope.rollback()?;
        }
        Ok(())
    }
}

impl Deref for TransactionScope<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        &self.scope
    }
}

impl DerefMut for TransactionScope<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        &mut self.scope
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.leave() {
            self.mark_rollback_only();
            return;
        }
        self.scope.rollback_only = false;
        if self.scope.has_open_connection() {
            warn!("[DB] transaction dropped without commit, rolling back");
            if let Err(e) = self.scope.rollback() {
                warn!(error = %e, "[DB] rollback on drop failed");
            }
        }
    }
}

/// Runs `f` inside a `ConnectionScope`.
pub fn with_connection<T, F>(ctx: &mut ExecutionContext, f: F) -> Result<T>
where
    F: FnOnce(&mut ExecutionContext) -> Result<T>,
{
    let mut scope = ConnectionScope::enter(ctx)?;
    let value = f(&mut *scope)?;
    scope.exit()?;
    Ok(value)
}

/// Runs `f` inside a `TransactionScope`: commit on `Ok`, rollback on `Err`.
/// A rollback failure is logged and the original error returned.
pub fn with_transaction<T, F>(ctx: &mut ExecutionContext, f: F) -> Result<T>
where
    F: FnOnce(&mut ExecutionContext) -> Result<T>,
{
    let mut tx = TransactionScope::enter(ctx)?;
    match f(&mut *tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                warn!(error = %rollback_err, "[DB] rollback failed");
            }
            Err(e)
        }
    }
}
