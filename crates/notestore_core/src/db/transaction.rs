//! Scoped transaction wrapper.
//!
//! # Responsibility
//! - Begin a transaction in one of three modes on construction.
//! - Surface commit failures with engine diagnostics attached.
//!
//! # Invariants
//! - A transaction that is not explicitly committed is rolled back when it
//!   goes out of scope. Callers never rely on implicit commit.
//! - `Selection` never takes the write lock; `Immediate` and `Exclusive` take
//!   it at `BEGIN`, so a write transaction cannot fail later on lock upgrade.
//!
//! In WAL mode `Exclusive` keeps other writers out but readers continue on
//! their snapshot; a reader never observes a half-applied transaction either
//! way.

use crate::error::StorageResult;
use log::{debug, warn};
use rusqlite::{Connection, DropBehavior, TransactionBehavior};
use std::ops::Deref;

/// Transaction locking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Read-only work; `BEGIN DEFERRED`.
    Selection,
    /// Ordinary write; `BEGIN IMMEDIATE`.
    Immediate,
    /// Multi-statement invariants such as cascading deletes; `BEGIN EXCLUSIVE`.
    Exclusive,
}

impl TransactionMode {
    fn behavior(self) -> TransactionBehavior {
        match self {
            Self::Selection => TransactionBehavior::Deferred,
            Self::Immediate => TransactionBehavior::Immediate,
            Self::Exclusive => TransactionBehavior::Exclusive,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Selection => "selection",
            Self::Immediate => "immediate",
            Self::Exclusive => "exclusive",
        }
    }
}

/// Open transaction. Dereferences to the underlying connection so statements
/// can be issued directly against it.
pub struct Transaction<'conn> {
    inner: rusqlite::Transaction<'conn>,
    mode: TransactionMode,
    guard: RollbackLog,
}

struct RollbackLog {
    mode: TransactionMode,
    armed: bool,
}

impl Drop for RollbackLog {
    fn drop(&mut self) {
        if self.armed {
            debug!(
                "event=transaction_rollback module=db status=ok mode={} reason=not_committed",
                self.mode.as_str()
            );
        }
    }
}

impl<'conn> Transaction<'conn> {
    /// Begins a transaction in `mode`.
    pub fn begin(conn: &'conn mut Connection, mode: TransactionMode) -> StorageResult<Self> {
        let mut inner = conn.transaction_with_behavior(mode.behavior())?;
        inner.set_drop_behavior(DropBehavior::Rollback);
        Ok(Self {
            inner,
            mode,
            guard: RollbackLog { mode, armed: true },
        })
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Commits the transaction.
    ///
    /// # Errors
    /// - `Database` with the engine's extended code and message. The
    ///   transaction is rolled back before the error is returned.
    pub fn commit(self) -> StorageResult<()> {
        let Self {
            inner,
            mode,
            mut guard,
        } = self;
        match inner.commit() {
            Ok(()) => {
                guard.armed = false;
                Ok(())
            }
            Err(err) => {
                warn!(
                    "event=transaction_commit module=db status=error mode={} error={}",
                    mode.as_str(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Rolls the transaction back explicitly.
    pub fn rollback(self) -> StorageResult<()> {
        let Self {
            inner, mut guard, ..
        } = self;
        guard.armed = false;
        inner.rollback()?;
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.inner
    }
}
