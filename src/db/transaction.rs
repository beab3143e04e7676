//! Nested transaction bookkeeping.
//!
//! Only the outermost `begin`/`complete` pair touches the native transaction.
//! Inner levels just move the depth counter. Any failure while a transaction
//! is open poisons it, and the outermost completion then rolls back.

/// What the caller must do with the native transaction after `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Outermost level closed cleanly: issue a native COMMIT.
    Commit,
    /// Outermost level closed on a poisoned transaction: issue a native ROLLBACK.
    Rollback,
    /// Still nested; nothing to issue. Carries the current poison status.
    Pending { poisoned: bool },
}

/// Depth counter and poison flag for one connection.
///
/// `depth == 0` implies `!poisoned`. The depth is signed: completing more
/// often than beginning is a caller error and lets it go negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionAccountant {
    depth: i64,
    poisoned: bool,
}

impl TransactionAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction level.
    ///
    /// Returns the new depth and whether a native BEGIN must be issued.
    pub fn begin(&mut self) -> (i64, bool) {
        let outermost = self.depth == 0;
        if outermost {
            self.poisoned = false;
        }
        self.depth += 1;
        (self.depth, outermost)
    }

    /// Close a transaction level.
    pub fn complete(&mut self) -> Completion {
        self.depth -= 1;
        if self.depth != 0 {
            return Completion::Pending {
                poisoned: self.poisoned,
            };
        }
        if std::mem::take(&mut self.poisoned) {
            Completion::Rollback
        } else {
            Completion::Commit
        }
    }

    /// Poison the open transaction so the outermost completion rolls back.
    ///
    /// Outside a transaction there is nothing to poison; the next outermost
    /// `begin` would clear the flag anyway.
    pub fn fail(&mut self) {
        if self.depth != 0 {
            self.poisoned = true;
        }
    }

    /// Forget all open levels, e.g. after the native handle was dropped.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn depth(&self) -> i64 {
        self.depth
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn in_transaction(&self) -> bool {
        self.depth > 0
    }
}
