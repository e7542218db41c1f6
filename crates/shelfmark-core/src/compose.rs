//! Composite execution.
//!
//! A [`Stage`] is the handle a batch body receives. Every unit it runs is
//! recorded in execution order; when the outermost body returns `Ok` the
//! manager commits all of them as one history entry. Nested batches only
//! move the depth counter, so they flatten into the outermost entry.
//!
//! If a body returns `Err`, the units applied inside that (possibly nested)
//! batch are reversed newest-first before the error reaches the caller.
//! Rollback stops at the first unit that cannot be reversed; that unit and
//! everything older stay applied and the body error comes back wrapped in
//! [`TxnError::CompensationFailed`].

use tracing::warn;

use crate::error::TxnError;
use crate::model::Guid;
use crate::store::BookmarkStore;
use crate::txn::Transaction;

/// Execution context of a running batch.
pub struct Stage<'a> {
    store: &'a mut dyn BookmarkStore,
    executed: Vec<Transaction>,
    depth: usize,
}

impl<'a> Stage<'a> {
    pub(crate) fn new(store: &'a mut dyn BookmarkStore) -> Self {
        Self {
            store,
            executed: Vec::new(),
            depth: 0,
        }
    }

    /// Apply one unit as part of this batch.
    ///
    /// A failing unit has already undone its own partial work; the error is
    /// handed back to the body, which may recover and continue.
    ///
    /// # Errors
    ///
    /// [`TxnError::Programming`] for a unit that is not fresh or whose input
    /// is malformed, [`TxnError::Store`] when the store refuses it.
    pub fn transact(&mut self, txn: &Transaction) -> Result<Option<Guid>, TxnError> {
        let created = txn.apply(&mut *self.store)?;
        self.executed.push(txn.clone());
        Ok(created)
    }

    /// Apply `txns` in order as a nested batch.
    ///
    /// # Errors
    ///
    /// The first unit error; units of this list applied before it are rolled
    /// back.
    pub fn transact_all(&mut self, txns: &[Transaction]) -> Result<Vec<Option<Guid>>, TxnError> {
        self.batch(|stage| txns.iter().map(|txn| stage.transact(txn)).collect())
    }

    /// Run `body` as a nested batch. Its units join the enclosing entry.
    ///
    /// # Errors
    ///
    /// Whatever `body` returns; the units it applied are rolled back first.
    /// [`TxnError::CompensationFailed`] wraps that error when one of them
    /// could not be reversed.
    pub fn batch<T>(
        &mut self,
        body: impl FnOnce(&mut Stage<'_>) -> Result<T, TxnError>,
    ) -> Result<T, TxnError> {
        let mark = self.executed.len();
        self.depth += 1;
        let result = body(self);
        self.depth -= 1;
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(depth = self.depth + 1, error = %err, "nested batch failed");
                match self.rollback_to(mark) {
                    Ok(()) => Err(err),
                    Err(_) => Err(err.into_compensation_failed()),
                }
            }
        }
    }

    /// Read access to the store, e.g. to look up a GUID created earlier in
    /// the body.
    #[must_use]
    pub fn store(&self) -> &dyn BookmarkStore {
        &*self.store
    }

    /// Nesting level; 0 inside the outermost body.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Units applied so far, in execution order.
    #[must_use]
    pub fn executed(&self) -> &[Transaction] {
        &self.executed
    }

    pub(crate) fn rollback_all(&mut self) -> Result<(), TxnError> {
        self.rollback_to(0)
    }

    pub(crate) fn into_executed(self) -> Vec<Transaction> {
        self.executed
    }

    /// Reverse units newer than `mark`, newest first. On failure the unit
    /// that refused and all older ones stay in `executed`.
    fn rollback_to(&mut self, mark: usize) -> Result<(), TxnError> {
        while self.executed.len() > mark {
            let Some(txn) = self.executed.last() else {
                break;
            };
            if let Err(err) = txn.reverse(&mut *self.store) {
                warn!(
                    txn = %txn.id(),
                    kind = txn.kind(),
                    left_applied = self.executed.len() - mark,
                    error = %err,
                    "rollback step failed; unit stays applied"
                );
                return Err(err);
            }
            self.executed.pop();
        }
        Ok(())
    }
}

impl std::fmt::Debug for Stage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("executed", &self.executed)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
