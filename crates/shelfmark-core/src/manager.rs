//! The transaction manager.
//!
//! [`TransactionManager`] owns the store (behind the [`ExecutionQueue`]) and
//! the [`History`]. Every mutating request (execute, undo, redo, clear) is
//! serialized through the queue; queries read the history directly and may
//! be called from anywhere, batch bodies included.
//!
//! # Failure handling
//!
//! - Executing: a failing body rolls back every unit it applied, newest
//!   first. History is not touched.
//! - Undo / redo: if a unit fails midway, the units of the entry already
//!   processed are put back so the entry stays whole and history is not
//!   touched. If putting them back fails as well, the side of history the
//!   entry belongs to is dropped and [`TxnError::CompensationFailed`] is
//!   returned.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compose::Stage;
use crate::config::EngineConfig;
use crate::error::{ProgrammingError, TxnError};
use crate::history::{Entry, History, HistoryIndex};
use crate::model::Guid;
use crate::queue::ExecutionQueue;
use crate::store::BookmarkStore;
use crate::txn::Transaction;

/// Result of `undo` / `redo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// An entry was reversed or reapplied.
    Applied,
    /// There was nothing to undo or redo.
    NotApplicable,
}

impl Outcome {
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

type Step = fn(&Transaction, &mut dyn BookmarkStore) -> Result<(), TxnError>;

enum ReplayFailure {
    /// A unit failed; the processed prefix was put back.
    Compensated(TxnError),
    /// A unit failed and so did putting the prefix back.
    Broken {
        error: TxnError,
        compensation: TxnError,
    },
}

/// Run `forward` over `units` in order. When a unit fails, run `backward`
/// over the units already processed, newest first.
fn replay(
    store: &mut dyn BookmarkStore,
    units: &[&Transaction],
    forward: Step,
    backward: Step,
) -> Result<(), ReplayFailure> {
    for (done, &txn) in units.iter().enumerate() {
        if let Err(error) = forward(txn, store) {
            for &prior in units[..done].iter().rev() {
                if let Err(compensation) = backward(prior, store) {
                    return Err(ReplayFailure::Broken {
                        error,
                        compensation,
                    });
                }
            }
            return Err(ReplayFailure::Compensated(error));
        }
    }
    Ok(())
}

/// Undo/redo engine over one store.
pub struct TransactionManager<S> {
    queue: ExecutionQueue<S>,
    history: RwLock<History>,
}

impl<S: BookmarkStore> TransactionManager<S> {
    /// Manager with an unlimited history.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_config(store, &EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(store: S, config: &EngineConfig) -> Self {
        Self {
            queue: ExecutionQueue::new(store),
            history: RwLock::new(History::new(config.history.max_entries)),
        }
    }

    // -----------------------------------------------------------------------
    // Executing
    // -----------------------------------------------------------------------

    /// Execute a single unit as its own history entry.
    ///
    /// Returns the GUID of the created item for units that create one.
    ///
    /// # Errors
    ///
    /// [`TxnError::Programming`] for a unit that is not fresh or is
    /// malformed, [`TxnError::Store`] when the store refuses it.
    pub fn transact(&self, txn: &Transaction) -> Result<Option<Guid>, TxnError> {
        self.execute(txn.kind(), false, |stage| stage.transact(txn))
    }

    /// Execute `txns` in order as one history entry.
    ///
    /// # Errors
    ///
    /// The first unit error; earlier units of the list are rolled back.
    pub fn transact_all(&self, txns: &[Transaction]) -> Result<Vec<Option<Guid>>, TxnError> {
        self.execute("transact_all", txns.len() > 1, |stage| {
            txns.iter().map(|txn| stage.transact(txn)).collect()
        })
    }

    /// Run `body` as a composite: every unit it applies through the
    /// [`Stage`] lands in one history entry.
    ///
    /// A body that applies nothing adds no entry. The body must not call back
    /// into the manager's mutating methods; those return
    /// [`ProgrammingError::Reentrant`].
    ///
    /// # Errors
    ///
    /// Whatever `body` returns, after its units were rolled back. When a unit
    /// cannot be rolled back the error is wrapped in
    /// [`TxnError::CompensationFailed`] and the units from that one back to
    /// the first stay applied, with no history entry.
    pub fn batch<T>(
        &self,
        body: impl FnOnce(&mut Stage<'_>) -> Result<T, TxnError>,
    ) -> Result<T, TxnError> {
        self.execute("batch", true, body)
    }

    fn execute<T>(
        &self,
        kind: &'static str,
        bracket: bool,
        body: impl FnOnce(&mut Stage<'_>) -> Result<T, TxnError>,
    ) -> Result<T, TxnError> {
        self.queue.run(kind, |store| {
            if bracket {
                store.begin_batch();
            }
            let mut stage = Stage::new(&mut *store);
            let result = match body(&mut stage) {
                Err(err) => match stage.rollback_all() {
                    Ok(()) => Err(err),
                    Err(_) => Err(err.into_compensation_failed()),
                },
                ok => ok,
            };
            let executed = stage.into_executed();
            if bracket {
                store.end_batch();
            }

            match result {
                Ok(value) => {
                    if executed.is_empty() {
                        debug!(kind, "nothing executed; no entry added");
                    } else {
                        let units = executed.len();
                        self.history.write().commit(Entry::from_executed(executed));
                        info!(kind, units, "entry committed");
                    }
                    Ok(value)
                }
                Err(err) => {
                    if executed.is_empty() {
                        warn!(kind, error = %err, "execution failed; rolled back");
                    } else {
                        warn!(
                            kind,
                            stranded = executed.len(),
                            error = %err,
                            "execution failed; rollback incomplete, units stay applied"
                        );
                    }
                    Err(err)
                }
            }
        })?
    }

    // -----------------------------------------------------------------------
    // Undo / redo / clear
    // -----------------------------------------------------------------------

    /// Reverse the top undo entry.
    ///
    /// # Errors
    ///
    /// The unit error when reversal failed (the entry is left applied), or
    /// [`TxnError::CompensationFailed`] when it could not be left applied
    /// either; the undo side of history is then cleared.
    pub fn undo(&self) -> Result<Outcome, TxnError> {
        self.queue.run("undo", |store| {
            let Some(entry) = self.history.read().top_undo().cloned() else {
                debug!("nothing to undo");
                return Ok(Outcome::NotApplicable);
            };
            let units: Vec<&Transaction> = entry.units().iter().collect();
            match Self::replay_bracketed(store, &units, Transaction::reverse, Transaction::reapply) {
                Ok(()) => {
                    self.history.write().step_undo();
                    info!(units = units.len(), "entry undone");
                    Ok(Outcome::Applied)
                }
                Err(failure) => Err(self.recover("undo", failure, true)),
            }
        })?
    }

    /// Reapply the top redo entry.
    ///
    /// # Errors
    ///
    /// Mirrors [`undo`](Self::undo); a failed compensation clears the redo
    /// side.
    pub fn redo(&self) -> Result<Outcome, TxnError> {
        self.queue.run("redo", |store| {
            let Some(entry) = self.history.read().top_redo().cloned() else {
                debug!("nothing to redo");
                return Ok(Outcome::NotApplicable);
            };
            let units: Vec<&Transaction> = entry.units().iter().rev().collect();
            match Self::replay_bracketed(store, &units, Transaction::reapply, Transaction::reverse) {
                Ok(()) => {
                    self.history.write().step_redo();
                    info!(units = units.len(), "entry redone");
                    Ok(Outcome::Applied)
                }
                Err(failure) => Err(self.recover("redo", failure, false)),
            }
        })?
    }

    fn replay_bracketed(
        store: &mut S,
        units: &[&Transaction],
        forward: Step,
        backward: Step,
    ) -> Result<(), ReplayFailure> {
        let bracket = units.len() > 1;
        if bracket {
            store.begin_batch();
        }
        let result = replay(store, units, forward, backward);
        if bracket {
            store.end_batch();
        }
        result
    }

    fn recover(&self, kind: &'static str, failure: ReplayFailure, undo_side: bool) -> TxnError {
        match failure {
            ReplayFailure::Compensated(error) => {
                warn!(kind, error = %error, "entry could not be replayed; left as it was");
                error
            }
            ReplayFailure::Broken {
                error,
                compensation,
            } => {
                warn!(
                    kind,
                    error = %error,
                    compensation = %compensation,
                    "entry left half-replayed; dropping that side of history"
                );
                self.history.write().clear(undo_side, !undo_side);
                TxnError::CompensationFailed {
                    source: Box::new(error),
                }
            }
        }
    }

    /// Drop undo and/or redo entries.
    ///
    /// # Errors
    ///
    /// [`ProgrammingError::Reentrant`] when called from a batch body.
    pub fn clear(&self, clear_undo: bool, clear_redo: bool) -> Result<(), TxnError> {
        self.queue.run("clear", |_| {
            let mut history = self.history.write();
            let before = history.len();
            history.clear(clear_undo, clear_redo);
            info!(clear_undo, clear_redo, dropped = before - history.len(), "history cleared");
        })?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Number of entries, undone ones included.
    #[must_use]
    pub fn length(&self) -> usize {
        self.history.read().len()
    }

    /// Index of the top undo entry; everything below it can be redone.
    #[must_use]
    pub fn undo_position(&self) -> usize {
        self.history.read().position()
    }

    #[must_use]
    pub fn top_undo_entry(&self) -> Option<Entry> {
        self.history.read().top_undo().cloned()
    }

    #[must_use]
    pub fn top_redo_entry(&self) -> Option<Entry> {
        self.history.read().top_redo().cloned()
    }

    /// Entry at `index` (0 = most recent).
    ///
    /// # Errors
    ///
    /// [`ProgrammingError::NonIntegerIndex`] when `index` is not a whole
    /// number, [`ProgrammingError::IndexOutOfRange`] when it is negative or
    /// not below [`length`](Self::length).
    pub fn entry<I>(&self, index: I) -> Result<Entry, TxnError>
    where
        I: TryInto<HistoryIndex, Error = ProgrammingError>,
    {
        let index = index.try_into()?;
        Ok(self.history.read().entry(index)?.clone())
    }

    /// Every entry, most recent first.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.history.read().entries()
    }

    /// Read the store once every queued request has finished.
    ///
    /// # Errors
    ///
    /// [`ProgrammingError::Reentrant`] when called from a batch body; use
    /// [`Stage::store`] there.
    pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, TxnError> {
        Ok(self.queue.run("inspect", |store| f(store))?)
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.queue.into_inner()
    }
}

impl<S> std::fmt::Debug for TransactionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let history = self.history.read();
        f.debug_struct("TransactionManager")
            .field("length", &history.len())
            .field("position", &history.position())
            .field("waiting", &self.queue.waiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::error::StoreError;
    use crate::model::InsertIndex;
    use crate::store::MemoryStore;
    use crate::store::flaky::{FlakyStore, Fuse, arm};
    use crate::txn::{Lifecycle, NewFolder, NewSeparator};

    fn folder(title: &str) -> Transaction {
        NewFolder::new(Guid::menu()).title(title).into()
    }

    fn menu_children<St: BookmarkStore>(m: &TransactionManager<St>) -> Vec<Guid> {
        m.inspect(|s| s.children_order(&Guid::menu()).unwrap()).unwrap()
    }

    #[test]
    fn manager_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TransactionManager<MemoryStore>>();
    }

    #[test]
    fn transact_undo_redo_cycle() {
        let m = TransactionManager::new(MemoryStore::default());
        let txn = folder("f");
        let guid = m.transact(&txn).unwrap().unwrap();
        assert_eq!(m.length(), 1);
        assert_eq!(m.top_undo_entry().unwrap(), [txn.clone()]);

        assert_eq!(m.undo().unwrap(), Outcome::Applied);
        assert_eq!(m.undo_position(), 1);
        assert!(menu_children(&m).is_empty());
        assert_eq!(m.undo().unwrap(), Outcome::NotApplicable);

        assert_eq!(m.redo().unwrap(), Outcome::Applied);
        assert_eq!(menu_children(&m), vec![guid]);
        assert_eq!(m.redo().unwrap(), Outcome::NotApplicable);
        assert_eq!(txn.state(), Lifecycle::Executed);
    }

    #[test]
    fn failed_transact_leaves_history_alone() {
        let m = TransactionManager::new(MemoryStore::default());
        let bad: Transaction = NewSeparator::new(Guid::menu()).at(InsertIndex::At(4)).into();
        assert!(matches!(m.transact(&bad), Err(TxnError::Store(_))));
        assert_eq!(m.length(), 0);
    }

    #[test]
    fn failed_batch_rolls_back_and_adds_nothing() {
        let m = TransactionManager::new(MemoryStore::default());
        let a = folder("a");
        let err = m
            .batch(|stage| {
                stage.transact(&a)?;
                stage.transact(&a)
            })
            .unwrap_err();
        assert!(err.is_programming());
        assert_eq!(m.length(), 0);
        assert!(menu_children(&m).is_empty());
    }

    #[test]
    fn empty_batch_adds_no_entry() {
        let m = TransactionManager::new(MemoryStore::default());
        m.batch(|_| Ok(())).unwrap();
        m.transact_all(&[]).unwrap();
        assert_eq!(m.length(), 0);
    }

    #[test]
    fn mutating_from_a_batch_body_is_refused() {
        let m = TransactionManager::new(MemoryStore::default());
        let inner = folder("inner");
        let err = m
            .batch(|stage| {
                assert_eq!(m.length(), 0);
                stage.transact(&folder("outer"))?;
                m.transact(&inner)
            })
            .unwrap_err();
        assert_eq!(
            err,
            TxnError::Programming(ProgrammingError::Reentrant("NewFolder"))
        );
        assert_eq!(inner.state(), Lifecycle::Fresh);
        assert!(m.undo().is_ok());
        assert_eq!(m.length(), 0);
    }

    #[test]
    fn history_cap_from_config() {
        let mut config = EngineConfig::default();
        config.history.max_entries = 2;
        let m = TransactionManager::with_config(MemoryStore::default(), &config);
        for title in ["a", "b", "c"] {
            m.transact(&folder(title)).unwrap();
        }
        assert_eq!(m.length(), 2);
    }

    #[test]
    fn requests_from_many_threads_serialize() {
        let m = Arc::new(TransactionManager::new(MemoryStore::default()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    m.transact(&folder(&format!("t{i}"))).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.length(), 4);
        assert_eq!(menu_children(&m).len(), 4);
    }

    // -----------------------------------------------------------------------
    // Compensation
    // -----------------------------------------------------------------------

    fn flaky_with_two_folders() -> (TransactionManager<FlakyStore>, Arc<Mutex<Fuse>>, Vec<Guid>) {
        let (store, fuse) = FlakyStore::new(MemoryStore::default());
        let m = TransactionManager::new(store);
        let made = m
            .transact_all(&[folder("one"), folder("two")])
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        (m, fuse, made)
    }

    #[test]
    fn failed_undo_is_compensated() {
        let (m, fuse, made) = flaky_with_two_folders();
        arm(&fuse, 1, 1);
        let err = m.undo().unwrap_err();
        assert!(matches!(err, TxnError::Store(StoreError::ItemNotFound(_))));
        assert_eq!(m.undo_position(), 0);
        assert_eq!(m.length(), 1);
        assert_eq!(menu_children(&m), made);

        fuse.lock().disarm();
        assert_eq!(m.undo().unwrap(), Outcome::Applied);
        assert!(menu_children(&m).is_empty());
    }

    #[test]
    fn broken_undo_clears_undo_side() {
        let (m, fuse, _) = flaky_with_two_folders();
        arm(&fuse, 1, 2);
        let err = m.undo().unwrap_err();
        assert!(matches!(err, TxnError::CompensationFailed { .. }));
        assert_eq!(err.code(), crate::error::ErrorCode::CompensationFailed);
        assert_eq!(m.length(), 0);
        assert_eq!(m.undo().unwrap(), Outcome::NotApplicable);
    }

    #[test]
    fn broken_redo_clears_redo_side() {
        let (m, fuse, _) = flaky_with_two_folders();
        m.transact(&folder("three")).unwrap();
        m.undo().unwrap();
        m.undo().unwrap();
        assert_eq!(m.undo_position(), 2);

        arm(&fuse, 1, 2);
        let err = m.redo().unwrap_err();
        assert!(matches!(err, TxnError::CompensationFailed { .. }));
        assert_eq!(m.length(), 0);
        assert_eq!(m.undo_position(), 0);
        assert_eq!(m.redo().unwrap(), Outcome::NotApplicable);
    }

    #[test]
    fn unreversible_batch_rollback_is_reported() {
        let (store, fuse) = FlakyStore::new(MemoryStore::default());
        let m = TransactionManager::new(store);
        let a = folder("a");
        let err = m
            .batch(|s| -> Result<(), TxnError> {
                s.transact(&a)?;
                arm(&fuse, 0, 1);
                Err(ProgrammingError::Malformed("body gave up".into()).into())
            })
            .unwrap_err();

        let TxnError::CompensationFailed { source } = &err else {
            panic!("expected CompensationFailed, got {err:?}");
        };
        assert!(matches!(**source, TxnError::Programming(ProgrammingError::Malformed(_))));
        assert_eq!(m.length(), 0);
        assert_eq!(a.state(), Lifecycle::Executed);
        assert_eq!(menu_children(&m).len(), 1);
    }

    #[test]
    fn nested_rollback_failure_is_wrapped_once() {
        let (store, fuse) = FlakyStore::new(MemoryStore::default());
        let m = TransactionManager::new(store);
        let outer = folder("outer");
        let inner = folder("inner");
        let err = m
            .batch(|s| {
                s.transact(&outer)?;
                s.batch(|n| -> Result<(), TxnError> {
                    n.transact(&inner)?;
                    arm(&fuse, 0, 1);
                    Err(ProgrammingError::Malformed("inner gave up".into()).into())
                })
            })
            .unwrap_err();

        let TxnError::CompensationFailed { source } = &err else {
            panic!("expected CompensationFailed, got {err:?}");
        };
        assert!(source.is_programming());
        // The fuse is spent, so the outer rollback reverses both units.
        assert_eq!(inner.state(), Lifecycle::Undone);
        assert_eq!(outer.state(), Lifecycle::Undone);
        assert!(menu_children(&m).is_empty());
        assert_eq!(m.length(), 0);
    }
}
