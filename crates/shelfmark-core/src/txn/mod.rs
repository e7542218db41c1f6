//! Reversible units of work.
//!
//! A [`Transaction`] wraps one unit (create, remove, move, copy, edit,
//! annotate, tag, untag, sort) together with its lifecycle:
//!
//! ```text
//!   Fresh ──apply──▶ Executed ──reverse──▶ Undone
//!                        ▲                   │
//!                        └─────reapply───────┘
//! ```
//!
//! `Fresh → Executed` happens once. A unit whose `apply` fails undoes its own
//! partial work and stays `Fresh`. Every later `apply` fails with
//! [`ProgrammingError::Reused`].
//!
//! Units capture whatever they need to reverse themselves while they run
//! (the removed subtree, the previous field value, the tags that were newly
//! added). That reversal state never leaves the unit.
//!
//! Handles are cheap to clone and compare equal iff they refer to the same
//! unit, so history entries can be compared against the handles a caller
//! kept.

mod annotate;
mod copy;
mod create;
mod edit;
mod moves;
mod remove;
mod sort;
mod tags;

pub use annotate::Annotate;
pub use copy::CopyItem;
pub use create::{NewBookmark, NewFolder, NewLivemark, NewSeparator};
pub use edit::{EditKeyword, EditTitle, EditUrl};
pub use moves::Move;
pub use remove::Remove;
pub use sort::SortByName;
pub use tags::{Tag, Untag};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ProgrammingError, TxnError};
use crate::model::{BookmarkUrl, Guid};
use crate::store::BookmarkStore;

// ---------------------------------------------------------------------------
// Identity and lifecycle
// ---------------------------------------------------------------------------

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(u64);

impl TxnId {
    fn next() -> Self {
        Self(NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Where a unit is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Fresh,
    Executed,
    Undone,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fresh => "fresh",
            Self::Executed => "executed",
            Self::Undone => "undone",
        })
    }
}

// ---------------------------------------------------------------------------
// Unit contract
// ---------------------------------------------------------------------------

/// Behaviour every unit kind provides. Lifecycle checks live in
/// [`Transaction`]; implementations only deal with the store.
pub(crate) trait Unit: Send {
    /// Factory name, e.g. `NewFolder`.
    fn kind(&self) -> &'static str;

    /// Perform the mutation and record the reversal state. On failure any
    /// partial work must already be undone.
    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError>;

    /// Undo a successful `apply` (or `reapply`).
    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError>;

    /// Redo after `reverse`.
    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError>;
}

/// Error for a unit asked to reverse before it recorded anything.
pub(crate) fn never_applied(kind: &'static str) -> TxnError {
    ProgrammingError::Malformed(format!("{kind} has no recorded reversal state")).into()
}

pub(crate) fn require_non_empty<T>(items: &[T], what: &str) -> Result<(), TxnError> {
    if items.is_empty() {
        return Err(ProgrammingError::Malformed(format!("at least one {what} is required")).into());
    }
    Ok(())
}

pub(crate) fn require_tags(tags: &[String]) -> Result<(), TxnError> {
    require_non_empty(tags, "tag")?;
    if let Some(bad) = tags.iter().find(|t| t.trim().is_empty()) {
        return Err(ProgrammingError::Malformed(format!("invalid tag {bad:?}")).into());
    }
    Ok(())
}

pub(crate) fn require_urls(urls: &[BookmarkUrl]) -> Result<(), TxnError> {
    require_non_empty(urls, "URL")
}

// ---------------------------------------------------------------------------
// Transaction handle
// ---------------------------------------------------------------------------

struct TxnCell {
    state: Lifecycle,
    unit: Box<dyn Unit>,
}

/// Shared handle to one unit of work.
#[derive(Clone)]
pub struct Transaction {
    id: TxnId,
    inner: Arc<Mutex<TxnCell>>,
}

impl Transaction {
    pub(crate) fn from_unit(unit: Box<dyn Unit>) -> Self {
        Self {
            id: TxnId::next(),
            inner: Arc::new(Mutex::new(TxnCell {
                state: Lifecycle::Fresh,
                unit,
            })),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.inner.lock().state
    }

    /// Factory name of the wrapped unit.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.inner.lock().unit.kind()
    }

    pub(crate) fn apply(&self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        let mut cell = self.inner.lock();
        if cell.state != Lifecycle::Fresh {
            return Err(ProgrammingError::Reused {
                id: self.id,
                state: cell.state,
            }
            .into());
        }
        let result = cell.unit.apply(store)?;
        cell.state = Lifecycle::Executed;
        debug!(txn = %self.id, kind = cell.unit.kind(), "applied");
        Ok(result)
    }

    pub(crate) fn reverse(&self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let mut cell = self.inner.lock();
        self.expect_state(&cell, Lifecycle::Executed, Lifecycle::Undone)?;
        cell.unit.reverse(store)?;
        cell.state = Lifecycle::Undone;
        debug!(txn = %self.id, kind = cell.unit.kind(), "reversed");
        Ok(())
    }

    pub(crate) fn reapply(&self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let mut cell = self.inner.lock();
        self.expect_state(&cell, Lifecycle::Undone, Lifecycle::Executed)?;
        cell.unit.reapply(store)?;
        cell.state = Lifecycle::Executed;
        debug!(txn = %self.id, kind = cell.unit.kind(), "reapplied");
        Ok(())
    }

    fn expect_state(&self, cell: &TxnCell, from: Lifecycle, to: Lifecycle) -> Result<(), TxnError> {
        if cell.state == from {
            Ok(())
        } else {
            Err(ProgrammingError::InvalidLifecycle {
                id: self.id,
                from: cell.state,
                to,
            }
            .into())
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl std::hash::Hash for Transaction {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("kind", &cell.unit.kind())
            .field("state", &cell.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InsertIndex;
    use crate::store::MemoryStore;

    fn folder() -> Transaction {
        NewFolder::new(Guid::menu()).title("Test Folder").into()
    }

    #[test]
    fn ids_are_unique_and_equality_follows_identity() {
        let a = folder();
        let b = folder();
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_eq!(a.kind(), "NewFolder");
    }

    #[test]
    fn lifecycle_cycles_after_first_apply() {
        let mut store = MemoryStore::default();
        let txn = folder();
        assert_eq!(txn.state(), Lifecycle::Fresh);

        txn.apply(&mut store).unwrap();
        assert_eq!(txn.state(), Lifecycle::Executed);
        for _ in 0..3 {
            txn.reverse(&mut store).unwrap();
            assert_eq!(txn.state(), Lifecycle::Undone);
            txn.reapply(&mut store).unwrap();
            assert_eq!(txn.state(), Lifecycle::Executed);
        }
    }

    #[test]
    fn reuse_is_a_programming_error() {
        let mut store = MemoryStore::default();
        let txn = folder();
        txn.apply(&mut store).unwrap();
        let err = txn.apply(&mut store).unwrap_err();
        assert!(matches!(
            err,
            TxnError::Programming(ProgrammingError::Reused {
                state: Lifecycle::Executed,
                ..
            })
        ));

        txn.reverse(&mut store).unwrap();
        assert!(matches!(
            txn.apply(&mut store).unwrap_err(),
            TxnError::Programming(ProgrammingError::Reused {
                state: Lifecycle::Undone,
                ..
            })
        ));
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut store = MemoryStore::default();
        let txn = folder();
        assert!(matches!(
            txn.reverse(&mut store).unwrap_err(),
            TxnError::Programming(ProgrammingError::InvalidLifecycle {
                from: Lifecycle::Fresh,
                to: Lifecycle::Undone,
                ..
            })
        ));
        txn.apply(&mut store).unwrap();
        assert!(txn.reapply(&mut store).is_err());
    }

    #[test]
    fn failed_apply_stays_fresh() {
        let mut store = MemoryStore::default();
        let txn: Transaction = NewSeparator::new(Guid::menu()).at(InsertIndex::At(5)).into();
        assert!(matches!(txn.apply(&mut store), Err(TxnError::Store(_))));
        assert_eq!(txn.state(), Lifecycle::Fresh);
    }

    #[test]
    fn tag_validation() {
        assert!(require_tags(&[]).is_err());
        assert!(require_tags(&["  ".to_string()]).is_err());
        assert!(require_tags(&["A, B".to_string()]).is_ok());
    }
}
