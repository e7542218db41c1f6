//! Moving an item between (or within) folders.
//!
//! Requested indices use the pre-removal convention, so the index handed
//! back to the store on undo depends on the direction of the original move:
//!
//! - moved *up* within one folder (`old_index > new_index`): the item now
//!   sits above its old slot, so asking for `old_index + 1` lands it back at
//!   `old_index` once it is taken out of the list;
//! - anything else: `old_index` is already correct.

use super::{Transaction, TxnError, Unit, never_applied};
use crate::model::{Guid, InsertIndex, MoveOutcome};
use crate::store::BookmarkStore;

/// Move `guid` into `new_parent` at `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub guid: Guid,
    pub new_parent: Guid,
    pub index: InsertIndex,
}

impl Move {
    #[must_use]
    pub const fn new(guid: Guid, new_parent: Guid) -> Self {
        Self {
            guid,
            new_parent,
            index: InsertIndex::Default,
        }
    }

    #[must_use]
    pub const fn at(mut self, index: InsertIndex) -> Self {
        self.index = index;
        self
    }
}

impl From<Move> for Transaction {
    fn from(input: Move) -> Self {
        Self::from_unit(Box::new(MoveUnit {
            input,
            outcome: None,
        }))
    }
}

/// Index to request when moving back to where `outcome` started.
pub(crate) fn undo_index(outcome: &MoveOutcome) -> usize {
    if outcome.old_parent == outcome.new_parent && outcome.old_index > outcome.new_index {
        outcome.old_index + 1
    } else {
        outcome.old_index
    }
}

struct MoveUnit {
    input: Move,
    outcome: Option<MoveOutcome>,
}

impl MoveUnit {
    fn run(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.outcome =
            Some(store.move_node(&self.input.guid, &self.input.new_parent, self.input.index)?);
        Ok(())
    }
}

impl Unit for MoveUnit {
    fn kind(&self) -> &'static str {
        "Move"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        self.run(store)?;
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let outcome = self.outcome.as_ref().ok_or_else(|| never_applied("Move"))?;
        store.move_node(
            &self.input.guid,
            &outcome.old_parent,
            InsertIndex::At(undo_index(outcome)),
        )?;
        Ok(())
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.run(store)
    }
}
