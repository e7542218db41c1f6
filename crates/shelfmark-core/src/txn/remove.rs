use super::{Transaction, TxnError, Unit, never_applied};
use crate::model::{BookmarkTree, Guid, RestoreMode};
use crate::store::BookmarkStore;

/// Remove an item with its whole subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remove {
    pub guid: Guid,
}

impl Remove {
    #[must_use]
    pub const fn new(guid: Guid) -> Self {
        Self { guid }
    }
}

impl From<Remove> for Transaction {
    fn from(input: Remove) -> Self {
        Self::from_unit(Box::new(RemoveUnit {
            guid: input.guid,
            removed: None,
        }))
    }
}

struct RemoveUnit {
    guid: Guid,
    removed: Option<BookmarkTree>,
}

impl Unit for RemoveUnit {
    fn kind(&self) -> &'static str {
        "Remove"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        self.removed = Some(store.delete_node(&self.guid)?);
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let tree = self.removed.as_ref().ok_or_else(|| never_applied("Remove"))?;
        store.restore_tree(tree, RestoreMode::Original)?;
        Ok(())
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.removed = Some(store.delete_node(&self.guid)?);
        Ok(())
    }
}
