//! Duplicating an item (or a whole subtree).
//!
//! The copy gets fresh GUIDs and strictly later timestamps. Undo removes
//! only the copy; redo brings back that same copy, GUIDs and timestamps
//! included.

use super::{Transaction, TxnError, Unit, never_applied};
use crate::error::StoreError;
use crate::model::{BookmarkTree, Guid, InsertIndex, RestoreMode};
use crate::store::BookmarkStore;

/// Duplicate `guid` under `new_parent` (its own parent when `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyItem {
    pub guid: Guid,
    pub new_parent: Option<Guid>,
    pub index: InsertIndex,
}

impl CopyItem {
    #[must_use]
    pub const fn new(guid: Guid) -> Self {
        Self {
            guid,
            new_parent: None,
            index: InsertIndex::Default,
        }
    }

    #[must_use]
    pub fn into_folder(mut self, parent: Guid) -> Self {
        self.new_parent = Some(parent);
        self
    }

    #[must_use]
    pub const fn at(mut self, index: InsertIndex) -> Self {
        self.index = index;
        self
    }
}

impl From<CopyItem> for Transaction {
    fn from(input: CopyItem) -> Self {
        Self::from_unit(Box::new(CopyUnit {
            input,
            copy: None,
            removed: None,
        }))
    }
}

struct CopyUnit {
    input: CopyItem,
    copy: Option<Guid>,
    removed: Option<BookmarkTree>,
}

impl Unit for CopyUnit {
    fn kind(&self) -> &'static str {
        "Copy"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        let mut tree = store
            .snapshot_tree(&self.input.guid)
            .ok_or_else(|| StoreError::ItemNotFound(self.input.guid.clone()))?;
        let parent = match &self.input.new_parent {
            Some(parent) => parent.clone(),
            None => tree
                .parent_guid
                .clone()
                .ok_or_else(|| StoreError::RootImmutable(self.input.guid.clone()))?,
        };
        let len = store.children_order(&parent)?.len();
        tree.parent_guid = Some(parent);
        tree.index = self.input.index.resolve(len);

        let guid = store.restore_tree(&tree, RestoreMode::Duplicate)?;
        self.copy = Some(guid.clone());
        Ok(Some(guid))
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let guid = self.copy.as_ref().ok_or_else(|| never_applied("Copy"))?;
        self.removed = Some(store.delete_node(guid)?);
        Ok(())
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let tree = self.removed.as_ref().ok_or_else(|| never_applied("Copy"))?;
        store.restore_tree(tree, RestoreMode::Original)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookmarkUrl;
    use crate::store::MemoryStore;
    use crate::txn::{NewBookmark, NewFolder, NewSeparator};

    #[test]
    fn copy_of_filled_folder_has_new_identity() {
        let mut store = MemoryStore::default();
        let folder: Transaction = NewFolder::new(Guid::menu()).title("Filled").into();
        let folder_guid = folder.apply(&mut store).unwrap().unwrap();
        for txn in [
            Transaction::from(NewFolder::new(folder_guid.clone()).title("Nested")),
            Transaction::from(NewSeparator::new(folder_guid.clone())),
            Transaction::from(NewBookmark::new(
                folder_guid.clone(),
                BookmarkUrl::parse("http://nested.bookmark/").unwrap(),
            )),
        ] {
            txn.apply(&mut store).unwrap();
        }

        let copy: Transaction = CopyItem::new(folder_guid.clone())
            .into_folder(Guid::toolbar())
            .into();
        let copy_guid = copy.apply(&mut store).unwrap().unwrap();
        let original = store.snapshot_tree(&folder_guid).unwrap();
        let duplicate = store.snapshot_tree(&copy_guid).unwrap();

        assert_ne!(duplicate.guid, original.guid);
        assert_eq!(duplicate.parent_guid, Some(Guid::toolbar()));
        assert_eq!(duplicate.children.len(), original.children.len());
        for (o, d) in original.children.iter().zip(&duplicate.children) {
            assert_ne!(o.guid, d.guid);
            assert_eq!(o.title, d.title);
            assert_eq!(o.index, d.index);
            assert!(d.date_added > o.date_added);
        }

        copy.reverse(&mut store).unwrap();
        assert!(store.snapshot_tree(&copy_guid).is_none());
        assert_eq!(store.snapshot_tree(&folder_guid).unwrap(), original);

        copy.reapply(&mut store).unwrap();
        assert_eq!(store.snapshot_tree(&copy_guid).unwrap(), duplicate);
    }

    #[test]
    fn copy_defaults_to_own_parent_and_appends() {
        let mut store = MemoryStore::default();
        let sep: Transaction = NewSeparator::new(Guid::menu()).into();
        let sep_guid = sep.apply(&mut store).unwrap().unwrap();
        let copy: Transaction = CopyItem::new(sep_guid.clone()).into();
        let copy_guid = copy.apply(&mut store).unwrap().unwrap();
        assert_eq!(
            store.children_order(&Guid::menu()).unwrap(),
            vec![sep_guid, copy_guid]
        );
    }
}
