use super::{Transaction, TxnError, Unit, never_applied};
use crate::error::StoreError;
use crate::model::{Guid, ItemType};
use crate::store::BookmarkStore;

/// Sort a folder's children by title, case-insensitively.
///
/// Separators stay where they are; each run of items between two separators
/// is sorted on its own. Undo restores the exact previous order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortByName {
    pub folder: Guid,
}

impl SortByName {
    #[must_use]
    pub const fn new(folder: Guid) -> Self {
        Self { folder }
    }
}

impl From<SortByName> for Transaction {
    fn from(input: SortByName) -> Self {
        Self::from_unit(Box::new(SortUnit {
            folder: input.folder,
            original: None,
        }))
    }
}

struct SortUnit {
    folder: Guid,
    original: Option<Vec<Guid>>,
}

/// Children of `folder` in sorted order.
fn sorted_children(store: &dyn BookmarkStore, folder: &Guid) -> Result<Vec<Guid>, StoreError> {
    let tree = store
        .snapshot_tree(folder)
        .ok_or_else(|| StoreError::ItemNotFound(folder.clone()))?;

    let mut sorted = Vec::with_capacity(tree.children.len());
    let mut run: Vec<(String, Guid)> = Vec::new();
    let flush = |run: &mut Vec<(String, Guid)>, out: &mut Vec<Guid>| {
        run.sort_by(|a, b| a.0.cmp(&b.0));
        out.extend(run.drain(..).map(|(_, guid)| guid));
    };
    for child in tree.children {
        if child.item_type == ItemType::Separator {
            flush(&mut run, &mut sorted);
            sorted.push(child.guid);
        } else {
            let key = child.title.unwrap_or_default().to_lowercase();
            run.push((key, child.guid));
        }
    }
    flush(&mut run, &mut sorted);
    Ok(sorted)
}

impl SortUnit {
    fn run(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let original = store.children_order(&self.folder)?;
        let sorted = sorted_children(store, &self.folder)?;
        store.set_children_order(&self.folder, &sorted)?;
        self.original = Some(original);
        Ok(())
    }
}

impl Unit for SortUnit {
    fn kind(&self) -> &'static str {
        "SortByName"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        self.run(store)?;
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let original = self.original.as_deref().ok_or_else(|| never_applied("SortByName"))?;
        store.set_children_order(&self.folder, original)?;
        Ok(())
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.run(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookmarkUrl;
    use crate::store::MemoryStore;
    use crate::txn::{NewBookmark, NewFolder, NewSeparator};

    #[test]
    fn runs_between_separators_sort_independently() {
        let mut store = MemoryStore::default();
        let folder: Transaction = NewFolder::new(Guid::menu()).into();
        let folder = folder.apply(&mut store).unwrap().unwrap();
        let u = BookmarkUrl::parse("http://sort.by.name/").unwrap();

        let mut add = |title: Option<&str>| -> Guid {
            let txn: Transaction = match title {
                Some(t) => NewBookmark::new(folder.clone(), u.clone()).title(t).into(),
                None => NewSeparator::new(folder.clone()).into(),
            };
            txn.apply(&mut store).unwrap().unwrap()
        };
        let three = add(Some("3"));
        let two = add(Some("2"));
        let one = add(Some("1"));
        let sep = add(None);
        let c = add(Some("c"));
        let b = add(Some("B"));
        let a = add(Some("a"));
        let original = vec![
            three.clone(),
            two.clone(),
            one.clone(),
            sep.clone(),
            c.clone(),
            b.clone(),
            a.clone(),
        ];

        let txn: Transaction = SortByName::new(folder.clone()).into();
        txn.apply(&mut store).unwrap();
        assert_eq!(
            store.children_order(&folder).unwrap(),
            vec![one, two, three, sep, a, b, c]
        );

        txn.reverse(&mut store).unwrap();
        assert_eq!(store.children_order(&folder).unwrap(), original);
    }

    #[test]
    fn sorting_a_bookmark_fails() {
        let mut store = MemoryStore::default();
        let bm: Transaction =
            NewBookmark::new(Guid::menu(), BookmarkUrl::parse("http://x/").unwrap()).into();
        let guid = bm.apply(&mut store).unwrap().unwrap();
        let txn: Transaction = SortByName::new(guid).into();
        assert!(matches!(
            txn.apply(&mut store),
            Err(TxnError::Store(StoreError::InvalidParent(_)))
        ));
    }
}
