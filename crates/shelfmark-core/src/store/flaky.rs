//! A store wrapper that refuses mutations on demand.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{BookmarkStore, MemoryStore};
use crate::error::StoreError;
use crate::model::{
    AnnoValue, BookmarkTree, BookmarkUrl, FieldValue, Guid, InsertIndex, MoveOutcome, NodeSpec,
    RestoreMode,
};

/// Lets `allow` mutations through, then fails the next `fail` ones.
///
/// The first refused call reports `ItemNotFound`, later ones
/// `InvalidParent`, so a test can tell which failure surfaced.
#[derive(Debug, Default)]
pub struct Fuse {
    armed: bool,
    allow: usize,
    fail: usize,
    tripped: usize,
}

impl Fuse {
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

pub fn arm(fuse: &Mutex<Fuse>, allow: usize, fail: usize) {
    *fuse.lock() = Fuse {
        armed: true,
        allow,
        fail,
        tripped: 0,
    };
}

pub struct FlakyStore {
    inner: MemoryStore,
    fuse: Arc<Mutex<Fuse>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> (Self, Arc<Mutex<Fuse>>) {
        let fuse = Arc::new(Mutex::new(Fuse::default()));
        let store = Self {
            inner,
            fuse: Arc::clone(&fuse),
        };
        (store, fuse)
    }

    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn trip(&self) -> Result<(), StoreError> {
        let mut fuse = self.fuse.lock();
        if !fuse.armed {
            return Ok(());
        }
        if fuse.allow > 0 {
            fuse.allow -= 1;
            return Ok(());
        }
        if fuse.fail > 0 {
            fuse.fail -= 1;
            fuse.tripped += 1;
            return Err(if fuse.tripped == 1 {
                StoreError::ItemNotFound(Guid::root())
            } else {
                StoreError::InvalidParent(Guid::root())
            });
        }
        Ok(())
    }
}

impl BookmarkStore for FlakyStore {
    fn create_node(&mut self, spec: &NodeSpec) -> Result<Guid, StoreError> {
        self.trip()?;
        self.inner.create_node(spec)
    }
    fn delete_node(&mut self, guid: &Guid) -> Result<BookmarkTree, StoreError> {
        self.trip()?;
        self.inner.delete_node(guid)
    }
    fn restore_tree(&mut self, tree: &BookmarkTree, mode: RestoreMode) -> Result<Guid, StoreError> {
        self.trip()?;
        self.inner.restore_tree(tree, mode)
    }
    fn move_node(
        &mut self,
        guid: &Guid,
        new_parent: &Guid,
        index: InsertIndex,
    ) -> Result<MoveOutcome, StoreError> {
        self.trip()?;
        self.inner.move_node(guid, new_parent, index)
    }
    fn set_field(&mut self, guid: &Guid, value: FieldValue) -> Result<FieldValue, StoreError> {
        self.trip()?;
        self.inner.set_field(guid, value)
    }
    fn set_annotation(
        &mut self,
        guid: &Guid,
        name: &str,
        value: Option<AnnoValue>,
    ) -> Result<Option<AnnoValue>, StoreError> {
        self.trip()?;
        self.inner.set_annotation(guid, name, value)
    }
    fn add_tag(&mut self, url: &BookmarkUrl, tag: &str) -> Result<bool, StoreError> {
        self.trip()?;
        self.inner.add_tag(url, tag)
    }
    fn remove_tag(&mut self, url: &BookmarkUrl, tag: &str) -> Result<bool, StoreError> {
        self.trip()?;
        self.inner.remove_tag(url, tag)
    }
    fn tags_for_url(&self, url: &BookmarkUrl) -> Vec<String> {
        self.inner.tags_for_url(url)
    }
    fn bookmarks_for_url(&self, url: &BookmarkUrl) -> Vec<Guid> {
        self.inner.bookmarks_for_url(url)
    }
    fn children_order(&self, folder: &Guid) -> Result<Vec<Guid>, StoreError> {
        self.inner.children_order(folder)
    }
    fn set_children_order(&mut self, folder: &Guid, order: &[Guid]) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.set_children_order(folder, order)
    }
    fn snapshot_tree(&self, guid: &Guid) -> Option<BookmarkTree> {
        self.inner.snapshot_tree(guid)
    }
    fn begin_batch(&mut self) {
        self.inner.begin_batch();
    }
    fn end_batch(&mut self) {
        self.inner.end_batch();
    }
}
