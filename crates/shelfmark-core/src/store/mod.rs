//! The store adapter boundary.
//!
//! [`BookmarkStore`] is everything the engine needs from the hierarchical
//! item store: execute/reverse primitives, side-state (tags, keywords,
//! annotations) preservation, and observer emission. The engine never looks
//! behind this trait.
//!
//! [`MemoryStore`] is the in-process reference implementation used by the
//! tests and the CLI.
//!
//! # Contract
//!
//! - Every mutating call either succeeds completely or fails without an
//!   observable effect.
//! - Every mutating call synchronously notifies the observer sink the store
//!   was constructed with.
//! - Calls that touch several nodes (subtree removal/restore, reordering)
//!   bracket their notifications with `begin_batch`/`end_batch`; batch
//!   boundaries nest and only the outermost pair is reported.
//! - Tags belong to URLs. A URL keeps its tags only while at least one
//!   bookmark references it.

#[cfg(test)]
pub(crate) mod flaky;
pub mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::model::{
    AnnoValue, BookmarkTree, BookmarkUrl, FieldValue, Guid, InsertIndex, MoveOutcome, NodeSpec,
    RestoreMode,
};

/// Capability the transaction engine drives.
pub trait BookmarkStore: Send {
    /// Insert a single node and return its GUID.
    fn create_node(&mut self, spec: &NodeSpec) -> Result<Guid, StoreError>;

    /// Remove a node with its whole subtree, returning everything needed to
    /// put it back (children, tags, keywords, annotations, timestamps).
    fn delete_node(&mut self, guid: &Guid) -> Result<BookmarkTree, StoreError>;

    /// Re-insert a captured subtree at `tree.parent_guid` / `tree.index`.
    ///
    /// Returns the GUID of the subtree root (a new one in
    /// [`RestoreMode::Duplicate`]).
    fn restore_tree(&mut self, tree: &BookmarkTree, mode: RestoreMode) -> Result<Guid, StoreError>;

    /// Move a node. `index` uses the pre-removal convention (see
    /// [`InsertIndex`]); the outcome carries the final indices.
    fn move_node(
        &mut self,
        guid: &Guid,
        new_parent: &Guid,
        index: InsertIndex,
    ) -> Result<MoveOutcome, StoreError>;

    /// Set a field, returning its previous value.
    fn set_field(&mut self, guid: &Guid, value: FieldValue) -> Result<FieldValue, StoreError>;

    /// Set (`Some`) or remove (`None`) an annotation, returning the previous
    /// value or `None` when it was absent.
    fn set_annotation(
        &mut self,
        guid: &Guid,
        name: &str,
        value: Option<AnnoValue>,
    ) -> Result<Option<AnnoValue>, StoreError>;

    /// Tag a bookmarked URL. Returns `false` when the tag was already there.
    fn add_tag(&mut self, url: &BookmarkUrl, tag: &str) -> Result<bool, StoreError>;

    /// Untag a URL. Returns `false` when the tag was not there.
    fn remove_tag(&mut self, url: &BookmarkUrl, tag: &str) -> Result<bool, StoreError>;

    /// Sorted tags of `url`.
    fn tags_for_url(&self, url: &BookmarkUrl) -> Vec<String>;

    /// Bookmarks referencing `url`, in creation order.
    fn bookmarks_for_url(&self, url: &BookmarkUrl) -> Vec<Guid>;

    /// Direct children of a folder, in order.
    fn children_order(&self, folder: &Guid) -> Result<Vec<Guid>, StoreError>;

    /// Reorder a folder's children. `order` must be a permutation of the
    /// current children.
    fn set_children_order(&mut self, folder: &Guid, order: &[Guid]) -> Result<(), StoreError>;

    /// Read-only snapshot of a subtree; `None` when `guid` does not exist.
    fn snapshot_tree(&self, guid: &Guid) -> Option<BookmarkTree>;

    /// Open a notification batch. Nested calls are counted.
    fn begin_batch(&mut self);

    /// Close a notification batch opened with [`begin_batch`](Self::begin_batch).
    fn end_batch(&mut self);

    fn is_bookmarked(&self, url: &BookmarkUrl) -> bool {
        !self.bookmarks_for_url(url).is_empty()
    }
}
