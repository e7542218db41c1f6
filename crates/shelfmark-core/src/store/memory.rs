//! In-memory [`BookmarkStore`].
//!
//! Layout mirrors a browser bookmarks database: an invisible root holding
//! the menu, toolbar and unfiled folders; folders own an ordered child list;
//! tags are kept per URL rather than per bookmark.
//!
//! Every node gets an internal row id on insertion. Row ids are never reused
//! and are not part of [`BookmarkTree`] snapshots, so a restored subtree
//! compares equal to the captured one even though its row ids are new.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, warn};

use super::BookmarkStore;
use crate::error::StoreError;
use crate::model::{
    AnnoValue, Annotation, BookmarkTree, BookmarkUrl, FieldValue, Guid, InsertIndex, ItemType,
    LIVEMARK_FEED_ANNO, MoveOutcome, NodeItem, NodeSpec, RestoreMode,
};
use crate::observer::{NullObserver, ObserverSink, StoreEvent};

// ---------------------------------------------------------------------------
// Internal node representation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Payload {
    Folder {
        title: Option<String>,
        children: Vec<Guid>,
    },
    Bookmark {
        url: BookmarkUrl,
        title: Option<String>,
    },
    Separator,
}

#[derive(Debug, Clone)]
struct Node {
    row_id: i64,
    parent: Option<Guid>,
    payload: Payload,
    keyword: Option<String>,
    annos: BTreeMap<String, AnnoValue>,
    date_added: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl Node {
    const fn item_type(&self) -> ItemType {
        match self.payload {
            Payload::Folder { .. } => ItemType::Folder,
            Payload::Bookmark { .. } => ItemType::Bookmark,
            Payload::Separator => ItemType::Separator,
        }
    }

    const fn title(&self) -> Option<&String> {
        match &self.payload {
            Payload::Folder { title, .. } | Payload::Bookmark { title, .. } => title.as_ref(),
            Payload::Separator => None,
        }
    }

    const fn url(&self) -> Option<&BookmarkUrl> {
        match &self.payload {
            Payload::Bookmark { url, .. } => Some(url),
            _ => None,
        }
    }

    fn children(&self) -> &[Guid] {
        match &self.payload {
            Payload::Folder { children, .. } => children,
            _ => &[],
        }
    }

    fn is_livemark(&self) -> bool {
        matches!(self.payload, Payload::Folder { .. }) && self.annos.contains_key(LIVEMARK_FEED_ANNO)
    }
}

/// Microsecond clock that never hands out the same instant twice.
#[derive(Debug, Clone)]
struct Clock {
    last: DateTime<Utc>,
}

impl Clock {
    fn new() -> Self {
        Self {
            last: Utc::now().trunc_subsecs(6),
        }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        self.last = if now > self.last {
            now
        } else {
            self.last + Duration::microseconds(1)
        };
        self.last
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Reference store adapter holding the whole tree in memory.
pub struct MemoryStore {
    nodes: HashMap<Guid, Node>,
    tags: BTreeMap<BookmarkUrl, BTreeSet<String>>,
    observer: Arc<dyn ObserverSink>,
    clock: Clock,
    next_row_id: i64,
    batch_depth: usize,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("nodes", &self.nodes.len())
            .field("tagged_urls", &self.tags.len())
            .field("batch_depth", &self.batch_depth)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(NullObserver))
    }
}

impl MemoryStore {
    /// Store seeded with the root and the menu/toolbar/unfiled folders.
    #[must_use]
    pub fn new(observer: Arc<dyn ObserverSink>) -> Self {
        Self::with_roots(observer, true)
    }

    /// Store with only the invisible root when `seed_roots` is false.
    ///
    /// Without the built-in folders nothing can be inserted (the root does
    /// not accept user items); this is mostly useful to test failure paths.
    #[must_use]
    pub fn with_roots(observer: Arc<dyn ObserverSink>, seed_roots: bool) -> Self {
        let mut store = Self {
            nodes: HashMap::new(),
            tags: BTreeMap::new(),
            observer,
            clock: Clock::new(),
            next_row_id: 1,
            batch_depth: 0,
        };

        let now = store.clock.tick();
        let root = Node {
            row_id: store.alloc_row_id(),
            parent: None,
            payload: Payload::Folder {
                title: None,
                children: Vec::new(),
            },
            keyword: None,
            annos: BTreeMap::new(),
            date_added: now,
            last_modified: now,
        };
        store.nodes.insert(Guid::root(), root);

        if seed_roots {
            for (guid, title) in [
                (Guid::menu(), "Bookmarks Menu"),
                (Guid::toolbar(), "Bookmarks Toolbar"),
                (Guid::unfiled(), "Other Bookmarks"),
            ] {
                let node = Node {
                    row_id: store.alloc_row_id(),
                    parent: Some(Guid::root()),
                    payload: Payload::Folder {
                        title: Some(title.to_string()),
                        children: Vec::new(),
                    },
                    keyword: None,
                    annos: BTreeMap::new(),
                    date_added: now,
                    last_modified: now,
                };
                let index = store.nodes.get(&Guid::root()).map_or(0, |r| r.children().len());
                store.insert_raw(&guid, &Guid::root(), index, node);
            }
        }
        store
    }

    /// Internal row id of a node. Changes when a node is removed and restored.
    #[must_use]
    pub fn row_id(&self, guid: &Guid) -> Option<i64> {
        self.nodes.get(guid).map(|n| n.row_id)
    }

    /// Number of nodes, including the root.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every tagged URL with its tags.
    #[must_use]
    pub fn all_tags(&self) -> BTreeMap<BookmarkUrl, Vec<String>> {
        self.tags
            .iter()
            .map(|(url, tags)| (url.clone(), tags.iter().cloned().collect()))
            .collect()
    }

    // -- helpers ------------------------------------------------------------

    fn emit(&self, event: &StoreEvent) {
        self.observer.notify(event);
    }

    const fn alloc_row_id(&mut self) -> i64 {
        let id = self.next_row_id;
        self.next_row_id += 1;
        id
    }

    fn node(&self, guid: &Guid) -> Result<&Node, StoreError> {
        self.nodes
            .get(guid)
            .ok_or_else(|| StoreError::ItemNotFound(guid.clone()))
    }

    fn node_mut(&mut self, guid: &Guid) -> Result<&mut Node, StoreError> {
        self.nodes
            .get_mut(guid)
            .ok_or_else(|| StoreError::ItemNotFound(guid.clone()))
    }

    fn children_mut(&mut self, folder: &Guid) -> Result<&mut Vec<Guid>, StoreError> {
        match &mut self.node_mut(folder)?.payload {
            Payload::Folder { children, .. } => Ok(children),
            _ => Err(StoreError::InvalidParent(folder.clone())),
        }
    }

    /// Whether user items may be inserted under `parent`.
    fn check_container(&self, parent: &Guid) -> Result<(), StoreError> {
        let node = self.node(parent)?;
        if *parent == Guid::root() || node.is_livemark() {
            return Err(StoreError::InvalidParent(parent.clone()));
        }
        match node.payload {
            Payload::Folder { .. } => Ok(()),
            _ => Err(StoreError::InvalidParent(parent.clone())),
        }
    }

    /// Parent and index of a non-root node.
    fn position(&self, guid: &Guid) -> Result<(Guid, usize), StoreError> {
        let node = self.node(guid)?;
        let parent = node
            .parent
            .clone()
            .ok_or_else(|| StoreError::RootImmutable(guid.clone()))?;
        let index = self
            .node(&parent)?
            .children()
            .iter()
            .position(|c| c == guid)
            .ok_or_else(|| StoreError::ItemNotFound(guid.clone()))?;
        Ok((parent, index))
    }

    fn insert_raw(&mut self, guid: &Guid, parent: &Guid, index: usize, node: Node) {
        self.nodes.insert(guid.clone(), node);
        if let Ok(children) = self.children_mut(parent) {
            let at = index.min(children.len());
            children.insert(at, guid.clone());
        }
    }

    fn is_ancestor(&self, ancestor: &Guid, of: &Guid) -> bool {
        let mut current = self.nodes.get(of).and_then(|n| n.parent.clone());
        while let Some(guid) = current {
            if guid == *ancestor {
                return true;
            }
            current = self.nodes.get(&guid).and_then(|n| n.parent.clone());
        }
        false
    }

    /// Drop a URL's tags once nothing references it any more.
    fn prune_tags(&mut self, url: &BookmarkUrl) {
        if !self.is_bookmarked(url) && self.tags.remove(url).is_some() {
            debug!(%url, "dropped tags of unreferenced url");
        }
    }

    fn notify_tags_changed(&self, url: &BookmarkUrl) {
        let joined = self.tags_for_url(url).join(",");
        for guid in self.bookmarks_for_url(url) {
            let Some(node) = self.nodes.get(&guid) else {
                continue;
            };
            let Some(parent) = node.parent.clone() else {
                continue;
            };
            self.emit(&StoreEvent::ItemChanged {
                guid: guid.clone(),
                parent_guid: parent,
                item_type: node.item_type(),
                property: "tags".into(),
                is_annotation: false,
                new_value: Some(joined.clone()),
                last_modified: node.last_modified,
            });
        }
    }

    fn emit_changed(&self, guid: &Guid, property: &str, is_annotation: bool, new_value: Option<String>) {
        let Some(node) = self.nodes.get(guid) else {
            return;
        };
        self.emit(&StoreEvent::ItemChanged {
            guid: guid.clone(),
            parent_guid: node.parent.clone().unwrap_or_else(Guid::root),
            item_type: node.item_type(),
            property: property.to_string(),
            is_annotation,
            new_value,
            last_modified: node.last_modified,
        });
    }

    fn build_tree(&self, guid: &Guid, index: usize) -> Option<BookmarkTree> {
        let node = self.nodes.get(guid)?;
        let url = node.url().cloned();
        let tags = url.as_ref().map(|u| self.tags_for_url(u)).unwrap_or_default();
        let children = node
            .children()
            .iter()
            .enumerate()
            .filter_map(|(i, child)| self.build_tree(child, i))
            .collect();
        Some(BookmarkTree {
            guid: guid.clone(),
            parent_guid: node.parent.clone(),
            index,
            item_type: node.item_type(),
            title: node.title().cloned(),
            url,
            keyword: node.keyword.clone(),
            tags,
            annos: node
                .annos
                .iter()
                .map(|(name, value)| Annotation::new(name.clone(), value.clone()))
                .collect(),
            date_added: node.date_added,
            last_modified: node.last_modified,
            children,
        })
    }

    fn remove_recursive(&mut self, guid: &Guid) -> Result<(), StoreError> {
        let children = self.node(guid)?.children().to_vec();
        for child in children.iter().rev() {
            self.remove_recursive(child)?;
        }

        let (parent, index) = self.position(guid)?;
        self.children_mut(&parent)?.remove(index);
        let node = self
            .nodes
            .remove(guid)
            .ok_or_else(|| StoreError::ItemNotFound(guid.clone()))?;
        self.emit(&StoreEvent::ItemRemoved {
            guid: guid.clone(),
            parent_guid: parent,
            index,
            item_type: node.item_type(),
            url: node.url().cloned(),
        });
        Ok(())
    }

    /// Reject a restore up front so that a failure leaves no partial subtree.
    fn validate_restorable(&self, tree: &BookmarkTree, mode: RestoreMode) -> Result<(), StoreError> {
        for node in tree.walk() {
            if mode == RestoreMode::Original && self.nodes.contains_key(&node.guid) {
                return Err(StoreError::DuplicateGuid(node.guid.clone()));
            }
            if node.item_type == ItemType::Bookmark && node.url.is_none() {
                return Err(StoreError::InvalidField {
                    item: node.guid.clone(),
                    field: "uri",
                });
            }
        }
        Ok(())
    }

    fn restore_node(
        &mut self,
        tree: &BookmarkTree,
        parent: &Guid,
        index: usize,
        mode: RestoreMode,
    ) -> Result<Guid, StoreError> {
        let guid = match mode {
            RestoreMode::Original => tree.guid.clone(),
            RestoreMode::Duplicate => Guid::generate(),
        };
        let payload = match tree.item_type {
            ItemType::Folder => Payload::Folder {
                title: tree.title.clone(),
                children: Vec::new(),
            },
            ItemType::Bookmark => Payload::Bookmark {
                url: tree.url.clone().ok_or_else(|| StoreError::InvalidField {
                    item: tree.guid.clone(),
                    field: "uri",
                })?,
                title: tree.title.clone(),
            },
            ItemType::Separator => Payload::Separator,
        };
        let now = self.clock.tick();
        let node = Node {
            row_id: self.alloc_row_id(),
            parent: Some(parent.clone()),
            payload,
            keyword: None,
            annos: BTreeMap::new(),
            date_added: now,
            last_modified: now,
        };
        self.insert_raw(&guid, parent, index, node);
        self.emit(&StoreEvent::ItemAdded {
            guid: guid.clone(),
            parent_guid: parent.clone(),
            index,
            item_type: tree.item_type,
            title: tree.title.clone(),
            url: tree.url.clone(),
        });

        if let Some(keyword) = &tree.keyword {
            self.node_mut(&guid)?.keyword = Some(keyword.clone());
            self.emit_changed(&guid, "keyword", false, Some(keyword.clone()));
        }
        for anno in &tree.annos {
            self.node_mut(&guid)?
                .annos
                .insert(anno.name.clone(), anno.value.clone());
            self.emit_changed(&guid, &anno.name, true, Some(anno.value.to_string()));
        }
        if let Some(url) = &tree.url {
            for tag in &tree.tags {
                self.tags.entry(url.clone()).or_default().insert(tag.clone());
            }
        }

        for (i, child) in tree.children.iter().enumerate() {
            self.restore_node(child, &guid, i, mode)?;
        }

        if mode == RestoreMode::Original {
            let node = self.node_mut(&guid)?;
            node.date_added = tree.date_added;
            node.last_modified = tree.last_modified;
            self.emit_changed(&guid, "dateAdded", false, Some(tree.date_added.to_rfc3339()));
            self.emit_changed(
                &guid,
                "lastModified",
                false,
                Some(tree.last_modified.to_rfc3339()),
            );
        }
        Ok(guid)
    }
}

impl BookmarkStore for MemoryStore {
    fn create_node(&mut self, spec: &NodeSpec) -> Result<Guid, StoreError> {
        self.check_container(&spec.parent)?;
        if let Some(guid) = &spec.guid {
            if self.nodes.contains_key(guid) {
                return Err(StoreError::DuplicateGuid(guid.clone()));
            }
        }
        let len = self.node(&spec.parent)?.children().len();
        let index = spec.index.resolve(len);
        if index > len {
            return Err(StoreError::IndexOutOfRange {
                parent: spec.parent.clone(),
                index,
                len,
            });
        }

        let guid = spec.guid.clone().unwrap_or_else(Guid::generate);
        let (payload, title, url) = match &spec.item {
            NodeItem::Folder { title } => (
                Payload::Folder {
                    title: title.clone(),
                    children: Vec::new(),
                },
                title.clone(),
                None,
            ),
            NodeItem::Bookmark { url, title } => (
                Payload::Bookmark {
                    url: url.clone(),
                    title: title.clone(),
                },
                title.clone(),
                Some(url.clone()),
            ),
            NodeItem::Separator => (Payload::Separator, None, None),
        };
        let now = self.clock.tick();
        let node = Node {
            row_id: self.alloc_row_id(),
            parent: Some(spec.parent.clone()),
            payload,
            keyword: None,
            annos: BTreeMap::new(),
            date_added: now,
            last_modified: now,
        };
        self.insert_raw(&guid, &spec.parent, index, node);
        self.emit(&StoreEvent::ItemAdded {
            guid: guid.clone(),
            parent_guid: spec.parent.clone(),
            index,
            item_type: spec.item.item_type(),
            title,
            url,
        });
        Ok(guid)
    }

    fn delete_node(&mut self, guid: &Guid) -> Result<BookmarkTree, StoreError> {
        if guid.is_builtin_root() {
            return Err(StoreError::RootImmutable(guid.clone()));
        }
        let (_, index) = self.position(guid)?;
        let tree = self
            .build_tree(guid, index)
            .ok_or_else(|| StoreError::ItemNotFound(guid.clone()))?;

        let multi = tree.node_count() > 1;
        if multi {
            self.begin_batch();
        }
        let removed = self.remove_recursive(guid);
        let urls: BTreeSet<BookmarkUrl> = tree.walk().filter_map(|n| n.url.clone()).collect();
        for url in &urls {
            self.prune_tags(url);
        }
        if multi {
            self.end_batch();
        }
        removed?;
        Ok(tree)
    }

    fn restore_tree(&mut self, tree: &BookmarkTree, mode: RestoreMode) -> Result<Guid, StoreError> {
        let parent = tree
            .parent_guid
            .clone()
            .ok_or_else(|| StoreError::InvalidParent(Guid::root()))?;
        self.check_container(&parent)?;
        let len = self.node(&parent)?.children().len();
        if tree.index > len {
            return Err(StoreError::IndexOutOfRange {
                parent,
                index: tree.index,
                len,
            });
        }
        self.validate_restorable(tree, mode)?;

        let multi = tree.node_count() > 1;
        if multi {
            self.begin_batch();
        }
        let restored = self.restore_node(tree, &parent, tree.index, mode);
        if multi {
            self.end_batch();
        }
        restored
    }

    fn move_node(
        &mut self,
        guid: &Guid,
        new_parent: &Guid,
        index: InsertIndex,
    ) -> Result<MoveOutcome, StoreError> {
        if guid.is_builtin_root() {
            return Err(StoreError::RootImmutable(guid.clone()));
        }
        let item_type = self.node(guid)?.item_type();
        self.check_container(new_parent)?;
        if new_parent == guid || self.is_ancestor(guid, new_parent) {
            return Err(StoreError::CycleDetected {
                item: guid.clone(),
                parent: new_parent.clone(),
            });
        }

        let (old_parent, old_index) = self.position(guid)?;
        let target_len = self.node(new_parent)?.children().len();
        let requested = index.resolve(target_len);
        if requested > target_len {
            return Err(StoreError::IndexOutOfRange {
                parent: new_parent.clone(),
                index: requested,
                len: target_len,
            });
        }
        // Within one folder the requested index counts the item itself.
        let new_index = if old_parent == *new_parent && requested > old_index {
            requested - 1
        } else {
            requested
        };

        self.children_mut(&old_parent)?.remove(old_index);
        let children = self.children_mut(new_parent)?;
        let at = new_index.min(children.len());
        children.insert(at, guid.clone());
        self.node_mut(guid)?.parent = Some(new_parent.clone());

        let outcome = MoveOutcome {
            old_parent,
            old_index,
            new_parent: new_parent.clone(),
            new_index: at,
        };
        self.emit(&StoreEvent::ItemMoved {
            guid: guid.clone(),
            item_type,
            old_parent: outcome.old_parent.clone(),
            old_index: outcome.old_index,
            new_parent: outcome.new_parent.clone(),
            new_index: outcome.new_index,
        });
        Ok(outcome)
    }

    fn set_field(&mut self, guid: &Guid, value: FieldValue) -> Result<FieldValue, StoreError> {
        let value = match value {
            FieldValue::Keyword(Some(k)) if k.is_empty() => FieldValue::Keyword(None),
            other => other,
        };
        let item_type = self.node(guid)?.item_type();
        let applies = match (&value, item_type) {
            (FieldValue::Title(_), ItemType::Separator) => false,
            (FieldValue::Url(_) | FieldValue::Keyword(_), ty) => ty == ItemType::Bookmark,
            (FieldValue::Title(_), _) => true,
        };
        if !applies {
            return Err(StoreError::InvalidField {
                item: guid.clone(),
                field: value.name(),
            });
        }

        let now = self.clock.tick();
        let node = self.node_mut(guid)?;
        let mut old_url = None;
        let previous = match (&value, &mut node.payload) {
            (
                FieldValue::Title(new),
                Payload::Folder { title, .. } | Payload::Bookmark { title, .. },
            ) => FieldValue::Title(std::mem::replace(title, new.clone())),
            (FieldValue::Url(new), Payload::Bookmark { url, .. }) => {
                let prev = std::mem::replace(url, new.clone());
                old_url = Some(prev.clone());
                FieldValue::Url(prev)
            }
            (FieldValue::Keyword(new), _) => {
                FieldValue::Keyword(std::mem::replace(&mut node.keyword, new.clone()))
            }
            _ => {
                return Err(StoreError::InvalidField {
                    item: guid.clone(),
                    field: value.name(),
                });
            }
        };
        node.last_modified = now;

        self.emit_changed(guid, value.name(), false, value.display_value());
        if let Some(old) = old_url {
            self.prune_tags(&old);
        }
        Ok(previous)
    }

    fn set_annotation(
        &mut self,
        guid: &Guid,
        name: &str,
        value: Option<AnnoValue>,
    ) -> Result<Option<AnnoValue>, StoreError> {
        let now = self.clock.tick();
        let node = self.node_mut(guid)?;
        let previous = match &value {
            Some(v) => node.annos.insert(name.to_string(), v.clone()),
            None => node.annos.remove(name),
        };
        node.last_modified = now;
        self.emit_changed(guid, name, true, value.map(|v| v.to_string()));
        Ok(previous)
    }

    fn add_tag(&mut self, url: &BookmarkUrl, tag: &str) -> Result<bool, StoreError> {
        if !self.is_bookmarked(url) {
            return Err(StoreError::UrlNotBookmarked(url.to_string()));
        }
        let inserted = self
            .tags
            .entry(url.clone())
            .or_default()
            .insert(tag.to_string());
        if inserted {
            self.notify_tags_changed(url);
        }
        Ok(inserted)
    }

    fn remove_tag(&mut self, url: &BookmarkUrl, tag: &str) -> Result<bool, StoreError> {
        let Some(set) = self.tags.get_mut(url) else {
            return Ok(false);
        };
        let removed = set.remove(tag);
        if set.is_empty() {
            self.tags.remove(url);
        }
        if removed {
            self.notify_tags_changed(url);
        }
        Ok(removed)
    }

    fn tags_for_url(&self, url: &BookmarkUrl) -> Vec<String> {
        self.tags
            .get(url)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn bookmarks_for_url(&self, url: &BookmarkUrl) -> Vec<Guid> {
        let mut found: Vec<(i64, Guid)> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.url() == Some(url))
            .map(|(guid, node)| (node.row_id, guid.clone()))
            .collect();
        found.sort();
        found.into_iter().map(|(_, guid)| guid).collect()
    }

    fn children_order(&self, folder: &Guid) -> Result<Vec<Guid>, StoreError> {
        match &self.node(folder)?.payload {
            Payload::Folder { children, .. } => Ok(children.clone()),
            _ => Err(StoreError::InvalidParent(folder.clone())),
        }
    }

    fn set_children_order(&mut self, folder: &Guid, order: &[Guid]) -> Result<(), StoreError> {
        let current = self.children_order(folder)?;
        let as_set: BTreeSet<&Guid> = order.iter().collect();
        if order.len() != current.len()
            || as_set.len() != order.len()
            || !current.iter().all(|g| as_set.contains(g))
        {
            return Err(StoreError::OrderMismatch(folder.clone()));
        }
        if order == current.as_slice() {
            return Ok(());
        }

        *self.children_mut(folder)? = order.to_vec();
        self.begin_batch();
        for (new_index, guid) in order.iter().enumerate() {
            let Some(old_index) = current.iter().position(|g| g == guid) else {
                continue;
            };
            if old_index == new_index {
                continue;
            }
            let item_type = self.node(guid).map_or(ItemType::Bookmark, Node::item_type);
            self.emit(&StoreEvent::ItemMoved {
                guid: guid.clone(),
                item_type,
                old_parent: folder.clone(),
                old_index,
                new_parent: folder.clone(),
                new_index,
            });
        }
        self.end_batch();
        Ok(())
    }

    fn snapshot_tree(&self, guid: &Guid) -> Option<BookmarkTree> {
        let index = self.position(guid).map_or(0, |(_, i)| i);
        self.build_tree(guid, index)
    }

    fn begin_batch(&mut self) {
        if self.batch_depth == 0 {
            self.emit(&StoreEvent::BeginBatch);
        }
        self.batch_depth += 1;
    }

    fn end_batch(&mut self) {
        if self.batch_depth == 0 {
            warn!("end_batch without matching begin_batch");
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.emit(&StoreEvent::EndBatch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LIVEMARK_FEED_ANNO, POST_DATA_ANNO};
    use crate::observer::RecordingObserver;

    fn store() -> (MemoryStore, Arc<RecordingObserver>) {
        let obs = Arc::new(RecordingObserver::new());
        (MemoryStore::new(obs.clone()), obs)
    }

    fn url(s: &str) -> BookmarkUrl {
        BookmarkUrl::parse(s).unwrap()
    }

    fn folder(store: &mut MemoryStore, parent: &Guid, title: &str) -> Guid {
        store
            .create_node(&NodeSpec {
                guid: None,
                parent: parent.clone(),
                index: InsertIndex::Default,
                item: NodeItem::Folder {
                    title: Some(title.into()),
                },
            })
            .unwrap()
    }

    fn bookmark(store: &mut MemoryStore, parent: &Guid, u: &str, title: &str) -> Guid {
        store
            .create_node(&NodeSpec {
                guid: None,
                parent: parent.clone(),
                index: InsertIndex::Default,
                item: NodeItem::Bookmark {
                    url: url(u),
                    title: Some(title.into()),
                },
            })
            .unwrap()
    }

    #[test]
    fn seeds_builtin_roots() {
        let (store, _) = store();
        assert_eq!(
            store.children_order(&Guid::root()).unwrap(),
            vec![Guid::menu(), Guid::toolbar(), Guid::unfiled()]
        );
        assert_eq!(store.node_count(), 4);
    }

    #[test]
    fn root_rejects_user_items_and_removal() {
        let (mut store, _) = store();
        let err = store
            .create_node(&NodeSpec {
                guid: None,
                parent: Guid::root(),
                index: InsertIndex::Default,
                item: NodeItem::Separator,
            })
            .unwrap_err();
        assert_eq!(err, StoreError::InvalidParent(Guid::root()));
        assert_eq!(
            store.delete_node(&Guid::menu()).unwrap_err(),
            StoreError::RootImmutable(Guid::menu())
        );
    }

    #[test]
    fn create_reports_added_with_final_index() {
        let (mut store, obs) = store();
        let a = bookmark(&mut store, &Guid::menu(), "http://a/", "A");
        let b = store
            .create_node(&NodeSpec {
                guid: None,
                parent: Guid::menu(),
                index: InsertIndex::At(0),
                item: NodeItem::Separator,
            })
            .unwrap();
        assert_eq!(store.children_order(&Guid::menu()).unwrap(), vec![b.clone(), a]);
        let events = obs.events();
        assert!(matches!(
            &events[1],
            StoreEvent::ItemAdded { guid, index: 0, item_type: ItemType::Separator, .. } if *guid == b
        ));
    }

    #[test]
    fn create_rejects_out_of_range_index() {
        let (mut store, _) = store();
        let err = store
            .create_node(&NodeSpec {
                guid: None,
                parent: Guid::menu(),
                index: InsertIndex::At(3),
                item: NodeItem::Separator,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::IndexOutOfRange { index: 3, len: 0, .. }));
    }

    #[test]
    fn delete_then_restore_is_structurally_identical() {
        let (mut store, obs) = store();
        let f = folder(&mut store, &Guid::menu(), "F");
        let nested = folder(&mut store, &f, "Nested");
        let b = bookmark(&mut store, &nested, "http://deep/", "Deep");
        store.set_field(&b, FieldValue::Keyword(Some("kw".into()))).unwrap();
        store
            .set_annotation(&b, POST_DATA_ANNO, Some("q=%s".into()))
            .unwrap();
        store.add_tag(&url("http://deep/"), "t1").unwrap();
        let before = store.snapshot_tree(&f).unwrap();
        let old_row = store.row_id(&b).unwrap();

        obs.reset();
        let captured = store.delete_node(&f).unwrap();
        assert_eq!(captured, before);
        assert!(store.snapshot_tree(&f).is_none());
        assert!(store.tags_for_url(&url("http://deep/")).is_empty());
        assert_eq!(obs.removed(), vec![b.clone(), nested.clone(), f.clone()]);
        assert_eq!(obs.batches(), 1);

        obs.reset();
        let restored = store.restore_tree(&captured, RestoreMode::Original).unwrap();
        assert_eq!(restored, f);
        assert_eq!(store.snapshot_tree(&f).unwrap(), before);
        assert_eq!(store.tags_for_url(&url("http://deep/")), vec!["t1"]);
        assert_ne!(store.row_id(&b).unwrap(), old_row);
        assert_eq!(obs.added(), vec![f.clone(), nested, b.clone()]);
        assert!(obs.last_change(&b, "dateAdded").is_some());
        assert!(obs.last_change(&b, "lastModified").is_some());
    }

    #[test]
    fn duplicate_gets_new_guids_and_later_timestamps() {
        let (mut store, _) = store();
        let f = folder(&mut store, &Guid::menu(), "F");
        bookmark(&mut store, &f, "http://x/", "X");
        let mut tree = store.snapshot_tree(&f).unwrap();
        tree.index = 1;

        let dup = store.restore_tree(&tree, RestoreMode::Duplicate).unwrap();
        assert_ne!(dup, f);
        let copy = store.snapshot_tree(&dup).unwrap();
        assert_eq!(copy.title, tree.title);
        assert_eq!(copy.children.len(), 1);
        assert_ne!(copy.children[0].guid, tree.children[0].guid);
        assert!(copy.date_added > tree.date_added);
        assert!(copy.children[0].date_added > tree.children[0].date_added);
        assert_eq!(store.bookmarks_for_url(&url("http://x/")).len(), 2);
    }

    #[test]
    fn original_restore_rejects_existing_guid() {
        let (mut store, _) = store();
        let f = folder(&mut store, &Guid::menu(), "F");
        let tree = store.snapshot_tree(&f).unwrap();
        assert_eq!(
            store.restore_tree(&tree, RestoreMode::Original).unwrap_err(),
            StoreError::DuplicateGuid(f)
        );
    }

    #[test]
    fn same_folder_move_down_uses_pre_removal_index() {
        let (mut store, obs) = store();
        let a = bookmark(&mut store, &Guid::menu(), "http://a/", "A");
        let b = bookmark(&mut store, &Guid::menu(), "http://b/", "B");
        let c = bookmark(&mut store, &Guid::menu(), "http://c/", "C");

        let out = store.move_node(&a, &Guid::menu(), InsertIndex::At(2)).unwrap();
        assert_eq!((out.old_index, out.new_index), (0, 1));
        assert_eq!(
            store.children_order(&Guid::menu()).unwrap(),
            vec![b.clone(), a.clone(), c.clone()]
        );

        let out = store.move_node(&a, &Guid::menu(), InsertIndex::Default).unwrap();
        assert_eq!((out.old_index, out.new_index), (1, 2));
        assert_eq!(store.children_order(&Guid::menu()).unwrap(), vec![b, c, a.clone()]);
        assert_eq!(obs.moves_of(&a).len(), 2);
    }

    #[test]
    fn same_folder_move_up_keeps_requested_index() {
        let (mut store, _) = store();
        let a = bookmark(&mut store, &Guid::menu(), "http://a/", "A");
        let b = bookmark(&mut store, &Guid::menu(), "http://b/", "B");
        let out = store.move_node(&b, &Guid::menu(), InsertIndex::At(0)).unwrap();
        assert_eq!((out.old_index, out.new_index), (1, 0));
        assert_eq!(store.children_order(&Guid::menu()).unwrap(), vec![b, a]);
    }

    #[test]
    fn move_into_own_subtree_is_a_cycle() {
        let (mut store, _) = store();
        let f = folder(&mut store, &Guid::menu(), "F");
        let inner = folder(&mut store, &f, "Inner");
        assert!(matches!(
            store.move_node(&f, &inner, InsertIndex::Default),
            Err(StoreError::CycleDetected { .. })
        ));
        assert!(matches!(
            store.move_node(&f, &f, InsertIndex::Default),
            Err(StoreError::CycleDetected { .. })
        ));
    }

    #[test]
    fn url_change_drops_tags_of_unreferenced_url() {
        let (mut store, _) = store();
        let b = bookmark(&mut store, &Guid::menu(), "http://old/", "B");
        store.add_tag(&url("http://old/"), "t").unwrap();
        let prev = store.set_field(&b, FieldValue::Url(url("http://new/"))).unwrap();
        assert_eq!(prev, FieldValue::Url(url("http://old/")));
        assert!(store.tags_for_url(&url("http://old/")).is_empty());
    }

    #[test]
    fn fields_are_checked_against_item_type() {
        let (mut store, _) = store();
        let f = folder(&mut store, &Guid::menu(), "F");
        assert!(matches!(
            store.set_field(&f, FieldValue::Keyword(Some("k".into()))),
            Err(StoreError::InvalidField { field: "keyword", .. })
        ));
        let prev = store.set_field(&f, FieldValue::Title(Some("G".into()))).unwrap();
        assert_eq!(prev, FieldValue::Title(Some("F".into())));
    }

    #[test]
    fn empty_keyword_clears() {
        let (mut store, obs) = store();
        let b = bookmark(&mut store, &Guid::menu(), "http://k/", "K");
        store.set_field(&b, FieldValue::Keyword(Some("kw".into()))).unwrap();
        let prev = store.set_field(&b, FieldValue::Keyword(Some(String::new()))).unwrap();
        assert_eq!(prev, FieldValue::Keyword(Some("kw".into())));
        let Some(StoreEvent::ItemChanged { new_value, .. }) = obs.last_change(&b, "keyword") else {
            panic!("expected keyword change");
        };
        assert_eq!(new_value, None);
    }

    #[test]
    fn tagging_requires_a_bookmark() {
        let (mut store, _) = store();
        assert!(matches!(
            store.add_tag(&url("http://nobody/"), "t"),
            Err(StoreError::UrlNotBookmarked(_))
        ));
        bookmark(&mut store, &Guid::menu(), "http://nobody/", "N");
        assert!(store.add_tag(&url("http://nobody/"), "t").unwrap());
        assert!(!store.add_tag(&url("http://nobody/"), "t").unwrap());
        assert!(store.remove_tag(&url("http://nobody/"), "t").unwrap());
        assert!(!store.remove_tag(&url("http://nobody/"), "t").unwrap());
    }

    #[test]
    fn livemark_folders_do_not_accept_children() {
        let (mut store, _) = store();
        let lm = folder(&mut store, &Guid::menu(), "Feed");
        store
            .set_annotation(&lm, LIVEMARK_FEED_ANNO, Some("http://feed/".into()))
            .unwrap();
        assert!(matches!(
            store.create_node(&NodeSpec {
                guid: None,
                parent: lm.clone(),
                index: InsertIndex::Default,
                item: NodeItem::Separator,
            }),
            Err(StoreError::InvalidParent(g)) if g == lm
        ));
        assert!(store.snapshot_tree(&lm).unwrap().is_livemark());
    }

    #[test]
    fn reorder_emits_moves_for_shifted_children_only() {
        let (mut store, obs) = store();
        let a = bookmark(&mut store, &Guid::menu(), "http://a/", "A");
        let b = bookmark(&mut store, &Guid::menu(), "http://b/", "B");
        let c = bookmark(&mut store, &Guid::menu(), "http://c/", "C");
        obs.reset();
        store
            .set_children_order(&Guid::menu(), &[c.clone(), b.clone(), a.clone()])
            .unwrap();
        assert_eq!(obs.moves_of(&a).len(), 1);
        assert!(obs.moves_of(&b).is_empty());
        assert_eq!(obs.batches(), 1);
        assert!(matches!(
            store.set_children_order(&Guid::menu(), &[a.clone(), a]),
            Err(StoreError::OrderMismatch(_))
        ));
    }

    #[test]
    fn clock_is_strictly_increasing() {
        let mut clock = Clock::new();
        let mut last = clock.tick();
        for _ in 0..1000 {
            let next = clock.tick();
            assert!(next > last);
            last = next;
        }
    }
}
