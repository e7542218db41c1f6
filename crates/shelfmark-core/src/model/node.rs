use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::guid::{BookmarkUrl, Guid};

/// Annotation carrying the POST body of a keyword bookmark.
pub const POST_DATA_ANNO: &str = "bookmarkProperties/POSTData";
/// Annotation marking a folder as a livemark and holding its feed URL.
pub const LIVEMARK_FEED_ANNO: &str = "livemark/feedURI";
/// Optional annotation holding a livemark's site URL.
pub const LIVEMARK_SITE_ANNO: &str = "livemark/siteURI";

/// The three node types of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Bookmark,
    Folder,
    Separator,
}

impl ItemType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Bookmark => "bookmark",
            Self::Folder => "folder",
            Self::Separator => "separator",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to insert a node among its new siblings.
///
/// Indices follow the "pre-removal" convention for moves within one folder:
/// the index is interpreted against the sibling list *before* the moving
/// item is taken out, so moving an item down lands it at `index - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertIndex {
    /// Append after the last child.
    #[default]
    Default,
    At(usize),
}

impl InsertIndex {
    /// Resolve against a sibling count, `Default` meaning "append".
    #[must_use]
    pub const fn resolve(self, len: usize) -> usize {
        match self {
            Self::Default => len,
            Self::At(i) => i,
        }
    }
}

impl From<usize> for InsertIndex {
    fn from(value: usize) -> Self {
        Self::At(value)
    }
}

/// Annotation payload. Integers and strings are both legal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnoValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for AnnoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for AnnoValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AnnoValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AnnoValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A named annotation as it appears in a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub value: AnnoValue,
}

impl Annotation {
    pub fn new(name: impl Into<String>, value: impl Into<AnnoValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Type-specific part of a node to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeItem {
    Folder {
        title: Option<String>,
    },
    Bookmark {
        url: BookmarkUrl,
        title: Option<String>,
    },
    Separator,
}

impl NodeItem {
    #[must_use]
    pub const fn item_type(&self) -> ItemType {
        match self {
            Self::Folder { .. } => ItemType::Folder,
            Self::Bookmark { .. } => ItemType::Bookmark,
            Self::Separator => ItemType::Separator,
        }
    }
}

/// Input to [`crate::store::BookmarkStore::create_node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Reuse a GUID (redo) instead of generating one.
    pub guid: Option<Guid>,
    pub parent: Guid,
    pub index: InsertIndex,
    pub item: NodeItem,
}

/// A single editable field with its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    Title(Option<String>),
    Url(BookmarkUrl),
    Keyword(Option<String>),
}

impl FieldValue {
    /// Property name reported to observers.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Title(_) => "title",
            Self::Url(_) => "uri",
            Self::Keyword(_) => "keyword",
        }
    }

    /// Value rendered for change notifications.
    #[must_use]
    pub fn display_value(&self) -> Option<String> {
        match self {
            Self::Title(v) | Self::Keyword(v) => v.clone(),
            Self::Url(u) => Some(u.to_string()),
        }
    }
}

/// Old and new placement reported by a move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub old_parent: Guid,
    pub old_index: usize,
    pub new_parent: Guid,
    pub new_index: usize,
}

/// How [`crate::store::BookmarkStore::restore_tree`] treats identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Put back the exact nodes: same GUIDs, same timestamps.
    Original,
    /// Insert a copy: fresh GUIDs, fresh (strictly later) timestamps.
    Duplicate,
}

// ---------------------------------------------------------------------------
// BookmarkTree
// ---------------------------------------------------------------------------

/// Recursive snapshot of a node and everything hanging off it.
///
/// This is both the read model returned by `snapshot_tree` and the payload a
/// removal captures so that undo can rebuild the subtree structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkTree {
    pub guid: Guid,
    /// `None` only for the invisible root.
    pub parent_guid: Option<Guid>,
    pub index: usize,
    pub item_type: ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<BookmarkUrl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    /// Tags of `url` at capture time, sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Annotations sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annos: Vec<Annotation>,
    pub date_added: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BookmarkTree>,
}

impl BookmarkTree {
    /// Look up an annotation value by name.
    #[must_use]
    pub fn anno(&self, name: &str) -> Option<&AnnoValue> {
        self.annos.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    /// A livemark is a folder carrying a feed URL annotation.
    #[must_use]
    pub fn is_livemark(&self) -> bool {
        self.item_type == ItemType::Folder && self.anno(LIVEMARK_FEED_ANNO).is_some()
    }

    /// Pre-order walk over this node and all descendants.
    pub fn walk(&self) -> impl Iterator<Item = &Self> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Number of nodes in the subtree, including `self`.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.walk().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(title: &str, index: usize) -> BookmarkTree {
        BookmarkTree {
            guid: Guid::generate(),
            parent_guid: Some(Guid::menu()),
            index,
            item_type: ItemType::Bookmark,
            title: Some(title.to_string()),
            url: Some(BookmarkUrl::parse("http://example.com/").unwrap()),
            keyword: None,
            tags: vec![],
            annos: vec![],
            date_added: Utc::now(),
            last_modified: Utc::now(),
            children: vec![],
        }
    }

    #[test]
    fn insert_index_resolves_default_to_append() {
        assert_eq!(InsertIndex::Default.resolve(4), 4);
        assert_eq!(InsertIndex::At(1).resolve(4), 1);
    }

    #[test]
    fn walk_is_preorder() {
        let mut folder = leaf("folder", 0);
        folder.item_type = ItemType::Folder;
        let mut nested = leaf("nested", 0);
        nested.item_type = ItemType::Folder;
        nested.children.push(leaf("deep", 0));
        folder.children.push(nested);
        folder.children.push(leaf("second", 1));

        let titles: Vec<_> = folder
            .walk()
            .map(|n| n.title.clone().unwrap_or_default())
            .collect();
        assert_eq!(titles, ["folder", "nested", "deep", "second"]);
        assert_eq!(folder.node_count(), 4);
    }

    #[test]
    fn livemark_detection_needs_folder_and_feed() {
        let mut node = leaf("feed", 0);
        node.annos.push(Annotation::new(LIVEMARK_FEED_ANNO, "http://feed/"));
        assert!(!node.is_livemark());
        node.item_type = ItemType::Folder;
        assert!(node.is_livemark());
    }

    #[test]
    fn anno_values_serialize_untagged() {
        assert_eq!(serde_json::to_string(&AnnoValue::Int(3)).unwrap(), "3");
        assert_eq!(
            serde_json::from_str::<AnnoValue>("\"x\"").unwrap(),
            AnnoValue::Text("x".into())
        );
    }
}
