//! Creation units: folders, bookmarks, separators and livemarks.
//!
//! Creation is undone by removing the node (after dropping the tags the unit
//! added) and redone by restoring the subtree captured at removal, so the
//! node comes back with its GUID, position and timestamps.

use tracing::warn;

use super::{Transaction, TxnError, Unit, never_applied, require_tags};
use crate::model::{
    AnnoValue, Annotation, BookmarkTree, BookmarkUrl, FieldValue, Guid, InsertIndex,
    LIVEMARK_FEED_ANNO, LIVEMARK_SITE_ANNO, NodeItem, NodeSpec, POST_DATA_ANNO, RestoreMode,
};
use crate::error::ProgrammingError;
use crate::store::BookmarkStore;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Create a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFolder {
    pub parent: Guid,
    pub index: InsertIndex,
    pub title: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl NewFolder {
    #[must_use]
    pub const fn new(parent: Guid) -> Self {
        Self {
            parent,
            index: InsertIndex::Default,
            title: None,
            annotations: Vec::new(),
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub const fn at(mut self, index: InsertIndex) -> Self {
        self.index = index;
        self
    }

    #[must_use]
    pub fn annotation(mut self, name: impl Into<String>, value: impl Into<AnnoValue>) -> Self {
        self.annotations.push(Annotation::new(name, value));
        self
    }
}

/// Create a bookmark, optionally with keyword, POST data, tags and
/// annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    pub parent: Guid,
    pub index: InsertIndex,
    pub url: BookmarkUrl,
    pub title: Option<String>,
    pub keyword: Option<String>,
    pub post_data: Option<String>,
    pub tags: Vec<String>,
    pub annotations: Vec<Annotation>,
}

impl NewBookmark {
    #[must_use]
    pub const fn new(parent: Guid, url: BookmarkUrl) -> Self {
        Self {
            parent,
            index: InsertIndex::Default,
            url,
            title: None,
            keyword: None,
            post_data: None,
            tags: Vec::new(),
            annotations: Vec::new(),
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub const fn at(mut self, index: InsertIndex) -> Self {
        self.index = index;
        self
    }

    #[must_use]
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    #[must_use]
    pub fn post_data(mut self, post_data: impl Into<String>) -> Self {
        self.post_data = Some(post_data.into());
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn annotation(mut self, name: impl Into<String>, value: impl Into<AnnoValue>) -> Self {
        self.annotations.push(Annotation::new(name, value));
        self
    }
}

/// Create a separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSeparator {
    pub parent: Guid,
    pub index: InsertIndex,
}

impl NewSeparator {
    #[must_use]
    pub const fn new(parent: Guid) -> Self {
        Self {
            parent,
            index: InsertIndex::Default,
        }
    }

    #[must_use]
    pub const fn at(mut self, index: InsertIndex) -> Self {
        self.index = index;
        self
    }
}

/// Create a livemark: a folder carrying a feed URL (and optionally a site
/// URL) that does not accept children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLivemark {
    pub parent: Guid,
    pub index: InsertIndex,
    pub title: Option<String>,
    pub feed_url: BookmarkUrl,
    pub site_url: Option<BookmarkUrl>,
    pub annotations: Vec<Annotation>,
}

impl NewLivemark {
    #[must_use]
    pub const fn new(parent: Guid, feed_url: BookmarkUrl) -> Self {
        Self {
            parent,
            index: InsertIndex::Default,
            title: None,
            feed_url,
            site_url: None,
            annotations: Vec::new(),
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub const fn at(mut self, index: InsertIndex) -> Self {
        self.index = index;
        self
    }

    #[must_use]
    pub fn site_url(mut self, site_url: BookmarkUrl) -> Self {
        self.site_url = Some(site_url);
        self
    }
}

impl From<NewFolder> for Transaction {
    fn from(input: NewFolder) -> Self {
        Self::from_unit(Box::new(Create {
            kind: "NewFolder",
            spec: NodeSpec {
                guid: None,
                parent: input.parent,
                index: input.index,
                item: NodeItem::Folder { title: input.title },
            },
            keyword: None,
            annos: input.annotations,
            tags: Vec::new(),
            applied: None,
        }))
    }
}

impl From<NewBookmark> for Transaction {
    fn from(input: NewBookmark) -> Self {
        let mut annos = Vec::new();
        if let Some(post_data) = input.post_data {
            annos.push(Annotation::new(POST_DATA_ANNO, post_data));
        }
        annos.extend(input.annotations);
        Self::from_unit(Box::new(Create {
            kind: "NewBookmark",
            spec: NodeSpec {
                guid: None,
                parent: input.parent,
                index: input.index,
                item: NodeItem::Bookmark {
                    url: input.url,
                    title: input.title,
                },
            },
            keyword: input.keyword,
            annos,
            tags: input.tags,
            applied: None,
        }))
    }
}

impl From<NewSeparator> for Transaction {
    fn from(input: NewSeparator) -> Self {
        Self::from_unit(Box::new(Create {
            kind: "NewSeparator",
            spec: NodeSpec {
                guid: None,
                parent: input.parent,
                index: input.index,
                item: NodeItem::Separator,
            },
            keyword: None,
            annos: Vec::new(),
            tags: Vec::new(),
            applied: None,
        }))
    }
}

impl From<NewLivemark> for Transaction {
    fn from(input: NewLivemark) -> Self {
        let mut annos = vec![Annotation::new(LIVEMARK_FEED_ANNO, input.feed_url.to_string())];
        if let Some(site) = input.site_url {
            annos.push(Annotation::new(LIVEMARK_SITE_ANNO, site.to_string()));
        }
        annos.extend(input.annotations);
        Self::from_unit(Box::new(Create {
            kind: "NewLivemark",
            spec: NodeSpec {
                guid: None,
                parent: input.parent,
                index: input.index,
                item: NodeItem::Folder { title: input.title },
            },
            keyword: None,
            annos,
            tags: Vec::new(),
            applied: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

struct Created {
    guid: Guid,
    /// Tags this unit put on the URL; pre-existing ones are left alone.
    added_tags: Vec<String>,
    /// Captured on reverse, replayed on reapply.
    tree: Option<BookmarkTree>,
}

struct Create {
    kind: &'static str,
    spec: NodeSpec,
    keyword: Option<String>,
    annos: Vec<Annotation>,
    tags: Vec<String>,
    applied: Option<Created>,
}

impl Create {
    fn url(&self) -> Option<&BookmarkUrl> {
        match &self.spec.item {
            NodeItem::Bookmark { url, .. } => Some(url),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), TxnError> {
        if !self.tags.is_empty() {
            require_tags(&self.tags)?;
        }
        if let Some(anno) = self.annos.iter().find(|a| a.name.is_empty()) {
            return Err(ProgrammingError::Malformed(format!(
                "annotation without a name (value {})",
                anno.value
            ))
            .into());
        }
        Ok(())
    }

    /// Attach keyword, annotations and tags to the freshly created node.
    fn decorate(
        &self,
        store: &mut dyn BookmarkStore,
        guid: &Guid,
        added: &mut Vec<String>,
    ) -> Result<(), TxnError> {
        if let Some(keyword) = &self.keyword {
            store.set_field(guid, FieldValue::Keyword(Some(keyword.clone())))?;
        }
        for anno in &self.annos {
            store.set_annotation(guid, &anno.name, Some(anno.value.clone()))?;
        }
        if let Some(url) = self.url() {
            for tag in &self.tags {
                if store.add_tag(url, tag)? {
                    added.push(tag.clone());
                }
            }
        }
        Ok(())
    }

    fn drop_added_tags(&self, store: &mut dyn BookmarkStore, added: &[String]) -> Result<(), TxnError> {
        if let Some(url) = self.url() {
            for tag in added.iter().rev() {
                store.remove_tag(url, tag)?;
            }
        }
        Ok(())
    }
}

impl Unit for Create {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        self.validate()?;
        let guid = store.create_node(&self.spec)?;

        let mut added = Vec::new();
        if let Err(err) = self.decorate(store, &guid, &mut added) {
            let cleanup = self
                .drop_added_tags(store, &added)
                .and_then(|()| store.delete_node(&guid).map(|_| ()).map_err(TxnError::from));
            if let Err(cleanup_err) = cleanup {
                warn!(%guid, error = %cleanup_err, "could not discard partially created item");
            }
            return Err(err);
        }

        self.applied = Some(Created {
            guid: guid.clone(),
            added_tags: added,
            tree: None,
        });
        Ok(Some(guid))
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let Some(created) = &self.applied else {
            return Err(never_applied(self.kind));
        };
        self.drop_added_tags(store, &created.added_tags)?;
        let tree = store.delete_node(&created.guid)?;
        if let Some(created) = &mut self.applied {
            created.tree = Some(tree);
        }
        Ok(())
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let Some(Created {
            tree: Some(tree),
            added_tags,
            ..
        }) = &self.applied
        else {
            return Err(never_applied(self.kind));
        };
        store.restore_tree(tree, RestoreMode::Original)?;
        if let Some(url) = self.url() {
            for tag in added_tags {
                store.add_tag(url, tag)?;
            }
        }
        Ok(())
    }
}
