//! Tagging and untagging URLs.
//!
//! Tags hang off URLs, not bookmarks, and a URL can only be tagged while it
//! is bookmarked. `Tag` therefore bookmarks unknown URLs in the unfiled
//! folder first; undo removes those implicit bookmarks again and leaves
//! pre-existing tags and bookmarks untouched.

use tracing::warn;

use super::{Transaction, TxnError, Unit, require_tags, require_urls};
use crate::model::{BookmarkTree, BookmarkUrl, Guid, InsertIndex, NodeItem, NodeSpec, RestoreMode};
use crate::store::BookmarkStore;

/// Add tags to one or more URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub urls: Vec<BookmarkUrl>,
    pub tags: Vec<String>,
}

impl Tag {
    #[must_use]
    pub fn new<U, T, S>(urls: U, tags: T) -> Self
    where
        U: IntoIterator<Item = BookmarkUrl>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().collect(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

/// Remove tags from one or more URLs; `tags: None` removes all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Untag {
    pub urls: Vec<BookmarkUrl>,
    pub tags: Option<Vec<String>>,
}

impl Untag {
    #[must_use]
    pub fn new<U, T, S>(urls: U, tags: T) -> Self
    where
        U: IntoIterator<Item = BookmarkUrl>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().collect(),
            tags: Some(tags.into_iter().map(Into::into).collect()),
        }
    }

    /// Drop every tag of every URL.
    #[must_use]
    pub fn all<U>(urls: U) -> Self
    where
        U: IntoIterator<Item = BookmarkUrl>,
    {
        Self {
            urls: urls.into_iter().collect(),
            tags: None,
        }
    }
}

impl From<Tag> for Transaction {
    fn from(input: Tag) -> Self {
        Self::from_unit(Box::new(TagUnit {
            input,
            implicit: Vec::new(),
            added: Vec::new(),
        }))
    }
}

impl From<Untag> for Transaction {
    fn from(input: Untag) -> Self {
        Self::from_unit(Box::new(UntagUnit {
            input,
            removed: Vec::new(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

struct ImplicitBookmark {
    guid: Guid,
    tree: Option<BookmarkTree>,
}

struct TagUnit {
    input: Tag,
    implicit: Vec<ImplicitBookmark>,
    added: Vec<(BookmarkUrl, String)>,
}

impl TagUnit {
    fn untag(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        for (url, tag) in self.added.iter().rev() {
            store.remove_tag(url, tag)?;
        }
        for bookmark in self.implicit.iter_mut().rev() {
            bookmark.tree = Some(store.delete_node(&bookmark.guid)?);
        }
        Ok(())
    }

    fn tag_all(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        for url in &self.input.urls {
            if !store.is_bookmarked(url) {
                let guid = store.create_node(&NodeSpec {
                    guid: None,
                    parent: Guid::unfiled(),
                    index: InsertIndex::Default,
                    item: NodeItem::Bookmark {
                        url: url.clone(),
                        title: None,
                    },
                })?;
                self.implicit.push(ImplicitBookmark { guid, tree: None });
            }
            for tag in &self.input.tags {
                if store.add_tag(url, tag)? {
                    self.added.push((url.clone(), tag.clone()));
                }
            }
        }
        Ok(())
    }
}

impl Unit for TagUnit {
    fn kind(&self) -> &'static str {
        "Tag"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        require_urls(&self.input.urls)?;
        require_tags(&self.input.tags)?;
        self.implicit.clear();
        self.added.clear();
        if let Err(err) = self.tag_all(store) {
            if let Err(cleanup) = self.untag(store) {
                tracing::warn!(error = %cleanup, "could not discard partial tagging");
            }
            return Err(err);
        }
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.untag(store)
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        for bookmark in &self.implicit {
            if let Some(tree) = &bookmark.tree {
                store.restore_tree(tree, RestoreMode::Original)?;
            }
        }
        for (url, tag) in &self.added {
            store.add_tag(url, tag)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Untag
// ---------------------------------------------------------------------------

struct UntagUnit {
    input: Untag,
    removed: Vec<(BookmarkUrl, String)>,
}

impl UntagUnit {
    fn retag(&self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        for (url, tag) in self.removed.iter().rev() {
            store.add_tag(url, tag)?;
        }
        Ok(())
    }

    fn run(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.removed.clear();
        for url in &self.input.urls {
            let wanted = match &self.input.tags {
                Some(tags) => tags.clone(),
                None => store.tags_for_url(url),
            };
            for tag in wanted {
                match store.remove_tag(url, &tag) {
                    Ok(true) => self.removed.push((url.clone(), tag)),
                    Ok(false) => {}
                    Err(err) => {
                        if let Err(cleanup_err) = self.retag(store) {
                            warn!(
                                %url,
                                error = %cleanup_err,
                                "could not put removed tags back after failed untag"
                            );
                        }
                        return Err(err.into());
                    }
                }
            }
        }
        Ok(())
    }
}

impl Unit for UntagUnit {
    fn kind(&self) -> &'static str {
        "Untag"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        require_urls(&self.input.urls)?;
        if let Some(tags) = &self.input.tags {
            require_tags(tags)?;
        }
        self.run(store)?;
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.retag(store)
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.run(store)
    }
}
