//! Field edits: title, URL, keyword.
//!
//! Title and keyword edits just swap values. A URL edit also carries the old
//! URL's tags over to the new one: when the edited bookmark was the only one
//! referencing the old URL the tags effectively move (the store drops them
//! from the unreferenced URL), otherwise they are copied. The branch is
//! re-derived from the store on every redo.

use tracing::warn;

use super::{Transaction, TxnError, Unit, never_applied};
use crate::error::StoreError;
use crate::model::{BookmarkUrl, FieldValue, Guid};
use crate::store::BookmarkStore;

/// Set or clear an item's title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTitle {
    pub guid: Guid,
    pub title: Option<String>,
}

impl EditTitle {
    #[must_use]
    pub fn new(guid: Guid, title: impl Into<String>) -> Self {
        Self {
            guid,
            title: Some(title.into()),
        }
    }
}

/// Set or clear a bookmark's keyword. An empty keyword clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditKeyword {
    pub guid: Guid,
    pub keyword: Option<String>,
}

impl EditKeyword {
    #[must_use]
    pub fn new(guid: Guid, keyword: impl Into<String>) -> Self {
        Self {
            guid,
            keyword: Some(keyword.into()),
        }
    }
}

/// Point a bookmark at another URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditUrl {
    pub guid: Guid,
    pub url: BookmarkUrl,
}

impl EditUrl {
    #[must_use]
    pub const fn new(guid: Guid, url: BookmarkUrl) -> Self {
        Self { guid, url }
    }
}

impl From<EditTitle> for Transaction {
    fn from(input: EditTitle) -> Self {
        Self::from_unit(Box::new(EditField {
            kind: "EditTitle",
            guid: input.guid,
            value: FieldValue::Title(input.title),
            previous: None,
        }))
    }
}

impl From<EditKeyword> for Transaction {
    fn from(input: EditKeyword) -> Self {
        Self::from_unit(Box::new(EditField {
            kind: "EditKeyword",
            guid: input.guid,
            value: FieldValue::Keyword(input.keyword),
            previous: None,
        }))
    }
}

impl From<EditUrl> for Transaction {
    fn from(input: EditUrl) -> Self {
        Self::from_unit(Box::new(EditUrlUnit {
            input,
            applied: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// Title / keyword
// ---------------------------------------------------------------------------

struct EditField {
    kind: &'static str,
    guid: Guid,
    value: FieldValue,
    previous: Option<FieldValue>,
}

impl Unit for EditField {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        self.previous = Some(store.set_field(&self.guid, self.value.clone())?);
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let previous = self.previous.clone().ok_or_else(|| never_applied(self.kind))?;
        store.set_field(&self.guid, previous)?;
        Ok(())
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.apply(store).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// URL
// ---------------------------------------------------------------------------

struct UrlEdit {
    old_url: BookmarkUrl,
    old_tags: Vec<String>,
    /// The bookmark was the only one referencing `old_url`.
    sole: bool,
    /// Tags newly put on the new URL.
    added: Vec<String>,
}

struct EditUrlUnit {
    input: EditUrl,
    applied: Option<UrlEdit>,
}

impl EditUrlUnit {
    fn run(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let guid = &self.input.guid;
        let old_url = store
            .snapshot_tree(guid)
            .ok_or_else(|| StoreError::ItemNotFound(guid.clone()))?
            .url
            .ok_or_else(|| StoreError::InvalidField {
                item: guid.clone(),
                field: "uri",
            })?;
        let old_tags = store.tags_for_url(&old_url);
        let sole = store.bookmarks_for_url(&old_url) == [guid.clone()];

        store.set_field(guid, FieldValue::Url(self.input.url.clone()))?;

        let mut edit = UrlEdit {
            old_url,
            old_tags,
            sole,
            added: Vec::new(),
        };
        for tag in &edit.old_tags {
            match store.add_tag(&self.input.url, tag) {
                Ok(true) => edit.added.push(tag.clone()),
                Ok(false) => {}
                Err(err) => {
                    if let Err(cleanup_err) = Self::undo_edit(store, guid, &self.input.url, &edit) {
                        warn!(
                            %guid,
                            error = %cleanup_err,
                            "could not revert partially applied URL edit"
                        );
                    }
                    return Err(err.into());
                }
            }
        }
        self.applied = Some(edit);
        Ok(())
    }

    fn undo_edit(
        store: &mut dyn BookmarkStore,
        guid: &Guid,
        new_url: &BookmarkUrl,
        edit: &UrlEdit,
    ) -> Result<(), StoreError> {
        for tag in edit.added.iter().rev() {
            store.remove_tag(new_url, tag)?;
        }
        store.set_field(guid, FieldValue::Url(edit.old_url.clone()))?;
        if edit.sole {
            for tag in &edit.old_tags {
                store.add_tag(&edit.old_url, tag)?;
            }
        }
        Ok(())
    }
}

impl Unit for EditUrlUnit {
    fn kind(&self) -> &'static str {
        "EditUrl"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        self.run(store)?;
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let edit = self.applied.as_ref().ok_or_else(|| never_applied("EditUrl"))?;
        Self::undo_edit(store, &self.input.guid, &self.input.url, edit)?;
        Ok(())
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.run(store)
    }
}
