use tracing::warn;

use super::{Transaction, TxnError, Unit, never_applied, require_non_empty};
use crate::error::ProgrammingError;
use crate::model::{AnnoValue, Guid};
use crate::store::BookmarkStore;

/// Set and/or remove named annotations on one item.
///
/// A `None` value removes the annotation. Undo restores the exact prior set,
/// including absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotate {
    pub guid: Guid,
    pub annotations: Vec<(String, Option<AnnoValue>)>,
}

impl Annotate {
    #[must_use]
    pub const fn new(guid: Guid) -> Self {
        Self {
            guid,
            annotations: Vec::new(),
        }
    }

    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<AnnoValue>) -> Self {
        self.annotations.push((name.into(), Some(value.into())));
        self
    }

    #[must_use]
    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.annotations.push((name.into(), None));
        self
    }
}

impl From<Annotate> for Transaction {
    fn from(input: Annotate) -> Self {
        Self::from_unit(Box::new(AnnotateUnit {
            input,
            previous: None,
        }))
    }
}

struct AnnotateUnit {
    input: Annotate,
    previous: Option<Vec<(String, Option<AnnoValue>)>>,
}

impl AnnotateUnit {
    fn restore(
        store: &mut dyn BookmarkStore,
        guid: &Guid,
        previous: &[(String, Option<AnnoValue>)],
    ) -> Result<(), TxnError> {
        for (name, value) in previous.iter().rev() {
            store.set_annotation(guid, name, value.clone())?;
        }
        Ok(())
    }

    fn run(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let mut previous = Vec::with_capacity(self.input.annotations.len());
        for (name, value) in &self.input.annotations {
            match store.set_annotation(&self.input.guid, name, value.clone()) {
                Ok(prev) => previous.push((name.clone(), prev)),
                Err(err) => {
                    if let Err(cleanup_err) = Self::restore(store, &self.input.guid, &previous) {
                        warn!(
                            guid = %self.input.guid,
                            error = %cleanup_err,
                            "could not restore annotations after failed set"
                        );
                    }
                    return Err(err.into());
                }
            }
        }
        self.previous = Some(previous);
        Ok(())
    }
}

impl Unit for AnnotateUnit {
    fn kind(&self) -> &'static str {
        "Annotate"
    }

    fn apply(&mut self, store: &mut dyn BookmarkStore) -> Result<Option<Guid>, TxnError> {
        require_non_empty(&self.input.annotations, "annotation")?;
        if self.input.annotations.iter().any(|(name, _)| name.is_empty()) {
            return Err(ProgrammingError::Malformed("annotation without a name".into()).into());
        }
        self.run(store)?;
        Ok(None)
    }

    fn reverse(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        let previous = self.previous.as_deref().ok_or_else(|| never_applied("Annotate"))?;
        Self::restore(store, &self.input.guid, previous)
    }

    fn reapply(&mut self, store: &mut dyn BookmarkStore) -> Result<(), TxnError> {
        self.run(store)
    }
}
