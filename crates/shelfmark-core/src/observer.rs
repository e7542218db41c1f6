//! Change notifications emitted by the store adapter.
//!
//! The store is constructed with an [`ObserverSink`] and calls it
//! synchronously for every structural change. The engine never computes
//! events itself; it only brackets multi-unit work with
//! [`StoreEvent::BeginBatch`] / [`StoreEvent::EndBatch`] through the store.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::model::{BookmarkUrl, Guid, ItemType};

/// One notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreEvent {
    BeginBatch,
    EndBatch,
    ItemAdded {
        guid: Guid,
        parent_guid: Guid,
        index: usize,
        item_type: ItemType,
        title: Option<String>,
        url: Option<BookmarkUrl>,
    },
    ItemRemoved {
        guid: Guid,
        parent_guid: Guid,
        index: usize,
        item_type: ItemType,
        url: Option<BookmarkUrl>,
    },
    ItemChanged {
        guid: Guid,
        parent_guid: Guid,
        item_type: ItemType,
        /// Field name (`title`, `uri`, `keyword`, `dateAdded`,
        /// `lastModified`) or annotation name.
        property: String,
        is_annotation: bool,
        /// `None` when the field or annotation was cleared.
        new_value: Option<String>,
        last_modified: DateTime<Utc>,
    },
    ItemMoved {
        guid: Guid,
        item_type: ItemType,
        old_parent: Guid,
        old_index: usize,
        new_parent: Guid,
        new_index: usize,
    },
}

impl StoreEvent {
    /// The node the event is about, if any.
    #[must_use]
    pub const fn guid(&self) -> Option<&Guid> {
        match self {
            Self::BeginBatch | Self::EndBatch => None,
            Self::ItemAdded { guid, .. }
            | Self::ItemRemoved { guid, .. }
            | Self::ItemChanged { guid, .. }
            | Self::ItemMoved { guid, .. } => Some(guid),
        }
    }
}

/// Receiver of store notifications.
pub trait ObserverSink: Send + Sync {
    fn notify(&self, event: &StoreEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ObserverSink for NullObserver {
    fn notify(&self, _event: &StoreEvent) {}
}

/// Forwards every event to `tracing` at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ObserverSink for TracingObserver {
    fn notify(&self, event: &StoreEvent) {
        tracing::trace!(?event, "store event");
    }
}

/// Keeps every event in memory; used by tests and the CLI's verbose output.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StoreEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded since the last [`reset`](Self::reset).
    #[must_use]
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<StoreEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn reset(&self) {
        self.events.lock().clear();
    }

    /// GUIDs reported as added, in notification order.
    #[must_use]
    pub fn added(&self) -> Vec<Guid> {
        self.collect(|e| match e {
            StoreEvent::ItemAdded { guid, .. } => Some(guid.clone()),
            _ => None,
        })
    }

    /// GUIDs reported as removed, in notification order.
    #[must_use]
    pub fn removed(&self) -> Vec<Guid> {
        self.collect(|e| match e {
            StoreEvent::ItemRemoved { guid, .. } => Some(guid.clone()),
            _ => None,
        })
    }

    /// All move notifications for `guid`.
    #[must_use]
    pub fn moves_of(&self, guid: &Guid) -> Vec<StoreEvent> {
        self.collect(|e| match e {
            StoreEvent::ItemMoved { guid: g, .. } if g == guid => Some(e.clone()),
            _ => None,
        })
    }

    /// The last change notification for `property` on `guid`.
    #[must_use]
    pub fn last_change(&self, guid: &Guid, property: &str) -> Option<StoreEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| {
                matches!(e, StoreEvent::ItemChanged { guid: g, property: p, .. }
                    if g == guid && p == property)
            })
            .cloned()
    }

    /// Count of `BeginBatch` notifications seen.
    #[must_use]
    pub fn batches(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, StoreEvent::BeginBatch))
            .count()
    }

    fn collect<T>(&self, f: impl Fn(&StoreEvent) -> Option<T>) -> Vec<T> {
        self.events.lock().iter().filter_map(f).collect()
    }
}

impl ObserverSink for RecordingObserver {
    fn notify(&self, event: &StoreEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(guid: &Guid, from: usize, to: usize) -> StoreEvent {
        StoreEvent::ItemMoved {
            guid: guid.clone(),
            item_type: ItemType::Bookmark,
            old_parent: Guid::menu(),
            old_index: from,
            new_parent: Guid::menu(),
            new_index: to,
        }
    }

    #[test]
    fn recording_observer_filters_by_kind() {
        let obs = RecordingObserver::new();
        let a = Guid::generate();
        let b = Guid::generate();
        obs.notify(&StoreEvent::BeginBatch);
        obs.notify(&moved(&a, 0, 1));
        obs.notify(&moved(&b, 1, 0));
        obs.notify(&StoreEvent::EndBatch);

        assert_eq!(obs.batches(), 1);
        assert_eq!(obs.moves_of(&a), vec![moved(&a, 0, 1)]);
        assert!(obs.added().is_empty());

        assert_eq!(obs.take().len(), 4);
        assert!(obs.events().is_empty());
    }

    #[test]
    fn last_change_picks_latest_value() {
        let obs = RecordingObserver::new();
        let guid = Guid::generate();
        for value in ["first", "second"] {
            obs.notify(&StoreEvent::ItemChanged {
                guid: guid.clone(),
                parent_guid: Guid::menu(),
                item_type: ItemType::Bookmark,
                property: "title".into(),
                is_annotation: false,
                new_value: Some(value.into()),
                last_modified: Utc::now(),
            });
        }
        let Some(StoreEvent::ItemChanged { new_value, .. }) = obs.last_change(&guid, "title")
        else {
            panic!("expected a title change");
        };
        assert_eq!(new_value.as_deref(), Some("second"));
        assert!(obs.last_change(&guid, "keyword").is_none());
    }
}
