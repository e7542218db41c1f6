//! Value types shared by the engine and the store adapter.

pub mod guid;
pub mod node;

pub use guid::{BookmarkUrl, Guid, GuidError, UrlError};
pub use node::{
    AnnoValue, Annotation, BookmarkTree, FieldValue, InsertIndex, ItemType, LIVEMARK_FEED_ANNO,
    LIVEMARK_SITE_ANNO, MoveOutcome, NodeItem, NodeSpec, POST_DATA_ANNO, RestoreMode,
};
