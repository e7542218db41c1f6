//! Error taxonomy for the transaction engine.
//!
//! Every failure a caller can observe falls in one of two categories:
//!
//! - [`ProgrammingError`]: the caller misused the API (re-used a unit,
//!   passed a malformed composition, asked for a history slot that does not
//!   exist). Never retried, never mutates history.
//! - [`StoreError`]: the store adapter rejected a mutation. Any units
//!   already applied inside the current composite are rolled back before the
//!   error surfaces.
//!
//! "Nothing to undo" and "nothing to redo" are not errors; see
//! [`crate::manager::Outcome`].

use std::fmt;

use crate::model::Guid;
use crate::txn::{Lifecycle, TxnId};

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ReusedTransaction,
    InvalidLifecycle,
    MalformedComposition,
    HistoryIndexOutOfRange,
    NonIntegerIndex,
    ReentrantRequest,
    ItemNotFound,
    InvalidParent,
    IndexOutOfRange,
    CycleDetected,
    RootImmutable,
    InvalidField,
    UrlNotBookmarked,
    InvalidGuid,
    InvalidUrl,
    CompensationFailed,
    ConfigParseError,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ReusedTransaction => "E1001",
            Self::InvalidLifecycle => "E1002",
            Self::MalformedComposition => "E1003",
            Self::HistoryIndexOutOfRange => "E1004",
            Self::NonIntegerIndex => "E1005",
            Self::ReentrantRequest => "E1006",
            Self::ItemNotFound => "E2001",
            Self::InvalidParent => "E2002",
            Self::IndexOutOfRange => "E2003",
            Self::CycleDetected => "E2004",
            Self::RootImmutable => "E2005",
            Self::InvalidField => "E2006",
            Self::UrlNotBookmarked => "E2007",
            Self::InvalidGuid => "E2008",
            Self::InvalidUrl => "E2009",
            Self::CompensationFailed => "E3001",
            Self::ConfigParseError => "E4001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ReusedTransaction => "Transaction already executed",
            Self::InvalidLifecycle => "Invalid transaction lifecycle transition",
            Self::MalformedComposition => "Malformed transaction input",
            Self::HistoryIndexOutOfRange => "History index out of range",
            Self::NonIntegerIndex => "History index is not an integer",
            Self::ReentrantRequest => "Re-entrant request from inside a batch",
            Self::ItemNotFound => "Item not found",
            Self::InvalidParent => "Invalid parent folder",
            Self::IndexOutOfRange => "Insertion index out of range",
            Self::CycleDetected => "Move would create a cycle",
            Self::RootImmutable => "Root folders cannot be changed",
            Self::InvalidField => "Field does not apply to this item",
            Self::UrlNotBookmarked => "URL is not bookmarked",
            Self::InvalidGuid => "Malformed GUID",
            Self::InvalidUrl => "Malformed URL",
            Self::CompensationFailed => "History entry could not be restored",
            Self::ConfigParseError => "Config file parse error",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ReusedTransaction => {
                Some("Create a new transaction; executed transactions cannot be replayed directly.")
            }
            Self::InvalidLifecycle => None,
            Self::MalformedComposition => {
                Some("Pass at least one URL, tag or annotation to the transaction.")
            }
            Self::HistoryIndexOutOfRange => Some("Use an index in 0..length."),
            Self::NonIntegerIndex => Some("History indices are whole numbers."),
            Self::ReentrantRequest => {
                Some("Use the Stage handle passed to the batch body instead of the manager.")
            }
            Self::ItemNotFound => None,
            Self::InvalidParent => Some("Only plain folders may contain items."),
            Self::IndexOutOfRange => Some("Use an index within the folder, or the default index."),
            Self::CycleDetected => Some("A folder cannot be moved into its own subtree."),
            Self::RootImmutable => None,
            Self::InvalidField => Some("URLs and keywords only apply to bookmarks."),
            Self::UrlNotBookmarked => Some("Bookmark the URL before tagging it."),
            Self::InvalidGuid => Some("GUIDs are 12 characters of [A-Za-z0-9_-]."),
            Self::InvalidUrl => Some("URLs need a scheme, e.g. `https://`."),
            Self::CompensationFailed => {
                Some("The affected side of the history was cleared; the store is still consistent.")
            }
            Self::ConfigParseError => Some("Fix syntax in .shelfmark/config.toml and retry."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Caller-side misuse of the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgrammingError {
    /// A unit that already left the `fresh` state was submitted again.
    #[error("transaction {id} was already executed (state: {state})")]
    Reused { id: TxnId, state: Lifecycle },

    /// `reverse`/`reapply` called from the wrong lifecycle state.
    #[error("transaction {id} cannot go from {from} to {to}")]
    InvalidLifecycle {
        id: TxnId,
        from: Lifecycle,
        to: Lifecycle,
    },

    /// The transaction input is structurally unusable.
    #[error("malformed transaction: {0}")]
    Malformed(String),

    /// `entry(i)` with `i` outside `0..length`.
    #[error("history index {index} out of range (length {length})")]
    IndexOutOfRange { index: i64, length: usize },

    /// `entry(i)` with a fractional or non-numeric index.
    #[error("history index {0:?} is not an integer")]
    NonIntegerIndex(String),

    /// A mutating request was issued while the same thread holds the lane.
    #[error("re-entrant {0} request issued from inside a running batch")]
    Reentrant(&'static str),
}

impl ProgrammingError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Reused { .. } => ErrorCode::ReusedTransaction,
            Self::InvalidLifecycle { .. } => ErrorCode::InvalidLifecycle,
            Self::Malformed(_) => ErrorCode::MalformedComposition,
            Self::IndexOutOfRange { .. } => ErrorCode::HistoryIndexOutOfRange,
            Self::NonIntegerIndex(_) => ErrorCode::NonIntegerIndex,
            Self::Reentrant(_) => ErrorCode::ReentrantRequest,
        }
    }
}

/// The store adapter refused a mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("item not found: '{0}'")]
    ItemNotFound(Guid),

    #[error("'{0}' is not a folder that accepts children")]
    InvalidParent(Guid),

    #[error("index {index} out of range for folder '{parent}' ({len} children)")]
    IndexOutOfRange {
        parent: Guid,
        index: usize,
        len: usize,
    },

    #[error("moving '{item}' under '{parent}' would create a cycle")]
    CycleDetected { item: Guid, parent: Guid },

    #[error("root folder '{0}' cannot be removed or moved")]
    RootImmutable(Guid),

    #[error("field '{field}' does not apply to item '{item}'")]
    InvalidField { item: Guid, field: &'static str },

    #[error("URL '{0}' is not bookmarked")]
    UrlNotBookmarked(String),

    #[error("an item with GUID '{0}' already exists")]
    DuplicateGuid(Guid),

    #[error("new order for '{0}' is not a permutation of its children")]
    OrderMismatch(Guid),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ItemNotFound(_) => ErrorCode::ItemNotFound,
            Self::InvalidParent(_) => ErrorCode::InvalidParent,
            Self::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::RootImmutable(_) => ErrorCode::RootImmutable,
            Self::InvalidField { .. } => ErrorCode::InvalidField,
            Self::UrlNotBookmarked(_) => ErrorCode::UrlNotBookmarked,
            Self::DuplicateGuid(_) => ErrorCode::InternalUnexpected,
            Self::OrderMismatch(_) => ErrorCode::IndexOutOfRange,
        }
    }
}

/// Everything `transact`, `undo`, `redo` and `clear` can fail with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxnError {
    #[error(transparent)]
    Programming(#[from] ProgrammingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reversing (or replaying) an entry failed and so did putting the
    /// already-processed units back. The matching side of history was dropped.
    ///
    /// Also returned by a failed batch whose applied units could not all be
    /// rolled back; `source` is the error the batch body returned.
    #[error("could not restore history entry after failure: {source}")]
    CompensationFailed {
        #[source]
        source: Box<TxnError>,
    },
}

impl TxnError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Programming(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::CompensationFailed { .. } => ErrorCode::CompensationFailed,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Returns `true` for caller mistakes (as opposed to store rejections).
    #[must_use]
    pub const fn is_programming(&self) -> bool {
        matches!(self, Self::Programming(_))
    }

    /// Wrap as [`TxnError::CompensationFailed`] unless already wrapped.
    pub(crate) fn into_compensation_failed(self) -> Self {
        match self {
            Self::CompensationFailed { .. } => self,
            other => Self::CompensationFailed {
                source: Box::new(other),
            },
        }
    }
}
