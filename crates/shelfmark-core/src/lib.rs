//! shelfmark-core library.
//!
//! Undoable, composable transactions over a hierarchical bookmark store.
//!
//! ```text
//!   caller ──▶ TransactionManager ──▶ ExecutionQueue ──▶ Stage ──▶ BookmarkStore ──▶ ObserverSink
//!                    │
//!                    └── History (entries + undo position)
//! ```
//!
//! # Conventions
//!
//! - **Errors**: library calls return [`TxnError`]; config loading returns
//!   `anyhow::Result`. Every error maps to a stable [`ErrorCode`].
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).
//!   Each queued request runs inside a `request` span.

pub mod compose;
pub mod config;
pub mod error;
pub mod history;
pub mod manager;
pub mod model;
pub mod observer;
pub mod queue;
pub mod store;
pub mod txn;

pub use compose::Stage;
pub use config::EngineConfig;
pub use error::{ErrorCode, ProgrammingError, StoreError, TxnError};
pub use history::{Entry, HistoryIndex};
pub use manager::{Outcome, TransactionManager};
pub use model::{BookmarkTree, BookmarkUrl, Guid, InsertIndex};
pub use observer::{ObserverSink, StoreEvent};
pub use store::{BookmarkStore, MemoryStore};
pub use txn::{Lifecycle, Transaction, TxnId};
