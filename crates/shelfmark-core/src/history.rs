//! Linear undo/redo history.
//!
//! Entries are kept most-recent first. `position` splits them in two:
//!
//! ```text
//!   index:   0        position-1 | position            len-1
//!            [ undone (redo) ... ] [ applied (undo) ...     ]
//! ```
//!
//! - `top_undo` is `entries[position]`, `top_redo` is `entries[position - 1]`.
//! - Committing new work drops every entry below `position`, prepends the
//!   new one and resets `position` to 0.
//!
//! The history is plain data; the manager decides when it changes.

use std::fmt;

use tracing::debug;

use crate::error::ProgrammingError;
use crate::txn::Transaction;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Units undone and redone together, most recently executed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    units: Vec<Transaction>,
}

impl Entry {
    /// Build an entry from units in execution order.
    pub(crate) fn from_executed(mut executed: Vec<Transaction>) -> Self {
        executed.reverse();
        Self { units: executed }
    }

    /// Units in stored order (most recent first).
    #[must_use]
    pub fn units(&self) -> &[Transaction] {
        &self.units
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    #[must_use]
    pub fn contains(&self, txn: &Transaction) -> bool {
        self.units.contains(txn)
    }
}

impl PartialEq<[Transaction]> for Entry {
    fn eq(&self, other: &[Transaction]) -> bool {
        self.units == other
    }
}

impl<const N: usize> PartialEq<[Transaction; N]> for Entry {
    fn eq(&self, other: &[Transaction; N]) -> bool {
        self.units == other
    }
}

// ---------------------------------------------------------------------------
// HistoryIndex
// ---------------------------------------------------------------------------

/// A caller-supplied history index.
///
/// Conversion only rejects values that are not whole numbers; range checks
/// happen against the current length in [`History::entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryIndex(i64);

impl HistoryIndex {
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for HistoryIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for HistoryIndex {
    type Error = ProgrammingError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(Self(value))
    }
}

impl TryFrom<i32> for HistoryIndex {
    type Error = ProgrammingError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(Self(i64::from(value)))
    }
}

impl TryFrom<usize> for HistoryIndex {
    type Error = ProgrammingError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        i64::try_from(value).map(Self).map_err(|_| ProgrammingError::IndexOutOfRange {
            index: i64::MAX,
            length: 0,
        })
    }
}

impl TryFrom<f64> for HistoryIndex {
    type Error = ProgrammingError;

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::float_cmp
    )]
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let in_range = value >= i64::MIN as f64 && value <= i64::MAX as f64;
        if value.is_finite() && value.fract() == 0.0 && in_range {
            Ok(Self(value as i64))
        } else {
            Err(ProgrammingError::NonIntegerIndex(value.to_string()))
        }
    }
}

impl TryFrom<&str> for HistoryIndex {
    type Error = ProgrammingError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if let Ok(int) = trimmed.parse::<i64>() {
            return Ok(Self(int));
        }
        match trimmed.parse::<f64>() {
            Ok(float) => Self::try_from(float),
            Err(_) => Err(ProgrammingError::NonIntegerIndex(value.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Entries plus the undo position.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<Entry>,
    position: usize,
    /// Cap on retained entries; 0 means unlimited.
    max_entries: usize,
}

impl History {
    #[must_use]
    pub const fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            position: 0,
            max_entries,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn top_undo(&self) -> Option<&Entry> {
        self.entries.get(self.position)
    }

    #[must_use]
    pub fn top_redo(&self) -> Option<&Entry> {
        self.position
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
    }

    /// Entry at `index`.
    ///
    /// # Errors
    ///
    /// [`ProgrammingError::IndexOutOfRange`] for negative indices and
    /// indices `>= len()`.
    pub fn entry(&self, index: HistoryIndex) -> Result<&Entry, ProgrammingError> {
        let out_of_range = || ProgrammingError::IndexOutOfRange {
            index: index.get(),
            length: self.entries.len(),
        };
        let i = usize::try_from(index.get()).map_err(|_| out_of_range())?;
        self.entries.get(i).ok_or_else(out_of_range)
    }

    /// Snapshot of every entry, most recent first.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.clone()
    }

    /// Drop pending redo entries, prepend `entry` and enforce the cap.
    pub(crate) fn commit(&mut self, entry: Entry) {
        let discarded = self.entries.drain(..self.position).count();
        self.entries.insert(0, entry);
        self.position = 0;
        if self.max_entries > 0 && self.entries.len() > self.max_entries {
            let evicted = self.entries.len() - self.max_entries;
            self.entries.truncate(self.max_entries);
            debug!(evicted, "history cap reached; dropped oldest entries");
        }
        debug!(discarded, len = self.entries.len(), "history entry committed");
    }

    /// The top undo entry was reversed.
    pub(crate) fn step_undo(&mut self) {
        if self.position < self.entries.len() {
            self.position += 1;
        }
    }

    /// The top redo entry was reapplied.
    pub(crate) const fn step_redo(&mut self) {
        self.position = self.position.saturating_sub(1);
    }

    /// Drop applied entries (`clear_undo`) and/or undone ones (`clear_redo`).
    pub(crate) fn clear(&mut self, clear_undo: bool, clear_redo: bool) {
        if clear_undo {
            self.entries.truncate(self.position);
        }
        if clear_redo {
            self.entries.drain(..self.position);
            self.position = 0;
        }
    }
}
