//! Sequence continuity checks for incremental book updates.

use crate::error::BookError;

/// Outcome of checking an update against the last applied sequence id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Already applied; discard without touching state.
    Stale,
    /// Next in line; apply it.
    Contiguous,
}

/// Tracks the last applied sequence id.
///
/// The guard never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGuard {
    last_applied: i64,
}

impl SequenceGuard {
    /// Start from a snapshot's sequence id.
    pub fn new(last_applied: i64) -> Self {
        Self { last_applied }
    }

    /// Last applied sequence id.
    pub fn last_applied(&self) -> i64 {
        self.last_applied
    }

    /// Classify an update spanning `first_id..=last_id`.
    ///
    /// A gap is an error: only a fresh snapshot can restore consistency.
    pub fn check(&self, first_id: i64, last_id: i64) -> Result<SequenceCheck, BookError> {
        if last_id <= self.last_applied {
            return Ok(SequenceCheck::Stale);
        }
        if first_id > self.last_applied + 1 {
            return Err(BookError::Gap {
                last_applied: self.last_applied,
                first_id,
            });
        }
        Ok(SequenceCheck::Contiguous)
    }

    /// Record an applied update.
    pub fn advance(&mut self, last_id: i64) {
        self.last_applied = self.last_applied.max(last_id);
    }
}
