// Undo/redo history.
//
// A `Snapshot` captures the persisted shape of the score (note records) and
// the raw user masks. The caller pushes the state *before* a mutation; undo
// swaps the current state for the last pushed one and parks the current state
// on the redo stack. Any new push clears redo. The undo stack is bounded and
// drops its oldest entries first.
//
// History knows nothing about the editor or masks beyond the snapshot shape;
// capturing and restoring is done by the studio's `undoable` wrapper.

use crate::note::NoteRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub notes: Vec<NoteRecord>,
    pub masks: [Vec<usize>; 4],
}

#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        History::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    /// A history keeping at most `limit` undo steps (at least one).
    pub fn new(limit: usize) -> Self {
        History {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Record the state from before a mutation.
    pub fn push(&mut self, before: Snapshot) {
        self.redo.clear();
        self.undo.push_back(before);
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }

    /// Step back. `current` is the live state, which becomes redoable.
    /// Returns the state to restore, or None if there is nothing to undo.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.redo.pop()?;
        self.undo.push_back(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
