//! Edit history as compressed definition snapshots
//!
//! Each checkpoint stores the serialized task list of the whole workflow,
//! zstd-compressed. Restoring a checkpoint rebuilds the tree from that list,
//! so every edit operation is undoable without an inverse of its own.

use std::collections::VecDeque;

use crate::error::{GraphError, Result};
use crate::task::TaskDefinition;

/// Bounded history of workflow definitions
pub struct UndoStack {
    /// Compressed task lists, oldest first
    snapshots: VecDeque<Vec<u8>>,
    /// Index of the snapshot matching the live tree
    current: usize,
    max_snapshots: usize,
}

impl UndoStack {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            current: 0,
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Record a checkpoint, discarding anything that could still be redone
    pub fn push(&mut self, tasks: &[TaskDefinition]) -> Result<()> {
        let json = serde_json::to_vec(tasks)?;
        let compressed = zstd::encode_all(&json[..], 3).map_err(|e| GraphError::Compression(e.to_string()))?;

        self.snapshots.truncate(self.current + 1);
        self.snapshots.push_back(compressed);
        self.current = self.snapshots.len() - 1;

        while self.snapshots.len() > self.max_snapshots {
            self.snapshots.pop_front();
            self.current = self.current.saturating_sub(1);
        }
        Ok(())
    }

    /// Step back one checkpoint
    pub fn undo(&mut self) -> Option<Result<Vec<TaskDefinition>>> {
        if !self.can_undo() {
            return None;
        }
        self.current -= 1;
        Some(self.decompress(self.current))
    }

    /// Step forward one checkpoint
    pub fn redo(&mut self) -> Option<Result<Vec<TaskDefinition>>> {
        if !self.can_redo() {
            return None;
        }
        self.current += 1;
        Some(self.decompress(self.current))
    }

    pub fn current(&self) -> Option<Result<Vec<TaskDefinition>>> {
        if self.snapshots.is_empty() {
            None
        } else {
            Some(self.decompress(self.current))
        }
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = 0;
    }

    /// Total compressed size of the history in bytes
    pub fn compressed_size(&self) -> usize {
        self.snapshots.iter().map(Vec::len).sum()
    }

    fn decompress(&self, index: usize) -> Result<Vec<TaskDefinition>> {
        let compressed = self
            .snapshots
            .get(index)
            .ok_or_else(|| GraphError::Compression(format!("no snapshot at {}", index)))?;
        let json = zstd::decode_all(&compressed[..]).map_err(|e| GraphError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(reference: &str) -> Vec<TaskDefinition> {
        vec![TaskDefinition::new("SIMPLE", reference, "tool")]
    }

    fn head(result: Option<Result<Vec<TaskDefinition>>>) -> String {
        result.unwrap().unwrap()[0].reference_name().to_string()
    }

    #[test]
    fn test_undo_then_redo() {
        let mut stack = UndoStack::new(10);
        stack.push(&tasks("first")).unwrap();
        stack.push(&tasks("second")).unwrap();
        stack.push(&tasks("third")).unwrap();

        assert_eq!(head(stack.current()), "third");
        assert_eq!(head(stack.undo()), "second");
        assert_eq!(head(stack.undo()), "first");
        assert!(stack.undo().is_none());

        assert_eq!(head(stack.redo()), "second");
        assert_eq!(head(stack.redo()), "third");
        assert!(stack.redo().is_none());
    }

    #[test]
    fn test_push_discards_redo_history() {
        let mut stack = UndoStack::new(10);
        stack.push(&tasks("first")).unwrap();
        stack.push(&tasks("second")).unwrap();
        stack.undo();

        stack.push(&tasks("third")).unwrap();
        assert!(!stack.can_redo());
        assert_eq!(stack.len(), 2);
        assert_eq!(head(stack.current()), "third");
    }

    #[test]
    fn test_oldest_snapshots_are_dropped() {
        let mut stack = UndoStack::new(3);
        for i in 0..5 {
            stack.push(&tasks(&format!("t{}", i))).unwrap();
        }

        assert_eq!(stack.len(), 3);
        assert_eq!(head(stack.current()), "t4");
        stack.undo();
        assert_eq!(head(stack.undo()), "t2");
        assert!(!stack.can_undo());
    }

    #[test]
    fn test_clear() {
        let mut stack = UndoStack::default();
        stack.push(&tasks("a")).unwrap();
        assert!(stack.compressed_size() > 0);
        stack.clear();
        assert!(stack.is_empty());
        assert!(stack.current().is_none());
    }
}
