//! Priority/FIFO command queue
//!
//! Priority records cluster at the head in arrival order; everything else
//! is FIFO behind them.

use super::command::CommandRecord;
use std::collections::VecDeque;

/// Ordered queue of commands waiting for buffer space
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<CommandRecord>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record according to its priority flag
    ///
    /// Priority records go right after the leading run of priority records.
    pub fn push(&mut self, record: CommandRecord) {
        if record.flags.priority {
            let at = self
                .items
                .iter()
                .take_while(|r| r.flags.priority)
                .count();
            self.items.insert(at, record);
        } else {
            self.items.push_back(record);
        }
    }

    /// Take the head record
    pub fn pop_front(&mut self) -> Option<CommandRecord> {
        self.items.pop_front()
    }

    /// Drop everything, returning the removed records
    pub fn clear(&mut self) -> Vec<CommandRecord> {
        self.items.drain(..).collect()
    }

    /// Queue depth
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued lines, head first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|r| r.line.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::marlin::command::CommandFlags;

    fn order(queue: &CommandQueue) -> Vec<&str> {
        queue.lines().collect()
    }

    #[test]
    fn test_priority_clusters_at_head() {
        let mut q = CommandQueue::new();
        q.push(CommandRecord::new("P1", CommandFlags::priority()));
        q.push(CommandRecord::new("N1", CommandFlags::default()));
        q.push(CommandRecord::new("P2", CommandFlags::priority()));
        q.push(CommandRecord::new("N2", CommandFlags::default()));
        q.push(CommandRecord::new("P3", CommandFlags::auto()));
        assert_eq!(order(&q), vec!["P1", "P2", "P3", "N1", "N2"]);
    }

    #[test]
    fn test_priority_into_plain_queue() {
        let mut q = CommandQueue::new();
        q.push(CommandRecord::new("N1", CommandFlags::default()));
        q.push(CommandRecord::new("P1", CommandFlags::priority()));
        assert_eq!(order(&q), vec!["P1", "N1"]);
        assert_eq!(q.pop_front().map(|r| r.line), Some("P1".to_string()));
        assert_eq!(q.clear().len(), 1);
        assert!(q.is_empty());
    }
}
