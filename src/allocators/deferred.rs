//! Generation-tagged deferred release queue.
//!
//! Memory freed on the CPU may still be read by GPU work that was submitted
//! earlier. Frees are therefore tagged with the submission generation that was
//! current when they happened and only handed back once the engine reports that
//! generation as retired.

use std::collections::VecDeque;

/// Monotonically increasing submission counter.
pub type Generation = u64;

/// A pending release.
struct DeferredEntry<T> {
    generation: Generation,
    item: T,
}

/// FIFO of releases ordered by generation.
pub struct DeferredQueue<T> {
    entries: VecDeque<DeferredEntry<T>>,
    newest: Generation,
}

impl<T> DeferredQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            newest: 0,
        }
    }

    /// Queue `item` for release once `generation` retires.
    ///
    /// A tag older than the newest one seen is raised to it, so the queue stays
    /// sorted and the item is never released early.
    pub fn push(&mut self, generation: Generation, item: T) {
        let generation = generation.max(self.newest);
        self.newest = generation;
        self.entries.push_back(DeferredEntry { generation, item });
    }

    /// Pop the oldest entry whose generation is `<= retired`.
    pub fn pop_retired(&mut self, retired: Generation) -> Option<T> {
        if self.entries.front()?.generation > retired {
            return None;
        }
        self.entries.pop_front().map(|entry| entry.item)
    }

    /// Take every entry regardless of generation (teardown, GPU known idle).
    pub fn drain_all(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|entry| entry.item)
    }

    /// Iterate pending items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.item)
    }

    /// Oldest generation still pending.
    pub fn oldest_generation(&self) -> Option<Generation> {
        self.entries.front().map(|entry| entry.generation)
    }

    /// Check if there are pending releases.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pending releases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_releases_only_retired_generations() {
        let mut queue = DeferredQueue::new();
        queue.push(1, "a");
        queue.push(1, "b");
        queue.push(3, "c");

        assert_eq!(queue.pop_retired(0), None);
        assert_eq!(queue.pop_retired(1), Some("a"));
        assert_eq!(queue.pop_retired(1), Some("b"));
        assert_eq!(queue.pop_retired(2), None);
        assert_eq!(queue.oldest_generation(), Some(3));
        assert_eq!(queue.pop_retired(5), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_older_generation_is_raised_to_newest() {
        let mut queue = DeferredQueue::new();
        queue.push(5, "late");
        queue.push(2, "stale");

        assert_eq!(queue.pop_retired(4), None);
        assert_eq!(queue.pop_retired(5), Some("late"));
        assert_eq!(queue.oldest_generation(), Some(5));
        assert_eq!(queue.pop_retired(5), Some("stale"));
    }

    #[test]
    fn test_drain_all_ignores_generation() {
        let mut queue = DeferredQueue::new();
        queue.push(10, 1u32);
        queue.push(20, 2u32);

        let drained: Vec<_> = queue.drain_all().collect();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(queue.len(), 0);
    }
}
