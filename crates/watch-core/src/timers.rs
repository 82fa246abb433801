//! Deferred tasks for the engine's event loop.
//!
//! The queue never reads the clock: callers pass `now`, so tests drive it with
//! any instants they like and the runtime sleeps until [`TimerQueue::next_deadline`].

use tokio::time::Instant;

/// Handle for cancelling a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry<T> {
    id: TimerId,
    deadline: Instant,
    task: T,
}

/// Tasks waiting for their deadline.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Schedule `task` to become due at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, task: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, deadline, task });
        id
    }

    /// Cancel a task. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Earliest deadline, if any task is waiting.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.deadline).min()
    }

    /// Remove and return the earliest task due at `now`.
    ///
    /// Tasks with equal deadlines come out in scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| (entry.deadline, entry.id.0))
            .map(|(index, _)| index)?;

        Some(self.entries.remove(index).task)
    }

    /// Number of waiting tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
