//! Priority Queue
//!
//! A fixed set of bounded FIFO lanes, one per priority level. Pushing never
//! blocks: a full lane is reported back to the caller immediately.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Smallest accepted lane capacity
pub const MIN_CAPACITY: usize = 10;

/// Largest accepted number of priority levels
pub const MAX_PRIORITIES: usize = 50;

/// Errors from queue construction and pushes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error(
        "Invalid queue configuration: capacity {capacity} (minimum 10), priorities {priorities} (1 to 50)"
    )]
    Config { capacity: usize, priorities: usize },

    #[error("Invalid priority {priority}: must be between 1 and {max}")]
    InvalidPriority { priority: usize, max: usize },

    #[error("Queue full at priority {0}")]
    Full(usize),
}

/// Bounded multi-lane queue
///
/// Priority 1 drains first. Lower lanes can starve while higher lanes stay
/// busy; callers pick priorities accordingly.
pub struct PriorityQueue<T> {
    lanes: Vec<Mutex<VecDeque<T>>>,
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    /// Create a queue with `priorities` lanes holding `capacity` items each
    pub fn new(capacity: usize, priorities: usize) -> Result<Self, QueueError> {
        if capacity < MIN_CAPACITY || !(1..=MAX_PRIORITIES).contains(&priorities) {
            return Err(QueueError::Config {
                capacity,
                priorities,
            });
        }

        let lanes = (0..priorities)
            .map(|_| Mutex::new(VecDeque::with_capacity(capacity)))
            .collect();

        Ok(Self { lanes, capacity })
    }

    /// Append an item to the lane for `priority`
    pub fn push(&self, item: T, priority: usize) -> Result<(), QueueError> {
        if priority < 1 || priority > self.lanes.len() {
            return Err(QueueError::InvalidPriority {
                priority,
                max: self.lanes.len(),
            });
        }

        let mut lane = self.lanes[priority - 1].lock();
        if lane.len() >= self.capacity {
            return Err(QueueError::Full(priority));
        }
        lane.push_back(item);
        Ok(())
    }

    /// Take the oldest item from the highest-precedence non-empty lane
    pub fn pop(&self) -> Option<T> {
        self.lanes.iter().find_map(|lane| lane.lock().pop_front())
    }

    /// Items currently queued across all lanes
    pub fn len(&self) -> usize {
        self.lanes.iter().map(|lane| lane.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.lock().is_empty())
    }

    /// Capacity of each lane
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of priority levels
    pub fn priorities(&self) -> usize {
        self.lanes.len()
    }
}
