use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use harvest_sampling::Reservoir;
use parking_lot::Mutex;

/// An error returned when a harvested synthetic batch cannot be queued.
#[derive(Debug, thiserror::Error)]
pub enum BacklogError {
    /// The backlog already holds its maximum number of batches.
    #[error("synthetic backlog is full ({capacity} pending batches)")]
    Full {
        /// The capacity of the backlog.
        capacity: usize,
    },
}

/// Bounded FIFO of harvested but unsent synthetic batches, shared by all applications.
///
/// After a collector outage, the backlog is drained a few batches per harvest rather than all at
/// once. When it is full, newly harvested batches are dropped, so applications that are already
/// queued keep their place.
pub struct SyntheticBacklog<E> {
    queue: Mutex<VecDeque<Arc<Reservoir<E>>>>,
    capacity: AtomicUsize,
}

impl<E> SyntheticBacklog<E> {
    /// Creates an empty backlog holding up to `capacity` batches.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: AtomicUsize::new(capacity),
        }
    }

    /// Returns the maximum number of queued batches.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Changes the capacity. Batches beyond a lowered capacity stay queued.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Appends a harvested batch, or drops it if the backlog is full.
    pub fn push(&self, batch: Arc<Reservoir<E>>) -> Result<(), BacklogError> {
        let capacity = self.capacity();
        let mut queue = self.queue.lock();
        if queue.len() >= capacity {
            return Err(BacklogError::Full { capacity });
        }
        queue.push_back(batch);
        Ok(())
    }

    /// Takes the oldest batch.
    pub fn pop(&self) -> Option<Arc<Reservoir<E>>> {
        self.queue.lock().pop_front()
    }

    /// Puts a batch back in front after a failed attempt to send it.
    ///
    /// Other harvests may have filled the backlog while the batch was in flight. In that case the
    /// newest batch is dropped to stay within the capacity and returned to the caller.
    pub fn requeue(&self, batch: Arc<Reservoir<E>>) -> Option<Arc<Reservoir<E>>> {
        let capacity = self.capacity();
        let mut queue = self.queue.lock();
        queue.push_front(batch);
        if queue.len() > capacity.max(1) {
            return queue.pop_back();
        }
        None
    }

    /// Returns the number of queued batches.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns `true` if no batches are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Returns the queued batches from oldest to newest.
    pub fn snapshot(&self) -> Vec<Arc<Reservoir<E>>> {
        self.queue.lock().iter().cloned().collect()
    }
}

impl<E> fmt::Debug for SyntheticBacklog<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticBacklog")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use harvest_sampling::Prioritized;

    use super::*;

    struct Event;

    impl Prioritized for Event {
        fn priority(&self) -> f64 {
            0.5
        }
    }

    fn batch(app_name: &str) -> Arc<Reservoir<Event>> {
        let reservoir = Reservoir::new(app_name, "test", 200, 0, 10);
        reservoir.add(Event);
        Arc::new(reservoir)
    }

    fn app_names(backlog: &SyntheticBacklog<Event>) -> Vec<String> {
        backlog
            .snapshot()
            .iter()
            .map(|batch| batch.app_name().to_owned())
            .collect()
    }

    #[test]
    fn test_drops_newest_when_full() {
        let backlog = SyntheticBacklog::new(2);
        backlog.push(batch("a")).unwrap();
        backlog.push(batch("b")).unwrap();

        let error = backlog.push(batch("c")).unwrap_err();
        assert_eq!(error.to_string(), "synthetic backlog is full (2 pending batches)");
        assert_eq!(app_names(&backlog), ["a", "b"]);
    }

    #[test]
    fn test_requeue_keeps_order() {
        let backlog = SyntheticBacklog::new(2);
        backlog.push(batch("a")).unwrap();
        backlog.push(batch("b")).unwrap();

        let first = backlog.pop().unwrap();
        assert_eq!(first.app_name(), "a");
        assert!(backlog.requeue(first).is_none());

        assert_eq!(app_names(&backlog), ["a", "b"]);
    }

    #[test]
    fn test_requeue_drops_newest_when_refilled() {
        let backlog = SyntheticBacklog::new(2);
        backlog.push(batch("a")).unwrap();
        let first = backlog.pop().unwrap();
        backlog.push(batch("b")).unwrap();
        backlog.push(batch("c")).unwrap();

        let dropped = backlog.requeue(first).unwrap();
        assert_eq!(dropped.app_name(), "c");
        assert_eq!(app_names(&backlog), ["a", "b"]);
        assert!(backlog.push(batch("d")).is_err());
    }

    #[test]
    fn test_requeue_after_lowered_capacity() {
        let backlog = SyntheticBacklog::new(3);
        backlog.push(batch("a")).unwrap();
        backlog.push(batch("b")).unwrap();
        backlog.push(batch("c")).unwrap();
        backlog.set_capacity(1);

        let first = backlog.pop().unwrap();
        assert_eq!(backlog.requeue(first).unwrap().app_name(), "c");
        assert_eq!(app_names(&backlog), ["a", "b"]);
    }

    #[test]
    fn test_set_capacity() {
        let backlog = SyntheticBacklog::new(0);
        assert!(backlog.push(batch("a")).is_err());
        backlog.set_capacity(1);
        assert!(backlog.push(batch("a")).is_ok());
        assert!(!backlog.is_empty());
    }
}
