use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use parking_lot::Mutex;
use rand::Rng;

use crate::adaptive;

/// An event that can be stored in a [`Reservoir`].
///
/// The priority must not change while the event is retained.
pub trait Prioritized {
    /// Returns the priority of this event. Higher priorities are more likely to be retained.
    ///
    /// Events with a non-finite priority are never retained.
    fn priority(&self) -> f64;
}

/// Outcome of [`Reservoir::offer`].
#[derive(Debug, PartialEq)]
pub enum Offer<E> {
    /// The event was retained, possibly evicting the lowest priority event.
    Accepted,
    /// The reservoir is full and the event does not outrank any retained event, or the event has
    /// a non-finite priority.
    ///
    /// The offer was counted as a try.
    Rejected(E),
    /// The reservoir has been sealed for harvesting and takes no more events.
    ///
    /// The offer was not counted. Callers should offer the event to the live reservoir instead.
    Closed(E),
}

impl<E> Offer<E> {
    /// Returns `true` if the event was retained.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// A retained event with its cached priority.
///
/// Ordered in reverse so that the [`BinaryHeap`] yields the lowest priority first. Among equal
/// priorities the most recently inserted entry is yielded first.
struct Entry<E> {
    priority: f64,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct Inner<E> {
    heap: BinaryHeap<Entry<E>>,
    next_seq: u64,
    number_of_tries: u64,
    sampled: u64,
    decided: u64,
    sealed: bool,
}

impl<E> Inner<E> {
    fn new(max_size: usize) -> Self {
        Self {
            // Capped so that huge configured limits do not allocate upfront.
            heap: BinaryHeap::with_capacity(max_size.min(1024)),
            next_seq: 0,
            number_of_tries: 0,
            sampled: 0,
            decided: 0,
            sealed: false,
        }
    }

    fn min_priority(&self) -> Option<f64> {
        self.heap.peek().map(|entry| entry.priority)
    }

    /// Inserts an event without counting a try. Returns the event back if it was not retained.
    fn insert(&mut self, max_size: usize, priority: f64, event: E) -> Result<(), E> {
        if self.heap.len() >= max_size {
            match self.min_priority() {
                Some(min) if priority > min => {
                    self.heap.pop();
                }
                _ => return Err(event),
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            event,
        });

        Ok(())
    }
}

/// A bounded, thread-safe container implementing priority reservoir sampling.
///
/// The reservoir retains at most `max_size` events. Once full, an offered event replaces the
/// lowest priority retained event if it has a strictly higher priority, otherwise it is rejected.
/// Every offer counts as a try, including offers the caller skipped through
/// [`increment_number_of_tries`](Self::increment_number_of_tries).
///
/// The reservoir also carries the adaptive sampling state of one harvest cycle: the number of
/// events decided in the previous cycle and the target number of sampled events. See
/// [`compute_sampled`](Self::compute_sampled).
pub struct Reservoir<E> {
    app_name: String,
    service_name: &'static str,
    max_size: usize,
    decided_last: u64,
    target: u64,
    inner: Mutex<Inner<E>>,
}

impl<E: Prioritized> Reservoir<E> {
    /// Creates an empty reservoir.
    ///
    /// `app_name` and `service_name` label the reservoir in logs and metrics. `decided_last` is
    /// the number of tries of the previous cycle, see [`crate::decided_last`].
    pub fn new(
        app_name: impl Into<String>,
        service_name: &'static str,
        max_size: usize,
        decided_last: u64,
        target: u64,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            service_name,
            max_size,
            decided_last,
            target,
            inner: Mutex::new(Inner::new(max_size)),
        }
    }

    /// Returns the application this reservoir collects events for.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Returns the name of the service owning this reservoir.
    pub fn service_name(&self) -> &'static str {
        self.service_name
    }

    /// Returns the capacity of the reservoir.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the number of tries of the previous harvest cycle.
    pub fn decided_last(&self) -> u64 {
        self.decided_last
    }

    /// Returns the target number of sampled events per harvest cycle.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Offers an event for retention.
    ///
    /// See [`Offer`] for the possible outcomes.
    pub fn offer(&self, event: E) -> Offer<E> {
        let priority = event.priority();
        let mut inner = self.inner.lock();

        if inner.sealed {
            return Offer::Closed(event);
        }

        inner.number_of_tries += 1;
        if !priority.is_finite() {
            return Offer::Rejected(event);
        }

        match inner.insert(self.max_size, priority, event) {
            Ok(()) => Offer::Accepted,
            Err(event) => Offer::Rejected(event),
        }
    }

    /// Offers an event for retention and returns `true` if it was retained.
    ///
    /// Events offered to a sealed reservoir are dropped.
    pub fn add(&self, event: E) -> bool {
        self.offer(event).is_accepted()
    }

    /// Returns `true` if the reservoir holds `max_size` events.
    pub fn is_full(&self) -> bool {
        self.inner.lock().heap.len() >= self.max_size
    }

    /// Returns the lowest priority of all retained events, or `None` if the reservoir is empty.
    pub fn min_priority(&self) -> Option<f64> {
        self.inner.lock().min_priority()
    }

    /// Returns `true` if an event with the given priority would currently be retained.
    ///
    /// Producers use this to skip building events that cannot be retained. In that case they
    /// must call [`increment_number_of_tries`](Self::increment_number_of_tries) instead.
    pub fn would_accept(&self, priority: f64) -> bool {
        if !priority.is_finite() {
            return false;
        }

        let inner = self.inner.lock();
        inner.heap.len() < self.max_size
            || inner.min_priority().is_some_and(|min| min < priority)
    }

    /// Counts an offer that was skipped by the caller.
    pub fn increment_number_of_tries(&self) {
        self.try_increment_number_of_tries();
    }

    /// Counts an offer that was skipped by the caller.
    ///
    /// Returns `false` if the reservoir is sealed and the try was not counted.
    pub fn try_increment_number_of_tries(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return false;
        }
        inner.number_of_tries += 1;
        true
    }

    /// Returns the number of offers this reservoir has decided on, accepted or rejected.
    pub fn number_of_tries(&self) -> u64 {
        self.inner.lock().number_of_tries
    }

    /// Returns the number of retained events.
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Returns `true` if no events are retained.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    /// Returns the number of events marked as sampled by [`compute_sampled`](Self::compute_sampled).
    pub fn sampled_count(&self) -> u64 {
        self.inner.lock().sampled
    }

    /// Makes the sampling decision for the next event of this cycle.
    ///
    /// The decision converges the number of sampled events towards [`target`](Self::target)
    /// across harvest cycles, based on the traffic seen in the previous cycle.
    pub fn compute_sampled<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let random = rng.random::<f64>();
        let mut inner = self.inner.lock();

        let sampled = adaptive::sample_decision(
            self.decided_last,
            self.target,
            inner.sampled,
            inner.decided,
            random,
        );

        inner.decided += 1;
        if sampled {
            inner.sampled += 1;
        }

        sampled
    }

    /// Seals the reservoir. Subsequent offers return [`Offer::Closed`].
    ///
    /// The harvester seals a reservoir after swapping it out, so that producers still holding a
    /// reference cannot add events that would never be sent.
    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    /// Returns `true` if the reservoir has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    /// Merges the retained events of another reservoir into this one.
    ///
    /// Each event is inserted with the regular priority rule, so at most `max_size` events
    /// survive. Merged events do not count as tries on their own. Instead, the tries of `other`
    /// are added to this reservoir. `other` is left empty.
    pub fn retry_all(&self, other: &Self) {
        if std::ptr::eq(self, other) {
            return;
        }

        let (entries, tries) = {
            let mut other = other.inner.lock();
            let tries = other.number_of_tries;
            other.number_of_tries = 0;
            (std::mem::take(&mut other.heap), tries)
        };

        let mut inner = self.inner.lock();
        inner.number_of_tries += tries;
        for entry in entries.into_vec() {
            // Events that do not fit are dropped, which bounds the memory during outages.
            let _ = inner.insert(self.max_size, entry.priority, entry.event);
        }
    }

    /// Removes all retained events and resets all counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.heap.clear();
        inner.number_of_tries = 0;
        inner.sampled = 0;
        inner.decided = 0;
    }
}

impl<E: Prioritized + Clone> Reservoir<E> {
    /// Returns a snapshot of the retained events, ordered by descending priority.
    pub fn as_list(&self) -> Vec<E> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner.heap.iter().collect();
        entries.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|entry| entry.event.clone()).collect()
    }
}

impl<E> fmt::Debug for Reservoir<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Reservoir")
            .field("app_name", &self.app_name)
            .field("service_name", &self.service_name)
            .field("max_size", &self.max_size)
            .field("decided_last", &self.decided_last)
            .field("target", &self.target)
            .field("len", &inner.heap.len())
            .field("number_of_tries", &inner.number_of_tries)
            .field("sealed", &inner.sealed)
            .finish()
    }
}
