use crate::names::NameCache;

/// A finished unit of work that may become a transaction event.
///
/// Building an event is expensive compared to the priority comparison, so the store asks for the
/// priority first and only calls [`into_event`](Self::into_event) if the event can be retained.
pub trait PendingEvent {
    /// The event stored in reservoirs.
    type Event;

    /// Returns the sampling priority the event will carry.
    fn priority(&self) -> f64;

    /// Returns `true` if the work originates from synthetic monitoring.
    fn is_synthetic(&self) -> bool;

    /// Builds the event. Names should be interned through `names`.
    fn into_event(self, names: &NameCache) -> Self::Event;
}

/// A [`PendingEvent`] built by a closure.
#[derive(Debug)]
pub struct LazyEvent<F> {
    priority: f64,
    synthetic: bool,
    build: F,
}

impl<F> LazyEvent<F> {
    /// Creates an ordinary pending event.
    pub fn new(priority: f64, build: F) -> Self {
        Self {
            priority,
            synthetic: false,
            build,
        }
    }

    /// Creates a pending event from synthetic monitoring.
    pub fn synthetic(priority: f64, build: F) -> Self {
        Self {
            priority,
            synthetic: true,
            build,
        }
    }
}

impl<F, E> PendingEvent for LazyEvent<F>
where
    F: FnOnce(&NameCache) -> E,
{
    type Event = E;

    fn priority(&self) -> f64 {
        self.priority
    }

    fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    fn into_event(self, names: &NameCache) -> E {
        (self.build)(names)
    }
}

/// A pending event, or the event built from it on an earlier attempt.
pub(crate) enum Candidate<P: PendingEvent> {
    Pending(P),
    Built(P::Event),
}

impl<P: PendingEvent> Candidate<P> {
    pub fn build(self, names: &NameCache) -> P::Event {
        match self {
            Self::Pending(pending) => pending.into_event(names),
            Self::Built(event) => event,
        }
    }
}
