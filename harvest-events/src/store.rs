use std::fmt;
use std::sync::Arc;

use harvest_sampling::{Prioritized, Reservoir};

/// The two classes of transaction events, each with its own reservoir per application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReservoirKind {
    /// Events from regular application traffic.
    Ordinary,
    /// Events from synthetic monitoring.
    Synthetic,
}

impl ReservoirKind {
    /// Returns the name used in metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ordinary => "ordinary",
            Self::Synthetic => "synthetic",
        }
    }

    /// Returns the service label of reservoirs of this kind.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Ordinary => "Transaction Event Service",
            Self::Synthetic => "Synthetics Event Service",
        }
    }
}

impl fmt::Display for ReservoirKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ReservoirMap<E> = papaya::HashMap<String, Arc<Reservoir<E>>, ahash::RandomState>;

/// Concurrent mapping from application name to its live reservoirs.
///
/// There is at most one live reservoir per application and kind. Replacing a reservoir is a
/// single atomic operation, so producers always find either the old or the new reservoir.
pub struct ReservoirStore<E> {
    ordinary: ReservoirMap<E>,
    synthetic: ReservoirMap<E>,
}

impl<E> ReservoirStore<E>
where
    E: Prioritized + Send + 'static,
{
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            ordinary: papaya::HashMap::default(),
            synthetic: papaya::HashMap::default(),
        }
    }

    fn map(&self, kind: ReservoirKind) -> &ReservoirMap<E> {
        match kind {
            ReservoirKind::Ordinary => &self.ordinary,
            ReservoirKind::Synthetic => &self.synthetic,
        }
    }

    /// Returns the live reservoir of an application.
    pub fn get(&self, kind: ReservoirKind, app_name: &str) -> Option<Arc<Reservoir<E>>> {
        self.map(kind).pin().get(app_name).cloned()
    }

    /// Returns the live reservoir of an application, creating it if it does not exist yet.
    ///
    /// If several threads race to create the reservoir, all of them observe the same instance.
    pub fn get_or_create<F>(
        &self,
        kind: ReservoirKind,
        app_name: &str,
        create: F,
    ) -> Arc<Reservoir<E>>
    where
        F: FnOnce() -> Reservoir<E>,
    {
        let map = self.map(kind).pin();

        // The fast path, we expect the reservoir to exist.
        if let Some(reservoir) = map.get(app_name) {
            return Arc::clone(reservoir);
        }

        Arc::clone(map.get_or_insert_with(app_name.to_owned(), || Arc::new(create())))
    }

    /// Installs a new live reservoir and returns the previous one.
    pub fn replace(
        &self,
        kind: ReservoirKind,
        app_name: &str,
        reservoir: Reservoir<E>,
    ) -> Option<Arc<Reservoir<E>>> {
        self.map(kind)
            .pin()
            .insert(app_name.to_owned(), Arc::new(reservoir))
            .cloned()
    }

    /// Removes the live reservoir of an application.
    pub fn remove(&self, kind: ReservoirKind, app_name: &str) -> Option<Arc<Reservoir<E>>> {
        self.map(kind).pin().remove(app_name).cloned()
    }

    /// Removes all live reservoirs of the given kind.
    pub fn clear(&self, kind: ReservoirKind) {
        self.map(kind).pin().clear();
    }

    /// Returns the names of all applications with a live reservoir of the given kind.
    pub fn app_names(&self, kind: ReservoirKind) -> Vec<String> {
        self.map(kind).pin().keys().cloned().collect()
    }

    /// Returns the number of live reservoirs of the given kind.
    pub fn len(&self, kind: ReservoirKind) -> usize {
        self.map(kind).len()
    }
}

impl<E> Default for ReservoirStore<E>
where
    E: Prioritized + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ReservoirStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservoirStore")
            .field("ordinary", &self.ordinary.len())
            .field("synthetic", &self.synthetic.len())
            .finish()
    }
}
