use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use harvest_config::{Config, TransactionEventsConfig};
use harvest_sampling::{Offer, Prioritized, Reservoir};
use rand::Rng;

use crate::backlog::SyntheticBacklog;
use crate::event::{Candidate, PendingEvent};
use crate::names::NameCache;
use crate::store::{ReservoirKind, ReservoirStore};
use crate::transmit::Transmitter;

/// A configuration update delivered to [`TransactionEventsService::config_changed`].
#[derive(Debug)]
pub enum ConfigChange {
    /// The transaction event settings of one application changed.
    ///
    /// These settings take precedence over the configuration file until the service is dropped.
    App {
        /// The application the settings belong to.
        app_name: String,
        /// The new settings.
        config: TransactionEventsConfig,
    },
    /// The configuration file was reloaded.
    Reloaded(Arc<Config>),
}

/// Collects transaction events into per-application reservoirs between harvests.
///
/// Producer threads call [`record`](Self::record) for every finished transaction. A harvest
/// thread per application calls [`harvest`](Self::harvest) once per report period, which swaps
/// out the live reservoirs and transmits them.
pub struct TransactionEventsService<E> {
    enabled: bool,
    config: ArcSwap<Config>,
    app_configs: papaya::HashMap<String, TransactionEventsConfig, ahash::RandomState>,
    /// Enabled flag per app, tagged with the config generation it was resolved under.
    enabled_for_app: papaya::HashMap<String, (u64, bool), ahash::RandomState>,
    config_generation: AtomicU64,
    max_samples_stored: AtomicUsize,
    names: ArcSwap<NameCache>,
    shut_down: AtomicBool,
    pub(crate) store: ReservoirStore<E>,
    pub(crate) backlog: SyntheticBacklog<E>,
    pub(crate) transmitter: Arc<dyn Transmitter<E>>,
}

impl<E> TransactionEventsService<E>
where
    E: Prioritized + Clone + Send + Sync + 'static,
{
    /// Creates the service from the configuration and the transport used to send batches.
    pub fn new(config: Arc<Config>, transmitter: Arc<dyn Transmitter<E>>) -> Self {
        let defaults = config.default_transaction_events();
        let synthetics = config.harvest().synthetics;

        if !defaults.enabled {
            harvest_log::info!("transaction events are disabled");
        }

        Self {
            enabled: defaults.enabled,
            config: ArcSwap::new(config),
            app_configs: papaya::HashMap::default(),
            enabled_for_app: papaya::HashMap::default(),
            config_generation: AtomicU64::new(0),
            max_samples_stored: AtomicUsize::new(defaults.max_samples_stored),
            names: ArcSwap::from_pointee(NameCache::new(defaults.max_samples_stored)),
            shut_down: AtomicBool::new(false),
            store: ReservoirStore::new(),
            backlog: SyntheticBacklog::new(synthetics.max_pending_batches),
            transmitter,
        }
    }

    /// Returns `true` if transaction events were enabled when the service was created.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Relaxed)
    }

    /// Returns the current configuration.
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Returns the default reservoir capacity for applications.
    pub fn max_samples_stored(&self) -> usize {
        self.max_samples_stored.load(Ordering::Relaxed)
    }

    /// Changes the default reservoir capacity.
    ///
    /// Live reservoirs keep their capacity. The new bound applies to reservoirs created from now
    /// on, which includes the fresh reservoirs installed by the next harvest. The name cache is
    /// recreated with the new bound.
    pub fn set_max_samples_stored(&self, max_samples_stored: usize) {
        let previous = self
            .max_samples_stored
            .swap(max_samples_stored, Ordering::Relaxed);

        if previous != max_samples_stored {
            harvest_log::debug!(previous, max_samples_stored, "changed reservoir capacity");
            self.names.store(Arc::new(NameCache::new(max_samples_stored)));
        }
    }

    /// Returns the shared instance of a transaction name.
    pub fn intern_name(&self, name: &str) -> Arc<str> {
        self.names.load().intern_name(name)
    }

    /// Resolves the transaction event settings of an application.
    ///
    /// Settings pushed through [`ConfigChange::App`] win over the configuration file. Otherwise
    /// the per-app overrides of the file are applied on top of the global settings, where the
    /// capacity defaults to [`max_samples_stored`](Self::max_samples_stored).
    pub fn app_config(&self, app_name: &str) -> TransactionEventsConfig {
        if let Some(config) = self.app_configs.pin().get(app_name) {
            return *config;
        }

        let config = self.config.load();
        let defaults = TransactionEventsConfig {
            max_samples_stored: self.max_samples_stored(),
            ..config.default_transaction_events()
        };

        match config.app_override(app_name) {
            Some(app) => app.apply(defaults),
            None => defaults,
        }
    }

    /// Returns `true` if events of the application are collected.
    ///
    /// The decision is memoized per application until the next configuration change. A decision
    /// resolved while a change was applied is tagged with the older generation and ignored.
    pub fn is_enabled_for(&self, app_name: &str) -> bool {
        let generation = self.config_generation.load(Ordering::Acquire);
        if let Some(&(memo_generation, enabled)) = self.enabled_for_app.pin().get(app_name)
            && memo_generation == generation
        {
            return enabled;
        }

        let enabled = self.app_config(app_name).enabled;
        self.memoize_enabled(app_name, generation, enabled);
        enabled
    }

    fn memoize_enabled(&self, app_name: &str, generation: u64, enabled: bool) {
        self.enabled_for_app
            .pin()
            .insert(app_name.to_owned(), (generation, enabled));
    }

    /// Invalidates memoized decisions. Must be called after the new config is visible.
    fn bump_config_generation(&self) {
        self.config_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Applies a configuration change.
    ///
    /// Applications that end up disabled lose their live ordinary reservoir. Events recorded
    /// afterwards decide afresh whether the application is enabled.
    pub fn config_changed(&self, change: ConfigChange) {
        match change {
            ConfigChange::App { app_name, config } => {
                harvest_log::debug!(
                    app = app_name.as_str(),
                    ?config,
                    "transaction events config changed"
                );
                self.app_configs.pin().insert(app_name.clone(), config);
                self.bump_config_generation();
                self.enabled_for_app.pin().remove(&app_name);
                if !config.enabled {
                    self.store.remove(ReservoirKind::Ordinary, &app_name);
                }
            }
            ConfigChange::Reloaded(config) => {
                harvest_log::debug!("configuration reloaded");
                self.backlog
                    .set_capacity(config.harvest().synthetics.max_pending_batches);
                self.config.store(config);
                self.bump_config_generation();
                self.enabled_for_app.pin().clear();

                for app_name in self.store.app_names(ReservoirKind::Ordinary) {
                    if !self.app_config(&app_name).enabled {
                        self.store.remove(ReservoirKind::Ordinary, &app_name);
                    }
                }
            }
        }
    }

    pub(crate) fn new_reservoir(
        &self,
        kind: ReservoirKind,
        app_name: &str,
        decided_last: u64,
    ) -> Reservoir<E> {
        let config = self.app_config(app_name);
        let max_size = match kind {
            ReservoirKind::Ordinary => config.max_samples_stored,
            ReservoirKind::Synthetic => self.config.load().harvest().synthetics.max_events_per_app,
        };

        Reservoir::new(
            app_name,
            kind.service_name(),
            max_size,
            decided_last,
            config.target_samples_stored as u64,
        )
    }

    pub(crate) fn get_or_create(&self, kind: ReservoirKind, app_name: &str) -> Arc<Reservoir<E>> {
        self.store.get_or_create(kind, app_name, || {
            self.new_reservoir(kind, app_name, 0)
        })
    }

    /// Returns the live ordinary reservoir of an application.
    pub fn reservoir(&self, app_name: &str) -> Option<Arc<Reservoir<E>>> {
        self.store.get(ReservoirKind::Ordinary, app_name)
    }

    /// Returns the live ordinary reservoir of an application, creating it if necessary.
    pub fn get_or_create_reservoir(&self, app_name: &str) -> Arc<Reservoir<E>> {
        self.get_or_create(ReservoirKind::Ordinary, app_name)
    }

    /// Returns the live synthetic reservoir of an application.
    pub fn synthetic_reservoir(&self, app_name: &str) -> Option<Arc<Reservoir<E>>> {
        self.store.get(ReservoirKind::Synthetic, app_name)
    }

    /// Returns the backlog of unsent synthetic batches.
    pub fn synthetic_backlog(&self) -> &SyntheticBacklog<E> {
        &self.backlog
    }

    /// Drops all live ordinary reservoirs.
    pub fn clear_reservoirs(&self) {
        self.store.clear(ReservoirKind::Ordinary);
    }

    /// Makes the adaptive sampling decision for the next event of an application and returns
    /// its priority.
    pub fn next_priority<R: Rng + ?Sized>(&self, app_name: &str, rng: &mut R) -> f64 {
        let sampled = self.get_or_create_reservoir(app_name).compute_sampled(rng);
        harvest_sampling::priority(sampled, rng)
    }

    /// Records a finished transaction.
    ///
    /// Synthetic events go to the synthetic reservoir of the application first and only compete
    /// with ordinary events if that reservoir rejects them. The event is only built if it can be
    /// retained, otherwise the offer is counted as a try. This never fails.
    pub fn record<P>(&self, app_name: &str, pending: P)
    where
        P: PendingEvent<Event = E>,
    {
        if !self.enabled || self.is_shut_down() {
            return;
        }

        if !self.is_enabled_for(app_name) {
            self.store.remove(ReservoirKind::Ordinary, app_name);
            return;
        }

        let priority = pending.priority();
        let mut candidate = if pending.is_synthetic() {
            let event = pending.into_event(&self.names.load());
            match self.offer_live(ReservoirKind::Synthetic, app_name, event) {
                None => {
                    harvest_log::trace!(app = app_name, "added synthetic transaction event");
                    return;
                }
                Some(event) => Candidate::Built(event),
            }
        } else {
            Candidate::Pending(pending)
        };

        loop {
            let reservoir = self.get_or_create(ReservoirKind::Ordinary, app_name);

            if !reservoir.would_accept(priority) {
                if reservoir.try_increment_number_of_tries() {
                    return;
                }
                // Swapped out by a concurrent harvest, count the try on the new reservoir.
                continue;
            }

            let event = candidate.build(&self.names.load());
            match reservoir.offer(event) {
                Offer::Accepted | Offer::Rejected(_) => return,
                Offer::Closed(event) => candidate = Candidate::Built(event),
            }
        }
    }

    /// Offers an event to the live reservoir, following concurrent harvests.
    ///
    /// Returns the event back if the live reservoir rejected it.
    fn offer_live(&self, kind: ReservoirKind, app_name: &str, mut event: E) -> Option<E> {
        loop {
            let reservoir = self.get_or_create(kind, app_name);
            match reservoir.offer(event) {
                Offer::Accepted => return None,
                Offer::Rejected(event) => return Some(event),
                Offer::Closed(closed) => event = closed,
            }
        }
    }

    /// Stops collecting events and drops all live ordinary reservoirs.
    ///
    /// Harvests after the shutdown do nothing.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::Relaxed) {
            harvest_log::info!("shutting down transaction events");
        }
        self.clear_reservoirs();
    }
}

impl<E> fmt::Debug for TransactionEventsService<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionEventsService")
            .field("enabled", &self.enabled)
            .field("max_samples_stored", &self.max_samples_stored)
            .field("store", &self.store)
            .field("backlog", &self.backlog)
            .finish()
    }
}
