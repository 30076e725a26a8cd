use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};
use harvest_sampling::Prioritized;

use crate::service::TransactionEventsService;

/// Something that is harvested periodically for one application.
pub trait Harvestable: Send + Sync {
    /// Returns the application this harvestable belongs to.
    fn app_name(&self) -> &str;

    /// Runs one harvest.
    fn harvest(&self);

    /// Returns the interval between harvests.
    fn report_period(&self) -> Duration;

    /// Changes the harvest interval and the harvest limit.
    fn configure(&self, report_period: Duration, max_samples_stored: usize);
}

/// Harvests transaction events of one application.
pub struct EventHarvestable<E> {
    service: Arc<TransactionEventsService<E>>,
    app_name: String,
    report_period_ms: AtomicU64,
}

impl<E> EventHarvestable<E>
where
    E: Prioritized + Clone + Send + Sync + 'static,
{
    /// Creates a harvestable using the report period of the service configuration.
    pub fn new(service: Arc<TransactionEventsService<E>>, app_name: impl Into<String>) -> Self {
        let report_period = service.config().harvest().report_period();
        Self {
            service,
            app_name: app_name.into(),
            report_period_ms: AtomicU64::new(report_period.as_millis() as u64),
        }
    }
}

impl<E> Harvestable for EventHarvestable<E>
where
    E: Prioritized + Clone + Send + Sync + 'static,
{
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn harvest(&self) {
        self.service.harvest(&self.app_name);
    }

    fn report_period(&self) -> Duration {
        Duration::from_millis(self.report_period_ms.load(Ordering::Relaxed))
    }

    fn configure(&self, report_period: Duration, max_samples_stored: usize) {
        let millis = report_period.as_millis().max(1) as u64;
        self.report_period_ms.store(millis, Ordering::Relaxed);
        self.service.set_max_samples_stored(max_samples_stored);
    }
}

impl<E> fmt::Debug for EventHarvestable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHarvestable")
            .field("app_name", &self.app_name)
            .field("report_period_ms", &self.report_period_ms)
            .finish()
    }
}

/// Runs every registered [`Harvestable`] on its own thread at its report period.
///
/// Harvests of one harvestable never overlap. The period is read again after every harvest, so
/// [`Harvestable::configure`] takes effect from the next cycle.
pub struct HarvestScheduler {
    shutdown_tx: Option<Sender<()>>,
    shutdown_rx: Receiver<()>,
    threads: Vec<JoinHandle<()>>,
}

impl HarvestScheduler {
    /// Creates a scheduler without any harvestables.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        Self {
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx,
            threads: Vec::new(),
        }
    }

    /// Starts harvesting on a new thread.
    pub fn schedule(&mut self, harvestable: Arc<dyn Harvestable>) -> io::Result<()> {
        let shutdown = self.shutdown_rx.clone();
        let name = format!("harvest-{}", harvestable.app_name());

        let handle = thread::Builder::new().name(name).spawn(move || {
            harvest_log::debug!(app = harvestable.app_name(), "start harvest thread");
            loop {
                let tick = crossbeam_channel::after(harvestable.report_period());
                select! {
                    // The sender is never used, shutdown disconnects the channel.
                    recv(shutdown) -> _ => break,
                    recv(tick) -> _ => harvestable.harvest(),
                }
            }
            harvest_log::debug!(app = harvestable.app_name(), "stop harvest thread");
        })?;

        self.threads.push(handle);
        Ok(())
    }

    /// Returns the number of running harvest threads.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Returns `true` if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Stops all harvest threads and waits for running harvests to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown_tx.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                harvest_log::error!("harvest thread panicked");
            }
        }
    }
}

impl Default for HarvestScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HarvestScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for HarvestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestScheduler")
            .field("threads", &self.threads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingHarvestable {
        harvests: AtomicUsize,
    }

    impl Harvestable for CountingHarvestable {
        fn app_name(&self) -> &str {
            "counting"
        }

        fn harvest(&self) {
            self.harvests.fetch_add(1, Ordering::SeqCst);
        }

        fn report_period(&self) -> Duration {
            Duration::from_millis(5)
        }

        fn configure(&self, _report_period: Duration, _max_samples_stored: usize) {}
    }

    #[test]
    fn test_harvests_periodically_until_shutdown() {
        let harvestable = Arc::new(CountingHarvestable::default());

        let mut scheduler = HarvestScheduler::new();
        scheduler.schedule(harvestable.clone()).unwrap();
        assert_eq!(scheduler.len(), 1);

        thread::sleep(Duration::from_millis(100));
        scheduler.shutdown();

        let harvests = harvestable.harvests.load(Ordering::SeqCst);
        assert!(harvests >= 2, "harvests {harvests}");

        thread::sleep(Duration::from_millis(30));
        assert_eq!(harvestable.harvests.load(Ordering::SeqCst), harvests);
    }
}
