use std::error::Error;
use std::time::Instant;

use harvest_config::UnexpectedErrorPolicy;
use harvest_sampling::{Prioritized, Reservoir};
use harvest_statsd::metric;

use crate::service::TransactionEventsService;
use crate::statsd::{EventCounters, EventGauges, EventTimers};
use crate::store::ReservoirKind;
use crate::transmit::{Batch, TransmitError};

/// What happens to a harvested batch after a failed transmit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailureAction {
    /// Resample the batch together with the events of the next harvest.
    Retry,
    /// Drop the batch.
    Discard,
}

impl FailureAction {
    fn for_error(error: &TransmitError, policy: UnexpectedErrorPolicy) -> Self {
        match (error, policy) {
            (TransmitError::Transient(_), _) => Self::Retry,
            (TransmitError::Permanent(_), _) => Self::Discard,
            (TransmitError::Unexpected(_), UnexpectedErrorPolicy::Retry) => Self::Retry,
            (TransmitError::Unexpected(_), UnexpectedErrorPolicy::Discard) => Self::Discard,
        }
    }
}

fn send_reservoir<E>(
    service: &TransactionEventsService<E>,
    reservoir: &Reservoir<E>,
) -> (usize, Result<(), TransmitError>)
where
    E: Prioritized + Clone + Send + Sync + 'static,
{
    let events = reservoir.as_list();
    let batch = Batch {
        max_size: reservoir.max_size(),
        number_of_tries: reservoir.number_of_tries(),
        events: &events,
    };

    (events.len(), service.transmitter.send(reservoir.app_name(), batch))
}

impl<E> TransactionEventsService<E>
where
    E: Prioritized + Clone + Send + Sync + 'static,
{
    /// Runs one harvest cycle for an application.
    ///
    /// Synthetic events are harvested into the backlog first, and part of the backlog is sent.
    /// Then the live ordinary reservoir is replaced by an empty one, seeded with the number of
    /// tries of the harvested reservoir, and the harvested events are transmitted. On a transient
    /// failure they are merged into the new live reservoir, on a permanent failure they are
    /// dropped.
    ///
    /// Failures are logged and counted, but never returned.
    pub fn harvest(&self, app_name: &str) {
        if !self.is_enabled() || self.is_shut_down() {
            return;
        }

        self.harvest_synthetics(app_name);

        if !self.is_enabled_for(app_name) {
            self.store.remove(ReservoirKind::Ordinary, app_name);
            return;
        }

        let live = self.store.get(ReservoirKind::Ordinary, app_name);
        let decided_last = harvest_sampling::decided_last(live.as_deref());
        let fresh = self.new_reservoir(ReservoirKind::Ordinary, app_name, decided_last);

        let Some(harvested) = self.store.replace(ReservoirKind::Ordinary, app_name, fresh) else {
            return;
        };

        // Producers that fetched the harvested reservoir before the swap move on to the new one.
        harvested.seal();

        if harvested.is_empty() {
            return;
        }

        metric!(
            gauge(EventGauges::HarvestLimit) = harvested.max_size() as u64,
            app = app_name
        );

        let start = Instant::now();
        let (sent, result) = send_reservoir(self, &harvested);

        match result {
            Ok(()) => {
                metric!(timer(EventTimers::HarvestTransmit) = start.elapsed(), app = app_name);
                metric!(
                    counter(EventCounters::TransactionSent) += sent as u64,
                    app = app_name
                );
                metric!(
                    counter(EventCounters::TransactionSeen) += harvested.number_of_tries(),
                    app = app_name
                );
                harvest_log::debug!(
                    app = app_name,
                    sent,
                    seen = harvested.number_of_tries(),
                    "sent transaction events"
                );
            }
            Err(error) => self.handle_failure(app_name, &harvested, error),
        }
    }

    fn handle_failure(&self, app_name: &str, harvested: &Reservoir<E>, error: TransmitError) {
        let policy = self.config().harvest().unexpected_errors;

        match FailureAction::for_error(&error, policy) {
            FailureAction::Retry => {
                harvest_log::debug!(
                    app = app_name,
                    error = &error as &dyn Error,
                    "unable to send events for regular transactions, data for this harvest will be resampled and retried"
                );
                // Save unsent data by merging it with the current data.
                self.get_or_create(ReservoirKind::Ordinary, app_name)
                    .retry_all(harvested);
                metric!(
                    counter(EventCounters::HarvestRetried) += 1u64,
                    app = app_name,
                    kind = ReservoirKind::Ordinary.as_str()
                );
            }
            FailureAction::Discard => {
                harvest_log::debug!(
                    app = app_name,
                    error = &error as &dyn Error,
                    "unable to send events for regular transactions, data for this harvest will be dropped"
                );
                harvested.clear();
                metric!(
                    counter(EventCounters::HarvestDiscarded) += 1u64,
                    app = app_name,
                    kind = ReservoirKind::Ordinary.as_str()
                );
            }
        }
    }

    /// Moves the live synthetic reservoir into the backlog and sends part of the backlog.
    fn harvest_synthetics(&self, app_name: &str) {
        let live = self.store.get(ReservoirKind::Synthetic, app_name);
        let decided_last = harvest_sampling::decided_last(live.as_deref());
        let fresh = self.new_reservoir(ReservoirKind::Synthetic, app_name, decided_last);

        if let Some(harvested) = self.store.replace(ReservoirKind::Synthetic, app_name, fresh) {
            harvested.seal();
            if !harvested.is_empty() {
                if let Err(error) = self.backlog.push(harvested) {
                    harvest_log::warn!(
                        app = app_name,
                        error = &error as &dyn Error,
                        "some synthetic transaction events were discarded"
                    );
                    metric!(counter(EventCounters::SyntheticsDropped) += 1u64, app = app_name);
                }
            }
        }

        let budget = self.config().harvest().synthetics.max_batches_per_harvest;
        self.drain_backlog(budget);

        metric!(gauge(EventGauges::SyntheticsPending) = self.backlog.len() as u64);
    }

    /// Sends the oldest backlog batches until `budget` batches were sent or a send fails.
    ///
    /// Each batch is sent for the application that produced it. A batch that failed transiently
    /// goes back to the front of the backlog, which may push out the newest queued batch. Returns
    /// the number of batches sent.
    fn drain_backlog(&self, budget: usize) -> usize {
        let mut sent_batches = 0;

        while sent_batches < budget {
            let Some(batch) = self.backlog.pop() else {
                break;
            };

            let app_name = batch.app_name();
            let (sent, result) = send_reservoir(self, &batch);

            match result {
                Ok(()) => {
                    sent_batches += 1;
                    metric!(
                        counter(EventCounters::SyntheticsSent) += sent as u64,
                        app = app_name
                    );
                }
                Err(error) if error.is_transient() => {
                    harvest_log::debug!(
                        app = app_name,
                        error = &error as &dyn Error,
                        "unable to send events for synthetic transactions, unsent events will be included in the next harvest"
                    );
                    metric!(
                        counter(EventCounters::HarvestRetried) += 1u64,
                        app = app_name,
                        kind = ReservoirKind::Synthetic.as_str()
                    );
                    if let Some(dropped) = self.backlog.requeue(batch) {
                        harvest_log::warn!(
                            app = dropped.app_name(),
                            "synthetic backlog overflowed, some synthetic transaction events were discarded"
                        );
                        metric!(
                            counter(EventCounters::SyntheticsDropped) += 1u64,
                            app = dropped.app_name()
                        );
                    }
                    break;
                }
                Err(error) => {
                    harvest_log::debug!(
                        app = app_name,
                        error = &error as &dyn Error,
                        "unable to send events for synthetic transactions, unsent events will be dropped"
                    );
                    metric!(
                        counter(EventCounters::HarvestDiscarded) += 1u64,
                        app = app_name,
                        kind = ReservoirKind::Synthetic.as_str()
                    );
                    break;
                }
            }
        }

        sent_batches
    }
}
