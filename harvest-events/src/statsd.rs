use harvest_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics of the transaction events engine.
pub enum EventCounters {
    /// Number of events in successfully transmitted ordinary batches.
    ///
    /// Tagged by `app`.
    TransactionSent,
    /// Number of events decided by successfully transmitted ordinary reservoirs.
    ///
    /// This includes rejected events and events that were never built, so together with
    /// [`Self::TransactionSent`] it shows the effective sampling rate.
    TransactionSeen,
    /// Number of harvested batches merged back into the live reservoir after a failed transmit.
    ///
    /// Tagged by `app` and `kind`.
    HarvestRetried,
    /// Number of harvested batches dropped after a failed transmit.
    ///
    /// Tagged by `app` and `kind`.
    HarvestDiscarded,
    /// Number of events in successfully transmitted synthetic batches.
    SyntheticsSent,
    /// Number of harvested synthetic batches dropped because the backlog was full.
    SyntheticsDropped,
}

impl CounterMetric for EventCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::TransactionSent => "events.transaction.sent",
            Self::TransactionSeen => "events.transaction.seen",
            Self::HarvestRetried => "events.harvest.retried",
            Self::HarvestDiscarded => "events.harvest.discarded",
            Self::SyntheticsSent => "events.synthetics.sent",
            Self::SyntheticsDropped => "events.synthetics.dropped",
        }
    }
}

/// Timer metrics of the transaction events engine.
pub enum EventTimers {
    /// Time spent transmitting an ordinary batch successfully.
    HarvestTransmit,
}

impl TimerMetric for EventTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::HarvestTransmit => "events.harvest.transmit",
        }
    }
}

/// Gauge metrics of the transaction events engine.
pub enum EventGauges {
    /// Capacity of the reservoir harvested last for an app.
    HarvestLimit,
    /// Number of synthetic batches waiting in the backlog after a harvest.
    SyntheticsPending,
}

impl GaugeMetric for EventGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::HarvestLimit => "events.harvest.limit",
            Self::SyntheticsPending => "events.synthetics.pending",
        }
    }
}
