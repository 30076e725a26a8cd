use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::Result;
use harvest_config::Config;
use harvest_events::{
    Batch, LazyEvent, NameCache, TransactionEventsService, TransmitError, Transmitter,
};
use harvest_sampling::Prioritized;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::Serialize;

const TRANSACTION_NAMES: &[&str] = &[
    "WebTransaction/Uri/checkout",
    "WebTransaction/Uri/cart",
    "WebTransaction/Uri/login",
    "WebTransaction/Uri/search",
    "OtherTransaction/Job/reindex",
];

/// Parameters of a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub apps: usize,
    pub producers: usize,
    pub cycles: usize,
    pub events_per_cycle: usize,
    pub synthetic_ratio: f64,
    pub fail_rate: f64,
    pub seed: Option<u64>,
}

impl SimulationOptions {
    fn validate(&self) -> Result<()> {
        if self.apps == 0 || self.producers == 0 {
            anyhow::bail!("the simulation needs at least one app and one producer");
        }
        if !(0.0..=1.0).contains(&self.synthetic_ratio) {
            anyhow::bail!("synthetic ratio must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&self.fail_rate) {
            anyhow::bail!("fail rate must be between 0 and 1");
        }
        Ok(())
    }
}

/// A recorded transaction.
#[derive(Clone, Debug, Serialize)]
pub struct SimulatedEvent {
    pub name: Arc<str>,
    pub duration_ms: u64,
    pub priority: f64,
    pub synthetic: bool,
}

impl Prioritized for SimulatedEvent {
    fn priority(&self) -> f64 {
        self.priority
    }
}

#[derive(Serialize)]
struct BatchLine<'a> {
    app_name: &'a str,
    reservoir_size: usize,
    events_seen: u64,
    events: &'a [SimulatedEvent],
}

/// Writes every batch as a JSON line and fails transiently at a fixed rate.
pub struct JsonTransmitter<W> {
    output: Mutex<W>,
    failures: Mutex<Pcg32>,
    fail_rate: f64,
    batches: AtomicU64,
    events: AtomicU64,
}

impl<W: Write + Send> JsonTransmitter<W> {
    pub fn new(output: W, fail_rate: f64, seed: u64) -> Self {
        Self {
            output: Mutex::new(output),
            failures: Mutex::new(Pcg32::seed_from_u64(seed)),
            fail_rate: fail_rate.clamp(0.0, 1.0),
            batches: AtomicU64::new(0),
            events: AtomicU64::new(0),
        }
    }

    /// Number of batches written so far.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Number of events written so far.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

impl<W: Write + Send> Transmitter<SimulatedEvent> for JsonTransmitter<W> {
    fn send(&self, app_name: &str, batch: Batch<'_, SimulatedEvent>) -> Result<(), TransmitError> {
        if self.failures.lock().random_bool(self.fail_rate) {
            return Err(TransmitError::Transient(
                "simulated collector outage".to_owned(),
            ));
        }

        let line = BatchLine {
            app_name,
            reservoir_size: batch.max_size,
            events_seen: batch.number_of_tries,
            events: batch.events,
        };

        let mut output = self.output.lock();
        serde_json::to_writer(&mut *output, &line).map_err(TransmitError::unexpected)?;
        output
            .write_all(b"\n")
            .and_then(|()| output.flush())
            .map_err(TransmitError::unexpected)?;

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events
            .fetch_add(batch.events.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Totals of a finished simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Summary {
    pub batches: u64,
    pub events: u64,
    pub pending_batches: usize,
}

/// Runs the simulation and writes transmitted batches to stdout.
pub fn run(config: Config, options: SimulationOptions) -> Result<()> {
    let start = Instant::now();
    let summary = simulate(config, &options, io::stdout())?;

    harvest_log::info!(
        batches = summary.batches,
        events = summary.events,
        pending = summary.pending_batches,
        elapsed = ?start.elapsed(),
        "simulation finished"
    );

    Ok(())
}

fn simulate<W>(config: Config, options: &SimulationOptions, output: W) -> Result<Summary>
where
    W: Write + Send + 'static,
{
    options.validate()?;

    let mut seeds = Pcg32::seed_from_u64(options.seed.unwrap_or_else(rand::random));
    let transmitter = Arc::new(JsonTransmitter::new(
        output,
        options.fail_rate,
        seeds.random(),
    ));
    let service = TransactionEventsService::new(Arc::new(config), transmitter.clone());
    let app_names: Vec<String> = (0..options.apps).map(|i| format!("app-{i}")).collect();

    for cycle in 0..options.cycles {
        record_cycle(&service, &app_names, options, &mut seeds);

        for app_name in &app_names {
            service.harvest(app_name);
        }

        harvest_log::debug!(
            cycle,
            batches = transmitter.batches(),
            pending = service.synthetic_backlog().len(),
            "finished harvest cycle"
        );
    }

    let summary = Summary {
        batches: transmitter.batches(),
        events: transmitter.events(),
        pending_batches: service.synthetic_backlog().len(),
    };

    service.shutdown();
    Ok(summary)
}

/// Records one cycle worth of events from all producers in parallel.
fn record_cycle(
    service: &TransactionEventsService<SimulatedEvent>,
    app_names: &[String],
    options: &SimulationOptions,
    seeds: &mut Pcg32,
) {
    let per_producer = options.events_per_cycle.div_ceil(options.producers);

    thread::scope(|scope| {
        for _ in 0..options.producers {
            let mut rng = Pcg32::seed_from_u64(seeds.random());
            scope.spawn(move || {
                for _ in 0..per_producer {
                    record_one(service, app_names, options.synthetic_ratio, &mut rng);
                }
            });
        }
    });
}

fn record_one(
    service: &TransactionEventsService<SimulatedEvent>,
    app_names: &[String],
    synthetic_ratio: f64,
    rng: &mut Pcg32,
) {
    let app_name = &app_names[rng.random_range(0..app_names.len())];
    let name = TRANSACTION_NAMES[rng.random_range(0..TRANSACTION_NAMES.len())];
    let duration_ms = rng.random_range(1..2_000);
    let synthetic = rng.random_bool(synthetic_ratio);
    let priority = service.next_priority(app_name, rng);

    let build = move |names: &NameCache| SimulatedEvent {
        name: names.intern_name(name),
        duration_ms,
        priority,
        synthetic,
    };

    if synthetic {
        service.record(app_name, LazyEvent::synthetic(priority, build));
    } else {
        service.record(app_name, LazyEvent::new(priority, build));
    }
}
