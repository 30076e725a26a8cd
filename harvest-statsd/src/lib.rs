//! A high-level StatsD metric client built on cadence.
//!
//! The harvest engine reports supportability metrics about itself (events seen and sent per
//! harvest, transmit durations, dropped synthetic batches) through this crate.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first define one of the metric traits on a custom enum.
//! The following types of metrics are available: `counter`, `timer` and `gauge`.
//! For explanations on what that means see [Metric Types].
//!
//! The metric traits serve only to provide a type safe metric name. All metric types have exactly
//! the same form, they are different only to ensure that a metric can only be used for the type for
//! which it was defined, (e.g. a counter metric cannot be used as a timer metric).
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case, invoking `with_client`
//! or the [`metric!`] macro will become a noop. Only when configured, metrics will actually be
//! collected.
//!
//! To initialize the client, either use [`set_client`] to pass a custom client, or use
//! [`init`] to create a default client with known arguments:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use harvest_statsd::MetricsConfig;
//!
//! harvest_statsd::init(MetricsConfig {
//!     prefix: "harvest".to_owned(),
//!     host: "localhost:8125".to_owned(),
//!     default_tags: BTreeMap::new(),
//!     default_sample_rate: 1.0.into(),
//! })
//! .ok();
//! ```
//!
//! ## Macro Usage
//!
//! The recommended way to record metrics is by using the [`metric!`] macro.
//!
//! ```
//! use harvest_statsd::{metric, CounterMetric};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "counter"
//!     }
//! }
//!
//! metric!(counter(MyCounter) += 1);
//! ```
//!
//! [Metric Types]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
use parking_lot::RwLock;
use rand::Rng;
use rand::distr::StandardUniform;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// A sample rate clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate(f64);

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }
}

impl From<SampleRate> for f64 {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate.
    pub default_sample_rate: SampleRate,
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsConfig {
    /// Prefix which is appended to all metric names.
    pub prefix: String,
    /// Host of the metrics upstream.
    pub host: String,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Default sample rate for metrics, between 0.0 (= 0%) and 1.0 (= 100%).
    pub default_sample_rate: SampleRate,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        let sample_rate = self.default_sample_rate.0;
        if !Self::should_send(sample_rate) {
            return;
        }

        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if sample_rate < 1.0 {
            metric = metric.with_sampling_rate(sample_rate);
        }

        if let Err(error) = metric.try_send() {
            harvest_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }

    fn should_send(sample_rate: f64) -> bool {
        if sample_rate <= 0.0 {
            false
        } else if sample_rate >= 1.0 {
            true
        } else {
            let s: f64 = rand::rng().sample(StandardUniform);
            s <= sample_rate
        }
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: RefCell<Option<Arc<MetricsClient>>> = METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: MetricsClient) {
    *METRICS_CLIENT.write() = Some(Arc::new(client));
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
///
/// Returns all metric lines emitted during the call, in order.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
        default_tags: Default::default(),
        default_sample_rate: 1.0.into(),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    collect_lines(&rx)
}

fn collect_lines(rx: &crossbeam_channel::Receiver<Vec<u8>>) -> Vec<String> {
    rx.try_iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
}

/// Disable the client again.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
}

/// Tell the metrics system to report to statsd.
pub fn init(config: MetricsConfig) -> io::Result<()> {
    let addr = config
        .host
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::other(format!("could not resolve '{}'", config.host)))?;

    harvest_log::info!("reporting metrics to statsd at {addr}");

    let sample_rate: f64 = config.default_sample_rate.into();
    harvest_log::debug!(
        "metrics sample rate is set to {sample_rate}{}",
        if sample_rate == 0.0 {
            ", no metrics will be reported"
        } else {
            ""
        }
    );

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let udp_sink = BufferedUdpMetricSink::from(addr, socket).map_err(io::Error::other)?;
    let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);

    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(&config.prefix, queuing_sink),
        default_tags: config.default_tags,
        default_sample_rate: config.default_sample_rate,
    });

    Ok(())
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked.  For the most part
/// the [`metric!`] macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time. Examples include
/// the time it takes to transmit a harvested batch to the collector.
///
/// ## Example
///
/// ```
/// use harvest_statsd::{metric, TimerMetric};
///
/// enum MyTimer {
///     Transmit,
/// }
///
/// impl TimerMetric for MyTimer {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Transmit => "transmit",
///         }
///     }
/// }
///
/// # use std::time::Instant;
/// let start_time = Instant::now();
/// metric!(timer(MyTimer::Transmit) = start_time.elapsed(), app = "my-app");
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client. The rates at which these
/// events occur or average values will be determined by the server receiving them.
///
/// ## Example
///
/// ```
/// use harvest_statsd::{metric, CounterMetric};
///
/// enum MyCounter {
///     EventsSent,
/// }
///
/// impl CounterMetric for MyCounter {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::EventsSent => "events_sent",
///         }
///     }
/// }
///
/// metric!(counter(MyCounter::EventsSent) += 12, app = "my-app");
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client. They do not
/// change unless changed by the client. Examples include the number of pending synthetic batches.
///
/// ## Example
///
/// ```
/// use harvest_statsd::{metric, GaugeMetric};
///
/// struct QueueSize;
///
/// impl GaugeMetric for QueueSize {
///     fn name(&self) -> &'static str {
///         "queue_size"
///     }
/// }
///
/// # use std::collections::VecDeque;
/// let queue = VecDeque::new();
/// # let _hint: &VecDeque<()> = &queue;
/// metric!(gauge(QueueSize) = queue.len() as u64);
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                // NOTE: cadence distribution support Duration out of the box and converts it to nanos,
                // but we want milliseconds.
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };
}
