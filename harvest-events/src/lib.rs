//! Per-application transaction event reservoirs and the harvest cycle.
//!
//! Producers [`record`](TransactionEventsService::record) finished transactions from any
//! number of threads. Each application gets one live reservoir for ordinary events and one for
//! synthetic monitoring events. Once per report period, a [`HarvestScheduler`] thread per
//! application calls [`harvest`](TransactionEventsService::harvest), which swaps the live
//! reservoirs for empty ones and hands the harvested events to a [`Transmitter`].
//!
//! What happens to a batch after a failed transmit depends on the [`TransmitError`]:
//!
//!  - Transient failures merge the batch back into the live reservoir, where it is resampled
//!    together with new events. At most one reservoir worth of events survives.
//!  - Permanent failures drop the batch.
//!  - Unexpected failures follow the `harvest.unexpected_errors` setting.
//!
//! Synthetic batches are never resampled. They wait in a bounded [`SyntheticBacklog`] and are
//! sent a few per harvest.
//!
//! ```
//! use std::sync::Arc;
//!
//! use harvest_config::Config;
//! use harvest_events::{Batch, LazyEvent, TransactionEventsService, TransmitError, Transmitter};
//! use harvest_sampling::Prioritized;
//!
//! #[derive(Clone)]
//! struct Event {
//!     name: Arc<str>,
//!     priority: f64,
//! }
//!
//! impl Prioritized for Event {
//!     fn priority(&self) -> f64 {
//!         self.priority
//!     }
//! }
//!
//! struct Discard;
//!
//! impl Transmitter<Event> for Discard {
//!     fn send(&self, _app_name: &str, _batch: Batch<'_, Event>) -> Result<(), TransmitError> {
//!         Ok(())
//!     }
//! }
//!
//! let service = TransactionEventsService::new(Arc::new(Config::default()), Arc::new(Discard));
//!
//! service.record(
//!     "my-app",
//!     LazyEvent::new(0.5, |names: &harvest_events::NameCache| Event {
//!         name: names.intern_name("WebTransaction/Uri/checkout"),
//!         priority: 0.5,
//!     }),
//! );
//!
//! assert_eq!(service.reservoir("my-app").map(|r| r.len()), Some(1));
//! service.harvest("my-app");
//! assert_eq!(service.reservoir("my-app").map(|r| r.len()), Some(0));
//! ```
#![warn(missing_docs)]

mod backlog;
mod event;
mod harvest;
mod names;
mod scheduler;
mod service;
mod statsd;
mod store;
mod transmit;

pub use self::backlog::*;
pub use self::event::{LazyEvent, PendingEvent};
pub use self::names::*;
pub use self::scheduler::*;
pub use self::service::*;
pub use self::store::*;
pub use self::transmit::*;
