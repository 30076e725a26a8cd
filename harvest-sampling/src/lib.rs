//! Priority reservoir sampling for harvested events.
//!
//! A [`Reservoir`] keeps a bounded, priority-biased sample of the events offered to it during one
//! harvest cycle. Producers assign every event a random [priority], optionally boosted by the
//! adaptive sampling decision of [`Reservoir::compute_sampled`], and offer it to the live
//! reservoir of their application. When the reservoir is full, an event only gets in by evicting
//! the retained event with the lowest priority.
//!
//! ```
//! use harvest_sampling::{Prioritized, Reservoir};
//!
//! struct Event(f64);
//!
//! impl Prioritized for Event {
//!     fn priority(&self) -> f64 {
//!         self.0
//!     }
//! }
//!
//! let reservoir = Reservoir::new("my-app", "Transaction Event Service", 2, 0, 10);
//! assert!(reservoir.add(Event(0.3)));
//! assert!(reservoir.add(Event(0.5)));
//! assert!(reservoir.add(Event(0.7)));
//! assert!(!reservoir.add(Event(0.1)));
//!
//! assert_eq!(reservoir.min_priority(), Some(0.5));
//! assert_eq!(reservoir.number_of_tries(), 4);
//! ```
#![warn(missing_docs)]

mod adaptive;
mod reservoir;

pub use self::adaptive::*;
pub use self::reservoir::*;
