//! Configuration for the harvest CLI and the transaction event engine.
//!
//! The configuration is loaded from a `config.yml` file in a configuration folder. Every section
//! is optional and falls back to sensible defaults:
//!
//! ```yaml
//! logging:
//!   level: debug
//! transaction_events:
//!   max_samples_stored: 2000
//!   target_samples_stored: 10
//! harvest:
//!   report_period: 60
//!   synthetics:
//!     max_pending_batches: 25
//! apps:
//!   checkout:
//!     max_samples_stored: 500
//! ```
#![warn(missing_docs)]

mod config;
mod events;

pub use crate::config::*;
pub use crate::events::*;
