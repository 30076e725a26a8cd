//! Logging facade for the harvest engine.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files. Setup is only
//! available with the `init` feature.
//!
//! ```ignore
//! use harvest_log::LogConfig;
//!
//! let log_config = LogConfig {
//!     enable_backtraces: true,
//!     ..LogConfig::default()
//! };
//!
//! harvest_log::init(&log_config);
//! ```
//!
//! # Logging
//!
//! The basic use of the log crate is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the highest-priority log messages
//! and `trace!` the lowest. Each of these macros accept format strings similarly to [`println!`]
//! as well as structured fields.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior, such as data dropped due to full buffers.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging, including failed harvests.
//! - [`trace!`] for full auxiliary information, such as per-event decisions.
//!
//! ```
//! harvest_log::info!("startup complete");
//! harvest_log::debug!(app = "my-app", events = 12, "harvested reservoir");
//! ```
//!
//! ## Logging Error Types
//!
//! To log errors together with their causes, use the [`LogError`] wrapper.
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use harvest_log::LogError;
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! harvest_log::error!("operation failed: {}", LogError(&custom_error));
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It enables test mode of the logger and customizes log levels
//! for the current crate. It requires the `test` feature.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     harvest_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
