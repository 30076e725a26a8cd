//! The harvest command line.
//!
//! Harvest collects finished transactions of many applications into bounded, priority-sampled
//! reservoirs and periodically sends them upstream. This binary bootstraps the configuration
//! folder and runs a load simulation against the engine:
//!
//! ```text
//! harvest config init --config ./.harvest
//! harvest simulate --config ./.harvest --apps 4 --cycles 10 --fail-rate 0.2
//! ```
//!
//! # Workspace Crates
//!
//!  - `harvest`: Main entry point and command line interface.
//!  - [`harvest-config`]: Static configuration for the CLI and the engine.
//!  - [`harvest-events`]: Per-application reservoirs and the harvest cycle.
//!  - [`harvest-log`]: Logging setup.
//!  - [`harvest-sampling`]: Priority reservoir and adaptive sampling.
//!  - [`harvest-statsd`]: StatsD client for supportability metrics.
//!
//! [`harvest-config`]: ../harvest_config/index.html
//! [`harvest-events`]: ../harvest_events/index.html
//! [`harvest-log`]: ../harvest_log/index.html
//! [`harvest-sampling`]: ../harvest_sampling/index.html
//! [`harvest-statsd`]: ../harvest_statsd/index.html

mod cli;
mod setup;
mod simulate;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            harvest_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
