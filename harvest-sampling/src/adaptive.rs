//! Adaptive sampling across harvest cycles.
//!
//! Traffic is bursty, so the number of events that should be marked as sampled in one harvest
//! cycle is derived from the traffic of the previous cycle. The first cycle samples the first
//! `target` events. Later cycles sample with probability `target / decided_last` until the target
//! is reached, and then back off exponentially until twice the target has been sampled.

use rand::Rng;

use crate::reservoir::{Prioritized, Reservoir};

/// Number of decimal places kept of a random priority.
const PRIORITY_PRECISION: f64 = 1_000_000.0;

/// Returns the seed for the adaptive state of the next reservoir.
///
/// This is the number of tries of the reservoir being replaced, or `0` if there is none. The
/// target of the next cycle is configured separately on [`Reservoir::new`].
pub fn decided_last<E: Prioritized>(previous: Option<&Reservoir<E>>) -> u64 {
    previous.map_or(0, |reservoir| reservoir.number_of_tries())
}

/// Makes a single sampling decision.
///
/// `sampled` and `decided` are the number of sampled and decided events of the current cycle so
/// far, `random` is a uniform random number in `[0, 1)`.
pub fn sample_decision(
    decided_last: u64,
    target: u64,
    sampled: u64,
    decided: u64,
    random: f64,
) -> bool {
    if decided_last == 0 {
        return sampled < target;
    }

    if sampled < target {
        return random * (decided_last as f64) < target as f64;
    }

    let target = target as f64;
    let threshold = target.powf(target / sampled as f64) - target.powf(0.5);
    random * (decided.max(1) as f64) < threshold
}

/// Returns a random priority for an event.
///
/// The priority is a uniform random number in `[0, 1)` truncated to six decimal places. Sampled
/// events get `1.0` added, so they always outrank unsampled events in a reservoir.
pub fn priority<R: Rng + ?Sized>(sampled: bool, rng: &mut R) -> f64 {
    let priority = (rng.random::<f64>() * PRIORITY_PRECISION).trunc() / PRIORITY_PRECISION;
    if sampled { priority + 1.0 } else { priority }
}
