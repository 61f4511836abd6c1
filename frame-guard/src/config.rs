//! Process-wide configuration for sampling.
//!
//! The only shared mutable setting in the library is the maximum number of
//! iterations the sampler may spend in its generate-and-test loop. Updates
//! become visible to subsequently started sampling calls; calls already in
//! progress keep the value they read at their start.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Default maximum number of sampling iterations.
pub const DEFAULT_MAX_SAMPLING_ITERATIONS: usize = 10_000;

static MAX_SAMPLING_ITERATIONS: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_SAMPLING_ITERATIONS);

/// Returns the current process-wide maximum number of sampling iterations.
pub fn max_sampling_iterations() -> usize {
    MAX_SAMPLING_ITERATIONS.load(Ordering::SeqCst)
}

/// Sets the process-wide maximum number of sampling iterations.
///
/// The sampler reads this value once when a sampling call starts, so the
/// update affects future calls without disturbing in-flight ones.
pub fn set_max_sampling_iterations(iterations: usize) {
    MAX_SAMPLING_ITERATIONS.store(iterations, Ordering::SeqCst);
}

/// Restores all configuration values to their defaults.
pub fn restore_defaults() {
    MAX_SAMPLING_ITERATIONS.store(DEFAULT_MAX_SAMPLING_ITERATIONS, Ordering::SeqCst);
}
