//! Wall-clock timing around a decoding call.

use std::time::{Duration, Instant};

/// Result of a timed call.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    /// Value returned by the call.
    pub output: T,
    /// Elapsed wall time.
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Runs `f` and measures how long it took. Does not alter scheduling.
pub fn benchmark<T>(f: impl FnOnce() -> T) -> Timed<T> {
    let start = Instant::now();
    let output = f();
    Timed {
        output,
        elapsed: start.elapsed(),
    }
}
