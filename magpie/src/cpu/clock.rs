use std::time::Instant;

use lazy_static::lazy_static;

lazy_static! {
    static ref CLOCK_BASE: Instant = Instant::now();
}

/// Monotonic microseconds since the process clock baseline.
///
/// The baseline is fixed the first time any caller reads the clock, so
/// timestamps are comparable across threads for the process lifetime.
/// Seeds and paces the harmonizer.
pub fn now_us() -> u64 {
    CLOCK_BASE.elapsed().as_micros() as u64
}
