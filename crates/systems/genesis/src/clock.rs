//! Microsecond time sources for frame timing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic microsecond counter.
pub trait MicrosClock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Wall clock backed by `Instant`
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosClock for SystemClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock that only moves when told to. Shared between mocks so a mock CPU
/// or renderer can "spend" a known amount of time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::Relaxed);
    }
}

impl MicrosClock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Microseconds elapsed since `start`, saturated into `u32`
pub(crate) fn elapsed_us(clock: &dyn MicrosClock, start: u64) -> u32 {
    clock.now_us().saturating_sub(start).min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_only_on_request() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_us(), 0);
        clock.advance(1500);
        assert_eq!(clock.now_us(), 1500);
        assert_eq!(elapsed_us(&clock, 500), 1000);
        assert_eq!(elapsed_us(&clock, 9000), 0);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }
}
