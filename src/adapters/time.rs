//! Millisecond clocks behind the [`Clock`] port.
//!
//! - **`target_os = "espidf"`**: [`SystemClock`] wraps `esp_timer_get_time()`
//!   from the ESP-IDF high-resolution timer (monotonic).
//! - **`not(target_os = "espidf")`**: [`SystemClock`] uses
//!   `std::time::Instant` for host-side simulation.
//!
//! [`ManualClock`] is stepped by hand for deterministic host tests.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::app::ports::Clock;

/// Monotonic clock since boot, truncated to a wrapping `u32`.
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Microseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        // SAFETY: esp_timer_get_time reads a free-running counter; callable
        // from any task.
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Microseconds since the clock was created.
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        (self.uptime_us() / 1_000) as u32
    }
}

/// Hand-stepped clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU32,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: AtomicU32::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_wraps() {
        let clock = ManualClock::new(u32::MAX - 5);
        clock.advance(10);
        assert_eq!(clock.now_ms(), 4);
        assert_eq!(clock.now_ms().wrapping_sub(u32::MAX - 5), 10);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.now_ms() >= a);
    }
}
