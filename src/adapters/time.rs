//! Monotonic time and cooperative delays.
//!
//! - **`target_os = "espidf"`** — wraps `esp_timer_get_time()` from the
//!   ESP-IDF high-resolution timer (microsecond precision, monotonic).
//! - **all other targets** — uses `std::time::Instant` for host-side
//!   testing and simulation.
//!
//! Delays go through the `async-io-mini` reactor so a sleeping task never
//! blocks the executor.

use core::time::Duration;

use crate::ports::{ClockPort, DelayPort};

/// Milliseconds since gateway start (monotonic).
pub struct Uptime {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Uptime {
    fn default() -> Self {
        Self::new()
    }
}

impl Uptime {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl ClockPort for Uptime {
    #[cfg(target_os = "espidf")]
    fn now_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Reactor-driven delay: the task suspends, the executor keeps running.
#[derive(Default, Clone, Copy)]
pub struct ReactorDelay;

impl ReactorDelay {
    pub fn new() -> Self {
        Self
    }
}

impl DelayPort for ReactorDelay {
    async fn delay_ms(&self, ms: u32) {
        async_io_mini::Timer::after(Duration::from_millis(u64::from(ms))).await;
    }
}
