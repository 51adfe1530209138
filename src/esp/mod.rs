//! ESP-IDF platform bindings.

mod driver;

pub use driver::EspRadio;

use crate::clock::Clock;

/// Microseconds since boot from the high-resolution timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EspClock;

impl Clock for EspClock {
    fn now_us(&self) -> u64 {
        let now = unsafe { esp_idf_sys::esp_timer_get_time() };
        now.max(0) as u64
    }
}
