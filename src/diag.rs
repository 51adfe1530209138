//! Log sampling for hot paths.

use std::sync::atomic::{AtomicU32, Ordering};

/// Logs the first occurrence and then every `every`-th one.
///
/// ```
/// use csi_radio_esp32::diag::Sampler;
///
/// let sampler = Sampler::new(100);
/// assert_eq!(sampler.record(), Some(1));
/// assert_eq!(sampler.record(), None);
/// ```
#[derive(Debug)]
pub struct Sampler {
    every: u32,
    seen: AtomicU32,
}

impl Sampler {
    pub const fn new(every: u32) -> Self {
        Self {
            every: if every == 0 { 1 } else { every },
            seen: AtomicU32::new(0),
        }
    }

    /// Count one occurrence. Returns the running total when it should be
    /// logged.
    pub fn record(&self) -> Option<u32> {
        let n = self.seen.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if n == 1 || n % self.every == 0 {
            Some(n)
        } else {
            None
        }
    }

    /// Total occurrences counted so far.
    pub fn count(&self) -> u32 {
        self.seen.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_every_nth() {
        let sampler = Sampler::new(100);
        let logged: Vec<u32> = (0..350).filter_map(|_| sampler.record()).collect();
        assert_eq!(logged, vec![1, 100, 200, 300]);
        assert_eq!(sampler.count(), 350);
    }

    #[test]
    fn test_zero_interval_logs_everything() {
        let sampler = Sampler::new(0);
        assert_eq!(sampler.record(), Some(1));
        assert_eq!(sampler.record(), Some(2));
    }
}
