//! Rate-controlled probe transmitter.
//!
//! Sends one-byte sequenced frames to a target at a fixed rate until a
//! deadline. The receiving node turns each probe into a CSI record, so the
//! pacing here sets the capture rate on the other side.

use super::peers::PeerRegistry;
use crate::diag::Sampler;
use crate::radio::{Bandwidth, MacAddr, RadioDriver, RadioError};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Default probe rate.
pub const DEFAULT_PROBE_RATE_HZ: u32 = 100;

/// Default probe session length.
pub const DEFAULT_PROBE_DURATION: Duration = Duration::from_secs(10);

/// Shortest interval between probes.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(1);

/// Deadline used when the requested duration does not fit in an `Instant`.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Send failures are logged on the first and then every this many.
pub const SEND_ERROR_LOG_EVERY: u32 = 100;

/// One probe session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub target: MacAddr,
    pub duration: Duration,
    pub rate_hz: u32,
}

impl Default for ProbeRequest {
    fn default() -> Self {
        Self {
            target: MacAddr::BROADCAST,
            duration: DEFAULT_PROBE_DURATION,
            rate_hz: DEFAULT_PROBE_RATE_HZ,
        }
    }
}

impl ProbeRequest {
    /// Time between probes. Rates below 1 Hz count as 1 Hz.
    pub fn interval(&self) -> Duration {
        let rate = self.rate_hz.max(1);
        (Duration::from_secs(1) / rate).max(MIN_PROBE_INTERVAL)
    }
}

/// Outcome of a probe session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Frames the driver accepted.
    pub sent: u32,
    /// Frames the driver refused.
    pub failed: u32,
    pub elapsed: Duration,
    /// Sequence number of the last attempted frame.
    pub last_sequence: Option<u8>,
}

impl ProbeReport {
    pub fn attempts(&self) -> u32 {
        self.sent + self.failed
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ping done: {} sent, {} failed in {:.2} s",
            self.sent,
            self.failed,
            self.elapsed.as_secs_f32()
        )
    }
}

/// Paces probe frames through the driver.
pub struct ProbeTransmitter<D: RadioDriver> {
    driver: Arc<D>,
}

impl<D: RadioDriver> ProbeTransmitter<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    /// Run one probe session to completion.
    ///
    /// Registers the target first; that is the only failure. Individual send
    /// errors are counted and the loop keeps going until the deadline. At
    /// least one probe is always sent.
    pub async fn run(
        &self,
        peers: &mut PeerRegistry<D>,
        bandwidth: Bandwidth,
        request: &ProbeRequest,
    ) -> Result<ProbeReport, RadioError> {
        peers.ensure_peer(request.target, bandwidth)?;

        let interval = request.interval();
        info!(
            "Ping start ({:.1} s at {} Hz) -> {}",
            request.duration.as_secs_f32(),
            request.rate_hz.max(1),
            request.target
        );

        let errors = Sampler::new(SEND_ERROR_LOG_EVERY);
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let start = Instant::now();
        let end = start
            .checked_add(request.duration)
            .unwrap_or_else(|| start + FAR_FUTURE);
        let mut sequence: u8 = 0;
        let mut report = ProbeReport {
            sent: 0,
            failed: 0,
            elapsed: Duration::ZERO,
            last_sequence: None,
        };

        // First tick completes immediately.
        ticker.tick().await;
        loop {
            match self.driver.send(&request.target, &[sequence]) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    if let Some(n) = errors.record() {
                        warn!("Send error ({} so far): {}", n, e);
                    }
                }
            }
            report.last_sequence = Some(sequence);
            sequence = sequence.wrapping_add(1);

            if Instant::now() >= end {
                break;
            }
            ticker.tick().await;
            if Instant::now() >= end {
                break;
            }
        }

        report.elapsed = start.elapsed();
        info!("{}", report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{DriverError, RadioManager};
    use crate::sim::{SimOp, SimRadio};

    fn setup() -> (Arc<SimRadio>, PeerRegistry<SimRadio>, ProbeTransmitter<SimRadio>) {
        let sim = Arc::new(SimRadio::new());
        let mut radio = RadioManager::new(sim.clone());
        radio.default_profile().unwrap();
        let peers = PeerRegistry::new(sim.clone());
        let probe = ProbeTransmitter::new(sim.clone());
        (sim, peers, probe)
    }

    fn request(duration: Duration, rate_hz: u32) -> ProbeRequest {
        ProbeRequest {
            duration,
            rate_hz,
            ..ProbeRequest::default()
        }
    }

    // ==================== Interval Tests ====================

    #[test]
    fn test_interval() {
        assert_eq!(ProbeRequest::default().interval(), Duration::from_millis(10));
        assert_eq!(request(Duration::ZERO, 0).interval(), Duration::from_secs(1));
        assert_eq!(request(Duration::ZERO, 1).interval(), Duration::from_secs(1));
        assert_eq!(request(Duration::ZERO, 50_000).interval(), MIN_PROBE_INTERVAL);
    }

    #[test]
    fn test_defaults() {
        let req = ProbeRequest::default();
        assert!(req.target.is_broadcast());
        assert_eq!(req.duration, Duration::from_secs(10));
        assert_eq!(req.rate_hz, 100);
    }

    // ==================== Loop Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_send_count_bounded_by_duration_and_rate() {
        let (sim, mut peers, probe) = setup();
        let report = probe
            .run(&mut peers, Bandwidth::Ht40, &request(Duration::from_secs(1), 100))
            .await
            .unwrap();

        // floor(D*R) - 1 <= sent <= ceil(D*R)
        assert!(report.sent >= 99 && report.sent <= 100, "sent {}", report.sent);
        assert_eq!(report.failed, 0);
        assert_eq!(sim.sent_count(), report.sent as usize);
        assert!(report.elapsed >= Duration::from_secs(1));
        assert!(report.elapsed < Duration::from_millis(1_020));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_duration_rounds_up() {
        let (_sim, mut peers, probe) = setup();
        let report = probe
            .run(&mut peers, Bandwidth::Ht40, &request(Duration::from_millis(105), 100))
            .await
            .unwrap();
        // D*R = 10.5
        assert!(report.sent >= 9 && report.sent <= 11, "sent {}", report.sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_wraps_after_255() {
        let (sim, mut peers, probe) = setup();
        let report = probe
            .run(&mut peers, Bandwidth::Ht40, &request(Duration::from_secs(3), 100))
            .await
            .unwrap();

        let frames = sim.sent();
        assert!(frames.len() > 257);
        assert_eq!(frames[255].1, vec![255]);
        assert_eq!(frames[256].1, vec![0]);
        assert_eq!(frames[257].1, vec![1]);
        assert!(frames.iter().all(|(to, data)| to.is_broadcast() && data.len() == 1));
        assert_eq!(
            report.last_sequence,
            Some(((report.sent - 1) % 256) as u8)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_sends_exactly_one() {
        let (sim, mut peers, probe) = setup();
        let report = probe
            .run(&mut peers, Bandwidth::Ht40, &request(Duration::ZERO, 100))
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.last_sequence, Some(0));
        assert_eq!(sim.sent(), vec![(MacAddr::BROADCAST, vec![0])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_clamped_to_one_hz() {
        let (_sim, mut peers, probe) = setup();
        let report = probe
            .run(&mut peers, Bandwidth::Ht40, &request(Duration::from_secs(3), 0))
            .await
            .unwrap();
        assert_eq!(report.sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_counted_not_fatal() {
        let (sim, mut peers, probe) = setup();
        sim.inject_failure(SimOp::Send, DriverError::NoMemory);

        let report = probe
            .run(&mut peers, Bandwidth::Ht40, &request(Duration::from_secs(2), 100))
            .await
            .unwrap();
        assert_eq!(report.sent, 0);
        assert!(report.failed >= 199 && report.failed <= 200);
        assert!(report.elapsed >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_duration_keeps_sending() {
        let (sim, mut peers, probe) = setup();
        let req = match crate::console::Command::parse("ping -t 18446744073709551615 -r 10") {
            Ok(crate::console::Command::Ping(req)) => req,
            other => panic!("unexpected parse result {:?}", other),
        };
        assert_eq!(req.duration, Duration::from_secs(u64::MAX));

        let outcome =
            time::timeout(Duration::from_secs(5), probe.run(&mut peers, Bandwidth::Ht40, &req))
                .await;
        assert!(outcome.is_err(), "session should still be running");
        assert!(sim.sent_count() >= 45, "sent {}", sim.sent_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_registration_failure_is_the_only_error() {
        let sim = Arc::new(SimRadio::new());
        let mut peers = PeerRegistry::new(sim.clone());
        let probe = ProbeTransmitter::new(sim.clone());

        // Radio not running: link init fails before any probe.
        let result = probe
            .run(&mut peers, Bandwidth::Ht40, &ProbeRequest::default())
            .await;
        assert!(result.is_err());
        assert_eq!(sim.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unicast_target_registered() {
        let (sim, mut peers, probe) = setup();
        let target = MacAddr::new([0x1a, 0, 0, 0, 0, 0x02]);
        let req = ProbeRequest {
            target,
            duration: Duration::from_millis(50),
            rate_hz: 100,
        };
        probe.run(&mut peers, Bandwidth::Ht20, &req).await.unwrap();
        assert!(peers.get(&target).is_some());
        assert!(sim.sent().iter().all(|(to, _)| *to == target));
    }
}
