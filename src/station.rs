//! One radio and everything that runs on it.
//!
//! [`Station`] owns the lifecycle manager, the peer registry, the probe
//! transmitter, the capture controller and the messenger for a single
//! driver, and turns console [`Command`]s into operations on them.

use crate::capture::{CaptureController, CaptureStats};
use crate::clock::Clock;
use crate::console::{Command, HELP_TEXT};
use crate::link::{Messenger, PeerRegistry, ProbeReport, ProbeRequest, ProbeTransmitter};
use crate::radio::{
    AccessPoint, Applied, MacAddr, RadioDriver, RadioError, RadioInfo, RadioManager, RadioParams,
    ScanMode,
};
use crate::sink::LineSink;
use log::{info, warn};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

pub struct Station<D: RadioDriver> {
    driver: Arc<D>,
    sink: Arc<dyn LineSink>,
    clock: Arc<dyn Clock>,
    radio: RadioManager<D>,
    peers: PeerRegistry<D>,
    probe: ProbeTransmitter<D>,
    capture: CaptureController,
    messenger: Messenger<D>,
}

impl<D: RadioDriver> Station<D> {
    pub fn new(driver: Arc<D>, sink: Arc<dyn LineSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            radio: RadioManager::new(driver.clone()),
            peers: PeerRegistry::new(driver.clone()),
            probe: ProbeTransmitter::new(driver.clone()),
            capture: CaptureController::new(sink.clone(), clock.clone()),
            messenger: Messenger::new(driver.clone(), sink.clone()),
            driver,
            sink,
            clock,
        }
    }

    pub fn radio(&self) -> &RadioManager<D> {
        &self.radio
    }

    pub fn peers(&self) -> &PeerRegistry<D> {
        &self.peers
    }

    pub fn capture(&self) -> &CaptureController {
        &self.capture
    }

    pub fn radio_init(&mut self, params: RadioParams, restart: bool) -> Result<Applied, RadioError> {
        if restart {
            self.radio.apply_forced(params)
        } else {
            self.radio.apply(params)
        }
    }

    pub fn radio_info(&self) -> RadioInfo {
        self.radio.info()
    }

    /// Set max TX power when `dbm` is given, then read it back.
    pub fn tx_power(&mut self, dbm: Option<i8>) -> Result<f32, RadioError> {
        if let Some(dbm) = dbm {
            self.radio.set_max_tx_power(dbm)?;
        }
        self.radio.max_tx_power()
    }

    pub fn scan(&mut self, mode: ScanMode) -> Result<Vec<AccessPoint>, RadioError> {
        self.radio.scan(mode)
    }

    /// Run a probe session, bringing the radio up with the measurement
    /// profile first if needed.
    pub async fn ping(&mut self, request: &ProbeRequest) -> Result<ProbeReport, RadioError> {
        self.radio.default_profile()?;
        let bandwidth = self.radio.bandwidth();
        self.probe.run(&mut self.peers, bandwidth, request).await
    }

    pub fn recv(
        &mut self,
        filter: Option<MacAddr>,
        timeout: Option<Duration>,
    ) -> Result<(), RadioError> {
        self.capture.arm(&mut self.radio, filter, timeout)
    }

    /// Stop capturing and return the final counters.
    pub fn recv_stop(&mut self) -> CaptureStats {
        self.capture.disarm();
        self.capture.stats()
    }

    pub fn msg_listen(&mut self) -> Result<(), RadioError> {
        self.messenger.listen(&mut self.radio, &mut self.peers)
    }

    pub fn msg_send(&mut self, dest: Option<MacAddr>, text: &str) -> Result<MacAddr, RadioError> {
        self.messenger
            .send(&mut self.radio, &mut self.peers, dest, text)
    }

    /// Reboot the device.
    ///
    /// On hardware this does not return. Otherwise every component is
    /// rebuilt as after power-on.
    pub async fn restart(&mut self) {
        warn!("Restarting");
        self.capture.shutdown().await;
        self.driver.reboot();
        *self = Self::new(self.driver.clone(), self.sink.clone(), self.clock.clone());
    }

    /// Stop background work.
    pub async fn shutdown(&mut self) {
        self.capture.disarm();
        self.capture.shutdown().await;
    }

    /// Run one console command and render its output.
    pub async fn execute(&mut self, command: Command) -> Result<String, RadioError> {
        match command {
            Command::RadioInit { params, restart } => {
                let applied = self.radio_init(params, restart)?;
                let mut out = format!("Radio applied: {}", applied.config);
                if applied.restarted {
                    out.push_str(" (restarted)");
                }
                Ok(out)
            }
            Command::RadioInfo => Ok(self.radio_info().to_string()),
            Command::TxPower { dbm } => {
                let current = self.tx_power(dbm)?;
                let mut out = String::new();
                if let Some(dbm) = dbm {
                    let _ = writeln!(out, "Set TX power to {} dBm", dbm);
                }
                let _ = write!(out, "Current Max TX Power: {:.2} dBm", current);
                Ok(out)
            }
            Command::Scan { mode } => {
                let aps = self.scan(mode)?;
                Ok(format_scan(&aps))
            }
            Command::Ping(request) => {
                let report = self.ping(&request).await?;
                Ok(report.to_string())
            }
            Command::Recv { filter, timeout } => {
                self.recv(filter, timeout)?;
                let mut out = match filter {
                    Some(mac) => format!("CSI Filter: {}", mac),
                    None => "CSI Filter: DISABLED (Receiving ALL packets)".to_string(),
                };
                if let Some(t) = timeout.filter(|t| !t.is_zero()) {
                    let _ = write!(out, "\nCSI Timeout: {} s", t.as_secs());
                }
                out.push_str("\nCSI RX Started...");
                Ok(out)
            }
            Command::RecvStop => {
                let stats = self.recv_stop();
                Ok(format!("CSI RX Stopped ({})", stats))
            }
            Command::MsgListen => {
                self.msg_listen()?;
                Ok("Message listening enabled (ESP-NOW)".to_string())
            }
            Command::MsgSend { dest, text } => {
                let dest = self.msg_send(dest, &text)?;
                info!("Message sent to {}", dest);
                Ok(format!("Sent: {}", text))
            }
            Command::Restart => {
                self.restart().await;
                Ok("Restarted".to_string())
            }
            Command::Help => Ok(HELP_TEXT.trim_matches('\n').to_string()),
        }
    }
}

/// Render scan results as a table.
pub fn format_scan(aps: &[AccessPoint]) -> String {
    if aps.is_empty() {
        return "No APs found.".to_string();
    }
    let mut out = format!("Found {} APs:", aps.len());
    for ap in aps {
        let _ = write!(
            out,
            "\n| {:<32} | {} | {:>3} | {:>4} |",
            ap.ssid, ap.bssid, ap.channel, ap.rssi
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureState, ParsedRecord};
    use crate::clock::MonotonicClock;
    use crate::radio::{DriverError, RadioPhase, DEFAULT_MAC};
    use crate::sim::{DriverCall, SimOp, SimRadio};
    use crate::sink::MemorySink;

    fn station(sim: SimRadio) -> (Arc<SimRadio>, Arc<MemorySink>, Station<SimRadio>) {
        let sim = Arc::new(sim);
        let sink = Arc::new(MemorySink::new());
        let station = Station::new(sim.clone(), sink.clone(), Arc::new(MonotonicClock::new()));
        (sim, sink, station)
    }

    async fn run(station: &mut Station<SimRadio>, line: &str) -> Result<String, RadioError> {
        let command = Command::parse(line).unwrap();
        station.execute(command).await
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ==================== Radio Tests ====================

    #[tokio::test]
    async fn test_radio_init_output() {
        let (sim, _sink, mut station) = station(SimRadio::new());
        let out = run(&mut station, "radio_init -c 6 -s above -b 20").await.unwrap();
        assert!(out.starts_with("Radio applied: "), "{}", out);
        assert!(!out.contains("restarted"));
        assert!(sim.is_started());
        assert_eq!(station.radio().phase(), RadioPhase::Running);

        let out = run(&mut station, "radio_init -r").await.unwrap();
        assert!(out.ends_with("(restarted)"), "{}", out);
    }

    #[tokio::test]
    async fn test_radio_init_rejects_bad_channel_before_hardware() {
        let (sim, _sink, mut station) = station(SimRadio::new());
        let err = run(&mut station, "radio_init -c 15").await.unwrap_err();
        assert!(matches!(err, RadioError::Config(_)));
        assert!(sim.calls().is_empty());
    }

    #[tokio::test]
    async fn test_radio_info_before_and_after_init() {
        let (_sim, _sink, mut station) = station(SimRadio::new());
        let out = run(&mut station, "radio_info").await.unwrap();
        assert!(out.starts_with("State: stack=0 wifi_init=0 wifi_start=0"), "{}", out);
        assert!(out.ends_with("Actual: ch=0"));

        run(&mut station, "radio_init -m 1a:00:00:00:00:05").await.unwrap();
        let out = run(&mut station, "radio_info").await.unwrap();
        assert!(out.starts_with("State: stack=1 wifi_init=1 wifi_start=1"), "{}", out);
        assert!(out.contains("mac=1a:00:00:00:00:05"));
        assert!(out.contains("Actual: ch=11"));
    }

    #[tokio::test]
    async fn test_tx_power_requires_running_radio() {
        let (_sim, _sink, mut station) = station(SimRadio::new());
        assert_eq!(
            run(&mut station, "tx_power").await.unwrap_err(),
            RadioError::NotReady
        );

        run(&mut station, "radio_init").await.unwrap();
        let out = run(&mut station, "tx_power -d 15").await.unwrap();
        assert_eq!(out, "Set TX power to 15 dBm\nCurrent Max TX Power: 15.00 dBm");
        let out = run(&mut station, "tx_power").await.unwrap();
        assert_eq!(out, "Current Max TX Power: 15.00 dBm");
        assert!(matches!(
            run(&mut station, "tx_power -d 30").await,
            Err(RadioError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_output() {
        let (sim, _sink, mut station) = station(SimRadio::new());
        assert_eq!(run(&mut station, "scan").await.unwrap(), "No APs found.");

        sim.add_access_point(AccessPoint {
            ssid: "lab".to_string(),
            bssid: MacAddr::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]),
            channel: 6,
            rssi: -48,
        });
        let out = run(&mut station, "scan -p").await.unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Found 1 APs:");
        assert_eq!(
            lines[1],
            format!("| {:<32} | 10:20:30:40:50:60 |   6 |  -48 |", "lab")
        );
    }

    // ==================== Probe Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_ping_brings_radio_up() {
        let (sim, _sink, mut station) = station(SimRadio::new());
        let out = run(&mut station, "ping -t 1 -r 10").await.unwrap();
        assert!(out.starts_with("Ping done: "), "{}", out);
        assert!(station.radio().is_ready());
        assert_eq!(sim.current_mac(), DEFAULT_MAC);
        assert!(sim.sent_count() >= 9 && sim.sent_count() <= 10);
    }

    // ==================== Capture Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_loopback_ping_produces_records() {
        let (_sim, sink, mut station) = station(SimRadio::with_loopback());
        let out = run(&mut station, "recv").await.unwrap();
        assert_eq!(
            out,
            "CSI Filter: DISABLED (Receiving ALL packets)\nCSI RX Started..."
        );

        run(&mut station, "ping -t 0").await.unwrap();
        settle().await;

        let records: Vec<ParsedRecord> = sink
            .lines()
            .iter()
            .filter_map(|line| line.parse().ok())
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 0);
        assert_eq!(records[0].mac, DEFAULT_MAC);
        assert_eq!(records[0].data.len(), 128);
    }

    #[tokio::test]
    async fn test_recv_with_filter_and_stop() {
        let (_sim, _sink, mut station) = station(SimRadio::new());
        let out = run(&mut station, "recv -m 1a:00:00:00:00:01 -t 5").await.unwrap();
        assert_eq!(
            out,
            "CSI Filter: 1a:00:00:00:00:01\nCSI Timeout: 5 s\nCSI RX Started..."
        );
        assert_eq!(station.capture().stats().state, CaptureState::Armed);

        let out = run(&mut station, "recv_stop").await.unwrap();
        assert!(out.starts_with("CSI RX Stopped (state=idle"), "{}", out);
        station.shutdown().await;
    }

    #[tokio::test]
    async fn test_recv_failure_reported() {
        let (sim, _sink, mut station) = station(SimRadio::new());
        sim.inject_failure(SimOp::EnableCsi, DriverError::NoMemory);
        assert!(run(&mut station, "recv").await.is_err());
        assert_eq!(station.capture().stats().state, CaptureState::Idle);
    }

    // ==================== Messaging Tests ====================

    #[tokio::test]
    async fn test_msg_send_and_listen_loopback() {
        let (sim, sink, mut station) = station(SimRadio::with_loopback());
        assert_eq!(
            run(&mut station, "msg_listen").await.unwrap(),
            "Message listening enabled (ESP-NOW)"
        );
        let out = run(&mut station, r#"msg_send "hello world""#).await.unwrap();
        assert_eq!(out, "Sent: hello world");
        assert_eq!(sim.sent(), vec![(MacAddr::BROADCAST, b"hello world".to_vec())]);
        assert_eq!(
            sink.lines(),
            vec![format!("[MSG from {}]: hello world", DEFAULT_MAC)]
        );
    }

    // ==================== System Tests ====================

    #[tokio::test]
    async fn test_restart_resets_station() {
        let (sim, _sink, mut station) = station(SimRadio::new());
        run(&mut station, "radio_init").await.unwrap();
        run(&mut station, "recv").await.unwrap();

        run(&mut station, "restart").await.unwrap();
        assert_eq!(sim.reboots(), 1);
        assert!(sim.calls().contains(&DriverCall::Reboot));
        assert_eq!(station.radio().phase(), RadioPhase::Uninitialized);
        assert!(!station.capture().is_hardware_enabled());
        assert!(station.peers().is_empty());

        run(&mut station, "radio_init").await.unwrap();
        assert!(sim.is_started());
    }

    #[tokio::test]
    async fn test_help_lists_commands() {
        let (_sim, _sink, mut station) = station(SimRadio::new());
        let out = run(&mut station, "help").await.unwrap();
        assert!(out.starts_with("Available commands:"));
    }
}
