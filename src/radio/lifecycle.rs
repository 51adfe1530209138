//! Radio lifecycle manager.
//!
//! [`RadioManager`] owns the stored configuration and the bring-up phase of
//! one radio. Every [`apply`](RadioManager::apply) re-derives the full
//! hardware state from the stored configuration, so repeated or overlapping
//! calls converge on the same result.

use super::config::{
    validate_tx_power, Bandwidth, MacAddr, RadioConfig, RadioParams, SecondaryChannel,
};
use super::driver::{tolerate_already, AccessPoint, DriverError, RadioDriver, ScanMode};
use super::error::{BringUpStep, DriverOp, RadioError};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;

/// Bring-up progress. Each phase implies all earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RadioPhase {
    /// Nothing initialized yet.
    #[default]
    Uninitialized,
    /// Storage, network interface and event loop are up.
    StackReady,
    /// Wi-Fi driver initialized in station mode.
    DriverReady,
    /// Radio started and configured.
    Running,
}

impl RadioPhase {
    pub fn stack_ready(&self) -> bool {
        *self >= Self::StackReady
    }

    pub fn driver_ready(&self) -> bool {
        *self >= Self::DriverReady
    }

    pub fn running(&self) -> bool {
        *self == Self::Running
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// The configuration now in effect.
    pub config: RadioConfig,
    /// Whether the radio went through a stop/start cycle.
    pub restarted: bool,
}

/// Snapshot reported by `radio_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioInfo {
    pub phase: RadioPhase,
    pub config: RadioConfig,
    /// Effective station address, if known.
    pub mac: Option<MacAddr>,
    /// Channel reported by the driver while running.
    pub actual: Option<(u8, SecondaryChannel)>,
}

impl fmt::Display for RadioInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |b: bool| if b { 1 } else { 0 };
        writeln!(
            f,
            "State: stack={} wifi_init={} wifi_start={}",
            flag(self.phase.stack_ready()),
            flag(self.phase.driver_ready()),
            flag(self.phase.running())
        )?;
        write!(
            f,
            "Config: ch={} sec={} bw={} mac=",
            self.config.channel, self.config.secondary, self.config.bandwidth
        )?;
        match self.mac {
            Some(mac) => writeln!(f, "{}", mac)?,
            None => writeln!(f, "unknown")?,
        }
        match self.actual {
            Some((channel, secondary)) => write!(f, "Actual: ch={} sec={}", channel, secondary),
            None => write!(f, "Actual: ch=0"),
        }
    }
}

/// Owns the radio configuration and drives the hardware towards it.
pub struct RadioManager<D: RadioDriver> {
    driver: Arc<D>,
    config: RadioConfig,
    phase: RadioPhase,
}

impl<D: RadioDriver> RadioManager<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            config: RadioConfig::default(),
            phase: RadioPhase::Uninitialized,
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn phase(&self) -> RadioPhase {
        self.phase
    }

    /// Current stored bandwidth.
    pub fn bandwidth(&self) -> Bandwidth {
        self.config.bandwidth
    }

    /// Whether the radio is started and configured.
    pub fn is_ready(&self) -> bool {
        self.phase.running()
    }

    /// Merge `params` into the stored configuration and apply all of it.
    ///
    /// Brings the radio up on first use. Changing the station address while
    /// running stops and restarts the radio when the driver refuses a live
    /// change.
    pub fn apply(&mut self, params: RadioParams) -> Result<Applied, RadioError> {
        params.validate()?;

        let mut desired = self.config;
        desired.merge(&params);

        self.bring_up()?;
        let restarted = self.apply_address(desired.mac_override)?;
        self.start()?;

        self.driver
            .disable_power_save()
            .map_err(RadioError::driver(DriverOp::PowerSave))?;
        self.driver
            .set_bandwidth(desired.bandwidth)
            .map_err(RadioError::driver(DriverOp::SetBandwidth))?;
        self.driver
            .set_channel(desired.channel, desired.secondary)
            .map_err(RadioError::driver(DriverOp::SetChannel))?;

        self.config = desired;
        info!("Radio applied: {}", self.config);

        Ok(Applied {
            config: self.config,
            restarted,
        })
    }

    /// Stop a running radio, then [`apply`](Self::apply).
    pub fn apply_forced(&mut self, params: RadioParams) -> Result<Applied, RadioError> {
        params.validate()?;

        let was_running = self.phase.running();
        if was_running {
            info!("Stopping radio (forced restart)");
            self.driver
                .stop()
                .map_err(RadioError::driver(DriverOp::Stop))?;
            self.phase = RadioPhase::DriverReady;
        }

        let mut applied = self.apply(params)?;
        applied.restarted |= was_running;
        Ok(applied)
    }

    /// Apply the measurement profile unless the radio is already running.
    pub fn default_profile(&mut self) -> Result<Applied, RadioError> {
        if self.is_ready() {
            return Ok(Applied {
                config: self.config,
                restarted: false,
            });
        }
        self.apply(RadioParams::measurement_profile())
    }

    pub fn info(&self) -> RadioInfo {
        let mac = match self.config.mac_override {
            Some(mac) => Some(mac),
            None if self.phase.driver_ready() => self.driver.mac().ok(),
            None => None,
        };
        let actual = if self.phase.running() {
            self.driver.channel().ok()
        } else {
            None
        };

        RadioInfo {
            phase: self.phase,
            config: self.config,
            mac,
            actual,
        }
    }

    /// Set the max TX power in dBm.
    pub fn set_max_tx_power(&mut self, dbm: i8) -> Result<(), RadioError> {
        if !self.is_ready() {
            return Err(RadioError::NotReady);
        }
        let dbm = validate_tx_power(dbm)?;
        self.driver
            .set_max_tx_power(dbm * 4)
            .map_err(RadioError::driver(DriverOp::TxPower))?;
        info!("TX power set to {} dBm", dbm);
        Ok(())
    }

    /// Max TX power in dBm.
    pub fn max_tx_power(&self) -> Result<f32, RadioError> {
        if !self.is_ready() {
            return Err(RadioError::NotReady);
        }
        let quarter_dbm = self
            .driver
            .max_tx_power()
            .map_err(RadioError::driver(DriverOp::TxPower))?;
        Ok(quarter_dbm as f32 * 0.25)
    }

    /// Scan for access points, bringing the radio up first if needed.
    pub fn scan(&mut self, mode: ScanMode) -> Result<Vec<AccessPoint>, RadioError> {
        self.default_profile()?;
        debug!("Scanning ({:?})", mode);
        self.driver
            .scan(mode)
            .map_err(RadioError::driver(DriverOp::Scan))
    }

    fn bring_up(&mut self) -> Result<(), RadioError> {
        if self.phase < RadioPhase::StackReady {
            tolerate_already(self.driver.init_storage())
                .map_err(RadioError::bring_up(BringUpStep::Storage))?;
            tolerate_already(self.driver.init_network_stack())
                .map_err(RadioError::bring_up(BringUpStep::NetworkStack))?;
            self.phase = RadioPhase::StackReady;
            debug!("Network stack ready");
        }
        if self.phase < RadioPhase::DriverReady {
            tolerate_already(self.driver.init_wifi())
                .map_err(RadioError::bring_up(BringUpStep::Wifi))?;
            self.phase = RadioPhase::DriverReady;
            debug!("Wi-Fi driver ready");
        }
        Ok(())
    }

    /// Program the address override. Returns whether the radio restarted.
    fn apply_address(&mut self, mac: Option<MacAddr>) -> Result<bool, RadioError> {
        let Some(mac) = mac else {
            return Ok(false);
        };

        if self.phase.running() && self.driver.mac().ok() == Some(mac) {
            return Ok(false);
        }

        match self.driver.set_mac(mac) {
            Ok(()) => Ok(false),
            Err(DriverError::InterfaceBusy) if self.phase.running() => {
                warn!("Changing MAC requires restart, stopping radio");
                self.driver
                    .stop()
                    .map_err(RadioError::driver(DriverOp::Stop))?;
                self.phase = RadioPhase::DriverReady;
                self.driver
                    .set_mac(mac)
                    .map_err(RadioError::driver(DriverOp::SetMac))?;
                Ok(true)
            }
            Err(e) => Err(RadioError::Driver {
                op: DriverOp::SetMac,
                source: e,
            }),
        }
    }

    fn start(&mut self) -> Result<(), RadioError> {
        if self.phase < RadioPhase::Running {
            tolerate_already(self.driver.start())
                .map_err(RadioError::bring_up(BringUpStep::Start))?;
            self.phase = RadioPhase::Running;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::config::DEFAULT_MAC;
    use crate::sim::{DriverCall, SimOp, SimRadio};

    fn manager() -> (Arc<SimRadio>, RadioManager<SimRadio>) {
        let sim = Arc::new(SimRadio::new());
        let manager = RadioManager::new(sim.clone());
        (sim, manager)
    }

    // ==================== Bring-up Tests ====================

    #[test]
    fn test_first_apply_brings_radio_up() {
        let (sim, mut radio) = manager();
        assert_eq!(radio.phase(), RadioPhase::Uninitialized);

        let applied = radio.apply(RadioParams::new()).unwrap();
        assert!(!applied.restarted);
        assert!(radio.is_ready());
        assert_eq!(
            sim.calls(),
            vec![
                DriverCall::InitStorage,
                DriverCall::InitNetworkStack,
                DriverCall::InitWifi,
                DriverCall::Start,
                DriverCall::DisablePowerSave,
                DriverCall::SetBandwidth(Bandwidth::Ht40),
                DriverCall::SetChannel(11, SecondaryChannel::Below),
            ]
        );
    }

    #[test]
    fn test_bring_up_failure_propagates() {
        let (sim, mut radio) = manager();
        sim.inject_failure(SimOp::InitWifi, DriverError::NoMemory);

        let err = radio.apply(RadioParams::new()).unwrap_err();
        assert_eq!(
            err,
            RadioError::BringUp {
                step: BringUpStep::Wifi,
                source: DriverError::NoMemory
            }
        );
        assert_eq!(radio.phase(), RadioPhase::StackReady);
        assert!(!sim.is_started());

        // Retry resumes where bring-up stopped.
        sim.clear_failure(SimOp::InitWifi);
        sim.clear_calls();
        radio.apply(RadioParams::new()).unwrap();
        assert_eq!(sim.calls()[0], DriverCall::InitWifi);
    }

    #[test]
    fn test_already_initialized_is_success() {
        let (sim, mut radio) = manager();
        sim.inject_failure(SimOp::InitNetworkStack, DriverError::InvalidState);
        sim.inject_failure(SimOp::Start, DriverError::AlreadyInitialized);
        assert!(radio.apply(RadioParams::new()).is_ok());
        assert!(radio.is_ready());
    }

    // ==================== Apply Tests ====================

    #[test]
    fn test_apply_is_idempotent() {
        let (sim, mut radio) = manager();
        let params = RadioParams::new().channel(6).mac(DEFAULT_MAC);

        let first = radio.apply(params).unwrap();
        let second = radio.apply(params).unwrap();

        assert_eq!(first.config, second.config);
        assert!(!second.restarted);
        assert_eq!(sim.current_channel(), (6, SecondaryChannel::Below));
        assert_eq!(sim.current_mac(), DEFAULT_MAC);
        assert!(sim.is_started());
    }

    #[test]
    fn test_partial_update_reapplies_full_config() {
        let (sim, mut radio) = manager();
        radio
            .apply(RadioParams::new().bandwidth(Bandwidth::Ht20))
            .unwrap();

        sim.clear_calls();
        radio.apply(RadioParams::new().channel(3)).unwrap();

        assert_eq!(
            sim.calls(),
            vec![
                DriverCall::DisablePowerSave,
                DriverCall::SetBandwidth(Bandwidth::Ht20),
                DriverCall::SetChannel(3, SecondaryChannel::Below),
            ]
        );
        assert_eq!(radio.bandwidth(), Bandwidth::Ht20);
    }

    #[test]
    fn test_invalid_channel_touches_no_hardware() {
        let (sim, mut radio) = manager();
        let err = radio.apply(RadioParams::new().channel(15)).unwrap_err();
        assert!(matches!(err, RadioError::Config(_)));
        assert!(sim.calls().is_empty());
        assert_eq!(radio.phase(), RadioPhase::Uninitialized);

        let err = radio.apply_forced(RadioParams::new().channel(0)).unwrap_err();
        assert!(matches!(err, RadioError::Config(_)));
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_address_change_while_running_restarts() {
        let (sim, mut radio) = manager();
        radio.apply(RadioParams::new()).unwrap();

        let new_mac = MacAddr::new([0x1a, 0, 0, 0, 0, 0x02]);
        sim.clear_calls();
        let applied = radio.apply(RadioParams::new().mac(new_mac)).unwrap();

        assert!(applied.restarted);
        assert_eq!(
            &sim.calls()[..4],
            &[
                DriverCall::SetMac(new_mac),
                DriverCall::Stop,
                DriverCall::SetMac(new_mac),
                DriverCall::Start,
            ]
        );
        assert!(sim.is_started());
        assert_eq!(sim.current_mac(), new_mac);
        assert_eq!(radio.config().mac_override, Some(new_mac));
    }

    #[test]
    fn test_address_set_before_start_needs_no_restart() {
        let (sim, mut radio) = manager();
        let applied = radio.apply(RadioParams::new().mac(DEFAULT_MAC)).unwrap();
        assert!(!applied.restarted);
        assert!(!sim.calls().contains(&DriverCall::Stop));
    }

    #[test]
    fn test_forced_apply_stops_first() {
        let (sim, mut radio) = manager();
        radio.apply(RadioParams::new()).unwrap();

        sim.clear_calls();
        let applied = radio.apply_forced(RadioParams::new()).unwrap();
        assert!(applied.restarted);
        assert_eq!(&sim.calls()[..2], &[DriverCall::Stop, DriverCall::Start]);
        assert!(radio.is_ready());
    }

    #[test]
    fn test_config_failure_keeps_previous_config() {
        let (sim, mut radio) = manager();
        radio.apply(RadioParams::new()).unwrap();

        sim.inject_failure(SimOp::SetChannel, DriverError::Esp(0x3001));
        let err = radio.apply(RadioParams::new().channel(1)).unwrap_err();
        assert!(matches!(
            err,
            RadioError::Driver {
                op: DriverOp::SetChannel,
                ..
            }
        ));
        assert_eq!(radio.config().channel, 11);
    }

    // ==================== Default Profile Tests ====================

    #[test]
    fn test_default_profile_applies_measurement_settings() {
        let (sim, mut radio) = manager();
        let applied = radio.default_profile().unwrap();
        assert_eq!(applied.config.channel, 11);
        assert_eq!(applied.config.bandwidth, Bandwidth::Ht40);
        assert_eq!(sim.current_mac(), DEFAULT_MAC);
    }

    #[test]
    fn test_default_profile_is_noop_when_ready() {
        let (sim, mut radio) = manager();
        radio.apply(RadioParams::new().channel(1)).unwrap();

        sim.clear_calls();
        let applied = radio.default_profile().unwrap();
        assert_eq!(applied.config.channel, 1);
        assert!(sim.calls().is_empty());
    }

    // ==================== Info / TX Power / Scan Tests ====================

    #[test]
    fn test_info_reports_phase_and_actual_channel() {
        let (_sim, mut radio) = manager();
        let info = radio.info();
        assert_eq!(info.phase, RadioPhase::Uninitialized);
        assert_eq!(info.actual, None);
        assert!(info.to_string().starts_with("State: stack=0 wifi_init=0 wifi_start=0"));

        radio.default_profile().unwrap();
        let info = radio.info();
        assert_eq!(info.mac, Some(DEFAULT_MAC));
        assert_eq!(info.actual, Some((11, SecondaryChannel::Below)));
        let text = info.to_string();
        assert!(text.contains("State: stack=1 wifi_init=1 wifi_start=1"));
        assert!(text.contains("Config: ch=11 sec=below bw=HT40 mac=1a:00:00:00:00:00"));
        assert!(text.contains("Actual: ch=11"));
    }

    #[test]
    fn test_tx_power_requires_running_radio() {
        let (sim, mut radio) = manager();
        assert_eq!(radio.set_max_tx_power(10), Err(RadioError::NotReady));
        assert_eq!(radio.max_tx_power(), Err(RadioError::NotReady));

        radio.default_profile().unwrap();
        radio.set_max_tx_power(10).unwrap();
        assert_eq!(sim.calls().last(), Some(&DriverCall::SetMaxTxPower(40)));
        assert_eq!(radio.max_tx_power().unwrap(), 10.0);

        assert!(matches!(
            radio.set_max_tx_power(30),
            Err(RadioError::Config(_))
        ));
    }

    #[test]
    fn test_scan_brings_radio_up() {
        let (sim, mut radio) = manager();
        sim.add_access_point(AccessPoint {
            ssid: "lab".to_string(),
            bssid: MacAddr::new([2, 0, 0, 0, 0, 1]),
            channel: 6,
            rssi: -40,
        });

        let aps = radio.scan(ScanMode::Passive).unwrap();
        assert!(radio.is_ready());
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].ssid, "lab");
        assert_eq!(sim.calls().last(), Some(&DriverCall::Scan(ScanMode::Passive)));
    }
}
