//! Radio driver capability surface.
//!
//! [`RadioDriver`] is everything the lifecycle manager, the peer registry,
//! the probe transmitter and the capture pipeline need from the radio. The
//! ESP-IDF implementation lives in `crate::esp`; host builds and tests use
//! `crate::sim::SimRadio`.
//!
//! All methods take `&self`: the underlying driver calls are thread-safe and
//! the capture handler is invoked from the driver's own task while the
//! control plane keeps issuing configuration calls.

use super::config::{Bandwidth, MacAddr, SecondaryChannel};
use crate::capture::CsiFrame;
use std::fmt;

/// Handler invoked by the driver for every received CSI frame.
pub type CsiHandler = Box<dyn Fn(&CsiFrame<'_>) + Send + Sync + 'static>;

/// Handler invoked by the driver for every received link-layer payload.
pub type RecvHandler = Box<dyn Fn(&MacAddr, &[u8]) + Send + Sync + 'static>;

/// Physical-layer mode used for rate pinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyMode {
    Ht20,
    Ht40,
}

/// Fixed transmission rate used for rate pinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyRate {
    /// MCS0, long guard interval.
    Mcs0Lgi,
    /// MCS0, short guard interval.
    Mcs0Sgi,
}

/// A pinned modulation/rate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateMode {
    pub phy: PhyMode,
    pub rate: PhyRate,
}

impl RateMode {
    /// The robust low-rate mode for a bandwidth: HT20 MCS0 for narrow,
    /// HT40 MCS0 short-GI for wide.
    pub fn for_bandwidth(bandwidth: Bandwidth) -> Self {
        match bandwidth {
            Bandwidth::Ht20 => Self {
                phy: PhyMode::Ht20,
                rate: PhyRate::Mcs0Lgi,
            },
            Bandwidth::Ht40 => Self {
                phy: PhyMode::Ht40,
                rate: PhyRate::Mcs0Sgi,
            },
        }
    }
}

impl fmt::Display for RateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phy = match self.phy {
            PhyMode::Ht20 => "HT20",
            PhyMode::Ht40 => "HT40",
        };
        let rate = match self.rate {
            PhyRate::Mcs0Lgi => "MCS0",
            PhyRate::Mcs0Sgi => "MCS0 SGI",
        };
        write!(f, "{} {}", phy, rate)
    }
}

/// Scan strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Active,
    Passive,
}

/// A scanned access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: MacAddr,
    pub channel: u8,
    pub rssi: i8,
}

/// Hardware CSI capture options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsiConfig {
    /// Legacy long training field.
    pub lltf: bool,
    /// HT long training field.
    pub htltf: bool,
    /// STBC HT-LTF2.
    pub stbc_htltf2: bool,
    /// Merge LLTF and HT-LTF data.
    pub ltf_merge: bool,
    /// Smooth adjacent subcarriers.
    pub channel_filter: bool,
    /// Manual scaling (`shift` is only used when set).
    pub manual_scale: bool,
    pub shift: u8,
}

impl Default for CsiConfig {
    fn default() -> Self {
        Self {
            lltf: true,
            htltf: false,
            stbc_htltf2: false,
            ltf_merge: true,
            channel_filter: true,
            manual_scale: false,
            shift: 0,
        }
    }
}

/// Raw driver outcome for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The subsystem is already initialized.
    AlreadyInitialized,
    /// Call not valid in the current driver state.
    InvalidState,
    /// The interface must be stopped for this change.
    InterfaceBusy,
    /// Not supported by this driver version.
    NotSupported,
    /// Out of memory.
    NoMemory,
    /// Any other ESP-IDF error code.
    Esp(i32),
}

impl DriverError {
    /// Whether the error means the requested state already holds.
    pub fn is_already_done(&self) -> bool {
        matches!(self, Self::AlreadyInitialized | Self::InvalidState)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "already initialized"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::InterfaceBusy => write!(f, "interface busy"),
            Self::NotSupported => write!(f, "not supported"),
            Self::NoMemory => write!(f, "out of memory"),
            Self::Esp(code) => write!(f, "ESP error {:#x}", code),
        }
    }
}

impl std::error::Error for DriverError {}

/// Treat "already initialized"/"invalid state" as success.
pub fn tolerate_already(result: Result<(), DriverError>) -> Result<(), DriverError> {
    match result {
        Err(e) if e.is_already_done() => Ok(()),
        other => other,
    }
}

/// The radio capability surface.
pub trait RadioDriver: Send + Sync + 'static {
    // ---- bring-up ----

    /// Initialize persistent key-value storage.
    fn init_storage(&self) -> Result<(), DriverError>;

    /// Initialize network-interface primitives and the default event loop.
    fn init_network_stack(&self) -> Result<(), DriverError>;

    /// Initialize the Wi-Fi driver in station mode with RAM storage.
    fn init_wifi(&self) -> Result<(), DriverError>;

    /// Power the radio on.
    fn start(&self) -> Result<(), DriverError>;

    /// Power the radio off.
    fn stop(&self) -> Result<(), DriverError>;

    // ---- configuration ----

    fn set_mac(&self, mac: MacAddr) -> Result<(), DriverError>;
    fn mac(&self) -> Result<MacAddr, DriverError>;
    fn disable_power_save(&self) -> Result<(), DriverError>;
    fn set_bandwidth(&self, bandwidth: Bandwidth) -> Result<(), DriverError>;
    fn set_channel(&self, channel: u8, secondary: SecondaryChannel) -> Result<(), DriverError>;
    fn channel(&self) -> Result<(u8, SecondaryChannel), DriverError>;

    /// Set max TX power in quarter-dBm units.
    fn set_max_tx_power(&self, quarter_dbm: i8) -> Result<(), DriverError>;

    /// Max TX power in quarter-dBm units.
    fn max_tx_power(&self) -> Result<i8, DriverError>;

    /// Blocking scan for nearby access points.
    fn scan(&self, mode: ScanMode) -> Result<Vec<AccessPoint>, DriverError>;

    // ---- link layer (ESP-NOW) ----

    fn link_init(&self) -> Result<(), DriverError>;
    fn peer_exists(&self, addr: &MacAddr) -> bool;

    /// Register an unencrypted peer. Channel 0 means the current channel.
    fn add_peer(&self, addr: &MacAddr, channel: u8) -> Result<(), DriverError>;
    fn set_peer_rate(&self, addr: &MacAddr, mode: RateMode) -> Result<(), DriverError>;
    fn send(&self, addr: &MacAddr, data: &[u8]) -> Result<(), DriverError>;
    fn set_recv_handler(&self, handler: RecvHandler) -> Result<(), DriverError>;

    // ---- CSI capture ----

    fn set_promiscuous(&self, enabled: bool) -> Result<(), DriverError>;
    fn set_csi_config(&self, config: &CsiConfig) -> Result<(), DriverError>;
    fn set_csi_handler(&self, handler: CsiHandler) -> Result<(), DriverError>;
    fn enable_csi(&self, enabled: bool) -> Result<(), DriverError>;

    // ---- system ----

    /// Reboot the device.
    fn reboot(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_mode_follows_bandwidth() {
        let narrow = RateMode::for_bandwidth(Bandwidth::Ht20);
        assert_eq!(narrow.phy, PhyMode::Ht20);
        assert_eq!(narrow.rate, PhyRate::Mcs0Lgi);

        let wide = RateMode::for_bandwidth(Bandwidth::Ht40);
        assert_eq!(wide.phy, PhyMode::Ht40);
        assert_eq!(wide.rate, PhyRate::Mcs0Sgi);
        assert_eq!(wide.to_string(), "HT40 MCS0 SGI");
    }

    #[test]
    fn test_tolerate_already() {
        assert!(tolerate_already(Err(DriverError::AlreadyInitialized)).is_ok());
        assert!(tolerate_already(Err(DriverError::InvalidState)).is_ok());
        assert_eq!(
            tolerate_already(Err(DriverError::NoMemory)),
            Err(DriverError::NoMemory)
        );
    }

    #[test]
    fn test_default_csi_config() {
        let config = CsiConfig::default();
        assert!(config.lltf);
        assert!(!config.htltf);
        assert!(config.ltf_merge);
        assert!(config.channel_filter);
        assert!(!config.manual_scale);
    }
}
