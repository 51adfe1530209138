//! Radio configuration data structures.
//!
//! This module contains platform-independent types for the radio
//! configuration that can be tested on the host machine: addresses,
//! channel/bandwidth settings and the partial parameter set accepted by
//! [`RadioManager::apply`](super::RadioManager::apply).
//!
//! # Example
//!
//! ```
//! use csi_radio_esp32::radio::{Bandwidth, MacAddr, RadioParams, SecondaryChannel};
//!
//! let mac: MacAddr = "1a:00:00:00:00:00".parse().unwrap();
//! let params = RadioParams::new()
//!     .channel(6)
//!     .secondary(SecondaryChannel::Above)
//!     .bandwidth(Bandwidth::Ht40)
//!     .mac(mac);
//! assert!(params.validate().is_ok());
//! ```

use std::fmt;
use std::str::FromStr;

/// Lowest 2.4 GHz channel number.
pub const MIN_CHANNEL: u8 = 1;

/// Highest 2.4 GHz channel number.
pub const MAX_CHANNEL: u8 = 14;

/// Channel used by the measurement profile.
pub const DEFAULT_CHANNEL: u8 = 11;

/// Secondary channel used by the measurement profile.
pub const DEFAULT_SECONDARY: SecondaryChannel = SecondaryChannel::Below;

/// Bandwidth used by the measurement profile.
pub const DEFAULT_BANDWIDTH: Bandwidth = Bandwidth::Ht40;

/// Station address reserved for the measurement profile.
pub const DEFAULT_MAC: MacAddr = MacAddr([0x1a, 0x00, 0x00, 0x00, 0x00, 0x00]);

/// Lowest accepted max TX power in dBm.
pub const MIN_TX_POWER_DBM: i8 = 2;

/// Highest accepted max TX power in dBm.
pub const MAX_TX_POWER_DBM: i8 = 20;

/// A 6-byte link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The broadcast address `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// Create an address from its octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the address octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Check if this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Pack the address into the low 48 bits of a `u64`.
    pub fn to_u64(&self) -> u64 {
        self.0
            .iter()
            .fold(0u64, |acc, &octet| (acc << 8) | octet as u64)
    }

    /// Unpack an address from the low 48 bits of a `u64`.
    pub fn from_u64(value: u64) -> Self {
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = (value >> (8 * (5 - i))) as u8;
        }
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddr {
    type Err = ConfigError;

    /// Parse six colon-separated hex octets. Each octet may be one or two
    /// digits, so `1a:0:0:0:0:0` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidMac(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || part.len() > 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

/// Position of the secondary 20 MHz channel for HT40 operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondaryChannel {
    /// No secondary channel (HT20).
    #[default]
    None,
    /// Secondary channel above the primary.
    Above,
    /// Secondary channel below the primary.
    Below,
}

impl SecondaryChannel {
    /// Convert to the console keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Above => "above",
            Self::Below => "below",
        }
    }
}

impl FromStr for SecondaryChannel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            _ => Err(ConfigError::InvalidSecondary(s.to_string())),
        }
    }
}

impl fmt::Display for SecondaryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bandwidth {
    /// 20 MHz (narrow).
    Ht20,
    /// 40 MHz (wide).
    Ht40,
}

impl Bandwidth {
    /// Map a width in MHz to a bandwidth. Anything from 40 up selects HT40,
    /// everything else HT20.
    pub fn from_mhz(mhz: u32) -> Self {
        if mhz >= 40 {
            Self::Ht40
        } else {
            Self::Ht20
        }
    }

    /// Width in MHz.
    pub fn mhz(&self) -> u32 {
        match self {
            Self::Ht20 => 20,
            Self::Ht40 => 40,
        }
    }

    /// Display label used in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ht20 => "HT20",
            Self::Ht40 => "HT40",
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Bandwidth {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_uppercase().as_str() {
            "HT20" => return Ok(Self::Ht20),
            "HT40" => return Ok(Self::Ht40),
            _ => {}
        }
        s.parse::<u32>()
            .map(Self::from_mhz)
            .map_err(|_| ConfigError::InvalidBandwidth(s.to_string()))
    }
}

/// Validate a primary channel number.
pub fn validate_channel(channel: u8) -> Result<u8, ConfigError> {
    if (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
        Ok(channel)
    } else {
        Err(ConfigError::InvalidChannel {
            channel,
            min: MIN_CHANNEL,
            max: MAX_CHANNEL,
        })
    }
}

/// Validate a max TX power setting in dBm.
pub fn validate_tx_power(dbm: i8) -> Result<i8, ConfigError> {
    if (MIN_TX_POWER_DBM..=MAX_TX_POWER_DBM).contains(&dbm) {
        Ok(dbm)
    } else {
        Err(ConfigError::TxPowerOutOfRange {
            dbm,
            min: MIN_TX_POWER_DBM,
            max: MAX_TX_POWER_DBM,
        })
    }
}

/// The complete stored radio configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfig {
    /// Primary channel (1..=14).
    pub channel: u8,
    /// Secondary channel offset.
    pub secondary: SecondaryChannel,
    /// Channel bandwidth.
    pub bandwidth: Bandwidth,
    /// Station address override, `None` keeps the factory address.
    pub mac_override: Option<MacAddr>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            secondary: DEFAULT_SECONDARY,
            bandwidth: DEFAULT_BANDWIDTH,
            mac_override: None,
        }
    }
}

impl RadioConfig {
    /// Overwrite the fields that `params` sets, keeping all others.
    pub fn merge(&mut self, params: &RadioParams) {
        if let Some(channel) = params.channel {
            self.channel = channel;
        }
        if let Some(secondary) = params.secondary {
            self.secondary = secondary;
        }
        if let Some(bandwidth) = params.bandwidth {
            self.bandwidth = bandwidth;
        }
        if let Some(mac) = params.mac {
            self.mac_override = Some(mac);
        }
    }
}

impl fmt::Display for RadioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch={} sec={} bw={}",
            self.channel, self.secondary, self.bandwidth
        )?;
        match self.mac_override {
            Some(mac) => write!(f, " mac={}", mac),
            None => write!(f, " mac=factory"),
        }
    }
}

/// A partial radio configuration. Unset fields keep their stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioParams {
    pub channel: Option<u8>,
    pub secondary: Option<SecondaryChannel>,
    pub bandwidth: Option<Bandwidth>,
    pub mac: Option<MacAddr>,
}

impl RadioParams {
    /// Create an empty parameter set (re-applies the stored configuration).
    pub fn new() -> Self {
        Self::default()
    }

    /// The measurement profile: channel 11, HT40 below, reserved address.
    pub fn measurement_profile() -> Self {
        Self {
            channel: Some(DEFAULT_CHANNEL),
            secondary: Some(DEFAULT_SECONDARY),
            bandwidth: Some(DEFAULT_BANDWIDTH),
            mac: Some(DEFAULT_MAC),
        }
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn secondary(mut self, secondary: SecondaryChannel) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn mac(mut self, mac: MacAddr) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Validate the fields that are set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(channel) = self.channel {
            validate_channel(channel)?;
        }
        Ok(())
    }
}

/// Errors in user-supplied radio parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Channel outside the 2.4 GHz band.
    InvalidChannel { channel: u8, min: u8, max: u8 },
    /// Unknown secondary channel keyword.
    InvalidSecondary(String),
    /// Unparseable bandwidth.
    InvalidBandwidth(String),
    /// Unparseable MAC address.
    InvalidMac(String),
    /// TX power outside the supported range.
    TxPowerOutOfRange { dbm: i8, min: i8, max: i8 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChannel { channel, min, max } => {
                write!(f, "invalid channel {} (expected {}..={})", channel, min, max)
            }
            Self::InvalidSecondary(s) => {
                write!(f, "invalid secondary channel '{}' (none|above|below)", s)
            }
            Self::InvalidBandwidth(s) => write!(f, "invalid bandwidth '{}' (20|40)", s),
            Self::InvalidMac(s) => write!(f, "invalid MAC address '{}'", s),
            Self::TxPowerOutOfRange { dbm, min, max } => {
                write!(f, "TX power {} dBm out of range ({}..={})", dbm, min, max)
            }
        }
    }
}

impl std::error::Error for ConfigError {}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use csi_radio_esp32_macros::tap_test;

    #[tap_test]
    fn mac_parse_display_on_device() {
        let mac: MacAddr = "1a:00:00:00:00:00".parse().unwrap();
        assert_eq!(mac, DEFAULT_MAC);
        assert_eq!(mac.to_string(), "1a:00:00:00:00:00");
    }

    #[tap_test]
    fn channel_bounds_on_device() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        validate_channel(DEFAULT_CHANNEL)?;
        assert!(validate_channel(MAX_CHANNEL + 1).is_err());
        Ok(())
    }
}
