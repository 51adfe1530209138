//! Radio error taxonomy.

use super::config::ConfigError;
use super::driver::DriverError;
use std::fmt;

/// One-time bring-up step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpStep {
    Storage,
    NetworkStack,
    Wifi,
    Start,
    Link,
    Capture,
}

impl fmt::Display for BringUpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Storage => "storage",
            Self::NetworkStack => "network stack",
            Self::Wifi => "wifi driver",
            Self::Start => "radio start",
            Self::Link => "link layer",
            Self::Capture => "csi capture",
        };
        write!(f, "{}", name)
    }
}

/// Steady-state driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOp {
    Stop,
    SetMac,
    PowerSave,
    SetBandwidth,
    SetChannel,
    TxPower,
    Scan,
    AddPeer,
    Send,
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stop => "stop",
            Self::SetMac => "set mac",
            Self::PowerSave => "power save",
            Self::SetBandwidth => "set bandwidth",
            Self::SetChannel => "set channel",
            Self::TxPower => "tx power",
            Self::Scan => "scan",
            Self::AddPeer => "add peer",
            Self::Send => "send",
        };
        write!(f, "{}", name)
    }
}

/// Radio errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Invalid parameter, rejected before any hardware call.
    Config(ConfigError),
    /// A one-time bring-up step failed.
    BringUp {
        step: BringUpStep,
        source: DriverError,
    },
    /// A configuration or link call failed after bring-up.
    Driver { op: DriverOp, source: DriverError },
    /// The operation needs a running radio.
    NotReady,
}

impl RadioError {
    pub(crate) fn bring_up(step: BringUpStep) -> impl FnOnce(DriverError) -> Self {
        move |source| Self::BringUp { step, source }
    }

    pub(crate) fn driver(op: DriverOp) -> impl FnOnce(DriverError) -> Self {
        move |source| Self::Driver { op, source }
    }
}

impl From<ConfigError> for RadioError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {}", e),
            Self::BringUp { step, source } => {
                write!(f, "bring-up failed at {}: {}", step, source)
            }
            Self::Driver { op, source } => write!(f, "{} failed: {}", op, source),
            Self::NotReady => write!(f, "radio not initialized"),
        }
    }
}

impl std::error::Error for RadioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::BringUp { source, .. } | Self::Driver { source, .. } => Some(source),
            Self::NotReady => None,
        }
    }
}
