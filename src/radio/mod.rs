//! Radio configuration and lifecycle.
//!
//! - [`config`]: addresses, channel settings, defaults and validation
//! - [`driver`]: the [`RadioDriver`] capability surface
//! - [`lifecycle`]: [`RadioManager`], idempotent bring-up and reconfiguration

pub mod config;
pub mod driver;
mod error;
pub mod lifecycle;

pub use config::{
    Bandwidth, ConfigError, MacAddr, RadioConfig, RadioParams, SecondaryChannel, DEFAULT_MAC,
};
pub use driver::{
    AccessPoint, CsiConfig, CsiHandler, DriverError, PhyMode, PhyRate, RadioDriver, RateMode,
    RecvHandler, ScanMode,
};
pub use error::{BringUpStep, DriverOp, RadioError};
pub use lifecycle::{Applied, RadioInfo, RadioManager, RadioPhase};
