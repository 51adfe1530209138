//! CSI radio firmware library.
//!
//! Radio bring-up, ESP-NOW probe traffic and channel state information
//! capture for ESP32, behind a console. Everything except `esp` is
//! platform-independent and tested on the host against `sim::SimRadio`.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as csi_radio_esp32;

pub mod capture;
pub mod clock;
pub mod console;
pub mod diag;
#[cfg(feature = "esp32")]
pub mod esp;
pub mod link;
pub mod radio;
#[cfg(any(test, not(feature = "esp32")))]
pub mod sim;
pub mod sink;
pub mod station;
#[cfg(feature = "tap-tests")]
pub mod testing;

// Re-export commonly used items
pub use capture::{CaptureController, CsiFrame, CsiRecord};
pub use console::{Command, ConsoleError};
pub use link::{PeerRegistry, ProbeRequest, ProbeTransmitter};
pub use radio::{MacAddr, RadioDriver, RadioError, RadioManager, RadioParams};
pub use station::Station;

#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;
