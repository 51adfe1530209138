//! ESP-NOW link layer: peers, probe traffic and text messages.

mod message;
mod peers;
mod probe;

pub use message::{format_incoming_message, Messenger, MAX_DISPLAY_LEN};
pub use peers::{PeerEntry, PeerRate, PeerRegistry};
pub use probe::{
    ProbeReport, ProbeRequest, ProbeTransmitter, DEFAULT_PROBE_DURATION, DEFAULT_PROBE_RATE_HZ,
    MIN_PROBE_INTERVAL, SEND_ERROR_LOG_EVERY,
};
