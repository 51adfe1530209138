//! CSI frame views.

use crate::radio::MacAddr;

/// Largest CSI sample buffer the driver delivers (HT40 with all LTFs).
pub const MAX_CSI_LEN: usize = 612;

/// Borrowed view of one CSI notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsiFrame<'a> {
    /// Transmitter address.
    pub mac: MacAddr,
    pub rssi: i8,
    pub rate: u8,
    pub sig_mode: u8,
    pub mcs: u8,
    /// Channel bandwidth code (0 = 20 MHz, 1 = 40 MHz).
    pub cwb: u8,
    /// Raw samples. Empty for malformed frames.
    pub data: &'a [i8],
}

impl<'a> CsiFrame<'a> {
    /// A frame with zeroed receive metadata.
    pub fn new(mac: MacAddr, data: &'a [i8]) -> Self {
        Self {
            mac,
            rssi: 0,
            rate: 0,
            sig_mode: 0,
            mcs: 0,
            cwb: 0,
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Owned fixed-capacity copy of a [`CsiFrame`], stamped with its arrival
/// time. This is what crosses from the driver callback to the capture task.
#[derive(Clone)]
pub struct CsiFrameBuf {
    mac: MacAddr,
    rssi: i8,
    rate: u8,
    sig_mode: u8,
    mcs: u8,
    cwb: u8,
    len: u16,
    data: [i8; MAX_CSI_LEN],
    received_us: u64,
}

impl CsiFrameBuf {
    /// Copy `frame`. A buffer larger than [`MAX_CSI_LEN`] is stored empty so
    /// the pipeline drops it as malformed.
    pub fn copy_from(frame: &CsiFrame<'_>, received_us: u64) -> Self {
        let mut data = [0i8; MAX_CSI_LEN];
        let len = if frame.data.len() <= MAX_CSI_LEN {
            data[..frame.data.len()].copy_from_slice(frame.data);
            frame.data.len()
        } else {
            0
        };

        Self {
            mac: frame.mac,
            rssi: frame.rssi,
            rate: frame.rate,
            sig_mode: frame.sig_mode,
            mcs: frame.mcs,
            cwb: frame.cwb,
            len: len as u16,
            data,
            received_us,
        }
    }

    pub fn as_frame(&self) -> CsiFrame<'_> {
        CsiFrame {
            mac: self.mac,
            rssi: self.rssi,
            rate: self.rate,
            sig_mode: self.sig_mode,
            mcs: self.mcs,
            cwb: self.cwb,
            data: &self.data[..self.len as usize],
        }
    }

    /// Monotonic arrival time in microseconds.
    pub fn received_us(&self) -> u64 {
        self.received_us
    }
}

impl std::fmt::Debug for CsiFrameBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsiFrameBuf")
            .field("mac", &self.mac)
            .field("len", &self.len)
            .field("received_us", &self.received_us)
            .finish()
    }
}
