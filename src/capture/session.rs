//! Shared capture session state.
//!
//! The session is read by the driver delivery context and written by the
//! control plane, so every field is an atomic. The address filter is packed
//! into one word: bit 48 marks it enabled, the low 48 bits hold the address.
//! A reader therefore sees either the old or the new filter, never a mix.

use crate::radio::MacAddr;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

const FILTER_ENABLED: u64 = 1 << 48;
const FILTER_ADDR_MASK: u64 = FILTER_ENABLED - 1;

/// Deadline value meaning "no deadline".
const NO_DEADLINE: u64 = 0;

/// Capture state as seen from the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Armed,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Armed => write!(f, "armed"),
        }
    }
}

/// Snapshot of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub state: CaptureState,
    /// Records emitted since process start.
    pub records: u32,
    /// Frames rejected by the address filter.
    pub filtered: u32,
    /// Malformed frames (empty sample buffer).
    pub dropped: u32,
    /// Frames lost because the processing queue was full.
    pub overflowed: u32,
}

impl fmt::Display for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} records={} filtered={} dropped={} overflowed={}",
            self.state, self.records, self.filtered, self.dropped, self.overflowed
        )
    }
}

/// Process-wide capture session.
#[derive(Debug, Default)]
pub struct CaptureSession {
    running: AtomicBool,
    filter: AtomicU64,
    deadline_us: AtomicU64,
    record_count: AtomicU32,
    filtered: AtomicU32,
    dropped: AtomicU32,
    overflowed: AtomicU32,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install filter and deadline, then mark the session running. Record
    /// indices are not reset.
    ///
    /// The three stores are not one atomic update. A reader on another
    /// thread can see the new filter with the previous deadline; the
    /// processing task and `arm` must share one current-thread runtime.
    pub fn arm(&self, filter: Option<MacAddr>, deadline_us: Option<u64>) {
        let packed = match filter {
            Some(mac) => FILTER_ENABLED | mac.to_u64(),
            None => 0,
        };
        self.filter.store(packed, Ordering::Release);
        self.deadline_us
            .store(deadline_us.unwrap_or(NO_DEADLINE), Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    /// Stop capturing. Returns whether the session was running.
    pub fn disarm(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    /// Stop because the deadline passed. Only the caller that actually
    /// flips the session to stopped gets `true`.
    pub fn expire(&self) -> bool {
        self.running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CaptureState {
        if self.is_running() {
            CaptureState::Armed
        } else {
            CaptureState::Idle
        }
    }

    pub fn filter(&self) -> Option<MacAddr> {
        let packed = self.filter.load(Ordering::Acquire);
        if packed & FILTER_ENABLED != 0 {
            Some(MacAddr::from_u64(packed & FILTER_ADDR_MASK))
        } else {
            None
        }
    }

    pub fn deadline_us(&self) -> Option<u64> {
        match self.deadline_us.load(Ordering::Acquire) {
            NO_DEADLINE => None,
            deadline => Some(deadline),
        }
    }

    /// Claim the next record index.
    pub(crate) fn next_index(&self) -> u32 {
        self.record_count.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            state: self.state(),
            records: self.record_count.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
        }
    }
}
