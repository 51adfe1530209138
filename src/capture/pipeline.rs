//! Per-frame capture decision.

use super::frame::CsiFrame;
use super::record::CsiRecord;
use super::session::CaptureSession;
use crate::sink::LineSink;
use log::info;
use std::sync::Arc;

/// What happened to one delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Session not running.
    Inactive,
    /// The deadline passed; this frame stopped the session.
    TimedOut,
    /// Empty sample buffer.
    Dropped,
    /// Source address did not match the filter.
    Filtered,
    /// Record emitted with this index.
    Emitted(u32),
}

/// Applies running state, deadline and filter, then emits records.
pub struct CapturePipeline {
    session: Arc<CaptureSession>,
    sink: Arc<dyn LineSink>,
}

impl CapturePipeline {
    pub fn new(session: Arc<CaptureSession>, sink: Arc<dyn LineSink>) -> Self {
        Self { session, sink }
    }

    pub fn session(&self) -> &Arc<CaptureSession> {
        &self.session
    }

    /// Process one frame that arrived at `now_us`.
    pub fn on_frame(&self, frame: &CsiFrame<'_>, now_us: u64) -> FrameOutcome {
        if !self.session.is_running() {
            return FrameOutcome::Inactive;
        }

        if let Some(deadline) = self.session.deadline_us() {
            if now_us > deadline {
                if self.session.expire() {
                    info!("CSI timeout reached");
                }
                return FrameOutcome::TimedOut;
            }
        }

        if frame.is_empty() {
            self.session.record_dropped();
            return FrameOutcome::Dropped;
        }

        if let Some(filter) = self.session.filter() {
            if frame.mac != filter {
                self.session.record_filtered();
                return FrameOutcome::Filtered;
            }
        }

        let index = self.session.next_index();
        self.sink.write_line(format_args!(
            "{}",
            CsiRecord {
                index,
                frame: *frame
            }
        ));
        FrameOutcome::Emitted(index)
    }
}
