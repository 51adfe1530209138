//! CSI capture pipeline.
//!
//! - `frame`: borrowed and owned frame views
//! - `record`: the `CSI_DATA` line format
//! - `session`: shared atomic session state
//! - `pipeline`: per-frame filter/deadline decision
//! - `controller`: arming, hardware enable and the processing task

mod controller;
mod frame;
mod pipeline;
mod record;
mod session;

pub use controller::{CaptureController, QUEUE_DEPTH};
pub use frame::{CsiFrame, CsiFrameBuf, MAX_CSI_LEN};
pub use pipeline::{CapturePipeline, FrameOutcome};
pub use record::{CsiRecord, ParsedRecord, RecordParseError, RECORD_PREFIX};
pub use session::{CaptureSession, CaptureState, CaptureStats};
