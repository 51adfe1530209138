//! Capture arming and the frame processing task.
//!
//! The driver callback only checks the running flag, copies the frame and
//! hands it to a bounded queue. A single task drains the queue and runs
//! [`CapturePipeline::on_frame`], so records keep arrival order and the
//! delivery context never blocks.

use super::frame::{CsiFrame, CsiFrameBuf};
use super::pipeline::CapturePipeline;
use super::session::{CaptureSession, CaptureStats};
use crate::clock::Clock;
use crate::radio::{BringUpStep, CsiConfig, MacAddr, RadioDriver, RadioError, RadioManager};
use crate::sink::LineSink;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Depth of the queue between the driver callback and the processing task.
pub const QUEUE_DEPTH: usize = 32;

/// Owns the capture session and its processing task.
pub struct CaptureController {
    pipeline: Arc<CapturePipeline>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl CaptureController {
    pub fn new(sink: Arc<dyn LineSink>, clock: Arc<dyn Clock>) -> Self {
        let session = Arc::new(CaptureSession::new());
        Self {
            pipeline: Arc::new(CapturePipeline::new(session, sink)),
            clock,
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn session(&self) -> &Arc<CaptureSession> {
        self.pipeline.session()
    }

    pub fn stats(&self) -> CaptureStats {
        self.session().stats()
    }

    /// Whether hardware capture has been enabled in this process.
    pub fn is_hardware_enabled(&self) -> bool {
        self.worker.is_some()
    }

    /// Start capturing, optionally filtered to one source and bounded by
    /// `timeout` (zero or `None` runs until [`disarm`](Self::disarm)).
    ///
    /// The first call brings the radio up with the measurement profile if
    /// needed and enables hardware capture. Must be called from within a
    /// tokio runtime.
    pub fn arm<D: RadioDriver>(
        &mut self,
        radio: &mut RadioManager<D>,
        filter: Option<MacAddr>,
        timeout: Option<Duration>,
    ) -> Result<(), RadioError> {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| {
                let micros = u64::try_from(t.as_micros()).unwrap_or(u64::MAX);
                self.clock.now_us().saturating_add(micros)
            });

        self.session().arm(filter, deadline);

        if self.worker.is_none() {
            if let Err(e) = self.enable_hardware(radio) {
                self.session().disarm();
                return Err(e);
            }
        }

        match filter {
            Some(mac) => info!("CSI capture armed, filter {}", mac),
            None => info!("CSI capture armed, no filter"),
        }
        Ok(())
    }

    /// Stop capturing. Returns whether capture was running.
    pub fn disarm(&self) -> bool {
        let was_running = self.session().disarm();
        if was_running {
            info!("CSI capture stopped");
        }
        was_running
    }

    /// Stop the processing task and wait for it to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    fn enable_hardware<D: RadioDriver>(
        &mut self,
        radio: &mut RadioManager<D>,
    ) -> Result<(), RadioError> {
        radio.default_profile()?;
        let driver = radio.driver().clone();
        driver
            .set_promiscuous(true)
            .map_err(RadioError::bring_up(BringUpStep::Capture))?;
        driver
            .set_csi_config(&CsiConfig::default())
            .map_err(RadioError::bring_up(BringUpStep::Capture))?;

        let (tx, rx) = mpsc::channel::<CsiFrameBuf>(QUEUE_DEPTH);
        let session = self.session().clone();
        let clock = self.clock.clone();
        driver
            .set_csi_handler(Box::new(move |frame: &CsiFrame<'_>| {
                if !session.is_running() {
                    return;
                }
                let buf = CsiFrameBuf::copy_from(frame, clock.now_us());
                if tx.try_send(buf).is_err() {
                    session.record_overflow();
                }
            }))
            .map_err(RadioError::bring_up(BringUpStep::Capture))?;
        driver
            .enable_csi(true)
            .map_err(RadioError::bring_up(BringUpStep::Capture))?;

        self.worker = Some(spawn_worker(
            rx,
            self.pipeline.clone(),
            self.cancel.child_token(),
        ));
        debug!("CSI hardware capture enabled");
        Ok(())
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_worker(
    mut rx: mpsc::Receiver<CsiFrameBuf>,
    pipeline: Arc<CapturePipeline>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("CSI processing task shutting down");
                    break;
                }
                frame = rx.recv() => {
                    match frame {
                        Some(buf) => {
                            pipeline.on_frame(&buf.as_frame(), buf.received_us());
                        }
                        None => break,
                    }
                }
            }
        }
    })
}
