//! Short text messages over the link layer.

use super::peers::PeerRegistry;
use crate::radio::{BringUpStep, DriverOp, MacAddr, RadioDriver, RadioError, RadioManager};
use crate::sink::LineSink;
use log::info;
use std::sync::Arc;

/// Longest message text printed before truncation, in bytes.
pub const MAX_DISPLAY_LEN: usize = 255;

/// Render a received message for the console.
pub fn format_incoming_message(from: &MacAddr, data: &[u8]) -> String {
    let shown = &data[..data.len().min(MAX_DISPLAY_LEN)];
    let suffix = if data.len() > MAX_DISPLAY_LEN { "..." } else { "" };
    format!(
        "[MSG from {}]: {}{}",
        from,
        String::from_utf8_lossy(shown),
        suffix
    )
}

pub struct Messenger<D: RadioDriver> {
    driver: Arc<D>,
    sink: Arc<dyn LineSink>,
    listening: bool,
}

impl<D: RadioDriver> Messenger<D> {
    pub fn new(driver: Arc<D>, sink: Arc<dyn LineSink>) -> Self {
        Self {
            driver,
            sink,
            listening: false,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Print every received payload as a message.
    pub fn listen(
        &mut self,
        radio: &mut RadioManager<D>,
        peers: &mut PeerRegistry<D>,
    ) -> Result<(), RadioError> {
        radio.default_profile()?;
        peers.ensure_link()?;
        if self.listening {
            return Ok(());
        }

        let sink = self.sink.clone();
        self.driver
            .set_recv_handler(Box::new(move |from: &MacAddr, data: &[u8]| {
                sink.write_line(format_args!("{}", format_incoming_message(from, data)));
            }))
            .map_err(RadioError::bring_up(BringUpStep::Link))?;
        self.listening = true;
        info!("Message listening enabled");
        Ok(())
    }

    /// Send `text` to `dest`, or broadcast when `None`.
    pub fn send(
        &self,
        radio: &mut RadioManager<D>,
        peers: &mut PeerRegistry<D>,
        dest: Option<MacAddr>,
        text: &str,
    ) -> Result<MacAddr, RadioError> {
        radio.default_profile()?;
        let dest = dest.unwrap_or(MacAddr::BROADCAST);
        peers.ensure_peer(dest, radio.bandwidth())?;
        self.driver
            .send(&dest, text.as_bytes())
            .map_err(RadioError::driver(DriverOp::Send))?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRadio;
    use crate::sink::MemorySink;

    struct Fixture {
        sim: Arc<SimRadio>,
        radio: RadioManager<SimRadio>,
        peers: PeerRegistry<SimRadio>,
        sink: Arc<MemorySink>,
        messenger: Messenger<SimRadio>,
    }

    fn fixture() -> Fixture {
        let sim = Arc::new(SimRadio::new());
        let sink = Arc::new(MemorySink::new());
        Fixture {
            radio: RadioManager::new(sim.clone()),
            peers: PeerRegistry::new(sim.clone()),
            messenger: Messenger::new(sim.clone(), sink.clone()),
            sim,
            sink,
        }
    }

    #[test]
    fn test_format_short_message() {
        let from = MacAddr::new([0x1a, 0, 0, 0, 0, 1]);
        assert_eq!(
            format_incoming_message(&from, b"hello"),
            "[MSG from 1a:00:00:00:00:01]: hello"
        );
    }

    #[test]
    fn test_format_truncates_long_message() {
        let data = vec![b'x'; 300];
        let line = format_incoming_message(&MacAddr::BROADCAST, &data);
        assert!(line.ends_with(&format!("{}...", "x".repeat(MAX_DISPLAY_LEN))));
    }

    #[test]
    fn test_format_lossy_utf8() {
        let line = format_incoming_message(&MacAddr::BROADCAST, &[0x68, 0xff, 0x69]);
        assert!(line.ends_with("h\u{fffd}i"));
    }

    #[test]
    fn test_listen_prints_received_messages() {
        let mut f = fixture();
        f.messenger.listen(&mut f.radio, &mut f.peers).unwrap();
        assert!(f.messenger.is_listening());
        assert!(f.radio.is_ready());

        let from = MacAddr::new([2, 0, 0, 0, 0, 7]);
        f.sim.deliver_message(&from, b"ping");
        assert_eq!(f.sink.lines(), vec!["[MSG from 02:00:00:00:00:07]: ping"]);
    }

    #[test]
    fn test_send_defaults_to_broadcast() {
        let mut f = fixture();
        let dest = f
            .messenger
            .send(&mut f.radio, &mut f.peers, None, "hi there")
            .unwrap();
        assert!(dest.is_broadcast());
        assert_eq!(f.sim.sent(), vec![(MacAddr::BROADCAST, b"hi there".to_vec())]);
        assert!(f.peers.get(&MacAddr::BROADCAST).is_some());
    }

    #[test]
    fn test_send_failure_reported() {
        let mut f = fixture();
        f.sim.inject_failure(
            crate::sim::SimOp::Send,
            crate::radio::DriverError::Esp(0x3066),
        );
        let err = f
            .messenger
            .send(&mut f.radio, &mut f.peers, None, "x")
            .unwrap_err();
        assert!(matches!(
            err,
            RadioError::Driver {
                op: DriverOp::Send,
                ..
            }
        ));
    }
}
