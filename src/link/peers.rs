//! ESP-NOW peer registry with per-peer rate pinning.

use crate::radio::{
    Bandwidth, BringUpStep, DriverOp, MacAddr, RadioDriver, RadioError, RateMode,
};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Rate pinning outcome for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRate {
    Pinned(RateMode),
    /// The driver refused the pin; frames go at the driver's own rate.
    Unpinned,
}

impl fmt::Display for PeerRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pinned(mode) => write!(f, "{}", mode),
            Self::Unpinned => write!(f, "auto"),
        }
    }
}

/// A registered link-layer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    pub address: MacAddr,
    /// 0 means "the current channel".
    pub channel_hint: u8,
    pub encrypted: bool,
    pub rate: PeerRate,
}

/// Known peers. Entries live for the process lifetime.
pub struct PeerRegistry<D: RadioDriver> {
    driver: Arc<D>,
    link_ready: bool,
    peers: BTreeMap<MacAddr, PeerEntry>,
}

impl<D: RadioDriver> PeerRegistry<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            link_ready: false,
            peers: BTreeMap::new(),
        }
    }

    /// Initialize the link layer once.
    pub fn ensure_link(&mut self) -> Result<(), RadioError> {
        if self.link_ready {
            return Ok(());
        }
        match self.driver.link_init() {
            Ok(()) => debug!("ESP-NOW initialized"),
            Err(e) if e.is_already_done() => debug!("ESP-NOW already initialized"),
            Err(e) => {
                return Err(RadioError::BringUp {
                    step: BringUpStep::Link,
                    source: e,
                })
            }
        }
        self.link_ready = true;
        Ok(())
    }

    /// Register `address` unless already known, pinning its rate from
    /// `bandwidth`.
    pub fn ensure_peer(
        &mut self,
        address: MacAddr,
        bandwidth: Bandwidth,
    ) -> Result<PeerEntry, RadioError> {
        self.ensure_link()?;

        if let Some(entry) = self.peers.get(&address) {
            return Ok(*entry);
        }
        let entry = self.register(address, bandwidth)?;
        self.peers.insert(address, entry);
        Ok(entry)
    }

    fn register(&self, address: MacAddr, bandwidth: Bandwidth) -> Result<PeerEntry, RadioError> {
        if !self.driver.peer_exists(&address) {
            self.driver
                .add_peer(&address, 0)
                .map_err(RadioError::driver(DriverOp::AddPeer))?;
        }

        let mode = RateMode::for_bandwidth(bandwidth);
        let rate = match self.driver.set_peer_rate(&address, mode) {
            Ok(()) => {
                info!("Peer {} fixed rate: {}", address, mode);
                PeerRate::Pinned(mode)
            }
            Err(e) => {
                warn!("Rate config for {} failed: {} (check IDF version)", address, e);
                PeerRate::Unpinned
            }
        };

        Ok(PeerEntry {
            address,
            channel_hint: 0,
            encrypted: false,
            rate,
        })
    }

    pub fn get(&self, address: &MacAddr) -> Option<&PeerEntry> {
        self.peers.get(address)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_link_ready(&self) -> bool {
        self.link_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{DriverError, PhyMode, PhyRate, RadioManager};
    use crate::sim::{DriverCall, SimOp, SimRadio};

    fn running_sim() -> Arc<SimRadio> {
        let sim = Arc::new(SimRadio::new());
        let mut radio = RadioManager::new(sim.clone());
        radio.default_profile().unwrap();
        sim.clear_calls();
        sim
    }

    fn entry_mode(entry: &PeerEntry) -> RateMode {
        match entry.rate {
            PeerRate::Pinned(mode) => mode,
            PeerRate::Unpinned => panic!("peer not pinned"),
        }
    }

    #[test]
    fn test_first_peer_initializes_link_and_pins_rate() {
        let sim = running_sim();
        let mut peers = PeerRegistry::new(sim.clone());

        let entry = peers
            .ensure_peer(MacAddr::BROADCAST, Bandwidth::Ht40)
            .unwrap();
        assert_eq!(
            entry.rate,
            PeerRate::Pinned(RateMode {
                phy: PhyMode::Ht40,
                rate: PhyRate::Mcs0Sgi
            })
        );
        assert_eq!(entry.channel_hint, 0);
        assert!(!entry.encrypted);
        assert_eq!(
            sim.calls(),
            vec![
                DriverCall::LinkInit,
                DriverCall::AddPeer(MacAddr::BROADCAST),
                DriverCall::SetPeerRate(MacAddr::BROADCAST, entry_mode(&entry)),
            ]
        );
    }

    #[test]
    fn test_known_peer_is_noop() {
        let sim = running_sim();
        let mut peers = PeerRegistry::new(sim.clone());
        peers.ensure_peer(MacAddr::BROADCAST, Bandwidth::Ht40).unwrap();

        sim.clear_calls();
        peers.ensure_peer(MacAddr::BROADCAST, Bandwidth::Ht20).unwrap();
        assert!(sim.calls().is_empty());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_narrow_bandwidth_pins_ht20() {
        let sim = running_sim();
        let mut peers = PeerRegistry::new(sim);
        let target = MacAddr::new([2, 0, 0, 0, 0, 9]);
        let entry = peers.ensure_peer(target, Bandwidth::Ht20).unwrap();
        assert_eq!(entry_mode(&entry).phy, PhyMode::Ht20);
        assert_eq!(entry_mode(&entry).rate, PhyRate::Mcs0Lgi);
    }

    #[test]
    fn test_pin_failure_still_registers() {
        let sim = running_sim();
        sim.inject_failure(SimOp::SetPeerRate, DriverError::NotSupported);
        let mut peers = PeerRegistry::new(sim);

        let entry = peers
            .ensure_peer(MacAddr::BROADCAST, Bandwidth::Ht40)
            .unwrap();
        assert_eq!(entry.rate, PeerRate::Unpinned);
        assert!(peers.get(&MacAddr::BROADCAST).is_some());
    }

    #[test]
    fn test_link_already_initialized_is_success() {
        let sim = running_sim();
        sim.inject_failure(SimOp::LinkInit, DriverError::AlreadyInitialized);
        let mut peers = PeerRegistry::new(sim);
        assert!(peers.ensure_link().is_ok());
        assert!(peers.is_link_ready());
    }

    #[test]
    fn test_link_failure_propagates() {
        let sim = Arc::new(SimRadio::new());
        let mut peers = PeerRegistry::new(sim);
        // Radio never started.
        let err = peers
            .ensure_peer(MacAddr::BROADCAST, Bandwidth::Ht40)
            .unwrap_err();
        assert!(matches!(
            err,
            RadioError::BringUp {
                step: BringUpStep::Link,
                ..
            }
        ));
        assert!(peers.is_empty());
    }

    #[test]
    fn test_add_peer_failure_propagates() {
        let sim = running_sim();
        sim.inject_failure(SimOp::AddPeer, DriverError::NoMemory);
        let mut peers = PeerRegistry::new(sim);
        let err = peers
            .ensure_peer(MacAddr::BROADCAST, Bandwidth::Ht40)
            .unwrap_err();
        assert_eq!(
            err,
            RadioError::Driver {
                op: DriverOp::AddPeer,
                source: DriverError::NoMemory
            }
        );
    }
}
