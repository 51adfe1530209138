//! In-process simulated radio.
//!
//! [`SimRadio`] implements [`RadioDriver`] with the state rules of the
//! ESP-IDF Wi-Fi and ESP-NOW drivers that the rest of the crate depends on:
//! the station address cannot change while started, repeated
//! initialization reports "already initialized", and ESP-NOW needs a started
//! radio. Every call is logged so tests can assert exact sequences, and any
//! operation can be made to fail.
//!
//! With loopback enabled every sent frame is also delivered back as a
//! received payload and, when capture is on, as a synthetic CSI frame. The
//! host build of the node binary uses this to exercise the full pipeline
//! without hardware.

use crate::capture::CsiFrame;
use crate::radio::{
    AccessPoint, Bandwidth, CsiConfig, CsiHandler, DriverError, MacAddr, RadioDriver, RateMode,
    RecvHandler, ScanMode, SecondaryChannel,
};
use log::debug;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

const ESP_ERR_WIFI_NOT_INIT: i32 = 0x3001;
const ESP_ERR_WIFI_NOT_STARTED: i32 = 0x3002;
const ESP_ERR_ESPNOW_NOT_INIT: i32 = 0x3065;
const ESP_ERR_ESPNOW_ARG: i32 = 0x3066;
const ESP_ERR_ESPNOW_NOT_FOUND: i32 = 0x3069;
const ESP_ERR_ESPNOW_EXIST: i32 = 0x306b;

/// Largest ESP-NOW payload.
const MAX_LINK_PAYLOAD: usize = 250;

/// Factory station address of the simulated chip.
pub const SIM_FACTORY_MAC: MacAddr = MacAddr::new([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01]);

/// A logged driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    InitStorage,
    InitNetworkStack,
    InitWifi,
    Start,
    Stop,
    SetMac(MacAddr),
    DisablePowerSave,
    SetBandwidth(Bandwidth),
    SetChannel(u8, SecondaryChannel),
    SetMaxTxPower(i8),
    Scan(ScanMode),
    LinkInit,
    AddPeer(MacAddr),
    SetPeerRate(MacAddr, RateMode),
    SetRecvHandler,
    SetPromiscuous(bool),
    SetCsiConfig(CsiConfig),
    SetCsiHandler,
    EnableCsi(bool),
    Reboot,
}

/// Operation selector for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    InitStorage,
    InitNetworkStack,
    InitWifi,
    Start,
    Stop,
    SetMac,
    PowerSave,
    SetBandwidth,
    SetChannel,
    TxPower,
    Scan,
    LinkInit,
    AddPeer,
    SetPeerRate,
    Send,
    SetPromiscuous,
    CsiConfig,
    EnableCsi,
}

struct SimState {
    calls: Vec<DriverCall>,
    failures: HashMap<SimOp, DriverError>,
    stack_ready: bool,
    wifi_ready: bool,
    started: bool,
    mac: MacAddr,
    channel: (u8, SecondaryChannel),
    bandwidth: Bandwidth,
    tx_power_quarter_dbm: i8,
    access_points: Vec<AccessPoint>,
    link_ready: bool,
    peers: BTreeSet<MacAddr>,
    peer_rates: HashMap<MacAddr, RateMode>,
    sent: Vec<(MacAddr, Vec<u8>)>,
    promiscuous: bool,
    csi_enabled: bool,
    csi_handler: Option<Arc<dyn Fn(&CsiFrame<'_>) + Send + Sync>>,
    recv_handler: Option<Arc<dyn Fn(&MacAddr, &[u8]) + Send + Sync>>,
    reboots: u32,
}

impl SimState {
    fn new() -> Self {
        Self {
            calls: Vec::new(),
            failures: HashMap::new(),
            stack_ready: false,
            wifi_ready: false,
            started: false,
            mac: SIM_FACTORY_MAC,
            channel: (1, SecondaryChannel::None),
            bandwidth: Bandwidth::Ht20,
            tx_power_quarter_dbm: 80,
            access_points: Vec::new(),
            link_ready: false,
            peers: BTreeSet::new(),
            peer_rates: HashMap::new(),
            sent: Vec::new(),
            promiscuous: false,
            csi_enabled: false,
            csi_handler: None,
            recv_handler: None,
            reboots: 0,
        }
    }

    fn check(&self, op: SimOp) -> Result<(), DriverError> {
        match self.failures.get(&op) {
            Some(e) => Err(*e),
            None => Ok(()),
        }
    }

    fn require_wifi(&self) -> Result<(), DriverError> {
        if self.wifi_ready {
            Ok(())
        } else {
            Err(DriverError::Esp(ESP_ERR_WIFI_NOT_INIT))
        }
    }

    fn require_started(&self) -> Result<(), DriverError> {
        self.require_wifi()?;
        if self.started {
            Ok(())
        } else {
            Err(DriverError::Esp(ESP_ERR_WIFI_NOT_STARTED))
        }
    }
}

/// Simulated radio driver.
pub struct SimRadio {
    state: Mutex<SimState>,
    loopback: bool,
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRadio {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::new()),
            loopback: false,
        }
    }

    /// A radio that hears its own transmissions.
    pub fn with_loopback() -> Self {
        Self {
            loopback: true,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn call(&self, call: DriverCall, op: SimOp) -> Result<MutexGuard<'_, SimState>, DriverError> {
        let mut state = self.lock();
        state.calls.push(call);
        state.check(op)?;
        Ok(state)
    }

    // ---- test controls ----

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every call of `op` fail with `error` until cleared.
    pub fn inject_failure(&self, op: SimOp, error: DriverError) {
        self.lock().failures.insert(op, error);
    }

    pub fn clear_failure(&self, op: SimOp) {
        self.lock().failures.remove(&op);
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn current_mac(&self) -> MacAddr {
        self.lock().mac
    }

    pub fn current_channel(&self) -> (u8, SecondaryChannel) {
        self.lock().channel
    }

    pub fn current_bandwidth(&self) -> Bandwidth {
        self.lock().bandwidth
    }

    pub fn is_promiscuous(&self) -> bool {
        self.lock().promiscuous
    }

    pub fn peer_rate(&self, addr: &MacAddr) -> Option<RateMode> {
        self.lock().peer_rates.get(addr).copied()
    }

    /// All accepted frames, in order.
    pub fn sent(&self) -> Vec<(MacAddr, Vec<u8>)> {
        self.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn reboots(&self) -> u32 {
        self.lock().reboots
    }

    pub fn add_access_point(&self, ap: AccessPoint) {
        self.lock().access_points.push(ap);
    }

    /// Deliver a CSI frame as the driver would. Ignored unless capture is
    /// enabled.
    pub fn deliver_csi(&self, frame: &CsiFrame<'_>) {
        let handler = {
            let state = self.lock();
            if !state.csi_enabled {
                return;
            }
            state.csi_handler.clone()
        };
        if let Some(handler) = handler {
            handler(frame);
        }
    }

    /// Deliver a received link-layer payload.
    pub fn deliver_message(&self, from: &MacAddr, data: &[u8]) {
        let handler = self.lock().recv_handler.clone();
        if let Some(handler) = handler {
            handler(from, data);
        }
    }

    fn echo(&self, data: &[u8]) {
        let (mac, cwb) = {
            let state = self.lock();
            let cwb = match state.bandwidth {
                Bandwidth::Ht20 => 0,
                Bandwidth::Ht40 => 1,
            };
            (state.mac, cwb)
        };

        self.deliver_message(&mac, data);

        let seed = data.first().copied().unwrap_or(0) as i16;
        let samples: Vec<i8> = (0..128i16)
            .map(|i| (((i * 7 + seed) % 64) - 32) as i8)
            .collect();
        self.deliver_csi(&CsiFrame {
            mac,
            rssi: -30,
            rate: 0,
            sig_mode: 1,
            mcs: 0,
            cwb,
            data: &samples,
        });
    }
}

impl RadioDriver for SimRadio {
    fn init_storage(&self) -> Result<(), DriverError> {
        self.call(DriverCall::InitStorage, SimOp::InitStorage)?;
        Ok(())
    }

    fn init_network_stack(&self) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::InitNetworkStack, SimOp::InitNetworkStack)?;
        if state.stack_ready {
            return Err(DriverError::InvalidState);
        }
        state.stack_ready = true;
        Ok(())
    }

    fn init_wifi(&self) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::InitWifi, SimOp::InitWifi)?;
        if state.wifi_ready {
            return Err(DriverError::AlreadyInitialized);
        }
        state.wifi_ready = true;
        Ok(())
    }

    fn start(&self) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::Start, SimOp::Start)?;
        state.require_wifi()?;
        state.started = true;
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::Stop, SimOp::Stop)?;
        state.require_wifi()?;
        state.started = false;
        Ok(())
    }

    fn set_mac(&self, mac: MacAddr) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::SetMac(mac), SimOp::SetMac)?;
        state.require_wifi()?;
        if state.started {
            return Err(DriverError::InterfaceBusy);
        }
        state.mac = mac;
        Ok(())
    }

    fn mac(&self) -> Result<MacAddr, DriverError> {
        let state = self.lock();
        state.require_wifi()?;
        Ok(state.mac)
    }

    fn disable_power_save(&self) -> Result<(), DriverError> {
        let state = self.call(DriverCall::DisablePowerSave, SimOp::PowerSave)?;
        state.require_wifi()
    }

    fn set_bandwidth(&self, bandwidth: Bandwidth) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::SetBandwidth(bandwidth), SimOp::SetBandwidth)?;
        state.require_wifi()?;
        state.bandwidth = bandwidth;
        Ok(())
    }

    fn set_channel(&self, channel: u8, secondary: SecondaryChannel) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::SetChannel(channel, secondary), SimOp::SetChannel)?;
        state.require_wifi()?;
        state.channel = (channel, secondary);
        Ok(())
    }

    fn channel(&self) -> Result<(u8, SecondaryChannel), DriverError> {
        let state = self.lock();
        state.require_wifi()?;
        Ok(state.channel)
    }

    fn set_max_tx_power(&self, quarter_dbm: i8) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::SetMaxTxPower(quarter_dbm), SimOp::TxPower)?;
        state.require_started()?;
        state.tx_power_quarter_dbm = quarter_dbm;
        Ok(())
    }

    fn max_tx_power(&self) -> Result<i8, DriverError> {
        let state = self.lock();
        state.check(SimOp::TxPower)?;
        state.require_started()?;
        Ok(state.tx_power_quarter_dbm)
    }

    fn scan(&self, mode: ScanMode) -> Result<Vec<AccessPoint>, DriverError> {
        let state = self.call(DriverCall::Scan(mode), SimOp::Scan)?;
        state.require_started()?;
        Ok(state.access_points.clone())
    }

    fn link_init(&self) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::LinkInit, SimOp::LinkInit)?;
        state.require_started()?;
        if state.link_ready {
            return Err(DriverError::AlreadyInitialized);
        }
        state.link_ready = true;
        Ok(())
    }

    fn peer_exists(&self, addr: &MacAddr) -> bool {
        self.lock().peers.contains(addr)
    }

    fn add_peer(&self, addr: &MacAddr, _channel: u8) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::AddPeer(*addr), SimOp::AddPeer)?;
        if !state.link_ready {
            return Err(DriverError::Esp(ESP_ERR_ESPNOW_NOT_INIT));
        }
        if !state.peers.insert(*addr) {
            return Err(DriverError::Esp(ESP_ERR_ESPNOW_EXIST));
        }
        Ok(())
    }

    fn set_peer_rate(&self, addr: &MacAddr, mode: RateMode) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::SetPeerRate(*addr, mode), SimOp::SetPeerRate)?;
        if !state.peers.contains(addr) {
            return Err(DriverError::Esp(ESP_ERR_ESPNOW_NOT_FOUND));
        }
        state.peer_rates.insert(*addr, mode);
        Ok(())
    }

    fn send(&self, addr: &MacAddr, data: &[u8]) -> Result<(), DriverError> {
        {
            // Not logged as a DriverCall: probe sessions send thousands.
            let mut state = self.lock();
            state.check(SimOp::Send)?;
            if !state.link_ready {
                return Err(DriverError::Esp(ESP_ERR_ESPNOW_NOT_INIT));
            }
            if !state.peers.contains(addr) {
                return Err(DriverError::Esp(ESP_ERR_ESPNOW_NOT_FOUND));
            }
            if data.is_empty() || data.len() > MAX_LINK_PAYLOAD {
                return Err(DriverError::Esp(ESP_ERR_ESPNOW_ARG));
            }
            state.sent.push((*addr, data.to_vec()));
        }
        if self.loopback {
            self.echo(data);
        }
        Ok(())
    }

    fn set_recv_handler(&self, handler: RecvHandler) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(DriverCall::SetRecvHandler);
        state.recv_handler = Some(Arc::from(handler));
        Ok(())
    }

    fn set_promiscuous(&self, enabled: bool) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::SetPromiscuous(enabled), SimOp::SetPromiscuous)?;
        state.require_started()?;
        state.promiscuous = enabled;
        Ok(())
    }

    fn set_csi_config(&self, config: &CsiConfig) -> Result<(), DriverError> {
        let state = self.call(DriverCall::SetCsiConfig(*config), SimOp::CsiConfig)?;
        state.require_wifi()
    }

    fn set_csi_handler(&self, handler: CsiHandler) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.calls.push(DriverCall::SetCsiHandler);
        state.csi_handler = Some(Arc::from(handler));
        Ok(())
    }

    fn enable_csi(&self, enabled: bool) -> Result<(), DriverError> {
        let mut state = self.call(DriverCall::EnableCsi(enabled), SimOp::EnableCsi)?;
        state.require_wifi()?;
        state.csi_enabled = enabled;
        Ok(())
    }

    fn reboot(&self) {
        let mut state = self.lock();
        debug!("Simulated reboot");
        let reboots = state.reboots + 1;
        let calls = std::mem::take(&mut state.calls);
        *state = SimState::new();
        state.calls = calls;
        state.calls.push(DriverCall::Reboot);
        state.reboots = reboots;
    }
}
