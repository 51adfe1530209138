//! ESP-IDF radio driver.

use crate::capture::CsiFrame;
use crate::radio::{
    AccessPoint, Bandwidth, CsiConfig, CsiHandler, DriverError, MacAddr, PhyMode, PhyRate,
    RadioDriver, RateMode, RecvHandler, ScanMode, SecondaryChannel,
};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use esp_idf_sys::{self as sys, esp, EspError};
use log::{debug, warn};
use std::ffi::{c_int, c_void};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

const ESP_ERR_NO_MEM: i32 = 0x101;
const ESP_ERR_INVALID_STATE: i32 = 0x103;
const ESP_ERR_NOT_SUPPORTED: i32 = 0x106;
const ESP_ERR_WIFI_IF: i32 = 0x3004;
const ESP_ERR_WIFI_INIT_STATE: i32 = 0x3017;
const ESP_ERR_ESPNOW_EXIST: i32 = 0x306b;

const ACTIVE_SCAN_MIN_MS: u32 = 100;
const ACTIVE_SCAN_MAX_MS: u32 = 300;
const PASSIVE_SCAN_MS: u32 = 300;

type SharedCsiHandler = Arc<dyn Fn(&CsiFrame<'_>) + Send + Sync + 'static>;
type SharedRecvHandler = Arc<dyn Fn(&MacAddr, &[u8]) + Send + Sync + 'static>;

// The driver callbacks carry no usable context, so the handlers live here.
// Each is installed once per boot; the callbacks only load them.
static CSI_HANDLER: OnceLock<SharedCsiHandler> = OnceLock::new();
static RECV_HANDLER: OnceLock<SharedRecvHandler> = OnceLock::new();

fn install<T>(slot: &OnceLock<T>, handler: T) -> Result<(), DriverError> {
    slot.set(handler).map_err(|_| DriverError::AlreadyInitialized)
}

fn map_code(code: i32) -> DriverError {
    match code {
        ESP_ERR_NO_MEM => DriverError::NoMemory,
        ESP_ERR_INVALID_STATE => DriverError::InvalidState,
        ESP_ERR_NOT_SUPPORTED => DriverError::NotSupported,
        ESP_ERR_WIFI_INIT_STATE | ESP_ERR_ESPNOW_EXIST => DriverError::AlreadyInitialized,
        other => DriverError::Esp(other),
    }
}

fn driver_error(e: EspError) -> DriverError {
    map_code(e.code())
}

struct EspState {
    modem: Option<Modem>,
    nvs: Option<EspDefaultNvsPartition>,
    sysloop: Option<EspSystemEventLoop>,
    wifi: Option<EspWifi<'static>>,
}

/// [`RadioDriver`] on the ESP-IDF Wi-Fi, ESP-NOW and CSI APIs.
pub struct EspRadio {
    state: Mutex<EspState>,
}

impl EspRadio {
    pub fn new(modem: Modem) -> Self {
        Self {
            state: Mutex::new(EspState {
                modem: Some(modem),
                nvs: None,
                sysloop: None,
                wifi: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EspState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn secondary_to_sys(secondary: SecondaryChannel) -> sys::wifi_second_chan_t {
    match secondary {
        SecondaryChannel::None => sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE,
        SecondaryChannel::Above => sys::wifi_second_chan_t_WIFI_SECOND_CHAN_ABOVE,
        SecondaryChannel::Below => sys::wifi_second_chan_t_WIFI_SECOND_CHAN_BELOW,
    }
}

fn secondary_from_sys(secondary: sys::wifi_second_chan_t) -> SecondaryChannel {
    match secondary {
        sys::wifi_second_chan_t_WIFI_SECOND_CHAN_ABOVE => SecondaryChannel::Above,
        sys::wifi_second_chan_t_WIFI_SECOND_CHAN_BELOW => SecondaryChannel::Below,
        _ => SecondaryChannel::None,
    }
}

fn ssid_to_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl RadioDriver for EspRadio {
    fn init_storage(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.nvs.is_some() {
            return Err(DriverError::AlreadyInitialized);
        }
        // Erases and retries on "no free pages" and "new version found".
        state.nvs = Some(EspDefaultNvsPartition::take().map_err(driver_error)?);
        debug!("NVS ready");
        Ok(())
    }

    fn init_network_stack(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.sysloop.is_some() {
            return Err(DriverError::InvalidState);
        }
        match esp!(unsafe { sys::esp_netif_init() }) {
            Err(e) if e.code() != ESP_ERR_INVALID_STATE => return Err(driver_error(e)),
            _ => {}
        }
        state.sysloop = Some(EspSystemEventLoop::take().map_err(driver_error)?);
        Ok(())
    }

    fn init_wifi(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.wifi.is_some() {
            return Err(DriverError::AlreadyInitialized);
        }
        let sysloop = state.sysloop.clone().ok_or(DriverError::InvalidState)?;
        let modem = state.modem.take().ok_or(DriverError::InvalidState)?;

        // Creates the default station interface.
        let wifi = EspWifi::new(modem, sysloop, state.nvs.clone()).map_err(driver_error)?;
        esp!(unsafe { sys::esp_wifi_set_storage(sys::wifi_storage_t_WIFI_STORAGE_RAM) })
            .map_err(driver_error)?;
        esp!(unsafe { sys::esp_wifi_set_mode(sys::wifi_mode_t_WIFI_MODE_STA) })
            .map_err(driver_error)?;
        state.wifi = Some(wifi);
        Ok(())
    }

    fn start(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        let wifi = state.wifi.as_mut().ok_or(DriverError::InvalidState)?;
        wifi.start().map_err(driver_error)
    }

    fn stop(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        let wifi = state.wifi.as_mut().ok_or(DriverError::InvalidState)?;
        wifi.stop().map_err(driver_error)
    }

    fn set_mac(&self, mac: MacAddr) -> Result<(), DriverError> {
        let octets = mac.octets();
        match esp!(unsafe {
            sys::esp_wifi_set_mac(sys::wifi_interface_t_WIFI_IF_STA, octets.as_ptr())
        }) {
            Ok(()) => Ok(()),
            Err(e) if e.code() == ESP_ERR_WIFI_IF => Err(DriverError::InterfaceBusy),
            Err(e) => Err(driver_error(e)),
        }
    }

    fn mac(&self) -> Result<MacAddr, DriverError> {
        let mut octets = [0u8; 6];
        esp!(unsafe {
            sys::esp_wifi_get_mac(sys::wifi_interface_t_WIFI_IF_STA, octets.as_mut_ptr())
        })
        .map_err(driver_error)?;
        Ok(MacAddr::new(octets))
    }

    fn disable_power_save(&self) -> Result<(), DriverError> {
        esp!(unsafe { sys::esp_wifi_set_ps(sys::wifi_ps_type_t_WIFI_PS_NONE) })
            .map_err(driver_error)
    }

    fn set_bandwidth(&self, bandwidth: Bandwidth) -> Result<(), DriverError> {
        let bw = match bandwidth {
            Bandwidth::Ht20 => sys::wifi_bandwidth_t_WIFI_BW_HT20,
            Bandwidth::Ht40 => sys::wifi_bandwidth_t_WIFI_BW_HT40,
        };
        esp!(unsafe { sys::esp_wifi_set_bandwidth(sys::wifi_interface_t_WIFI_IF_STA, bw) })
            .map_err(driver_error)
    }

    fn set_channel(&self, channel: u8, secondary: SecondaryChannel) -> Result<(), DriverError> {
        esp!(unsafe { sys::esp_wifi_set_channel(channel, secondary_to_sys(secondary)) })
            .map_err(driver_error)
    }

    fn channel(&self) -> Result<(u8, SecondaryChannel), DriverError> {
        let mut primary: u8 = 0;
        let mut second: sys::wifi_second_chan_t = sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE;
        esp!(unsafe { sys::esp_wifi_get_channel(&mut primary, &mut second) })
            .map_err(driver_error)?;
        Ok((primary, secondary_from_sys(second)))
    }

    fn set_max_tx_power(&self, quarter_dbm: i8) -> Result<(), DriverError> {
        esp!(unsafe { sys::esp_wifi_set_max_tx_power(quarter_dbm) }).map_err(driver_error)
    }

    fn max_tx_power(&self) -> Result<i8, DriverError> {
        let mut power: i8 = 0;
        esp!(unsafe { sys::esp_wifi_get_max_tx_power(&mut power) }).map_err(driver_error)?;
        Ok(power)
    }

    fn scan(&self, mode: ScanMode) -> Result<Vec<AccessPoint>, DriverError> {
        let mut config = sys::wifi_scan_config_t {
            show_hidden: true,
            ..Default::default()
        };
        match mode {
            ScanMode::Active => {
                config.scan_type = sys::wifi_scan_type_t_WIFI_SCAN_TYPE_ACTIVE;
                config.scan_time.active.min = ACTIVE_SCAN_MIN_MS;
                config.scan_time.active.max = ACTIVE_SCAN_MAX_MS;
            }
            ScanMode::Passive => {
                config.scan_type = sys::wifi_scan_type_t_WIFI_SCAN_TYPE_PASSIVE;
                config.scan_time.passive = PASSIVE_SCAN_MS;
            }
        }

        esp!(unsafe { sys::esp_wifi_scan_start(&config, true) }).map_err(driver_error)?;

        let mut count: u16 = 0;
        esp!(unsafe { sys::esp_wifi_scan_get_ap_num(&mut count) }).map_err(driver_error)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut records = vec![sys::wifi_ap_record_t::default(); count as usize];
        esp!(unsafe { sys::esp_wifi_scan_get_ap_records(&mut count, records.as_mut_ptr()) })
            .map_err(driver_error)?;
        records.truncate(count as usize);

        Ok(records
            .iter()
            .map(|r| AccessPoint {
                ssid: ssid_to_string(&r.ssid),
                bssid: MacAddr::new(r.bssid),
                channel: r.primary,
                rssi: r.rssi,
            })
            .collect())
    }

    fn link_init(&self) -> Result<(), DriverError> {
        esp!(unsafe { sys::esp_now_init() }).map_err(driver_error)
    }

    fn peer_exists(&self, addr: &MacAddr) -> bool {
        let octets = addr.octets();
        unsafe { sys::esp_now_is_peer_exist(octets.as_ptr()) }
    }

    fn add_peer(&self, addr: &MacAddr, channel: u8) -> Result<(), DriverError> {
        let peer = sys::esp_now_peer_info_t {
            peer_addr: addr.octets(),
            channel,
            ifidx: sys::wifi_interface_t_WIFI_IF_STA,
            encrypt: false,
            ..Default::default()
        };
        esp!(unsafe { sys::esp_now_add_peer(&peer) }).map_err(driver_error)
    }

    fn set_peer_rate(&self, addr: &MacAddr, mode: RateMode) -> Result<(), DriverError> {
        let mut config = sys::esp_now_rate_config_t {
            phymode: match mode.phy {
                PhyMode::Ht20 => sys::wifi_phy_mode_t_WIFI_PHY_MODE_HT20,
                PhyMode::Ht40 => sys::wifi_phy_mode_t_WIFI_PHY_MODE_HT40,
            },
            rate: match mode.rate {
                PhyRate::Mcs0Lgi => sys::wifi_phy_rate_t_WIFI_PHY_RATE_MCS0_LGI,
                PhyRate::Mcs0Sgi => sys::wifi_phy_rate_t_WIFI_PHY_RATE_MCS0_SGI,
            },
            ersu: false,
            dcm: false,
        };
        let octets = addr.octets();
        esp!(unsafe { sys::esp_now_set_peer_rate_config(octets.as_ptr(), &mut config) })
            .map_err(driver_error)
    }

    fn send(&self, addr: &MacAddr, data: &[u8]) -> Result<(), DriverError> {
        let octets = addr.octets();
        esp!(unsafe { sys::esp_now_send(octets.as_ptr(), data.as_ptr(), data.len()) })
            .map_err(driver_error)
    }

    fn set_recv_handler(&self, handler: RecvHandler) -> Result<(), DriverError> {
        install(&RECV_HANDLER, Arc::from(handler))?;
        esp!(unsafe { sys::esp_now_register_recv_cb(Some(recv_trampoline)) })
            .map_err(driver_error)
    }

    fn set_promiscuous(&self, enabled: bool) -> Result<(), DriverError> {
        esp!(unsafe { sys::esp_wifi_set_promiscuous(enabled) }).map_err(driver_error)
    }

    fn set_csi_config(&self, config: &CsiConfig) -> Result<(), DriverError> {
        let raw = sys::wifi_csi_config_t {
            lltf_en: config.lltf,
            htltf_en: config.htltf,
            stbc_htltf2_en: config.stbc_htltf2,
            ltf_merge_en: config.ltf_merge,
            channel_filter_en: config.channel_filter,
            manu_scale: config.manual_scale,
            shift: config.shift,
            ..Default::default()
        };
        esp!(unsafe { sys::esp_wifi_set_csi_config(&raw) }).map_err(driver_error)
    }

    fn set_csi_handler(&self, handler: CsiHandler) -> Result<(), DriverError> {
        install(&CSI_HANDLER, Arc::from(handler))?;
        esp!(unsafe { sys::esp_wifi_set_csi_rx_cb(Some(csi_trampoline), std::ptr::null_mut()) })
            .map_err(driver_error)
    }

    fn enable_csi(&self, enabled: bool) -> Result<(), DriverError> {
        esp!(unsafe { sys::esp_wifi_set_csi(enabled) }).map_err(driver_error)
    }

    fn reboot(&self) {
        warn!("Rebooting");
        unsafe { sys::esp_restart() };
    }
}

unsafe extern "C" fn csi_trampoline(_ctx: *mut c_void, info: *mut sys::wifi_csi_info_t) {
    let Some(info) = info.as_ref() else {
        return;
    };
    if info.buf.is_null() {
        return;
    }
    let Some(handler) = CSI_HANDLER.get() else {
        return;
    };

    let data = std::slice::from_raw_parts(info.buf as *const i8, info.len as usize);
    let rx = &info.rx_ctrl;
    handler(&CsiFrame {
        mac: MacAddr::new(info.mac),
        rssi: rx.rssi() as i8,
        rate: rx.rate() as u8,
        sig_mode: rx.sig_mode() as u8,
        mcs: rx.mcs() as u8,
        cwb: rx.cwb() as u8,
        data,
    });
}

unsafe extern "C" fn recv_trampoline(
    info: *const sys::esp_now_recv_info_t,
    data: *const u8,
    len: c_int,
) {
    let Some(info) = info.as_ref() else {
        return;
    };
    if info.src_addr.is_null() || data.is_null() || len <= 0 {
        return;
    }
    let Some(handler) = RECV_HANDLER.get() else {
        return;
    };

    let mut src = [0u8; 6];
    src.copy_from_slice(std::slice::from_raw_parts(info.src_addr, 6));
    handler(
        &MacAddr::new(src),
        std::slice::from_raw_parts(data, len as usize),
    );
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use csi_radio_esp32_macros::tap_test;

    #[tap_test]
    fn test_map_known_codes() {
        assert_eq!(map_code(ESP_ERR_NO_MEM), DriverError::NoMemory);
        assert_eq!(map_code(ESP_ERR_INVALID_STATE), DriverError::InvalidState);
        assert_eq!(map_code(ESP_ERR_NOT_SUPPORTED), DriverError::NotSupported);
        assert!(map_code(ESP_ERR_ESPNOW_EXIST).is_already_done());
        assert_eq!(map_code(0x3066), DriverError::Esp(0x3066));
    }

    #[tap_test]
    fn test_handler_installed_once() {
        let slot: OnceLock<u8> = OnceLock::new();
        assert_eq!(install(&slot, 1), Ok(()));
        assert_eq!(install(&slot, 2), Err(DriverError::AlreadyInitialized));
        assert_eq!(slot.get(), Some(&1));
    }

    #[tap_test]
    fn test_ssid_stops_at_nul() {
        let mut raw = [0u8; 33];
        raw[..3].copy_from_slice(b"lab");
        assert_eq!(ssid_to_string(&raw), "lab");
    }
}
