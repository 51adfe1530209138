//! TAP test runner binary.
//!
//! Runs all tests registered with `#[tap_test]` and prints TAP. On the host
//! an optional first argument restricts the run to modules whose path
//! contains it.
//!
//! ```bash
//! # Run on host
//! cargo run --bin device-tests --features tap-tests -- capture
//!
//! # Flash to hardware
//! cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }

    #[cfg(not(feature = "esp32"))]
    let success = {
        use csi_radio_esp32::sink::StdoutSink;
        use std::sync::Arc;

        let filter = std::env::args().nth(1);
        csi_radio_esp32::testing::run_tests(Arc::new(StdoutSink), filter.as_deref())
    };

    #[cfg(feature = "esp32")]
    {
        let _ = csi_radio_esp32::testing::run_all_tests();
        log::info!("Tests complete. Halting.");
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}
