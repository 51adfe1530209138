//! CSI radio node with a serial console.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin node` (simulated radio with loopback)
//! - **ESP32**: `cargo espflash flash --bin node --features esp32 --release`
//!
//! ## Console
//!
//! Connect via serial monitor and type commands, `help` lists them:
//! - `radio_init -c 11 -s below -b 40` - Configure the radio
//! - `recv [-m <mac>] [-t <sec>]` - Print `CSI_DATA` records
//! - `ping [-t <sec>] [-r <hz>] [-m <mac>]` - Send probe frames
//! - `msg_listen` / `msg_send <text>` - Text messages

use csi_radio_esp32::console::{Command, ConsoleError, PROMPT};
use csi_radio_esp32::sink::StdoutSink;
use csi_radio_esp32::station::Station;
use log::info;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Console lines buffered between the stdin reader and the command loop.
const LINE_QUEUE_DEPTH: usize = 8;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "esp32")]
fn build_station() -> Option<Station<csi_radio_esp32::esp::EspRadio>> {
    use csi_radio_esp32::esp::{EspClock, EspRadio};
    use esp_idf_hal::peripherals::Peripherals;

    let peripherals = match Peripherals::take() {
        Ok(p) => p,
        Err(e) => {
            log::error!("Failed to take peripherals: {:?}", e);
            return None;
        }
    };
    Some(Station::new(
        Arc::new(EspRadio::new(peripherals.modem)),
        Arc::new(StdoutSink),
        Arc::new(EspClock),
    ))
}

#[cfg(not(feature = "esp32"))]
fn build_station() -> Option<Station<csi_radio_esp32::sim::SimRadio>> {
    use csi_radio_esp32::clock::MonotonicClock;
    use csi_radio_esp32::sim::SimRadio;

    Some(Station::new(
        Arc::new(SimRadio::with_loopback()),
        Arc::new(StdoutSink),
        Arc::new(MonotonicClock::new()),
    ))
}

/// Print console output.
fn print_output(msg: &str) {
    println!("{}", msg);
    let _ = std::io::stdout().flush();
}

/// Print the prompt.
fn print_prompt() {
    print!("{}", PROMPT);
    let _ = std::io::stdout().flush();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== CSI radio node starting ===");
    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host (simulated radio)");

    let Some(mut station) = build_station() else {
        return;
    };

    // Stdin is blocking; forward lines to the command loop.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_QUEUE_DEPTH);
    let _stdin_task = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    print_output("Type 'help' for commands.");
    print_prompt();

    loop {
        #[cfg(not(feature = "esp32"))]
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                print_output("\nShutting down...");
                break;
            }
            line = line_rx.recv() => line,
        };
        #[cfg(feature = "esp32")]
        let line = line_rx.recv().await;

        let Some(line) = line else {
            break;
        };

        match Command::parse(&line) {
            Ok(command) => {
                let name = command.name();
                match station.execute(command).await {
                    Ok(output) => print_output(&output),
                    Err(e) => print_output(&format!("{} failed: {}", name, e)),
                }
            }
            Err(ConsoleError::Empty) => {}
            Err(e) => print_output(&format!("Error: {}", e)),
        }
        print_prompt();
    }

    station.shutdown().await;
    info!("Shutdown complete");

    // The stdin reader may still be blocked in a read; do not wait for it.
    std::process::exit(0);
}
