//! nfcctl bench session
//!
//! Drives a simulated controller through a full session and logs every step.
//!
//! # Usage
//! ```bash
//! # Real settle timings (100 ms per sequencing phase)
//! cargo run -p nfcctl-sim
//!
//! # Short timings
//! cargo run -p nfcctl-sim -- --fast
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use nfcctl_driver::{DriverConfig, Error, NfcState, ReadMode, UartState};
use nfcctl_sim::{Bench, SimDevice, bench};

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let fast = args.iter().any(|a| a == "--fast" || a == "-f");
    let config = if fast {
        DriverConfig::fast()
    } else {
        DriverConfig::default()
    };

    info!("nfcctl bench session");
    info!("  settle time: {:?}", config.settle_time);
    info!(
        "  message size: {}..={} (buffer {})",
        config.min_message_size, config.max_message_size, config.buffer_capacity
    );

    let bench = bench(config);
    match run(&bench) {
        Ok(()) => info!("Session finished"),
        Err(e) => {
            error!("Session failed: {} (errno {})", e, e.errno());
            std::process::exit(1);
        }
    }
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write a frame and read its echo back
fn exchange(device: &SimDevice, frame: &[u8]) -> Result<Vec<u8>, Error> {
    let written = device.write(frame)?;
    info!("  -> {} ({} bytes)", hex(frame), written);
    let reply = device.read(frame.len(), ReadMode::Blocking)?;
    info!("  <- {}", hex(&reply));
    Ok(reply)
}

fn run(bench: &Bench) -> Result<(), Error> {
    let device = &bench.device;

    info!("[1/7] Opening controller...");
    device.open()?;
    info!("  state: {}", device.state());

    info!("[2/7] Loopback exchange...");
    exchange(device, &[0x20, 0x00, 0x01, 0x01])?;
    match device.read(4, ReadMode::NonBlocking) {
        Err(Error::WouldBlock) => info!("  nothing pending, non-blocking read would block"),
        other => warn!("  unexpected non-blocking read result: {:?}", other),
    }

    info!("[3/7] Injecting an unresponsive bus...");
    bench.chip.inject_unresponsive(1);
    match device.write(&[0x20, 0x01, 0x00]) {
        Err(Error::Restart) => info!("  restart reported, state: {}", device.state()),
        other => warn!("  unexpected write result: {:?}", other),
    }
    exchange(device, &[0x20, 0x01, 0x00])?;

    info!("[4/7] Firmware update mode...");
    device.set_mode(NfcState::FirmwareUpdate)?;
    info!("  firmware mode on chip: {}", bench.chip.in_firmware_mode());
    match device.suspend() {
        Err(Error::SuspendRejected) => info!("  suspend rejected during update"),
        other => warn!("  unexpected suspend result: {:?}", other),
    }
    device.set_mode(NfcState::Normal)?;
    device.suspend()?;
    device.resume()?;
    info!("  pin states: {:?}", bench.pins.selected());

    info!("[5/7] UART routing...");
    device.set_uart_state(UartState::On)?;
    info!("  wake held: {}", device.status().wake_held);
    device.set_uart_state(UartState::Off)?;
    thread::sleep(device.config().wake_grace + Duration::from_millis(20));
    info!("  wake held after grace: {}", device.status().wake_held);

    info!("[6/7] Closing under a blocked reader...");
    let reader = {
        let device = Arc::clone(device);
        thread::spawn(move || device.read(4, ReadMode::Blocking))
    };
    thread::sleep(Duration::from_millis(50));
    device.close();
    match reader.join() {
        Ok(Err(Error::NotReady)) => info!("  reader released with not-ready"),
        Ok(other) => warn!("  unexpected reader result: {:?}", other),
        Err(_) => warn!("  reader thread panicked"),
    }

    info!("[7/7] Shutdown...");
    device.shutdown();
    info!("  line events recorded: {}", bench.journal.events().len());

    Ok(())
}
