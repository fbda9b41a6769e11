//! nfcctl simulator
//!
//! Runs the driver core against a loopback controller model so the control and
//! data surfaces can be exercised without hardware.

pub mod chip;

use std::sync::Arc;
use std::time::Duration;

use nfcctl_driver::mock::{LineJournal, MockLine, MockPinControl, MockWake, mock_lines};
use nfcctl_driver::{DriverConfig, Hardware, NfcDevice};

pub use chip::{LoopbackChip, SimBus};

/// Device context wired to the loopback model
pub type SimDevice = NfcDevice<SimBus, MockLine>;

/// Delay between a frame being sent and its echo raising the interrupt
pub const RESPONSE_DELAY: Duration = Duration::from_millis(2);

/// A simulated device and handles to observe its collaborators
pub struct Bench {
    pub device: Arc<SimDevice>,
    pub chip: LoopbackChip,
    pub journal: LineJournal,
    pub wake: Arc<MockWake>,
    pub pins: MockPinControl,
}

/// Attach a device to a fresh loopback chip
pub fn bench(config: DriverConfig) -> Bench {
    let (lines, journal) = mock_lines();
    let chip = LoopbackChip::new(&lines, RESPONSE_DELAY);
    let wake = MockWake::new();
    let pins = MockPinControl::new();

    let hw = Hardware::new(chip.bus(), lines)
        .with_wake_source(wake.clone())
        .with_pin_control(Box::new(pins.clone()));
    let device = Arc::new(NfcDevice::attach(hw, config));
    chip.connect_irq(device.irq_handle());

    Bench {
        device,
        chip,
        journal,
        wake,
        pins,
    }
}
