//! Loopback controller model
//!
//! Echoes every frame it receives and raises the data-ready interrupt once the
//! echo is available. It watches the real control lines: with power-enable low it
//! stops acknowledging the bus, and a power cycle drops undelivered frames.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use nfcctl_driver::mock::MockLine;
use nfcctl_driver::{Bus, BusError, ControlLines, IrqHandle};

#[derive(Debug, Default)]
struct ChipState {
    outbox: VecDeque<Vec<u8>>,
    irq: Option<IrqHandle>,
    /// Bus transfers left to fail with a missing acknowledge
    unresponsive: usize,
    frames_in: u64,
    /// Power-enable falling edges already accounted for
    resets: usize,
}

#[derive(Debug)]
struct Shared {
    power_enable: MockLine,
    firmware_select: MockLine,
    response_delay: Duration,
    state: Mutex<ChipState>,
}

/// Simulated controller. Clones refer to the same chip.
#[derive(Debug, Clone)]
pub struct LoopbackChip {
    shared: Arc<Shared>,
}

impl LoopbackChip {
    /// Model a chip wired to `lines`; the device context keeps the lines themselves.
    pub fn new(lines: &ControlLines<MockLine>, response_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                power_enable: lines.power_enable.clone(),
                firmware_select: lines.firmware_select.clone(),
                response_delay,
                state: Mutex::new(ChipState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChipState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bus endpoint to hand to the driver
    pub fn bus(&self) -> SimBus {
        SimBus { chip: self.clone() }
    }

    /// Wire the chip's interrupt output to the driver
    pub fn connect_irq(&self, irq: IrqHandle) {
        self.state().irq = Some(irq);
    }

    /// Fail the next `count` bus transfers as if the chip had hung
    pub fn inject_unresponsive(&self, count: usize) {
        self.state().unresponsive = count;
    }

    pub fn is_powered(&self) -> bool {
        self.shared.power_enable.is_high()
    }

    pub fn in_firmware_mode(&self) -> bool {
        self.is_powered() && self.shared.firmware_select.is_high()
    }

    /// Frames echoed but not yet read back
    pub fn pending_frames(&self) -> usize {
        let mut state = self.state();
        self.observe_resets(&mut state);
        state.outbox.len()
    }

    pub fn frames_received(&self) -> u64 {
        self.state().frames_in
    }

    /// Drop undelivered frames if power-enable went low since the last look
    fn observe_resets(&self, state: &mut ChipState) {
        let resets = self.shared.power_enable.falling_edges();
        if resets != state.resets {
            if !state.outbox.is_empty() {
                debug!("chip power cycled, dropping {} frames", state.outbox.len());
            }
            state.outbox.clear();
            state.resets = resets;
        }
    }

    /// Common checks before a transfer
    fn begin_transfer(&self, state: &mut ChipState) -> Result<(), BusError> {
        self.observe_resets(state);
        if !self.is_powered() {
            return Err(BusError::Unresponsive);
        }
        if state.unresponsive > 0 {
            state.unresponsive -= 1;
            return Err(BusError::Unresponsive);
        }
        Ok(())
    }

    fn raise_irq(&self, irq: IrqHandle) {
        let delay = self.shared.response_delay;
        if delay.is_zero() {
            irq.notify_edge();
            return;
        }
        let spawned = thread::Builder::new()
            .name("sim-irq".into())
            .spawn(move || {
                thread::sleep(delay);
                irq.notify_edge();
            });
        if let Err(e) = spawned {
            warn!("cannot schedule simulated interrupt: {}", e);
        }
    }
}

/// Bus endpoint of a [`LoopbackChip`]
#[derive(Debug, Clone)]
pub struct SimBus {
    chip: LoopbackChip,
}

impl Bus for SimBus {
    fn send(&mut self, data: &[u8]) -> Result<usize, BusError> {
        let irq = {
            let mut state = self.chip.state();
            self.chip.begin_transfer(&mut state)?;
            state.frames_in += 1;
            state.outbox.push_back(data.to_vec());
            state.irq.clone()
        };

        match irq {
            Some(irq) => self.chip.raise_irq(irq),
            None => warn!("simulated chip has no interrupt line connected"),
        }
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        let mut state = self.chip.state();
        self.chip.begin_transfer(&mut state)?;

        let Some(mut frame) = state.outbox.pop_front() else {
            return Ok(0);
        };
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        if n < frame.len() {
            // Rest of the frame stays readable
            frame.drain(..n);
            state.outbox.push_front(frame);
        }
        Ok(n)
    }
}
