//! Power and mode sequencing
//!
//! Every transition first drops both sequencing lines, then raises firmware-select
//! (firmware update only), waits, raises power-enable (any state but off) and waits
//! again. The controller therefore never sees firmware-select change while powered.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::Error;
use crate::hal::{ControlLines, OutputLine};

/// Operating state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum NfcState {
    /// Core unpowered, no transfers allowed
    #[default]
    Off = 0,
    /// Normal operation
    Normal = 1,
    /// Firmware download mode
    FirmwareUpdate = 2,
    /// UART routed to the controller
    UartOn = 3,
    /// UART released
    UartOff = 4,
}

impl NfcState {
    pub const ALL: [NfcState; 5] = [
        NfcState::Off,
        NfcState::Normal,
        NfcState::FirmwareUpdate,
        NfcState::UartOn,
        NfcState::UartOff,
    ];

    /// Whether power-enable is asserted in this state
    pub fn is_powered(self) -> bool {
        self != NfcState::Off
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NfcState::Off => "off",
            NfcState::Normal => "normal",
            NfcState::FirmwareUpdate => "firmware",
            NfcState::UartOn => "uart_on",
            NfcState::UartOff => "uart_off",
        }
    }
}

impl fmt::Display for NfcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u32> for NfcState {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        NfcState::ALL
            .get(raw as usize)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("wrong state ({raw})")))
    }
}

/// Owner of the operating state and the three control lines
///
/// Callers serialize access through the device's operation lock.
pub struct PowerController<L> {
    state: NfcState,
    lines: ControlLines<L>,
    settle_time: Duration,
}

impl<L: OutputLine> PowerController<L> {
    /// Take ownership of the lines: core off, firmware-select low, supply on.
    pub fn new(mut lines: ControlLines<L>, settle_time: Duration) -> Self {
        lines.power_enable.set(false);
        lines.firmware_select.set(false);
        lines.supply_enable.set(true);

        Self {
            state: NfcState::Off,
            lines,
            settle_time,
        }
    }

    pub fn state(&self) -> NfcState {
        self.state
    }

    /// Move to `requested` unless already there.
    ///
    /// Returns `true` if the lines were sequenced.
    pub fn set_state(&mut self, requested: NfcState) -> bool {
        if requested == self.state {
            debug!(state = %requested, "already in requested state");
            return false;
        }
        self.force_state(requested);
        true
    }

    /// Sequence the lines into `target` even if the state already matches.
    pub fn force_state(&mut self, target: NfcState) {
        debug!(from = %self.state, to = %target, "sequencing power lines");

        self.lines.power_enable.set(false);
        self.lines.firmware_select.set(false);

        if target == NfcState::FirmwareUpdate {
            self.lines.firmware_select.set(true);
        }

        thread::sleep(self.settle_time);

        if target.is_powered() {
            self.lines.power_enable.set(true);
        }

        thread::sleep(self.settle_time);

        self.state = target;
        debug!(state = %target, "power state is now");
    }

    /// Drive firmware-select directly to route the UART.
    ///
    /// Does not change the recorded state.
    pub fn route_uart(&mut self, enabled: bool) {
        self.lines.firmware_select.set(enabled);
    }

    pub fn firmware_select(&mut self) -> bool {
        self.lines.firmware_select.level()
    }

    pub fn power_enable(&mut self) -> bool {
        self.lines.power_enable.level()
    }

    /// Drop the supply rail (system shutdown / detach)
    pub fn cut_supply(&mut self) {
        self.lines.supply_enable.set(false);
    }
}
