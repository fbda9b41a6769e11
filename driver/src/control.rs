//! Control requests
//!
//! Raw request codes follow the `_IOW('S', nr, u32)` layout of the character
//! device the controller is normally exposed through.

use std::fmt;

use crate::error::{Error, Result};
use crate::power::NfcState;

const fn iow(nr: u32) -> u32 {
    const WRITE: u32 = 1 << 30;
    const SIZE: u32 = (size_of::<u32>() as u32) << 16;
    const MAGIC: u32 = (b'S' as u32) << 8;
    WRITE | SIZE | MAGIC | nr
}

/// Change the operating state; argument is a raw [`NfcState`]
pub const SET_MODE: u32 = iow(1);
/// Route the UART; argument is `UartOn` or `UartOff` as a raw [`NfcState`]
pub const SET_UART_STATE: u32 = iow(4);
/// Run the antenna tuning sweep; argument ignored
pub const ANTENNA_SWEEP: u32 = iow(5);

/// UART routing requested through [`ControlRequest::SetUartState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartState {
    On,
    Off,
}

impl fmt::Display for UartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UartState::On => f.write_str("on"),
            UartState::Off => f.write_str("off"),
        }
    }
}

impl TryFrom<NfcState> for UartState {
    type Error = Error;

    fn try_from(state: NfcState) -> Result<Self> {
        match state {
            NfcState::UartOn => Ok(UartState::On),
            NfcState::UartOff => Ok(UartState::Off),
            other => Err(Error::InvalidArgument(format!(
                "{other} is not a UART state"
            ))),
        }
    }
}

/// Typed control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    SetMode(NfcState),
    SetUartState(UartState),
    AntennaSweep,
}

impl ControlRequest {
    /// Decode a raw request code and its argument
    pub fn decode(cmd: u32, arg: u32) -> Result<Self> {
        match cmd {
            SET_MODE => Ok(ControlRequest::SetMode(NfcState::try_from(arg)?)),
            SET_UART_STATE => {
                let state = NfcState::try_from(arg)?;
                Ok(ControlRequest::SetUartState(UartState::try_from(state)?))
            }
            ANTENNA_SWEEP => Ok(ControlRequest::AntennaSweep),
            other => Err(Error::Unsupported(other)),
        }
    }
}
