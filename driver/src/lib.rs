//! nfcctl driver core
//!
//! Control and data path for an NFC controller attached over a byte-oriented bus
//! (typically I2C) with three control lines and one data-ready interrupt.
//!
//! - [`power`] sequences the power-enable and firmware-select lines with settle delays.
//! - [`transport`] owns the readiness flag that the interrupt path sets and readers wait on.
//! - [`device`] ties both together behind the operation lock and exposes
//!   open/close/control/read/write/poll plus suspend and resume hooks.
//!
//! Hardware is reached only through the traits in [`hal`]; [`embedded`] adapts
//! `embedded-hal` pins and I2C buses to them.

pub mod config;
pub mod control;
pub mod device;
pub mod embedded;
pub mod error;
pub mod hal;
pub mod power;
pub mod transport;
pub mod wake;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::DriverConfig;
pub use control::{ControlRequest, UartState};
pub use device::{DeviceStatus, NfcDevice, ReadMode};
pub use error::{BusError, Error, Result, TransferError};
pub use hal::{Bus, ControlLines, Hardware, OutputLine, PinControl, PinState, WakeSource};
pub use power::NfcState;
pub use transport::{IrqHandle, Readiness};
