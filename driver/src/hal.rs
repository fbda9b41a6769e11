//! Hardware boundary traits
//!
//! The device context never touches hardware directly. Platform code hands it a
//! [`Hardware`] bundle built from these traits once line acquisition and pin
//! control negotiation have succeeded.

use std::sync::Arc;

use crate::error::{BusError, PinControlError, WakeError};

/// Byte-oriented bus to the controller
///
/// Both calls report how many bytes were actually moved. A count different from
/// the buffer length is treated as a failed transfer by the caller.
pub trait Bus: Send {
    /// Send `data` to the controller
    fn send(&mut self, data: &[u8]) -> Result<usize, BusError>;

    /// Receive up to `buf.len()` bytes from the controller
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError>;
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn send(&mut self, data: &[u8]) -> Result<usize, BusError> {
        (**self).send(data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        (**self).recv(buf)
    }
}

/// Digital output line
///
/// Writes are best effort and never fail from the caller's point of view.
pub trait OutputLine: Send {
    /// Drive the line high (`true`) or low (`false`)
    fn set(&mut self, high: bool);

    /// Current driven level
    fn level(&mut self) -> bool;
}

/// System-level wake lock
pub trait WakeSource: Send + Sync {
    /// Keep the host from suspending
    fn stay_awake(&self) -> Result<(), WakeError>;

    /// Allow the host to suspend again
    fn allow_sleep(&self) -> Result<(), WakeError>;
}

/// Pin configuration selected by the pin-control collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    /// Bus and interrupt pins routed to the controller
    Active,
    /// Low-power configuration while the host sleeps
    Suspend,
}

impl PinState {
    pub fn as_str(self) -> &'static str {
        match self {
            PinState::Active => "active",
            PinState::Suspend => "suspend",
        }
    }
}

/// Pin-control collaborator
pub trait PinControl: Send {
    fn select(&mut self, state: PinState) -> Result<(), PinControlError>;
}

/// Antenna tuning hook for the antenna sweep control request
pub trait AntennaTuner: Send {
    fn sweep(&mut self);
}

/// The three control lines, owned by the power controller
pub struct ControlLines<L> {
    /// Powers the controller core when high
    pub power_enable: L,
    /// Selects the firmware download mode (and routes the UART) when high
    pub firmware_select: L,
    /// Enables the controller's supply rail
    pub supply_enable: L,
}

/// Everything a device context needs from the platform
pub struct Hardware<B, L> {
    pub bus: B,
    pub lines: ControlLines<L>,
    pub wake: Option<Arc<dyn WakeSource>>,
    pub pin_control: Option<Box<dyn PinControl>>,
    pub antenna: Option<Box<dyn AntennaTuner>>,
}

impl<B: Bus, L: OutputLine> Hardware<B, L> {
    /// Bundle with only the mandatory collaborators
    pub fn new(bus: B, lines: ControlLines<L>) -> Self {
        Self {
            bus,
            lines,
            wake: None,
            pin_control: None,
            antenna: None,
        }
    }

    pub fn with_wake_source(mut self, wake: Arc<dyn WakeSource>) -> Self {
        self.wake = Some(wake);
        self
    }

    pub fn with_pin_control(mut self, pin_control: Box<dyn PinControl>) -> Self {
        self.pin_control = Some(pin_control);
        self
    }

    pub fn with_antenna_tuner(mut self, antenna: Box<dyn AntennaTuner>) -> Self {
        self.antenna = Some(antenna);
        self
    }
}
