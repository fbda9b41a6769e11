//! `embedded-hal` adapters
//!
//! Lets platform code hand HAL pins and I2C peripherals straight to
//! [`Hardware`](crate::hal::Hardware).

use embedded_hal::digital::{self, StatefulOutputPin};
use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource};
use tracing::warn;

use crate::error::BusError;
use crate::hal::{Bus, OutputLine};

/// I2C peripheral bound to the controller's address
pub struct I2cBus<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> I2cBus<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

/// A missing acknowledge means the controller is not answering
fn classify(kind: ErrorKind) -> BusError {
    match kind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        | ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
        | ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown) => BusError::Unresponsive,
        ErrorKind::ArbitrationLoss => BusError::ArbitrationLost,
        other => BusError::Other(format!("{:?}", other)),
    }
}

impl<I: I2c + Send> Bus for I2cBus<I> {
    fn send(&mut self, data: &[u8]) -> Result<usize, BusError> {
        self.i2c
            .write(self.address, data)
            .map(|()| data.len())
            .map_err(|e| classify(i2c::Error::kind(&e)))
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        self.i2c
            .read(self.address, buf)
            .map(|()| buf.len())
            .map_err(|e| classify(i2c::Error::kind(&e)))
    }
}

/// HAL output pin used as a control line
pub struct PinLine<P> {
    pin: P,
    name: &'static str,
}

impl<P: StatefulOutputPin> PinLine<P> {
    pub fn new(pin: P, name: &'static str) -> Self {
        Self { pin, name }
    }
}

impl<P: StatefulOutputPin + Send> OutputLine for PinLine<P> {
    fn set(&mut self, high: bool) {
        let result = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(e) = result {
            warn!(line = self.name, "line write failed: {:?}", digital::Error::kind(&e));
        }
    }

    fn level(&mut self) -> bool {
        match self.pin.is_set_high() {
            Ok(high) => high,
            Err(e) => {
                warn!(line = self.name, "line read failed: {:?}", digital::Error::kind(&e));
                false
            }
        }
    }
}
