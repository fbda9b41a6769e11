//! Driver error types

use thiserror::Error;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the device context
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Bad mode value or transfer length. No state was changed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The controller is powered off
    #[error("controller is not enabled")]
    NotReady,

    /// `open` while the controller is already running
    #[error("controller is busy")]
    Busy,

    /// Non-blocking read with nothing pending
    #[error("no data pending, try again")]
    WouldBlock,

    /// Bus transfer failed without triggering recovery
    #[error("bus transfer failed: {0}")]
    IoError(#[from] TransferError),

    /// The controller stopped responding and has been power cycled into normal mode.
    /// The caller has to re-initialize its session.
    #[error("controller unresponsive, restarted in normal mode")]
    Restart,

    /// Unknown control request code
    #[error("unsupported control request {0:#x}")]
    Unsupported(u32),

    /// Suspend requested while a firmware update is in progress
    #[error("suspend rejected during firmware update")]
    SuspendRejected,

    /// Pin configuration hand-off failed
    #[error("pin control failed: {0}")]
    PinControl(#[from] PinControlError),
}

impl Error {
    /// Negative errno a character device would return for this error
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => -errno::EINVAL,
            Error::NotReady => -errno::ENODEV,
            Error::Busy => -errno::EBUSY,
            Error::WouldBlock => -errno::EAGAIN,
            Error::IoError(_) => -errno::EREMOTEIO,
            Error::Restart => -errno::ERESTART,
            Error::Unsupported(_) => -errno::ENOIOCTLCMD,
            Error::SuspendRejected => -errno::EPERM,
            Error::PinControl(_) => -errno::EIO,
        }
    }
}

/// Incomplete bus transfer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The bus moved fewer bytes than requested
    #[error("short transfer: {actual} of {expected} bytes")]
    Short { expected: usize, actual: usize },

    /// The bus reported a failure other than an unresponsive device
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Failures reported by a [`Bus`](crate::hal::Bus) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The device did not acknowledge. Triggers forced recovery.
    #[error("device unresponsive")]
    Unresponsive,

    /// Arbitration lost to another bus master
    #[error("arbitration lost")]
    ArbitrationLost,

    /// Transfer did not complete in time
    #[error("bus timeout")]
    Timeout,

    /// Anything else the bus controller reports
    #[error("bus fault: {0}")]
    Other(String),
}

/// Failure selecting a pin configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot select pin state {state}: {reason}")]
pub struct PinControlError {
    pub state: &'static str,
    pub reason: String,
}

/// Failure taking or dropping the wake token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wake source: {0}")]
pub struct WakeError(pub String);

/// errno values used by [`Error::errno`]
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const EIO: i32 = 5;
    pub const EAGAIN: i32 = 11;
    pub const EBUSY: i32 = 16;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const ERESTART: i32 = 85;
    pub const EREMOTEIO: i32 = 121;
    pub const ENOIOCTLCMD: i32 = 515;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NotReady.errno(), -19);
        assert_eq!(Error::WouldBlock.errno(), -11);
        assert_eq!(Error::Restart.errno(), -85);
        assert_eq!(
            Error::IoError(TransferError::Short { expected: 4, actual: 2 }).errno(),
            -121
        );
        assert_eq!(Error::Unsupported(0x99).errno(), -515);
    }

    #[test]
    fn test_bus_error_converts_to_io_error() {
        let err: Error = TransferError::from(BusError::Timeout).into();
        assert!(matches!(err, Error::IoError(TransferError::Bus(BusError::Timeout))));
        assert_eq!(err.to_string(), "bus transfer failed: bus timeout");
    }
}
