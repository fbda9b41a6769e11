//! Fixed sizes and timings of the controller.
//!
//! None of these are negotiated with the device. [`DriverConfig`] carries them into a
//! device context so benches and tests can run with a shorter timing profile.

use std::time::Duration;

use crate::error::{Error, Result};

/// Time a control line needs before the controller samples it.
pub const SETTLE_TIME: Duration = Duration::from_millis(100);

/// Bus quiet time required before every send.
pub const WRITE_DELAY: Duration = Duration::from_micros(600);

/// How long the wake token outlives a UART-off request.
pub const WAKE_GRACE: Duration = Duration::from_secs(2);

/// Smallest message the controller accepts.
pub const MIN_MESSAGE_SIZE: usize = 1;

/// Largest message: 256 payload bytes plus a 4 byte header.
pub const MAX_MESSAGE_SIZE: usize = 256 + 4;

/// Capacity of the transfer buffer allocated at attach time.
pub const BUFFER_CAPACITY: usize = 512;

/// Timing and size profile of a device context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Delay after each line sequencing phase
    pub settle_time: Duration,
    /// Delay between copying a message and sending it
    pub write_delay: Duration,
    /// Wake token grace period after UART off
    pub wake_grace: Duration,
    /// Inclusive lower message bound
    pub min_message_size: usize,
    /// Inclusive upper message bound
    pub max_message_size: usize,
    /// Transfer buffer capacity
    pub buffer_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            settle_time: SETTLE_TIME,
            write_delay: WRITE_DELAY,
            wake_grace: WAKE_GRACE,
            min_message_size: MIN_MESSAGE_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            buffer_capacity: BUFFER_CAPACITY,
        }
    }
}

impl DriverConfig {
    /// Short timings for simulated hardware. Sizes are unchanged.
    pub fn fast() -> Self {
        Self {
            settle_time: Duration::from_millis(1),
            write_delay: Duration::from_micros(50),
            wake_grace: Duration::from_millis(50),
            ..Self::default()
        }
    }

    /// Clamp a requested transfer length to the buffer and check it against the
    /// message bounds.
    pub fn transfer_len(&self, requested: usize) -> Result<usize> {
        let len = requested.min(self.buffer_capacity);
        if len < self.min_message_size || len > self.max_message_size {
            return Err(Error::InvalidArgument(format!(
                "transfer length {} outside {}..={}",
                requested, self.min_message_size, self.max_message_size
            )));
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_constants() {
        let config = DriverConfig::default();
        assert_eq!(config.settle_time, SETTLE_TIME);
        assert_eq!(config.max_message_size, 260);
        assert!(config.max_message_size <= config.buffer_capacity);
    }

    #[test]
    fn test_transfer_len_bounds() {
        let config = DriverConfig::default();
        assert_eq!(config.transfer_len(1).unwrap(), 1);
        assert_eq!(config.transfer_len(260).unwrap(), 260);
        assert!(matches!(config.transfer_len(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(config.transfer_len(261), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_transfer_len_clamps_before_checking() {
        // A tiny buffer clamps an oversized request down into the valid range
        let config = DriverConfig {
            buffer_capacity: 8,
            ..DriverConfig::default()
        };
        assert_eq!(config.transfer_len(4096).unwrap(), 8);

        // With the default buffer the clamped length is still above the maximum
        assert!(DriverConfig::default().transfer_len(4096).is_err());
    }
}
