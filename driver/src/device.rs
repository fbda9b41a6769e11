//! Device context
//!
//! One [`NfcDevice`] per physical controller. Two lock domains:
//!
//! - the operation lock (`ops`) serializes open, close, control requests, read,
//!   write and the suspend check;
//! - the readiness lock inside [`ReadinessSignal`] guards only the data-ready flag.
//!
//! The operation lock may be held while taking the readiness lock, never the
//! other way round. A reader waiting for data holds neither lock while asleep, so
//! `close` from another thread always gets through and wakes it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::control::{ControlRequest, UartState};
use crate::error::{BusError, Error, Result, TransferError};
use crate::hal::{AntennaTuner, Bus, Hardware, OutputLine, PinControl, PinState};
use crate::power::{NfcState, PowerController};
use crate::transport::{IrqHandle, Pending, Readiness, ReadinessSignal};
use crate::wake::WakeRetention;

/// Whether `read` may sleep waiting for data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Blocking,
    NonBlocking,
}

/// Diagnostic snapshot of a device context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: NfcState,
    pub readiness: Readiness,
    pub power_enable: bool,
    pub firmware_select: bool,
    pub wake_held: bool,
}

struct Inner<B, L> {
    power: PowerController<L>,
    bus: B,
    buffer: Box<[u8]>,
    wake: WakeRetention,
    pin_control: Option<Box<dyn PinControl>>,
    antenna: Option<Box<dyn AntennaTuner>>,
}

/// Driver state for one controller
///
/// Share it between threads behind an `Arc`. Dropping it detaches the device:
/// the controller is powered off, the supply rail cut and the wake token released.
pub struct NfcDevice<B: Bus, L: OutputLine> {
    ops: Mutex<Inner<B, L>>,
    readiness: Arc<ReadinessSignal>,
    config: DriverConfig,
}

impl<B: Bus, L: OutputLine> NfcDevice<B, L> {
    /// Build a device context from acquired hardware. The controller starts off.
    pub fn attach(hw: Hardware<B, L>, config: DriverConfig) -> Self {
        let Hardware {
            bus,
            lines,
            wake,
            pin_control,
            antenna,
        } = hw;

        let inner = Inner {
            power: PowerController::new(lines, config.settle_time),
            bus,
            buffer: vec![0u8; config.buffer_capacity].into_boxed_slice(),
            wake: WakeRetention::new(wake),
            pin_control,
            antenna,
        };

        info!(
            buffer = config.buffer_capacity,
            "nfc controller attached"
        );

        Self {
            ops: Mutex::new(inner),
            readiness: Arc::new(ReadinessSignal::new()),
            config,
        }
    }

    fn lock_ops(&self) -> MutexGuard<'_, Inner<B, L>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle for the data-ready interrupt
    pub fn irq_handle(&self) -> IrqHandle {
        IrqHandle::new(Arc::clone(&self.readiness))
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn state(&self) -> NfcState {
        self.lock_ops().power.state()
    }

    pub fn status(&self) -> DeviceStatus {
        let mut inner = self.lock_ops();
        DeviceStatus {
            state: inner.power.state(),
            readiness: self.readiness.current(),
            power_enable: inner.power.power_enable(),
            firmware_select: inner.power.firmware_select(),
            wake_held: inner.wake.is_held(),
        }
    }

    /// Move the power controller and keep the readiness domain in step.
    ///
    /// Called with the operation lock held and the readiness lock free.
    fn transition(&self, inner: &mut Inner<B, L>, target: NfcState, force: bool) {
        if !target.is_powered() {
            self.readiness.power_off();
        }
        if force {
            inner.power.force_state(target);
        } else {
            inner.power.set_state(target);
        }
        if target.is_powered() {
            self.readiness.power_on();
        }
    }

    /// Bus reported the controller unresponsive: power cycle into normal mode.
    fn recover(&self, inner: &mut Inner<B, L>) -> Error {
        error!("bus transfer failed, restarting controller in normal mode");
        self.transition(inner, NfcState::Normal, true);
        Error::Restart
    }

    /// Power the controller up in normal mode
    pub fn open(&self) -> Result<()> {
        let mut inner = self.lock_ops();
        if inner.power.state().is_powered() {
            error!("controller is busy");
            return Err(Error::Busy);
        }

        self.readiness.clear();
        self.transition(&mut inner, NfcState::Normal, false);
        info!("nfc controller opened");
        Ok(())
    }

    /// Power the controller off and release the wake token. Always succeeds.
    pub fn close(&self) {
        let mut inner = self.lock_ops();
        self.transition(&mut inner, NfcState::Off, true);
        inner.wake.release();
        info!("nfc controller closed");
    }

    /// Change the operating state. No-op if already in `mode`.
    pub fn set_mode(&self, mode: NfcState) -> Result<()> {
        let mut inner = self.lock_ops();
        self.transition(&mut inner, mode, false);
        Ok(())
    }

    /// Route the UART to the controller and manage the wake token
    pub fn set_uart_state(&self, uart: UartState) -> Result<()> {
        let mut inner = self.lock_ops();
        if !inner.power.state().is_powered() {
            error!("cannot route uart while the controller is off");
            return Err(Error::NotReady);
        }

        let before = inner.power.firmware_select();
        match uart {
            UartState::On => {
                inner.power.route_uart(true);
                inner.wake.acquire();
            }
            UartState::Off => {
                inner.power.route_uart(false);
                inner.wake.release_after(self.config.wake_grace);
            }
        }
        let after = inner.power.firmware_select();
        info!(%uart, before, after, "uart routing, firmware select pin");
        Ok(())
    }

    /// Execute a typed control request
    pub fn control(&self, request: ControlRequest) -> Result<()> {
        debug!(?request, "control request");
        match request {
            ControlRequest::SetMode(mode) => self.set_mode(mode),
            ControlRequest::SetUartState(uart) => self.set_uart_state(uart),
            ControlRequest::AntennaSweep => {
                let mut inner = self.lock_ops();
                match inner.antenna.as_mut() {
                    Some(antenna) => antenna.sweep(),
                    None => debug!("no antenna tuner, sweep ignored"),
                }
                Ok(())
            }
        }
    }

    /// Decode and execute a raw control request
    pub fn ioctl(&self, cmd: u32, arg: u32) -> Result<()> {
        let request = ControlRequest::decode(cmd, arg).inspect_err(|e| {
            error!("control request {:#x}/{} rejected: {}", cmd, arg, e);
        })?;
        self.control(request)
    }

    /// Read one message of up to `max_len` bytes
    pub fn read(&self, max_len: usize, mode: ReadMode) -> Result<Vec<u8>> {
        let mut inner = self.lock_ops();
        if !inner.power.state().is_powered() {
            error!("controller is not enabled");
            return Err(Error::NotReady);
        }
        let len = self.config.transfer_len(max_len).inspect_err(|_| {
            error!("wrong read size requested: {}", max_len);
        })?;
        let session = self.readiness.session();

        let edges = loop {
            match self.readiness.pending() {
                Pending::Data(edges) => break edges,
                Pending::Retry => return Err(Error::WouldBlock),
                Pending::Idle if mode == ReadMode::NonBlocking => return Err(Error::WouldBlock),
                Pending::Idle => {
                    drop(inner);
                    self.readiness.wait_for_event(session)?;
                    inner = self.lock_ops();
                    if self.readiness.session() != session || !inner.power.state().is_powered() {
                        return Err(Error::NotReady);
                    }
                    // Another reader may have drained the data meanwhile
                }
            }
        };

        let Inner { bus, buffer, .. } = &mut *inner;
        let received = bus.recv(&mut buffer[..len]);
        self.readiness.drained(edges);
        debug!(?received, len, "recv");

        match received {
            Ok(n) if n == len => Ok(buffer[..len].to_vec()),
            Ok(n) => {
                error!("read failed: return: {} count: {}", n, len);
                Err(TransferError::Short {
                    expected: len,
                    actual: n,
                }
                .into())
            }
            Err(BusError::Unresponsive) => Err(self.recover(&mut inner)),
            Err(e) => {
                error!("read failed: {}", e);
                Err(TransferError::Bus(e).into())
            }
        }
    }

    /// Send one message. Returns the number of bytes accepted.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut inner = self.lock_ops();
        if !inner.power.state().is_powered() {
            error!("controller is not enabled");
            return Err(Error::NotReady);
        }
        let len = self.config.transfer_len(data.len()).inspect_err(|_| {
            error!("wrong write size requested: {}", data.len());
        })?;

        let Inner { bus, buffer, .. } = &mut *inner;
        buffer[..len].copy_from_slice(&data[..len]);
        thread::sleep(self.config.write_delay);
        let sent = bus.send(&buffer[..len]);
        debug!(?sent, len, "send");

        match sent {
            Ok(n) if n == len => Ok(n),
            Ok(n) => {
                error!("send failed: return: {} count: {}", n, len);
                Err(TransferError::Short {
                    expected: len,
                    actual: n,
                }
                .into())
            }
            Err(BusError::Unresponsive) => Err(self.recover(&mut inner)),
            Err(e) => {
                error!("send failed: {}", e);
                Err(TransferError::Bus(e).into())
            }
        }
    }

    /// Whether a read would find data right now. Never blocks, never consumes.
    pub fn poll_readable(&self) -> bool {
        self.readiness.is_readable()
    }

    /// Wait up to `timeout` for data without consuming it
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        self.readiness.wait_readable(timeout)
    }

    /// Host suspend hook. Refused while a firmware update is running.
    pub fn suspend(&self) -> Result<()> {
        let mut inner = self.lock_ops();
        if inner.power.state() == NfcState::FirmwareUpdate {
            warn!("suspend rejected during firmware update");
            return Err(Error::SuspendRejected);
        }
        if let Some(pin_control) = inner.pin_control.as_mut() {
            pin_control.select(PinState::Suspend).inspect_err(|e| {
                error!("fail to select suspend pin state: {}", e);
            })?;
        }
        Ok(())
    }

    /// Host resume hook
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.lock_ops();
        if let Some(pin_control) = inner.pin_control.as_mut() {
            pin_control.select(PinState::Active).inspect_err(|e| {
                error!("fail to select active pin state: {}", e);
            })?;
        }
        Ok(())
    }

    /// System shutdown hook: drop the supply rail
    pub fn shutdown(&self) {
        let mut inner = self.lock_ops();
        inner.power.cut_supply();
        info!("nfc supply disabled for shutdown");
    }
}

impl<B: Bus, L: OutputLine> Drop for NfcDevice<B, L> {
    fn drop(&mut self) {
        self.readiness.power_off();
        let inner = self.ops.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.power.state().is_powered() {
            inner.power.force_state(NfcState::Off);
        }
        inner.power.cut_supply();
        inner.wake.release();
        info!("nfc controller detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ANTENNA_SWEEP, SET_MODE, SET_UART_STATE};
    use crate::mock::{
        LineEvent, LineId, LineJournal, MockAntennaTuner, MockBus, MockLine, MockPinControl,
        MockWake, SendFault, mock_lines,
    };
    use std::sync::mpsc;
    use std::time::Instant;

    type TestDevice = NfcDevice<MockBus, MockLine>;

    struct Fixture {
        device: Arc<TestDevice>,
        bus: MockBus,
        journal: LineJournal,
        wake: Arc<MockWake>,
        pins: MockPinControl,
    }

    fn fixture() -> Fixture {
        fixture_with(DriverConfig::fast(), None)
    }

    fn fixture_with(config: DriverConfig, antenna: Option<MockAntennaTuner>) -> Fixture {
        let bus = MockBus::new();
        let (lines, journal) = mock_lines();
        let wake = MockWake::new();
        let pins = MockPinControl::new();
        let mut hw = Hardware::new(bus.clone(), lines)
            .with_wake_source(wake.clone())
            .with_pin_control(Box::new(pins.clone()));
        if let Some(antenna) = antenna {
            hw = hw.with_antenna_tuner(Box::new(antenna));
        }
        let device = Arc::new(NfcDevice::attach(hw, config));
        Fixture {
            device,
            bus,
            journal,
            wake,
            pins,
        }
    }

    fn opened() -> Fixture {
        let f = fixture();
        f.device.open().unwrap();
        f.journal.clear();
        f
    }

    #[test]
    fn test_attach_starts_off() {
        let f = fixture();
        let status = f.device.status();
        assert_eq!(status.state, NfcState::Off);
        assert_eq!(status.readiness, Readiness::None);
        assert!(!status.power_enable);
        assert!(f.journal.level(LineId::SupplyEnable));
    }

    #[test]
    fn test_open_twice_is_busy() {
        let f = fixture();
        f.device.open().unwrap();
        assert_eq!(f.device.state(), NfcState::Normal);
        assert!(matches!(f.device.open(), Err(Error::Busy)));
    }

    #[test]
    fn test_open_clears_stale_readiness() {
        let f = fixture();
        f.device.irq_handle().notify_edge();
        f.device.open().unwrap();
        assert_eq!(f.device.status().readiness, Readiness::None);
        assert!(!f.device.poll_readable());
    }

    #[test]
    fn test_close_powers_off() {
        let f = opened();
        f.device.set_mode(NfcState::FirmwareUpdate).unwrap();
        f.device.close();
        let status = f.device.status();
        assert_eq!(status.state, NfcState::Off);
        assert!(!status.power_enable);
        assert!(!status.firmware_select);
    }

    #[test]
    fn test_set_mode_twice_touches_lines_once() {
        let f = opened();
        f.device.set_mode(NfcState::FirmwareUpdate).unwrap();
        let first = f.journal.events().len();
        assert!(first > 0);

        f.device.set_mode(NfcState::FirmwareUpdate).unwrap();
        assert_eq!(f.journal.events().len(), first);
    }

    #[test]
    fn test_ioctl_rejects_bad_values() {
        let f = opened();
        assert!(matches!(
            f.device.ioctl(SET_MODE, 9),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(f.device.ioctl(0x1234, 0), Err(Error::Unsupported(0x1234))));
        assert_eq!(f.device.state(), NfcState::Normal);
        assert!(f.journal.events().is_empty());

        f.device.ioctl(SET_MODE, NfcState::Off as u32).unwrap();
        assert_eq!(f.device.state(), NfcState::Off);
    }

    #[test]
    fn test_read_write_require_power() {
        let f = fixture();
        assert!(matches!(
            f.device.read(4, ReadMode::NonBlocking),
            Err(Error::NotReady)
        ));
        assert!(matches!(f.device.write(&[1, 2]), Err(Error::NotReady)));
        assert_eq!(f.bus.recv_calls() + f.bus.send_calls(), 0);
    }

    #[test]
    fn test_bad_lengths_never_touch_bus() {
        let f = opened();
        f.device.irq_handle().notify_edge();

        for len in [0, 261, 4096] {
            assert!(matches!(
                f.device.read(len, ReadMode::Blocking),
                Err(Error::InvalidArgument(_))
            ));
        }
        assert!(matches!(f.device.write(&[]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            f.device.write(&[0u8; 300]),
            Err(Error::InvalidArgument(_))
        ));

        assert_eq!(f.bus.recv_calls(), 0);
        assert_eq!(f.bus.send_calls(), 0);
        // The pending data survives the rejected reads
        assert!(f.device.poll_readable());
    }

    #[test]
    fn test_bad_length_checked_before_readiness() {
        let f = opened();
        // Nothing pending, yet the length is rejected first
        assert!(matches!(
            f.device.read(0, ReadMode::NonBlocking),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            f.device.read(261, ReadMode::NonBlocking),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            f.device.read(4, ReadMode::NonBlocking),
            Err(Error::WouldBlock)
        ));
        assert_eq!(f.bus.recv_calls(), 0);
    }

    #[test]
    fn test_nonblocking_read_without_data() {
        let f = opened();
        let start = Instant::now();
        assert!(matches!(
            f.device.read(4, ReadMode::NonBlocking),
            Err(Error::WouldBlock)
        ));
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(f.bus.recv_calls(), 0);
    }

    #[test]
    fn test_read_after_irq() {
        let f = opened();
        f.bus.queue_rx(&[0x40, 0x01, 0x02, 0x03]);
        f.device.irq_handle().notify_edge();
        assert!(f.device.poll_readable());

        let data = f.device.read(4, ReadMode::NonBlocking).unwrap();
        assert_eq!(data, vec![0x40, 0x01, 0x02, 0x03]);
        assert_eq!(f.device.status().readiness, Readiness::None);
        assert!(!f.device.poll_readable());
    }

    #[test]
    fn test_poll_does_not_consume() {
        let f = opened();
        f.device.irq_handle().notify_edge();
        assert!(f.device.poll_readable());
        assert!(f.device.poll_readable());
        assert_eq!(f.device.status().readiness, Readiness::DataReady);
    }

    #[test]
    fn test_short_read_clears_readiness() {
        let f = opened();
        f.bus.queue_rx(&[1, 2]);
        f.device.irq_handle().notify_edge();

        let err = f.device.read(4, ReadMode::Blocking).unwrap_err();
        assert!(matches!(
            err,
            Error::IoError(TransferError::Short {
                expected: 4,
                actual: 2
            })
        ));
        assert_eq!(f.device.status().readiness, Readiness::None);
        assert_eq!(f.device.state(), NfcState::Normal);
    }

    #[test]
    fn test_other_bus_error_is_io_error() {
        let f = opened();
        f.bus.queue_rx_error(BusError::Timeout);
        f.device.irq_handle().notify_edge();
        assert!(matches!(
            f.device.read(4, ReadMode::Blocking),
            Err(Error::IoError(TransferError::Bus(BusError::Timeout)))
        ));
        assert!(f.journal.events().is_empty());
    }

    #[test]
    fn test_unresponsive_read_restarts() {
        let f = opened();
        f.device.set_mode(NfcState::FirmwareUpdate).unwrap();
        f.bus.queue_rx_error(BusError::Unresponsive);
        f.device.irq_handle().notify_edge();

        assert!(matches!(
            f.device.read(4, ReadMode::Blocking),
            Err(Error::Restart)
        ));
        assert_eq!(f.device.state(), NfcState::Normal);
        assert_eq!(f.device.status().readiness, Readiness::None);

        // Healthy bus afterwards
        f.bus.queue_rx(&[5, 6, 7, 8]);
        f.device.irq_handle().notify_edge();
        assert_eq!(
            f.device.read(4, ReadMode::Blocking).unwrap(),
            vec![5, 6, 7, 8]
        );
    }

    #[test]
    fn test_unresponsive_recovery_power_cycles_even_in_normal() {
        let f = opened();
        f.bus.queue_send_fault(SendFault::Error(BusError::Unresponsive));

        assert!(matches!(f.device.write(&[1, 2, 3]), Err(Error::Restart)));
        assert_eq!(f.device.state(), NfcState::Normal);
        let events = f.journal.events();
        assert_eq!(
            events.first(),
            Some(&LineEvent {
                line: LineId::PowerEnable,
                high: false
            })
        );
        assert!(f.journal.level(LineId::PowerEnable));

        assert_eq!(f.device.write(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(f.bus.sent(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_short_write_is_io_error() {
        let f = opened();
        f.bus.queue_send_fault(SendFault::Short(2));
        assert!(matches!(
            f.device.write(&[1, 2, 3, 4]),
            Err(Error::IoError(TransferError::Short {
                expected: 4,
                actual: 2
            }))
        ));
        assert_eq!(f.bus.send_calls(), 1);
    }

    #[test]
    fn test_write_returns_length() {
        let f = opened();
        let frame: Vec<u8> = (0..260u16).map(|b| b as u8).collect();
        assert_eq!(f.device.write(&frame).unwrap(), 260);
        assert_eq!(f.bus.sent()[0], frame);
    }

    #[test]
    fn test_sequential_reads_do_not_leak() {
        let f = opened();
        let irq = f.device.irq_handle();

        f.bus.queue_rx(&[0xAA; 16]);
        irq.notify_edge();
        assert_eq!(f.device.read(16, ReadMode::Blocking).unwrap(), vec![0xAA; 16]);

        f.bus.queue_rx(&[1, 2, 3]);
        irq.notify_edge();
        assert_eq!(f.device.read(3, ReadMode::Blocking).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_retry_request_returns_would_block() {
        let f = opened();
        let irq = f.device.irq_handle();
        irq.request_retry();
        assert!(matches!(
            f.device.read(4, ReadMode::Blocking),
            Err(Error::WouldBlock)
        ));
        assert_eq!(f.device.status().readiness, Readiness::None);
    }

    #[test]
    fn test_blocked_reader_wakes_on_irq() {
        let f = opened();
        f.bus.queue_rx(&[9, 8, 7]);

        let (tx, rx) = mpsc::channel();
        let reader = {
            let device = Arc::clone(&f.device);
            thread::spawn(move || tx.send(device.read(3, ReadMode::Blocking)))
        };

        // Reader is parked, nothing delivered yet
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        f.device.irq_handle().notify_edge();
        let data = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("reader did not wake")
            .unwrap();
        assert_eq!(data, vec![9, 8, 7]);
        reader.join().unwrap().unwrap();
    }

    #[test]
    fn test_blocked_reader_released_by_close() {
        let f = opened();

        let (tx, rx) = mpsc::channel();
        let reader = {
            let device = Arc::clone(&f.device);
            thread::spawn(move || tx.send(device.read(3, ReadMode::Blocking)))
        };
        thread::sleep(Duration::from_millis(20));

        f.device.close();
        let result = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("reader outlived close");
        assert!(matches!(result, Err(Error::NotReady)));
        assert_eq!(f.bus.recv_calls(), 0);
        reader.join().unwrap().unwrap();
    }

    #[test]
    fn test_blocked_reader_released_by_close_and_reopen() {
        let config = DriverConfig {
            settle_time: Duration::ZERO,
            ..DriverConfig::fast()
        };
        for _ in 0..20 {
            let f = fixture_with(config.clone(), None);
            f.device.open().unwrap();

            let (tx, rx) = mpsc::channel();
            let reader = {
                let device = Arc::clone(&f.device);
                thread::spawn(move || tx.send(device.read(3, ReadMode::Blocking)))
            };
            thread::sleep(Duration::from_millis(10));

            // Back up before the reader gets scheduled
            f.device.close();
            f.device.open().unwrap();

            let result = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("reader outlived its session");
            assert!(matches!(result, Err(Error::NotReady)));

            // Data for the new session stays for the new session
            f.bus.queue_rx(&[1, 2, 3]);
            f.device.irq_handle().notify_edge();
            assert_eq!(
                f.device.read(3, ReadMode::NonBlocking).unwrap(),
                vec![1, 2, 3]
            );
            reader.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_antenna_sweep_reaches_tuner() {
        let antenna = MockAntennaTuner::new();
        let f = fixture_with(DriverConfig::fast(), Some(antenna.clone()));
        f.device.open().unwrap();
        f.journal.clear();

        f.device.ioctl(ANTENNA_SWEEP, 0).unwrap();
        assert_eq!(antenna.sweeps(), 1);
        assert_eq!(f.device.state(), NfcState::Normal);
        assert!(f.journal.events().is_empty());
    }

    #[test]
    fn test_antenna_sweep_without_tuner() {
        let f = opened();
        assert!(f.device.ioctl(ANTENNA_SWEEP, 0).is_ok());
        assert!(f.device.control(ControlRequest::AntennaSweep).is_ok());
        assert_eq!(f.device.state(), NfcState::Normal);
        assert!(f.journal.events().is_empty());
        assert_eq!(f.bus.send_calls() + f.bus.recv_calls(), 0);
    }

    #[test]
    fn test_blocked_reader_survives_mode_change() {
        let f = opened();
        f.bus.queue_rx(&[1]);

        let (tx, rx) = mpsc::channel();
        let reader = {
            let device = Arc::clone(&f.device);
            thread::spawn(move || tx.send(device.read(1, ReadMode::Blocking)))
        };
        thread::sleep(Duration::from_millis(20));

        // Control requests are not starved by the waiting reader
        f.device.set_mode(NfcState::FirmwareUpdate).unwrap();
        assert!(rx.try_recv().is_err());

        f.device.irq_handle().notify_edge();
        let data = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(data, vec![1]);
        reader.join().unwrap().unwrap();
    }

    #[test]
    fn test_two_readers_one_message() {
        let f = opened();
        f.bus.queue_rx(&[0x11, 0x22]);

        let (tx, rx) = mpsc::channel();
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let device = Arc::clone(&f.device);
                let tx = tx.clone();
                thread::spawn(move || tx.send(device.read(2, ReadMode::Blocking)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));

        f.device.irq_handle().notify_edge();
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(first, vec![0x11, 0x22]);
        // The other reader goes back to sleep instead of draining an empty bus
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(f.bus.recv_calls(), 1);

        f.device.close();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(second, Err(Error::NotReady)));
        for reader in readers {
            reader.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_wait_readable() {
        let f = opened();
        assert!(!f.device.wait_readable(Duration::from_millis(5)));

        let irq = f.device.irq_handle();
        let notifier = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            irq.notify_edge();
        });
        assert!(f.device.wait_readable(Duration::from_secs(2)));
        notifier.join().unwrap();
    }

    #[test]
    fn test_uart_state_manages_wake_token() {
        let f = opened();
        f.device.set_uart_state(UartState::On).unwrap();
        assert!(f.journal.level(LineId::FirmwareSelect));
        assert!(f.device.status().wake_held);
        assert_eq!(f.wake.holds(), 1);

        // Second on keeps the single token
        f.device.ioctl(SET_UART_STATE, NfcState::UartOn as u32).unwrap();
        assert_eq!(f.wake.holds(), 1);

        f.device.set_uart_state(UartState::Off).unwrap();
        assert!(!f.journal.level(LineId::FirmwareSelect));
        assert_eq!(f.device.state(), NfcState::Normal);

        let deadline = Instant::now() + Duration::from_secs(2);
        while f.device.status().wake_held && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!f.device.status().wake_held);
        assert_eq!(f.wake.releases(), 1);
    }

    #[test]
    fn test_uart_state_rejected_while_off() {
        let f = fixture();
        assert!(matches!(
            f.device.set_uart_state(UartState::On),
            Err(Error::NotReady)
        ));
        assert!(!f.journal.level(LineId::FirmwareSelect));
        assert_eq!(f.wake.holds(), 0);
    }

    #[test]
    fn test_close_releases_wake_token() {
        let f = opened();
        f.device.set_uart_state(UartState::On).unwrap();
        f.device.close();
        assert!(!f.wake.is_awake());
        assert!(!f.device.status().wake_held);
    }

    #[test]
    fn test_suspend_rejected_during_firmware_update() {
        let f = opened();
        f.device.set_mode(NfcState::FirmwareUpdate).unwrap();
        assert!(matches!(f.device.suspend(), Err(Error::SuspendRejected)));
        assert!(f.pins.selected().is_empty());

        f.device.set_mode(NfcState::Normal).unwrap();
        f.device.suspend().unwrap();
        f.device.resume().unwrap();
        assert_eq!(f.pins.selected(), vec![PinState::Suspend, PinState::Active]);
    }

    #[test]
    fn test_suspend_pin_control_failure() {
        let f = opened();
        f.pins.fail_selects(true);
        assert!(matches!(f.device.suspend(), Err(Error::PinControl(_))));
    }

    #[test]
    fn test_shutdown_cuts_supply() {
        let f = opened();
        f.device.shutdown();
        assert!(!f.journal.level(LineId::SupplyEnable));
    }

    #[test]
    fn test_drop_detaches() {
        let f = opened();
        f.device.set_uart_state(UartState::On).unwrap();
        let Fixture {
            device,
            journal,
            wake,
            ..
        } = f;
        drop(device);

        assert!(!journal.level(LineId::PowerEnable));
        assert!(!journal.level(LineId::FirmwareSelect));
        assert!(!journal.level(LineId::SupplyEnable));
        assert!(!wake.is_awake());
    }
}
