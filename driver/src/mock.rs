//! Recording doubles for the hardware traits
//!
//! Clones share state, so a test can keep a handle to a line or bus after moving
//! the original into a device context.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{BusError, PinControlError, WakeError};
use crate::hal::{AntennaTuner, Bus, ControlLines, OutputLine, PinControl, PinState, WakeSource};

/// Which control line an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineId {
    PowerEnable,
    FirmwareSelect,
    SupplyEnable,
}

/// A single line write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent {
    pub line: LineId,
    pub high: bool,
}

/// Ordered log of writes across all three lines
#[derive(Debug, Clone, Default)]
pub struct LineJournal(Arc<Mutex<Vec<LineEvent>>>);

impl LineJournal {
    pub fn events(&self) -> Vec<LineEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Last level written to `line`, low if never written
    pub fn level(&self, line: LineId) -> bool {
        self.events()
            .iter()
            .rev()
            .find(|e| e.line == line)
            .is_some_and(|e| e.high)
    }

    fn push(&self, event: LineEvent) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Output line that records every write into a shared journal
#[derive(Debug, Clone)]
pub struct MockLine {
    id: LineId,
    high: Arc<AtomicBool>,
    falls: Arc<AtomicUsize>,
    journal: LineJournal,
}

impl MockLine {
    pub fn new(id: LineId, journal: LineJournal) -> Self {
        Self {
            id,
            high: Arc::new(AtomicBool::new(false)),
            falls: Arc::new(AtomicUsize::new(0)),
            journal,
        }
    }

    pub fn id(&self) -> LineId {
        self.id
    }

    /// Level as seen from the controller side
    pub fn is_high(&self) -> bool {
        self.high.load(Ordering::SeqCst)
    }

    /// High to low transitions so far
    pub fn falling_edges(&self) -> usize {
        self.falls.load(Ordering::SeqCst)
    }
}

impl OutputLine for MockLine {
    fn set(&mut self, high: bool) {
        if self.high.swap(high, Ordering::SeqCst) && !high {
            self.falls.fetch_add(1, Ordering::SeqCst);
        }
        self.journal.push(LineEvent { line: self.id, high });
    }

    fn level(&mut self) -> bool {
        self.is_high()
    }
}

/// Three fresh low lines sharing one journal
pub fn mock_lines() -> (ControlLines<MockLine>, LineJournal) {
    let journal = LineJournal::default();
    let lines = ControlLines {
        power_enable: MockLine::new(LineId::PowerEnable, journal.clone()),
        firmware_select: MockLine::new(LineId::FirmwareSelect, journal.clone()),
        supply_enable: MockLine::new(LineId::SupplyEnable, journal.clone()),
    };
    (lines, journal)
}

/// Scripted outcome of one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFault {
    Error(BusError),
    /// Accept only this many bytes
    Short(usize),
}

#[derive(Debug, Default)]
struct BusScript {
    rx: VecDeque<Result<Vec<u8>, BusError>>,
    send_faults: VecDeque<SendFault>,
    sent: Vec<Vec<u8>>,
    recv_calls: usize,
    send_calls: usize,
}

/// Bus that replays queued receive frames and records sends
///
/// A receive with nothing queued moves zero bytes.
#[derive(Debug, Clone, Default)]
pub struct MockBus(Arc<Mutex<BusScript>>);

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, BusScript> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes for the next receive
    pub fn queue_rx(&self, frame: &[u8]) {
        self.script().rx.push_back(Ok(frame.to_vec()));
    }

    /// Make the next receive fail
    pub fn queue_rx_error(&self, error: BusError) {
        self.script().rx.push_back(Err(error));
    }

    /// Make the next send fail or come up short
    pub fn queue_send_fault(&self, fault: SendFault) {
        self.script().send_faults.push_back(fault);
    }

    /// Frames accepted by successful sends
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.script().sent.clone()
    }

    pub fn recv_calls(&self) -> usize {
        self.script().recv_calls
    }

    pub fn send_calls(&self) -> usize {
        self.script().send_calls
    }
}

impl Bus for MockBus {
    fn send(&mut self, data: &[u8]) -> Result<usize, BusError> {
        let mut script = self.script();
        script.send_calls += 1;
        match script.send_faults.pop_front() {
            Some(SendFault::Error(e)) => Err(e),
            Some(SendFault::Short(n)) => Ok(n.min(data.len())),
            None => {
                script.sent.push(data.to_vec());
                Ok(data.len())
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        let mut script = self.script();
        script.recv_calls += 1;
        match script.rx.pop_front() {
            Some(Ok(frame)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }
}

/// Wake source counting acquire/release calls
#[derive(Debug, Default)]
pub struct MockWake {
    holds: AtomicUsize,
    releases: AtomicUsize,
    fail_release: AtomicBool,
}

impl MockWake {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn holds(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Held from the host's point of view
    pub fn is_awake(&self) -> bool {
        self.holds() > self.releases()
    }

    pub fn fail_releases(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

impl WakeSource for MockWake {
    fn stay_awake(&self) -> Result<(), WakeError> {
        self.holds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn allow_sleep(&self) -> Result<(), WakeError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(WakeError("release refused".into()));
        }
        Ok(())
    }
}

/// Pin control recording the selected configurations
#[derive(Debug, Clone, Default)]
pub struct MockPinControl {
    selected: Arc<Mutex<Vec<PinState>>>,
    fail: Arc<AtomicBool>,
}

impl MockPinControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Vec<PinState> {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fail_selects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl PinControl for MockPinControl {
    fn select(&mut self, state: PinState) -> Result<(), PinControlError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PinControlError {
                state: state.as_str(),
                reason: "state not found".into(),
            });
        }
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(state);
        Ok(())
    }
}

/// Antenna tuner counting sweeps
#[derive(Debug, Clone, Default)]
pub struct MockAntennaTuner {
    sweeps: Arc<AtomicUsize>,
}

impl MockAntennaTuner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }
}

impl AntennaTuner for MockAntennaTuner {
    fn sweep(&mut self) {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
    }
}
