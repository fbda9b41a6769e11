//! Readiness signalling between the interrupt path and readers
//!
//! The readiness lock guards only the flag below. The interrupt path takes it on
//! its own; readers take it nested inside the operation lock or while waiting with
//! the operation lock released. It is never held across bus I/O or sleeps.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Latest interrupt-reported condition not yet consumed by a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    #[default]
    None,
    DataReady,
    RetryNeeded,
}

#[derive(Debug, Default)]
struct Flag {
    readiness: Readiness,
    /// Interrupt edges seen so far
    edges: u64,
    /// Cleared when the controller powers off so waiters give up
    powered: bool,
    /// Bumped on every power off. A waiter from an earlier session gives up
    /// even if the controller was powered up again before it ran.
    session: u64,
}

/// What a reader found when it looked at the flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    /// Data is ready; carries the edge count to hand back to [`ReadinessSignal::drained`]
    Data(u64),
    /// A retry request was consumed
    Retry,
    Idle,
}

/// Readiness flag plus its wait set
#[derive(Debug, Default)]
pub struct ReadinessSignal {
    flag: Mutex<Flag>,
    wait_set: Condvar,
}

impl ReadinessSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Flag> {
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interrupt path: data is waiting on the bus
    pub fn notify_edge(&self) {
        {
            let mut flag = self.lock();
            flag.readiness = Readiness::DataReady;
            flag.edges = flag.edges.wrapping_add(1);
        }
        self.wait_set.notify_all();
    }

    /// Ask idle readers to come back later. Pending data is left alone.
    pub fn request_retry(&self) {
        {
            let mut flag = self.lock();
            if flag.readiness == Readiness::None {
                flag.readiness = Readiness::RetryNeeded;
            }
        }
        self.wait_set.notify_all();
    }

    pub fn current(&self) -> Readiness {
        self.lock().readiness
    }

    /// Data pending on a powered controller. Does not consume anything.
    pub fn is_readable(&self) -> bool {
        let flag = self.lock();
        flag.powered && flag.readiness == Readiness::DataReady
    }

    /// Block until data is pending, the controller powers off, or `timeout` passes.
    ///
    /// Returns whether data is pending. Does not consume anything.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        let flag = self.lock();
        let (flag, _) = self
            .wait_set
            .wait_timeout_while(flag, timeout, |f| {
                f.powered && f.readiness != Readiness::DataReady
            })
            .unwrap_or_else(PoisonError::into_inner);
        flag.powered && flag.readiness == Readiness::DataReady
    }

    pub(crate) fn pending(&self) -> Pending {
        let mut flag = self.lock();
        match flag.readiness {
            Readiness::DataReady => Pending::Data(flag.edges),
            Readiness::RetryNeeded => {
                flag.readiness = Readiness::None;
                Pending::Retry
            }
            Readiness::None => Pending::Idle,
        }
    }

    /// Current power session, sampled by readers under the operation lock
    pub(crate) fn session(&self) -> u64 {
        self.lock().session
    }

    /// Sleep until something is pending. Fails with `NotReady` once the
    /// controller has been off since `session` was sampled.
    pub(crate) fn wait_for_event(&self, session: u64) -> Result<()> {
        let flag = self.lock();
        let flag = self
            .wait_set
            .wait_while(flag, |f| {
                f.session == session && f.powered && f.readiness == Readiness::None
            })
            .unwrap_or_else(PoisonError::into_inner);
        if flag.session != session || !flag.powered {
            debug!("reader woken by power off");
            return Err(Error::NotReady);
        }
        Ok(())
    }

    /// End of a drain. Clears the flag unless another edge arrived after `edges`
    /// was sampled.
    pub(crate) fn drained(&self, edges: u64) {
        let mut flag = self.lock();
        if flag.edges == edges {
            flag.readiness = Readiness::None;
        }
    }

    pub(crate) fn clear(&self) {
        self.lock().readiness = Readiness::None;
    }

    pub(crate) fn power_on(&self) {
        self.lock().powered = true;
    }

    /// Mark the controller off and release every waiter
    pub(crate) fn power_off(&self) {
        {
            let mut flag = self.lock();
            flag.powered = false;
            flag.session = flag.session.wrapping_add(1);
        }
        self.wait_set.notify_all();
    }
}

/// Handle given to the interrupt collaborator
///
/// Cheap to clone; never blocks on the operation lock.
#[derive(Debug, Clone)]
pub struct IrqHandle {
    signal: Arc<ReadinessSignal>,
}

impl IrqHandle {
    pub(crate) fn new(signal: Arc<ReadinessSignal>) -> Self {
        Self { signal }
    }

    /// The data-ready line saw an edge
    pub fn notify_edge(&self) {
        debug!("IRQ");
        self.signal.notify_edge();
    }

    /// Wake idle readers with a try-again condition
    pub fn request_retry(&self) {
        self.signal.request_retry();
    }
}
