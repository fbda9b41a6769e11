//! Wake-retention token
//!
//! Keeps the host awake while the UART is routed to the controller. Dropping the
//! token after UART off is delayed by a grace period, and re-acquiring within the
//! grace period cancels the pending release.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::hal::WakeSource;

#[derive(Debug, Default)]
struct Token {
    held: bool,
    release_at: Option<Instant>,
    /// Bumped whenever a pending release becomes stale
    epoch: u64,
}

struct Shared {
    source: Option<Arc<dyn WakeSource>>,
    token: Mutex<Token>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Token> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_token(&self, token: &mut Token) {
        token.held = false;
        token.release_at = None;
        token.epoch += 1;
        if let Some(source) = &self.source {
            if let Err(e) = source.allow_sleep() {
                warn!("failed to release wake token: {}", e);
            }
        }
        self.changed.notify_all();
    }
}

/// Wake token with delayed release
pub struct WakeRetention {
    shared: Arc<Shared>,
}

impl WakeRetention {
    pub fn new(source: Option<Arc<dyn WakeSource>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                token: Mutex::new(Token::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Held, including during a pending grace-period release
    pub fn is_held(&self) -> bool {
        self.shared.lock().held
    }

    /// Take the token if not already held and cancel any pending release
    pub fn acquire(&self) {
        let mut token = self.shared.lock();
        if token.release_at.take().is_some() {
            token.epoch += 1;
            self.shared.changed.notify_all();
            debug!("pending wake release cancelled");
        }
        if token.held {
            return;
        }

        info!("wake lock");
        if let Some(source) = &self.shared.source {
            if let Err(e) = source.stay_awake() {
                warn!("failed to take wake token: {}", e);
            }
        }
        token.held = true;
    }

    /// Release the token once `grace` has elapsed
    pub fn release_after(&self, grace: Duration) {
        let mut token = self.shared.lock();
        if !token.held {
            return;
        }

        token.epoch += 1;
        let epoch = token.epoch;
        let deadline = Instant::now() + grace;
        token.release_at = Some(deadline);
        self.shared.changed.notify_all();
        info!("wake unlock after {:?}", grace);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("nfc-wake-grace".into())
            .spawn(move || expire(shared, epoch, deadline));
        if let Err(e) = spawned {
            warn!("cannot schedule wake release ({}), releasing now", e);
            self.shared.drop_token(&mut token);
        }
    }

    /// Release the token immediately
    pub fn release(&self) {
        let mut token = self.shared.lock();
        if token.held {
            info!("wake unlock");
            self.shared.drop_token(&mut token);
        }
    }
}

impl Drop for WakeRetention {
    fn drop(&mut self) {
        self.release();
    }
}

/// Grace-period timer body: release at `deadline` unless the epoch moved on
fn expire(shared: Arc<Shared>, epoch: u64, deadline: Instant) {
    let mut token = shared.lock();
    loop {
        if token.epoch != epoch {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        token = shared
            .changed
            .wait_timeout(token, deadline - now)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
    if token.held {
        debug!("wake grace period elapsed");
        shared.drop_token(&mut token);
    }
}
