use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout, Instant};

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

/// Session state shared between the network service, the publisher and the
/// event dispatcher.
pub type SharedSession<H> = Arc<Mutex<SessionState<H>>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Rate limit for connect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectTimer {
    cooldown: Duration,
    last_attempt: Option<Instant>,
    attempts: u32,
}

impl ReconnectTimer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_attempt: None,
            attempts: 0,
        }
    }

    /// True when no attempt has been made yet or `cooldown` has fully elapsed
    /// since the last one.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Everything guarded by the session lock.
pub struct SessionState<H> {
    pub(crate) handle: H,
    pub(crate) status: ConnectionStatus,
    pub(crate) reconnect: ReconnectTimer,
}

// ---------------------------------------------------------------------------
// Construction & access
// ---------------------------------------------------------------------------

impl<H> SessionState<H> {
    pub fn new(handle: H, cooldown: Duration) -> Self {
        Self {
            handle,
            status: ConnectionStatus::Disconnected,
            reconnect: ReconnectTimer::new(cooldown),
        }
    }

    pub fn shared(handle: H, cooldown: Duration) -> SharedSession<H> {
        Arc::new(Mutex::new(Self::new(handle, cooldown)))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn reconnect(&self) -> &ReconnectTimer {
        &self.reconnect
    }
}

/// Acquire the session lock, giving up after `wait`.
///
/// Scheduled activities use this so a busy lock costs one tick instead of
/// stalling the cadence.
pub async fn try_lock_for<H>(
    shared: &SharedSession<H>,
    wait: Duration,
) -> Option<MutexGuard<'_, SessionState<H>>> {
    timeout(wait, shared.lock()).await.ok()
}

// ===========================================================================
// Tests
// ===========================================================================
