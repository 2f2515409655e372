//! Connect / reconnect policy and the publish / subscribe operations.
//!
//! Every operation takes the *locked* [`SessionState`] by `&mut`, so none of
//! them can run without the session lock held.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::{ConnectParams, EngineError, Qos, SessionHandle};
use crate::identity::SessionIdentity;
use crate::link::LinkLayer;
use crate::state::{ConnectionStatus, SessionState};

/// Payload announced on the status topic while the session is up.
pub const STATUS_ONLINE: &str = "online";
/// Last-will payload the broker publishes when the session dies.
pub const STATUS_OFFLINE: &str = "offline";

/// Topics the session publishes to and subscribes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub reading: String,
    pub status: String,
    pub command: String,
}

/// Immutable session configuration plus the operations on the locked state.
#[derive(Debug, Clone)]
pub struct SessionManager {
    identity: SessionIdentity,
    params: ConnectParams,
    topics: Topics,
}

impl SessionManager {
    /// `params.client_id` is overwritten with `identity`.
    pub fn new(identity: SessionIdentity, mut params: ConnectParams, topics: Topics) -> Self {
        params.client_id = identity.as_str().to_string();
        Self {
            identity,
            params,
            topics,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    // ── Reconnect policy ────────────────────────────────────────────

    /// Network-tick decision: start a connect if the session is down and the
    /// cooldown has elapsed.  Returns true when a connect was initiated.
    pub fn maintain<H: SessionHandle>(
        &self,
        st: &mut SessionState<H>,
        link: &dyn LinkLayer,
        now: Instant,
    ) -> bool {
        if st.status != ConnectionStatus::Disconnected || !st.reconnect.is_due(now) {
            return false;
        }
        st.reconnect.record_attempt(now);
        self.connect(st, link)
    }

    /// Initiate an asynchronous connect.  Never blocks.
    ///
    /// On failure the status is left as it was; the next eligible tick
    /// retries.
    pub fn connect<H: SessionHandle>(&self, st: &mut SessionState<H>, link: &dyn LinkLayer) -> bool {
        if st.status != ConnectionStatus::Disconnected {
            debug!(status = %st.status, "connect skipped, session not down");
            return false;
        }
        if !link.is_ready() {
            warn!("link not ready, connect deferred");
            return false;
        }

        match st.handle.connect(&self.params) {
            Ok(()) => {
                st.status = ConnectionStatus::Connecting;
                info!(
                    broker = %self.params.endpoint,
                    client_id = %self.identity,
                    attempt = st.reconnect.attempts(),
                    "connecting to broker"
                );
                true
            }
            Err(e) => {
                warn!(broker = %self.params.endpoint, "failed to start connection: {e}");
                false
            }
        }
    }

    // ── Traffic ─────────────────────────────────────────────────────

    /// Fire-and-forget publish.  Refused without touching the engine unless
    /// the session is connected.
    pub fn publish<H: SessionHandle>(
        &self,
        st: &mut SessionState<H>,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), EngineError> {
        if st.status != ConnectionStatus::Connected {
            return Err(EngineError::NotConnected);
        }
        st.handle.publish(topic, payload, qos, retain)
    }

    pub fn subscribe<H: SessionHandle>(
        &self,
        st: &mut SessionState<H>,
        topic: &str,
        qos: Qos,
    ) -> Result<(), EngineError> {
        st.handle.subscribe(topic, qos)
    }

    /// Retained "online" on the status topic.
    pub fn announce_online<H: SessionHandle>(&self, st: &mut SessionState<H>) {
        if let Err(e) = self.publish(
            st,
            &self.topics.status,
            STATUS_ONLINE.as_bytes(),
            Qos::AtLeastOnce,
            true,
        ) {
            warn!(topic = %self.topics.status, "online announcement failed: {e}");
        }
    }

    pub fn subscribe_commands<H: SessionHandle>(&self, st: &mut SessionState<H>) {
        match self.subscribe(st, &self.topics.command, Qos::AtLeastOnce) {
            Ok(()) => info!(topic = %self.topics.command, "subscribed to commands"),
            Err(e) => warn!(topic = %self.topics.command, "command subscription failed: {e}"),
        }
    }
}

// ===========================================================================
// Test helpers
// ===========================================================================


// ===========================================================================
// Tests
// ===========================================================================
