//! Turns protocol-engine events into session-state transitions and indicator
//! actions.
//!
//! The dispatcher runs on the network-service call stack, right after the
//! engine step that produced the event.  Status writes take the same lock as
//! the scheduled activities; it is awaited rather than tried so no connection
//! event is ever dropped.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command::LedCommand;
use crate::engine::{ConnectStatus, EngineEvent, SessionHandle};
use crate::indicator::IndicatorSink;
use crate::session::SessionManager;
use crate::state::{ConnectionStatus, SharedSession};

pub struct EventDispatcher<H, I> {
    session: Arc<SessionManager>,
    shared: SharedSession<H>,
    indicator: I,
}

impl<H: SessionHandle, I: IndicatorSink> EventDispatcher<H, I> {
    pub fn new(session: Arc<SessionManager>, shared: SharedSession<H>, indicator: I) -> Self {
        Self {
            session,
            shared,
            indicator,
        }
    }

    pub async fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connection(status) => self.on_connection(status).await,
            EngineEvent::Message { topic, payload } => {
                self.on_incoming_publish(&topic, payload.len());
                self.on_incoming_data(&payload);
            }
        }
    }

    /// Connection-status callback.  The only place that moves the session
    /// out of `Connecting` or `Connected`.
    pub async fn on_connection(&mut self, status: ConnectStatus) {
        let mut st = self.shared.lock().await;
        let previous = st.status;

        if status.is_accepted() {
            st.status = ConnectionStatus::Connected;
            info!(client_id = %self.session.identity(), "connected to broker");
            self.session.announce_online(&mut *st);
            self.session.subscribe_commands(&mut *st);
        } else {
            st.status = ConnectionStatus::Disconnected;
            warn!(%previous, "session down: {status}");
        }
    }

    /// Announces an inbound message.  Informational only: payloads always
    /// arrive in a single data callback.
    pub fn on_incoming_publish(&self, topic: &str, total_len: usize) {
        debug!(%topic, total_len, "incoming publish");
    }

    /// Decode a command payload and apply it immediately.
    pub fn on_incoming_data(&mut self, payload: &[u8]) {
        let cmd = LedCommand::decode(payload);
        info!(
            topic = %self.session.topics().command,
            payload = %String::from_utf8_lossy(payload),
            command = %cmd,
            "command received"
        );
        self.indicator.apply(cmd);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
