//! Seam between the session core and the MQTT protocol engine.
//!
//! The engine is split in two halves so the lock discipline can be expressed
//! in types:
//!
//! - [`SessionHandle`] is the command half (connect / publish / subscribe).
//!   It lives inside the shared session state and is only reachable through
//!   the lock guard.  Every method is a non-blocking enqueue.
//! - [`EngineDriver`] is the I/O half.  It is owned by the network-service
//!   activity and stepped *outside* the lock.  Each step yields at most one
//!   [`EngineEvent`], which the dispatcher turns into state transitions.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Connection parameters
// ---------------------------------------------------------------------------

/// MQTT delivery-assurance level, independent of the engine crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Message the broker publishes on our behalf if the session dies uncleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

/// Everything needed to open a session.  Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub endpoint: BrokerEndpoint,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub last_will: Option<LastWill>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Outcome reported by the engine's connection-status callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Broker accepted the session (CONNACK return code 0).
    Accepted,
    /// Broker refused the session with an MQTT 3.1.1 CONNACK return code.
    Refused(u8),
    /// No answer within the transport's connect timeout.
    Timeout,
    /// An established or pending session was lost.
    TransportLost(String),
}

impl ConnectStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Refused(code) => write!(f, "refused ({code}: {})", refusal_reason(*code)),
            Self::Timeout => write!(f, "timed out"),
            Self::TransportLost(why) => write!(f, "transport lost: {why}"),
        }
    }
}

/// Human-readable meaning of an MQTT 3.1.1 CONNACK return code.
pub fn refusal_reason(code: u8) -> &'static str {
    match code {
        0 => "connection accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

/// One callback-worth of engine activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Connection(ConnectStatus),
    /// An inbound publish.  The payload always arrives in one piece.
    Message { topic: String, payload: Vec<u8> },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session is not connected")]
    NotConnected,
    #[error("protocol engine has shut down")]
    Closed,
    #[error("request rejected by protocol engine: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Command half of the engine.  Calls must never block.
pub trait SessionHandle: Send {
    /// Start an asynchronous connect using `params`.  Completion is reported
    /// later as an [`EngineEvent::Connection`] from the driver.
    fn connect(&mut self, params: &ConnectParams) -> Result<(), EngineError>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), EngineError>;

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), EngineError>;
}

/// I/O half of the engine.
pub trait EngineDriver: Send {
    /// Drive network I/O once.  Returns `None` when the step produced nothing
    /// the core cares about (or when no session is armed).
    fn step(&mut self) -> impl Future<Output = Option<EngineEvent>> + Send;
}

// ===========================================================================
// Test doubles
// ===========================================================================


// ===========================================================================
// Tests
// ===========================================================================
