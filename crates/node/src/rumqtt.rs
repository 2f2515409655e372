//! `rumqttc`-backed protocol engine.
//!
//! One `AsyncClient` / `EventLoop` pair lives for the whole process.  The
//! client half sits behind the session lock; the event loop is polled by the
//! network-service activity.  `connect()` hands fresh options to the driver
//! over a watch channel and arms it; the driver only polls while armed, and
//! disarms itself (dropping the socket) whenever the event loop errors, so a
//! reconnect happens only when the core asks for one.

use std::future::Future;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    NetworkOptions, Packet, QoS,
};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::engine::{
    ConnectParams, ConnectStatus, EngineDriver, EngineError, EngineEvent, Qos, SessionHandle,
};

/// Capacity of the client → event-loop request channel.
const REQUEST_CAPACITY: usize = 10;

/// Build the engine pair for `params`.
pub fn session(params: &ConnectParams) -> (RumqttHandle, RumqttDriver) {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(params), REQUEST_CAPACITY);

    let mut network = NetworkOptions::new();
    network.set_connection_timeout(params.connect_timeout.as_secs().max(1));
    eventloop.set_network_options(network);

    let (connect_tx, connect_rx) = watch::channel(None);

    (
        RumqttHandle { client, connect_tx },
        RumqttDriver {
            eventloop,
            connect_rx,
            armed: false,
        },
    )
}

/// Translate core connection parameters into `rumqttc` options.
pub(crate) fn mqtt_options(params: &ConnectParams) -> MqttOptions {
    let mut opts = MqttOptions::new(
        params.client_id.clone(),
        params.endpoint.host.clone(),
        params.endpoint.port,
    );
    opts.set_keep_alive(params.keep_alive);
    opts.set_clean_session(true);

    if let Some(creds) = &params.credentials {
        opts.set_credentials(creds.username.clone(), creds.password.clone());
    }
    if let Some(will) = &params.last_will {
        opts.set_last_will(rumqttc::LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            to_qos(will.qos),
            will.retain,
        ));
    }
    opts
}

fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Map an event-loop error to the status reported to the dispatcher.
fn status_from_error(err: ConnectionError) -> ConnectStatus {
    match err {
        ConnectionError::ConnectionRefused(code) => ConnectStatus::Refused(return_code(code)),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => ConnectStatus::Timeout,
        other => ConnectStatus::TransportLost(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Command half
// ---------------------------------------------------------------------------

pub struct RumqttHandle {
    client: AsyncClient,
    connect_tx: watch::Sender<Option<MqttOptions>>,
}

impl SessionHandle for RumqttHandle {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), EngineError> {
        self.connect_tx
            .send(Some(mqtt_options(params)))
            .map_err(|_| EngineError::Closed)
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), EngineError> {
        self.client
            .try_publish(topic, to_qos(qos), retain, payload.to_vec())
            .map_err(|e| EngineError::Rejected(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str, qos: Qos) -> Result<(), EngineError> {
        self.client
            .try_subscribe(topic, to_qos(qos))
            .map_err(|e| EngineError::Rejected(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// I/O half
// ---------------------------------------------------------------------------

pub struct RumqttDriver {
    eventloop: EventLoop,
    connect_rx: watch::Receiver<Option<MqttOptions>>,
    armed: bool,
}

impl RumqttDriver {
    fn take_connect_request(&mut self) {
        if !self.connect_rx.has_changed().unwrap_or(false) {
            return;
        }
        let requested = self.connect_rx.borrow_and_update().clone();
        if let Some(opts) = requested {
            self.eventloop.mqtt_options = opts;
            self.armed = true;
            debug!("engine armed for connect");
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
        // Drops the socket; queued requests are kept for the next session.
        self.eventloop.clean();
    }
}

impl EngineDriver for RumqttDriver {
    fn step(&mut self) -> impl Future<Output = Option<EngineEvent>> + Send {
        async move {
            self.take_connect_request();
            if !self.armed {
                return None;
            }

            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    let code = return_code(ack.code);
                    if code == 0 {
                        Some(EngineEvent::Connection(ConnectStatus::Accepted))
                    } else {
                        self.disarm();
                        Some(EngineEvent::Connection(ConnectStatus::Refused(code)))
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => Some(EngineEvent::Message {
                    topic: p.topic.clone(),
                    payload: p.payload.to_vec(),
                }),
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.disarm();
                    Some(EngineEvent::Connection(ConnectStatus::TransportLost(
                        "broker closed the session".into(),
                    )))
                }
                Ok(other) => {
                    trace!(event = ?other, "engine event");
                    None
                }
                Err(e) => {
                    self.disarm();
                    Some(EngineEvent::Connection(status_from_error(e)))
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
