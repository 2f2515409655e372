//! Session core of a sensor node: one MQTT session to a broker, a periodic
//! reading publisher, and a command topic driving a tri-colour indicator.

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod identity;
pub mod indicator;
pub mod link;
pub mod reading;
pub mod rumqtt;
pub mod scheduler;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;
pub mod state;
