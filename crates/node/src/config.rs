//! TOML config file loading and validation for the node.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::identity::{MAX_CLIENT_ID_LEN, SUFFIX_LEN};
use crate::indicator::RgbPins;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerSection,
    pub identity: IdentitySection,
    pub topics: TopicsSection,
    pub timing: TimingSection,
    pub link: LinkSection,
    pub sensor: SensorSection,
    pub indicator: IndicatorSection,
    pub runtime: RuntimeSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub base: String,
    /// Explicit hardware id; discovered from the link interface when unset.
    pub hardware_id: Option<String>,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            base: "BitDog_".into(),
            hardware_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TopicsSection {
    pub reading: String,
    pub status: String,
    pub command: String,
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            reading: "ha/bitdog/temp".into(),
            status: "ha/bitdog/status".into(),
            command: "ha/bitdog/led/set".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub publish_interval_ms: u64,
    pub reconnect_cooldown_ms: u64,
    pub connect_timeout_secs: u64,
    pub keep_alive_secs: u64,
    pub network_tick_ms: u64,
    pub lock_timeout_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            publish_interval_ms: 5_000,
            reconnect_cooldown_ms: 5_000,
            connect_timeout_secs: 5,
            keep_alive_secs: 60,
            network_tick_ms: 5,
            lock_timeout_ms: 10,
        }
    }
}

impl TimingSection {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn network_tick(&self) -> Duration {
        Duration::from_millis(self.network_tick_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Interface whose operstate gates connects, e.g. `wlan0`.
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Simulated on-die temperature sensor.
    #[default]
    Sim,
    /// Host thermal zone.
    Thermal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub source: SensorKind,
    /// Thermal zone file, only used by `source = "thermal"`.
    pub thermal_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IndicatorSection {
    pub red_pin: u8,
    pub green_pin: u8,
    pub blue_pin: u8,
    pub active_low: bool,
}

impl Default for IndicatorSection {
    fn default() -> Self {
        Self {
            red_pin: 13,
            green_pin: 11,
            blue_pin: 12,
            active_low: false,
        }
    }
}

impl IndicatorSection {
    pub fn pins(&self) -> RgbPins {
        RgbPins {
            red: self.red_pin,
            green: self.green_pin,
            blue: self.blue_pin,
        }
    }
}

/// How the network service and the publisher are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// Two independently spawned tasks.
    #[default]
    Spawned,
    /// One task interleaving both activities.
    Joined,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub scheduling: Scheduling,
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Longest identity base that still leaves room for the hex suffix.
const MAX_BASE_LEN: usize = MAX_CLIENT_ID_LEN - SUFFIX_LEN;

/// The network service must tick faster than this.
const MAX_NETWORK_TICK_MS: u64 = 10;

/// rumqttc rejects keep-alives below this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_broker(&mut errors);
        self.validate_identity(&mut errors);
        self.validate_topics(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_indicator(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_broker(&self, errors: &mut Vec<String>) {
        let b = &self.broker;
        if b.host.trim().is_empty() {
            errors.push("broker: host is empty".into());
        }
        if b.port == 0 {
            errors.push("broker: port must be non-zero".into());
        }
        if b.password.is_some() && b.username.is_none() {
            errors.push("broker: password given without username".into());
        }
    }

    fn validate_identity(&self, errors: &mut Vec<String>) {
        let base = &self.identity.base;
        if base.trim().is_empty() {
            errors.push("identity: base is empty".into());
        } else if base.len() > MAX_BASE_LEN {
            errors.push(format!(
                "identity: base {base:?} is {} bytes, at most {MAX_BASE_LEN} fit a \
                 {MAX_CLIENT_ID_LEN}-byte client id",
                base.len()
            ));
        }
    }

    fn validate_topics(&self, errors: &mut Vec<String>) {
        let t = &self.topics;
        let mut seen: HashSet<&str> = HashSet::new();

        for (name, topic, publish) in [
            ("reading", &t.reading, true),
            ("status", &t.status, true),
            ("command", &t.command, false),
        ] {
            if topic.trim().is_empty() {
                errors.push(format!("topics: {name} is empty"));
                continue;
            }
            if publish && (topic.contains('+') || topic.contains('#')) {
                errors.push(format!(
                    "topics: {name} {topic:?} contains a wildcard but is published to"
                ));
            }
            if !seen.insert(topic.as_str()) {
                errors.push(format!("topics: {name} {topic:?} is used by another topic"));
            }
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;

        // ── Everything must be positive ─────────────────────
        for (name, value) in [
            ("publish_interval_ms", t.publish_interval_ms),
            ("reconnect_cooldown_ms", t.reconnect_cooldown_ms),
            ("connect_timeout_secs", t.connect_timeout_secs),
            ("network_tick_ms", t.network_tick_ms),
            ("lock_timeout_ms", t.lock_timeout_ms),
        ] {
            if value == 0 {
                errors.push(format!("timing: {name} must be positive"));
            }
        }

        if t.keep_alive_secs < MIN_KEEP_ALIVE_SECS || t.keep_alive_secs > u64::from(u16::MAX) {
            errors.push(format!(
                "timing: keep_alive_secs {} out of range [{MIN_KEEP_ALIVE_SECS}, {}]",
                t.keep_alive_secs,
                u16::MAX
            ));
        }

        // ── Cadence bounds ──────────────────────────────────
        if t.network_tick_ms > MAX_NETWORK_TICK_MS {
            errors.push(format!(
                "timing: network_tick_ms {} exceeds {MAX_NETWORK_TICK_MS}",
                t.network_tick_ms
            ));
        }
        if t.network_tick_ms > 0 && t.lock_timeout_ms > t.network_tick_ms * 10 {
            errors.push(format!(
                "timing: lock_timeout_ms ({}) must not exceed 10 network ticks ({})",
                t.lock_timeout_ms,
                t.network_tick_ms * 10
            ));
        }
        if t.publish_interval_ms > 0 && t.publish_interval_ms <= t.network_tick_ms {
            errors.push(format!(
                "timing: publish_interval_ms ({}) must be longer than network_tick_ms ({})",
                t.publish_interval_ms, t.network_tick_ms
            ));
        }
    }

    fn validate_indicator(&self, errors: &mut Vec<String>) {
        let i = &self.indicator;
        let pins: HashSet<u8> = [i.red_pin, i.green_pin, i.blue_pin].into_iter().collect();
        if pins.len() != 3 {
            errors.push(format!(
                "indicator: pins must be distinct (red {}, green {}, blue {})",
                i.red_pin, i.green_pin, i.blue_pin
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config = parse(&contents).with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Parse and validate config text.
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Apply `MQTT_HOST` / `MQTT_PORT` overrides from the environment.
pub fn apply_env(config: &mut Config, host: Option<String>, port: Option<String>) -> Result<()> {
    if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
        config.broker.host = host;
    }
    if let Some(port) = port {
        config.broker.port = port
            .trim()
            .parse()
            .with_context(|| format!("invalid MQTT_PORT {port:?}"))?;
    }
    config.validate()
}

// ===========================================================================
// Tests
// ===========================================================================
