use anyhow::{Context, Result};
use std::{env, path::Path, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sensor_node::config::{self, Config, SensorKind};
use sensor_node::engine::{BrokerEndpoint, ConnectParams, Credentials, LastWill, Qos};
use sensor_node::identity::{HardwareId, SessionIdentity};
use sensor_node::indicator::RgbLed;
use sensor_node::link::{AlwaysReady, LinkLayer, SysfsLink, SYSFS_NET};
use sensor_node::reading::{ReadingSource, ThermalZone, DEFAULT_THERMAL_ZONE};
use sensor_node::rumqtt;
use sensor_node::scheduler::{self, NetworkService, Publisher};
use sensor_node::session::{SessionManager, Topics, STATUS_OFFLINE};
use sensor_node::state::SessionState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run().await
}

async fn run() -> Result<()> {
    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = if Path::new(&config_path).exists() {
        config::load(&config_path)?
    } else {
        info!(path = %config_path, "no config file, using defaults");
        Config::default()
    };
    config::apply_env(&mut cfg, env::var("MQTT_HOST").ok(), env::var("MQTT_PORT").ok())
        .context("invalid environment overrides")?;

    // ── Identity ────────────────────────────────────────────────────
    let hw = match &cfg.identity.hardware_id {
        Some(s) => HardwareId::parse(s)?,
        None => HardwareId::discover(Path::new(SYSFS_NET), cfg.link.interface.as_deref())?,
    };
    let identity = SessionIdentity::derive(&cfg.identity.base, &hw);
    info!(client_id = %identity, hardware_id = %hw, "using unique client id");

    // ── Indicator (starts off) ──────────────────────────────────────
    let indicator = RgbLed::new(cfg.indicator.pins(), cfg.indicator.active_low)
        .context("failed to initialise indicator")?;

    // ── Session ─────────────────────────────────────────────────────
    let topics = Topics {
        reading: cfg.topics.reading.clone(),
        status: cfg.topics.status.clone(),
        command: cfg.topics.command.clone(),
    };
    let params = ConnectParams {
        endpoint: BrokerEndpoint {
            host: cfg.broker.host.clone(),
            port: cfg.broker.port,
        },
        client_id: identity.to_string(),
        credentials: cfg.broker.username.clone().map(|username| Credentials {
            username,
            password: cfg.broker.password.clone().unwrap_or_default(),
        }),
        keep_alive: cfg.timing.keep_alive(),
        connect_timeout: cfg.timing.connect_timeout(),
        last_will: Some(LastWill {
            topic: topics.status.clone(),
            payload: STATUS_OFFLINE.as_bytes().to_vec(),
            qos: Qos::AtLeastOnce,
            retain: true,
        }),
    };
    let session = Arc::new(SessionManager::new(identity, params, topics));
    let (handle, driver) = rumqtt::session(session.params());
    let shared = SessionState::shared(handle, cfg.timing.reconnect_cooldown());

    info!(
        broker = %session.params().endpoint,
        publish_interval_ms = cfg.timing.publish_interval_ms,
        reconnect_cooldown_ms = cfg.timing.reconnect_cooldown_ms,
        "session configured"
    );

    // ── Activities ──────────────────────────────────────────────────
    let link: Box<dyn LinkLayer> = match &cfg.link.interface {
        Some(iface) => Box::new(SysfsLink::new(iface)),
        None => Box::new(AlwaysReady),
    };
    let network = NetworkService::new(
        Arc::clone(&session),
        shared.clone(),
        driver,
        indicator,
        link,
        cfg.timing.network_tick(),
        cfg.timing.lock_timeout(),
    );
    let publisher = Publisher::new(
        session,
        shared,
        reading_source(&cfg)?,
        cfg.timing.publish_interval(),
        cfg.timing.lock_timeout(),
    );

    tokio::select! {
        res = scheduler::run(network, publisher, cfg.runtime.scheduling) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

fn reading_source(cfg: &Config) -> Result<Box<dyn ReadingSource>> {
    match cfg.sensor.source {
        SensorKind::Thermal => {
            let path = cfg
                .sensor
                .thermal_path
                .clone()
                .unwrap_or_else(|| DEFAULT_THERMAL_ZONE.to_string());
            info!(%path, "reading source: thermal zone");
            Ok(Box::new(ThermalZone::new(path)))
        }
        #[cfg(feature = "sim")]
        SensorKind::Sim => {
            info!("reading source: simulated die temperature");
            Ok(Box::new(sensor_node::sim::DieTemperatureSim::default()))
        }
        #[cfg(not(feature = "sim"))]
        SensorKind::Sim => anyhow::bail!("sensor.source = \"sim\" needs the `sim` feature"),
    }
}
