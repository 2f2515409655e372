//! The two periodic activities sharing the session:
//!
//! - **network service** — reconnect decision under the lock, then one
//!   engine I/O step outside it, then dispatch of whatever the step
//!   produced.  The tight cadence only holds while the session is down: a
//!   connected or connecting engine step waits for broker traffic, the
//!   keep-alive or the connect timeout before returning.
//! - **publisher** — slow cadence; publishes the current reading when the
//!   session is connected, logs and skips otherwise.
//!
//! ```text
//! Disconnected ──[connect(), link ready]──▶ Connecting ──[accepted]──▶ Connected
//!      ▲                                        │                          │
//!      └──────────[refused / timeout]───────────┘                          │
//!      └──────────────────[lost / non-accept status]───────────────────────┘
//! ```
//!
//! Both activities acquire the lock with a short timeout and simply miss the
//! tick when it is busy.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::Scheduling;
use crate::dispatcher::EventDispatcher;
use crate::engine::{EngineDriver, Qos, SessionHandle};
use crate::indicator::IndicatorSink;
use crate::link::LinkLayer;
use crate::reading::{format_reading, ReadingSource};
use crate::session::SessionManager;
use crate::state::{try_lock_for, ConnectionStatus, SharedSession};

// ---------------------------------------------------------------------------
// Network service
// ---------------------------------------------------------------------------

pub struct NetworkService<H, D, I, L> {
    session: Arc<SessionManager>,
    shared: SharedSession<H>,
    driver: D,
    dispatcher: EventDispatcher<H, I>,
    link: L,
    cadence: Duration,
    lock_timeout: Duration,
}

impl<H, D, I, L> NetworkService<H, D, I, L>
where
    H: SessionHandle,
    D: EngineDriver,
    I: IndicatorSink,
    L: LinkLayer,
{
    pub fn new(
        session: Arc<SessionManager>,
        shared: SharedSession<H>,
        driver: D,
        indicator: I,
        link: L,
        cadence: Duration,
        lock_timeout: Duration,
    ) -> Self {
        let dispatcher = EventDispatcher::new(Arc::clone(&session), shared.clone(), indicator);
        Self {
            session,
            shared,
            driver,
            dispatcher,
            link,
            cadence,
            lock_timeout,
        }
    }

    /// One network tick.
    ///
    /// Returns right away while the engine is idle.  Once a connect is in
    /// flight the engine step may block until the next broker event.
    pub async fn tick(&mut self) {
        match try_lock_for(&self.shared, self.lock_timeout).await {
            Some(mut st) => {
                self.session.maintain(&mut *st, &self.link, Instant::now());
            }
            None => trace!("network tick: session lock busy"),
        }

        // Lock released: I/O may take a while and must not stall the publisher.
        if let Some(event) = self.driver.step().await {
            self.dispatcher.dispatch(event).await;
        }
    }

    /// Run forever.  `cadence` paces the loop while the session is down.
    pub async fn run(mut self) {
        let mut ticker = interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            tick_ms = self.cadence.as_millis() as u64,
            "network service started"
        );

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// What a publisher tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(String),
    NotConnected,
    InvalidReading,
    Rejected,
    LockBusy,
}

pub struct Publisher<H, R> {
    session: Arc<SessionManager>,
    shared: SharedSession<H>,
    source: R,
    interval: Duration,
    lock_timeout: Duration,
}

impl<H: SessionHandle, R: ReadingSource> Publisher<H, R> {
    pub fn new(
        session: Arc<SessionManager>,
        shared: SharedSession<H>,
        source: R,
        interval: Duration,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            session,
            shared,
            source,
            interval,
            lock_timeout,
        }
    }

    /// One publisher tick.
    pub async fn tick(&mut self) -> PublishOutcome {
        // Sampled outside the lock: sources may block on file I/O.
        let value = self.source.read();

        let Some(mut st) = try_lock_for(&self.shared, self.lock_timeout).await else {
            trace!("publisher tick: session lock busy");
            return PublishOutcome::LockBusy;
        };

        if st.status() != ConnectionStatus::Connected {
            info!(status = %st.status(), "not connected, skipping publish");
            return PublishOutcome::NotConnected;
        }

        let Some(payload) = format_reading(value) else {
            warn!(%value, "reading is not a finite number, skipping publish");
            return PublishOutcome::InvalidReading;
        };

        let topic = &self.session.topics().reading;
        match self
            .session
            .publish(&mut *st, topic, payload.as_bytes(), Qos::AtLeastOnce, false)
        {
            Ok(()) => {
                info!(%topic, %payload, "reading published");
                PublishOutcome::Published(payload)
            }
            Err(e) => {
                warn!(%topic, "publish failed: {e}");
                PublishOutcome::Rejected
            }
        }
    }

    /// Run forever; the first publish happens one interval after start.
    pub async fn run(mut self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // `interval` fires immediately; consume that first tick.
        ticker.tick().await;
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "publisher started"
        );

        loop {
            ticker.tick().await;
            let outcome = self.tick().await;
            debug!(?outcome, "publisher tick");
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run both activities until the process exits.
pub async fn run<H, D, I, L, R>(
    network: NetworkService<H, D, I, L>,
    publisher: Publisher<H, R>,
    mode: Scheduling,
) -> anyhow::Result<()>
where
    H: SessionHandle + 'static,
    D: EngineDriver + 'static,
    I: IndicatorSink + 'static,
    L: LinkLayer + 'static,
    R: ReadingSource + 'static,
{
    info!(?mode, "starting activities");
    match mode {
        Scheduling::Spawned => {
            let net = tokio::spawn(network.run());
            let publ = tokio::spawn(publisher.run());
            tokio::try_join!(net, publ)?;
        }
        Scheduling::Joined => {
            tokio::join!(network.run(), publisher.run());
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::LedCommand;
    use crate::engine::testing::{Call, FakeDriver, FakeHandle};
    use crate::engine::{ConnectStatus, EngineEvent};
    use crate::indicator::testing::RecordingIndicator;
    use crate::session::testing::{manager, FixedLink};
    use crate::state::SessionState;
    use std::sync::atomic::{AtomicBool, Ordering};

    const COOLDOWN: Duration = Duration::from_secs(5);
    const TICK: Duration = Duration::from_millis(5);
    const LOCK: Duration = Duration::from_millis(10);

    /// Reading source returning a fixed value.
    struct Fixed(f32);

    impl ReadingSource for Fixed {
        fn read(&mut self) -> f32 {
            self.0
        }
    }

    struct Rig {
        fake: FakeHandle,
        driver: FakeDriver,
        led: RecordingIndicator,
        shared: SharedSession<FakeHandle>,
        network: NetworkService<FakeHandle, FakeDriver, RecordingIndicator, FixedLink>,
        publisher: Publisher<FakeHandle, Fixed>,
    }

    fn rig(link_ready: bool, reading: f32) -> Rig {
        let fake = FakeHandle::default();
        let driver = FakeDriver::default();
        let led = RecordingIndicator::default();
        let session = Arc::new(manager());
        let shared = SessionState::shared(fake.clone(), COOLDOWN);
        let network = NetworkService::new(
            Arc::clone(&session),
            shared.clone(),
            driver.clone(),
            led.clone(),
            FixedLink(link_ready),
            TICK,
            LOCK,
        );
        let publisher = Publisher::new(session, shared.clone(), Fixed(reading), COOLDOWN, LOCK);
        Rig {
            fake,
            driver,
            led,
            shared,
            network,
            publisher,
        }
    }

    async fn status(rig: &Rig) -> ConnectionStatus {
        rig.shared.lock().await.status()
    }

    // -- network service --------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn disconnected_tick_connects_once() {
        let mut r = rig(true, 23.45);
        r.network.tick().await;
        assert_eq!(r.fake.connects(), 1);
        assert_eq!(status(&r).await, ConnectionStatus::Connecting);

        // Still connecting: further ticks do not reconnect.
        for _ in 0..10 {
            r.network.tick().await;
        }
        assert_eq!(r.fake.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_down_defers_connect() {
        let mut r = rig(false, 23.45);
        r.network.tick().await;
        assert_eq!(r.fake.connects(), 0);
        assert_eq!(status(&r).await, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn io_step_runs_every_tick() {
        let mut r = rig(true, 23.45);
        for _ in 0..3 {
            r.network.tick().await;
        }
        assert_eq!(r.driver.steps(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn io_step_runs_when_lock_busy() {
        let mut r = rig(true, 23.45);
        let held = r.shared.clone();
        let _guard = held.lock().await;
        r.network.tick().await;
        assert_eq!(r.driver.steps(), 1);
        assert_eq!(r.fake.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_event_connects_and_subscribes() {
        let mut r = rig(true, 23.45);
        r.network.tick().await;
        r.driver
            .push(EngineEvent::Connection(ConnectStatus::Accepted));
        r.network.tick().await;

        assert_eq!(status(&r).await, ConnectionStatus::Connected);
        assert_eq!(
            r.fake.publishes_to("ha/bitdog/status"),
            vec![Call::Publish {
                topic: "ha/bitdog/status".into(),
                payload: "online".into(),
                qos: Qos::AtLeastOnce,
                retain: true,
            }]
        );
        assert!(r.fake.calls().contains(&Call::Subscribe {
            topic: "ha/bitdog/led/set".into(),
            qos: Qos::AtLeastOnce,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_command_drives_indicator() {
        let mut r = rig(true, 23.45);
        r.driver.push(EngineEvent::Message {
            topic: "ha/bitdog/led/set".into(),
            payload: b"12".to_vec(),
        });
        r.network.tick().await;
        assert_eq!(r.led.applied(), vec![LedCommand::Blue]);
    }

    #[tokio::test(start_paused = true)]
    async fn loss_reconnects_only_after_cooldown() {
        let mut r = rig(true, 23.45);
        r.network.tick().await; // connect #1
        r.driver
            .push(EngineEvent::Connection(ConnectStatus::Accepted));
        r.network.tick().await;
        assert_eq!(status(&r).await, ConnectionStatus::Connected);

        r.driver.push(EngineEvent::Connection(ConnectStatus::TransportLost(
            "reset".into(),
        )));
        r.network.tick().await;
        assert_eq!(status(&r).await, ConnectionStatus::Disconnected);

        // Just short of the cooldown measured from the first attempt.
        tokio::time::advance(COOLDOWN - Duration::from_millis(1)).await;
        r.network.tick().await;
        assert_eq!(r.fake.connects(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        r.network.tick().await;
        assert_eq!(r.fake.connects(), 2);
        assert_eq!(status(&r).await, ConnectionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connect_retries_once_per_cooldown() {
        let mut r = rig(true, 23.45);
        for _ in 0..5 {
            r.network.tick().await;
            r.driver
                .push(EngineEvent::Connection(ConnectStatus::Refused(3)));
            r.network.tick().await;
            assert_eq!(status(&r).await, ConnectionStatus::Disconnected);

            // Hammer the service inside the window.
            for _ in 0..20 {
                tokio::time::advance(Duration::from_millis(200)).await;
                r.network.tick().await;
            }
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // One connect per 5 s window: 5 windows, 5 attempts.
        assert_eq!(r.fake.connects(), 5);
    }

    // -- publisher --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn connected_tick_publishes_formatted_reading() {
        let mut r = rig(true, 23.456);
        r.shared.lock().await.status = ConnectionStatus::Connected;

        let outcome = r.publisher.tick().await;
        assert_eq!(outcome, PublishOutcome::Published("23.46".into()));
        assert_eq!(
            r.fake.publishes_to("ha/bitdog/temp"),
            vec![Call::Publish {
                topic: "ha/bitdog/temp".into(),
                payload: "23.46".into(),
                qos: Qos::AtLeastOnce,
                retain: false,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_tick_skips() {
        let mut r = rig(true, 23.45);
        assert_eq!(r.publisher.tick().await, PublishOutcome::NotConnected);
        assert!(r.fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_tick_skips() {
        let mut r = rig(true, 23.45);
        r.shared.lock().await.status = ConnectionStatus::Connecting;
        assert_eq!(r.publisher.tick().await, PublishOutcome::NotConnected);
        assert!(r.fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_finite_reading_is_not_published() {
        let mut r = rig(true, f32::NAN);
        r.shared.lock().await.status = ConnectionStatus::Connected;
        assert_eq!(r.publisher.tick().await, PublishOutcome::InvalidReading);
        assert!(r.fake.calls().is_empty());
    }

    /// Records whether the session lock was free while sampling.
    struct LockAwareSource {
        shared: SharedSession<FakeHandle>,
        lock_free: Arc<AtomicBool>,
    }

    impl ReadingSource for LockAwareSource {
        fn read(&mut self) -> f32 {
            self.lock_free
                .store(self.shared.try_lock().is_ok(), Ordering::SeqCst);
            20.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reading_is_sampled_outside_the_lock() {
        let r = rig(true, 0.0);
        r.shared.lock().await.status = ConnectionStatus::Connected;
        let lock_free = Arc::new(AtomicBool::new(false));
        let source = LockAwareSource {
            shared: r.shared.clone(),
            lock_free: Arc::clone(&lock_free),
        };
        let mut publisher =
            Publisher::new(Arc::new(manager()), r.shared.clone(), source, COOLDOWN, LOCK);

        assert_eq!(
            publisher.tick().await,
            PublishOutcome::Published("20.00".into())
        );
        assert!(lock_free.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_lock_skips_tick() {
        let mut r = rig(true, 23.45);
        let held = r.shared.clone();
        let mut guard = held.lock().await;
        guard.status = ConnectionStatus::Connected;
        assert_eq!(r.publisher.tick().await, PublishOutcome::LockBusy);
        drop(guard);
        assert!(r.fake.calls().is_empty());
    }

    // -- end to end -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn publishes_never_precede_connection() {
        let mut r = rig(true, 21.5);

        // Publisher fires before anything is connected.
        assert_eq!(r.publisher.tick().await, PublishOutcome::NotConnected);

        r.network.tick().await;
        assert_eq!(r.publisher.tick().await, PublishOutcome::NotConnected);

        r.driver
            .push(EngineEvent::Connection(ConnectStatus::Accepted));
        r.network.tick().await;
        assert_eq!(
            r.publisher.tick().await,
            PublishOutcome::Published("21.50".into())
        );

        r.driver.push(EngineEvent::Connection(ConnectStatus::TransportLost(
            "eof".into(),
        )));
        r.network.tick().await;
        assert_eq!(r.publisher.tick().await, PublishOutcome::NotConnected);

        assert_eq!(r.fake.publishes_to("ha/bitdog/temp").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_mode_interleaves_both_activities() {
        let r = rig(true, 22.0);
        r.driver
            .push(EngineEvent::Connection(ConnectStatus::Accepted));

        let fake = r.fake.clone();
        let handle = tokio::spawn(run(r.network, r.publisher, Scheduling::Joined));

        // Two publish intervals (COOLDOWN doubles as the publish interval).
        tokio::time::sleep(COOLDOWN * 2 + Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(fake.connects(), 1);
        assert_eq!(fake.publishes_to("ha/bitdog/temp").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_mode_runs_both_activities() {
        let r = rig(true, 22.0);
        r.driver
            .push(EngineEvent::Connection(ConnectStatus::Accepted));

        let fake = r.fake.clone();
        let handle = tokio::spawn(run(r.network, r.publisher, Scheduling::Spawned));

        tokio::time::sleep(COOLDOWN + Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(fake.connects(), 1);
        assert_eq!(fake.publishes_to("ha/bitdog/temp").len(), 1);
    }
}
