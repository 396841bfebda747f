//! Realtime transport
//!
//! Keeps at most one STOMP subscription alive, scoped to a single session
//! code. Unexpected drops are retried with bounded exponential backoff; when
//! the budget runs out a synthetic `CONNECTION_FAILED` event is published
//! instead.
//!
//! Every explicit operation (`connect`, `disconnect`, `force_reconnect`) bumps
//! a generation counter. Connection tasks and reconnect timers carry the
//! generation they were started under and go quiet once it is stale.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use boardbank_protocol::frame::{self, Command, Frame, HeartBeat, Inbound};
use boardbank_protocol::{session_topic, topic_destination, SessionEvent};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::error::TransportError;
use crate::socket::{Connector, Socket, WsConnector};

const SUBSCRIPTION_ID: &str = "sub-0";
const DISCONNECT_RECEIPT: &str = "disconnect-0";
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ws_url: Url,
    /// Bound on the socket dial and, separately, on the CONNECTED handshake.
    pub connect_timeout: Duration,
    /// Heart-beat intervals offered in CONNECT. Zero disables a direction.
    pub heart_beat: HeartBeat,
    /// How long a graceful teardown may take before the task is aborted.
    pub shutdown_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Subscribed { topic: String },
    Reconnecting { attempt: u32, delay: Duration },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Subscribed { .. }
        )
    }
}

/// Handle to the session-scoped push channel. Cheap to share behind `Arc`.
pub struct RealtimeTransport {
    shared: Arc<Shared>,
    /// Serializes explicit operations so a session switch finishes tearing
    /// down before the next one starts.
    ops: tokio::sync::Mutex<()>,
}

struct Shared {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
    latest: watch::Sender<Option<SessionEvent>>,
    state: watch::Sender<ConnectionState>,
    connected: watch::Sender<bool>,
}

#[derive(Default)]
struct Inner {
    session_code: Option<String>,
    generation: u64,
    /// Consecutive failed or dropped connections since the last CONNECTED.
    failures: u32,
    connection: Option<ActiveConnection>,
    reconnect: Option<JoinHandle<()>>,
}

struct ActiveConnection {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// How a connection task ended without an error
enum Exit {
    Shutdown,
    ClosedByPeer,
}

impl RealtimeTransport {
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                inner: Mutex::new(Inner::default()),
                events,
                latest: watch::Sender::new(None),
                state: watch::Sender::new(ConnectionState::Disconnected),
                connected: watch::Sender::new(false),
            }),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// Transport over a real WebSocket
    pub fn websocket(config: TransportConfig) -> Self {
        Self::new(config, Arc::new(WsConnector))
    }

    /// Bind to `session_code` and start connecting.
    ///
    /// A different bound code is fully torn down first. The same code with a
    /// live or in-flight connection is left alone.
    pub async fn connect(&self, session_code: &str) {
        let _op = self.ops.lock().await;
        let previous = {
            let mut inner = self.shared.lock();
            if inner.session_code.as_deref() == Some(session_code) && inner.connection.is_some() {
                debug!(
                    component = "transport",
                    event = "transport.connect.noop",
                    session_code = %session_code,
                    "Already bound to session"
                );
                return;
            }
            let switching = inner.session_code.as_deref() != Some(session_code);
            let previous = self.shared.detach(&mut inner);
            if switching {
                self.shared.latest.send_replace(None);
            }
            previous
        };
        self.shared.shutdown(previous).await;

        let mut inner = self.shared.lock();
        inner.session_code = Some(session_code.to_string());
        self.shared.spawn_connection(&mut inner, session_code.to_string());
        info!(
            component = "transport",
            event = "transport.bound",
            session_code = %session_code,
            "Bound transport to session"
        );
    }

    /// Tear down the subscription and socket. Idempotent.
    pub async fn disconnect(&self) {
        let _op = self.ops.lock().await;
        let previous = {
            let mut inner = self.shared.lock();
            let was_bound = inner.session_code.is_some();
            let previous = self.shared.detach(&mut inner);
            self.shared.latest.send_replace(None);
            if was_bound {
                info!(
                    component = "transport",
                    event = "transport.unbound",
                    "Disconnected transport"
                );
            }
            previous
        };
        self.shared.shutdown(previous).await;
    }

    /// Re-dial the bound session with a fresh attempt budget.
    pub async fn force_reconnect(&self) {
        let _op = self.ops.lock().await;
        let (code, previous) = {
            let mut inner = self.shared.lock();
            let Some(code) = inner.session_code.clone() else {
                return;
            };
            (code, self.shared.detach(&mut inner))
        };
        self.shared.shutdown(previous).await;

        let mut inner = self.shared.lock();
        inner.session_code = Some(code.clone());
        self.shared.spawn_connection(&mut inner, code.clone());
        info!(
            component = "transport",
            event = "transport.force_reconnect",
            session_code = %code,
            "Forced reconnect"
        );
    }

    /// Multicast stream of parsed events for the bound session.
    pub fn messages(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Most recent event for the bound session, cleared on unbind or switch.
    pub fn latest_message(&self) -> watch::Receiver<Option<SessionEvent>> {
        self.shared.latest.subscribe()
    }

    pub fn connection_status(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    pub fn session_code(&self) -> Option<String> {
        self.shared.lock().session_code.clone()
    }

    /// Publish `event` as if it had arrived from the broker.
    #[cfg(test)]
    pub(crate) fn inject(&self, event: SessionEvent) {
        let generation = self.shared.lock().generation;
        self.shared.publish(generation, event);
    }

    /// Whether a backoff timer is waiting to re-dial.
    pub fn has_pending_reconnect(&self) -> bool {
        self.shared
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for RealtimeTransport {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some(timer) = inner.reconnect.take() {
            timer.abort();
        }
        if let Some(connection) = inner.connection.take() {
            connection.task.abort();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Invalidate everything running under the current generation and hand
    /// back the live connection for graceful shutdown.
    fn detach(&self, inner: &mut Inner) -> Option<ActiveConnection> {
        inner.generation += 1;
        inner.failures = 0;
        inner.session_code = None;
        if let Some(timer) = inner.reconnect.take() {
            timer.abort();
        }
        self.connected.send_replace(false);
        self.state.send_replace(ConnectionState::Disconnected);
        inner.connection.take()
    }

    async fn shutdown(&self, previous: Option<ActiveConnection>) {
        let Some(ActiveConnection { shutdown, mut task }) = previous else {
            return;
        };
        let _ = shutdown.send(());
        if timeout(self.config.shutdown_timeout, &mut task).await.is_err() {
            warn!(
                component = "transport",
                event = "transport.shutdown.timeout",
                "Connection did not close in time, aborting"
            );
            task.abort();
        }
    }

    fn spawn_connection(self: &Arc<Self>, inner: &mut Inner, session_code: String) {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let shared = Arc::clone(self);
        let generation = inner.generation;
        let attempt = inner.failures + 1;
        self.state
            .send_replace(ConnectionState::Connecting { attempt });
        let task = tokio::spawn(async move {
            shared.run_connection(generation, session_code, shutdown_rx).await;
        });
        inner.connection = Some(ActiveConnection { shutdown, task });
    }

    fn is_current(&self, inner: &Inner, generation: u64) -> bool {
        inner.generation == generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        let inner = self.lock();
        if self.is_current(&inner, generation) {
            self.state.send_replace(state);
        }
    }

    fn on_connected(&self, generation: u64) {
        let mut inner = self.lock();
        if !self.is_current(&inner, generation) {
            return;
        }
        inner.failures = 0;
        self.connected.send_replace(true);
        self.state.send_replace(ConnectionState::Connected);
    }

    fn publish(&self, generation: u64, event: SessionEvent) {
        let inner = self.lock();
        if !self.is_current(&inner, generation) {
            return;
        }
        let _ = self.events.send(event.clone());
        self.latest.send_replace(Some(event));
    }

    async fn run_connection(
        self: Arc<Self>,
        generation: u64,
        session_code: String,
        shutdown: oneshot::Receiver<()>,
    ) {
        match self.drive(generation, &session_code, shutdown).await {
            Ok(Exit::Shutdown) => {
                debug!(
                    component = "transport",
                    event = "transport.connection.closed",
                    session_code = %session_code,
                    "Connection shut down"
                );
            }
            Ok(Exit::ClosedByPeer) => self.handle_drop(generation, "closed by peer"),
            Err(e) => self.handle_drop(generation, &e.to_string()),
        }
    }

    async fn drive(
        &self,
        generation: u64,
        session_code: &str,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<Exit, TransportError> {
        let url = &self.config.ws_url;
        let mut socket = timeout(self.config.connect_timeout, self.connector.connect(url))
            .await
            .map_err(|_| TransportError::Timeout("socket"))??;

        let host = url.host_str().unwrap_or("localhost");
        socket
            .send(Frame::connect(host, self.config.heart_beat).encode())
            .await?;
        let server_beat = timeout(self.config.connect_timeout, await_connected(socket.as_mut()))
            .await
            .map_err(|_| TransportError::Timeout("CONNECTED"))??;
        let (send_every, expect_every) = self.config.heart_beat.negotiate(server_beat);
        self.on_connected(generation);

        let topic = session_topic(session_code);
        socket
            .send(Frame::subscribe(SUBSCRIPTION_ID, &topic_destination(&topic)).encode())
            .await?;
        self.set_state(generation, ConnectionState::Subscribed { topic: topic.clone() });
        info!(
            component = "transport",
            event = "transport.subscribed",
            session_code = %session_code,
            topic = %topic,
            "Subscribed to session topic"
        );

        let mut beat = send_every.map(|every| {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let silence_limit = expect_every.map(|every| every * 2);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let _ = socket.send(Frame::unsubscribe(SUBSCRIPTION_ID).encode()).await;
                    let _ = socket.send(Frame::disconnect(DISCONNECT_RECEIPT).encode()).await;
                    let _ = socket.close().await;
                    return Ok(Exit::Shutdown);
                }
                incoming = socket.recv() => {
                    match incoming {
                        None => return Ok(Exit::ClosedByPeer),
                        Some(Err(e)) => return Err(e),
                        Some(Ok(text)) => {
                            last_seen = Instant::now();
                            self.handle_text(generation, session_code, &text)?;
                        }
                    }
                }
                _ = tick(&mut beat) => {
                    socket.send("\n".to_string()).await?;
                }
                _ = silent_for(silence_limit, last_seen) => {
                    return Err(TransportError::Timeout("heart-beat"));
                }
            }
        }
    }

    /// Route one socket message. Only broker ERROR frames end the connection.
    fn handle_text(
        &self,
        generation: u64,
        session_code: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let items = match frame::decode(text) {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    component = "transport",
                    event = "transport.frame.malformed",
                    error = %e,
                    "Dropping undecodable frame"
                );
                return Ok(());
            }
        };

        for item in items {
            let frame = match item {
                Inbound::HeartBeat => {
                    trace!(component = "transport", event = "transport.heartbeat.received");
                    continue;
                }
                Inbound::Frame(frame) => frame,
            };
            match frame.command {
                Command::Message => self.handle_message(generation, session_code, &frame.body),
                Command::Error => {
                    let message = frame
                        .header("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.body.clone());
                    return Err(TransportError::Broker(message));
                }
                other => {
                    debug!(
                        component = "transport",
                        event = "transport.frame.ignored",
                        command = other.as_str(),
                        "Ignoring frame"
                    );
                }
            }
        }
        Ok(())
    }

    fn handle_message(&self, generation: u64, session_code: &str, body: &str) {
        let event = match SessionEvent::parse(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    component = "transport",
                    event = "transport.message.malformed",
                    session_code = %session_code,
                    error = %e,
                    "Dropping malformed message"
                );
                return;
            }
        };
        if event.session_code != session_code {
            warn!(
                component = "transport",
                event = "transport.message.foreign",
                session_code = %session_code,
                message_session = %event.session_code,
                kind = %event.kind,
                "Dropping message for another session"
            );
            return;
        }
        debug!(
            component = "transport",
            event = "transport.message.received",
            session_code = %session_code,
            kind = %event.kind,
            "Received session event"
        );
        self.publish(generation, event);
    }

    /// Unexpected close or error: schedule a reconnect or give up.
    fn handle_drop(self: &Arc<Self>, generation: u64, reason: &str) {
        let mut inner = self.lock();
        if !self.is_current(&inner, generation) {
            return;
        }
        inner.connection = None;
        inner.failures += 1;
        let failures = inner.failures;
        self.connected.send_replace(false);

        let Some(session_code) = inner.session_code.clone() else {
            self.state.send_replace(ConnectionState::Disconnected);
            return;
        };

        match self.config.reconnect.delay_for(failures) {
            Some(delay) => {
                warn!(
                    component = "transport",
                    event = "transport.reconnect.scheduled",
                    session_code = %session_code,
                    reason = %reason,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "Connection lost, reconnecting"
                );
                self.state.send_replace(ConnectionState::Reconnecting {
                    attempt: failures,
                    delay,
                });
                let shared = Arc::clone(self);
                inner.reconnect = Some(tokio::spawn(async move {
                    sleep(delay).await;
                    shared.reconnect_now(generation);
                }));
            }
            None => {
                error!(
                    component = "transport",
                    event = "transport.reconnect.exhausted",
                    session_code = %session_code,
                    reason = %reason,
                    attempts = failures,
                    "Giving up on realtime connection"
                );
                inner.reconnect = None;
                self.state.send_replace(ConnectionState::Disconnected);
                let failed = SessionEvent::connection_failed(session_code, failures);
                let _ = self.events.send(failed.clone());
                self.latest.send_replace(Some(failed));
            }
        }
    }

    fn reconnect_now(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if !self.is_current(&inner, generation) {
            return;
        }
        inner.reconnect = None;
        let Some(session_code) = inner.session_code.clone() else {
            return;
        };
        self.spawn_connection(&mut inner, session_code);
    }
}

/// Wait for CONNECTED and return the server's heart-beat offer.
async fn await_connected(socket: &mut dyn Socket) -> Result<HeartBeat, TransportError> {
    loop {
        let text = match socket.recv().await {
            None => return Err(TransportError::Closed),
            Some(result) => result?,
        };
        for item in frame::decode(&text)? {
            let Inbound::Frame(frame) = item else {
                continue;
            };
            match frame.command {
                Command::Connected => {
                    return Ok(frame
                        .header("heart-beat")
                        .and_then(HeartBeat::parse)
                        .unwrap_or_default());
                }
                Command::Error => {
                    let message = frame
                        .header("message")
                        .map(str::to_string)
                        .unwrap_or(frame.body);
                    return Err(TransportError::Broker(message));
                }
                _ => {}
            }
        }
    }
}

async fn tick(beat: &mut Option<Interval>) {
    match beat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn silent_for(limit: Option<Duration>, last_seen: Instant) {
    match limit {
        Some(limit) => sleep_until(last_seen + limit).await,
        None => std::future::pending().await,
    }
}
