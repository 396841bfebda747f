//! Session reconciler
//!
//! Decides, on mount and on every transport event, how to bring the local
//! store in line with the server and whether the device's cached player
//! identity still holds. Expected failures come back as [`Signal`]s rather
//! than errors; the caller decides what the user sees.

use std::sync::Arc;

use boardbank_protocol::{EventKind, PlayerColor, Session, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::CommandClient;
use crate::error::CommandError;
use crate::store::SessionStateStore;
use crate::transport::RealtimeTransport;

/// What happened to the cached player identity during a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Cached player is in the session and nothing tracked changed.
    Kept,
    /// Cached player is in the session; fresh balance/properties/host taken.
    Merged,
    /// No usable cached player; the only player in the session was adopted.
    Adopted,
    /// No identity. `evicted` is set when a cached player had to be dropped.
    Unresolved { evicted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeReason {
    NotFound,
    GameEnded,
    SessionDeleted,
}

/// Outcome of a reconciliation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Fresh snapshot accepted into the store.
    Synced { identity: Identity },
    NavigateToGame { session_code: String },
    /// Cache cleared and transport closed.
    NavigateHome { reason: HomeReason },
    /// Refetch failed for a transient reason; the cache is untouched.
    RetryLater { error: String },
    /// The transport gave up reconnecting.
    ConnectionFailed { attempts: u32 },
    Ignored,
}

impl Signal {
    /// Signals after which the session view cannot continue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Signal::NavigateHome { .. } | Signal::ConnectionFailed { .. }
        )
    }
}

/// Where the user is going when a session view is left
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveTarget {
    /// The in-progress game view of a session.
    GameView { session_code: String },
    Elsewhere,
}

pub struct SessionReconciler<C> {
    commands: Arc<C>,
    store: Arc<SessionStateStore>,
    transport: Arc<RealtimeTransport>,
}

impl<C: CommandClient> SessionReconciler<C> {
    pub fn new(
        commands: Arc<C>,
        store: Arc<SessionStateStore>,
        transport: Arc<RealtimeTransport>,
    ) -> Self {
        Self {
            commands,
            store,
            transport,
        }
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<RealtimeTransport> {
        &self.transport
    }

    pub fn commands(&self) -> &Arc<C> {
        &self.commands
    }

    /// Refresh from the server, then open the live channel.
    pub async fn mount(&self, session_code: &str) -> Signal {
        let signal = self.refresh(session_code).await;
        if matches!(signal, Signal::Synced { .. } | Signal::RetryLater { .. }) {
            self.transport.connect(session_code).await;
        }
        signal
    }

    /// Fetch the authoritative snapshot and reconcile the cached identity.
    pub async fn refresh(&self, session_code: &str) -> Signal {
        if session_code.trim().is_empty() {
            return self.abandon(HomeReason::NotFound).await;
        }
        match self.commands.fetch_session_by_code(session_code).await {
            Ok(session) => Signal::Synced {
                identity: self.accept(session),
            },
            Err(e) if e.is_not_found() => {
                info!(
                    component = "reconciler",
                    event = "reconciler.session.not_found",
                    session_code = %session_code,
                    "Session no longer exists"
                );
                self.abandon(HomeReason::NotFound).await
            }
            Err(e) => {
                warn!(
                    component = "reconciler",
                    event = "reconciler.refresh.failed",
                    session_code = %session_code,
                    error = %e,
                    "Refresh failed, keeping cached state"
                );
                Signal::RetryLater {
                    error: e.to_string(),
                }
            }
        }
    }

    /// React to one transport event for the session bound at `session_code`.
    pub async fn handle_event(&self, session_code: &str, event: &SessionEvent) -> Signal {
        if event.session_code != session_code {
            debug!(
                component = "reconciler",
                event = "reconciler.event.foreign",
                session_code = %session_code,
                message_session = %event.session_code,
                "Ignoring event for another session"
            );
            return Signal::Ignored;
        }
        debug!(
            component = "reconciler",
            event = "reconciler.event",
            session_code = %session_code,
            kind = %event.kind,
            "Handling session event"
        );

        match &event.kind {
            EventKind::PlayerJoined
            | EventKind::SessionUpdate
            | EventKind::BalanceUpdate
            | EventKind::PropertyPurchased => self.refresh(session_code).await,
            EventKind::GameStarted => {
                let signal = self.refresh(session_code).await;
                let started = self
                    .store
                    .session_snapshot()
                    .is_some_and(|s| s.session_code == session_code && s.is_in_progress());
                match signal {
                    Signal::Synced { .. } if started => Signal::NavigateToGame {
                        session_code: session_code.to_string(),
                    },
                    other => other,
                }
            }
            EventKind::GameEnded => self.abandon(HomeReason::GameEnded).await,
            EventKind::SessionDeleted => self.abandon(HomeReason::SessionDeleted).await,
            EventKind::ConnectionFailed => Signal::ConnectionFailed {
                attempts: event
                    .data
                    .get("attempts")
                    .and_then(|v| v.as_u64())
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0),
            },
            EventKind::Other(kind) => {
                debug!(
                    component = "reconciler",
                    event = "reconciler.event.unknown",
                    kind = %kind,
                    "Ignoring unrecognized event"
                );
                Signal::Ignored
            }
        }
    }

    /// Mount, then feed transport events through [`Self::handle_event`] in
    /// arrival order until a terminal signal. Every other non-ignored signal
    /// is forwarded on `signals`.
    pub async fn run(&self, session_code: &str, signals: &mpsc::UnboundedSender<Signal>) -> Signal {
        // Subscribe first so nothing published during mount is missed.
        let mut events = self.transport.messages();

        let first = self.mount(session_code).await;
        if first.is_terminal() {
            return first;
        }
        let _ = signals.send(first);

        loop {
            let signal = match events.recv().await {
                Ok(event) => self.handle_event(session_code, &event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        component = "reconciler",
                        event = "reconciler.events.lagged",
                        session_code = %session_code,
                        missed = missed,
                        "Missed events, refreshing"
                    );
                    self.refresh(session_code).await
                }
                Err(RecvError::Closed) => {
                    return Signal::ConnectionFailed { attempts: 0 };
                }
            };
            if signal.is_terminal() {
                return signal;
            }
            if signal != Signal::Ignored {
                let _ = signals.send(signal);
            }
        }
    }

    /// Leave a session view. The subscription survives only when heading to
    /// the game view of the session it is bound to.
    pub async fn leave(&self, target: &LeaveTarget) {
        if let LeaveTarget::GameView { session_code } = target {
            if self.transport.session_code().as_deref() == Some(session_code.as_str()) {
                debug!(
                    component = "reconciler",
                    event = "reconciler.leave.keep",
                    session_code = %session_code,
                    "Keeping subscription for game view"
                );
                return;
            }
        }
        self.transport.disconnect().await;
    }

    /// The user quits the session on this device.
    pub async fn exit(&self) {
        self.store.clear();
        self.transport.disconnect().await;
        info!(
            component = "reconciler",
            event = "reconciler.exit",
            "Left session and cleared cache"
        );
    }

    /// Create a session and adopt its host as the current player.
    pub async fn create_session(&self, host_name: &str) -> Result<Session, CommandError> {
        let session = self.commands.create_session(host_name).await?;
        let host = session
            .host()
            .or_else(|| session.player_by_name(host_name))
            .cloned();
        self.store.set_session(Some(session.clone()));
        self.store.set_current_player(host);
        info!(
            component = "reconciler",
            event = "reconciler.session.created",
            session_code = %session.session_code,
            "Created session"
        );
        Ok(session)
    }

    /// Join a session and adopt the player that matches `player_name`.
    pub async fn join_session(
        &self,
        session_code: &str,
        player_name: &str,
        color: PlayerColor,
    ) -> Result<Session, CommandError> {
        let session = self
            .commands
            .join_session(session_code, player_name, color)
            .await?;
        let player = session.player_by_name(player_name).cloned();
        if player.is_none() {
            warn!(
                component = "reconciler",
                event = "reconciler.join.unmatched",
                session_code = %session_code,
                "Joined but could not find our player by name"
            );
        }
        self.store.set_session(Some(session.clone()));
        self.store.set_current_player(player);
        info!(
            component = "reconciler",
            event = "reconciler.session.joined",
            session_code = %session.session_code,
            "Joined session"
        );
        Ok(session)
    }

    /// Write a fresh snapshot and repair the cached identity against it.
    pub(crate) fn accept(&self, fresh: Session) -> Identity {
        self.store.set_session(Some(fresh.clone()));

        // Read the identity after the write, never from before the fetch.
        let identity = match self.store.player_snapshot() {
            Some(cached) => match fresh.player(cached.id) {
                Some(current) if cached.materially_eq(current) => Identity::Kept,
                Some(current) => {
                    self.store.set_current_player(Some(current.clone()));
                    Identity::Merged
                }
                None => {
                    info!(
                        component = "reconciler",
                        event = "reconciler.identity.evicted",
                        session_code = %fresh.session_code,
                        player_id = cached.id,
                        "Cached player is not in the session"
                    );
                    self.store.set_current_player(None);
                    self.auto_detect(&fresh, true)
                }
            },
            None => self.auto_detect(&fresh, false),
        };

        debug!(
            component = "reconciler",
            event = "reconciler.synced",
            session_code = %fresh.session_code,
            players = fresh.players.len(),
            identity = ?identity,
            "Reconciled session"
        );
        identity
    }

    /// A lone player in the session must be us.
    fn auto_detect(&self, fresh: &Session, evicted: bool) -> Identity {
        match fresh.players.as_slice() {
            [only] => {
                self.store.set_current_player(Some(only.clone()));
                Identity::Adopted
            }
            _ => Identity::Unresolved { evicted },
        }
    }

    /// Clear everything and stop using the session.
    async fn abandon(&self, reason: HomeReason) -> Signal {
        self.store.clear();
        self.transport.disconnect().await;
        Signal::NavigateHome { reason }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backoff::ReconnectPolicy;
    use crate::persistence::{MemoryStore, PersistenceAdapter, PLAYER_KEY, SAVED_AT_KEY, SESSION_KEY};
    use crate::socket::{Connector, Socket};
    use crate::store::tests::{player, session};
    use crate::error::TransportError;
    use crate::transport::TransportConfig;
    use async_trait::async_trait;
    use boardbank_protocol::{HeartBeat, Player, SessionStatus};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    /// Command client that replays queued responses.
    #[derive(Default)]
    pub(crate) struct ScriptedCommands {
        fetches: Mutex<VecDeque<Result<Session, CommandError>>>,
        action: Mutex<Option<Session>>,
        pub(crate) fetch_count: AtomicUsize,
    }

    impl ScriptedCommands {
        pub(crate) fn fetch(self, result: Result<Session, CommandError>) -> Self {
            self.fetches.lock().expect("fetches").push_back(result);
            self
        }

        pub(crate) fn action(self, session: Session) -> Self {
            *self.action.lock().expect("action") = Some(session);
            self
        }

        pub(crate) fn fetches(&self) -> usize {
            self.fetch_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandClient for ScriptedCommands {
        async fn fetch_session_by_code(&self, _code: &str) -> Result<Session, CommandError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            self.fetches
                .lock()
                .expect("fetches")
                .pop_front()
                .unwrap_or(Err(CommandError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE)))
        }

        async fn create_session(&self, _host_name: &str) -> Result<Session, CommandError> {
            self.action
                .lock()
                .expect("action")
                .clone()
                .ok_or_else(|| CommandError::Rejected("no scripted session".into()))
        }

        async fn join_session(
            &self,
            _code: &str,
            _player_name: &str,
            _color: PlayerColor,
        ) -> Result<Session, CommandError> {
            self.create_session("").await
        }
    }

    /// Connector for an unreachable broker.
    struct Offline;

    #[async_trait]
    impl Connector for Offline {
        async fn connect(&self, _url: &Url) -> Result<Box<dyn Socket>, TransportError> {
            Err(TransportError::Connect("offline".into()))
        }
    }

    pub(crate) fn offline_transport() -> Arc<RealtimeTransport> {
        let config = TransportConfig {
            ws_url: Url::parse("ws://broker.test/ws").expect("url"),
            connect_timeout: Duration::from_secs(1),
            heart_beat: HeartBeat::default(),
            shutdown_timeout: Duration::from_millis(100),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
                max_attempts: 10,
            },
        };
        Arc::new(RealtimeTransport::new(config, Arc::new(Offline)))
    }

    pub(crate) struct Harness {
        pub(crate) memory: Arc<MemoryStore>,
        pub(crate) commands: Arc<ScriptedCommands>,
        pub(crate) reconciler: SessionReconciler<ScriptedCommands>,
    }

    pub(crate) fn harness(
        cached_session: Option<&Session>,
        cached_player: Option<&Player>,
        commands: ScriptedCommands,
    ) -> Harness {
        let memory = Arc::new(MemoryStore::new());
        if let Some(s) = cached_session {
            memory.save(SESSION_KEY, &serde_json::to_string(s).expect("json"));
        }
        if let Some(p) = cached_player {
            memory.save(PLAYER_KEY, &serde_json::to_string(p).expect("json"));
        }
        let store = Arc::new(SessionStateStore::new(memory.clone()));
        let commands = Arc::new(commands);
        let reconciler = SessionReconciler::new(commands.clone(), store, offline_transport());
        Harness {
            memory,
            commands,
            reconciler,
        }
    }

    fn event(kind: EventKind, code: &str) -> SessionEvent {
        SessionEvent::new(kind, code, serde_json::Value::Null)
    }

    fn in_progress(mut s: Session) -> Session {
        s.status = SessionStatus::InProgress;
        s
    }

    #[tokio::test]
    async fn merges_fresh_balance_into_cached_player() {
        let cached = session("4821", vec![player(1, "Ada", 1500)]);
        let me = player(1, "Ada", 1500);
        let fresh = session("4821", vec![player(1, "Ada", 1200), player(2, "Grace", 1500)]);
        let h = harness(Some(&cached), Some(&me), ScriptedCommands::default().fetch(Ok(fresh.clone())));

        let signal = h.reconciler.refresh("4821").await;

        assert_eq!(signal, Signal::Synced { identity: Identity::Merged });
        let store = h.reconciler.store();
        assert_eq!(store.session_snapshot(), Some(fresh));
        let current = store.player_snapshot().expect("player");
        assert_eq!(current.balance, 1200);
        assert_eq!(current.name, "Ada");
        let persisted: Player =
            serde_json::from_str(&h.memory.load(PLAYER_KEY).expect("persisted")).expect("json");
        assert_eq!(persisted.balance, 1200);
    }

    #[tokio::test]
    async fn adopts_the_only_player_without_any_event() {
        let fresh = session("4821", vec![player(1, "Ada", 1500)]);
        let h = harness(None, None, ScriptedCommands::default().fetch(Ok(fresh)));

        let signal = h.reconciler.mount("4821").await;

        assert_eq!(signal, Signal::Synced { identity: Identity::Adopted });
        assert_eq!(h.reconciler.store().player_snapshot().map(|p| p.id), Some(1));
        assert_eq!(h.reconciler.transport().session_code().as_deref(), Some("4821"));
    }

    #[tokio::test]
    async fn leaves_identity_open_when_several_players() {
        let fresh = session("4821", vec![player(1, "Ada", 1500), player(2, "Grace", 1500)]);
        let h = harness(None, None, ScriptedCommands::default().fetch(Ok(fresh)));

        let signal = h.reconciler.refresh("4821").await;

        assert_eq!(signal, Signal::Synced { identity: Identity::Unresolved { evicted: false } });
        assert_eq!(h.reconciler.store().player_snapshot(), None);
    }

    #[tokio::test]
    async fn evicts_cached_player_missing_from_session() {
        let stranger = player(9, "Linus", 1500);
        let fresh = session("4821", vec![player(1, "Ada", 1500), player(2, "Grace", 1500)]);
        let h = harness(None, Some(&stranger), ScriptedCommands::default().fetch(Ok(fresh.clone())));

        let signal = h.reconciler.refresh("4821").await;

        assert_eq!(signal, Signal::Synced { identity: Identity::Unresolved { evicted: true } });
        assert_eq!(h.reconciler.store().player_snapshot(), None);
        assert_eq!(h.reconciler.store().session_snapshot(), Some(fresh));
        assert!(!h.memory.contains(PLAYER_KEY));
    }

    #[tokio::test]
    async fn eviction_falls_through_to_auto_adopt() {
        let stranger = player(9, "Linus", 1500);
        let fresh = session("4821", vec![player(1, "Ada", 1500)]);
        let h = harness(None, Some(&stranger), ScriptedCommands::default().fetch(Ok(fresh)));

        let signal = h.reconciler.refresh("4821").await;

        assert_eq!(signal, Signal::Synced { identity: Identity::Adopted });
        assert_eq!(h.reconciler.store().player_snapshot().map(|p| p.id), Some(1));
    }

    #[tokio::test]
    async fn unchanged_refetch_writes_nothing() {
        let cached = session("4821", vec![player(1, "Ada", 1500), player(2, "Grace", 1500)]);
        let me = player(1, "Ada", 1500);
        let h = harness(
            Some(&cached),
            Some(&me),
            ScriptedCommands::default().fetch(Ok(cached.clone())),
        );
        let writes_before = h.memory.write_count();

        let signal = h.reconciler.refresh("4821").await;

        assert_eq!(signal, Signal::Synced { identity: Identity::Kept });
        assert_eq!(h.memory.write_count(), writes_before);
    }

    #[tokio::test]
    async fn not_found_clears_cache_and_goes_home() {
        let cached = session("4821", vec![player(1, "Ada", 1500)]);
        let me = player(1, "Ada", 1500);
        let h = harness(
            Some(&cached),
            Some(&me),
            ScriptedCommands::default().fetch(Err(CommandError::NotFound)),
        );
        h.reconciler.transport().connect("4821").await;

        let signal = h.reconciler.mount("4821").await;

        assert_eq!(signal, Signal::NavigateHome { reason: HomeReason::NotFound });
        assert_eq!(h.reconciler.store().session_snapshot(), None);
        assert_eq!(h.reconciler.store().player_snapshot(), None);
        assert_eq!(h.reconciler.transport().session_code(), None);
        assert!(!h.reconciler.transport().has_pending_reconnect());
    }

    #[tokio::test]
    async fn transient_failure_keeps_cache() {
        let cached = session("4821", vec![player(1, "Ada", 1500)]);
        let me = player(1, "Ada", 1500);
        let h = harness(
            Some(&cached),
            Some(&me),
            ScriptedCommands::default()
                .fetch(Err(CommandError::Status(reqwest::StatusCode::BAD_GATEWAY))),
        );

        let signal = h.reconciler.refresh("4821").await;

        assert!(matches!(signal, Signal::RetryLater { .. }));
        assert_eq!(h.reconciler.store().session_snapshot(), Some(cached));
        assert_eq!(h.reconciler.store().player_snapshot(), Some(me));
    }

    #[tokio::test]
    async fn session_deleted_clears_everything() {
        let cached = session("4821", vec![player(1, "Ada", 1500)]);
        let me = player(1, "Ada", 1500);
        let h = harness(Some(&cached), Some(&me), ScriptedCommands::default());
        h.reconciler.store().set_current_player(Some(player(1, "Ada", 1400)));
        assert!(h.memory.contains(SAVED_AT_KEY));

        let signal = h
            .reconciler
            .handle_event("4821", &event(EventKind::SessionDeleted, "4821"))
            .await;

        assert_eq!(signal, Signal::NavigateHome { reason: HomeReason::SessionDeleted });
        assert_eq!(h.reconciler.store().session_snapshot(), None);
        assert_eq!(h.reconciler.store().player_snapshot(), None);
        for key in [SESSION_KEY, PLAYER_KEY, SAVED_AT_KEY] {
            assert!(!h.memory.contains(key), "{key} still persisted");
        }
        assert_eq!(h.commands.fetches(), 0);
    }

    #[tokio::test]
    async fn game_ended_goes_home() {
        let h = harness(None, None, ScriptedCommands::default());
        let signal = h
            .reconciler
            .handle_event("4821", &event(EventKind::GameEnded, "4821"))
            .await;
        assert_eq!(signal, Signal::NavigateHome { reason: HomeReason::GameEnded });
    }

    #[tokio::test]
    async fn game_started_navigates_once_in_progress() {
        let waiting = session("4821", vec![player(1, "Ada", 1500), player(2, "Grace", 1500)]);
        let h = harness(
            None,
            None,
            ScriptedCommands::default()
                .fetch(Ok(waiting.clone()))
                .fetch(Ok(in_progress(waiting))),
        );
        let started = event(EventKind::GameStarted, "4821");

        let early = h.reconciler.handle_event("4821", &started).await;
        assert!(matches!(early, Signal::Synced { .. }));

        let late = h.reconciler.handle_event("4821", &started).await;
        assert_eq!(
            late,
            Signal::NavigateToGame {
                session_code: "4821".into()
            }
        );
    }

    #[tokio::test]
    async fn balance_update_refetches_and_merges() {
        let cached = session("4821", vec![player(1, "Ada", 1500), player(2, "Grace", 1500)]);
        let me = player(2, "Grace", 1500);
        let mut fresh = cached.clone();
        fresh.players[1].balance = 1700;
        fresh.players[1].properties_count = 1;
        let h = harness(Some(&cached), Some(&me), ScriptedCommands::default().fetch(Ok(fresh)));

        let signal = h
            .reconciler
            .handle_event("4821", &event(EventKind::PropertyPurchased, "4821"))
            .await;

        assert_eq!(signal, Signal::Synced { identity: Identity::Merged });
        let current = h.reconciler.store().player_snapshot().expect("player");
        assert_eq!((current.balance, current.properties_count), (1700, 1));
    }

    #[tokio::test]
    async fn foreign_and_unknown_events_are_ignored() {
        let h = harness(None, None, ScriptedCommands::default());

        let foreign = h
            .reconciler
            .handle_event("4821", &event(EventKind::PlayerJoined, "1111"))
            .await;
        let unknown = h
            .reconciler
            .handle_event("4821", &event(EventKind::Other("AUCTION_OPENED".into()), "4821"))
            .await;

        assert_eq!(foreign, Signal::Ignored);
        assert_eq!(unknown, Signal::Ignored);
        assert_eq!(h.commands.fetches(), 0);
    }

    #[tokio::test]
    async fn connection_failed_event_is_terminal() {
        let h = harness(None, None, ScriptedCommands::default());
        let signal = h
            .reconciler
            .handle_event("4821", &SessionEvent::connection_failed("4821", 10))
            .await;
        assert_eq!(signal, Signal::ConnectionFailed { attempts: 10 });
        assert!(signal.is_terminal());
    }

    #[tokio::test]
    async fn run_forwards_signals_until_session_deleted() {
        let fresh = session("4821", vec![player(1, "Ada", 1500)]);
        let joined = session("4821", vec![player(1, "Ada", 1500), player(2, "Grace", 1500)]);
        let h = harness(
            None,
            None,
            ScriptedCommands::default().fetch(Ok(fresh)).fetch(Ok(joined)),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = h.reconciler.transport().clone();

        let driver = async {
            let first = rx.recv().await.expect("mount signal");
            assert_eq!(first, Signal::Synced { identity: Identity::Adopted });

            transport.inject(event(EventKind::PlayerJoined, "4821"));
            let second = rx.recv().await.expect("refresh signal");
            assert_eq!(second, Signal::Synced { identity: Identity::Kept });

            transport.inject(event(EventKind::SessionDeleted, "4821"));
        };

        let (terminal, ()) = tokio::join!(h.reconciler.run("4821", &tx), driver);

        assert_eq!(terminal, Signal::NavigateHome { reason: HomeReason::SessionDeleted });
        assert_eq!(h.reconciler.store().session_snapshot(), None);
    }

    #[tokio::test]
    async fn leave_keeps_subscription_only_for_same_game_view() {
        let h = harness(None, None, ScriptedCommands::default());
        let transport = h.reconciler.transport();
        transport.connect("4821").await;

        h.reconciler
            .leave(&LeaveTarget::GameView {
                session_code: "4821".into(),
            })
            .await;
        assert_eq!(transport.session_code().as_deref(), Some("4821"));

        h.reconciler
            .leave(&LeaveTarget::GameView {
                session_code: "1111".into(),
            })
            .await;
        assert_eq!(transport.session_code(), None);

        transport.connect("4821").await;
        h.reconciler.leave(&LeaveTarget::Elsewhere).await;
        assert_eq!(transport.session_code(), None);
        assert!(!transport.has_pending_reconnect());
    }

    #[tokio::test]
    async fn exit_clears_cache_and_disconnects() {
        let cached = session("4821", vec![player(1, "Ada", 1500)]);
        let h = harness(Some(&cached), None, ScriptedCommands::default());
        h.reconciler.transport().connect("4821").await;

        h.reconciler.exit().await;

        assert_eq!(h.reconciler.store().session_snapshot(), None);
        assert!(!h.memory.contains(SESSION_KEY));
        assert_eq!(h.reconciler.transport().session_code(), None);
    }

    #[tokio::test]
    async fn create_adopts_host() {
        let created = session("4821", vec![player(1, "Ada", 1500)]);
        let h = harness(None, None, ScriptedCommands::default().action(created.clone()));

        let session = h.reconciler.create_session("Ada").await.expect("created");

        assert_eq!(session, created);
        let me = h.reconciler.store().player_snapshot().expect("player");
        assert!(me.is_host);
        assert_eq!(me.id, 1);
    }

    #[tokio::test]
    async fn join_adopts_player_by_name_and_replaces_old_identity() {
        let old = player(7, "Ada", 900);
        let joined = session("4821", vec![player(1, "Host", 1500), player(2, "Grace", 1500)]);
        let h = harness(None, Some(&old), ScriptedCommands::default().action(joined));

        h.reconciler
            .join_session("4821", "grace", PlayerColor::Blue)
            .await
            .expect("joined");

        assert_eq!(h.reconciler.store().player_snapshot().map(|p| p.id), Some(2));
        assert_eq!(
            h.reconciler.store().session_snapshot().map(|s| s.session_code),
            Some("4821".to_string())
        );
    }

    #[tokio::test]
    async fn failed_action_leaves_store_untouched() {
        let cached = session("4821", vec![player(1, "Ada", 1500)]);
        let h = harness(Some(&cached), None, ScriptedCommands::default());

        let result = h.reconciler.create_session("Ada").await;

        assert!(result.is_err());
        assert_eq!(h.reconciler.store().session_snapshot(), Some(cached));
    }
}
