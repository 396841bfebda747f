//! Session state store
//!
//! The in-memory mirror of the cached session and the device's current player.
//! Readers subscribe through `watch` receivers; writes are crate-private so
//! that the reconciler is the only path that can change what is displayed.

use std::sync::{Arc, Mutex};

use boardbank_protocol::{now_rfc3339, Player, Session};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::persistence::{PersistOp, PersistenceAdapter, PLAYER_KEY, SAVED_AT_KEY, SESSION_KEY};

pub struct SessionStateStore {
    session: watch::Sender<Option<Session>>,
    player: watch::Sender<Option<Player>>,
    persistence: Arc<dyn PersistenceAdapter>,
    /// Serializes accept-then-write-through so the persisted unit never mixes
    /// two writers.
    write_lock: Mutex<()>,
}

impl SessionStateStore {
    /// Build a store hydrated from whatever `persistence` holds.
    pub fn new(persistence: Arc<dyn PersistenceAdapter>) -> Self {
        let session: Option<Session> = load_json(persistence.as_ref(), SESSION_KEY);
        let player: Option<Player> = load_json(persistence.as_ref(), PLAYER_KEY);
        debug!(
            component = "store",
            event = "store.hydrated",
            session_code = session.as_ref().map(|s| s.session_code.as_str()),
            player_id = player.as_ref().map(|p| p.id),
            "Hydrated session store"
        );
        Self {
            session: watch::Sender::new(session),
            player: watch::Sender::new(player),
            persistence,
            write_lock: Mutex::new(()),
        }
    }

    /// Current session, then every accepted change.
    pub fn session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    /// Current player, then every accepted change.
    pub fn current_player(&self) -> watch::Receiver<Option<Player>> {
        self.player.subscribe()
    }

    pub fn session_snapshot(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    pub fn player_snapshot(&self) -> Option<Player> {
        self.player.borrow().clone()
    }

    /// When the cache was last written, if anything is cached.
    pub fn saved_at(&self) -> Option<String> {
        self.persistence.load(SAVED_AT_KEY)
    }

    /// Replace the session unless it is materially equal to the current one.
    /// Returns whether the value was accepted.
    pub(crate) fn set_session(&self, session: Option<Session>) -> bool {
        let _guard = self.lock_writes();
        let accepted = self.session.send_if_modified(|current| {
            let same = match (current.as_ref(), session.as_ref()) {
                (None, None) => true,
                (Some(a), Some(b)) => a.materially_eq(b),
                _ => false,
            };
            if !same {
                *current = session;
            }
            !same
        });
        if accepted {
            self.write_through();
        }
        accepted
    }

    /// Replace the current player unless it is identical to the cached one.
    pub(crate) fn set_current_player(&self, player: Option<Player>) -> bool {
        let _guard = self.lock_writes();
        let accepted = self.player.send_if_modified(|current| {
            if *current == player {
                return false;
            }
            *current = player;
            true
        });
        if accepted {
            self.write_through();
        }
        accepted
    }

    /// Null both entities in memory and in the durable cache.
    pub(crate) fn clear(&self) {
        let _guard = self.lock_writes();
        let session_changed = self.session.send_if_modified(|s| s.take().is_some());
        let player_changed = self.player.send_if_modified(|p| p.take().is_some());
        self.persistence.write_batch(&[
            PersistOp::remove(SESSION_KEY),
            PersistOp::remove(PLAYER_KEY),
            PersistOp::remove(SAVED_AT_KEY),
        ]);
        if session_changed || player_changed {
            debug!(component = "store", event = "store.cleared", "Cleared cached state");
        }
    }

    pub fn find_player_by_name(&self, name: &str) -> Option<Player> {
        self.session
            .borrow()
            .as_ref()
            .and_then(|s| s.player_by_name(name).cloned())
    }

    pub fn find_host(&self) -> Option<Player> {
        self.session.borrow().as_ref().and_then(|s| s.host().cloned())
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Persist session, player, and timestamp as one unit.
    fn write_through(&self) {
        let session = self.session.borrow().clone();
        let player = self.player.borrow().clone();
        let saved_at = if session.is_none() && player.is_none() {
            PersistOp::remove(SAVED_AT_KEY)
        } else {
            PersistOp::save(SAVED_AT_KEY, now_rfc3339())
        };
        self.persistence.write_batch(&[
            encode(SESSION_KEY, session.as_ref()),
            encode(PLAYER_KEY, player.as_ref()),
            saved_at,
        ]);
    }
}

fn encode<T: Serialize>(key: &str, value: Option<&T>) -> PersistOp {
    let Some(value) = value else {
        return PersistOp::remove(key);
    };
    match serde_json::to_string(value) {
        Ok(json) => PersistOp::save(key, json),
        Err(e) => {
            warn!(
                component = "store",
                event = "store.encode_failed",
                key = key,
                error = %e,
                "Could not encode cached value"
            );
            PersistOp::remove(key)
        }
    }
}

fn load_json<T: DeserializeOwned>(persistence: &dyn PersistenceAdapter, key: &str) -> Option<T> {
    let raw = persistence.load(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                component = "store",
                event = "store.cache_corrupt",
                key = key,
                error = %e,
                "Ignoring unreadable cached value"
            );
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use boardbank_protocol::{PlayerColor, SessionStatus};

    pub(crate) fn player(id: i64, name: &str, balance: i64) -> Player {
        Player {
            id,
            name: name.to_string(),
            balance,
            color: PlayerColor::ALL[(id as usize) % PlayerColor::ALL.len()],
            is_host: id == 1,
            properties_count: 0,
        }
    }

    pub(crate) fn session(code: &str, players: Vec<Player>) -> Session {
        Session {
            id: 10,
            session_code: code.to_string(),
            host_name: players.first().map(|p| p.name.clone()),
            status: SessionStatus::Waiting,
            players,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn store() -> (Arc<MemoryStore>, SessionStateStore) {
        let memory = Arc::new(MemoryStore::new());
        let store = SessionStateStore::new(memory.clone());
        (memory, store)
    }

    #[test]
    fn materially_equal_session_is_suppressed() {
        let (memory, store) = store();
        let mut rx = store.session();
        rx.borrow_and_update();

        let first = session("4821", vec![player(1, "Ada", 1500)]);
        let mut renamed = first.clone();
        renamed.players[0].name = "Ada L.".to_string();

        assert!(store.set_session(Some(first)));
        assert!(rx.has_changed().expect("open"));
        rx.borrow_and_update();

        assert!(!store.set_session(Some(renamed)));
        assert!(!rx.has_changed().expect("open"));
        assert_eq!(memory.write_count(), 1);
        assert_eq!(store.session_snapshot().expect("session").players[0].name, "Ada");
    }

    #[test]
    fn balance_change_is_accepted() {
        let (memory, store) = store();
        store.set_session(Some(session("4821", vec![player(1, "Ada", 1500)])));
        assert!(store.set_session(Some(session("4821", vec![player(1, "Ada", 1200)]))));
        assert_eq!(memory.write_count(), 2);
    }

    #[test]
    fn player_uses_full_equality() {
        let (memory, store) = store();
        let ada = player(1, "Ada", 1500);
        assert!(store.set_current_player(Some(ada.clone())));
        assert!(!store.set_current_player(Some(ada.clone())));

        let mut renamed = ada;
        renamed.name = "Ada L.".to_string();
        assert!(store.set_current_player(Some(renamed)));
        assert_eq!(memory.write_count(), 2);
    }

    #[test]
    fn accepted_writes_persist_all_three_keys() {
        let (memory, store) = store();
        store.set_session(Some(session("4821", vec![player(1, "Ada", 1500)])));
        store.set_current_player(Some(player(1, "Ada", 1500)));

        assert!(memory.contains(SESSION_KEY));
        assert!(memory.contains(PLAYER_KEY));
        assert!(store.saved_at().is_some());

        store.set_current_player(None);
        assert!(!memory.contains(PLAYER_KEY));
        assert!(memory.contains(SAVED_AT_KEY));
    }

    #[test]
    fn clear_is_idempotent_and_removes_everything() {
        let (memory, store) = store();
        store.set_session(Some(session("4821", vec![player(1, "Ada", 1500)])));
        store.set_current_player(Some(player(1, "Ada", 1500)));

        store.clear();
        store.clear();

        assert_eq!(store.session_snapshot(), None);
        assert_eq!(store.player_snapshot(), None);
        for key in [SESSION_KEY, PLAYER_KEY, SAVED_AT_KEY] {
            assert!(!memory.contains(key), "{key} still persisted");
        }
    }

    #[test]
    fn hydrates_from_cache_and_ignores_corrupt_entries() {
        let memory = Arc::new(MemoryStore::new());
        let cached = session("4821", vec![player(1, "Ada", 1500)]);
        memory.save(SESSION_KEY, &serde_json::to_string(&cached).expect("json"));
        memory.save(PLAYER_KEY, "{not json");

        let store = SessionStateStore::new(memory);
        assert_eq!(store.session_snapshot(), Some(cached));
        assert_eq!(store.player_snapshot(), None);
    }

    #[test]
    fn lookups_run_over_the_cached_session() {
        let (_, store) = store();
        assert_eq!(store.find_host(), None);

        store.set_session(Some(session(
            "4821",
            vec![player(1, "Ada", 1500), player(2, "Grace", 1500)],
        )));
        assert_eq!(store.find_player_by_name("  grace ").map(|p| p.id), Some(2));
        assert_eq!(store.find_player_by_name("linus"), None);
        assert_eq!(store.find_host().map(|p| p.id), Some(1));
    }
}
