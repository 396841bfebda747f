//! Entry checks for the lobby and game views.

use tracing::{debug, warn};

use crate::command::CommandClient;
use crate::reconciler::SessionReconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    NotFound,
    NotAMember,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyAccess {
    Allow,
    /// The game already started; show it instead.
    RedirectToGame { session_code: String },
    RedirectHome(Denied),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameAccess {
    Allow,
    RedirectHome(Denied),
}

impl<C: CommandClient> SessionReconciler<C> {
    /// Fetch the session for its lobby. In-progress games redirect.
    pub async fn guard_lobby(&self, session_code: &str) -> LobbyAccess {
        if session_code.trim().is_empty() {
            return LobbyAccess::RedirectHome(Denied::NotFound);
        }
        match self.commands().fetch_session_by_code(session_code).await {
            Ok(session) => {
                let in_progress = session.is_in_progress();
                self.store().set_session(Some(session));
                if in_progress {
                    LobbyAccess::RedirectToGame {
                        session_code: session_code.to_string(),
                    }
                } else {
                    LobbyAccess::Allow
                }
            }
            Err(e) if e.is_not_found() => {
                self.store().clear();
                LobbyAccess::RedirectHome(Denied::NotFound)
            }
            Err(e) => {
                warn!(
                    component = "guard",
                    event = "guard.lobby.failed",
                    session_code = %session_code,
                    error = %e,
                    "Could not load session for lobby"
                );
                LobbyAccess::RedirectHome(Denied::Unavailable)
            }
        }
    }

    /// Only a device whose player belongs to the session may enter its game.
    pub async fn guard_game(&self, session_code: &str) -> GameAccess {
        if session_code.trim().is_empty() {
            return GameAccess::RedirectHome(Denied::NotFound);
        }
        let store = self.store();
        let cached_player = store.player_snapshot();
        let cached_matches = store
            .session_snapshot()
            .is_some_and(|s| s.session_code == session_code);
        if cached_matches && cached_player.is_some() {
            debug!(
                component = "guard",
                event = "guard.game.cached",
                session_code = %session_code,
                "Entering game from cache"
            );
            return GameAccess::Allow;
        }

        match self.commands().fetch_session_by_code(session_code).await {
            Ok(session) => {
                let member = cached_player
                    .as_ref()
                    .is_some_and(|p| session.player(p.id).is_some());
                if member {
                    store.set_session(Some(session));
                    GameAccess::Allow
                } else {
                    GameAccess::RedirectHome(Denied::NotAMember)
                }
            }
            Err(e) if e.is_not_found() => {
                store.clear();
                GameAccess::RedirectHome(Denied::NotFound)
            }
            Err(e) => {
                warn!(
                    component = "guard",
                    event = "guard.game.failed",
                    session_code = %session_code,
                    error = %e,
                    "Could not load session for game"
                );
                GameAccess::RedirectHome(Denied::Unavailable)
            }
        }
    }
}
