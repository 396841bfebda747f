//! Boardbank
//!
//! Client-side state sync for a shared board-game ledger: a local mirror of
//! the session and this device's player, a durable cache, a STOMP push
//! channel with bounded reconnects, and the reconciler that keeps them
//! honest against the server.

pub mod backoff;
pub mod command;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
mod migration_runner;
pub mod paths;
pub mod persistence;
pub mod reconciler;
pub mod socket;
pub mod store;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use command::{CommandClient, HttpCommandClient};
pub use config::{Config, Overrides};
pub use error::{CommandError, ConfigError, PersistenceError, TransportError};
pub use guard::{Denied, GameAccess, LobbyAccess};
pub use persistence::{MemoryStore, PersistOp, PersistenceAdapter, SqliteStore};
pub use reconciler::{HomeReason, Identity, LeaveTarget, SessionReconciler, Signal};
pub use store::SessionStateStore;
pub use transport::{ConnectionState, RealtimeTransport, TransportConfig};
