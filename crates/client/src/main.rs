//! Boardbank CLI
//!
//! Create or join a session, follow it live, and run the host's lobby
//! actions from a terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use boardbank::persistence::open_or_memory;
use boardbank::{
    paths, Config, HttpCommandClient, LeaveTarget, Overrides, RealtimeTransport,
    SessionReconciler, SessionStateStore, Signal,
};
use boardbank_protocol::{is_valid_session_code, Player, PlayerColor, Session};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "boardbank", version)]
#[command(about = "Keep a shared board-game ledger in sync from the terminal")]
struct Cli {
    /// Data directory (cache, logs, config)
    #[arg(long, global = true, env = "BOARDBANK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Server root URL, e.g. http://localhost:8080/
    #[arg(long, global = true, env = "BOARDBANK_API_URL")]
    api_url: Option<String>,

    /// Broker WebSocket URL (defaults to <api-url host>/ws)
    #[arg(long, global = true, env = "BOARDBANK_WS_URL")]
    ws_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a session and become its host
    Create {
        host_name: String,
        /// Keep following the session afterwards
        #[arg(long)]
        watch: bool,
    },
    /// Join a session by its code
    Join {
        code: String,
        name: String,
        /// One of RED, BLUE, GREEN, YELLOW, PURPLE, ORANGE, BLACK, WHITE
        #[arg(long)]
        color: PlayerColor,
        #[arg(long)]
        watch: bool,
    },
    /// Follow a session live until it ends (defaults to the cached session)
    Watch { code: Option<String> },
    /// Show the cached session and player
    Status {
        /// Refresh from the server first
        #[arg(long)]
        refresh: bool,
    },
    /// Start the game (host only)
    Start { code: Option<String> },
    /// End and delete the session (host only)
    End { code: Option<String> },
    /// Forget the session on this device
    Leave,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    paths::init_data_dir(cli.data_dir.as_deref());
    paths::ensure_dirs().context("creating data directory")?;
    let _logging = boardbank::logging::init_logging(&paths::log_dir())?;

    let overrides = Overrides {
        api_url: cli.api_url,
        ws_url: cli.ws_url,
    };
    let config = Config::load(&paths::config_path(), &overrides)?;
    info!(
        component = "cli",
        event = "cli.config.loaded",
        api_url = %config.api_url,
        ws_url = %config.transport.ws_url,
        "Loaded configuration"
    );

    let store = Arc::new(SessionStateStore::new(open_or_memory(&paths::db_path())));
    let transport = Arc::new(RealtimeTransport::websocket(config.transport.clone()));
    let commands = Arc::new(HttpCommandClient::new(&config.api_url, config.request_timeout)?);
    let reconciler = SessionReconciler::new(commands, store, transport);

    match cli.command {
        Command::Create { host_name, watch } => {
            let session = reconciler.create_session(host_name.trim()).await?;
            println!("Created session {}", session.session_code);
            print_session(&session, reconciler.store().player_snapshot().as_ref());
            if watch {
                follow(&reconciler, &session.session_code).await;
            }
        }
        Command::Join {
            code,
            name,
            color,
            watch,
        } => {
            let code = checked_code(&code)?;
            let session = reconciler.join_session(&code, name.trim(), color).await?;
            println!("Joined session {}", session.session_code);
            print_session(&session, reconciler.store().player_snapshot().as_ref());
            if watch {
                follow(&reconciler, &code).await;
            }
        }
        Command::Watch { code } => {
            let code = resolve_code(&reconciler, code)?;
            follow(&reconciler, &code).await;
        }
        Command::Status { refresh } => {
            if refresh {
                let code = resolve_code(&reconciler, None)?;
                describe(&reconciler.refresh(&code).await);
            }
            match reconciler.store().session_snapshot() {
                Some(session) => {
                    print_session(&session, reconciler.store().player_snapshot().as_ref());
                    if let Some(saved_at) = reconciler.store().saved_at() {
                        println!("Cached at {saved_at}");
                    }
                }
                None => println!("No cached session"),
            }
        }
        Command::Start { code } => {
            let code = resolve_code(&reconciler, code)?;
            let host = cached_host(&reconciler, &code)?;
            reconciler.commands().start_game(&code, host.id).await?;
            println!("Game {code} started");
        }
        Command::End { code } => {
            let code = resolve_code(&reconciler, code)?;
            let host = cached_host(&reconciler, &code)?;
            reconciler.commands().end_session(&code, host.id).await?;
            reconciler.exit().await;
            println!("Session {code} ended");
        }
        Command::Leave => {
            reconciler.exit().await;
            println!("Cleared cached session");
        }
    }

    Ok(())
}

/// Mount the session and print every signal until it ends or Ctrl-C.
async fn follow(reconciler: &SessionReconciler<HttpCommandClient>, code: &str) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let store = reconciler.store().clone();
    let printer = tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            describe(&signal);
            if matches!(signal, Signal::Synced { .. } | Signal::NavigateToGame { .. }) {
                if let Some(session) = store.session_snapshot() {
                    print_session(&session, store.player_snapshot().as_ref());
                }
            }
        }
    });

    println!("Following session {code} (Ctrl-C to stop)");
    tokio::select! {
        terminal = reconciler.run(code, &tx) => describe(&terminal),
        _ = tokio::signal::ctrl_c() => {
            reconciler.leave(&LeaveTarget::Elsewhere).await;
            println!("Stopped following {code}");
        }
    }
    drop(tx);
    let _ = printer.await;
}

fn describe(signal: &Signal) {
    match signal {
        Signal::Synced { identity } => println!("Synced ({identity:?})"),
        Signal::NavigateToGame { session_code } => println!("Game {session_code} is in progress"),
        Signal::NavigateHome { reason } => println!("Session closed: {reason:?}"),
        Signal::RetryLater { error } => eprintln!("Could not refresh: {error}"),
        Signal::ConnectionFailed { attempts } => {
            eprintln!("Lost the live connection after {attempts} attempts; run `boardbank watch` again")
        }
        Signal::Ignored => {}
    }
}

fn print_session(session: &Session, me: Option<&Player>) {
    println!("Session {} ({:?})", session.session_code, session.status);
    for player in &session.players {
        let marker = if me.is_some_and(|m| m.id == player.id) { "*" } else { " " };
        let host = if player.is_host { " (host)" } else { "" };
        println!(
            " {marker} {:<16} {:<7} {:>7}  {} properties{host}",
            player.name, player.color, player.balance, player.properties_count
        );
    }
    if me.is_none() {
        println!("   (this device has no player yet; use `boardbank join`)");
    }
}

fn checked_code(code: &str) -> anyhow::Result<String> {
    let code = code.trim();
    if !is_valid_session_code(code) {
        bail!("session codes are four digits, got {code:?}");
    }
    Ok(code.to_string())
}

fn resolve_code(
    reconciler: &SessionReconciler<HttpCommandClient>,
    code: Option<String>,
) -> anyhow::Result<String> {
    match code {
        Some(code) => checked_code(&code),
        None => reconciler
            .store()
            .session_snapshot()
            .map(|s| s.session_code)
            .ok_or_else(|| anyhow!("no cached session; pass a session code")),
    }
}

fn cached_host(
    reconciler: &SessionReconciler<HttpCommandClient>,
    code: &str,
) -> anyhow::Result<Player> {
    let store = reconciler.store();
    let player = store
        .player_snapshot()
        .ok_or_else(|| anyhow!("this device has no player in session {code}"))?;
    let in_session = store
        .session_snapshot()
        .is_some_and(|s| s.session_code == code);
    if !in_session || !player.is_host {
        bail!("only the host of session {code} can do that");
    }
    Ok(player)
}
