//! Headless lobby participant: joins, keeps its presence alive and logs the lobby view.
//!
//! Configured through the environment:
//! `RECORD_STORE_URL`/`RECORD_STORE_KEY` locate the store, `PUSH_URL` the relay change
//! stream, `LOBBY_USERNAME` authenticates (a visitor id is used otherwise), `LOBBY_HOST`
//! grants host privilege, `LOBBY_MODE` selects the role distribution mode,
//! `LOBBY_READY` declares readiness on join and `LOBBY_START` makes a host start the
//! round as soon as the lobby is startable.
//!
//! Commands are read line by line from stdin: `ready` toggles readiness, `mode <name>`
//! selects the mode, `start` asks to start the round, `force` starts it with whoever is
//! ready, `status` logs the view and `quit` leaves.

use std::{env, future::pending, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use bunker_lobby::{
    config::AppConfig,
    dao::{
        client::RecordStoreClient,
        record_store::postgrest::{PostgrestConfig, PostgrestRecordStore},
    },
    services::{
        beacon::DetachedDelivery,
        sync::{
            push::PushChannel, scheduler::SyncScheduler, select_strategy,
            sse_client::SsePushChannel,
        },
    },
    state::{
        clock::SystemClock,
        identity::{Identity, load_or_create_visitor_id},
        round::RejectionReason,
        session::{LobbySession, LobbyView},
    },
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_VISITOR_ID_PATH: &str = ".bunker-lobby/visitor_id";
const FAREWELL_FLUSH: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = PostgrestRecordStore::connect(
        PostgrestConfig::from_env().context("record store configuration")?,
    )
    .context("building record store client")?;
    let client = RecordStoreClient::new(Arc::new(store));

    let identity = resolve_identity()?;
    info!(session_id = identity.session_id(), privilege = ?identity.privilege(), "joining lobby");

    let session = LobbySession::new(
        identity,
        client.clone(),
        Arc::new(SystemClock),
        config.lobby,
    );

    if let Some(mode) = env_var("LOBBY_MODE") {
        session.select_mode(&mode).await.context("selecting mode")?;
    }

    let channel = match env_var("PUSH_URL") {
        Some(url) => match SsePushChannel::connect(&url).await {
            Ok(channel) => Some(Arc::new(channel) as Arc<dyn PushChannel>),
            Err(err) => {
                warn!(error = %err, "push stream unavailable; polling instead");
                None
            }
        },
        None => None,
    };
    let strategy = select_strategy(channel).await;
    info!(strategy = ?strategy.kind(), "synchronization selected");

    let mut scheduler = SyncScheduler::new(session.clone(), strategy, session.settings());
    scheduler.start();

    if env_var("LOBBY_READY").is_some() {
        match session.declare_ready().await {
            Ok(change) => info!(synced = change.synced, "declared ready"),
            Err(err) => warn!(error = %err, "could not declare ready"),
        }
    }

    let mut auto_start = env_var("LOBBY_START").is_some() && session.identity().is_host();
    let mut commands = Some(BufReader::new(tokio::io::stdin()).lines());
    let mut changes = session.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = next_line(&mut commands) => match line {
                Some(line) => match Command::parse(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => run_command(&session, command).await,
                    None if line.trim().is_empty() => {}
                    None => warn!(input = line.trim(), "unknown command"),
                },
                None => commands = None,
            },
            change = changes.recv() => match change {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    let view = log_view(&session).await;
                    if auto_start && view.startable {
                        auto_start = false;
                        run_command(&session, Command::Start).await;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.stop().await;
    session.teardown(&DetachedDelivery::new(client)).await;
    // Detached farewells need a moment on the runtime before it is dropped.
    tokio::time::sleep(FAREWELL_FLUSH).await;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Ready,
    Mode(String),
    Start,
    Force,
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()?.to_ascii_lowercase().as_str() {
            "ready" => Command::Ready,
            "mode" => Command::Mode(words.next()?.to_string()),
            "start" => Command::Start,
            "force" => Command::Force,
            "status" => Command::Status,
            "quit" | "exit" => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

async fn run_command(session: &LobbySession, command: Command) {
    match command {
        Command::Ready => match session.toggle_ready().await {
            Ok(change) => info!(state = ?change.state, synced = change.synced, "readiness toggled"),
            Err(err) => warn!(error = %err, "could not toggle readiness"),
        },
        Command::Mode(name) => match session.select_mode(&name).await {
            Ok(mode) => info!(mode = %mode, "mode selected"),
            Err(err) => warn!(error = %err, "could not select mode"),
        },
        Command::Start | Command::Force => {
            let forced = command == Command::Force;
            let result = if forced {
                session.force_start().await
            } else {
                session.request_start().await
            };
            match result {
                Ok(roster) => info!(
                    size = roster.size,
                    mode = %roster.role_mode,
                    participants = ?roster.participants,
                    forced,
                    "round started"
                ),
                Err(RejectionReason::NotHost { now_ready }) => {
                    info!(ready = now_ready, "not the host; readiness toggled instead")
                }
                Err(reason) => warn!(%reason, "round not started"),
            }
        }
        Command::Status => {
            log_view(session).await;
        }
        Command::Quit => {}
    }
}

async fn log_view(session: &LobbySession) -> LobbyView {
    let view = session.view().await;
    info!(
        present = view.presence.len(),
        authorized = view.authorized_count,
        ready = view.readiness.len(),
        startable = view.startable,
        phase = ?view.phase,
        "lobby updated"
    );
    view
}

async fn next_line(lines: &mut Option<Lines<BufReader<Stdin>>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => pending().await,
    }
}

fn resolve_identity() -> anyhow::Result<Identity> {
    if let Some(username) = env_var("LOBBY_USERNAME") {
        return Ok(if env_var("LOBBY_HOST").is_some() {
            Identity::host(username)
        } else {
            Identity::member(username)
        });
    }

    let path = env_var("VISITOR_ID_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VISITOR_ID_PATH));
    let visitor_id = load_or_create_visitor_id(&path)
        .with_context(|| format!("loading visitor id from {}", path.display()))?;
    Ok(Identity::guest(visitor_id))
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use bunker_lobby::{
        config::LobbySettings, dao::record_store::memory::MemoryRecordStore,
        state::state_machine::RoundPhase,
    };

    use super::*;

    fn join(identity: Identity, store: &MemoryRecordStore) -> Arc<LobbySession> {
        LobbySession::new(
            identity,
            RecordStoreClient::new(Arc::new(store.clone())),
            Arc::new(SystemClock),
            LobbySettings::default(),
        )
    }

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(Command::parse(" READY "), Some(Command::Ready));
        assert_eq!(Command::parse("mode classic"), Some(Command::Mode("classic".into())));
        assert_eq!(Command::parse("mode"), None);
        assert_eq!(Command::parse("force"), Some(Command::Force));
        assert_eq!(Command::parse("exit"), Some(Command::Quit));
        assert_eq!(Command::parse("dance"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[tokio::test]
    async fn host_commands_start_a_round() {
        let store = MemoryRecordStore::new();
        for name in ["alice", "bob", "carol", "dave"] {
            join(Identity::member(name), &store).declare_ready().await.unwrap();
        }

        let host = join(Identity::host("root"), &store);
        run_command(&host, Command::Start).await;
        assert!(host.roster().await.is_none());

        run_command(&host, Command::Mode("classic".into())).await;
        host.refresh().await;
        run_command(&host, Command::Start).await;
        let roster = host.roster().await.unwrap();
        assert_eq!(roster.size, 4);
        assert_eq!(host.view().await.phase, RoundPhase::RoundActive);
    }

    #[tokio::test]
    async fn force_starts_below_the_minimum() {
        let store = MemoryRecordStore::new();
        join(Identity::member("alice"), &store).declare_ready().await.unwrap();

        let host = join(Identity::host("root"), &store);
        run_command(&host, Command::Mode("classic".into())).await;
        host.refresh().await;
        run_command(&host, Command::Start).await;
        assert!(host.roster().await.is_none());

        run_command(&host, Command::Force).await;
        assert_eq!(host.roster().await.unwrap().participants, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn member_start_toggles_readiness() {
        let store = MemoryRecordStore::new();
        let alice = join(Identity::member("alice"), &store);
        run_command(&alice, Command::Start).await;
        assert!(alice.roster().await.is_none());
        assert_eq!(alice.refresh().await.readiness.len(), 1);
    }
}
