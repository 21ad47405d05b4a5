use clap::Parser;
use client::lobby::{Lobby, LobbyAction, LobbyState};
use client::network::{Client, ClientOptions, Listeners};
use log::{error, info, warn};
use rand::Rng;
use server::config::{RoomMode, ServerConfig};
use server::network::ServerHandle;
use shared::directory::ServerMetadata;
use shared::{PlayerStatus, WireFormat, DEFAULT_PORT};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

/// Headless party client: hosts or joins a room, waits for opponents, counts
/// down and then plays a score bot in place of a real minigame.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host a server on this machine and join it
    #[arg(long, conflicts_with = "join")]
    host: bool,

    /// Server address to join
    #[arg(short = 'j', long, default_value = "127.0.0.1:8080")]
    join: String,

    /// Port for the hosted server
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Pick the server from a directory listing (JSON file) instead of --join
    #[arg(long, conflicts_with = "host")]
    directory: Option<PathBuf>,

    /// Private room id to join
    #[arg(short = 'r', long)]
    room: Option<u64>,

    /// Framing to use (binary or json); must match the server
    #[arg(long, default_value = "binary")]
    wire_format: WireFormat,

    /// Opponents required before the host starts the round
    #[arg(long, default_value = "1")]
    min_opponents: usize,

    /// Seconds the score bot plays before reporting itself dead
    #[arg(long, default_value = "30")]
    play_secs: u64,
}

const FRAME: Duration = Duration::from_millis(100);
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves the first reachable server in a directory listing.
fn pick_from_directory(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let listing = std::fs::read_to_string(path)?;
    let servers = ServerMetadata::parse_list(&listing)?;

    for server in &servers {
        match server.resolve() {
            Ok(addr) => {
                info!(
                    "Using {} ({}, {} players per room)",
                    server.hostname, server.room_mode, server.max_players_per_room
                );
                return Ok(addr.to_string());
            }
            Err(e) => warn!("Skipping {}: {}", server.hostname, e),
        }
    }

    Err(format!("no usable server in {}", path.display()).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut lobby = Lobby::new();
    let mut hosted: Option<ServerHandle> = None;

    let address = if args.host {
        lobby.dispatch(LobbyAction::AttemptToStartServer);
        let config = ServerConfig {
            port: args.port,
            rooms: RoomMode::SingleRoom,
            wire_format: args.wire_format,
            ..ServerConfig::default()
        };
        let handle = ServerHandle::spawn(config).await?;
        let address = format!("127.0.0.1:{}", handle.local_addr().port());
        hosted = Some(handle);
        lobby.dispatch(LobbyAction::StartedServer);
        address
    } else {
        lobby.dispatch(LobbyAction::AttemptToJoinServer);
        match &args.directory {
            Some(path) => pick_from_directory(path)?,
            None => args.join.clone(),
        }
    };

    let client = Client::connect(ClientOptions {
        address,
        as_server: args.host,
        room_id: args.room,
        wire_format: args.wire_format,
        ..ClientOptions::default()
    })
    .await?;

    let closed = Arc::new(AtomicBool::new(false));
    let closed_flag = Arc::clone(&closed);
    client.listen(
        Listeners::new()
            .on_players_changed(|players| info!("{} player(s) in room", players.len()))
            .on_status_changed(|id, status| info!("Player {} is now {}", id, status))
            .on_score_changed(|id, score| info!("Player {} scored {}", id, score))
            .on_start_game(|| info!("Round starting"))
            .on_network_closed(move |graceful| {
                if graceful {
                    info!("Server stopped");
                } else {
                    warn!("Lost connection to server");
                }
                closed_flag.store(true, Ordering::Release);
            }),
    );

    let me = client.registered(REGISTER_TIMEOUT).await?;
    info!(
        "Joined room {} as player {} playing {}",
        client.room_id().unwrap_or_default(),
        me.id,
        me.game
    );
    if client.version_mismatch() {
        warn!(
            "Server version {:?} differs from ours; expect trouble",
            client.server_version()
        );
    }
    if !args.host {
        lobby.dispatch(LobbyAction::JoinedServer);
    }

    let mut frame = interval(FRAME);
    let mut start_requested = false;
    let mut score: u64 = 0;
    let mut launched_at: Option<Instant> = None;
    let mut rng = rand::thread_rng();

    loop {
        tokio::select! {
            _ = frame.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }

        if closed.load(Ordering::Acquire) {
            break;
        }

        let changes = client.poll_changes();
        let opponents = client.other_players().len();

        if changes.players
            && opponents > 0
            && matches!(
                lobby.state(),
                LobbyState::ServerWaitingForClients | LobbyState::ClientReady
            )
        {
            lobby.dispatch(LobbyAction::ClientsUpdated);
        }

        if client.is_host()
            && !start_requested
            && *lobby.state() == LobbyState::ServerReadyToStart
            && opponents >= args.min_opponents
        {
            client.start_game()?;
            start_requested = true;
        }

        if changes.start && lobby.can(&LobbyAction::BeginGame) {
            lobby.dispatch(LobbyAction::BeginGame);
        }

        let game = client.me().map(|p| p.game).unwrap_or_default();
        if lobby.poll_countdown(Instant::now(), &game) {
            info!("Launching {}", game);
            launched_at = Some(Instant::now());
        }

        if let Some(started) = launched_at {
            let damage = client.take_damage();
            if damage > 0 {
                info!("Took {} attack(s)", damage);
                score = score.saturating_sub(u64::from(damage) * 100);
            }

            score += rng.gen_range(100..2_000);
            client.update_score(score)?;

            if started.elapsed() >= Duration::from_secs(args.play_secs) {
                info!("Bot finished with {} points", score);
                client.change_status(PlayerStatus::Dead)?;
                launched_at = None;
            }
        }
    }

    client.close();

    if let Some(mut handle) = hosted {
        if let Err(e) = handle.stop().await {
            error!("Failed to stop hosted server: {}", e);
        }
    }

    Ok(())
}
