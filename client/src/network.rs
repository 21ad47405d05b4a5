//! Session proxy: one TCP connection to the coordination server.
//!
//! Inbound broadcasts are applied to a [`SessionMirror`] on a background
//! task, which then marks dirty flags and invokes the installed
//! [`Listeners`]. Callers never block on the network; outbound calls are
//! queued on an unbounded channel drained by a writer task.

use crate::session::{Changes, DirtyFlags, SessionEvent, SessionMirror};
use log::{debug, error, info, warn};
use shared::codec::{read_message, write_message};
use shared::{
    Message, Player, PlayerId, PlayerStatus, RoomId, TransportError, WireFormat, DEFAULT_PORT,
    PROTOCOL_VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub address: String,
    /// This peer is also hosting the server it connects to.
    pub as_server: bool,
    /// Private room to join; `None` creates or picks one per server mode.
    pub room_id: Option<RoomId>,
    pub wire_format: WireFormat,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            as_server: false,
            room_id: None,
            wire_format: WireFormat::Binary,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

type ScoreCallback = Box<dyn Fn(PlayerId, u64) + Send + Sync>;
type StatusCallback = Box<dyn Fn(PlayerId, PlayerStatus) + Send + Sync>;
type PlayersCallback = Box<dyn Fn(Vec<Player>) + Send + Sync>;
type StartCallback = Box<dyn Fn() + Send + Sync>;
type ClosedCallback = Box<dyn Fn(bool) + Send + Sync>;

/// The callbacks installed by [`Client::listen`].
///
/// All of them run on the network task. They should hand work over to the
/// caller's own thread rather than touch its state directly.
#[derive(Default)]
pub struct Listeners {
    score_changed: Option<ScoreCallback>,
    status_changed: Option<StatusCallback>,
    players_changed: Option<PlayersCallback>,
    start_game: Option<StartCallback>,
    network_closed: Option<ClosedCallback>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_score_changed(mut self, f: impl Fn(PlayerId, u64) + Send + Sync + 'static) -> Self {
        self.score_changed = Some(Box::new(f));
        self
    }

    pub fn on_status_changed(
        mut self,
        f: impl Fn(PlayerId, PlayerStatus) + Send + Sync + 'static,
    ) -> Self {
        self.status_changed = Some(Box::new(f));
        self
    }

    /// Receives a snapshot of every player in the room.
    pub fn on_players_changed(mut self, f: impl Fn(Vec<Player>) + Send + Sync + 'static) -> Self {
        self.players_changed = Some(Box::new(f));
        self
    }

    pub fn on_start_game(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.start_game = Some(Box::new(f));
        self
    }

    /// Called once if the connection ends without [`Client::close`]. The
    /// flag is true if the server announced it was stopping.
    pub fn on_network_closed(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.network_closed = Some(Box::new(f));
        self
    }
}

#[derive(Debug)]
enum WriterCommand {
    Send(Message),
    Close,
}

/// State shared between the proxy handle and its network tasks.
struct Shared {
    mirror: Mutex<SessionMirror>,
    listeners: Mutex<Option<Arc<Listeners>>>,
    dirty: DirtyFlags,
    closed_locally: AtomicBool,
    close_reported: AtomicBool,
    /// Set once the reader stops; holds whether the close was graceful.
    ended: Mutex<Option<bool>>,
    me_tx: watch::Sender<Option<PlayerId>>,
}

impl Shared {
    fn mirror(&self) -> MutexGuard<'_, SessionMirror> {
        // A panicking listener never holds this lock, so poisoning only
        // means a panic inside `apply`; the mirror is still usable.
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listeners(&self) -> Option<Arc<Listeners>> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn handle(&self, message: Message) {
        let (events, players, me) = {
            let mut mirror = self.mirror();
            let events = mirror.apply(&message);
            (events, mirror.players(), mirror.me_id())
        };

        if me.is_some() && self.me_tx.borrow().is_none() {
            let _ = self.me_tx.send(me);
        }

        for event in &events {
            self.dirty.mark(event);
        }

        let listeners = match self.listeners() {
            Some(listeners) => listeners,
            None => return,
        };

        for event in events {
            match event {
                SessionEvent::PlayersChanged => {
                    if let Some(f) = &listeners.players_changed {
                        f(players.clone());
                    }
                }
                SessionEvent::ScoreChanged { id, score } => {
                    if let Some(f) = &listeners.score_changed {
                        f(id, score);
                    }
                }
                SessionEvent::StatusChanged { id, status } => {
                    if let Some(f) = &listeners.status_changed {
                        f(id, status);
                    }
                    if let Some(f) = &listeners.players_changed {
                        f(players.clone());
                    }
                }
                SessionEvent::StartGame => {
                    if let Some(f) = &listeners.start_game {
                        f();
                    }
                }
                SessionEvent::Attacked { .. } | SessionEvent::ServerStopped => {}
            }
        }
    }

    /// Records that the connection ended and tells the listeners.
    fn report_closed(&self) {
        let graceful = self.mirror().server_stopped();
        *self.ended.lock().unwrap_or_else(|e| e.into_inner()) = Some(graceful);
        if !self.closed_locally.load(Ordering::Acquire) {
            info!("Connection to server ended (graceful: {})", graceful);
        }
        self.notify_closed();
    }

    /// Fires `network_closed` at most once, whether the listener was
    /// installed before or after the connection ended.
    fn notify_closed(&self) {
        if self.closed_locally.load(Ordering::Acquire) {
            return;
        }

        let graceful = match *self.ended.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(graceful) => graceful,
            None => return,
        };

        let listeners = match self.listeners() {
            Some(listeners) if listeners.network_closed.is_some() => listeners,
            _ => return,
        };

        if self.close_reported.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(f) = &listeners.network_closed {
            f(graceful);
        }
    }
}

/// Handle to a live session. Dropping it closes the connection.
pub struct Client {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<WriterCommand>,
    me_rx: watch::Receiver<Option<PlayerId>>,
    as_server: bool,
    reader: JoinHandle<()>,
    keep_alive: JoinHandle<()>,
}

impl Client {
    /// Opens the connection and sends `RegisterPlayer`.
    ///
    /// Returns once the registration is queued; use [`Client::registered`]
    /// to wait for the server to assign this player.
    pub async fn connect(options: ClientOptions) -> Result<Self, TransportError> {
        info!(
            "Connecting to {} ({}{})",
            options.address,
            options.wire_format,
            if options.as_server { ", hosting" } else { "" }
        );

        let stream = match timeout(
            options.connect_timeout,
            TcpStream::connect(options.address.as_str()),
        )
        .await
        {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    addr: options.address.clone(),
                    timeout: options.connect_timeout,
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let (me_tx, me_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            mirror: Mutex::new(SessionMirror::new()),
            listeners: Mutex::new(None),
            dirty: DirtyFlags::default(),
            closed_locally: AtomicBool::new(false),
            close_reported: AtomicBool::new(false),
            ended: Mutex::new(None),
            me_tx,
        });

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(write_half, options.wire_format, outbound_rx));
        let reader = tokio::spawn(run_reader(
            read_half,
            options.wire_format,
            Arc::clone(&shared),
        ));
        let keep_alive = tokio::spawn(run_keep_alive(outbound.clone(), options.ping_interval));

        let client = Client {
            shared,
            outbound,
            me_rx,
            as_server: options.as_server,
            reader,
            keep_alive,
        };

        client.send(Message::RegisterPlayer {
            app_version: PROTOCOL_VERSION,
            room_id: options.room_id,
        })?;

        Ok(client)
    }

    /// Waits until the server has described this player.
    pub async fn registered(&self, wait: Duration) -> Result<Player, TransportError> {
        let mut me_rx = self.me_rx.clone();
        let result = timeout(wait, async {
            loop {
                if me_rx.borrow().is_some() {
                    return Ok(());
                }
                if me_rx.changed().await.is_err() {
                    return Err(TransportError::Closed);
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => self.me().ok_or(TransportError::Closed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Installs the callback set, replacing any previously installed one.
    ///
    /// If the connection has already ended unreported, `network_closed`
    /// fires right away on the calling thread.
    pub fn listen(&self, listeners: Listeners) {
        {
            let mut slot = self
                .shared
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                debug!("Replacing installed listeners");
            }
            *slot = Some(Arc::new(listeners));
        }

        self.shared.notify_closed();
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.shared.closed_locally.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(WriterCommand::Send(message))
            .map_err(|_| TransportError::Closed)
    }

    pub fn update_score(&self, score: u64) -> Result<(), TransportError> {
        self.send(Message::UpdateScore { score })
    }

    pub fn change_status(&self, status: PlayerStatus) -> Result<(), TransportError> {
        self.send(Message::UpdateStatus { status })
    }

    /// Asks the server to start a round for the whole room.
    pub fn start_game(&self) -> Result<(), TransportError> {
        self.send(Message::StartGame {})
    }

    pub fn is_host(&self) -> bool {
        self.as_server
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.closed_locally.load(Ordering::Acquire) && !self.reader.is_finished()
    }

    pub fn me(&self) -> Option<Player> {
        self.shared.mirror().me().cloned()
    }

    pub fn players(&self) -> Vec<Player> {
        self.shared.mirror().players()
    }

    pub fn other_players(&self) -> Vec<Player> {
        self.shared.mirror().other_players()
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.shared.mirror().room_id()
    }

    pub fn score_for(&self, id: PlayerId) -> u64 {
        self.shared.mirror().score_for(id)
    }

    pub fn server_version(&self) -> Option<u32> {
        self.shared.mirror().server_version()
    }

    pub fn version_mismatch(&self) -> bool {
        self.shared.mirror().version_mismatch()
    }

    /// Summed attack strength received since the last call.
    pub fn take_damage(&self) -> u32 {
        self.shared.mirror().take_damage()
    }

    pub fn poll_changes(&self) -> Changes {
        self.shared.dirty.take()
    }

    /// Unregisters and tears the connection down. Safe to call repeatedly.
    pub fn close(&self) {
        if self.shared.closed_locally.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Closing connection to server");
        let _ = self
            .outbound
            .send(WriterCommand::Send(Message::UnregisterPlayer {}));
        let _ = self.outbound.send(WriterCommand::Close);
        self.keep_alive.abort();
        self.reader.abort();
    }

    pub fn disconnect(&self) {
        self.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_reader(read_half: OwnedReadHalf, format: WireFormat, shared: Arc<Shared>) {
    let mut reader = BufReader::new(read_half);

    loop {
        match read_message(&mut reader, format).await {
            Ok(Some(Ok(message))) => shared.handle(message),
            Ok(Some(Err(e))) => warn!("Skipping bad frame from server: {}", e),
            Ok(None) => {
                debug!("Server closed the connection");
                break;
            }
            Err(e) => {
                error!("Error receiving from server: {}", e);
                break;
            }
        }
    }

    shared.report_closed();
}

async fn run_writer(
    mut write_half: OwnedWriteHalf,
    format: WireFormat,
    mut outbound_rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    while let Some(command) = outbound_rx.recv().await {
        match command {
            WriterCommand::Send(message) => {
                if let Err(e) = write_message(&mut write_half, format, &message).await {
                    debug!("Failed to send {}: {}", message.tag(), e);
                    break;
                }
            }
            WriterCommand::Close => break,
        }
    }

    let _ = write_half.shutdown().await;
}

async fn run_keep_alive(outbound: mpsc::UnboundedSender<WriterCommand>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if outbound.send(WriterCommand::Send(Message::Ping {})).is_err() {
            break;
        }
    }
}
