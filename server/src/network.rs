//! Server network layer handling TCP connections and event loop coordination

use crate::config::{ServerConfig, SWEEP_INTERVAL};
use crate::game::{ConnectionId, FinalizeRequest, GameState, Outgoing};
use log::{debug, error, info, warn};
use shared::codec::{read_message, write_message};
use shared::{Message, TransportError, WireFormat};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// How long shutdown waits for writers to flush `OnServerStopped`.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Messages a connection may have queued before it is dropped as too slow.
const WRITER_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Events sent from connection tasks and timers to the main server loop
#[derive(Debug)]
pub enum ServerEvent {
    MessageReceived {
        connection: ConnectionId,
        message: Message,
    },
    Disconnected {
        connection: ConnectionId,
    },
    FinalizeRound(FinalizeRequest),
}

/// Commands sent from the main loop to a connection's writer task
#[derive(Debug)]
enum WriterCommand {
    Send(Message),
    Close,
}

struct Connection {
    addr: SocketAddr,
    writer_tx: mpsc::Sender<WriterCommand>,
    last_seen: Instant,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Main server owning the authoritative state and every live connection
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    game_state: GameState,
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,

    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("next_connection_id", &self.next_connection_id)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(
            "Server listening on {} ({} rooms, {} framing)",
            listener.local_addr()?,
            config.rooms.name(),
            config.wire_format
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            game_state: GameState::new(&config),
            config,
            connections: HashMap::new(),
            next_connection_id: 1,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    /// Splits an accepted stream into reader and writer tasks.
    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let connection = self.next_connection_id;
        self.next_connection_id += 1;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_QUEUE_CAPACITY);
        let format = self.config.wire_format;

        let reader = tokio::spawn(run_reader(
            connection,
            read_half,
            format,
            self.event_tx.clone(),
        ));
        let writer = tokio::spawn(run_writer(connection, write_half, format, writer_rx));

        info!("Accepted connection {} from {}", connection, addr);
        self.connections.insert(
            connection,
            Connection {
                addr,
                writer_tx,
                last_seen: Instant::now(),
                reader,
                writer,
            },
        );
    }

    /// Stops a connection's tasks; its writer flushes whatever is queued first.
    fn close_connection(&mut self, connection: ConnectionId) {
        if let Some(conn) = self.connections.remove(&connection) {
            conn.reader.abort();
            let _ = conn.writer_tx.try_send(WriterCommand::Close);
            debug!("Closed connection {} ({})", connection, conn.addr);
        }
    }

    fn dispatch(&mut self, outgoing: Vec<Outgoing>) {
        let mut stalled = Vec::new();

        for Outgoing {
            connection,
            message,
        } in outgoing
        {
            match self.connections.get(&connection) {
                Some(conn) => match conn.writer_tx.try_send(WriterCommand::Send(message)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => stalled.push(connection),
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("Writer for connection {} already gone", connection)
                    }
                },
                None => debug!("Dropping {} for closed connection {}", message.tag(), connection),
            }
        }

        // Handled as a disconnect on the next loop turn.
        for connection in stalled {
            if let Some(conn) = self.connections.remove(&connection) {
                warn!("Dropping connection {} ({}): send queue full", connection, conn.addr);
                conn.reader.abort();
                let _ = self.event_tx.send(ServerEvent::Disconnected { connection });
            }
        }
    }

    /// Starts a timer for every round that just became decided.
    fn schedule_finalizations(&mut self) {
        let delay = self.config.final_score_duration();
        for request in self.game_state.take_finalize_requests() {
            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = event_tx.send(ServerEvent::FinalizeRound(request));
            });
        }
    }

    fn handle_message(&mut self, connection: ConnectionId, message: Message) {
        self.game_state.touch(connection);
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.last_seen = Instant::now();
        }
        let player = self.game_state.player_for(connection);

        let outgoing = match (message, player) {
            (Message::Ping {}, _) => Vec::new(),

            (
                Message::RegisterPlayer {
                    app_version,
                    room_id,
                },
                _,
            ) => match self.game_state.register(connection, app_version, room_id) {
                Ok(outgoing) => outgoing,
                Err(e) => {
                    warn!("Rejected registration from connection {}: {}", connection, e);
                    if player.is_none() {
                        self.close_connection(connection);
                    }
                    Vec::new()
                }
            },

            (Message::UnregisterPlayer {}, Some(id)) => self.game_state.unregister(id),
            (Message::StartGame {}, Some(id)) => self.game_state.start_game(id),
            (Message::UpdateScore { score }, Some(id)) => self.game_state.update_score(id, score),
            (Message::UpdateStatus { status }, Some(id)) => {
                self.game_state.update_status(id, status)
            }

            (message, None) if message.is_server_bound() => {
                warn!(
                    "Ignoring {} from unregistered connection {}",
                    message.tag(),
                    connection
                );
                Vec::new()
            }

            (message, _) => {
                warn!(
                    "Unexpected {} from connection {}",
                    message.tag(),
                    connection
                );
                Vec::new()
            }
        };

        self.dispatch(outgoing);
        self.schedule_finalizations();
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::MessageReceived {
                connection,
                message,
            } => self.handle_message(connection, message),
            ServerEvent::Disconnected { connection } => {
                let outgoing = self.game_state.disconnect(connection);
                self.close_connection(connection);
                self.dispatch(outgoing);
                self.schedule_finalizations();
            }
            ServerEvent::FinalizeRound(request) => {
                let outgoing = self.game_state.finalize_round(request);
                self.dispatch(outgoing);
            }
        }
    }

    /// Connections without a player that have been silent past `timeout`.
    fn idle_anonymous_connections(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(id, conn)| {
                self.game_state.player_for(**id).is_none()
                    && now.saturating_duration_since(conn.last_seen) > timeout
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        let timeout = self.config.inactive_player_timeout();

        let (expired, outgoing) = self.game_state.sweep_inactive(now, timeout);
        for connection in expired {
            self.close_connection(connection);
        }
        for connection in self.idle_anonymous_connections(now, timeout) {
            info!("Closing idle unregistered connection {}", connection);
            self.close_connection(connection);
        }
        self.dispatch(outgoing);
        self.schedule_finalizations();
    }

    /// Tells every connection the server is going away and waits briefly for
    /// the notice to be written.
    async fn shutdown(&mut self) {
        info!(
            "Server shutting down ({} connections)",
            self.connections.len()
        );

        let mut writers = Vec::new();
        for (_, conn) in self.connections.drain() {
            conn.reader.abort();
            let _ = conn
                .writer_tx
                .try_send(WriterCommand::Send(Message::OnServerStopped {}));
            let _ = conn.writer_tx.try_send(WriterCommand::Close);
            writers.push(conn.writer);
        }

        for writer in writers {
            if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, writer)
                .await
                .is_err()
            {
                warn!("Timed out flushing a connection during shutdown");
            }
        }
    }

    /// Main server loop; returns once `shutdown` resolves.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), ServerError> {
        let mut sweep_interval = interval(SWEEP_INTERVAL);

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!("Error accepting connection: {}", e),
                    }
                },

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                },

                _ = sweep_interval.tick() => {
                    self.sweep();
                },

                _ = &mut shutdown => {
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }
}

/// Reads frames until the stream ends, forwarding decoded messages.
async fn run_reader(
    connection: ConnectionId,
    read_half: OwnedReadHalf,
    format: WireFormat,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut reader = BufReader::new(read_half);

    loop {
        match read_message(&mut reader, format).await {
            Ok(Some(Ok(message))) => {
                if event_tx
                    .send(ServerEvent::MessageReceived {
                        connection,
                        message,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Ok(Some(Err(e))) => {
                warn!("Skipping bad frame from connection {}: {}", connection, e);
            }
            Ok(None) => {
                debug!("Connection {} closed by peer", connection);
                break;
            }
            Err(TransportError::Io(e)) => {
                debug!("Connection {} read error: {}", connection, e);
                break;
            }
            Err(e) => {
                warn!("Dropping connection {}: {}", connection, e);
                break;
            }
        }
    }

    let _ = event_tx.send(ServerEvent::Disconnected { connection });
}

/// Writes queued messages in order until told to close.
async fn run_writer(
    connection: ConnectionId,
    mut write_half: OwnedWriteHalf,
    format: WireFormat,
    mut writer_rx: mpsc::Receiver<WriterCommand>,
) {
    while let Some(command) = writer_rx.recv().await {
        match command {
            WriterCommand::Send(message) => {
                if let Err(e) = write_message(&mut write_half, format, &message).await {
                    debug!("Failed to send to connection {}: {}", connection, e);
                    break;
                }
            }
            WriterCommand::Close => break,
        }
    }

    let _ = write_half.shutdown().await;
}

/// A server running on its own task, as used by peer hosts and tests.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    pub async fn spawn(config: ServerConfig) -> Result<Self, ServerError> {
        let server = Server::bind(config).await?;
        let local_addr = server.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(server.run(shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Broadcasts `OnServerStopped` and waits for the server task to end.
    /// Calling it again does nothing.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Server task failed: {}", e);
                    Ok(())
                }
            },
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}
