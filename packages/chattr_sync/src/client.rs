//! Sync Client
//!
//! Runs the session on a single driver task: connect, decode inbound frames
//! into the store, publish snapshots, write outbound frames, and reconnect on
//! loss. Presentation talks to it only through a [`ClientHandle`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{ConnectionMachine, ConnectionState, EndpointConfig};
use crate::error::{ClientError, SendError};
use crate::gateway::OutboundGateway;
use crate::protocol::decode_frame;
use crate::store::{Change, SessionSnapshot, SessionStore};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from the handle to the driver, other than outbound frames.
#[derive(Debug)]
enum Command {
    /// Swap the credential and reconnect with it.
    SetToken(String),
}

/// How a live session ended.
enum SessionEnd {
    Closed,
    Rebind,
    Cancelled,
}

pub struct SyncClient {
    config: ClientConfig,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Spawn the driver task. Must be called inside a tokio runtime.
    pub fn start(self) -> ClientHandle {
        let store = SessionStore::with_username(self.config.default_username.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(store.snapshot());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let gateway = OutboundGateway::new(state_rx.clone(), snapshot_rx.clone(), outbound_tx);

        let driver = Driver {
            endpoint: self.config.endpoint.clone(),
            token: self.config.token.clone(),
            connect_timeout: self.config.connect_timeout,
            machine: ConnectionMachine::new(self.config.backoff.clone()),
            store,
            snapshot_tx,
            state_tx,
            outbound_rx,
            command_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        ClientHandle {
            snapshot: snapshot_rx,
            connection: state_rx,
            gateway,
            commands: command_tx,
            cancel,
            task: Some(task),
        }
    }
}

/// Owner's side of a running client. Dropping it tears the client down.
pub struct ClientHandle {
    snapshot: watch::Receiver<SessionSnapshot>,
    connection: watch::Receiver<ConnectionState>,
    gateway: OutboundGateway,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ClientHandle {
    /// Current reduced state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn gateway(&self) -> &OutboundGateway {
        &self.gateway
    }

    pub fn send_message(&self, text: &str) -> Result<(), SendError> {
        self.gateway.send_message(text)
    }

    /// Replace the credential. The current connection is torn down and
    /// re-established with the new token.
    pub fn set_token(&self, token: impl Into<String>) -> Result<(), SendError> {
        self.commands
            .send(Command::SetToken(token.into()))
            .map_err(|_| SendError::Closed)
    }

    /// Close the transport, cancel any pending reconnect and wait for the
    /// driver to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("sync driver ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    endpoint: EndpointConfig,
    token: String,
    connect_timeout: Duration,
    machine: ConnectionMachine,
    store: SessionStore,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        self.machine.start();

        loop {
            self.publish_state();

            match self.connect().await {
                Ok(Some(socket)) => {
                    self.machine.opened();
                    self.publish_state();
                    info!(host = %self.endpoint.target_host(), "connected to session server");

                    match self.session(socket).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Rebind => {
                            self.machine.rebind();
                            continue;
                        }
                        SessionEnd::Closed => {
                            info!("disconnected from session server, reconnecting");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(host = %self.endpoint.target_host(), "connect failed: {}", e);
                }
            }

            let Some(timer) = self.machine.closed() else {
                break;
            };
            self.publish_state();
            debug!(delay_ms = timer.delay.as_millis() as u64, "reconnect scheduled");

            let sleep = tokio::time::sleep(timer.delay);
            tokio::pin!(sleep);
            let reconnect = loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break false,
                    () = &mut sleep => break self.machine.timer_fired(timer.id),
                    Some(cmd) = self.command_rx.recv() => {
                        self.handle_command(cmd);
                        break self.machine.rebind();
                    }
                    Some(_) = self.outbound_rx.recv() => {
                        warn!("dropping outbound frame: not connected");
                    }
                }
            };
            if !reconnect {
                break;
            }
        }

        if let Some(timer) = self.machine.stop() {
            debug!(?timer, "cancelled pending reconnect");
        }
        self.outbound_rx.close();
        self.publish_state();
        info!("sync client stopped");
    }

    /// One connection attempt. `Ok(None)` means teardown was requested.
    async fn connect(&mut self) -> Result<Option<Socket>, ClientError> {
        // Resolved per attempt so a new token takes effect on the next try.
        let url = self.endpoint.socket_url(&self.token)?;
        debug!(host = %self.endpoint.target_host(), "connecting");

        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            result = tokio::time::timeout(
                self.connect_timeout,
                tokio_tungstenite::connect_async(url.as_str()),
            ) => match result {
                Ok(Ok((socket, _))) => Ok(Some(socket)),
                Ok(Err(e)) => Err(ClientError::from_tungstenite(e)),
                Err(_) => Err(ClientError::ConnectTimeout(self.connect_timeout)),
            },
        }
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut ws_write, mut ws_read) = socket.split();

        // Anything queued between the last disconnect and now predates this
        // connection.
        while self.outbound_rx.try_recv().is_ok() {
            warn!("dropping outbound frame: queued before connect");
        }

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    // Flush sends the gateway accepted while we were connected.
                    while let Ok(frame) = self.outbound_rx.try_recv() {
                        if ws_write.send(tungstenite::Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_write.close().await;
                    return SessionEnd::Cancelled;
                }

                Some(cmd) = self.command_rx.recv() => {
                    self.handle_command(cmd);
                    let _ = ws_write.close().await;
                    return SessionEnd::Rebind;
                }

                Some(frame) = self.outbound_rx.recv() => {
                    if let Err(e) = ws_write.send(tungstenite::Message::Text(frame.into())).await {
                        warn!("send failed: {}", e);
                        return SessionEnd::Closed;
                    }
                }

                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            if self.handle_frame(&text) == Change::Username {
                                info!(
                                    username = %self.store.settings().username,
                                    "username changed, reconnecting"
                                );
                                let _ = ws_write.close().await;
                                return SessionEnd::Rebind;
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            debug!(?frame, "server closed the connection");
                            return SessionEnd::Closed;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong are answered by tungstenite; binary is not part
                            // of the protocol.
                        }
                        Some(Err(e)) => {
                            warn!("transport error: {}", e);
                            return SessionEnd::Closed;
                        }
                        None => return SessionEnd::Closed,
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) -> Change {
        let event = match decode_frame(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("dropping frame: {}", e);
                return Change::None;
            }
        };
        let kind = event.kind();
        let change = self.store.apply(event);
        if change != Change::None {
            debug!(kind, ?change, "applied event");
            self.snapshot_tx.send_replace(self.store.snapshot());
        }
        change
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetToken(token) => {
                info!("credential replaced, reconnecting");
                self.token = token;
            }
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
