//! Async driver for the signaling session.
//!
//! Owns the actual WebSocket and the session's timers, and executes the
//! declarative [`SignalAction`]s the state machine returns. All protocol
//! decisions live in [`SignalingSession`]; this loop only performs I/O.

use crate::core::events::AppEvent;
use crate::core::signaling::messages::{ClientMessage, ServerMessage};
use crate::core::signaling::session::{SignalAction, SignalingSession, TimerKind};
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use futures_util::{SinkExt, StreamExt};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands the embedding application feeds into the driver.
#[derive(Debug)]
pub enum SignalingCommand {
    Connect,
    Disconnect,
    /// Outbound message, routed with the session's connectivity policy.
    Dispatch(ClientMessage),
    ConnectivityChanged { online: bool },
    VisibilityChanged { visible: bool },
}

/// Everything the driver surfaces back to the application glue.
#[derive(Debug)]
pub enum SignalingUpdate {
    Event(AppEvent),
    /// Membership/signal message for the connection manager.
    Message(ServerMessage),
}

/// Cloneable command endpoint for the driver task.
#[derive(Debug, Clone)]
pub struct SignalingHandle {
    commands: mpsc::UnboundedSender<SignalingCommand>,
}

impl SignalingHandle {
    pub fn send(&self, command: SignalingCommand) {
        let _ = self.commands.send(command);
    }

    pub fn connect(&self) {
        self.send(SignalingCommand::Connect);
    }

    pub fn disconnect(&self) {
        self.send(SignalingCommand::Disconnect);
    }

    pub fn dispatch(&self, message: ClientMessage) {
        self.send(SignalingCommand::Dispatch(message));
    }
}

#[derive(Default)]
struct Timers {
    reconnect: Option<Instant>,
    close_debounce: Option<Instant>,
    command_retry: Option<Instant>,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<Instant> {
        match kind {
            TimerKind::Reconnect => &mut self.reconnect,
            TimerKind::CloseDebounce => &mut self.close_debounce,
            TimerKind::CommandRetry => &mut self.command_retry,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.reconnect, self.close_debounce, self.command_retry]
            .into_iter()
            .flatten()
            .min()
    }

    fn due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due = Vec::new();
        for kind in [
            TimerKind::CloseDebounce,
            TimerKind::Reconnect,
            TimerKind::CommandRetry,
        ] {
            let slot = self.slot(kind);
            if slot.is_some_and(|deadline| deadline <= now) {
                *slot = None;
                due.push(kind);
            }
        }
        due
    }
}

enum Wake {
    Command(Option<SignalingCommand>),
    Socket(Option<Result<Message, WsError>>),
    Timer,
}

pub struct SignalingDriver {
    session: SignalingSession,
    commands: mpsc::UnboundedReceiver<SignalingCommand>,
    updates: mpsc::UnboundedSender<SignalingUpdate>,
    socket: Option<WsStream>,
    timers: Timers,
}

impl SignalingDriver {
    pub fn new(
        session: SignalingSession,
        updates: mpsc::UnboundedSender<SignalingUpdate>,
    ) -> (Self, SignalingHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                session,
                commands: rx,
                updates,
                socket: None,
                timers: Timers::default(),
            },
            SignalingHandle { commands: tx },
        )
    }

    /// Run until every [`SignalingHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            let next_deadline = self.timers.next_deadline();
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                frame = Self::read_socket(&mut self.socket), if self.socket.is_some() => {
                    Wake::Socket(frame)
                }
                _ = Self::sleep_until(next_deadline), if next_deadline.is_some() => Wake::Timer,
            };

            let actions = match wake {
                Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.apply_command(command),
                Wake::Socket(frame) => self.apply_socket_read(frame),
                Wake::Timer => {
                    let mut actions = Vec::new();
                    for kind in self.timers.due(Instant::now()) {
                        actions.extend(self.session.on_timer(kind));
                    }
                    actions
                }
            };
            self.execute(actions).await;
        }
    }

    async fn read_socket(socket: &mut Option<WsStream>) -> Option<Result<Message, WsError>> {
        match socket {
            Some(stream) => stream.next().await,
            None => std::future::pending().await,
        }
    }

    async fn sleep_until(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    fn apply_command(&mut self, command: SignalingCommand) -> Vec<SignalAction> {
        match command {
            SignalingCommand::Connect => self.session.connect(),
            SignalingCommand::Disconnect => self.session.disconnect(),
            SignalingCommand::Dispatch(message) => self.session.dispatch(message),
            SignalingCommand::ConnectivityChanged { online } => self.session.on_connectivity(online),
            SignalingCommand::VisibilityChanged { visible } => self.session.on_visibility(visible),
        }
    }

    fn apply_socket_read(&mut self, frame: Option<Result<Message, WsError>>) -> Vec<SignalAction> {
        match frame {
            Some(Ok(Message::Text(text))) => self.session.on_frame(&text),
            Some(Ok(Message::Binary(_))) => {
                warn!(
                    event = "binary_server_frame",
                    "Dropping unexpected binary frame from server"
                );
                Vec::new()
            }
            // Pings are answered by the websocket layer itself.
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Vec::new(),
            Some(Ok(Message::Close(_))) | None => {
                self.socket = None;
                self.session.on_socket_closed()
            }
            Some(Err(e)) => {
                warn!(event = "socket_read_failure", error = %e, "Socket read failed");
                self.socket = None;
                self.session.on_socket_closed()
            }
        }
    }

    async fn execute(&mut self, actions: Vec<SignalAction>) {
        let mut queue: VecDeque<SignalAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SignalAction::OpenSocket { url } => match connect_async(url.as_str()).await {
                    Ok((socket, _response)) => {
                        debug!(event = "socket_open", url = %url, "Socket connected");
                        self.socket = Some(socket);
                        queue.extend(self.session.on_socket_open());
                    }
                    Err(e) => {
                        warn!(event = "socket_dial_failure", error = %e, "Could not connect");
                        queue.extend(self.session.on_socket_closed());
                    }
                },
                SignalAction::CloseSocket => {
                    if let Some(mut socket) = self.socket.take() {
                        let _ = socket.close(None).await;
                    }
                }
                SignalAction::SendFrame(text) => {
                    let failed = match self.socket.as_mut() {
                        Some(socket) => socket.send(Message::Text(text)).await.is_err(),
                        None => false,
                    };
                    if failed {
                        warn!(event = "socket_send_failure", "Socket send failed");
                        self.socket = None;
                        queue.extend(self.session.on_socket_closed());
                    }
                }
                SignalAction::StartTimer { kind, delay } => {
                    *self.timers.slot(kind) = Some(Instant::now() + delay);
                }
                SignalAction::CancelTimer(kind) => {
                    *self.timers.slot(kind) = None;
                }
                SignalAction::Emit(event) => {
                    let _ = self.updates.send(SignalingUpdate::Event(event));
                }
                SignalAction::Forward(message) => {
                    let _ = self.updates.send(SignalingUpdate::Message(message));
                }
            }
        }
    }
}
