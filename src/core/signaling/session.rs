//! Signaling session: lifecycle of the control connection to the
//! rendezvous server.
//!
//! Pure state machine, driven by socket callbacks, timers, connectivity
//! and visibility changes, and local commands. Every entry point returns
//! declarative [`SignalAction`]s for the async driver to execute; the
//! session itself never touches a socket.
//!
//! Reconnection is a single fixed-delay retry (no backoff): reconnecting
//! is cheap and rare. Close events are debounced briefly so fast page
//! transitions do not flap the UI.

use crate::core::config::{COMMAND_RETRY_DELAY, DISCONNECT_DEBOUNCE, RECONNECT_DELAY};
use crate::core::events::{AppEvent, Notice};
use crate::core::signaling::messages::{ClientMessage, IdentityMessage, ServerMessage};
use crate::core::storage::{RoomSecretEntry, SecretStore, TabsRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Configuration ────────────────────────────────────────────────────────────

/// Where and how to reach the rendezvous server.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// WebSocket base, e.g. `wss://drop.example.org`.
    pub base_url: String,
    /// Whether the platform transport is available; encoded in the
    /// endpoint path so the server knows how to pair us.
    pub rtc_supported: bool,
}

/// Reauthentication parameters assigned by the server. Presenting them on
/// reconnect keeps the same peer identity across sessions.
#[derive(Debug, Clone)]
pub struct Identity {
    pub peer_id: String,
    pub peer_id_hash: String,
}

// ── Actions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fixed-delay reconnect after a disconnect.
    Reconnect,
    /// Debounce between socket close and surfacing the disconnect.
    CloseDebounce,
    /// Retry loop for connectivity-gated commands.
    CommandRetry,
}

/// Everything the session asks its driver to do.
#[derive(Debug)]
pub enum SignalAction {
    OpenSocket { url: String },
    CloseSocket,
    /// Send one text frame on the open socket.
    SendFrame(String),
    StartTimer { kind: TimerKind, delay: Duration },
    CancelTimer(TimerKind),
    /// Deliver to the embedding application.
    Emit(AppEvent),
    /// Hand a membership/signal message to the connection manager.
    Forward(ServerMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Disconnected,
    Connecting,
    Connected,
}

// ── SignalingSession ─────────────────────────────────────────────────────────

pub struct SignalingSession {
    config: EndpointConfig,
    secrets: Arc<dyn SecretStore>,
    tabs: Arc<dyn TabsRegistry>,
    state: ConnState,
    identity: Option<Identity>,
    /// Set after the first established connection ends; controls the
    /// reconnect notices.
    is_reconnect: bool,
    /// Connectivity is known absent; retries pause until it returns.
    offline: bool,
    /// Connectivity-gated commands waiting for the channel.
    pending: Vec<ClientMessage>,
}

impl SignalingSession {
    pub fn new(
        config: EndpointConfig,
        secrets: Arc<dyn SecretStore>,
        tabs: Arc<dyn TabsRegistry>,
    ) -> Self {
        Self {
            config,
            secrets,
            tabs,
            state: ConnState::Disconnected,
            identity: None,
            is_reconnect: false,
            offline: false,
            pending: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Endpoint URL: transport capability in the path, reauthentication
    /// parameters in the query once an identity exists.
    pub fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let capability = if self.config.rtc_supported {
            "webrtc"
        } else {
            "fallback"
        };
        let mut url = format!("{base}/server/{capability}");
        if let Some(identity) = &self.identity {
            url.push_str(&format!(
                "?peer_id={}&peer_id_hash={}",
                identity.peer_id, identity.peer_id_hash
            ));
        }
        url
    }

    // ── Connection lifecycle ─────────────────────────────────────────────

    /// Open the control connection if there is nothing usable already and
    /// connectivity is not known absent.
    pub fn connect(&mut self) -> Vec<SignalAction> {
        let mut actions = vec![SignalAction::CancelTimer(TimerKind::Reconnect)];
        if self.state != ConnState::Disconnected || self.offline {
            return actions;
        }
        if self.is_reconnect {
            actions.push(SignalAction::Emit(AppEvent::Notice(Notice::Connecting)));
        }
        self.state = ConnState::Connecting;
        actions.push(SignalAction::OpenSocket {
            url: self.endpoint(),
        });
        actions
    }

    pub fn on_socket_open(&mut self) -> Vec<SignalAction> {
        self.state = ConnState::Connected;
        info!(event = "server_connected", "Rendezvous server connected");
        let mut actions = vec![SignalAction::Emit(AppEvent::ServerConnected)];
        if self.is_reconnect {
            actions.push(SignalAction::Emit(AppEvent::Notice(Notice::Connected)));
        }
        actions
    }

    /// The socket closed or failed to open.
    pub fn on_socket_closed(&mut self) -> Vec<SignalAction> {
        if self.state == ConnState::Disconnected {
            return Vec::new();
        }
        self.state = ConnState::Disconnected;
        warn!(event = "server_disconnected", "Rendezvous server disconnected");
        vec![SignalAction::StartTimer {
            kind: TimerKind::CloseDebounce,
            delay: DISCONNECT_DEBOUNCE,
        }]
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Vec<SignalAction> {
        match kind {
            TimerKind::CloseDebounce => {
                self.is_reconnect = true;
                vec![
                    SignalAction::Emit(AppEvent::ServerDisconnected),
                    SignalAction::StartTimer {
                        kind: TimerKind::Reconnect,
                        delay: RECONNECT_DELAY,
                    },
                ]
            }
            TimerKind::Reconnect => self.connect(),
            TimerKind::CommandRetry => self.flush_or_rearm(),
        }
    }

    /// Connectivity changed. Retries pause while offline and resume on
    /// return.
    pub fn on_connectivity(&mut self, online: bool) -> Vec<SignalAction> {
        self.offline = !online;
        if online {
            self.connect()
        } else {
            debug!(event = "connectivity_lost", "Pausing reconnect attempts");
            vec![SignalAction::CancelTimer(TimerKind::Reconnect)]
        }
    }

    /// The page became visible again; cheap opportunity to reconnect.
    pub fn on_visibility(&mut self, visible: bool) -> Vec<SignalAction> {
        if visible {
            self.connect()
        } else {
            Vec::new()
        }
    }

    /// Explicit teardown: flush a best-effort disconnect notice, close
    /// without scheduling a retry, release the same-origin registration.
    pub fn disconnect(&mut self) -> Vec<SignalAction> {
        let mut actions = Vec::new();
        if self.state == ConnState::Connected {
            actions.extend(self.encode(ClientMessage::Disconnect));
        }
        if let Some(identity) = &self.identity {
            if let Err(e) = self.tabs.deregister(&identity.peer_id) {
                warn!(
                    event = "tabs_deregister_failure",
                    error = %e,
                    "Could not deregister peer id"
                );
            }
        }
        self.pending.clear();
        self.state = ConnState::Disconnected;
        self.is_reconnect = true;
        actions.extend([
            SignalAction::CancelTimer(TimerKind::Reconnect),
            SignalAction::CancelTimer(TimerKind::CloseDebounce),
            SignalAction::CancelTimer(TimerKind::CommandRetry),
            SignalAction::CloseSocket,
            SignalAction::Emit(AppEvent::ServerDisconnected),
        ]);
        actions
    }

    // ── Inbound dispatch ─────────────────────────────────────────────────

    /// Decode and dispatch one inbound frame.
    pub fn on_frame(&mut self, raw: &str) -> Vec<SignalAction> {
        let message = match ServerMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    event = "server_frame_malformed",
                    error = %e,
                    "Dropping malformed server frame"
                );
                return Vec::new();
            }
        };

        match message {
            ServerMessage::Ping => self.send(ClientMessage::Pong),
            ServerMessage::RtcConfig { config } => {
                vec![SignalAction::Emit(AppEvent::RtcConfigChanged(config))]
            }
            ServerMessage::DisplayName { message } => self.on_identity_assigned(message),
            ServerMessage::JoinKeyRateLimit => {
                vec![SignalAction::Emit(AppEvent::Notice(
                    Notice::JoinKeyRateLimited,
                ))]
            }
            ServerMessage::PairDeviceInitiated {
                pair_key,
                room_secret,
            } => vec![SignalAction::Emit(AppEvent::PairDeviceInitiated {
                pair_key,
                room_secret,
            })],
            ServerMessage::PairDeviceJoined {
                peer_id,
                room_secret,
            } => self.on_pair_device_joined(peer_id, room_secret),
            ServerMessage::PairDeviceJoinKeyInvalid => {
                vec![SignalAction::Emit(AppEvent::PairDeviceJoinKeyInvalid)]
            }
            ServerMessage::PairDeviceCanceled { pair_key } => {
                vec![SignalAction::Emit(AppEvent::PairDeviceCanceled { pair_key })]
            }
            ServerMessage::PublicRoomCreated { room_id } => {
                vec![SignalAction::Emit(AppEvent::PublicRoomCreated { room_id })]
            }
            ServerMessage::PublicRoomIdInvalid { public_room_id } => {
                vec![SignalAction::Emit(AppEvent::PublicRoomIdInvalid {
                    room_id: public_room_id,
                })]
            }
            ServerMessage::PublicRoomLeft => vec![SignalAction::Emit(AppEvent::PublicRoomLeft)],
            ServerMessage::Unrecognized { kind } => {
                warn!(
                    event = "unknown_server_message",
                    kind = %kind,
                    "Dropping unknown server message kind"
                );
                Vec::new()
            }
            // Membership, signals and room invalidation belong to the
            // connection manager.
            other => vec![SignalAction::Forward(other)],
        }
    }

    /// Identity assignment. Joining rooms is only legal afterwards
    /// (unauthenticated joins are rejected server-side), so the ip-room
    /// join and the secret announcements happen exactly here.
    fn on_identity_assigned(&mut self, message: IdentityMessage) -> Vec<SignalAction> {
        info!(
            event = "identity_assigned",
            peer_id = %message.peer_id,
            display_name = %message.display_name,
            "Server assigned identity"
        );
        self.identity = Some(Identity {
            peer_id: message.peer_id.clone(),
            peer_id_hash: message.peer_id_hash.clone(),
        });
        if let Err(e) = self.tabs.register(&message.peer_id) {
            warn!(
                event = "tabs_register_failure",
                error = %e,
                "Could not register peer id"
            );
        }

        let mut actions = vec![
            SignalAction::Emit(AppEvent::IdentityAssigned {
                peer_id: message.peer_id.clone(),
                display_name: message.display_name.clone(),
                device_name: message.device_name.clone(),
            }),
            SignalAction::Forward(ServerMessage::DisplayName { message }),
        ];
        actions.extend(self.send(ClientMessage::JoinIpRoom));
        match self.secrets.list_secrets() {
            Ok(room_secrets) => {
                actions.extend(self.send(ClientMessage::RoomSecrets { room_secrets }));
            }
            Err(e) => warn!(
                event = "secret_store_failure",
                error = %e,
                "Could not load room secrets"
            ),
        }
        actions
    }

    /// Both ends of a completed pairing get the fresh secret: persist it
    /// and join its room.
    fn on_pair_device_joined(&mut self, peer_id: String, room_secret: String) -> Vec<SignalAction> {
        if let Err(e) = self
            .secrets
            .set_entry(RoomSecretEntry::new(room_secret.clone()))
        {
            warn!(
                event = "secret_store_failure",
                error = %e,
                "Could not persist pair secret"
            );
        }
        let mut actions = vec![SignalAction::Emit(AppEvent::PairDeviceJoined {
            peer_id,
            room_secret: room_secret.clone(),
        })];
        actions.extend(self.send(ClientMessage::RoomSecrets {
            room_secrets: vec![room_secret],
        }));
        actions
    }

    // ── Outbound commands ────────────────────────────────────────────────

    /// Route one outbound message with its connectivity policy: pairing
    /// and public-room joins retry on a fixed timer, room/pair initiation
    /// surfaces an online-requirement notice, everything else is lossy.
    pub fn dispatch(&mut self, message: ClientMessage) -> Vec<SignalAction> {
        match &message {
            ClientMessage::PairDeviceJoin { .. }
            | ClientMessage::JoinPublicRoom { .. }
            | ClientMessage::LeavePublicRoom => self.queue_or_send(message),
            ClientMessage::PairDeviceInitiate => {
                self.notice_guarded(message, Notice::PairingRequiresConnection)
            }
            ClientMessage::CreatePublicRoom => {
                self.notice_guarded(message, Notice::PublicRoomRequiresConnection)
            }
            _ => self.send(message),
        }
    }

    /// Send now, or drop with a log line when the channel is down.
    fn send(&mut self, message: ClientMessage) -> Vec<SignalAction> {
        if self.state != ConnState::Connected {
            debug!(
                event = "send_while_disconnected",
                message = ?message,
                "Dropping outbound message"
            );
            return Vec::new();
        }
        self.encode(message)
    }

    /// Send now, or queue and arm the fixed retry timer.
    fn queue_or_send(&mut self, message: ClientMessage) -> Vec<SignalAction> {
        if self.state == ConnState::Connected {
            return self.encode(message);
        }
        self.pending.push(message);
        vec![SignalAction::StartTimer {
            kind: TimerKind::CommandRetry,
            delay: COMMAND_RETRY_DELAY,
        }]
    }

    /// Send now, or tell the user a connection is required.
    fn notice_guarded(&mut self, message: ClientMessage, notice: Notice) -> Vec<SignalAction> {
        if self.state == ConnState::Connected {
            return self.encode(message);
        }
        vec![SignalAction::Emit(AppEvent::Notice(notice))]
    }

    fn flush_or_rearm(&mut self) -> Vec<SignalAction> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        if self.state != ConnState::Connected {
            return vec![SignalAction::StartTimer {
                kind: TimerKind::CommandRetry,
                delay: COMMAND_RETRY_DELAY,
            }];
        }
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .flat_map(|message| self.encode(message))
            .collect()
    }

    fn encode(&self, message: ClientMessage) -> Vec<SignalAction> {
        match message.to_json() {
            Ok(json) => vec![SignalAction::SendFrame(json)],
            Err(e) => {
                warn!(
                    event = "client_message_encode_failure",
                    error = %e,
                    "Dropping unencodable client message"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{MemorySecretStore, MemoryTabsRegistry, SecretStore, TabsRegistry};

    fn session_with_store() -> (SignalingSession, Arc<MemorySecretStore>, Arc<MemoryTabsRegistry>)
    {
        let secrets = Arc::new(MemorySecretStore::new());
        let tabs = Arc::new(MemoryTabsRegistry::new());
        let session = SignalingSession::new(
            EndpointConfig {
                base_url: "wss://drop.example.org".to_string(),
                rtc_supported: true,
            },
            secrets.clone(),
            tabs.clone(),
        );
        (session, secrets, tabs)
    }

    fn session() -> SignalingSession {
        session_with_store().0
    }

    fn sent_frames(actions: &[SignalAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|action| match action {
                SignalAction::SendFrame(json) => Some(json.as_str()),
                _ => None,
            })
            .collect()
    }

    fn connected() -> SignalingSession {
        let mut session = session();
        session.connect();
        session.on_socket_open();
        session
    }

    const IDENTITY_FRAME: &str = r#"{"type":"display-name","message":{"displayName":"Cyan Otter","deviceName":"Test Browser","peerId":"pid-1","peerIdHash":"hash-1"}}"#;

    #[test]
    fn endpoint_encodes_capability_and_reauth_parameters() {
        let mut session = connected();
        assert_eq!(session.endpoint(), "wss://drop.example.org/server/webrtc");

        session.on_frame(IDENTITY_FRAME);
        assert_eq!(
            session.endpoint(),
            "wss://drop.example.org/server/webrtc?peer_id=pid-1&peer_id_hash=hash-1"
        );
    }

    #[test]
    fn room_joins_wait_for_identity_assignment() {
        let mut session = connected();

        // Identity assignment triggers the joins, in order: ip room first,
        // then the stored secrets.
        let actions = session.on_frame(IDENTITY_FRAME);
        let frames = sent_frames(&actions);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("join-ip-room"));
        assert!(frames[1].contains("room-secrets"));
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::Emit(AppEvent::IdentityAssigned { .. }))));
        // The manager also learns the assigned name.
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::Forward(ServerMessage::DisplayName { .. }))));
    }

    #[test]
    fn identity_registers_with_the_tabs_registry() {
        let (mut session, _, tabs) = session_with_store();
        session.connect();
        session.on_socket_open();
        session.on_frame(IDENTITY_FRAME);
        assert!(tabs.is_same_origin("pid-1"));

        session.disconnect();
        assert!(!tabs.is_same_origin("pid-1"));
    }

    #[test]
    fn disconnect_flushes_a_best_effort_notice() {
        let mut session = connected();
        let actions = session.disconnect();
        assert!(sent_frames(&actions)[0].contains("disconnect"));
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::CloseSocket)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::Emit(AppEvent::ServerDisconnected))));
        // No retry is scheduled after an explicit disconnect.
        assert!(!actions
            .iter()
            .any(|a| matches!(a, SignalAction::StartTimer { .. })));
    }

    #[test]
    fn close_debounces_then_schedules_one_fixed_retry() {
        let mut session = connected();

        let actions = session.on_socket_closed();
        assert!(matches!(
            actions[..],
            [SignalAction::StartTimer {
                kind: TimerKind::CloseDebounce,
                ..
            }]
        ));

        let actions = session.on_timer(TimerKind::CloseDebounce);
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::Emit(AppEvent::ServerDisconnected))));
        assert!(actions.iter().any(|a| matches!(
            a,
            SignalAction::StartTimer {
                kind: TimerKind::Reconnect,
                delay,
            } if *delay == RECONNECT_DELAY
        )));

        // The retry reconnects with the persistent "connecting" notice.
        let actions = session.on_timer(TimerKind::Reconnect);
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::Emit(AppEvent::Notice(Notice::Connecting)))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::OpenSocket { .. })));

        // Reconnection succeeded: transient notice this time.
        let actions = session.on_socket_open();
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::Emit(AppEvent::Notice(Notice::Connected)))));
    }

    #[test]
    fn retries_pause_while_offline_and_resume_online() {
        let mut session = connected();
        session.on_socket_closed();
        session.on_timer(TimerKind::CloseDebounce);

        let actions = session.on_connectivity(false);
        assert!(matches!(
            actions[..],
            [SignalAction::CancelTimer(TimerKind::Reconnect)]
        ));

        // While offline, connect attempts go nowhere.
        let actions = session.connect();
        assert!(!actions
            .iter()
            .any(|a| matches!(a, SignalAction::OpenSocket { .. })));

        let actions = session.on_connectivity(true);
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::OpenSocket { .. })));
    }

    #[test]
    fn visibility_return_reconnects() {
        let mut session = session();
        let actions = session.on_visibility(true);
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::OpenSocket { .. })));
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let mut session = connected();
        let actions = session.on_frame(r#"{"type":"ping"}"#);
        assert!(sent_frames(&actions)[0].contains("pong"));
    }

    #[test]
    fn unknown_message_kinds_are_dropped() {
        let mut session = connected();
        assert!(session
            .on_frame(r#"{"type":"quantum-entangle","qubits":3}"#)
            .is_empty());
        assert!(session.on_frame("garbage").is_empty());
    }

    #[test]
    fn membership_messages_are_forwarded() {
        let mut session = connected();
        let actions =
            session.on_frame(r#"{"type":"peers","peers":[],"roomType":"ip","roomId":"r"}"#);
        assert!(matches!(
            actions[..],
            [SignalAction::Forward(ServerMessage::Peers { .. })]
        ));
    }

    #[test]
    fn connectivity_gated_commands_retry_on_a_fixed_timer() {
        let mut session = session();

        let actions = session.dispatch(ClientMessage::JoinPublicRoom {
            public_room_id: "ABC12".to_string(),
            create_if_invalid: false,
        });
        assert!(matches!(
            actions[..],
            [SignalAction::StartTimer {
                kind: TimerKind::CommandRetry,
                delay,
            }] if delay == COMMAND_RETRY_DELAY
        ));

        // Still down: the timer re-arms.
        let actions = session.on_timer(TimerKind::CommandRetry);
        assert!(matches!(
            actions[..],
            [SignalAction::StartTimer {
                kind: TimerKind::CommandRetry,
                ..
            }]
        ));

        // Once connected the queued command drains.
        session.connect();
        session.on_socket_open();
        let actions = session.on_timer(TimerKind::CommandRetry);
        assert!(sent_frames(&actions)[0].contains("join-public-room"));
    }

    #[test]
    fn pairing_while_offline_surfaces_the_online_requirement() {
        let mut session = session();
        let actions = session.dispatch(ClientMessage::PairDeviceInitiate);
        assert!(matches!(
            actions[..],
            [SignalAction::Emit(AppEvent::Notice(
                Notice::PairingRequiresConnection
            ))]
        ));

        let actions = session.dispatch(ClientMessage::CreatePublicRoom);
        assert!(matches!(
            actions[..],
            [SignalAction::Emit(AppEvent::Notice(
                Notice::PublicRoomRequiresConnection
            ))]
        ));
    }

    #[test]
    fn completed_pairing_persists_the_secret_and_joins_its_room() {
        let (mut session, secrets, _) = session_with_store();
        session.connect();
        session.on_socket_open();

        let actions = session
            .on_frame(r#"{"type":"pair-device-joined","peerId":"p7","roomSecret":"fresh-secret"}"#);
        assert!(secrets.get_entry("fresh-secret").unwrap().is_some());
        assert!(actions
            .iter()
            .any(|a| matches!(a, SignalAction::Emit(AppEvent::PairDeviceJoined { .. }))));
        assert!(sent_frames(&actions)
            .iter()
            .any(|f| f.contains("room-secrets") && f.contains("fresh-secret")));
    }

    #[test]
    fn rate_limit_notice_reaches_the_user() {
        let mut session = connected();
        let actions = session.on_frame(r#"{"type":"join-key-rate-limit"}"#);
        assert!(matches!(
            actions[..],
            [SignalAction::Emit(AppEvent::Notice(Notice::JoinKeyRateLimited))]
        ));
    }
}
