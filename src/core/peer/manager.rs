//! Connection manager: owns the PeerId → PeerSession map and the room
//! reverse index, and applies the membership rules that decide when
//! sessions are created, refreshed, and torn down.
//!
//! Both registries are instance state with explicit construction and
//! teardown; nothing here is ambient or global.

use crate::core::events::AppEvent;
use crate::core::peer::session::{PeerAction, PeerRole, PeerSession, TransportCommand, TransportEvent};
use crate::core::peer::SessionContext;
use crate::core::signaling::messages::{
    ClientMessage, PeerInfo, RoomType, ServerMessage, SignalData,
};
use crate::core::storage::FileSource;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Actions the manager instructs its caller to execute.
#[derive(Debug, Clone)]
pub enum ManagerAction {
    /// Execute on the named peer's transport.
    Command {
        peer_id: String,
        command: TransportCommand,
    },
    /// Send on the signaling channel.
    Server(ClientMessage),
    /// Deliver to the embedding application.
    Emit(AppEvent),
}

pub struct PeersManager {
    ctx: SessionContext,
    peers: HashMap<String, PeerSession>,
    /// Reverse index room id → member peer ids, for mass detach when a
    /// room or secret is invalidated.
    rooms: HashMap<String, HashSet<String>>,
    /// Effective local display name (override or server-assigned).
    display_name: Option<String>,
    /// Name the server assigned; the fallback when an override is cleared.
    original_display_name: Option<String>,
}

impl PeersManager {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            peers: HashMap::new(),
            rooms: HashMap::new(),
            display_name: None,
            original_display_name: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn session(&self, peer_id: &str) -> Option<&PeerSession> {
        self.peers.get(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether any peer has a transfer in flight. Surfaced as a warning
    /// before page teardown.
    pub fn has_active_transfers(&self) -> bool {
        self.peers.values().any(PeerSession::is_busy)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    // ── Server message dispatch ──────────────────────────────────────────

    /// Feed one server message through the membership rules. Kinds owned
    /// by the signaling session or the application fall through silently.
    pub fn handle_server_message(&mut self, message: ServerMessage) -> Vec<ManagerAction> {
        match message {
            ServerMessage::Peers {
                peers,
                room_type,
                room_id,
            } => self.on_roster(&peers, room_type, &room_id),
            ServerMessage::PeerJoined {
                peer,
                room_type,
                room_id,
            } => self.on_peer_joined(&peer, room_type, &room_id),
            ServerMessage::PeerLeft {
                peer_id,
                room_type,
                disconnect,
            } => self.on_peer_left(&peer_id, room_type, disconnect),
            ServerMessage::Signal { sender, data } => self.on_signal(&sender.id, data),
            ServerMessage::SecretRoomDeleted { room_secret } => {
                self.on_secret_room_deleted(&room_secret)
            }
            ServerMessage::RoomSecretRegenerated {
                old_room_secret,
                new_room_secret,
            } => self.on_room_secret_regenerated(&old_room_secret, &new_room_secret),
            ServerMessage::DisplayName { message } => {
                self.on_identity(&message.display_name);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Roster snapshot for a room we just joined: we dial everyone listed.
    pub fn on_roster(
        &mut self,
        peers: &[PeerInfo],
        room_type: RoomType,
        room_id: &str,
    ) -> Vec<ManagerAction> {
        let mut actions = Vec::new();
        for peer in peers {
            actions.extend(self.create_or_refresh(PeerRole::Caller, peer, room_type, room_id));
        }
        actions
    }

    /// A peer joined one of our rooms: it dials, we answer.
    pub fn on_peer_joined(
        &mut self,
        peer: &PeerInfo,
        room_type: RoomType,
        room_id: &str,
    ) -> Vec<ManagerAction> {
        self.create_or_refresh(PeerRole::Callee, peer, room_type, room_id)
    }

    fn create_or_refresh(
        &mut self,
        role: PeerRole,
        peer: &PeerInfo,
        room_type: RoomType,
        room_id: &str,
    ) -> Vec<ManagerAction> {
        let peer_id = peer.id.clone();

        if let Some(session) = self.peers.get_mut(&peer_id) {
            let stored = session.association_id(room_type).map(str::to_string);
            let actions = if stored.as_deref() != Some(room_id) {
                // The association changed, which can change trust: update
                // it and re-evaluate the auto-accept policy.
                let actions = session.update_association(&self.ctx, room_type, room_id.to_string());
                session.evaluate_auto_accept(&self.ctx);
                if let Some(old) = stored {
                    Self::unindex(&mut self.rooms, &old, &peer_id);
                }
                Self::index(&mut self.rooms, room_id, &peer_id);
                debug!(
                    event = "peer_association_updated",
                    peer = %peer_id,
                    room_type = ?room_type,
                    "Association refreshed"
                );
                actions
            } else {
                // Unchanged association: just prod the transport.
                session.refresh()
            };
            return Self::wrap(&peer_id, actions);
        }

        let advertised = peer.name.as_ref().map(|n| n.display_name.clone());
        let (session, actions) = PeerSession::new(
            &self.ctx,
            peer_id.clone(),
            role,
            room_type,
            room_id.to_string(),
            advertised,
        );
        info!(
            event = "peer_session_created",
            peer = %peer_id,
            role = ?role,
            room_type = ?room_type,
            "New peer session"
        );
        self.peers.insert(peer_id.clone(), session);
        Self::index(&mut self.rooms, room_id, &peer_id);
        Self::wrap(&peer_id, actions)
    }

    /// A peer left a room. Only explicit departures detach; transport
    /// recovery handles silent drops.
    pub fn on_peer_left(
        &mut self,
        peer_id: &str,
        room_type: RoomType,
        explicit: bool,
    ) -> Vec<ManagerAction> {
        if !explicit {
            debug!(
                event = "peer_left_implicit",
                peer = %peer_id,
                "Ignoring non-explicit departure"
            );
            return Vec::new();
        }
        self.detach_association(peer_id, room_type)
    }

    fn detach_association(&mut self, peer_id: &str, room_type: RoomType) -> Vec<ManagerAction> {
        let Some(session) = self.peers.get_mut(peer_id) else {
            return Vec::new();
        };
        if let Some(removed) = session.remove_association(room_type) {
            Self::unindex(&mut self.rooms, &removed.room_id, peer_id);
            debug!(
                event = "peer_association_removed",
                peer = %peer_id,
                room_type = ?room_type,
                "Association removed"
            );
        }
        // A session without any justifying association does not exist.
        if session.associations().is_empty() {
            return self.teardown_peer(peer_id);
        }
        Vec::new()
    }

    fn teardown_peer(&mut self, peer_id: &str) -> Vec<ManagerAction> {
        let Some(mut session) = self.peers.remove(peer_id) else {
            return Vec::new();
        };
        for assoc in session.associations().to_vec() {
            Self::unindex(&mut self.rooms, &assoc.room_id, peer_id);
        }
        info!(event = "peer_session_closed", peer = %peer_id, "Peer session torn down");
        Self::wrap(peer_id, session.close())
    }

    /// Relayed signal envelope from a peer.
    pub fn on_signal(&mut self, peer_id: &str, data: SignalData) -> Vec<ManagerAction> {
        match self.peers.get_mut(peer_id) {
            Some(session) => Self::wrap(peer_id, session.handle_signal(data)),
            None => {
                warn!(
                    event = "signal_for_unknown_peer",
                    peer = %peer_id,
                    "Dropping signal for unknown peer"
                );
                Vec::new()
            }
        }
    }

    // ── Transport events / frames ────────────────────────────────────────

    /// A local transport event for one peer.
    pub fn on_transport_event(&mut self, peer_id: &str, event: TransportEvent) -> Vec<ManagerAction> {
        let Some(session) = self.peers.get_mut(peer_id) else {
            debug!(
                event = "transport_event_unknown_peer",
                peer = %peer_id,
                "Dropping transport event for unknown peer"
            );
            return Vec::new();
        };
        let actions = session.handle_transport_event(event);
        let opened = actions.iter().any(
            |a| matches!(a, PeerAction::Emit(AppEvent::PeerConnected { .. })),
        );
        let mut out = Self::wrap(peer_id, actions);

        // A freshly opened channel learns our display name right away.
        if opened {
            if let Some(name) = self.display_name.clone() {
                out.extend(self.notify_display_name(peer_id, &name));
            }
        }
        out
    }

    /// A payload received on one peer's open channel.
    pub fn on_peer_frame(
        &mut self,
        peer_id: &str,
        payload: crate::core::peer::frames::FramePayload,
    ) -> Vec<ManagerAction> {
        let ctx = self.ctx.clone();
        match self.peers.get_mut(peer_id) {
            Some(session) => Self::wrap(peer_id, session.handle_frame(&ctx, payload)),
            None => {
                warn!(
                    event = "frame_for_unknown_peer",
                    peer = %peer_id,
                    "Dropping frame for unknown peer"
                );
                Vec::new()
            }
        }
    }

    // ── Room invalidation ────────────────────────────────────────────────

    /// A paired device deleted the shared secret room.
    pub fn on_secret_room_deleted(&mut self, room_secret: &str) -> Vec<ManagerAction> {
        if let Err(e) = self.ctx.secrets.delete_secret(room_secret) {
            warn!(
                event = "room_secret_delete_failure",
                error = %e,
                "Could not delete invalidated secret"
            );
        }
        let mut actions = self.detach_room(room_secret, RoomType::Secret);
        actions.push(ManagerAction::Emit(AppEvent::SecretRoomDeleted {
            room_secret: room_secret.to_string(),
        }));
        actions
    }

    /// Locally delete stored pair secrets: forget them, detach their
    /// peers, tell the server.
    pub fn delete_room_secrets(&mut self, room_secrets: Vec<String>) -> Vec<ManagerAction> {
        let mut actions = Vec::new();
        for secret in &room_secrets {
            if let Err(e) = self.ctx.secrets.delete_secret(secret) {
                warn!(
                    event = "room_secret_delete_failure",
                    error = %e,
                    "Could not delete stored secret"
                );
            }
            actions.extend(self.detach_room(secret, RoomType::Secret));
        }
        actions.push(ManagerAction::Server(ClientMessage::RoomSecretsDeleted {
            room_secrets,
        }));
        actions
    }

    /// Leave the public room we are currently in.
    pub fn leave_public_room(&mut self, room_id: &str) -> Vec<ManagerAction> {
        let mut actions = self.detach_room(room_id, RoomType::PublicId);
        actions.push(ManagerAction::Server(ClientMessage::LeavePublicRoom));
        actions
    }

    /// Detach every member of `room_id`, applying the per-peer removal
    /// rule (drop the association, teardown when it was the last).
    fn detach_room(&mut self, room_id: &str, room_type: RoomType) -> Vec<ManagerAction> {
        let members: Vec<String> = self
            .rooms
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut actions = Vec::new();
        for peer_id in members {
            actions.extend(self.detach_association(&peer_id, room_type));
        }
        actions
    }

    /// The server replaced a legacy secret: persist the new one and
    /// re-announce it so its room membership refreshes.
    pub fn on_room_secret_regenerated(&mut self, old: &str, new: &str) -> Vec<ManagerAction> {
        if let Err(e) = self.ctx.secrets.update_secret(old, new) {
            warn!(
                event = "room_secret_update_failure",
                error = %e,
                "Could not persist regenerated secret"
            );
            return Vec::new();
        }
        info!(event = "room_secret_regenerated", "Pair secret regenerated");
        vec![ManagerAction::Server(ClientMessage::RoomSecrets {
            room_secrets: vec![new.to_string()],
        })]
    }

    /// The stored auto-accept preference for a pair secret changed.
    pub fn on_auto_accept_updated(&mut self, room_secret: &str, auto_accept: bool) {
        if let Err(e) = self.ctx.secrets.set_auto_accept(room_secret, auto_accept) {
            warn!(
                event = "auto_accept_update_failure",
                error = %e,
                "Could not persist auto-accept preference"
            );
        }
        let ctx = self.ctx.clone();
        if let Some(peer_id) = self
            .rooms
            .get(room_secret)
            .and_then(|set| set.iter().next().cloned())
        {
            if let Some(session) = self.peers.get_mut(&peer_id) {
                session.set_auto_accept(&ctx, auto_accept);
            }
        }
    }

    // ── Display names ────────────────────────────────────────────────────

    /// Record the server-assigned name; it is the effective name until the
    /// user overrides it.
    pub fn on_identity(&mut self, display_name: &str) {
        self.original_display_name = Some(display_name.to_string());
        if self.display_name.is_none() {
            self.display_name = Some(display_name.to_string());
        }
    }

    /// Override the local display name (`None` restores the assigned one)
    /// and announce it to every open peer.
    pub fn set_display_name(&mut self, name: Option<String>) -> Vec<ManagerAction> {
        self.display_name = name.or_else(|| self.original_display_name.clone());
        let Some(effective) = self.display_name.clone() else {
            return Vec::new();
        };
        let peer_ids = self.peer_ids();
        let mut actions = Vec::new();
        for peer_id in peer_ids {
            actions.extend(self.notify_display_name(&peer_id, &effective));
        }
        actions
    }

    fn notify_display_name(&mut self, peer_id: &str, name: &str) -> Vec<ManagerAction> {
        match self.peers.get(peer_id) {
            Some(session) => match session.send_display_name(name) {
                Ok(actions) => Self::wrap(peer_id, actions),
                Err(e) => {
                    warn!(
                        event = "display_name_send_failure",
                        peer = %peer_id,
                        error = %e,
                        "Could not announce display name"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }

    // ── Transfer commands ────────────────────────────────────────────────

    /// Send a batch of files to a connected peer.
    pub fn request_files(
        &mut self,
        peer_id: &str,
        files: Vec<Box<dyn FileSource>>,
    ) -> Result<Vec<ManagerAction>> {
        let ctx = self.ctx.clone();
        let session = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| anyhow!("unknown peer: {peer_id}"))?;
        Ok(Self::wrap(peer_id, session.request_files(&ctx, files)?))
    }

    /// Answer a pending inbound transfer request.
    pub fn respond_to_request(&mut self, peer_id: &str, accepted: bool) -> Result<Vec<ManagerAction>> {
        let session = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| anyhow!("unknown peer: {peer_id}"))?;
        Ok(Self::wrap(peer_id, session.respond_to_request(accepted)?))
    }

    /// Send a text message to a connected peer.
    pub fn send_text(&mut self, peer_id: &str, text: &str) -> Result<Vec<ManagerAction>> {
        let session = self
            .peers
            .get(peer_id)
            .ok_or_else(|| anyhow!("unknown peer: {peer_id}"))?;
        Ok(Self::wrap(peer_id, session.send_text(text)?))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Tear down every peer session (page teardown / explicit disconnect).
    pub fn teardown(&mut self) -> Vec<ManagerAction> {
        let peer_ids = self.peer_ids();
        let mut actions = Vec::new();
        for peer_id in peer_ids {
            actions.extend(self.teardown_peer(&peer_id));
        }
        self.rooms.clear();
        actions
    }

    // ── Index helpers ────────────────────────────────────────────────────

    fn index(rooms: &mut HashMap<String, HashSet<String>>, room_id: &str, peer_id: &str) {
        rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(peer_id.to_string());
    }

    fn unindex(rooms: &mut HashMap<String, HashSet<String>>, room_id: &str, peer_id: &str) {
        if let Some(members) = rooms.get_mut(room_id) {
            members.remove(peer_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    fn wrap(peer_id: &str, actions: Vec<PeerAction>) -> Vec<ManagerAction> {
        actions
            .into_iter()
            .map(|action| match action {
                PeerAction::Command(command) => ManagerAction::Command {
                    peer_id: peer_id.to_string(),
                    command,
                },
                PeerAction::Server(message) => ManagerAction::Server(message),
                PeerAction::Emit(event) => ManagerAction::Emit(event),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::peer::frames::FramePayload;
    use crate::core::peer::session::NegotiationState;
    use crate::core::storage::{MemorySecretStore, MemoryTabsRegistry, RoomSecretEntry, SecretStore};
    use std::sync::Arc;

    fn manager() -> PeersManager {
        PeersManager::new(SessionContext::new(
            Arc::new(MemorySecretStore::new()),
            Arc::new(MemoryTabsRegistry::new()),
        ))
    }

    fn peer(id: &str) -> PeerInfo {
        PeerInfo {
            id: id.to_string(),
            name: None,
            rtc_supported: true,
        }
    }

    fn open_channel(manager: &mut PeersManager, peer_id: &str) -> Vec<ManagerAction> {
        manager.on_transport_event(
            peer_id,
            TransportEvent::ChannelOpened {
                max_message_size: None,
                local_fingerprint: "AA".into(),
                remote_fingerprint: "BB".into(),
            },
        )
    }

    #[test]
    fn peer_map_tracks_exactly_the_associated_peers() {
        let mut manager = manager();

        // Roster snapshot: we dial both listed peers.
        manager.on_roster(&[peer("p1"), peer("p2")], RoomType::Ip, "10.0.0.0");
        assert_eq!(manager.peer_count(), 2);
        assert_eq!(manager.session("p1").unwrap().role(), PeerRole::Caller);

        // p1 also shows up in a secret room.
        manager.on_peer_joined(&peer("p1"), RoomType::Secret, "s1");
        assert_eq!(manager.peer_count(), 2);
        assert_eq!(manager.session("p1").unwrap().associations().len(), 2);

        // Losing one of two associations keeps the session alive.
        manager.on_peer_left("p1", RoomType::Ip, true);
        let session = manager.session("p1").unwrap();
        assert_eq!(session.associations().len(), 1);
        assert_eq!(session.pair_secret(), Some("s1"));

        // Losing the last one tears it down.
        let actions = manager.on_peer_left("p1", RoomType::Secret, true);
        assert!(manager.session("p1").is_none());
        assert!(actions
            .iter()
            .any(|a| matches!(a, ManagerAction::Emit(AppEvent::PeerDisconnected { .. }))));
        assert!(actions.iter().any(|a| matches!(
            a,
            ManagerAction::Command {
                command: TransportCommand::Close,
                ..
            }
        )));
        assert_eq!(manager.peer_count(), 1);
    }

    #[test]
    fn implicit_departure_is_ignored() {
        let mut manager = manager();
        manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.0");
        manager.on_peer_left("p1", RoomType::Ip, false);
        assert_eq!(manager.peer_count(), 1);
    }

    #[test]
    fn unchanged_refresh_keeps_the_session_and_its_state() {
        let mut manager = manager();
        manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.0");
        open_channel(&mut manager, "p1");
        assert_eq!(manager.session("p1").unwrap().state(), NegotiationState::Open);

        // The same roster arrives again (e.g. after a signaling reconnect):
        // the open session is prodded, not re-created or renegotiated.
        let actions = manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.0");
        assert!(actions.is_empty());
        let session = manager.session("p1").unwrap();
        assert_eq!(session.state(), NegotiationState::Open);
        assert_eq!(session.associations().len(), 1);
    }

    #[test]
    fn changed_association_updates_without_renegotiation() {
        let mut manager = manager();
        manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.0");
        open_channel(&mut manager, "p1");

        manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.1");
        let session = manager.session("p1").unwrap();
        assert_eq!(session.association_id(RoomType::Ip), Some("10.0.0.1"));
        assert_eq!(session.state(), NegotiationState::Open);
    }

    #[test]
    fn signal_envelopes_route_to_their_session() {
        let mut manager = manager();
        manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.0");

        let actions = manager.on_signal(
            "p1",
            SignalData::candidate(serde_json::json!({"candidate": "..."})),
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            ManagerAction::Command {
                peer_id,
                command: TransportCommand::AddCandidate { .. },
            } if peer_id == "p1"
        )));

        // Unknown peers are dropped, never created implicitly.
        let actions = manager.on_signal("ghost", SignalData::default());
        assert!(actions.is_empty());
        assert!(manager.session("ghost").is_none());
    }

    #[test]
    fn secret_room_deletion_detaches_every_member() {
        let mut manager = manager();
        manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.0");
        manager.on_peer_joined(&peer("p1"), RoomType::Secret, "shared-secret");
        manager.on_peer_joined(&peer("p2"), RoomType::Secret, "shared-secret");

        let actions = manager.on_secret_room_deleted("shared-secret");

        // p1 survives on its ip association; p2 is gone entirely.
        assert!(manager.session("p1").is_some());
        assert_eq!(manager.session("p1").unwrap().associations().len(), 1);
        assert!(manager.session("p2").is_none());
        assert!(actions
            .iter()
            .any(|a| matches!(a, ManagerAction::Emit(AppEvent::SecretRoomDeleted { .. }))));
    }

    #[test]
    fn deleting_local_secrets_notifies_the_server() {
        let secrets = Arc::new(MemorySecretStore::new());
        secrets.set_entry(RoomSecretEntry::new("s1")).unwrap();
        let mut manager = PeersManager::new(SessionContext::new(
            secrets.clone(),
            Arc::new(MemoryTabsRegistry::new()),
        ));
        manager.on_peer_joined(&peer("p1"), RoomType::Secret, "s1");

        let actions = manager.delete_room_secrets(vec!["s1".to_string()]);
        assert!(secrets.get_entry("s1").unwrap().is_none());
        assert!(manager.session("p1").is_none());
        assert!(actions.iter().any(|a| matches!(
            a,
            ManagerAction::Server(ClientMessage::RoomSecretsDeleted { .. })
        )));
    }

    #[test]
    fn regenerated_secret_is_persisted_and_reannounced() {
        let secrets = Arc::new(MemorySecretStore::new());
        secrets.set_entry(RoomSecretEntry::new("old")).unwrap();
        let mut manager = PeersManager::new(SessionContext::new(
            secrets.clone(),
            Arc::new(MemoryTabsRegistry::new()),
        ));

        let actions = manager.on_room_secret_regenerated("old", "new");
        assert_eq!(secrets.list_secrets().unwrap(), vec!["new"]);
        assert!(actions.iter().any(|a| matches!(
            a,
            ManagerAction::Server(ClientMessage::RoomSecrets { room_secrets }) if room_secrets == &vec!["new".to_string()]
        )));
    }

    #[test]
    fn auto_accept_update_reaches_store_and_session() {
        let secrets = Arc::new(MemorySecretStore::new());
        secrets
            .set_entry(RoomSecretEntry::new("x".repeat(256)))
            .unwrap();
        let mut manager = PeersManager::new(SessionContext::new(
            secrets.clone(),
            Arc::new(MemoryTabsRegistry::new()),
        ));
        manager.on_peer_joined(&peer("p1"), RoomType::Secret, &"x".repeat(256));
        assert!(!manager.session("p1").unwrap().auto_accept());

        manager.on_auto_accept_updated(&"x".repeat(256), true);
        assert!(manager.session("p1").unwrap().auto_accept());
        assert!(secrets
            .get_entry(&"x".repeat(256))
            .unwrap()
            .unwrap()
            .auto_accept);
    }

    #[test]
    fn freshly_opened_channel_learns_our_display_name() {
        let mut manager = manager();
        manager.on_identity("Turquoise Heron");
        manager.on_roster(&[peer("p1")], RoomType::Ip, "10.0.0.0");

        let actions = open_channel(&mut manager, "p1");
        let announced = actions.iter().any(|a| match a {
            ManagerAction::Command {
                command: TransportCommand::SendFrame(FramePayload::Control(raw)),
                ..
            } => raw.contains("display-name-changed") && raw.contains("Turquoise Heron"),
            _ => false,
        });
        assert!(announced);
    }

    #[test]
    fn teardown_closes_every_session() {
        let mut manager = manager();
        manager.on_roster(&[peer("p1"), peer("p2")], RoomType::Ip, "10.0.0.0");

        let actions = manager.teardown();
        assert_eq!(manager.peer_count(), 0);
        let closes = actions
            .iter()
            .filter(|a| {
                matches!(
                    a,
                    ManagerAction::Command {
                        command: TransportCommand::Close,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(closes, 2);
    }
}
