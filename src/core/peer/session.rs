//! Per-peer session: transport negotiation state machine and frame
//! dispatch for one remote peer.
//!
//! The session never touches the platform transport directly. It consumes
//! [`TransportEvent`]s and inbound signal envelopes, and returns
//! [`PeerAction`]s — transport commands, signaling sends, app events — for
//! the embedding layer to execute. This keeps every state and legal
//! transition enumerable and testable without a live transport.

use crate::core::config::{CHUNK_SIZE, LOW_WATER_FACTOR, PAIR_SECRET_LENGTH};
use crate::core::events::AppEvent;
use crate::core::peer::frames::{FramePayload, PeerFrame};
use crate::core::peer::transfer::TransferSession;
use crate::core::peer::SessionContext;
use crate::core::signaling::messages::{
    ClientMessage, RoomAssociation, RoomType, SdpKind, SessionDescription, SignalData,
};
use crate::core::storage::FileSource;
use crate::utils::hash::connection_hash;
use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

// ── Roles and states ─────────────────────────────────────────────────────────

/// Which side of the negotiation this endpoint plays for this peer.
/// Roster members are dialed as caller; joining peers are answered as
/// callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// Caller: local offer requested from the transport.
    Offering,
    /// Caller: offer relayed, waiting for the remote answer.
    AwaitingAnswer,
    /// Callee: waiting for a relayed offer.
    AwaitingOffer,
    /// Callee: local answer requested from the transport.
    Answering,
    /// Descriptions exchanged, connectivity checks running.
    Negotiating,
    /// Data channel open.
    Open,
    Closed,
}

// ── Transport seam ───────────────────────────────────────────────────────────

/// Events the platform transport reports into the session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The local description finished building.
    DescriptionReady(SessionDescription),
    /// A local connectivity candidate was discovered.
    CandidateReady(Value),
    /// The data channel opened.
    ChannelOpened {
        /// Transport's maximum message size, when it advertises one.
        max_message_size: Option<usize>,
        local_fingerprint: String,
        remote_fingerprint: String,
    },
    ChannelClosed,
    /// Send buffer drained below the configured low-water threshold.
    BufferLow { buffered_amount: usize },
    ConnectionFailed,
}

/// Commands the session issues to the platform transport.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// Open a connection and data channel, build the local offer.
    StartOffer,
    /// Apply the remote offer and build the local answer.
    AcceptOffer { offer: SessionDescription },
    /// Apply the remote answer.
    AcceptAnswer { answer: SessionDescription },
    /// Apply a remote connectivity candidate.
    AddCandidate { candidate: Value },
    /// Install the low-water threshold on the freshly opened channel.
    ConfigureChannel { low_water_threshold: usize },
    /// Send one payload on the data channel.
    SendFrame(FramePayload),
    Close,
}

/// Everything a session asks its caller to do.
#[derive(Debug, Clone)]
pub enum PeerAction {
    /// Execute on this peer's transport.
    Command(TransportCommand),
    /// Send on the signaling channel.
    Server(ClientMessage),
    /// Deliver to the embedding application.
    Emit(AppEvent),
}

impl PeerAction {
    pub(crate) fn control_frame(frame: &PeerFrame) -> Result<Self> {
        Ok(Self::Command(TransportCommand::SendFrame(
            FramePayload::control(frame)?,
        )))
    }

    pub(crate) fn chunk(bytes: bytes::Bytes) -> Self {
        Self::Command(TransportCommand::SendFrame(FramePayload::Chunk(bytes)))
    }
}

// ── PeerSession ──────────────────────────────────────────────────────────────

pub struct PeerSession {
    peer_id: String,
    role: PeerRole,
    state: NegotiationState,
    /// Insertion-ordered; the first entry routes signal envelopes.
    associations: Vec<RoomAssociation>,
    display_name: Option<String>,
    auto_accept: bool,
    /// Negotiated at channel open; the default until then.
    chunk_size: usize,
    connection_hash: Option<String>,
    transfer: TransferSession,
}

impl PeerSession {
    /// Create a session for a newly seen peer and, for the caller role,
    /// start negotiating immediately.
    pub fn new(
        ctx: &SessionContext,
        peer_id: String,
        role: PeerRole,
        room_type: RoomType,
        room_id: String,
        advertised_name: Option<String>,
    ) -> (Self, Vec<PeerAction>) {
        let mut session = Self {
            transfer: TransferSession::new(peer_id.clone()),
            peer_id,
            role,
            state: NegotiationState::Idle,
            associations: Vec::new(),
            display_name: advertised_name,
            auto_accept: false,
            chunk_size: CHUNK_SIZE,
            connection_hash: None,
        };
        let mut actions = session.update_association(ctx, room_type, room_id);
        session.evaluate_auto_accept(ctx);
        actions.extend(session.start_negotiation());
        (session, actions)
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn auto_accept(&self) -> bool {
        self.auto_accept
    }

    pub fn connection_hash(&self) -> Option<&str> {
        self.connection_hash.as_deref()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_busy(&self) -> bool {
        self.transfer.is_busy()
    }

    pub fn associations(&self) -> &[RoomAssociation] {
        &self.associations
    }

    pub fn association_id(&self, room_type: RoomType) -> Option<&str> {
        self.associations
            .iter()
            .find(|a| a.room_type == room_type)
            .map(|a| a.room_id.as_str())
    }

    /// The stored pair secret, when a secret association exists.
    pub fn pair_secret(&self) -> Option<&str> {
        self.association_id(RoomType::Secret)
    }

    // ── Associations ─────────────────────────────────────────────────────

    /// Insert or replace the association for `room_type`.
    ///
    /// Secret associations get hygiene on top: an older, different stored
    /// secret for the same (non-same-origin) peer is deleted, and a
    /// legacy-length secret triggers regeneration from the caller side.
    pub fn update_association(
        &mut self,
        ctx: &SessionContext,
        room_type: RoomType,
        room_id: String,
    ) -> Vec<PeerAction> {
        let same_origin = ctx.tabs.is_same_origin(&self.peer_id);

        // Same-origin peers share every secret, so a differing secret is
        // not a duplicate pairing there.
        if !same_origin && room_type == RoomType::Secret {
            if let Some(existing) = self.pair_secret().map(str::to_string) {
                if existing != room_id {
                    match ctx.secrets.delete_secret(&existing) {
                        Ok(Some(_)) => info!(
                            event = "duplicate_room_secret_deleted",
                            peer = %self.peer_id,
                            "Deleted older duplicate pair secret for peer"
                        ),
                        Ok(None) => {}
                        Err(e) => warn!(
                            event = "room_secret_delete_failure",
                            peer = %self.peer_id,
                            error = %e,
                            "Could not delete duplicate pair secret"
                        ),
                    }
                }
            }
        }

        match self
            .associations
            .iter_mut()
            .find(|a| a.room_type == room_type)
        {
            Some(assoc) => assoc.room_id = room_id.clone(),
            None => self.associations.push(RoomAssociation {
                room_type,
                room_id: room_id.clone(),
            }),
        }

        let mut actions = Vec::new();
        if !same_origin
            && room_type == RoomType::Secret
            && room_id.len() != PAIR_SECRET_LENGTH
            && self.role == PeerRole::Caller
        {
            info!(
                event = "room_secret_regeneration_requested",
                peer = %self.peer_id,
                "Legacy-length pair secret, requesting regeneration"
            );
            actions.push(PeerAction::Server(ClientMessage::RegenerateRoomSecret {
                room_secret: room_id,
            }));
        }
        actions
    }

    /// Remove one association. The caller is responsible for tearing the
    /// session down when the last one goes.
    pub fn remove_association(&mut self, room_type: RoomType) -> Option<RoomAssociation> {
        let index = self
            .associations
            .iter()
            .position(|a| a.room_type == room_type)?;
        Some(self.associations.remove(index))
    }

    /// Re-read the stored auto-accept preference for the pair secret.
    /// Same-origin peers never auto-accept: they share all secrets, so the
    /// association proves nothing.
    pub fn evaluate_auto_accept(&mut self, ctx: &SessionContext) {
        let stored = match self.pair_secret() {
            Some(secret) => ctx
                .secrets
                .get_entry(secret)
                .ok()
                .flatten()
                .is_some_and(|entry| entry.auto_accept),
            None => false,
        };
        self.set_auto_accept(ctx, stored);
    }

    pub fn set_auto_accept(&mut self, ctx: &SessionContext, auto_accept: bool) {
        self.auto_accept = auto_accept && !ctx.tabs.is_same_origin(&self.peer_id);
    }

    // ── Negotiation ──────────────────────────────────────────────────────

    fn start_negotiation(&mut self) -> Vec<PeerAction> {
        match self.role {
            PeerRole::Caller => {
                self.state = NegotiationState::Offering;
                vec![PeerAction::Command(TransportCommand::StartOffer)]
            }
            PeerRole::Callee => {
                self.state = NegotiationState::AwaitingOffer;
                Vec::new()
            }
        }
    }

    /// Liveness prod for an unchanged association: restart a dead caller
    /// connection, otherwise do nothing. Never resets live negotiation.
    pub fn refresh(&mut self) -> Vec<PeerAction> {
        match self.state {
            NegotiationState::Idle | NegotiationState::Closed => self.start_negotiation(),
            _ => Vec::new(),
        }
    }

    /// One inbound signal envelope addressed to this peer.
    pub fn handle_signal(&mut self, data: SignalData) -> Vec<PeerAction> {
        let mut actions = Vec::new();
        // A signal for a closed session restarts the machine: the caller
        // re-offers, the callee goes back to waiting.
        if self.state == NegotiationState::Closed {
            actions.extend(self.start_negotiation());
        }

        if let Some(description) = data.sdp {
            match description.kind {
                SdpKind::Offer => {
                    if self.role == PeerRole::Caller {
                        warn!(
                            event = "unexpected_offer",
                            peer = %self.peer_id,
                            "Caller received an offer, dropping"
                        );
                        return actions;
                    }
                    self.state = NegotiationState::Answering;
                    actions.push(PeerAction::Command(TransportCommand::AcceptOffer {
                        offer: description,
                    }));
                }
                SdpKind::Answer => {
                    if self.state != NegotiationState::AwaitingAnswer {
                        warn!(
                            event = "unexpected_answer",
                            peer = %self.peer_id,
                            state = ?self.state,
                            "Answer outside offer exchange, dropping"
                        );
                        return actions;
                    }
                    self.state = NegotiationState::Negotiating;
                    actions.push(PeerAction::Command(TransportCommand::AcceptAnswer {
                        answer: description,
                    }));
                }
            }
        } else if let Some(candidate) = data.ice {
            actions.push(PeerAction::Command(TransportCommand::AddCandidate {
                candidate,
            }));
        } else {
            warn!(
                event = "empty_signal",
                peer = %self.peer_id,
                "Signal envelope without sdp or ice"
            );
        }
        actions
    }

    /// One local transport event for this peer.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<PeerAction> {
        match event {
            TransportEvent::DescriptionReady(description) => {
                match (description.kind, self.state) {
                    (SdpKind::Offer, NegotiationState::Offering) => {
                        self.state = NegotiationState::AwaitingAnswer;
                        self.send_signal(SignalData::description(description))
                    }
                    (SdpKind::Answer, NegotiationState::Answering) => {
                        self.state = NegotiationState::Negotiating;
                        self.send_signal(SignalData::description(description))
                    }
                    (kind, state) => {
                        warn!(
                            event = "unexpected_local_description",
                            peer = %self.peer_id,
                            ?kind,
                            ?state,
                            "Local description outside negotiation, dropping"
                        );
                        Vec::new()
                    }
                }
            }
            TransportEvent::CandidateReady(candidate) => {
                self.send_signal(SignalData::candidate(candidate))
            }
            TransportEvent::ChannelOpened {
                max_message_size,
                local_fingerprint,
                remote_fingerprint,
            } => {
                self.state = NegotiationState::Open;
                self.chunk_size = max_message_size.map_or(CHUNK_SIZE, |m| m.min(CHUNK_SIZE));
                let low_water = LOW_WATER_FACTOR * self.chunk_size;

                // Verification code: caller fingerprint first on both ends.
                let hash = match self.role {
                    PeerRole::Caller => connection_hash(&local_fingerprint, &remote_fingerprint),
                    PeerRole::Callee => connection_hash(&remote_fingerprint, &local_fingerprint),
                };
                self.connection_hash = Some(hash.clone());

                info!(
                    event = "peer_channel_open",
                    peer = %self.peer_id,
                    chunk_size = self.chunk_size,
                    "Peer channel open"
                );
                vec![
                    PeerAction::Command(TransportCommand::ConfigureChannel {
                        low_water_threshold: low_water,
                    }),
                    PeerAction::Emit(AppEvent::PeerConnected {
                        peer_id: self.peer_id.clone(),
                        connection_hash: hash,
                    }),
                ]
            }
            TransportEvent::ChannelClosed | TransportEvent::ConnectionFailed => {
                self.on_channel_down()
            }
            TransportEvent::BufferLow { buffered_amount } => {
                match self.transfer.on_buffer_low(buffered_amount) {
                    Ok(actions) => actions,
                    Err(e) => {
                        warn!(
                            event = "chunk_read_failure",
                            peer = %self.peer_id,
                            error = %e,
                            "Chunk production failed"
                        );
                        Vec::new()
                    }
                }
            }
        }
    }

    fn on_channel_down(&mut self) -> Vec<PeerAction> {
        if matches!(
            self.state,
            NegotiationState::Closed | NegotiationState::Idle
        ) {
            return Vec::new();
        }
        info!(
            event = "peer_channel_closed",
            peer = %self.peer_id,
            role = ?self.role,
            "Peer channel closed"
        );
        self.state = NegotiationState::Closed;
        self.connection_hash = None;
        self.transfer.reset();

        let mut actions = vec![PeerAction::Emit(AppEvent::PeerDisconnected {
            peer_id: self.peer_id.clone(),
        })];
        // The caller self-heals; the callee waits for a fresh offer.
        actions.extend(self.start_negotiation());
        actions
    }

    /// Tear the session down for good (explicit disconnect or last
    /// association removed).
    pub fn close(&mut self) -> Vec<PeerAction> {
        self.state = NegotiationState::Closed;
        self.connection_hash = None;
        self.transfer.reset();
        vec![
            PeerAction::Command(TransportCommand::Close),
            PeerAction::Emit(AppEvent::PeerDisconnected {
                peer_id: self.peer_id.clone(),
            }),
        ]
    }

    fn send_signal(&self, data: SignalData) -> Vec<PeerAction> {
        // Any shared room suffices for routing; use the first association
        // in iteration order.
        match self.associations.first() {
            Some(assoc) => vec![PeerAction::Server(ClientMessage::Signal {
                to: self.peer_id.clone(),
                room_type: assoc.room_type,
                room_id: assoc.room_id.clone(),
                data,
            })],
            None => {
                warn!(
                    event = "signal_without_association",
                    peer = %self.peer_id,
                    "No room association to route signal through"
                );
                Vec::new()
            }
        }
    }

    // ── Peer frames ──────────────────────────────────────────────────────

    /// One payload from the open peer channel.
    pub fn handle_frame(&mut self, ctx: &SessionContext, payload: FramePayload) -> Vec<PeerAction> {
        match payload {
            FramePayload::Chunk(bytes) => match self.transfer.handle_chunk(bytes) {
                Ok(actions) => actions,
                Err(e) => {
                    warn!(
                        event = "chunk_handling_failure",
                        peer = %self.peer_id,
                        error = %e,
                        "Dropping chunk"
                    );
                    Vec::new()
                }
            },
            FramePayload::Control(raw) => {
                let frame = match PeerFrame::parse(&raw) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(
                            event = "peer_frame_parse_failure",
                            peer = %self.peer_id,
                            error = %e,
                            "Dropping malformed peer frame"
                        );
                        return Vec::new();
                    }
                };
                self.handle_control_frame(ctx, frame)
            }
        }
    }

    fn handle_control_frame(&mut self, ctx: &SessionContext, frame: PeerFrame) -> Vec<PeerAction> {
        debug!(event = "peer_frame", peer = %self.peer_id, frame = ?frame);
        match frame {
            PeerFrame::DisplayNameChanged { display_name } => {
                self.on_display_name_changed(display_name)
            }
            PeerFrame::Request { request } => {
                match self
                    .transfer
                    .handle_request(request, &ctx.policy, self.auto_accept)
                {
                    Ok(actions) => actions,
                    Err(e) => {
                        warn!(
                            event = "transfer_request_failure",
                            peer = %self.peer_id,
                            error = %e,
                            "Dropping transfer request"
                        );
                        Vec::new()
                    }
                }
            }
            PeerFrame::Header { name, mime, size } => self.transfer.handle_header(name, mime, size),
            PeerFrame::Progress { progress } => self.transfer.handle_progress_report(progress),
            PeerFrame::FilesTransferResponse { accepted, reason } => {
                match self.transfer.handle_response(accepted, reason, self.chunk_size) {
                    Ok(actions) => actions,
                    Err(e) => {
                        warn!(
                            event = "transfer_response_failure",
                            peer = %self.peer_id,
                            error = %e,
                            "Dropping transfer response"
                        );
                        Vec::new()
                    }
                }
            }
            PeerFrame::FileTransferComplete {
                size,
                duration,
                speed,
            } => {
                match self
                    .transfer
                    .handle_file_complete(size, duration, speed, self.chunk_size)
                {
                    Ok(actions) => actions,
                    Err(e) => {
                        warn!(
                            event = "file_complete_failure",
                            peer = %self.peer_id,
                            error = %e,
                            "Could not advance outbound queue"
                        );
                        Vec::new()
                    }
                }
            }
            PeerFrame::MessageTransferComplete => self.transfer.handle_message_complete(),
            PeerFrame::Text { text } => self.transfer.handle_text(&text),
        }
    }

    fn on_display_name_changed(&mut self, display_name: String) -> Vec<PeerAction> {
        if self.display_name.as_deref() == Some(display_name.as_str()) {
            return Vec::new();
        }
        self.display_name = Some(display_name.clone());
        vec![PeerAction::Emit(AppEvent::PeerDisplayNameChanged {
            peer_id: self.peer_id.clone(),
            display_name,
        })]
    }

    // ── Local commands ───────────────────────────────────────────────────

    /// Request to send `files` to this peer. Queued when a transfer is
    /// already running.
    pub fn request_files(
        &mut self,
        ctx: &SessionContext,
        files: Vec<Box<dyn FileSource>>,
    ) -> Result<Vec<PeerAction>> {
        if self.state != NegotiationState::Open {
            return Err(anyhow!("peer channel not open: {}", self.peer_id));
        }
        self.transfer.request_files(files, ctx.scaler.as_deref())
    }

    /// Answer the pending inbound request.
    pub fn respond_to_request(&mut self, accepted: bool) -> Result<Vec<PeerAction>> {
        self.transfer.respond(accepted)
    }

    pub fn send_text(&self, text: &str) -> Result<Vec<PeerAction>> {
        if self.state != NegotiationState::Open {
            return Err(anyhow!("peer channel not open: {}", self.peer_id));
        }
        self.transfer.send_text(text)
    }

    /// Announce the local display name. Silently skipped while the channel
    /// is down; the peer learns it on the next open.
    pub fn send_display_name(&self, display_name: &str) -> Result<Vec<PeerAction>> {
        if self.state != NegotiationState::Open {
            return Ok(Vec::new());
        }
        Ok(vec![PeerAction::control_frame(
            &PeerFrame::DisplayNameChanged {
                display_name: display_name.to_string(),
            },
        )?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{
        MemorySecretStore, MemoryTabsRegistry, RoomSecretEntry, SecretStore, TabsRegistry,
    };
    use std::sync::Arc;

    fn ctx() -> SessionContext {
        SessionContext::new(
            Arc::new(MemorySecretStore::new()),
            Arc::new(MemoryTabsRegistry::new()),
        )
    }

    fn offer() -> SessionDescription {
        SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0 offer".to_string(),
        }
    }

    fn answer() -> SessionDescription {
        SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0 answer".to_string(),
        }
    }

    fn opened(local: &str, remote: &str) -> TransportEvent {
        TransportEvent::ChannelOpened {
            max_message_size: None,
            local_fingerprint: local.to_string(),
            remote_fingerprint: remote.to_string(),
        }
    }

    fn new_session(ctx: &SessionContext, role: PeerRole) -> (PeerSession, Vec<PeerAction>) {
        PeerSession::new(
            ctx,
            "peer-1".to_string(),
            role,
            RoomType::Ip,
            "198.51.100.4".to_string(),
            None,
        )
    }

    #[test]
    fn caller_walks_the_offer_path() {
        let ctx = ctx();
        let (mut session, actions) = new_session(&ctx, PeerRole::Caller);
        assert!(matches!(
            actions[..],
            [PeerAction::Command(TransportCommand::StartOffer)]
        ));
        assert_eq!(session.state(), NegotiationState::Offering);

        // Local offer ready: relayed through the first association.
        let actions = session.handle_transport_event(TransportEvent::DescriptionReady(offer()));
        match &actions[..] {
            [PeerAction::Server(ClientMessage::Signal {
                to,
                room_type,
                room_id,
                data,
            })] => {
                assert_eq!(to, "peer-1");
                assert_eq!(*room_type, RoomType::Ip);
                assert_eq!(room_id, "198.51.100.4");
                assert_eq!(data.sdp.as_ref().unwrap().kind, SdpKind::Offer);
            }
            other => panic!("unexpected actions: {other:?}"),
        }
        assert_eq!(session.state(), NegotiationState::AwaitingAnswer);

        // Remote answer arrives.
        let actions = session.handle_signal(SignalData::description(answer()));
        assert!(matches!(
            actions[..],
            [PeerAction::Command(TransportCommand::AcceptAnswer { .. })]
        ));
        assert_eq!(session.state(), NegotiationState::Negotiating);

        // Channel opens: threshold installed, connection event emitted.
        let actions = session.handle_transport_event(opened("AA", "BB"));
        assert!(matches!(
            actions[0],
            PeerAction::Command(TransportCommand::ConfigureChannel { .. })
        ));
        match &actions[1] {
            PeerAction::Emit(AppEvent::PeerConnected {
                connection_hash, ..
            }) => assert_eq!(connection_hash.len(), 16),
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(session.state(), NegotiationState::Open);
    }

    #[test]
    fn callee_waits_then_answers() {
        let ctx = ctx();
        let (mut session, actions) = new_session(&ctx, PeerRole::Callee);
        assert!(actions.is_empty());
        assert_eq!(session.state(), NegotiationState::AwaitingOffer);

        let actions = session.handle_signal(SignalData::description(offer()));
        assert!(matches!(
            actions[..],
            [PeerAction::Command(TransportCommand::AcceptOffer { .. })]
        ));
        assert_eq!(session.state(), NegotiationState::Answering);

        let actions = session.handle_transport_event(TransportEvent::DescriptionReady(answer()));
        assert!(matches!(actions[..], [PeerAction::Server(_)]));
        assert_eq!(session.state(), NegotiationState::Negotiating);

        session.handle_transport_event(opened("BB", "AA"));
        assert_eq!(session.state(), NegotiationState::Open);
    }

    #[test]
    fn both_roles_derive_the_same_verification_code() {
        let ctx = ctx();
        let (mut caller, _) = new_session(&ctx, PeerRole::Caller);
        let (mut callee, _) = new_session(&ctx, PeerRole::Callee);

        // Caller's local fingerprint is the callee's remote one.
        caller.handle_transport_event(opened("AA", "BB"));
        callee.handle_transport_event(opened("BB", "AA"));
        assert_eq!(caller.connection_hash(), callee.connection_hash());
        assert!(caller.connection_hash().is_some());
    }

    #[test]
    fn chunk_size_negotiates_down_to_transport_limit() {
        let ctx = ctx();
        let (mut session, _) = new_session(&ctx, PeerRole::Caller);
        session.handle_transport_event(TransportEvent::ChannelOpened {
            max_message_size: Some(64 * 1024),
            local_fingerprint: "AA".into(),
            remote_fingerprint: "BB".into(),
        });
        assert_eq!(session.chunk_size(), 64 * 1024);

        // A roomy transport keeps the default.
        let (mut session, _) = new_session(&ctx, PeerRole::Caller);
        session.handle_transport_event(TransportEvent::ChannelOpened {
            max_message_size: Some(16 * 1024 * 1024),
            local_fingerprint: "AA".into(),
            remote_fingerprint: "BB".into(),
        });
        assert_eq!(session.chunk_size(), CHUNK_SIZE);
    }

    #[test]
    fn caller_self_heals_after_channel_loss() {
        let ctx = ctx();
        let (mut session, _) = new_session(&ctx, PeerRole::Caller);
        session.handle_transport_event(opened("AA", "BB"));

        let actions = session.handle_transport_event(TransportEvent::ChannelClosed);
        assert!(actions
            .iter()
            .any(|a| matches!(a, PeerAction::Emit(AppEvent::PeerDisconnected { .. }))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, PeerAction::Command(TransportCommand::StartOffer))));
        assert_eq!(session.state(), NegotiationState::Offering);
    }

    #[test]
    fn callee_waits_passively_after_channel_loss() {
        let ctx = ctx();
        let (mut session, _) = new_session(&ctx, PeerRole::Callee);
        session.handle_signal(SignalData::description(offer()));
        session.handle_transport_event(opened("BB", "AA"));

        let actions = session.handle_transport_event(TransportEvent::ConnectionFailed);
        assert!(actions
            .iter()
            .any(|a| matches!(a, PeerAction::Emit(AppEvent::PeerDisconnected { .. }))));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, PeerAction::Command(TransportCommand::StartOffer))));
        assert_eq!(session.state(), NegotiationState::AwaitingOffer);
    }

    #[test]
    fn refresh_never_resets_live_negotiation() {
        let ctx = ctx();
        let (mut session, _) = new_session(&ctx, PeerRole::Caller);
        session.handle_transport_event(opened("AA", "BB"));

        assert!(session.refresh().is_empty());
        assert_eq!(session.state(), NegotiationState::Open);
    }

    #[test]
    fn signal_routing_uses_the_first_association() {
        let ctx = ctx();
        let (mut session, _) = new_session(&ctx, PeerRole::Caller);
        session.update_association(&ctx, RoomType::PublicId, "ABC12".to_string());

        let actions = session.handle_transport_event(TransportEvent::CandidateReady(
            serde_json::json!({"candidate": "udp ..."}),
        ));
        match &actions[..] {
            [PeerAction::Server(ClientMessage::Signal {
                room_type, room_id, ..
            })] => {
                assert_eq!(*room_type, RoomType::Ip);
                assert_eq!(room_id, "198.51.100.4");
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn same_origin_peers_never_auto_accept() {
        let secrets = Arc::new(MemorySecretStore::new());
        let mut entry = RoomSecretEntry::new("s".repeat(256));
        entry.auto_accept = true;
        secrets.set_entry(entry).unwrap();

        let tabs = Arc::new(MemoryTabsRegistry::new());
        tabs.register("peer-1").unwrap();
        let ctx = SessionContext::new(secrets, tabs);

        let (mut session, _) = PeerSession::new(
            &ctx,
            "peer-1".to_string(),
            PeerRole::Caller,
            RoomType::Secret,
            "s".repeat(256),
            None,
        );
        session.evaluate_auto_accept(&ctx);
        assert!(!session.auto_accept());
    }

    #[test]
    fn paired_peer_with_stored_preference_auto_accepts() {
        let secrets = Arc::new(MemorySecretStore::new());
        let mut entry = RoomSecretEntry::new("s".repeat(256));
        entry.auto_accept = true;
        secrets.set_entry(entry).unwrap();
        let ctx = SessionContext::new(secrets, Arc::new(MemoryTabsRegistry::new()));

        let (session, _) = PeerSession::new(
            &ctx,
            "peer-1".to_string(),
            PeerRole::Caller,
            RoomType::Secret,
            "s".repeat(256),
            None,
        );
        assert!(session.auto_accept());
    }

    #[test]
    fn differing_secret_replaces_stored_duplicate() {
        let secrets = Arc::new(MemorySecretStore::new());
        secrets
            .set_entry(RoomSecretEntry::new("old-secret"))
            .unwrap();
        let ctx = SessionContext::new(secrets.clone(), Arc::new(MemoryTabsRegistry::new()));

        let (mut session, _) = PeerSession::new(
            &ctx,
            "peer-1".to_string(),
            PeerRole::Callee,
            RoomType::Secret,
            "old-secret".to_string(),
            None,
        );
        session.update_association(&ctx, RoomType::Secret, "n".repeat(256));

        assert!(secrets.get_entry("old-secret").unwrap().is_none());
        assert_eq!(session.pair_secret(), Some("n".repeat(256).as_str()));
    }

    #[test]
    fn legacy_secret_triggers_regeneration_from_caller() {
        let ctx = ctx();
        let (_, actions) = PeerSession::new(
            &ctx,
            "peer-1".to_string(),
            PeerRole::Caller,
            RoomType::Secret,
            "short-legacy-secret".to_string(),
            None,
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            PeerAction::Server(ClientMessage::RegenerateRoomSecret { .. })
        )));

        // The callee side waits for the caller to drive the upgrade.
        let (_, actions) = PeerSession::new(
            &ctx,
            "peer-2".to_string(),
            PeerRole::Callee,
            RoomType::Secret,
            "short-legacy-secret".to_string(),
            None,
        );
        assert!(!actions.iter().any(|a| matches!(
            a,
            PeerAction::Server(ClientMessage::RegenerateRoomSecret { .. })
        )));
    }
}
