//! Rendezvous server wire contract, as consumed.
//!
//! Both directions are closed tagged unions decoded once at the boundary.
//! Inbound kinds outside the contract decode to
//! [`ServerMessage::Unrecognized`] so the dispatcher can log and drop them
//! without ever treating an unknown kind as fatal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Rooms ────────────────────────────────────────────────────────────────────

/// The kinds of rooms two peers can share. Every peer connection is
/// justified by at least one room association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomType {
    /// Devices behind the same public address.
    Ip,
    /// Devices paired via a persistent shared secret.
    Secret,
    /// A temporary, explicitly joined public room.
    PublicId,
}

/// A (type, id) pair justifying a connection between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAssociation {
    pub room_type: RoomType,
    pub room_id: String,
}

// ── Peers / identity ─────────────────────────────────────────────────────────

/// Name metadata the server attaches to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerName {
    pub display_name: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// A remote peer as listed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<PeerName>,
    #[serde(default)]
    pub rtc_supported: bool,
}

/// Identity assignment payload: the server names this device and hands it
/// the parameters to reauthenticate as the same device later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMessage {
    pub display_name: String,
    #[serde(default)]
    pub device_name: Option<String>,
    pub peer_id: String,
    pub peer_id_hash: String,
}

// ── Signal payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A transport session description relayed through the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// Body of a relayed signal envelope: a description or a connectivity
/// candidate (candidates stay opaque to the core).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<Value>,
}

impl SignalData {
    pub fn description(sdp: SessionDescription) -> Self {
        Self {
            sdp: Some(sdp),
            ice: None,
        }
    }

    pub fn candidate(ice: Value) -> Self {
        Self {
            sdp: None,
            ice: Some(ice),
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Every message kind the server may push, plus `Unrecognized`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    RtcConfig {
        config: Value,
    },
    /// Roster snapshot for a room we just joined.
    #[serde(rename_all = "camelCase")]
    Peers {
        peers: Vec<PeerInfo>,
        room_type: RoomType,
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        peer: PeerInfo,
        room_type: RoomType,
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        peer_id: String,
        room_type: RoomType,
        /// True when the peer actively disconnected rather than dropping.
        #[serde(default)]
        disconnect: bool,
    },
    /// Relayed signal envelope from another peer.
    Signal {
        sender: PeerInfo,
        #[serde(flatten)]
        data: SignalData,
    },
    Ping,
    DisplayName {
        message: IdentityMessage,
    },
    #[serde(rename_all = "camelCase")]
    PairDeviceInitiated {
        pair_key: String,
        room_secret: String,
    },
    #[serde(rename_all = "camelCase")]
    PairDeviceJoined {
        peer_id: String,
        room_secret: String,
    },
    PairDeviceJoinKeyInvalid,
    #[serde(rename_all = "camelCase")]
    PairDeviceCanceled {
        #[serde(default)]
        pair_key: Option<String>,
    },
    JoinKeyRateLimit,
    #[serde(rename_all = "camelCase")]
    SecretRoomDeleted {
        room_secret: String,
    },
    #[serde(rename_all = "camelCase")]
    RoomSecretRegenerated {
        old_room_secret: String,
        new_room_secret: String,
    },
    #[serde(rename_all = "camelCase")]
    PublicRoomIdInvalid {
        public_room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    PublicRoomCreated {
        room_id: String,
    },
    PublicRoomLeft,
    /// Catch-all for kinds outside the contract; logged and dropped.
    #[serde(skip)]
    Unrecognized { kind: String },
}

impl ServerMessage {
    /// Kinds this client consumes. Everything else becomes `Unrecognized`.
    const KNOWN_KINDS: &'static [&'static str] = &[
        "rtc-config",
        "peers",
        "peer-joined",
        "peer-left",
        "signal",
        "ping",
        "display-name",
        "pair-device-initiated",
        "pair-device-joined",
        "pair-device-join-key-invalid",
        "pair-device-canceled",
        "join-key-rate-limit",
        "secret-room-deleted",
        "room-secret-regenerated",
        "public-room-id-invalid",
        "public-room-created",
        "public-room-left",
    ];

    /// Decode one inbound frame. Unknown kinds yield `Unrecognized`;
    /// malformed frames (no tag, or a known kind with a bad body) are
    /// errors for the caller to log and drop.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("server frame is not JSON")?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .context("server frame has no type tag")?
            .to_string();

        if !Self::KNOWN_KINDS.contains(&kind.as_str()) {
            return Ok(ServerMessage::Unrecognized { kind });
        }

        serde_json::from_value(value)
            .with_context(|| format!("malformed server frame of kind {kind}"))
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Every message kind this client sends to the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce all stored pair secrets (joins their rooms).
    #[serde(rename_all = "camelCase")]
    RoomSecrets { room_secrets: Vec<String> },
    JoinIpRoom,
    #[serde(rename_all = "camelCase")]
    RoomSecretsDeleted { room_secrets: Vec<String> },
    #[serde(rename_all = "camelCase")]
    RegenerateRoomSecret { room_secret: String },
    PairDeviceInitiate,
    #[serde(rename_all = "camelCase")]
    PairDeviceJoin { pair_key: String },
    PairDeviceCancel,
    CreatePublicRoom,
    #[serde(rename_all = "camelCase")]
    JoinPublicRoom {
        public_room_id: String,
        create_if_invalid: bool,
    },
    LeavePublicRoom,
    Disconnect,
    Pong,
    /// Signal envelope addressed to one peer, routed via a shared room.
    #[serde(rename_all = "camelCase")]
    Signal {
        to: String,
        room_type: RoomType,
        room_id: String,
        #[serde(flatten)]
        data: SignalData,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode client message")
    }
}
