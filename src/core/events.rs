//! Domain events delivered to the embedding application.
//!
//! Everything the UI needs to render (peer lists, transfer prompts,
//! progress, notices) arrives as one of these. The core never renders or
//! localizes; notices are codes the embedder translates.

use crate::core::peer::frames::TransferRequest;
use crate::core::pipeline::ReceivedFile;

/// User-visible notices. Transient unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Reconnecting to the rendezvous server (persistent until resolved).
    Connecting,
    /// Reconnected to the rendezvous server.
    Connected,
    /// Pairing requires a live server connection.
    PairingRequiresConnection,
    /// Creating a public room requires a live server connection.
    PublicRoomRequiresConnection,
    /// The server rate limited pair-key join attempts.
    JoinKeyRateLimited,
    /// An outbound file batch finished.
    FileTransferCompleted,
    /// An outbound text message was delivered.
    MessageTransferCompleted,
    /// Received files differ from the accepted request; transfer aborted.
    FilesIncorrect,
    /// The receiver rejected the batch because it exceeds its memory
    /// ceiling; send smaller batches.
    TransferMemoryLimited,
}

impl Notice {
    /// Persistent notices stay on screen until a later event clears them.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Notice::Connecting)
    }
}

/// Phase attached to a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// Building a transfer request (reading headers, scaling previews).
    Prepare,
    /// Waiting for the remote decision.
    Wait,
    /// Bytes are moving.
    Transfer,
    /// Finalizing received files.
    Process,
}

/// Events emitted by the transfer core toward the embedding application.
#[derive(Debug, Clone)]
pub enum AppEvent {
    // ── Server connection ────────────────────────────────────────────────
    ServerConnected,
    ServerDisconnected,
    /// The server assigned (or re-confirmed) this device's identity.
    IdentityAssigned {
        peer_id: String,
        display_name: String,
        device_name: Option<String>,
    },
    /// Transport configuration pushed by the server (ICE servers etc.),
    /// opaque to the core and forwarded to the platform transport.
    RtcConfigChanged(serde_json::Value),
    Notice(Notice),

    // ── Peers ────────────────────────────────────────────────────────────
    PeerConnected {
        peer_id: String,
        /// Verification code derived from both transport fingerprints.
        connection_hash: String,
    },
    PeerDisconnected {
        peer_id: String,
    },
    PeerDisplayNameChanged {
        peer_id: String,
        display_name: String,
    },

    // ── Transfers ────────────────────────────────────────────────────────
    /// An inbound request needs a user decision (not auto-accepted).
    FilesTransferRequest {
        peer_id: String,
        request: TransferRequest,
    },
    TransferProgress {
        peer_id: String,
        progress: f64,
        status: ProgressStatus,
    },
    /// One file finished reassembling (emitted per file).
    FileReceived {
        peer_id: String,
        file: ReceivedFile,
    },
    /// The whole multi-file request finished.
    FilesReceived {
        peer_id: String,
        files: Vec<ReceivedFile>,
        images_only: bool,
        total_size: u64,
    },
    /// All queued outbound files were delivered.
    FilesSent {
        peer_id: String,
    },
    TextReceived {
        peer_id: String,
        text: String,
    },

    // ── Pairing / rooms ──────────────────────────────────────────────────
    PairDeviceInitiated {
        pair_key: String,
        room_secret: String,
    },
    PairDeviceJoined {
        peer_id: String,
        room_secret: String,
    },
    PairDeviceJoinKeyInvalid,
    PairDeviceCanceled {
        pair_key: Option<String>,
    },
    /// A paired device deleted the shared secret room.
    SecretRoomDeleted {
        room_secret: String,
    },
    PublicRoomCreated {
        room_id: String,
    },
    PublicRoomIdInvalid {
        room_id: String,
    },
    PublicRoomLeft,
}
