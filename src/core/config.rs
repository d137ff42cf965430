//! Centralized configuration constants for relaydrop.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format details (message tags, field names) stay
//! with their codec modules.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Default chunk size in bytes (256 KiB).
///
/// Negotiated down to the transport's maximum message size at channel open
/// when the transport advertises a smaller limit.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// High-water mark for outstanding (sent but undrained) chunk bytes, as a
/// multiple of the negotiated chunk size. The producer suspends once this
/// many bytes are in flight and resumes on the transport's low-buffer
/// signal.
pub const HIGH_WATER_FACTOR: usize = 8;

/// Low-water threshold installed on the transport's send buffer, as a
/// multiple of the negotiated chunk size. The transport reports back once
/// its buffered amount drains below this.
pub const LOW_WATER_FACTOR: usize = 2;

/// Minimum advance in aggregate progress (as a fraction) before the
/// receiver reports progress to the sender again. Completion (1.0) is
/// always reported.
pub const PROGRESS_REPORT_STEP: f64 = 0.005;

/// Width bound for the down-scaled preview attached to a transfer request
/// whose first file is an image.
pub const PREVIEW_MAX_WIDTH: u32 = 400;

// ── Rooms / Pairing ──────────────────────────────────────────────────────────

/// Length of a current-generation pair secret. Shorter stored secrets are
/// legacy and get regenerated by the caller side on first contact.
pub const PAIR_SECRET_LENGTH: usize = 256;

// ── Signaling connection ─────────────────────────────────────────────────────

/// Fixed delay before re-dialing the rendezvous server after a disconnect.
/// Reconnection is cheap and rare, so there is no exponential backoff.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Debounce applied to socket-close events before the disconnect is
/// surfaced, so fast page transitions do not flap the UI.
pub const DISCONNECT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Retry interval for commands that require connectivity (pairing joins,
/// public-room joins) issued while the control channel is down.
pub const COMMAND_RETRY_DELAY: Duration = Duration::from_secs(1);

// ── Transfer policy ──────────────────────────────────────────────────────────

/// Receiver-side policy applied to incoming transfer requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferPolicy {
    /// Fixed allocation ceiling of the receiving platform, if any. A
    /// request whose aggregate size reaches this is auto-rejected with
    /// reason `platform-memory-limit` so the sender can re-batch.
    pub memory_ceiling: Option<u64>,
}
