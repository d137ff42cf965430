//! Peer-to-peer wire frames.
//!
//! Control frames are JSON text payloads tagged by `type`; chunk frames
//! are raw binary payloads. The payload kind, not the content, is what
//! separates the two on the wire.

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── Transfer request ─────────────────────────────────────────────────────────

/// One entry of a transfer request's ordered header list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub name: String,
    pub mime: String,
    pub size: u64,
}

/// A request to transfer a batch of files, sent ahead of any bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Per-file headers in send order.
    pub header: Vec<FileHeader>,
    /// Sum of all file sizes.
    pub total_size: u64,
    /// True iff every entry's top-level mime type is `image`.
    pub images_only: bool,
    /// Down-scaled preview of the first file, when it is an image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_data_url: Option<String>,
}

/// Structured reason attached to a transfer rejection. Policy outcomes,
/// not errors: the sender reacts (re-batch, back off), nothing failed on
/// the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// A request was already pending or transferring on this session.
    ConcurrentRequest,
    /// Aggregate size exceeds the receiver's fixed allocation ceiling.
    PlatformMemoryLimit,
}

// ── Control frames ───────────────────────────────────────────────────────────

/// All JSON control frames exchanged directly between two peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerFrame {
    /// The remote user renamed their device.
    #[serde(rename_all = "camelCase")]
    DisplayNameChanged { display_name: String },

    /// Ask to send a batch of files.
    Request {
        #[serde(flatten)]
        request: TransferRequest,
    },

    /// Per-file metadata sent immediately before that file's chunk stream.
    Header { name: String, mime: String, size: u64 },

    /// Receiver → sender aggregate progress report, throttled.
    Progress { progress: f64 },

    /// Answer to a `Request`.
    FilesTransferResponse {
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<RejectReason>,
    },

    /// Receiver → sender: one file fully reassembled. Carries display
    /// statistics only; completion itself is the signal.
    FileTransferComplete {
        size: f64,
        duration: f64,
        speed: f64,
    },

    /// Receiver → sender: a text message arrived intact.
    MessageTransferComplete,

    /// A text message, base64 encoded so arbitrary unicode survives the
    /// JSON layer byte-identically.
    Text { text: String },
}

impl PeerFrame {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode peer frame")
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to decode peer frame")
    }
}

/// One payload on the peer channel, split by wire kind.
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// JSON control frame.
    Control(String),
    /// Raw file chunk.
    Chunk(Bytes),
}

impl FramePayload {
    pub fn control(frame: &PeerFrame) -> Result<Self> {
        Ok(Self::Control(frame.to_json()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_uses_wire_field_names() {
        let frame = PeerFrame::Request {
            request: TransferRequest {
                header: vec![FileHeader {
                    name: "photo.jpg".into(),
                    mime: "image/jpeg".into(),
                    size: 1234,
                }],
                total_size: 1234,
                images_only: true,
                thumbnail_data_url: None,
            },
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"request""#));
        assert!(json.contains(r#""totalSize":1234"#));
        assert!(json.contains(r#""imagesOnly":true"#));
        assert!(!json.contains("thumbnailDataUrl"));
    }

    #[test]
    fn response_reason_is_kebab_case() {
        let frame = PeerFrame::FilesTransferResponse {
            accepted: false,
            reason: Some(RejectReason::PlatformMemoryLimit),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""reason":"platform-memory-limit""#));
    }

    #[test]
    fn parses_inbound_request() {
        let raw = r#"{"type":"request","header":[{"name":"a.txt","mime":"text/plain","size":5}],"totalSize":5,"imagesOnly":false}"#;
        match PeerFrame::parse(raw).unwrap() {
            PeerFrame::Request { request } => {
                assert_eq!(request.header.len(), 1);
                assert_eq!(request.header[0].name, "a.txt");
                assert_eq!(request.total_size, 5);
                assert!(request.thumbnail_data_url.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn display_name_frame_roundtrips() {
        let raw = r#"{"type":"display-name-changed","displayName":"Green Fox"}"#;
        match PeerFrame::parse(raw).unwrap() {
            PeerFrame::DisplayNameChanged { display_name } => {
                assert_eq!(display_name, "Green Fox");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_kind_is_an_error() {
        assert!(PeerFrame::parse(r#"{"type":"mystery-frame"}"#).is_err());
    }
}
