//! Per-peer file and text transfer protocol.
//!
//! Layered on an open peer channel: request/accept negotiation, then per
//! file a header frame followed by its chunk stream. The receiver tracks
//! aggregate progress across the whole multi-file request, throttles
//! upstream progress reports, and enforces the size/name integrity check
//! on every completed file. At most one request is active per peer at a
//! time; further outbound batches queue behind the current one.
//!
//! This is a pure state machine: every entry point returns the declarative
//! actions (frames to send, events to emit) for the caller to execute.

use crate::core::config::{TransferPolicy, PREVIEW_MAX_WIDTH, PROGRESS_REPORT_STEP};
use crate::core::events::{AppEvent, Notice, ProgressStatus};
use crate::core::peer::frames::{FileHeader, PeerFrame, RejectReason, TransferRequest};
use crate::core::peer::session::PeerAction;
use crate::core::pipeline::{ChunkConsumer, ChunkProducer, ReceivedFile};
use crate::core::storage::{FileSource, ImageScaler};
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ── Phases ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    /// Sender: request sent, waiting for the remote decision.
    RequestSent,
    /// Sender: streaming the accepted queue.
    Sending,
    /// Receiver: request received, waiting for the local decision.
    RequestPending,
    /// Receiver: accepted, reassembling files.
    Receiving,
}

/// An outbound batch with its request frame prepared up front, so queued
/// batches need no further file inspection when they finally start.
struct PreparedBatch {
    files: Vec<Box<dyn FileSource>>,
    request: TransferRequest,
}

// ── TransferSession ──────────────────────────────────────────────────────────

pub struct TransferSession {
    peer_id: String,
    phase: TransferPhase,

    // Sender side.
    requested: Option<PreparedBatch>,
    queue: VecDeque<Box<dyn FileSource>>,
    pending_batches: VecDeque<PreparedBatch>,
    producer: Option<ChunkProducer>,
    batch_id: Option<Uuid>,

    // Receiver side.
    request_pending: Option<TransferRequest>,
    request_accepted: Option<TransferRequest>,
    consumer: Option<ChunkConsumer>,
    files_received: Vec<ReceivedFile>,
    total_bytes_received: u64,
    last_reported_progress: f64,
    receive_started: Option<Instant>,
}

impl TransferSession {
    pub fn new(peer_id: String) -> Self {
        Self {
            peer_id,
            phase: TransferPhase::Idle,
            requested: None,
            queue: VecDeque::new(),
            pending_batches: VecDeque::new(),
            producer: None,
            batch_id: None,
            request_pending: None,
            request_accepted: None,
            consumer: None,
            files_received: Vec::new(),
            total_bytes_received: 0,
            last_reported_progress: 0.0,
            receive_started: None,
        }
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// A transfer (either direction) is in flight or awaiting a decision.
    pub fn is_busy(&self) -> bool {
        self.phase != TransferPhase::Idle
    }

    /// Drop all transfer state. Called when the peer channel closes: an
    /// in-flight transfer does not survive channel re-establishment.
    pub fn reset(&mut self) {
        if self.is_busy() {
            debug!(
                event = "transfer_state_dropped",
                peer = %self.peer_id,
                phase = ?self.phase,
                "Dropping in-flight transfer state"
            );
        }
        *self = Self::new(std::mem::take(&mut self.peer_id));
    }

    // ── Sender: requesting ───────────────────────────────────────────────

    /// Ask the peer to receive `files`. When a transfer is already in
    /// flight the batch is queued and requested automatically once the
    /// current one finishes.
    pub fn request_files(
        &mut self,
        files: Vec<Box<dyn FileSource>>,
        scaler: Option<&dyn ImageScaler>,
    ) -> Result<Vec<PeerAction>> {
        if files.is_empty() {
            return Err(anyhow!("no files selected"));
        }
        let batch = Self::prepare_batch(files, scaler);

        if self.is_busy() {
            info!(
                event = "transfer_batch_queued",
                peer = %self.peer_id,
                files = batch.request.header.len(),
                waiting = self.pending_batches.len() + 1,
                "Peer busy, batch queued"
            );
            self.pending_batches.push_back(batch);
            return Ok(Vec::new());
        }

        self.begin_request(batch)
    }

    fn prepare_batch(
        mut files: Vec<Box<dyn FileSource>>,
        scaler: Option<&dyn ImageScaler>,
    ) -> PreparedBatch {
        let mut header = Vec::with_capacity(files.len());
        let mut total_size = 0u64;
        let mut images_only = true;
        for file in &files {
            header.push(FileHeader {
                name: file.name().to_string(),
                mime: file.mime().to_string(),
                size: file.len(),
            });
            total_size += file.len();
            if file.mime().split('/').next() != Some("image") {
                images_only = false;
            }
        }

        // Preview of the first file when it is an image. A failed scale
        // degrades to no preview; it never blocks the request.
        let thumbnail_data_url = match (files.first_mut(), scaler) {
            (Some(first), Some(scaler)) if first.mime().starts_with("image/") => {
                match scaler.preview_data_url(first.as_mut(), PREVIEW_MAX_WIDTH) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(
                            event = "preview_scale_failure",
                            file = %first.name(),
                            error = %e,
                            "Could not create request preview"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        PreparedBatch {
            files,
            request: TransferRequest {
                header,
                total_size,
                images_only,
                thumbnail_data_url,
            },
        }
    }

    fn begin_request(&mut self, batch: PreparedBatch) -> Result<Vec<PeerAction>> {
        let batch_id = Uuid::new_v4();
        info!(
            event = "transfer_requested",
            peer = %self.peer_id,
            batch = %batch_id,
            files = batch.request.header.len(),
            total_size = batch.request.total_size,
            "Requesting file transfer"
        );

        let actions = vec![
            PeerAction::control_frame(&PeerFrame::Request {
                request: batch.request.clone(),
            })?,
            self.progress_event(0.0, ProgressStatus::Wait),
        ];

        self.batch_id = Some(batch_id);
        self.requested = Some(batch);
        self.phase = TransferPhase::RequestSent;
        Ok(actions)
    }

    /// The peer answered our transfer request.
    pub fn handle_response(
        &mut self,
        accepted: bool,
        reason: Option<RejectReason>,
        chunk_size: usize,
    ) -> Result<Vec<PeerAction>> {
        if self.phase != TransferPhase::RequestSent {
            warn!(
                event = "unexpected_transfer_response",
                peer = %self.peer_id,
                phase = ?self.phase,
                "Transfer response without an outstanding request"
            );
            return Ok(Vec::new());
        }
        let batch = self
            .requested
            .take()
            .ok_or_else(|| anyhow!("request state lost"))?;

        if !accepted {
            info!(
                event = "transfer_rejected_by_peer",
                peer = %self.peer_id,
                reason = ?reason,
                "Peer declined file transfer"
            );
            self.phase = TransferPhase::Idle;
            self.batch_id = None;

            let mut actions = vec![self.progress_event(1.0, ProgressStatus::Wait)];
            if reason == Some(RejectReason::PlatformMemoryLimit) {
                actions.push(PeerAction::Emit(AppEvent::Notice(
                    Notice::TransferMemoryLimited,
                )));
            }
            actions.extend(self.start_next_batch()?);
            return Ok(actions);
        }

        self.queue.extend(batch.files);
        self.phase = TransferPhase::Sending;

        let mut actions = vec![self.progress_event(0.0, ProgressStatus::Transfer)];
        actions.extend(self.dequeue_file(chunk_size)?);
        Ok(actions)
    }

    fn dequeue_file(&mut self, chunk_size: usize) -> Result<Vec<PeerAction>> {
        let source = match self.queue.pop_front() {
            Some(source) => source,
            None => return self.finish_batch(),
        };

        let header = PeerFrame::Header {
            name: source.name().to_string(),
            mime: source.mime().to_string(),
            size: source.len(),
        };
        info!(
            event = "file_send_started",
            peer = %self.peer_id,
            name = %source.name(),
            size = source.len(),
            "Sending file"
        );

        let mut producer = ChunkProducer::new(source, chunk_size);
        let mut actions = vec![PeerAction::control_frame(&header)?];
        // Fresh file on a drained channel: start the burst with an empty
        // in-flight estimate; the low-water signal takes over from here.
        match producer.produce(0) {
            Ok(chunks) => actions.extend(chunks.into_iter().map(PeerAction::chunk)),
            Err(e) => {
                self.abandon_sending();
                return Err(e);
            }
        }
        self.producer = Some(producer);
        Ok(actions)
    }

    /// The transport drained below its low-water threshold; resume the
    /// chunk stream.
    pub fn on_buffer_low(&mut self, buffered_amount: usize) -> Result<Vec<PeerAction>> {
        let producer = match self.producer.as_mut() {
            Some(producer) => producer,
            None => return Ok(Vec::new()),
        };
        match producer.produce(buffered_amount) {
            Ok(chunks) => Ok(chunks.into_iter().map(PeerAction::chunk).collect()),
            Err(e) => {
                self.abandon_sending();
                Err(e)
            }
        }
    }

    /// A file read failed mid-stream; the remainder of the batch cannot be
    /// delivered coherently, so sender state is dropped.
    fn abandon_sending(&mut self) {
        warn!(
            event = "transfer_send_abandoned",
            peer = %self.peer_id,
            "File read failed, dropping outbound transfer state"
        );
        self.producer = None;
        self.queue.clear();
        self.batch_id = None;
        self.phase = TransferPhase::Idle;
    }

    /// The receiver confirmed the current file arrived fully.
    pub fn handle_file_complete(
        &mut self,
        size: f64,
        duration: f64,
        speed: f64,
        chunk_size: usize,
    ) -> Result<Vec<PeerAction>> {
        if self.phase != TransferPhase::Sending {
            warn!(
                event = "unexpected_file_complete",
                peer = %self.peer_id,
                phase = ?self.phase,
                "Completion frame without an active send"
            );
            return Ok(Vec::new());
        }
        info!(
            event = "file_sent",
            peer = %self.peer_id,
            size_mb = size,
            duration_s = duration,
            speed_mbs = speed,
            "File delivered"
        );
        self.producer = None;

        if !self.queue.is_empty() {
            return self.dequeue_file(chunk_size);
        }
        self.finish_batch()
    }

    fn finish_batch(&mut self) -> Result<Vec<PeerAction>> {
        info!(
            event = "transfer_batch_complete",
            peer = %self.peer_id,
            batch = ?self.batch_id,
            "Outbound batch complete"
        );
        self.phase = TransferPhase::Idle;
        self.batch_id = None;

        let mut actions = vec![
            PeerAction::Emit(AppEvent::Notice(Notice::FileTransferCompleted)),
            PeerAction::Emit(AppEvent::FilesSent {
                peer_id: self.peer_id.clone(),
            }),
        ];
        actions.extend(self.start_next_batch()?);
        Ok(actions)
    }

    fn start_next_batch(&mut self) -> Result<Vec<PeerAction>> {
        match self.pending_batches.pop_front() {
            Some(batch) => self.begin_request(batch),
            None => Ok(Vec::new()),
        }
    }

    /// Receiver progress report for our outbound stream.
    pub fn handle_progress_report(&self, progress: f64) -> Vec<PeerAction> {
        vec![self.progress_event(progress, ProgressStatus::Transfer)]
    }

    // ── Receiver: accepting ──────────────────────────────────────────────

    /// An inbound transfer request arrived.
    pub fn handle_request(
        &mut self,
        request: TransferRequest,
        policy: &TransferPolicy,
        auto_accept: bool,
    ) -> Result<Vec<PeerAction>> {
        if self.is_busy() {
            // One request at a time per peer; the current transfer's state
            // must not be touched.
            info!(
                event = "transfer_rejected_busy",
                peer = %self.peer_id,
                phase = ?self.phase,
                "Concurrent transfer request rejected"
            );
            return Ok(vec![PeerAction::control_frame(
                &PeerFrame::FilesTransferResponse {
                    accepted: false,
                    reason: Some(RejectReason::ConcurrentRequest),
                },
            )?]);
        }

        if let Some(ceiling) = policy.memory_ceiling {
            if request.total_size >= ceiling {
                // The platform cannot buffer this batch; tell the sender
                // why so it can re-batch instead of failing silently.
                info!(
                    event = "transfer_rejected_memory_limit",
                    peer = %self.peer_id,
                    total_size = request.total_size,
                    ceiling,
                    "Aggregate size exceeds platform memory ceiling"
                );
                return Ok(vec![PeerAction::control_frame(
                    &PeerFrame::FilesTransferResponse {
                        accepted: false,
                        reason: Some(RejectReason::PlatformMemoryLimit),
                    },
                )?]);
            }
        }

        info!(
            event = "transfer_request_received",
            peer = %self.peer_id,
            files = request.header.len(),
            total_size = request.total_size,
            auto_accept,
            "Incoming transfer request"
        );
        self.phase = TransferPhase::RequestPending;
        self.request_pending = Some(request.clone());

        if auto_accept {
            return self.respond(true);
        }
        Ok(vec![PeerAction::Emit(AppEvent::FilesTransferRequest {
            peer_id: self.peer_id.clone(),
            request,
        })])
    }

    /// Answer the pending inbound request (user decision or auto-accept).
    pub fn respond(&mut self, accepted: bool) -> Result<Vec<PeerAction>> {
        if self.phase != TransferPhase::RequestPending {
            return Err(anyhow!("no pending transfer request"));
        }
        let request = self
            .request_pending
            .take()
            .ok_or_else(|| anyhow!("pending request state lost"))?;

        let actions = vec![PeerAction::control_frame(
            &PeerFrame::FilesTransferResponse {
                accepted,
                reason: None,
            },
        )?];

        if accepted {
            info!(event = "transfer_accepted", peer = %self.peer_id, "Transfer accepted");
            self.request_accepted = Some(request);
            self.total_bytes_received = 0;
            self.files_received.clear();
            self.last_reported_progress = 0.0;
            self.phase = TransferPhase::Receiving;
        } else {
            info!(event = "transfer_declined", peer = %self.peer_id, "Transfer declined");
            self.phase = TransferPhase::Idle;
        }
        Ok(actions)
    }

    /// Per-file metadata announcing the next chunk stream.
    pub fn handle_header(&mut self, name: String, mime: String, size: u64) -> Vec<PeerAction> {
        let expecting_files = self
            .request_accepted
            .as_ref()
            .is_some_and(|r| !r.header.is_empty());
        if self.phase != TransferPhase::Receiving || !expecting_files {
            warn!(
                event = "unexpected_file_header",
                peer = %self.peer_id,
                name = %name,
                "File header outside an accepted transfer"
            );
            return Vec::new();
        }

        let aggregate = self.request_accepted.as_ref().map_or(0, |r| r.total_size);
        self.consumer = Some(ChunkConsumer::new(
            name,
            mime,
            size,
            aggregate,
            self.total_bytes_received,
        ));
        self.last_reported_progress = 0.0;
        self.receive_started = Some(Instant::now());
        Vec::new()
    }

    /// One raw chunk arrived.
    pub fn handle_chunk(&mut self, chunk: Bytes) -> Result<Vec<PeerAction>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        let (completed, progress) = match self.consumer.as_mut() {
            Some(consumer) => {
                let completed = consumer.push(chunk);
                (completed, consumer.progress())
            }
            // Chunks before the header (or after an abort) are dropped.
            None => return Ok(Vec::new()),
        };

        if progress > 1.0 {
            return Ok(self.abort_receiving());
        }

        let mut actions = vec![self.progress_event(progress, ProgressStatus::Transfer)];
        if progress - self.last_reported_progress >= PROGRESS_REPORT_STEP || progress == 1.0 {
            self.last_reported_progress = progress;
            actions.push(PeerAction::control_frame(&PeerFrame::Progress { progress })?);
        }

        if let Some(file) = completed {
            self.consumer = None;
            actions.extend(self.on_file_received(file)?);
        }
        Ok(actions)
    }

    fn on_file_received(&mut self, file: ReceivedFile) -> Result<Vec<PeerAction>> {
        let accepted = self
            .request_accepted
            .as_mut()
            .ok_or_else(|| anyhow!("file completed outside an accepted transfer"))?;
        let expected = accepted.header.remove(0);
        self.total_bytes_received += file.size();

        let duration = self
            .receive_started
            .map_or(0.0, |t| t.elapsed().as_secs_f64());
        let size_mb = (10.0 * file.size() as f64 / 1_000_000.0).round() / 10.0;
        let speed = if duration > 0.0 {
            (100.0 * file.size() as f64 / 1_000_000.0 / duration).round() / 100.0
        } else {
            0.0
        };
        info!(
            event = "file_received",
            peer = %self.peer_id,
            name = %file.name,
            size_mb,
            duration_s = duration,
            speed_mbs = speed,
            "File reassembled"
        );

        let mut actions = vec![PeerAction::control_frame(
            &PeerFrame::FileTransferComplete {
                size: size_mb,
                duration,
                speed,
            },
        )?];

        if file.size() != expected.size || file.name != expected.name {
            actions.extend(self.abort_receiving());
            return Ok(actions);
        }

        actions.push(PeerAction::Emit(AppEvent::FileReceived {
            peer_id: self.peer_id.clone(),
            file: file.clone(),
        }));
        self.files_received.push(file);

        let remaining = self
            .request_accepted
            .as_ref()
            .map_or(0, |r| r.header.len());
        if remaining == 0 {
            let request = self
                .request_accepted
                .take()
                .ok_or_else(|| anyhow!("accepted request state lost"))?;
            info!(
                event = "transfer_complete",
                peer = %self.peer_id,
                files = self.files_received.len(),
                total_size = request.total_size,
                "Inbound transfer complete"
            );
            self.phase = TransferPhase::Idle;
            actions.push(self.progress_event(0.0, ProgressStatus::Process));
            actions.push(PeerAction::Emit(AppEvent::FilesReceived {
                peer_id: self.peer_id.clone(),
                files: std::mem::take(&mut self.files_received),
                images_only: request.images_only,
                total_size: request.total_size,
            }));
            self.total_bytes_received = 0;
        }
        Ok(actions)
    }

    /// Integrity violation: abort the whole multi-file session, discard
    /// buffered output, surface a user-visible error.
    fn abort_receiving(&mut self) -> Vec<PeerAction> {
        warn!(
            event = "transfer_integrity_failure",
            peer = %self.peer_id,
            "Received files differ from the accepted request, aborting"
        );
        self.files_received.clear();
        self.request_accepted = None;
        self.request_pending = None;
        self.consumer = None;
        self.total_bytes_received = 0;
        self.phase = TransferPhase::Idle;
        vec![
            self.progress_event(1.0, ProgressStatus::Wait),
            PeerAction::Emit(AppEvent::Notice(Notice::FilesIncorrect)),
        ]
    }

    // ── Text ─────────────────────────────────────────────────────────────

    pub fn send_text(&self, text: &str) -> Result<Vec<PeerAction>> {
        let encoded = BASE64.encode(text.as_bytes());
        Ok(vec![PeerAction::control_frame(&PeerFrame::Text {
            text: encoded,
        })?])
    }

    pub fn handle_text(&self, encoded: &str) -> Vec<PeerAction> {
        if encoded.is_empty() {
            return Vec::new();
        }
        let text = match BASE64
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            Some(text) => text,
            None => {
                warn!(
                    event = "text_decode_failure",
                    peer = %self.peer_id,
                    "Dropping undecodable text frame"
                );
                return Vec::new();
            }
        };

        let mut actions = vec![PeerAction::Emit(AppEvent::TextReceived {
            peer_id: self.peer_id.clone(),
            text,
        })];
        if let Ok(ack) = PeerAction::control_frame(&PeerFrame::MessageTransferComplete) {
            actions.push(ack);
        }
        actions
    }

    pub fn handle_message_complete(&self) -> Vec<PeerAction> {
        vec![PeerAction::Emit(AppEvent::Notice(
            Notice::MessageTransferCompleted,
        ))]
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn progress_event(&self, progress: f64, status: ProgressStatus) -> PeerAction {
        PeerAction::Emit(AppEvent::TransferProgress {
            peer_id: self.peer_id.clone(),
            progress,
            status,
        })
    }
}
