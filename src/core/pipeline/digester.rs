//! Chunk consumer — reassembles a file from ordered inbound chunks.
//!
//! Reassembly is purely size driven: the consumer finalizes exactly when
//! the received byte count reaches the size declared in the file header.
//! This relies on the transport delivering chunk bytes in order (the
//! reliable-ordered channel contract); there are no sequence numbers.

use bytes::Bytes;
use std::time::SystemTime;

/// A fully reassembled file, carrying its original name and mime type.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Bytes,
    pub received_at: SystemTime,
}

impl ReceivedFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Consumer state for one in-progress file within a multi-file request.
pub struct ChunkConsumer {
    name: String,
    mime: String,
    /// Size declared in the file header.
    declared_size: u64,
    /// Aggregate size of the whole accepted request.
    aggregate_size: u64,
    /// Bytes of files already completed earlier in this request.
    prior_bytes: u64,
    parts: Vec<Bytes>,
    bytes_received: u64,
}

impl ChunkConsumer {
    pub fn new(
        name: impl Into<String>,
        mime: impl Into<String>,
        declared_size: u64,
        aggregate_size: u64,
        prior_bytes: u64,
    ) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            declared_size,
            aggregate_size,
            prior_bytes,
            parts: Vec::new(),
            bytes_received: 0,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Aggregate progress of the whole request in [0, 1] under normal
    /// operation: (bytes of prior completed files + bytes so far of this
    /// file) / aggregate size. A value above 1.0 means the sender pushed
    /// more bytes than requested and is the caller's abort trigger.
    pub fn progress(&self) -> f64 {
        if self.aggregate_size == 0 {
            return 1.0;
        }
        (self.prior_bytes + self.bytes_received) as f64 / self.aggregate_size as f64
    }

    /// Append one inbound chunk. Returns the reassembled file once the
    /// received bytes reach the declared size.
    pub fn push(&mut self, chunk: Bytes) -> Option<ReceivedFile> {
        if chunk.is_empty() {
            return None;
        }
        self.bytes_received += chunk.len() as u64;
        self.parts.push(chunk);

        if self.bytes_received < self.declared_size {
            return None;
        }
        Some(self.finalize())
    }

    fn finalize(&mut self) -> ReceivedFile {
        let mut bytes = Vec::with_capacity(self.bytes_received as usize);
        for part in self.parts.drain(..) {
            bytes.extend_from_slice(&part);
        }
        ReceivedFile {
            name: self.name.clone(),
            mime: self.mime.clone(),
            bytes: Bytes::from(bytes),
            received_at: SystemTime::now(),
        }
    }
}
