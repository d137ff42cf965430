//! Chunk producer — slices a file into ordered chunks under backpressure.
//!
//! The producer never polls the transport. It emits chunks while its
//! estimate of outstanding buffered bytes stays below the high-water mark
//! (8× chunk size), then suspends until the transport delivers a
//! buffer-below-low-water signal carrying the current buffered amount.
//! This bounds memory regardless of how much faster the file can be read
//! than the network drains.

use crate::core::config::HIGH_WATER_FACTOR;
use crate::core::storage::FileSource;
use anyhow::Result;
use bytes::Bytes;

pub struct ChunkProducer {
    source: Box<dyn FileSource>,
    chunk_size: usize,
    high_water: usize,
    /// Next byte offset to read.
    offset: u64,
    /// Estimate of bytes handed to the transport and not yet drained.
    in_flight: usize,
}

impl ChunkProducer {
    /// `chunk_size` is the already-negotiated per-message size (the
    /// default 256 KiB, or the transport's max message size if smaller).
    pub fn new(source: Box<dyn FileSource>, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size,
            high_water: HIGH_WATER_FACTOR * chunk_size,
            offset: 0,
            in_flight: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn total_size(&self) -> u64 {
        self.source.len()
    }

    /// All bytes have been emitted. The transfer itself completes later,
    /// once the receiver acknowledges the reassembled file.
    pub fn is_done(&self) -> bool {
        self.offset >= self.source.len()
    }

    /// Resume production. `buffered_amount` is the transport's current
    /// send-buffer occupancy, reported by the low-water signal (0 when
    /// starting a fresh file on a drained channel).
    ///
    /// Emits successive chunks until the in-flight estimate reaches the
    /// high-water mark or the file ends.
    pub fn produce(&mut self, buffered_amount: usize) -> Result<Vec<Bytes>> {
        self.in_flight = buffered_amount;

        let mut chunks = Vec::new();
        while !self.is_done() && self.in_flight < self.high_water {
            let remaining = self.source.len() - self.offset;
            let len = (self.chunk_size as u64).min(remaining) as usize;
            let chunk = self.source.slice(self.offset, len)?;
            self.offset += chunk.len() as u64;
            self.in_flight += chunk.len();
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CHUNK_SIZE;
    use crate::core::storage::MemoryFile;

    fn producer_for(bytes: Vec<u8>) -> ChunkProducer {
        let source = MemoryFile::new("test.bin", "application/octet-stream", bytes);
        ChunkProducer::new(Box::new(source), CHUNK_SIZE)
    }

    #[test]
    fn small_file_is_a_single_chunk() {
        let mut producer = producer_for(vec![0xAB; 1000]);
        let chunks = producer.produce(0).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 1000);
        assert!(producer.is_done());
    }

    #[test]
    fn suspends_at_high_water_mark() {
        // More data than one burst may emit: the producer must stop after
        // 8 chunks (8 × chunk size in flight) and wait for the signal.
        let mut producer = producer_for(vec![0u8; CHUNK_SIZE * 12]);

        let first = producer.produce(0).unwrap();
        assert_eq!(first.len(), HIGH_WATER_FACTOR);
        assert!(!producer.is_done());

        // No signal, no progress: a full buffer emits nothing.
        let stalled = producer.produce(HIGH_WATER_FACTOR * CHUNK_SIZE).unwrap();
        assert!(stalled.is_empty());

        // Buffer drained to the low-water mark: production resumes and
        // runs to end of file.
        let resumed = producer.produce(2 * CHUNK_SIZE).unwrap();
        assert_eq!(resumed.len(), 12 - HIGH_WATER_FACTOR);
        assert!(producer.is_done());
    }

    #[test]
    fn emits_trailing_partial_chunk() {
        let mut producer = producer_for(vec![7u8; CHUNK_SIZE + 100]);
        let chunks = producer.produce(0).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), 100);
    }

    #[test]
    fn empty_file_produces_nothing() {
        let mut producer = producer_for(Vec::new());
        assert!(producer.is_done());
        assert!(producer.produce(0).unwrap().is_empty());
    }
}
