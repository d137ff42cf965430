//! Chunked byte-stream pipeline: producer (sender side) and consumer
//! (receiver side) for one file at a time.

pub mod chunker;
pub mod digester;

pub use chunker::ChunkProducer;
pub use digester::{ChunkConsumer, ReceivedFile};
