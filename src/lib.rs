//! relaydrop — rendezvous-signaled peer-to-peer file and text transfer.
//!
//! Two endpoints discover each other through a rendezvous server, negotiate
//! a direct secure transport, and exchange files and text in chunked form
//! with flow control, progress reporting, and automatic recovery from
//! transient disconnects.
//!
//! # Module structure
//!
//! - [`core::signaling`]: control connection to the rendezvous server
//!   (reconnection, message dispatch, async socket driver)
//! - [`core::peer`]: per-peer sessions (transport negotiation state
//!   machine, transfer protocol) and the manager owning them
//! - [`core::pipeline`]: chunk producer/consumer with backpressure
//! - [`core::storage`]: external collaborator contracts (secret store,
//!   same-origin registry, file sources, image scaling)
//! - [`core::events`]: everything surfaced to the embedding application
//!
//! All protocol logic is in pure state machines that consume discrete
//! events and return declarative actions; only the signaling driver does
//! I/O. The embedding application executes transport commands against its
//! platform transport and feeds transport events back in.
//!
//! # Quick start
//!
//! ```ignore
//! use relaydrop::{
//!     EndpointConfig, MemorySecretStore, MemoryTabsRegistry, PeersManager,
//!     SessionContext, SignalingDriver, SignalingSession, SignalingUpdate,
//! };
//! use std::sync::Arc;
//!
//! let secrets = Arc::new(MemorySecretStore::new());
//! let tabs = Arc::new(MemoryTabsRegistry::new());
//!
//! let session = SignalingSession::new(
//!     EndpointConfig {
//!         base_url: "wss://drop.example.org".into(),
//!         rtc_supported: true,
//!     },
//!     secrets.clone(),
//!     tabs.clone(),
//! );
//! let (updates_tx, mut updates) = tokio::sync::mpsc::unbounded_channel();
//! let (driver, handle) = SignalingDriver::new(session, updates_tx);
//! tokio::spawn(driver.run());
//! handle.connect();
//!
//! let mut peers = PeersManager::new(SessionContext::new(secrets, tabs));
//! while let Some(update) = updates.recv().await {
//!     match update {
//!         SignalingUpdate::Message(message) => {
//!             for action in peers.handle_server_message(message) {
//!                 // execute transport commands / server sends / app events
//!             }
//!         }
//!         SignalingUpdate::Event(event) => {
//!             // render notices, prompts, progress
//!         }
//!     }
//! }
//! ```

mod core;
pub mod utils;

pub use crate::core::config::{self as config, TransferPolicy};
pub use crate::core::events::{AppEvent, Notice, ProgressStatus};
pub use crate::core::peer::frames::{
    FileHeader, FramePayload, PeerFrame, RejectReason, TransferRequest,
};
pub use crate::core::peer::{
    ManagerAction, NegotiationState, PeerAction, PeerRole, PeerSession, PeersManager,
    SessionContext, TransferPhase, TransportCommand, TransportEvent,
};
pub use crate::core::pipeline::{ChunkConsumer, ChunkProducer, ReceivedFile};
pub use crate::core::signaling::messages::{
    ClientMessage, IdentityMessage, PeerInfo, PeerName, RoomAssociation, RoomType, SdpKind,
    ServerMessage, SessionDescription, SignalData,
};
pub use crate::core::signaling::{
    EndpointConfig, SignalAction, SignalingCommand, SignalingDriver, SignalingHandle,
    SignalingSession, SignalingUpdate, TimerKind,
};
pub use crate::core::storage::{
    DiskFile, FileSource, ImageScaler, MemoryFile, MemorySecretStore, MemoryTabsRegistry,
    RoomSecretEntry, SecretStore, TabsRegistry,
};
