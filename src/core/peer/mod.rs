//! Per-peer machinery: wire frames, the negotiation state machine, the
//! transfer protocol, and the manager that owns all peer sessions.

pub mod frames;
pub mod manager;
pub mod session;
pub mod transfer;

pub use manager::{ManagerAction, PeersManager};
pub use session::{
    NegotiationState, PeerAction, PeerRole, PeerSession, TransportCommand, TransportEvent,
};
pub use transfer::TransferPhase;

use crate::core::config::TransferPolicy;
use crate::core::storage::{ImageScaler, SecretStore, TabsRegistry};
use std::sync::Arc;

/// Shared collaborators and policy handed to every peer session.
#[derive(Clone)]
pub struct SessionContext {
    pub secrets: Arc<dyn SecretStore>,
    pub tabs: Arc<dyn TabsRegistry>,
    pub scaler: Option<Arc<dyn ImageScaler>>,
    pub policy: TransferPolicy,
}

impl SessionContext {
    pub fn new(secrets: Arc<dyn SecretStore>, tabs: Arc<dyn TabsRegistry>) -> Self {
        Self {
            secrets,
            tabs,
            scaler: None,
            policy: TransferPolicy::default(),
        }
    }

    pub fn with_scaler(mut self, scaler: Arc<dyn ImageScaler>) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn with_policy(mut self, policy: TransferPolicy) -> Self {
        self.policy = policy;
        self
    }
}
