//! Rendezvous signaling: wire contract, session state machine, and the
//! async socket driver.

pub mod driver;
pub mod messages;
pub mod session;

pub use driver::{SignalingCommand, SignalingDriver, SignalingHandle, SignalingUpdate};
pub use session::{EndpointConfig, SignalAction, SignalingSession, TimerKind};
