//! Per-instance protocol client sessions: the process-wide registry of live
//! client handles and the guard that hands out only connected ones.

pub mod client;
mod guard;
mod registry;

pub use client::{
    MessageKey, MissingSessionStarter, OutgoingMessage, PresenceMedia, ProtocolClient,
    SendResponse, SessionStarter,
};
pub use guard::{SessionError, SessionGuard, DEFAULT_SETTLE_INTERVAL};
pub use registry::ConnectionRegistry;
