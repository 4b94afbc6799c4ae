//! Tool-permission bridging.
//!
//! Covers the [`bridge::PermissionBridge`] consulted by executors, the
//! [`registry::EventRegistry`] of handlers, the [`pending::PendingActions`]
//! map of externally answered waits, and the [`forwarder::ActionForwarder`]
//! that connects them to the dispatcher.

pub mod bridge;
pub mod forwarder;
pub mod pending;
pub mod registry;
