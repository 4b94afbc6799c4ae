//! Session records on disk.
//!
//! Covers workspace path encoding, raw record and index access, the
//! history reader, forking, and the debounced file watcher.

pub mod debounce;
pub mod encoding;
pub mod fork;
pub mod history;
pub mod store;
pub mod watcher;
