#![forbid(unsafe_code)]

//! Session orchestration and event routing for coding-agent runtimes.
//!
//! Runs conversational turns against a pluggable [`executor::QueryExecutor`]
//! with resume-before-create semantics, bridges mid-query tool permissions to
//! an external UI, forks and lists on-disk sessions, watches session records
//! for changes, and fans every event into one
//! [`dispatcher::SharedEventDispatcher`].

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod permission;
pub mod service;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AgentError, AgentErrorKind, AgentResult, AppError, Result};
