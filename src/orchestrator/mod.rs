//! Query orchestration.
//!
//! Covers context validation, branch resolution, and the
//! [`query::QueryOrchestrator`] that runs queries with the resume-then-create
//! retry policy.

pub mod branch;
pub mod context;
pub mod query;
