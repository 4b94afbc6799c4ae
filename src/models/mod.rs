//! Domain model module declarations.

pub mod action;
pub mod event;
pub mod query;
pub mod session;
