//! Core domain types
//!
//! These types describe what the orchestrator builds, mirrors and notifies,
//! and the transient results of running external commands.

pub mod execution;
pub mod lifecycle;
pub mod resource;
pub mod target;
