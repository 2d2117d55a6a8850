//! Data Transfer Objects
//!
//! Wire formats received from outside the orchestrator.

pub mod push;
