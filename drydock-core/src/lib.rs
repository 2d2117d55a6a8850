//! Drydock Core
//!
//! Core types shared by the Drydock build orchestrator.
//!
//! This crate contains:
//! - Domain types: build/mirror targets, webhook subscriptions, resources,
//!   command results and lifecycle states
//! - DTOs: inbound notification payloads

pub mod domain;
pub mod dto;
