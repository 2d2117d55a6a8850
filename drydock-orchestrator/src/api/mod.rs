//! API Module
//!
//! HTTP surface of the orchestrator: a health probe and the push webhook,
//! which answers every other path.

pub mod health;
pub mod signature;
pub mod webhook;

use axum::{Router, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::lifecycle::LifecycleHandle;
use crate::repository::TargetRegistry;
use crate::scheduler::Scheduler;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub registry: Arc<dyn TargetRegistry>,
    pub lifecycle: LifecycleHandle,
    /// Own source repository; pushes to it trigger an upgrade
    pub self_repository: Option<String>,
    pub webhook_secret: Option<String>,
    /// Time a client gets to deliver a push payload
    pub body_timeout: Duration,
}

/// Default of [`AppState::body_timeout`]
pub const BODY_TIMEOUT: Duration = Duration::from_secs(15);

/// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .fallback(webhook::handle_push)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
