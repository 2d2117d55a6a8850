//! Repository layer
//!
//! Repositories are thin adapters over the outside world: the target
//! tables on disk and the subscribers' HTTP endpoints. They carry no
//! scheduling logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod targets;
mod webhooks;

// Re-export traits
pub use targets::TargetRegistry;
pub use webhooks::WebhookNotifier;

// Re-export implementations
pub use targets::{FileTargetRegistry, RegistryError, StaticTargetRegistry};
pub use webhooks::{HttpWebhookNotifier, NotifyError};
