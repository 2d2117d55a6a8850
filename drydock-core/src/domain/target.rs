//! Target domain types
//!
//! Build targets, mirror targets and webhook subscriptions, plus the
//! immutable [`Targets`] snapshot the orchestrator reads them through.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

/// An image built from a source repository
///
/// Identity is `image_name`. Several targets may share one `source_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub image_name: String,
    pub source_url: String,
    /// Build context, relative to the checkout root
    pub subpath: PathBuf,
    /// Build file, relative to `subpath`
    pub build_file: PathBuf,
}

/// A third-party image replicated into the private registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MirrorTarget {
    pub image_reference: String,
}

/// A callback interested in a set of images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub callback_url: String,
    pub interested_images: BTreeSet<String>,
}

impl WebhookSubscription {
    pub fn wants(&self, image_name: &str) -> bool {
        self.interested_images.contains(image_name)
    }
}

/// Read-only snapshot of every configured target
///
/// Replaced as a whole on reload, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Targets {
    pub builds: Vec<BuildTarget>,
    pub mirrors: Vec<MirrorTarget>,
    pub subscriptions: Vec<WebhookSubscription>,
}

impl Targets {
    /// Distinct source URLs, in first-seen order
    pub fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.builds
            .iter()
            .filter(|t| seen.insert(t.source_url.as_str()))
            .map(|t| t.source_url.clone())
            .collect()
    }

    pub fn has_source(&self, source_url: &str) -> bool {
        self.builds.iter().any(|t| t.source_url == source_url)
    }

    /// Build targets that are produced from `source_url`
    pub fn builds_for_source<'a>(
        &'a self,
        source_url: &'a str,
    ) -> impl Iterator<Item = &'a BuildTarget> + 'a {
        self.builds.iter().filter(move |t| t.source_url == source_url)
    }

    /// Callback URLs subscribed to `image_name`
    pub fn subscribers_for(&self, image_name: &str) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|s| s.wants(image_name))
            .map(|s| s.callback_url.clone())
            .collect()
    }
}

/// Directory name of the working copy for a source URL
///
/// Keeps the last path segment (after the final `/` or `:`) and drops a
/// trailing `.git`, so `git@github.com:org/app.git` becomes `app`.
pub fn checkout_dir_name(source_url: &str) -> String {
    let trimmed = source_url.trim_end_matches('/');
    let base = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    let name = base.strip_suffix(".git").unwrap_or(base);

    if name.is_empty() || name == "." || name == ".." {
        return trimmed
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
    }

    name.to_string()
}
