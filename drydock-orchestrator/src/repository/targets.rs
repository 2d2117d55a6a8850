//! Target registry
//!
//! Supplies the build targets, mirror targets and webhook subscriptions.
//! The file-backed implementation reads three JSON documents:
//!
//! - `build.json`: `{ "<image>": { "url": "...", "path": "...", "file": "..." } }`
//! - `mirror.json`: `["<image reference>", ...]`
//! - `webhooks.json`: `{ "<callback url>": ["<image>", ...] }`
//!
//! The whole table is swapped atomically on reload.

use drydock_core::domain::target::{
    BuildTarget, MirrorTarget, Targets, WebhookSubscription, checkout_dir_name,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

pub const BUILD_FILE: &str = "build.json";
pub const MIRROR_FILE: &str = "mirror.json";
pub const WEBHOOKS_FILE: &str = "webhooks.json";

/// Errors raised while loading targets
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("sources {first} and {second} would share checkout directory '{dir}'")]
    CheckoutCollision {
        dir: String,
        first: String,
        second: String,
    },
}

/// Read access to the configured targets
pub trait TargetRegistry: Send + Sync {
    /// Current snapshot of every table
    fn snapshot(&self) -> Arc<Targets>;

    fn build_targets(&self) -> Vec<BuildTarget> {
        self.snapshot().builds.clone()
    }

    fn mirror_targets(&self) -> Vec<MirrorTarget> {
        self.snapshot().mirrors.clone()
    }

    fn webhook_subscriptions(&self) -> Vec<WebhookSubscription> {
        self.snapshot().subscriptions.clone()
    }
}

/// Registry holding a fixed snapshot
pub struct StaticTargetRegistry {
    targets: Arc<Targets>,
}

impl StaticTargetRegistry {
    pub fn new(targets: Targets) -> Self {
        Self {
            targets: Arc::new(targets),
        }
    }
}

impl TargetRegistry for StaticTargetRegistry {
    fn snapshot(&self) -> Arc<Targets> {
        Arc::clone(&self.targets)
    }
}

/// Registry backed by JSON files in a directory
pub struct FileTargetRegistry {
    dir: PathBuf,
    targets: RwLock<Arc<Targets>>,
}

impl FileTargetRegistry {
    /// Loads all tables from `dir`
    ///
    /// `build.json` is mandatory; the other two files are optional.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let dir = dir.into();
        let targets = load_targets(&dir)?;
        info!(
            "Loaded {} build target(s), {} mirror target(s), {} webhook subscription(s) from {}",
            targets.builds.len(),
            targets.mirrors.len(),
            targets.subscriptions.len(),
            dir.display()
        );

        Ok(Self {
            dir,
            targets: RwLock::new(Arc::new(targets)),
        })
    }

    /// Re-reads all tables and replaces the snapshot as a whole
    ///
    /// On error the previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<Targets>, RegistryError> {
        let targets = Arc::new(load_targets(&self.dir)?);
        *self
            .targets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::clone(&targets);
        info!("Reloaded targets from {}", self.dir.display());
        Ok(targets)
    }
}

impl TargetRegistry for FileTargetRegistry {
    fn snapshot(&self) -> Arc<Targets> {
        Arc::clone(
            &self
                .targets
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

#[derive(Debug, Deserialize)]
struct BuildEntry {
    #[serde(alias = "URL")]
    url: String,
    #[serde(default = "default_subpath", alias = "Path")]
    path: PathBuf,
    #[serde(default = "default_build_file", alias = "File")]
    file: PathBuf,
}

fn default_subpath() -> PathBuf {
    PathBuf::from(".")
}

fn default_build_file() -> PathBuf {
    PathBuf::from("Dockerfile")
}

fn load_targets(dir: &Path) -> Result<Targets, RegistryError> {
    let builds: BTreeMap<String, BuildEntry> = read_json(&dir.join(BUILD_FILE))?;
    let mirrors: Vec<String> = read_optional_json(&dir.join(MIRROR_FILE))?.unwrap_or_default();
    let webhooks: BTreeMap<String, BTreeSet<String>> =
        read_optional_json(&dir.join(WEBHOOKS_FILE))?.unwrap_or_default();

    let targets = Targets {
        builds: builds
            .into_iter()
            .map(|(image_name, entry)| BuildTarget {
                image_name,
                source_url: entry.url,
                subpath: entry.path,
                build_file: entry.file,
            })
            .collect(),
        mirrors: dedup(mirrors)
            .into_iter()
            .map(|image_reference| MirrorTarget { image_reference })
            .collect(),
        subscriptions: webhooks
            .into_iter()
            .map(|(callback_url, interested_images)| WebhookSubscription {
                callback_url,
                interested_images,
            })
            .collect(),
    };

    check_checkout_collisions(&targets)?;
    Ok(targets)
}

/// Two sources mapping to the same working copy would let two workers share
/// one checkout.
fn check_checkout_collisions(targets: &Targets) -> Result<(), RegistryError> {
    let mut owners: HashMap<String, String> = HashMap::new();
    for source in targets.sources() {
        let dir = checkout_dir_name(&source);
        if let Some(first) = owners.get(&dir) {
            return Err(RegistryError::CheckoutCollision {
                dir,
                first: first.clone(),
                second: source,
            });
        }
        owners.insert(dir, source);
    }
    Ok(())
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| {
            let fresh = seen.insert(item.clone());
            if !fresh {
                warn!("Ignoring duplicate mirror target {}", item);
            }
            fresh
        })
        .collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RegistryError> {
    let bytes = std::fs::read(path).map_err(|source| RegistryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| RegistryError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, RegistryError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}
