//! Build pipeline
//!
//! For one source repository:
//! 1. Synchronize the working copy (clone if absent, fast-forward pull otherwise)
//! 2. For every build target of that source: build, tag, push
//! 3. After a successful push, notify the subscribers of that image
//!
//! A checkout failure aborts the whole run. A failing image only skips its own
//! remaining steps; sibling images are still attempted.

use async_trait::async_trait;
use drydock_core::domain::resource::ResourceKey;
use drydock_core::domain::target::{BuildTarget, Targets, checkout_dir_name};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Pipeline, RunOutcome};
use crate::repository::{TargetRegistry, WebhookNotifier};
use crate::runner::{CommandSpec, ProcessRunner};

/// Settings of the build pipeline
#[derive(Debug, Clone)]
pub struct BuildSettings {
    /// Parent directory of the working copies
    pub checkout_root: PathBuf,
    /// Private registry namespace images are pushed under
    pub registry_host: String,
    /// Deadline of every command
    pub command_timeout: Duration,
}

enum StepResult {
    Done,
    Failed,
    Cancelled,
}

/// Builds and publishes the images of a source repository
pub struct BuildPipeline {
    runner: Arc<dyn ProcessRunner>,
    registry: Arc<dyn TargetRegistry>,
    notifier: Arc<dyn WebhookNotifier>,
    settings: BuildSettings,
}

impl BuildPipeline {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        registry: Arc<dyn TargetRegistry>,
        notifier: Arc<dyn WebhookNotifier>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            runner,
            registry,
            notifier,
            settings,
        }
    }

    /// Working copy of `source_url`
    pub fn checkout_dir(&self, source_url: &str) -> PathBuf {
        self.settings
            .checkout_root
            .join(checkout_dir_name(source_url))
    }

    fn published_name(&self, image_name: &str) -> String {
        format!("{}/{}", self.settings.registry_host, image_name)
    }

    /// Runs one command, folding its result into a step result
    async fn step(&self, command: CommandSpec, cancel: &CancellationToken) -> StepResult {
        let result = self
            .runner
            .execute(&command, self.settings.command_timeout, cancel)
            .await;

        if result.succeeded() {
            StepResult::Done
        } else if result.cancelled() {
            StepResult::Cancelled
        } else {
            error!("'{}' {}: {}", command, result.status, result.output_text());
            StepResult::Failed
        }
    }

    /// Pulls an existing working copy, or clones a fresh one
    ///
    /// A clone lands in a staging sibling and is moved into place only once
    /// it completed, so an abandoned clone is never mistaken for a checkout.
    async fn sync_checkout(
        &self,
        source_url: &str,
        checkout: &Path,
        cancel: &CancellationToken,
    ) -> StepResult {
        if checkout.exists() {
            debug!("Updating working copy {}", checkout.display());
            let pull = CommandSpec::new(
                "git",
                [
                    "-C".to_string(),
                    checkout.display().to_string(),
                    "pull".to_string(),
                    "--ff-only".to_string(),
                ],
            );
            return self.step(pull, cancel).await;
        }

        let staging = staging_dir(checkout);
        if let Err(e) = discard(&staging).await {
            error!("Could not remove abandoned clone {}: {}", staging.display(), e);
            return StepResult::Failed;
        }

        info!("Cloning {} into {}", source_url, checkout.display());
        let clone = CommandSpec::new(
            "git",
            [
                "clone".to_string(),
                source_url.to_string(),
                staging.display().to_string(),
            ],
        );
        match self.step(clone, cancel).await {
            StepResult::Done => {}
            other => {
                if let Err(e) = discard(&staging).await {
                    warn!("Could not remove partial clone {}: {}", staging.display(), e);
                }
                return other;
            }
        }

        match tokio::fs::rename(&staging, checkout).await {
            Ok(()) => StepResult::Done,
            Err(e) => {
                error!(
                    "Could not move clone {} to {}: {}",
                    staging.display(),
                    checkout.display(),
                    e
                );
                StepResult::Failed
            }
        }
    }

    /// Build, tag and push one image; stops at the first failing step
    async fn publish_image(
        &self,
        target: &BuildTarget,
        checkout: &Path,
        cancel: &CancellationToken,
    ) -> StepResult {
        let context = checkout.join(&target.subpath);
        let build_file = context.join(&target.build_file);
        let published = self.published_name(&target.image_name);

        let steps = [
            CommandSpec::new(
                "docker",
                [
                    "build".to_string(),
                    "--tag".to_string(),
                    target.image_name.clone(),
                    "--file".to_string(),
                    build_file.display().to_string(),
                    context.display().to_string(),
                ],
            ),
            CommandSpec::new("docker", ["tag", target.image_name.as_str(), published.as_str()]),
            CommandSpec::new("docker", ["push", published.as_str()]),
        ];

        for command in steps {
            match self.step(command, cancel).await {
                StepResult::Done => {}
                other => return other,
            }
        }

        StepResult::Done
    }

    /// Best-effort delivery to every subscriber of `image_name`
    async fn notify_subscribers(&self, targets: &Targets, image_name: &str) {
        let subscribers = targets.subscribers_for(image_name);
        if subscribers.is_empty() {
            return;
        }

        let deliveries = subscribers.iter().map(|url| async move {
            (url, self.notifier.notify(url, image_name).await)
        });

        for (url, result) in join_all(deliveries).await {
            match result {
                Ok(()) => debug!("Notified {} about {}", url, image_name),
                Err(e) => warn!("Failed to notify {} about {}: {}", url, image_name, e),
            }
        }
    }
}

/// Clone destination next to `checkout`
fn staging_dir(checkout: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(checkout.file_name().unwrap_or_default());
    name.push(".clone");
    checkout.with_file_name(name)
}

/// Removes `dir` if present
async fn discard(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Pipeline for BuildPipeline {
    async fn run(&self, resource: &ResourceKey, cancel: &CancellationToken) -> RunOutcome {
        let ResourceKey::Build(source_url) = resource else {
            return RunOutcome::Aborted(format!("{} is not a build resource", resource));
        };

        // One consistent view of the tables for the whole run.
        let targets = self.registry.snapshot();
        let checkout = self.checkout_dir(source_url);

        match self.sync_checkout(source_url, &checkout, cancel).await {
            StepResult::Done => {}
            StepResult::Failed => {
                return RunOutcome::Aborted(format!("could not synchronize {}", source_url));
            }
            StepResult::Cancelled => return RunOutcome::Cancelled,
        }

        let mut succeeded = 0;
        let mut failed = 0;

        for target in targets.builds_for_source(source_url) {
            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            match self.publish_image(target, &checkout, cancel).await {
                StepResult::Done => {
                    info!("Published {}", self.published_name(&target.image_name));
                    succeeded += 1;
                    self.notify_subscribers(&targets, &target.image_name).await;
                }
                StepResult::Failed => {
                    error!("Image {} was not published", target.image_name);
                    failed += 1;
                }
                StepResult::Cancelled => return RunOutcome::Cancelled,
            }
        }

        RunOutcome::Completed { succeeded, failed }
    }
}
