//! Mirror pipeline
//!
//! Republishes a third-party image under the private registry namespace:
//! pull, retag, push. Each mirrored image has its own worker, so a slow or
//! broken upstream only delays itself.

use async_trait::async_trait;
use drydock_core::domain::resource::ResourceKey;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{Pipeline, RunOutcome};
use crate::runner::{CommandSpec, ProcessRunner};

/// Settings of the mirror pipeline
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub registry_host: String,
    pub command_timeout: Duration,
}

pub struct MirrorPipeline {
    runner: Arc<dyn ProcessRunner>,
    settings: MirrorSettings,
}

impl MirrorPipeline {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: MirrorSettings) -> Self {
        Self { runner, settings }
    }
}

#[async_trait]
impl Pipeline for MirrorPipeline {
    async fn run(&self, resource: &ResourceKey, cancel: &CancellationToken) -> RunOutcome {
        let ResourceKey::Mirror(image) = resource else {
            return RunOutcome::Aborted(format!("{} is not a mirror resource", resource));
        };
        let mirrored = format!("{}/{}", self.settings.registry_host, image);

        let pull = CommandSpec::new("docker", ["pull", image.as_str()]);
        let result = self
            .runner
            .execute(&pull, self.settings.command_timeout, cancel)
            .await;
        if result.cancelled() {
            return RunOutcome::Cancelled;
        }
        if !result.succeeded() {
            return RunOutcome::Aborted(format!(
                "pull of {} {}: {}",
                image,
                result.status,
                result.output_text()
            ));
        }

        for command in [
            CommandSpec::new("docker", ["tag", image.as_str(), mirrored.as_str()]),
            CommandSpec::new("docker", ["push", mirrored.as_str()]),
        ] {
            let result = self
                .runner
                .execute(&command, self.settings.command_timeout, cancel)
                .await;
            if result.cancelled() {
                return RunOutcome::Cancelled;
            }
            if !result.succeeded() {
                error!("'{}' {}: {}", command, result.status, result.output_text());
                return RunOutcome::Completed {
                    succeeded: 0,
                    failed: 1,
                };
            }
        }

        info!("Mirrored {} as {}", image, mirrored);
        RunOutcome::Completed {
            succeeded: 1,
            failed: 0,
        }
    }
}
