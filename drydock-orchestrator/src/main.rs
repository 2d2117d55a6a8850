//! Drydock Orchestrator
//!
//! Keeps container images in a private registry current with their sources.
//!
//! Architecture:
//! - Configuration: command-line flags with environment overrides
//! - Repositories: target files on disk, webhook delivery over HTTP
//! - Services: build and mirror pipelines driving git and docker
//! - Scheduler: one debounced worker per build source and mirrored image
//! - API: push webhook and health probe
//! - Lifecycle: drain on shutdown, rebuild and re-exec on own source push

mod api;
mod config;
mod lifecycle;
mod repository;
mod runner;
mod scheduler;
mod service;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use drydock_core::domain::resource::ResourceKey;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::config::{Config, SelfUpgradeConfig};
use crate::lifecycle::{Exit, ExecRelauncher, LifecycleHandle, LifecycleSettings};
use crate::repository::{FileTargetRegistry, HttpWebhookNotifier, TargetRegistry};
use crate::runner::{ProcessRunner, SystemRunner};
use crate::scheduler::{Schedule, Scheduler, SchedulerBuilder};
use crate::service::{BuildPipeline, BuildSettings, MirrorPipeline, MirrorSettings, Pipeline};

#[derive(Debug, Parser)]
#[command(name = "drydock-orchestrator", version, about)]
struct Cli {
    /// HTTP bind address
    #[arg(long, env = "DRYDOCK_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    /// Directory holding build.json, mirror.json and webhooks.json
    #[arg(long, env = "DRYDOCK_TARGETS_DIR", default_value = ".")]
    targets_dir: PathBuf,

    /// Parent of per-source working copies
    #[arg(long, env = "DRYDOCK_CHECKOUT_ROOT", default_value = "repositories")]
    checkout_root: PathBuf,

    /// Private registry namespace, e.g. registry.example.org
    #[arg(long, env = "DRYDOCK_REGISTRY_HOST")]
    registry_host: String,

    /// Own source repository; pushes to it upgrade the orchestrator
    #[arg(long, env = "DRYDOCK_SELF_REPOSITORY")]
    self_repository: Option<String>,

    /// Working copy of own source
    #[arg(long, env = "DRYDOCK_SELF_SOURCE_DIR", default_value = ".")]
    self_source_dir: PathBuf,

    /// Rebuild command, split on whitespace
    #[arg(
        long,
        env = "DRYDOCK_SELF_BUILD_COMMAND",
        default_value = "cargo build --release"
    )]
    self_build_command: String,

    /// Executable produced by the rebuild, relative to the source dir
    #[arg(
        long,
        env = "DRYDOCK_SELF_BINARY",
        default_value = "target/release/drydock-orchestrator"
    )]
    self_binary: PathBuf,

    #[arg(long, env = "DRYDOCK_COMMAND_TIMEOUT_SECS", default_value_t = 600)]
    command_timeout_secs: u64,

    #[arg(long, env = "DRYDOCK_STALENESS_SECS", default_value_t = 21600)]
    staleness_secs: u64,

    #[arg(long, env = "DRYDOCK_MIRROR_INTERVAL_SECS", default_value_t = 3600)]
    mirror_interval_secs: u64,

    #[arg(long, env = "DRYDOCK_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    shutdown_grace_secs: u64,

    #[arg(long, env = "DRYDOCK_NOTIFY_TIMEOUT_SECS", default_value_t = 15)]
    notify_timeout_secs: u64,

    /// Shared secret for X-Hub-Signature-256
    #[arg(long, env = "DRYDOCK_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.registry_host);
        config.listen_addr = self.listen_addr;
        config.targets_dir = self.targets_dir;
        config.checkout_root = self.checkout_root;
        config.command_timeout = Duration::from_secs(self.command_timeout_secs);
        config.staleness_interval = Duration::from_secs(self.staleness_secs);
        config.mirror_interval = Duration::from_secs(self.mirror_interval_secs);
        config.shutdown_grace = Duration::from_secs(self.shutdown_grace_secs);
        config.notify_timeout = Duration::from_secs(self.notify_timeout_secs);
        config.webhook_secret = self.webhook_secret;

        match self.self_repository {
            Some(repository) => config.with_self_upgrade(SelfUpgradeConfig {
                repository,
                source_dir: self.self_source_dir,
                build_command: self
                    .self_build_command
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                binary: self.self_binary,
            }),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drydock_orchestrator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Drydock Orchestrator");

    let config = Cli::parse().into_config();
    config.validate()?;
    info!(
        "Loaded configuration: registry={}, targets_dir={}, self_upgrade={}",
        config.registry_host,
        config.targets_dir.display(),
        config.self_repository().unwrap_or("disabled")
    );

    std::fs::create_dir_all(&config.checkout_root).with_context(|| {
        format!(
            "Failed to create checkout root {}",
            config.checkout_root.display()
        )
    })?;

    let registry = Arc::new(
        FileTargetRegistry::load(&config.targets_dir).context("Failed to load targets")?,
    );
    let targets = registry.snapshot();
    info!(
        "Loaded {} build target(s), {} mirror(s), {} webhook subscription(s)",
        targets.builds.len(),
        targets.mirrors.len(),
        targets.subscriptions.len()
    );

    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
    let notifier = Arc::new(
        HttpWebhookNotifier::new(config.notify_timeout)
            .context("Failed to create webhook client")?,
    );
    let cancel = CancellationToken::new();

    let build: Arc<dyn Pipeline> = Arc::new(BuildPipeline::new(
        runner.clone(),
        registry.clone(),
        notifier,
        BuildSettings {
            checkout_root: config.checkout_root.clone(),
            registry_host: config.registry_host.clone(),
            command_timeout: config.command_timeout,
        },
    ));
    let mirror: Arc<dyn Pipeline> = Arc::new(MirrorPipeline::new(
        runner.clone(),
        MirrorSettings {
            registry_host: config.registry_host.clone(),
            command_timeout: config.command_timeout,
        },
    ));

    let mut builder = SchedulerBuilder::new(cancel.clone());
    for source in targets.sources() {
        builder.add(
            ResourceKey::Build(source),
            build.clone(),
            Schedule::every(config.staleness_interval),
        )?;
    }
    for target in &targets.mirrors {
        builder.add(
            ResourceKey::Mirror(target.image_reference.clone()),
            mirror.clone(),
            Schedule::jittered(config.mirror_interval),
        )?;
    }
    let (scheduler, workers) = builder.start();

    // Rebuild everything once after (re)launch
    for source in targets.sources() {
        scheduler.request_run(&ResourceKey::Build(source));
    }

    let current_executable =
        std::env::current_exe().context("Failed to resolve current executable")?;
    let (handle, controller) = lifecycle::lifecycle(
        cancel.clone(),
        runner,
        Arc::new(ExecRelauncher),
        LifecycleSettings {
            self_upgrade: config.self_upgrade.clone(),
            current_executable,
            command_timeout: config.command_timeout,
            shutdown_grace: config.shutdown_grace,
        },
    );

    spawn_signal_listeners(
        registry.clone(),
        scheduler.clone(),
        handle.clone(),
        cancel.clone(),
    )?;

    let app = api::create_router(AppState {
        scheduler,
        registry,
        lifecycle: handle,
        self_repository: config.self_repository().map(str::to_string),
        webhook_secret: config.webhook_secret.clone(),
        body_timeout: api::BODY_TIMEOUT,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    info!("Listening on {}", config.listen_addr);

    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    match controller.run(workers, server).await? {
        Exit::Terminated => info!("Drydock Orchestrator stopped"),
        Exit::Relaunched => info!("Handed over to the new process"),
    }

    Ok(())
}

/// SIGHUP reloads targets; SIGINT and SIGTERM request a shutdown
fn spawn_signal_listeners(
    registry: Arc<FileTargetRegistry>,
    scheduler: Scheduler,
    lifecycle: LifecycleHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;

    let stop = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    reload_targets(&registry, &scheduler);
                }
            }
        }
    });

    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT");
                lifecycle.request_shutdown();
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                lifecycle.request_shutdown();
            }
        }
    });

    Ok(())
}

fn reload_targets(registry: &FileTargetRegistry, scheduler: &Scheduler) {
    match registry.reload() {
        Ok(targets) => {
            info!("Reloaded {} build target(s)", targets.builds.len());
            for source in targets.sources() {
                let key = ResourceKey::Build(source);
                if !scheduler.contains(&key) {
                    warn!("{} has no worker until the next restart", key);
                }
            }
            for target in &targets.mirrors {
                let key = ResourceKey::Mirror(target.image_reference.clone());
                if !scheduler.contains(&key) {
                    warn!("{} has no worker until the next restart", key);
                }
            }
        }
        Err(e) => error!("Reload failed, keeping previous targets: {}", e),
    }
}
