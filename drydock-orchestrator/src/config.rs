//! Orchestrator configuration
//!
//! Defines all configurable parameters for the orchestrator: where targets
//! and working copies live, which registry images are pushed to, command
//! deadlines, scheduling intervals and the self-upgrade procedure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound of every configured duration
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

/// How the orchestrator rebuilds itself
#[derive(Debug, Clone)]
pub struct SelfUpgradeConfig {
    /// Own source repository as it appears in push notifications
    pub repository: String,

    /// Working copy of the orchestrator's own source
    pub source_dir: PathBuf,

    /// Rebuild command; first element is the program
    pub build_command: Vec<String>,

    /// Executable produced by the rebuild
    pub binary: PathBuf,
}

/// Orchestrator configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the webhook endpoint listens on
    pub listen_addr: SocketAddr,

    /// Directory holding build.json, mirror.json and webhooks.json
    pub targets_dir: PathBuf,

    /// Parent directory of per-source working copies
    pub checkout_root: PathBuf,

    /// Private registry namespace (e.g., "registry.example.org")
    pub registry_host: String,

    /// Self-upgrade settings, None when self-upgrade is disabled
    pub self_upgrade: Option<SelfUpgradeConfig>,

    /// Deadline of every external command
    pub command_timeout: Duration,

    /// Forced re-sync interval of build workers
    pub staleness_interval: Duration,

    /// Interval between mirror cycles
    pub mirror_interval: Duration,

    /// Time in-flight HTTP requests get to finish on shutdown
    pub shutdown_grace: Duration,

    /// Timeout of a single webhook notification
    pub notify_timeout: Duration,

    /// Shared secret for X-Hub-Signature-256 verification
    pub webhook_secret: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(registry_host: String) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            targets_dir: PathBuf::from("."),
            checkout_root: PathBuf::from("repositories"),
            registry_host,
            self_upgrade: None,
            command_timeout: Duration::from_secs(600), // 10 minutes
            staleness_interval: Duration::from_secs(6 * 3600),
            mirror_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(30),
            notify_timeout: Duration::from_secs(15),
            webhook_secret: None,
        }
    }

    /// Enables self-upgrade
    pub fn with_self_upgrade(mut self, self_upgrade: SelfUpgradeConfig) -> Self {
        self.self_upgrade = Some(self_upgrade);
        self
    }

    /// Own source repository, if self-upgrade is enabled
    pub fn self_repository(&self) -> Option<&str> {
        self.self_upgrade.as_ref().map(|s| s.repository.as_str())
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registry_host.trim().is_empty() {
            anyhow::bail!("registry_host cannot be empty");
        }

        if self.registry_host.ends_with('/') {
            anyhow::bail!("registry_host must not end with '/'");
        }

        for (name, value) in [
            ("command_timeout", self.command_timeout),
            ("staleness_interval", self.staleness_interval),
            ("mirror_interval", self.mirror_interval),
            ("shutdown_grace", self.shutdown_grace),
            ("notify_timeout", self.notify_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
            if value > MAX_DURATION {
                anyhow::bail!("{} must not exceed {:?}", name, MAX_DURATION);
            }
        }

        if let Some(self_upgrade) = &self.self_upgrade {
            if self_upgrade.repository.trim().is_empty() {
                anyhow::bail!("self repository cannot be empty");
            }
            if self_upgrade.build_command.is_empty() {
                anyhow::bail!("self build command cannot be empty");
            }
        }

        if matches!(&self.webhook_secret, Some(secret) if secret.is_empty()) {
            anyhow::bail!("webhook_secret cannot be empty when set");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_upgrade() -> SelfUpgradeConfig {
        SelfUpgradeConfig {
            repository: "git@host:org/drydock.git".to_string(),
            source_dir: PathBuf::from("."),
            build_command: vec!["cargo".to_string(), "build".to_string()],
            binary: PathBuf::from("target/release/drydock-orchestrator"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::new("registry.example.org".to_string());
        assert_eq!(config.command_timeout, Duration::from_secs(600));
        assert_eq!(config.mirror_interval, Duration::from_secs(3600));
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
        assert_eq!(config.listen_addr.port(), 8080);
        assert!(config.self_repository().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::new("registry.example.org".to_string());
        assert!(config.validate().is_ok());

        config.registry_host = String::new();
        assert!(config.validate().is_err());

        config.registry_host = "registry.example.org/".to_string();
        assert!(config.validate().is_err());

        config.registry_host = "registry.example.org".to_string();
        config.command_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.command_timeout = Duration::from_secs(1);
        config.webhook_secret = Some(String::new());
        assert!(config.validate().is_err());

        config.webhook_secret = Some("s3cret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_intervals_are_bounded() {
        let mut config = Config::new("registry.example.org".to_string());
        config.staleness_interval = Duration::from_secs(u64::MAX);
        assert!(config.validate().is_err());

        config.staleness_interval = MAX_DURATION;
        config.mirror_interval = MAX_DURATION + Duration::from_secs(1);
        assert!(config.validate().is_err());

        config.mirror_interval = MAX_DURATION;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_self_upgrade_validation() {
        let config = Config::new("registry.example.org".to_string())
            .with_self_upgrade(self_upgrade());
        assert_eq!(config.self_repository(), Some("git@host:org/drydock.git"));
        assert!(config.validate().is_ok());

        let mut broken = self_upgrade();
        broken.build_command.clear();
        let config = Config::new("registry.example.org".to_string()).with_self_upgrade(broken);
        assert!(config.validate().is_err());
    }
}
