//! Push notification DTO

use serde::Deserialize;

/// Branch references that count as trunk
pub const TRUNK_REFS: [&str; 2] = ["refs/heads/main", "refs/heads/master"];

/// Repository-change notification, as sent by the git host
///
/// Only the fields routing needs are decoded; everything else is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: PushRepository,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushRepository {
    pub ssh_url: String,
}

impl PushEvent {
    pub fn is_trunk(&self) -> bool {
        TRUNK_REFS.contains(&self.git_ref.as_str())
    }

    pub fn repository_url(&self) -> &str {
        &self.repository.ssh_url
    }
}
