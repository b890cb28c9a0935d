use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
    Gitea,
    Gogs,
}

impl ProviderKind {
    pub fn as_prefix(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::Gitea => "gitea",
            ProviderKind::Gogs => "gogs",
        }
    }

    /// Public host used to build clone URLs when discovery did not supply one.
    /// Gogs has no canonical public instance.
    pub fn default_host(&self) -> Option<&'static str> {
        match self {
            ProviderKind::GitHub => Some("github.com"),
            ProviderKind::GitLab => Some("gitlab.com"),
            ProviderKind::Gitea => Some("gitea.com"),
            ProviderKind::Gogs => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_prefix())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(ProviderKind::GitHub),
            "gitlab" => Ok(ProviderKind::GitLab),
            "gitea" => Ok(ProviderKind::Gitea),
            "gogs" => Ok(ProviderKind::Gogs),
            other => anyhow::bail!("unknown provider '{other}'"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Discard local changes and hard-reset to the remote head.
    #[default]
    Reset,
    /// Fetch and merge, keeping local commits.
    Pull,
    /// Update remote-tracking refs only.
    Fetch,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Reset => "reset",
            SyncStrategy::Pull => "pull",
            SyncStrategy::Fetch => "fetch",
        }
    }

    pub fn operation(&self) -> RepoOperation {
        match self {
            SyncStrategy::Reset => RepoOperation::Reset,
            SyncStrategy::Pull => RepoOperation::Pull,
            SyncStrategy::Fetch => RepoOperation::Fetch,
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reset" => Ok(SyncStrategy::Reset),
            "pull" => Ok(SyncStrategy::Pull),
            "fetch" => Ok(SyncStrategy::Fetch),
            other => anyhow::bail!("invalid strategy '{other}' (expected reset, pull or fetch)"),
        }
    }
}

/// The concrete git operation performed for one repository.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoOperation {
    Clone,
    Reset,
    Pull,
    Fetch,
}

impl RepoOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoOperation::Clone => "clone",
            RepoOperation::Reset => "reset",
            RepoOperation::Pull => "pull",
            RepoOperation::Fetch => "fetch",
        }
    }
}

impl fmt::Display for RepoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One repository as reported by a discovery collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredRepo {
    pub name: String,
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Size in kilobytes, as the hosting APIs report it.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub star_count: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_fork: bool,
}

impl DiscoveredRepo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clone_url: None,
            default_branch: None,
            is_private: false,
            language: None,
            topics: Vec::new(),
            size: 0,
            star_count: 0,
            updated_at: None,
            is_archived: false,
            is_fork: false,
        }
    }

    pub fn resolve_clone_url(
        &self,
        provider: ProviderKind,
        host: Option<&str>,
        organization: &str,
    ) -> anyhow::Result<String> {
        if let Some(url) = self.clone_url.as_deref().filter(|url| !url.is_empty()) {
            return Ok(url.to_string());
        }
        let host = host
            .or(provider.default_host())
            .ok_or_else(|| anyhow::anyhow!("{provider} requires a host to build clone urls"))?;
        let host = host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Ok(format!("https://{host}/{organization}/{}.git", self.name))
    }
}
