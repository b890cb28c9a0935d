use crate::model::{DiscoveredRepo, ProviderKind};
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Source of the repository list for one organization.
pub trait RepoDiscovery: Send + Sync {
    fn list_repos(
        &self,
        provider: ProviderKind,
        organization: &str,
    ) -> anyhow::Result<Vec<DiscoveredRepo>>;
}

/// Fixed list, for callers that already know what to sync.
#[derive(Clone, Debug, Default)]
pub struct StaticDiscovery {
    repos: Vec<DiscoveredRepo>,
}

impl StaticDiscovery {
    pub fn new(repos: Vec<DiscoveredRepo>) -> Self {
        Self { repos }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(DiscoveredRepo::named).collect())
    }
}

impl RepoDiscovery for StaticDiscovery {
    fn list_repos(
        &self,
        _provider: ProviderKind,
        _organization: &str,
    ) -> anyhow::Result<Vec<DiscoveredRepo>> {
        Ok(self.repos.clone())
    }
}

/// Either a bare array of descriptors or an object wrapping one under
/// `repositories`.
#[derive(Deserialize)]
#[serde(untagged)]
enum InventoryDocument {
    List(Vec<DiscoveredRepo>),
    Wrapped { repositories: Vec<DiscoveredRepo> },
}

pub fn parse_inventory(data: &[u8]) -> anyhow::Result<Vec<DiscoveredRepo>> {
    let document: InventoryDocument =
        serde_json::from_slice(data).context("parse repository inventory")?;
    let repos = match document {
        InventoryDocument::List(repos) => repos,
        InventoryDocument::Wrapped { repositories } => repositories,
    };
    if let Some(blank) = repos.iter().position(|repo| repo.name.trim().is_empty()) {
        anyhow::bail!("inventory entry {blank} has an empty name");
    }
    Ok(repos)
}

/// Reads a JSON inventory exported from a hosting provider.
#[derive(Clone, Debug)]
pub struct InventoryFileDiscovery {
    path: PathBuf,
}

impl InventoryFileDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RepoDiscovery for InventoryFileDiscovery {
    fn list_repos(
        &self,
        _provider: ProviderKind,
        _organization: &str,
    ) -> anyhow::Result<Vec<DiscoveredRepo>> {
        let data = fs::read(&self.path)
            .with_context(|| format!("read inventory {}", self.path.display()))?;
        parse_inventory(&data)
    }
}
