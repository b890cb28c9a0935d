use crate::connection::ConnectionManager;
use anyhow::Context;
use synclone_core::cancel::CancelToken;
use synclone_core::discovery::{RepoDiscovery, parse_inventory};
use synclone_core::model::{DiscoveredRepo, ProviderKind};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

/// Discovers repositories from a JSON inventory served over HTTP(S).
///
/// `{provider}` and `{org}` placeholders in the url are substituted per call.
/// The discovery is synchronous; it drives its own single-threaded runtime
/// and must not be called from inside another runtime.
pub struct UrlInventoryDiscovery {
    url_template: String,
    manager: ConnectionManager,
    cancel: CancelToken,
    runtime: Runtime,
}

impl UrlInventoryDiscovery {
    pub fn new(
        url_template: impl Into<String>,
        manager: ConnectionManager,
        cancel: CancelToken,
    ) -> anyhow::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build discovery runtime")?;
        Ok(Self {
            url_template: url_template.into(),
            manager,
            cancel,
            runtime,
        })
    }

    pub fn url_for(&self, provider: ProviderKind, organization: &str) -> String {
        self.url_template
            .replace("{provider}", provider.as_prefix())
            .replace("{org}", organization)
    }

    /// Release the connection pool, logging its counters.
    pub fn close(self) {
        let stats = self.manager.close();
        info!(
            requests = stats.total_requests,
            retries = stats.retry_attempts,
            "inventory discovery closed"
        );
    }
}

impl RepoDiscovery for UrlInventoryDiscovery {
    fn list_repos(
        &self,
        provider: ProviderKind,
        organization: &str,
    ) -> anyhow::Result<Vec<DiscoveredRepo>> {
        let url = self.url_for(provider, organization);
        debug!(url = %url, "fetching repository inventory");
        let body = self
            .runtime
            .block_on(self.manager.get_bytes(&self.cancel, &url))
            .with_context(|| format!("fetch inventory {url}"))?;
        let repos = parse_inventory(&body)?;
        info!(
            provider = %provider,
            org = %organization,
            count = repos.len(),
            "inventory fetched"
        );
        Ok(repos)
    }
}
