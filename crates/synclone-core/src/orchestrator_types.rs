use crate::checkpoint::CheckpointStatus;
use crate::config::SyncConfig;
use crate::filter::{FilterCriteria, FilterStats};
use crate::model::{DiscoveredRepo, ProviderKind, RepoOperation, SyncStrategy};
use crate::progress::{DisplayMode, ProgressTracker};
use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub type ProgressReporter<'a> = dyn Fn(&ProgressTracker) + 'a;

/// What to sync and how.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    pub provider: ProviderKind,
    pub organization: String,
    /// Overrides the provider's public host when building clone urls.
    pub host: Option<String>,
    pub target_path: PathBuf,
    pub strategy: SyncStrategy,
    pub filters: FilterCriteria,
    pub parallel: usize,
    pub max_retries: u32,
    pub resume: bool,
    /// On resume, run failed repositories again unless their error is
    /// permanent.
    pub retry_failed: bool,
    pub progress_mode: DisplayMode,
}

impl SyncRequest {
    pub fn new(
        provider: ProviderKind,
        organization: impl Into<String>,
        target_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            organization: organization.into(),
            host: None,
            target_path: target_path.into(),
            strategy: SyncStrategy::default(),
            filters: FilterCriteria::default(),
            parallel: 10,
            max_retries: 3,
            resume: false,
            retry_failed: true,
            progress_mode: DisplayMode::default(),
        }
    }

    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.strategy = config.strategy;
        self.parallel = config.parallel;
        self.max_retries = config.max_retries;
        self.progress_mode = config.progress_mode;
        self
    }
}

/// Engine-wide tuning that is not part of a single request.
#[derive(Clone, Debug)]
pub struct OrchestratorOptions {
    /// Backoff shape for operation retries; the attempt bound comes from the
    /// request.
    pub retry: RetryPolicy,
    pub checkpoint_interval: Duration,
    pub large_set_threshold: usize,
    pub render_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            checkpoint_interval: Duration::from_secs(30),
            large_set_threshold: 500,
            render_interval: Duration::from_secs(2),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            checkpoint_interval: config.checkpoint_interval(),
            large_set_threshold: config.large_set_threshold,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutcomeKind {
    Completed,
    Failed,
    /// Already done in an earlier run, or failed permanently before.
    Skipped,
    /// Left pending because the run was cancelled.
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct RepoOutcome {
    pub name: String,
    pub kind: OutcomeKind,
    pub operation: Option<RepoOperation>,
    pub attempts: u32,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct SyncReport {
    pub provider: ProviderKind,
    pub organization: String,
    pub status: CheckpointStatus,
    pub resumed: bool,
    /// Repositories tracked by the checkpoint.
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub outcomes: Vec<RepoOutcome>,
    pub filter_stats: FilterStats,
    pub peak_active: usize,
    pub elapsed: Duration,
    pub state_file: PathBuf,
}

impl SyncReport {
    pub fn outcome(&self, name: &str) -> Option<&RepoOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RepoOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.kind == OutcomeKind::Failed)
    }
}

pub(crate) struct WorkItem {
    pub(crate) repo: DiscoveredRepo,
    pub(crate) path: PathBuf,
}

pub(crate) enum WorkResult {
    Synced {
        operation: RepoOperation,
        message: String,
        attempts: u32,
    },
    Failed {
        operation: RepoOperation,
        error: String,
        attempts: u32,
    },
    Cancelled,
}

pub(crate) enum RepoEvent {
    Started { name: String },
    Finished { item: WorkItem, result: WorkResult },
}
