use crate::model::{ProviderKind, RepoOperation, SyncStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedRepo {
    pub name: String,
    pub path: PathBuf,
    pub operation: RepoOperation,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedRepo {
    pub name: String,
    pub path: PathBuf,
    pub operation: RepoOperation,
    pub error: String,
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_attempt: OffsetDateTime,
}

/// Durable progress record for one sync of one (provider, organization).
///
/// Every repository name lives in exactly one of `completed`, `failed` and
/// `pending`; the mutators move names between lists and keep
/// `total_repositories` equal to the sum of the three.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub provider: ProviderKind,
    pub organization: String,
    pub target_path: PathBuf,
    pub strategy: SyncStrategy,
    total_repositories: usize,
    #[serde(default)]
    completed: Vec<CompletedRepo>,
    #[serde(default)]
    failed: Vec<FailedRepo>,
    #[serde(default)]
    pending: Vec<String>,
    pub parallel: usize,
    pub max_retries: u32,
    pub status: CheckpointStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl Checkpoint {
    pub fn new(
        provider: ProviderKind,
        organization: impl Into<String>,
        target_path: impl Into<PathBuf>,
        strategy: SyncStrategy,
        parallel: usize,
        max_retries: u32,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            provider,
            organization: organization.into(),
            target_path: target_path.into(),
            strategy,
            total_repositories: 0,
            completed: Vec::new(),
            failed: Vec::new(),
            pending: Vec::new(),
            parallel,
            max_retries,
            status: CheckpointStatus::InProgress,
            start_time: now,
            last_updated: now,
        }
    }

    pub fn total_repositories(&self) -> usize {
        self.total_repositories
    }

    pub fn completed(&self) -> &[CompletedRepo] {
        &self.completed
    }

    pub fn failed(&self) -> &[FailedRepo] {
        &self.failed
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.iter().any(|repo| repo.name == name)
    }

    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.iter().any(|repo| repo.name == name)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.iter().any(|pending| pending == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.is_pending(name) || self.is_completed(name) || self.is_failed(name)
    }

    /// Replace the work queue. Names already recorded as completed or failed
    /// are moved into `pending`; duplicates are dropped.
    pub fn set_pending<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.clear();
        for name in names {
            let name = name.into();
            self.completed.retain(|repo| repo.name != name);
            self.failed.retain(|repo| repo.name != name);
            if !self.pending.contains(&name) {
                self.pending.push(name);
            }
        }
        self.recount();
    }

    /// Queue a repository that is not yet tracked. Returns `false` when the
    /// name is already present in any list.
    pub fn add_pending(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.pending.push(name);
        self.recount();
        true
    }

    /// Drop a repository from the work queue without recording an outcome.
    pub fn remove_pending(&mut self, name: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| pending != name);
        let removed = self.pending.len() != before;
        if removed {
            self.recount();
        }
        removed
    }

    pub fn add_completed_repository(
        &mut self,
        name: &str,
        path: impl Into<PathBuf>,
        operation: RepoOperation,
        message: impl Into<String>,
    ) {
        self.pending.retain(|pending| pending != name);
        self.failed.retain(|repo| repo.name != name);
        self.completed.retain(|repo| repo.name != name);
        self.completed.push(CompletedRepo {
            name: name.to_string(),
            path: path.into(),
            operation,
            completed_at: OffsetDateTime::now_utc(),
            message: message.into(),
        });
        self.recount();
    }

    /// Record a failure. A repository that already failed is updated in
    /// place and its attempt count grows by `attempts`.
    pub fn add_failed_repository(
        &mut self,
        name: &str,
        path: impl Into<PathBuf>,
        operation: RepoOperation,
        error: impl Into<String>,
        attempts: u32,
    ) {
        let now = OffsetDateTime::now_utc();
        self.pending.retain(|pending| pending != name);
        self.completed.retain(|repo| repo.name != name);
        if let Some(existing) = self.failed.iter_mut().find(|repo| repo.name == name) {
            existing.path = path.into();
            existing.operation = operation;
            existing.error = error.into();
            existing.attempts = existing.attempts.saturating_add(attempts);
            existing.last_attempt = now;
        } else {
            self.failed.push(FailedRepo {
                name: name.to_string(),
                path: path.into(),
                operation,
                error: error.into(),
                attempts,
                last_attempt: now,
            });
        }
        self.recount();
    }

    /// Share of processed (completed or failed) repositories, in percent.
    pub fn progress_percent(&self) -> f64 {
        if self.total_repositories == 0 {
            return 0.0;
        }
        (self.completed.len() + self.failed.len()) as f64 / self.total_repositories as f64 * 100.0
    }

    pub fn mark_in_progress(&mut self) {
        self.status = CheckpointStatus::InProgress;
    }

    pub fn mark_completed(&mut self) {
        self.status = CheckpointStatus::Completed;
    }

    pub fn mark_failed(&mut self) {
        self.status = CheckpointStatus::Failed;
    }

    pub fn mark_cancelled(&mut self) {
        self.status = CheckpointStatus::Cancelled;
    }

    /// Terminal status once the work queue has drained.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() || !self.failed.is_empty() {
            self.mark_failed();
        } else {
            self.mark_completed();
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != CheckpointStatus::InProgress
    }

    pub fn matches_target(&self, target_path: &Path) -> bool {
        self.target_path == target_path
    }

    /// Repair a checkpoint read from disk so every name lives in exactly one
    /// list. Completed beats failed, failed beats pending; the first entry
    /// wins inside a list. Returns `true` when anything changed.
    pub(crate) fn normalize(&mut self) -> bool {
        let before = (
            self.completed.len(),
            self.failed.len(),
            self.pending.len(),
            self.total_repositories,
        );
        let mut seen = HashSet::new();
        self.completed.retain(|repo| seen.insert(repo.name.clone()));
        self.failed.retain(|repo| seen.insert(repo.name.clone()));
        self.pending.retain(|name| seen.insert(name.clone()));
        self.recount();
        before
            != (
                self.completed.len(),
                self.failed.len(),
                self.pending.len(),
                self.total_repositories,
            )
    }

    fn recount(&mut self) {
        self.total_repositories = self.completed.len() + self.failed.len() + self.pending.len();
    }
}
