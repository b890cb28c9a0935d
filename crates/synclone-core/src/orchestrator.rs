use crate::cancel::CancelToken;
use crate::checkpoint_store::CheckpointStore;
use crate::config::MAX_PARALLEL;
use crate::discovery::RepoDiscovery;
use crate::error::SyncError;
use crate::filter::{FilterStage, RepoFilter};
use crate::git_sync::GitExecutor;
use crate::model::DiscoveredRepo;
use crate::orchestrator_resume::prepare_run;
use crate::orchestrator_types::{
    OrchestratorOptions, OutcomeKind, ProgressReporter, RepoOutcome, SyncReport, SyncRequest,
    WorkItem, WorkResult,
};
use crate::orchestrator_workers::{
    CheckpointWriter, WorkerShared, apply_result, operation_for, run_work_items,
};
use crate::paths::repo_path;
use crate::progress::ProgressTracker;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives one sync operation end to end: discovery, filtering, checkpoint
/// setup, the worker pool and the final checkpoint status.
pub struct Orchestrator {
    store: CheckpointStore,
    discovery: Arc<dyn RepoDiscovery>,
    git: Arc<dyn GitExecutor>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        store: CheckpointStore,
        discovery: Arc<dyn RepoDiscovery>,
        git: Arc<dyn GitExecutor>,
    ) -> Self {
        Self {
            store,
            discovery,
            git,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn run(&self, cancel: &CancelToken, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        self.run_with_progress(cancel, request, None)
    }

    /// Like [`Orchestrator::run`], calling `progress` periodically and once
    /// more when the run ends.
    pub fn run_with_progress(
        &self,
        cancel: &CancelToken,
        request: &SyncRequest,
        progress: Option<&ProgressReporter<'_>>,
    ) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let parallel = validate_request(request)?;
        let filter = RepoFilter::compile(&request.filters)
            .map_err(|err| SyncError::validation(format!("{err:#}")))?;
        fs::create_dir_all(&request.target_path).map_err(|err| {
            SyncError::validation(format!(
                "cannot create target directory {}: {err}",
                request.target_path.display()
            ))
        })?;

        let provider = request.provider;
        let org = request.organization.as_str();
        info!(
            provider = %provider,
            org = %org,
            target = %request.target_path.display(),
            strategy = %request.strategy,
            parallel,
            resume = request.resume,
            "starting sync"
        );

        let discovered = self
            .discovery
            .list_repos(provider, org)
            .map_err(SyncError::Discovery)?;
        let discovered = dedup_by_name(discovered);
        let (selected, filter_stats) = filter.apply(discovered);
        for stage in FilterStage::ALL {
            let removed = filter_stats.removed_by(stage);
            if removed > 0 {
                debug!(stage = %stage, removed, "filter stage removed repos");
            }
        }
        info!(
            discovered = filter_stats.input,
            selected = filter_stats.kept,
            "repositories selected"
        );

        let prepared = prepare_run(&self.store, request, &selected, parallel);
        let mut checkpoint = prepared.checkpoint;
        let queue = prepared.queue;

        let tracker = Arc::new(ProgressTracker::new(request.progress_mode));
        tracker.register(checkpoint.completed().iter().map(|repo| repo.name.as_str()));
        tracker.register(checkpoint.failed().iter().map(|repo| repo.name.as_str()));
        tracker.register(checkpoint.pending());

        let queued: HashSet<&str> = queue.iter().map(String::as_str).collect();
        let mut outcomes = Vec::new();
        for repo in checkpoint.completed() {
            tracker.skip_repository(&repo.name, "already synced");
            outcomes.push(RepoOutcome {
                name: repo.name.clone(),
                kind: OutcomeKind::Skipped,
                operation: Some(repo.operation),
                attempts: 0,
                message: "already synced".to_string(),
            });
        }
        for repo in checkpoint.failed() {
            if queued.contains(repo.name.as_str()) {
                continue;
            }
            tracker.set_repository_error(&repo.name, &repo.error);
            outcomes.push(RepoOutcome {
                name: repo.name.clone(),
                kind: OutcomeKind::Skipped,
                operation: Some(repo.operation),
                attempts: repo.attempts,
                message: repo.error.clone(),
            });
        }

        let per_repository = checkpoint.total_repositories() <= self.options.large_set_threshold;
        let mut writer = CheckpointWriter::new(
            &self.store,
            self.options.checkpoint_interval,
            per_repository,
        );
        writer.mark_dirty();
        writer.flush(&mut checkpoint, true);

        let by_name: HashMap<&str, &DiscoveredRepo> = selected
            .iter()
            .map(|repo| (repo.name.as_str(), repo))
            .collect();
        let owners = path_owners(&request.target_path, &selected);
        let mut work_items = Vec::with_capacity(queue.len());
        let mut collided = 0;
        for name in &queue {
            let item = WorkItem {
                repo: by_name
                    .get(name.as_str())
                    .map(|repo| (*repo).clone())
                    .unwrap_or_else(|| DiscoveredRepo::named(name.as_str())),
                path: repo_path(&request.target_path, name),
            };
            match owners.get(&item.path) {
                Some(owner) if *owner != name.as_str() => {
                    let error = format!(
                        "local path {} is already used by repository {owner}",
                        item.path.display()
                    );
                    warn!(
                        repo = %name,
                        owner = %owner,
                        path = %item.path.display(),
                        "repository path collision"
                    );
                    tracker.set_repository_error(name, &error);
                    let result = WorkResult::Failed {
                        operation: operation_for(&item.path, request.strategy),
                        error,
                        attempts: 0,
                    };
                    outcomes.extend(apply_result(&mut checkpoint, &item, result));
                    writer.mark_dirty();
                    collided += 1;
                }
                _ => work_items.push(item),
            }
        }

        let processed = collided
            + if work_items.is_empty() {
                0
            } else {
                let shared = Arc::new(WorkerShared {
                    git: Arc::clone(&self.git),
                    tracker: Arc::clone(&tracker),
                    cancel: cancel.clone(),
                    retry: self.options.retry.clone().with_max_retries(request.max_retries),
                    provider,
                    organization: request.organization.clone(),
                    host: request.host.clone(),
                    strategy: request.strategy,
                });
                run_work_items(
                    shared,
                    work_items,
                    parallel,
                    &mut checkpoint,
                    &mut writer,
                    progress,
                    self.options.render_interval,
                    &mut outcomes,
                )
            };

        if cancel.is_cancelled() && processed < queue.len() {
            let finished: HashSet<String> = outcomes
                .iter()
                .filter(|outcome| outcome.kind != OutcomeKind::Skipped)
                .map(|outcome| outcome.name.clone())
                .collect();
            for name in queue.iter().filter(|name| !finished.contains(*name)) {
                outcomes.push(RepoOutcome {
                    name: name.clone(),
                    kind: OutcomeKind::Cancelled,
                    operation: None,
                    attempts: 0,
                    message: "cancelled".to_string(),
                });
            }
            checkpoint.mark_cancelled();
            warn!(
                provider = %provider,
                org = %org,
                remaining = queue.len() - processed,
                "sync cancelled"
            );
        } else {
            checkpoint.finish();
        }
        writer.mark_dirty();
        writer.flush(&mut checkpoint, true);
        if let Some(progress) = progress {
            progress(&tracker);
        }

        let count = |kind: OutcomeKind| outcomes.iter().filter(|o| o.kind == kind).count();
        let report = SyncReport {
            provider,
            organization: request.organization.clone(),
            status: checkpoint.status,
            resumed: prepared.resumed,
            total: checkpoint.total_repositories(),
            success: count(OutcomeKind::Completed),
            failed: count(OutcomeKind::Failed),
            skipped: count(OutcomeKind::Skipped),
            pending: checkpoint.pending().len(),
            filter_stats,
            peak_active: tracker.peak_active(),
            elapsed: started.elapsed(),
            state_file: self.store.path_for(provider, org),
            outcomes,
        };
        info!(
            provider = %provider,
            org = %org,
            status = %report.status,
            success = report.success,
            failed = report.failed,
            skipped = report.skipped,
            pending = report.pending,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync finished"
        );
        Ok(report)
    }
}

/// Returns the effective parallelism.
fn validate_request(request: &SyncRequest) -> Result<usize, SyncError> {
    if request.organization.trim().is_empty() {
        return Err(SyncError::validation("organization is required"));
    }
    if request.target_path.as_os_str().is_empty() {
        return Err(SyncError::validation("target path is required"));
    }
    if request.parallel == 0 {
        return Err(SyncError::validation("parallel must be at least 1"));
    }
    if request.parallel > MAX_PARALLEL {
        warn!(
            requested = request.parallel,
            limit = MAX_PARALLEL,
            "parallelism capped"
        );
        return Ok(MAX_PARALLEL);
    }
    Ok(request.parallel)
}

/// First repository, in discovery order, to claim each local path.
fn path_owners<'a>(target: &Path, repos: &'a [DiscoveredRepo]) -> HashMap<PathBuf, &'a str> {
    let mut owners = HashMap::new();
    for repo in repos {
        owners
            .entry(repo_path(target, &repo.name))
            .or_insert(repo.name.as_str());
    }
    owners
}

fn dedup_by_name(repos: Vec<DiscoveredRepo>) -> Vec<DiscoveredRepo> {
    let mut seen = HashSet::new();
    repos
        .into_iter()
        .filter(|repo| {
            let fresh = seen.insert(repo.name.clone());
            if !fresh {
                debug!(repo = %repo.name, "duplicate repository from discovery ignored");
            }
            fresh
        })
        .collect()
}
