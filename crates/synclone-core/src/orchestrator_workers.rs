use crate::cancel::CancelToken;
use crate::checkpoint::Checkpoint;
use crate::checkpoint_store::CheckpointStore;
use crate::git_sync::{GitContext, GitExecutor, GitJob, is_cancelled_error, is_permanent_error};
use crate::model::{ProviderKind, RepoOperation, SyncStrategy};
use crate::orchestrator_types::{
    OutcomeKind, ProgressReporter, RepoEvent, RepoOutcome, WorkItem, WorkResult,
};
use crate::progress::{ProgressTracker, RepoStatus};
use crate::retry::RetryPolicy;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const EVENT_POLL: Duration = Duration::from_millis(200);

/// Everything a worker thread needs, shared read-only between workers.
pub(crate) struct WorkerShared {
    pub(crate) git: Arc<dyn GitExecutor>,
    pub(crate) tracker: Arc<ProgressTracker>,
    pub(crate) cancel: CancelToken,
    pub(crate) retry: RetryPolicy,
    pub(crate) provider: ProviderKind,
    pub(crate) organization: String,
    pub(crate) host: Option<String>,
    pub(crate) strategy: SyncStrategy,
}

/// Saves the checkpoint after every repository, or on an interval for
/// large sets. A failed save leaves the checkpoint dirty so the next cycle
/// tries again.
pub(crate) struct CheckpointWriter<'a> {
    store: &'a CheckpointStore,
    interval: Duration,
    per_repository: bool,
    last_save: Instant,
    dirty: bool,
}

impl<'a> CheckpointWriter<'a> {
    pub(crate) fn new(store: &'a CheckpointStore, interval: Duration, per_repository: bool) -> Self {
        Self {
            store,
            interval,
            per_repository,
            last_save: Instant::now(),
            dirty: false,
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn flush(&mut self, checkpoint: &mut Checkpoint, force: bool) -> bool {
        if !self.dirty && !force {
            return true;
        }
        if !force && !self.per_repository && self.last_save.elapsed() < self.interval {
            return true;
        }
        self.last_save = Instant::now();
        match self.store.save(checkpoint) {
            Ok(_) => {
                self.dirty = false;
                true
            }
            Err(err) => {
                self.dirty = true;
                warn!(
                    provider = %checkpoint.provider,
                    org = %checkpoint.organization,
                    error = %err,
                    "checkpoint save failed; will retry"
                );
                false
            }
        }
    }
}

/// Run the queue on `jobs` worker threads. The calling thread is the only
/// writer of `checkpoint`. Returns the number of items that reached a final
/// outcome.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_work_items(
    shared: Arc<WorkerShared>,
    work_items: Vec<WorkItem>,
    jobs: usize,
    checkpoint: &mut Checkpoint,
    writer: &mut CheckpointWriter<'_>,
    progress: Option<&ProgressReporter<'_>>,
    render_interval: Duration,
    outcomes: &mut Vec<RepoOutcome>,
) -> usize {
    let mut work_items = work_items;
    work_items.reverse();
    let jobs = jobs.clamp(1, work_items.len().max(1));
    let queue = Arc::new(Mutex::new(work_items));
    let (tx, rx) = mpsc::channel::<RepoEvent>();

    let mut handles = Vec::with_capacity(jobs);
    for index in 0..jobs {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        let shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("synclone-worker-{index}"))
            .spawn(move || {
                loop {
                    if shared.cancel.is_cancelled() {
                        break;
                    }
                    let next = {
                        let mut guard = queue.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.pop()
                    };
                    let Some(item) = next else {
                        break;
                    };
                    let _ = tx.send(RepoEvent::Started {
                        name: item.repo.name.clone(),
                    });
                    let result = sync_item(&shared, &item);
                    let _ = tx.send(RepoEvent::Finished { item, result });
                }
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(err) => warn!(error = %err, "failed to spawn worker thread"),
        }
    }
    drop(tx);

    let mut processed = 0;
    let mut last_render = Instant::now();
    loop {
        match rx.recv_timeout(EVENT_POLL) {
            Ok(RepoEvent::Started { name }) => {
                debug!(repo = %name, "repo sync started");
            }
            Ok(RepoEvent::Finished { item, result }) => {
                if let Some(outcome) = apply_result(checkpoint, &item, result) {
                    processed += 1;
                    outcomes.push(outcome);
                    writer.mark_dirty();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        writer.flush(checkpoint, false);
        if let Some(progress) = progress
            && last_render.elapsed() >= render_interval
        {
            progress(&shared.tracker);
            last_render = Instant::now();
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("worker thread panicked");
        }
    }
    processed
}

pub(crate) fn apply_result(checkpoint: &mut Checkpoint, item: &WorkItem, result: WorkResult) -> Option<RepoOutcome> {
    let name = item.repo.name.as_str();
    match result {
        WorkResult::Synced {
            operation,
            message,
            attempts,
        } => {
            checkpoint.add_completed_repository(name, &item.path, operation, message.clone());
            Some(RepoOutcome {
                name: name.to_string(),
                kind: OutcomeKind::Completed,
                operation: Some(operation),
                attempts,
                message,
            })
        }
        WorkResult::Failed {
            operation,
            error,
            attempts,
        } => {
            checkpoint.add_failed_repository(name, &item.path, operation, error.clone(), attempts);
            Some(RepoOutcome {
                name: name.to_string(),
                kind: OutcomeKind::Failed,
                operation: Some(operation),
                attempts,
                message: error,
            })
        }
        WorkResult::Cancelled => None,
    }
}

/// Operation for a repository: clone when nothing is on disk yet, otherwise
/// whatever the strategy asks for.
pub(crate) fn operation_for(path: &Path, strategy: SyncStrategy) -> RepoOperation {
    if path.exists() {
        strategy.operation()
    } else {
        RepoOperation::Clone
    }
}

fn sync_item(shared: &WorkerShared, item: &WorkItem) -> WorkResult {
    let name = item.repo.name.as_str();
    let tracker = &shared.tracker;
    tracker.update_repository(name, RepoStatus::Started, "starting", Some(0.0));

    let report = |fraction: f64| tracker.set_fraction(name, fraction);
    let ctx = GitContext::new(&shared.cancel).with_progress(&report);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let operation = operation_for(&item.path, shared.strategy);
        tracker.update_repository(
            name,
            RepoStatus::for_operation(operation),
            operation.as_str(),
            Some(0.0),
        );

        let job = match job_for(shared, item, operation) {
            Ok(job) => job,
            Err(err) => {
                let error = format!("{err:#}");
                tracker.set_repository_error(name, &error);
                warn!(repo = %name, error = %error, "repo cannot be synced");
                return WorkResult::Failed {
                    operation,
                    error,
                    attempts: attempt,
                };
            }
        };
        let err = match shared.git.run(operation, &job, &ctx) {
            Ok(message) => {
                tracker.complete_repository(name, &message);
                info!(repo = %name, operation = %operation, attempts = attempt, "repo synced");
                return WorkResult::Synced {
                    operation,
                    message,
                    attempts: attempt,
                };
            }
            Err(err) => err,
        };
        if is_cancelled_error(&err) || shared.cancel.is_cancelled() {
            tracker.update_repository(name, RepoStatus::Pending, "cancelled", Some(0.0));
            return WorkResult::Cancelled;
        }

        let error = format!("{err:#}");
        let retryable = !is_permanent_error(&error);
        let decision = shared.retry.decide_operation(attempt, retryable);
        if !decision.retry {
            tracker.set_repository_error(name, &error);
            warn!(
                repo = %name,
                operation = %operation,
                attempts = attempt,
                permanent = !retryable,
                error = %error,
                "repo sync failed"
            );
            return WorkResult::Failed {
                operation,
                error,
                attempts: attempt,
            };
        }
        warn!(
            repo = %name,
            attempt,
            delay_ms = decision.delay.as_millis() as u64,
            error = %error,
            "repo sync attempt failed; retrying"
        );
        if shared.cancel.sleep(decision.delay) {
            tracker.update_repository(name, RepoStatus::Pending, "cancelled", Some(0.0));
            return WorkResult::Cancelled;
        }
    }
}

fn job_for(shared: &WorkerShared, item: &WorkItem, operation: RepoOperation) -> anyhow::Result<GitJob> {
    // Only a clone needs the remote url; existing checkouts carry it.
    let url = if operation == RepoOperation::Clone {
        item.repo
            .resolve_clone_url(shared.provider, shared.host.as_deref(), &shared.organization)?
    } else {
        item.repo.clone_url.clone().unwrap_or_default()
    };
    Ok(GitJob {
        url,
        path: item.path.clone(),
        branch: item.repo.default_branch.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn checkpoint() -> Checkpoint {
        let mut cp = Checkpoint::new(
            ProviderKind::GitHub,
            "acme",
            "/srv/acme",
            SyncStrategy::Reset,
            2,
            3,
        );
        cp.set_pending(["a", "b"]);
        cp
    }

    #[test]
    fn failed_save_stays_dirty_until_it_succeeds() {
        let tmp = TempDir::new().unwrap();
        let state_dir = tmp.path().join("state");
        fs::write(&state_dir, "not a directory").unwrap();
        let store = CheckpointStore::new(&state_dir);
        let mut writer = CheckpointWriter::new(&store, Duration::from_secs(3600), true);
        let mut cp = checkpoint();

        writer.mark_dirty();
        assert!(!writer.flush(&mut cp, false));
        assert!(writer.dirty);

        fs::remove_file(&state_dir).unwrap();
        assert!(writer.flush(&mut cp, false));
        assert!(!writer.dirty);
        assert!(store.has(ProviderKind::GitHub, "acme"));
    }

    #[test]
    fn interval_mode_defers_until_due() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let mut writer = CheckpointWriter::new(&store, Duration::from_secs(3600), false);
        let mut cp = checkpoint();

        writer.mark_dirty();
        assert!(writer.flush(&mut cp, false));
        assert!(writer.dirty);
        assert!(!store.has(ProviderKind::GitHub, "acme"));

        writer.last_save = Instant::now() - Duration::from_secs(3601);
        assert!(writer.flush(&mut cp, false));
        assert!(!writer.dirty);
        assert!(store.has(ProviderKind::GitHub, "acme"));
    }

    #[test]
    fn forced_flush_always_writes() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let mut writer = CheckpointWriter::new(&store, Duration::from_secs(3600), false);
        let mut cp = checkpoint();

        assert!(writer.flush(&mut cp, true));
        assert!(store.has(ProviderKind::GitHub, "acme"));

        cp.add_completed_repository("a", "/srv/acme/a", RepoOperation::Clone, "cloned");
        writer.mark_dirty();
        assert!(writer.flush(&mut cp, true));
        let loaded = store.load(ProviderKind::GitHub, "acme").unwrap();
        assert!(loaded.is_completed("a"));
    }
}
