use crate::checkpoint::Checkpoint;
use crate::checkpoint_store::CheckpointStore;
use crate::git_sync::is_permanent_error;
use crate::model::DiscoveredRepo;
use crate::orchestrator_types::SyncRequest;
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub(crate) struct PreparedRun {
    pub(crate) checkpoint: Checkpoint,
    /// Names to process this run, in dispatch order.
    pub(crate) queue: Vec<String>,
    pub(crate) resumed: bool,
}

/// Load or create the checkpoint for `request` and work out what to run.
pub(crate) fn prepare_run(
    store: &CheckpointStore,
    request: &SyncRequest,
    selected: &[DiscoveredRepo],
    parallel: usize,
) -> PreparedRun {
    let provider = request.provider;
    let org = request.organization.as_str();
    if request.resume {
        match store.load(provider, org) {
            Ok(checkpoint) => return resume_run(checkpoint, request, selected, parallel),
            Err(err) if err.is_not_found() => {
                info!(provider = %provider, org = %org, "no checkpoint to resume; starting fresh");
            }
            Err(err) => {
                warn!(
                    provider = %provider,
                    org = %org,
                    error = %err,
                    "checkpoint unreadable; starting fresh"
                );
            }
        }
    } else if store.has(provider, org) {
        warn!(provider = %provider, org = %org, "replacing existing checkpoint");
    }
    fresh_run(request, selected, parallel)
}

fn fresh_run(request: &SyncRequest, selected: &[DiscoveredRepo], parallel: usize) -> PreparedRun {
    let mut checkpoint = Checkpoint::new(
        request.provider,
        request.organization.clone(),
        request.target_path.clone(),
        request.strategy,
        parallel,
        request.max_retries,
    );
    checkpoint.set_pending(selected.iter().map(|repo| repo.name.clone()));
    let queue = checkpoint.pending().to_vec();
    PreparedRun {
        checkpoint,
        queue,
        resumed: false,
    }
}

fn resume_run(
    mut checkpoint: Checkpoint,
    request: &SyncRequest,
    selected: &[DiscoveredRepo],
    parallel: usize,
) -> PreparedRun {
    reconcile_metadata(&mut checkpoint, request, parallel);
    checkpoint.mark_in_progress();

    let wanted: HashSet<&str> = selected.iter().map(|repo| repo.name.as_str()).collect();
    let dropped: Vec<String> = checkpoint
        .pending()
        .iter()
        .filter(|name| !wanted.contains(name.as_str()))
        .cloned()
        .collect();
    for name in &dropped {
        checkpoint.remove_pending(name);
        debug!(repo = %name, "dropped from queue; no longer selected");
    }

    let mut added = 0;
    for repo in selected {
        if checkpoint.add_pending(repo.name.clone()) {
            added += 1;
        }
    }

    let mut queue = checkpoint.pending().to_vec();
    let mut requeued = 0;
    if request.retry_failed {
        for failed in checkpoint.failed() {
            if !wanted.contains(failed.name.as_str()) {
                continue;
            }
            if is_permanent_error(&failed.error) {
                debug!(repo = %failed.name, error = %failed.error, "permanent failure; not retried");
                continue;
            }
            queue.push(failed.name.clone());
            requeued += 1;
        }
    }

    info!(
        provider = %checkpoint.provider,
        org = %checkpoint.organization,
        completed = checkpoint.completed().len(),
        pending = checkpoint.pending().len(),
        requeued,
        added,
        dropped = dropped.len(),
        "resuming checkpoint"
    );
    PreparedRun {
        checkpoint,
        queue,
        resumed: true,
    }
}

fn reconcile_metadata(checkpoint: &mut Checkpoint, request: &SyncRequest, parallel: usize) {
    if checkpoint.strategy != request.strategy {
        warn!(
            recorded = %checkpoint.strategy,
            requested = %request.strategy,
            "resume strategy differs from checkpoint"
        );
        checkpoint.strategy = request.strategy;
    }
    if !checkpoint.matches_target(&request.target_path) {
        warn!(
            recorded = %checkpoint.target_path.display(),
            requested = %request.target_path.display(),
            "resume target path differs from checkpoint"
        );
        checkpoint.target_path = request.target_path.clone();
    }
    if checkpoint.parallel != parallel {
        warn!(
            recorded = checkpoint.parallel,
            requested = parallel,
            "resume parallelism differs from checkpoint"
        );
        checkpoint.parallel = parallel;
    }
    if checkpoint.max_retries != request.max_retries {
        warn!(
            recorded = checkpoint.max_retries,
            requested = request.max_retries,
            "resume max retries differs from checkpoint"
        );
        checkpoint.max_retries = request.max_retries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderKind, RepoOperation, SyncStrategy};
    use tempfile::TempDir;

    fn repos(names: &[&str]) -> Vec<DiscoveredRepo> {
        names.iter().map(|name| DiscoveredRepo::named(*name)).collect()
    }

    #[test]
    fn fresh_run_queues_everything() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let request = SyncRequest::new(ProviderKind::GitHub, "acme", tmp.path().join("out"));
        let prepared = prepare_run(&store, &request, &repos(&["a", "b"]), 4);
        assert!(!prepared.resumed);
        assert_eq!(prepared.queue, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(prepared.checkpoint.total_repositories(), 2);
        assert_eq!(prepared.checkpoint.parallel, 4);
    }

    #[test]
    fn resume_reconciles_selection_and_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state"));
        let target = tmp.path().join("out");
        let mut checkpoint = Checkpoint::new(
            ProviderKind::GitHub,
            "acme",
            &target,
            SyncStrategy::Pull,
            2,
            3,
        );
        checkpoint.set_pending(["done", "flaky", "denied", "old", "keep"]);
        checkpoint.add_completed_repository("done", target.join("done"), RepoOperation::Clone, "");
        checkpoint.add_failed_repository("flaky", target.join("flaky"), RepoOperation::Clone, "connection reset", 2);
        checkpoint.add_failed_repository("denied", target.join("denied"), RepoOperation::Clone, "access denied", 1);
        checkpoint.mark_cancelled();
        store.save(&mut checkpoint).unwrap();

        let mut request = SyncRequest::new(ProviderKind::GitHub, "acme", &target);
        request.resume = true;
        request.strategy = SyncStrategy::Reset;
        let selected = repos(&["done", "flaky", "denied", "keep", "new"]);
        let prepared = prepare_run(&store, &request, &selected, 5);

        assert!(prepared.resumed);
        assert_eq!(
            prepared.queue,
            vec!["keep".to_string(), "new".to_string(), "flaky".to_string()]
        );
        let cp = &prepared.checkpoint;
        assert!(!cp.contains("old"));
        assert_eq!(cp.total_repositories(), 5);
        assert_eq!(cp.strategy, SyncStrategy::Reset);
        assert_eq!(cp.parallel, 5);
        assert!(!cp.is_terminal());
    }

    #[test]
    fn resume_without_retry_failed_leaves_failures() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let mut checkpoint = Checkpoint::new(
            ProviderKind::Gitea,
            "team",
            tmp.path(),
            SyncStrategy::Reset,
            1,
            3,
        );
        checkpoint.set_pending(["a", "b"]);
        checkpoint.add_failed_repository("a", tmp.path().join("a"), RepoOperation::Pull, "timed out", 1);
        store.save(&mut checkpoint).unwrap();

        let mut request = SyncRequest::new(ProviderKind::Gitea, "team", tmp.path());
        request.resume = true;
        request.retry_failed = false;
        request.parallel = 1;
        let prepared = prepare_run(&store, &request, &repos(&["a", "b"]), 1);
        assert_eq!(prepared.queue, vec!["b".to_string()]);
    }

    #[test]
    fn corrupt_checkpoint_falls_back_to_fresh() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        std::fs::write(store.path_for(ProviderKind::GitHub, "acme"), "{{{").unwrap();
        let mut request = SyncRequest::new(ProviderKind::GitHub, "acme", tmp.path());
        request.resume = true;
        let prepared = prepare_run(&store, &request, &repos(&["a"]), 2);
        assert!(!prepared.resumed);
        assert_eq!(prepared.queue, vec!["a".to_string()]);
    }
}
