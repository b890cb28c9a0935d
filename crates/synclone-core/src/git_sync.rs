use crate::cancel::CancelToken;
use crate::model::RepoOperation;
use anyhow::Context;
use git2::{
    Cred, ErrorClass, ErrorCode, FetchOptions, Oid, RemoteCallbacks, Repository, ResetType,
    Signature,
    build::{CheckoutBuilder, RepoBuilder},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PERMANENT_ERROR_MARKERS: [&str; 5] = [
    "repository not found",
    "access denied",
    "authentication failed",
    "permission denied",
    "repository does not exist",
];

/// Raised when a transfer was aborted by the cancellation token.
#[derive(Debug, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Failures that will not go away by retrying.
pub fn is_permanent_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    PERMANENT_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

pub fn is_cancelled_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitJob {
    pub url: String,
    pub path: PathBuf,
    pub branch: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct GitAuth {
    pub username: String,
    pub token: String,
}

/// Per-call cancellation and transfer-progress plumbing.
pub struct GitContext<'a> {
    cancel: &'a CancelToken,
    progress: Option<&'a (dyn Fn(f64) + Sync)>,
}

impl<'a> GitContext<'a> {
    pub fn new(cancel: &'a CancelToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a (dyn Fn(f64) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report(&self, fraction: f64) {
        if let Some(progress) = self.progress {
            progress(fraction);
        }
    }
}

/// The git operations a sync run needs. Each returns a short human-readable
/// outcome message.
pub trait GitExecutor: Send + Sync {
    fn clone_repo(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String>;
    fn reset(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String>;
    fn pull(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String>;
    fn fetch(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String>;

    fn run(
        &self,
        operation: RepoOperation,
        job: &GitJob,
        ctx: &GitContext<'_>,
    ) -> anyhow::Result<String> {
        if ctx.is_cancelled() {
            return Err(Cancelled.into());
        }
        match operation {
            RepoOperation::Clone => self.clone_repo(job, ctx),
            RepoOperation::Reset => self.reset(job, ctx),
            RepoOperation::Pull => self.pull(job, ctx),
            RepoOperation::Fetch => self.fetch(job, ctx),
        }
    }
}

/// [`GitExecutor`] backed by libgit2.
#[derive(Clone, Debug, Default)]
pub struct Git2Executor {
    auth: Option<GitAuth>,
}

impl Git2Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(mut self, auth: Option<GitAuth>) -> Self {
        self.auth = auth;
        self
    }

    fn fetch_origin(&self, repo: &Repository, ctx: &GitContext<'_>) -> anyhow::Result<()> {
        let mut remote = repo.find_remote("origin").context("find origin remote")?;
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(remote_callbacks(self.auth.as_ref(), ctx));
        remote
            .fetch(&[] as &[&str], Some(&mut fo), None)
            .map_err(|err| describe_git_error(err, ctx))
            .context("fetch origin")?;
        Ok(())
    }
}

impl GitExecutor for Git2Executor {
    fn clone_repo(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String> {
        let existed = job.path.exists();
        if let Some(parent) = job.path.parent() {
            fs::create_dir_all(parent).context("create target directory")?;
        }
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(remote_callbacks(self.auth.as_ref(), ctx));
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);
        if let Some(branch) = job.branch.as_deref() {
            builder.branch(branch);
        }
        info!(path = %job.path.display(), "cloning repo");
        match builder.clone(&job.url, &job.path) {
            Ok(_) => {
                ctx.report(1.0);
                Ok("cloned".to_string())
            }
            Err(err) => {
                let err = describe_git_error(err, ctx);
                if !existed {
                    remove_partial_clone(&job.path);
                }
                Err(err.context("clone repo"))
            }
        }
    }

    fn reset(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String> {
        let repo = Repository::open(&job.path).context("open repo")?;
        self.fetch_origin(&repo, ctx)?;
        let (target_ref, target) = reset_target(&repo, job.branch.as_deref())?;
        let object = repo.find_object(target, None).context("find reset target")?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.reset(&object, ResetType::Hard, Some(&mut checkout))
            .context("hard reset")?;
        debug!(path = %job.path.display(), target = %target_ref, "hard reset to upstream");
        Ok(format!("reset to {target_ref}"))
    }

    fn pull(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String> {
        let repo = Repository::open(&job.path).context("open repo")?;
        self.fetch_origin(&repo, ctx)?;

        let head = repo.head().context("resolve head")?;
        if !head.is_branch() {
            anyhow::bail!("head is detached; nothing to pull into");
        }
        let branch = head.shorthand().unwrap_or_default().to_string();
        let local_ref = head.name().unwrap_or_default().to_string();
        let local_oid = head.target().context("head has no target")?;
        let upstream = upstream_ref(&repo, &branch)?;
        let remote_oid = repo
            .refname_to_id(&upstream)
            .with_context(|| format!("resolve upstream {upstream}"))?;

        let annotated = repo
            .find_annotated_commit(remote_oid)
            .context("load upstream commit")?;
        let (analysis, _) = repo.merge_analysis(&[&annotated]).context("merge analysis")?;
        if analysis.is_up_to_date() {
            return Ok("up to date".to_string());
        }
        if analysis.is_fast_forward() {
            fast_forward(&repo, &local_ref, remote_oid)?;
            return Ok("fast-forwarded".to_string());
        }
        merge_upstream(&repo, &branch, &upstream, local_oid, remote_oid)?;
        Ok(format!("merged {upstream}"))
    }

    fn fetch(&self, job: &GitJob, ctx: &GitContext<'_>) -> anyhow::Result<String> {
        let repo = Repository::open(&job.path).context("open repo")?;
        self.fetch_origin(&repo, ctx)?;
        Ok("fetched".to_string())
    }
}

fn remote_callbacks<'a>(auth: Option<&'a GitAuth>, ctx: &'a GitContext<'a>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, _allowed| {
        if let Some(auth) = auth {
            let username = if auth.username.is_empty() {
                username_from_url.unwrap_or("git")
            } else {
                auth.username.as_str()
            };
            Cred::userpass_plaintext(username, &auth.token)
        } else {
            Cred::default()
        }
    });
    callbacks.transfer_progress(move |stats| {
        if ctx.is_cancelled() {
            return false;
        }
        if stats.total_objects() > 0 {
            ctx.report(stats.received_objects() as f64 / stats.total_objects() as f64);
        }
        true
    });
    callbacks
}

/// Turn libgit2 errors into messages that the permanent-error check
/// understands.
fn describe_git_error(err: git2::Error, ctx: &GitContext<'_>) -> anyhow::Error {
    if err.code() == ErrorCode::User && ctx.is_cancelled() {
        return Cancelled.into();
    }
    if err.code() == ErrorCode::Auth {
        return anyhow::Error::new(err).context("authentication failed");
    }
    let message = err.message().to_ascii_lowercase();
    if err.class() == ErrorClass::Http {
        if message.contains("401") {
            return anyhow::Error::new(err).context("authentication failed");
        }
        if message.contains("403") {
            return anyhow::Error::new(err).context("access denied");
        }
        if message.contains("404") {
            return anyhow::Error::new(err).context("repository not found");
        }
    }
    anyhow::Error::new(err)
}

fn remove_partial_clone(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_dir_all(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial clone"),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove partial clone"),
    }
}

fn reset_target(repo: &Repository, branch: Option<&str>) -> anyhow::Result<(String, Oid)> {
    let mut candidates = Vec::new();
    if let Some(branch) = branch {
        candidates.push(format!("refs/remotes/origin/{branch}"));
    }
    if let Ok(head) = repo.head()
        && head.is_branch()
        && let Some(name) = head.shorthand()
    {
        candidates.push(upstream_ref(repo, name)?);
    }
    candidates.push("refs/remotes/origin/HEAD".to_string());
    for candidate in candidates {
        if let Ok(oid) = repo.refname_to_id(&candidate) {
            return Ok((candidate, oid));
        }
    }
    anyhow::bail!("no upstream ref to reset to")
}

fn upstream_ref(repo: &Repository, branch: &str) -> anyhow::Result<String> {
    let config = repo.config().context("open repo config")?;
    let remote = config.get_string(&format!("branch.{branch}.remote")).ok();
    let merge = config.get_string(&format!("branch.{branch}.merge")).ok();
    match (remote, merge) {
        (Some(remote), Some(merge)) if remote == "." => Ok(merge),
        (Some(remote), Some(merge)) => {
            let merged = merge.strip_prefix("refs/heads/").unwrap_or(merge.as_str());
            Ok(format!("refs/remotes/{remote}/{merged}"))
        }
        _ => Ok(format!("refs/remotes/origin/{branch}")),
    }
}

fn fast_forward(repo: &Repository, local_ref: &str, target: Oid) -> anyhow::Result<()> {
    let commit = repo.find_commit(target).context("find upstream commit")?;
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(commit.as_object(), Some(&mut checkout))
        .context("checkout upstream tree")?;
    let mut reference = repo
        .find_reference(local_ref)
        .with_context(|| format!("find local ref {local_ref}"))?;
    reference
        .set_target(target, "fast-forward")
        .context("set local ref target")?;
    Ok(())
}

fn merge_upstream(
    repo: &Repository,
    branch: &str,
    upstream: &str,
    local_oid: Oid,
    remote_oid: Oid,
) -> anyhow::Result<()> {
    let local = repo.find_commit(local_oid).context("find local commit")?;
    let remote = repo.find_commit(remote_oid).context("find upstream commit")?;
    let mut index = repo
        .merge_commits(&local, &remote, None)
        .context("merge commits")?;
    if index.has_conflicts() {
        anyhow::bail!("merge conflict between {branch} and {upstream}; local commits kept");
    }
    let tree_id = index.write_tree_to(repo).context("write merge tree")?;
    let tree = repo.find_tree(tree_id).context("find merge tree")?;

    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(tree.as_object(), Some(&mut checkout))
        .context("checkout merge tree")?;

    let signature = repo
        .signature()
        .or_else(|_| Signature::now("synclone", "synclone@localhost"))
        .context("build merge signature")?;
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &format!("Merge {upstream} into {branch}"),
        &tree,
        &[&local, &remote],
    )
    .context("commit merge")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Commit;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        remote: Repository,
        remote_path: PathBuf,
        local_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let remote_path = tmp.path().join("remote");
            let remote = Repository::init(&remote_path).unwrap();
            commit_file(&remote, "readme.md", "hello", None);
            let local_path = tmp.path().join("work").join("repo");
            Self {
                _tmp: tmp,
                remote,
                remote_path,
                local_path,
            }
        }

        fn job(&self) -> GitJob {
            GitJob {
                url: self.remote_path.to_string_lossy().into_owned(),
                path: self.local_path.clone(),
                branch: None,
            }
        }

        fn clone_local(&self) -> Repository {
            let cancel = CancelToken::new();
            let ctx = GitContext::new(&cancel);
            Git2Executor::new().clone_repo(&self.job(), &ctx).unwrap();
            Repository::open(&self.local_path).unwrap()
        }
    }

    fn commit_file(repo: &Repository, name: &str, contents: &str, message: Option<&str>) -> Oid {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join(name), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            message.unwrap_or("commit"),
            &tree,
            &parents,
        )
        .unwrap()
    }

    #[test]
    fn clone_creates_checkout() {
        let fixture = Fixture::new();
        let repo = fixture.clone_local();
        assert!(fixture.local_path.join("readme.md").is_file());
        assert!(repo.find_remote("origin").is_ok());
    }

    #[test]
    fn pull_fast_forwards_to_new_commit() {
        let fixture = Fixture::new();
        fixture.clone_local();
        let new_head = commit_file(&fixture.remote, "change.txt", "v2", None);

        let cancel = CancelToken::new();
        let message = Git2Executor::new()
            .pull(&fixture.job(), &GitContext::new(&cancel))
            .unwrap();
        assert_eq!(message, "fast-forwarded");
        let repo = Repository::open(&fixture.local_path).unwrap();
        assert_eq!(repo.head().unwrap().target(), Some(new_head));
        assert!(fixture.local_path.join("change.txt").is_file());
    }

    #[test]
    fn pull_merges_and_keeps_local_commits() {
        let fixture = Fixture::new();
        let local = fixture.clone_local();
        let local_commit = commit_file(&local, "local.txt", "mine", None);
        let remote_commit = commit_file(&fixture.remote, "remote.txt", "theirs", None);

        let cancel = CancelToken::new();
        let message = Git2Executor::new()
            .pull(&fixture.job(), &GitContext::new(&cancel))
            .unwrap();
        assert!(message.starts_with("merged"), "{message}");

        let head = local.head().unwrap().peel_to_commit().unwrap();
        let parents: Vec<Oid> = head.parent_ids().collect();
        assert_eq!(parents, vec![local_commit, remote_commit]);
        assert!(fixture.local_path.join("local.txt").is_file());
        assert!(fixture.local_path.join("remote.txt").is_file());
    }

    #[test]
    fn pull_reports_up_to_date() {
        let fixture = Fixture::new();
        fixture.clone_local();
        let cancel = CancelToken::new();
        let message = Git2Executor::new()
            .pull(&fixture.job(), &GitContext::new(&cancel))
            .unwrap();
        assert_eq!(message, "up to date");
    }

    #[test]
    fn reset_discards_local_changes() {
        let fixture = Fixture::new();
        let local = fixture.clone_local();
        commit_file(&local, "local.txt", "mine", None);
        fs::write(fixture.local_path.join("readme.md"), "scribbled").unwrap();
        fs::write(fixture.local_path.join("stray.tmp"), "junk").unwrap();
        let remote_head = commit_file(&fixture.remote, "remote.txt", "theirs", None);

        let cancel = CancelToken::new();
        Git2Executor::new()
            .reset(&fixture.job(), &GitContext::new(&cancel))
            .unwrap();

        assert_eq!(local.head().unwrap().target(), Some(remote_head));
        assert_eq!(
            fs::read_to_string(fixture.local_path.join("readme.md")).unwrap(),
            "hello"
        );
        assert!(!fixture.local_path.join("local.txt").exists());
        assert!(!fixture.local_path.join("stray.tmp").exists());
        assert!(fixture.local_path.join("remote.txt").is_file());
    }

    #[test]
    fn fetch_updates_tracking_refs_only() {
        let fixture = Fixture::new();
        let local = fixture.clone_local();
        let before = local.head().unwrap().target();
        let remote_head = commit_file(&fixture.remote, "remote.txt", "theirs", None);

        let cancel = CancelToken::new();
        Git2Executor::new()
            .fetch(&fixture.job(), &GitContext::new(&cancel))
            .unwrap();

        let branch = local.head().unwrap().shorthand().unwrap().to_string();
        let tracking = local
            .refname_to_id(&format!("refs/remotes/origin/{branch}"))
            .unwrap();
        assert_eq!(tracking, remote_head);
        assert_eq!(local.head().unwrap().target(), before);
        assert!(!fixture.local_path.join("remote.txt").exists());
    }

    #[test]
    fn failed_clone_removes_partial_directory() {
        let tmp = TempDir::new().unwrap();
        let job = GitJob {
            url: tmp.path().join("missing").to_string_lossy().into_owned(),
            path: tmp.path().join("out"),
            branch: None,
        };
        let cancel = CancelToken::new();
        let result = Git2Executor::new().clone_repo(&job, &GitContext::new(&cancel));
        assert!(result.is_err());
        assert!(!job.path.exists());
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let fixture = Fixture::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Git2Executor::new()
            .run(RepoOperation::Clone, &fixture.job(), &GitContext::new(&cancel))
            .unwrap_err();
        assert!(is_cancelled_error(&err));
        assert!(!fixture.local_path.exists());
    }

    #[test]
    fn permanent_errors_are_recognized() {
        assert!(is_permanent_error("clone repo: Repository not found"));
        assert!(is_permanent_error("authentication failed: remote said 401"));
        assert!(is_permanent_error("Permission denied (publickey)"));
        assert!(!is_permanent_error("connection reset by peer"));
        assert!(!is_permanent_error("operation timed out"));
    }
}
