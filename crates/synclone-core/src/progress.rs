use crate::model::RepoOperation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

const BAR_WIDTH: usize = 30;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RepoStatus {
    Pending,
    Started,
    Cloning,
    Pulling,
    Fetching,
    Resetting,
    Completed,
    Failed,
    Skipped,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::Started => "started",
            RepoStatus::Cloning => "cloning",
            RepoStatus::Pulling => "pulling",
            RepoStatus::Fetching => "fetching",
            RepoStatus::Resetting => "resetting",
            RepoStatus::Completed => "completed",
            RepoStatus::Failed => "failed",
            RepoStatus::Skipped => "skipped",
        }
    }

    pub fn for_operation(operation: RepoOperation) -> Self {
        match operation {
            RepoOperation::Clone => RepoStatus::Cloning,
            RepoOperation::Reset => RepoStatus::Resetting,
            RepoOperation::Pull => RepoStatus::Pulling,
            RepoOperation::Fetch => RepoStatus::Fetching,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RepoStatus::Completed | RepoStatus::Failed | RepoStatus::Skipped
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RepoStatus::Started
                | RepoStatus::Cloning
                | RepoStatus::Pulling
                | RepoStatus::Fetching
                | RepoStatus::Resetting
        )
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Compact,
    Detailed,
    Quiet,
}

impl FromStr for DisplayMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(DisplayMode::Compact),
            "detailed" => Ok(DisplayMode::Detailed),
            "quiet" => Ok(DisplayMode::Quiet),
            other => anyhow::bail!("unknown progress mode '{other}'"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RepositoryProgress {
    pub name: String,
    pub status: RepoStatus,
    pub start_time: Instant,
    pub updated_time: Instant,
    pub message: String,
    pub error: Option<String>,
    /// Fraction of the current operation that is done, in `[0, 1]`.
    pub progress: f64,
}

impl RepositoryProgress {
    fn new(name: &str, now: Instant) -> Self {
        Self {
            name: name.to_string(),
            status: RepoStatus::Pending,
            start_time: now,
            updated_time: now,
            message: String::new(),
            error: None,
            progress: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OverallProgress {
    pub total: usize,
    /// Completed plus skipped.
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Everything not yet terminal, including in-flight repositories.
    pub pending: usize,
    pub active: usize,
    pub percent: f64,
}

#[derive(Default)]
struct TrackerState {
    repos: BTreeMap<String, RepositoryProgress>,
    peak_active: usize,
}

impl TrackerState {
    fn active(&self) -> usize {
        self.repos
            .values()
            .filter(|repo| repo.status.is_active())
            .count()
    }

    fn note_active(&mut self) {
        let active = self.active();
        if active > self.peak_active {
            self.peak_active = active;
        }
    }
}

/// Live per-repository status for one sync run. Safe to share between
/// worker threads; all methods take `&self`.
pub struct ProgressTracker {
    mode: DisplayMode,
    started: Instant,
    state: RwLock<TrackerState>,
}

impl ProgressTracker {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            started: Instant::now(),
            state: RwLock::new(TrackerState::default()),
        }
    }

    pub fn with_repositories<I, S>(mode: DisplayMode, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tracker = Self::new(mode);
        tracker.register(names);
        tracker
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Track repositories as pending. Known names are left untouched.
    pub fn register<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Instant::now();
        let mut state = self.write();
        for name in names {
            let name = name.as_ref();
            state
                .repos
                .entry(name.to_string())
                .or_insert_with(|| RepositoryProgress::new(name, now));
        }
    }

    /// Move a repository to `status`. Returns `false` when the repository is
    /// already terminal, in which case nothing changes.
    pub fn update_repository(
        &self,
        name: &str,
        status: RepoStatus,
        message: &str,
        progress: Option<f64>,
    ) -> bool {
        let now = Instant::now();
        let mut state = self.write();
        let repo = state
            .repos
            .entry(name.to_string())
            .or_insert_with(|| RepositoryProgress::new(name, now));
        if repo.status.is_terminal() {
            return false;
        }
        if status == RepoStatus::Started || (repo.status == RepoStatus::Pending && status.is_active()) {
            repo.start_time = now;
        }
        repo.status = status;
        repo.updated_time = now;
        if !message.is_empty() {
            repo.message = message.to_string();
        }
        if let Some(progress) = progress {
            repo.progress = progress.clamp(0.0, 1.0);
        }
        if matches!(status, RepoStatus::Completed | RepoStatus::Skipped) {
            repo.progress = 1.0;
        }
        state.note_active();
        true
    }

    /// Record fractional progress for an in-flight repository without
    /// changing its status.
    pub fn set_fraction(&self, name: &str, progress: f64) {
        let mut state = self.write();
        if let Some(repo) = state.repos.get_mut(name)
            && !repo.status.is_terminal()
        {
            repo.progress = progress.clamp(0.0, 1.0);
            repo.updated_time = Instant::now();
        }
    }

    pub fn set_repository_error(&self, name: &str, error: &str) -> bool {
        let now = Instant::now();
        let mut state = self.write();
        let repo = state
            .repos
            .entry(name.to_string())
            .or_insert_with(|| RepositoryProgress::new(name, now));
        if repo.status.is_terminal() {
            return false;
        }
        repo.status = RepoStatus::Failed;
        repo.error = Some(error.to_string());
        repo.updated_time = now;
        true
    }

    pub fn complete_repository(&self, name: &str, message: &str) -> bool {
        self.update_repository(name, RepoStatus::Completed, message, Some(1.0))
    }

    pub fn skip_repository(&self, name: &str, reason: &str) -> bool {
        self.update_repository(name, RepoStatus::Skipped, reason, Some(1.0))
    }

    pub fn status_of(&self, name: &str) -> Option<RepoStatus> {
        self.read().repos.get(name).map(|repo| repo.status)
    }

    pub fn repository(&self, name: &str) -> Option<RepositoryProgress> {
        self.read().repos.get(name).cloned()
    }

    /// Counts plus a percentage in which in-flight repositories contribute
    /// their fractional progress. Failed repositories count as processed.
    pub fn overall_progress(&self) -> OverallProgress {
        let state = self.read();
        let mut overall = OverallProgress {
            total: state.repos.len(),
            ..OverallProgress::default()
        };
        let mut done = 0.0;
        for repo in state.repos.values() {
            match repo.status {
                RepoStatus::Completed => {
                    overall.completed += 1;
                    done += 1.0;
                }
                RepoStatus::Skipped => {
                    overall.completed += 1;
                    overall.skipped += 1;
                    done += 1.0;
                }
                RepoStatus::Failed => {
                    overall.failed += 1;
                    done += 1.0;
                }
                status => {
                    overall.pending += 1;
                    if status.is_active() {
                        overall.active += 1;
                        done += repo.progress;
                    }
                }
            }
        }
        if overall.total > 0 {
            overall.percent = done / overall.total as f64 * 100.0;
        }
        overall
    }

    pub fn is_completed(&self) -> bool {
        self.read()
            .repos
            .values()
            .all(|repo| repo.status.is_terminal())
    }

    pub fn active_count(&self) -> usize {
        self.read().active()
    }

    /// Highest number of simultaneously active repositories seen so far.
    pub fn peak_active(&self) -> usize {
        self.read().peak_active
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Linear extrapolation of the remaining time; zero when unknown.
    pub fn eta(&self) -> Duration {
        eta_from(self.elapsed(), self.overall_progress().percent)
    }

    pub fn render_progress(&self) -> String {
        match self.mode {
            DisplayMode::Quiet => String::new(),
            DisplayMode::Compact => self.render_compact(),
            DisplayMode::Detailed => self.render_detailed(),
        }
    }

    fn render_compact(&self) -> String {
        let overall = self.overall_progress();
        let filled = ((overall.percent / 100.0) * BAR_WIDTH as f64).round() as usize;
        let filled = filled.min(BAR_WIDTH);
        let mut line = format!(
            "[{}{}] {:5.1}% {}/{} done, {} failed, {} active",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            overall.percent,
            overall.completed + overall.failed,
            overall.total,
            overall.failed,
            overall.active,
        );
        let eta = eta_from(self.elapsed(), overall.percent);
        if !eta.is_zero() && overall.pending > 0 {
            let _ = write!(line, ", eta {}", format_duration(eta));
        }
        line
    }

    fn render_detailed(&self) -> String {
        let mut out = self.render_compact();
        let now = Instant::now();
        let state = self.read();
        let groups: [(&str, fn(RepoStatus) -> bool); 4] = [
            ("in progress", |status| status.is_active()),
            ("failed", |status| status == RepoStatus::Failed),
            ("completed", |status| {
                matches!(status, RepoStatus::Completed | RepoStatus::Skipped)
            }),
            ("pending", |status| status == RepoStatus::Pending),
        ];
        for (title, belongs) in groups {
            let members: Vec<&RepositoryProgress> = state
                .repos
                .values()
                .filter(|repo| belongs(repo.status))
                .collect();
            if members.is_empty() {
                continue;
            }
            let _ = write!(out, "\n{title} ({}):", members.len());
            for repo in members {
                let _ = write!(out, "\n  {:<30} {:<9}", repo.name, repo.status.as_str());
                if repo.status.is_active() {
                    let _ = write!(
                        out,
                        " {:3.0}% {}",
                        repo.progress * 100.0,
                        format_duration(now.saturating_duration_since(repo.start_time))
                    );
                } else if repo.status != RepoStatus::Pending {
                    let took = repo.updated_time.saturating_duration_since(repo.start_time);
                    let _ = write!(out, " {}", format_duration(took));
                }
                if let Some(error) = &repo.error {
                    let _ = write!(out, " {error}");
                } else if !repo.message.is_empty() {
                    let _ = write!(out, " {}", repo.message);
                }
            }
        }
        out
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn eta_from(elapsed: Duration, percent: f64) -> Duration {
    if percent <= 0.0 || !percent.is_finite() {
        return Duration::ZERO;
    }
    let elapsed = elapsed.as_secs_f64();
    let remaining = elapsed * (100.0 / percent) - elapsed;
    if remaining <= 0.0 || !remaining.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(remaining)
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn terminal_states_are_final() {
        let tracker = ProgressTracker::with_repositories(DisplayMode::Compact, ["a"]);
        assert!(tracker.update_repository("a", RepoStatus::Started, "", None));
        assert!(tracker.complete_repository("a", "done"));
        assert!(!tracker.update_repository("a", RepoStatus::Pulling, "", Some(0.5)));
        assert!(!tracker.set_repository_error("a", "late failure"));
        assert_eq!(tracker.status_of("a"), Some(RepoStatus::Completed));

        tracker.register(["b"]);
        assert!(tracker.set_repository_error("b", "boom"));
        assert!(!tracker.complete_repository("b", "too late"));
        assert_eq!(tracker.status_of("b"), Some(RepoStatus::Failed));
    }

    #[test]
    fn overall_progress_includes_fractions() {
        let tracker = ProgressTracker::with_repositories(DisplayMode::Quiet, ["a", "b", "c", "d"]);
        tracker.complete_repository("a", "");
        tracker.skip_repository("b", "archived");
        tracker.update_repository("c", RepoStatus::Cloning, "", Some(0.5));

        let overall = tracker.overall_progress();
        assert_eq!(overall.total, 4);
        assert_eq!(overall.completed, 2);
        assert_eq!(overall.skipped, 1);
        assert_eq!(overall.failed, 0);
        assert_eq!(overall.pending, 2);
        assert_eq!(overall.active, 1);
        assert!((overall.percent - 62.5).abs() < 1e-9);
        assert!(!tracker.is_completed());
    }

    #[test]
    fn fraction_updates_ignore_terminal_repos() {
        let tracker = ProgressTracker::with_repositories(DisplayMode::Quiet, ["a"]);
        tracker.update_repository("a", RepoStatus::Fetching, "", None);
        tracker.set_fraction("a", 2.0);
        assert_eq!(tracker.repository("a").unwrap().progress, 1.0);
        tracker.set_repository_error("a", "x");
        tracker.set_fraction("a", 0.1);
        assert_eq!(tracker.repository("a").unwrap().progress, 1.0);
    }

    #[test]
    fn eta_is_zero_when_unknown() {
        assert_eq!(eta_from(Duration::from_secs(10), 0.0), Duration::ZERO);
        assert_eq!(eta_from(Duration::from_secs(10), -5.0), Duration::ZERO);
        assert_eq!(eta_from(Duration::from_secs(10), 100.0), Duration::ZERO);
        assert_eq!(eta_from(Duration::from_secs(10), 120.0), Duration::ZERO);
        let eta = eta_from(Duration::from_secs(10), 25.0);
        assert!((eta.as_secs_f64() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn render_modes() {
        let tracker = ProgressTracker::with_repositories(DisplayMode::Compact, ["a", "b"]);
        tracker.complete_repository("a", "cloned");
        let line = tracker.render_progress();
        assert!(line.contains(" 50.0%"), "{line}");
        assert!(line.contains("1/2 done"), "{line}");
        assert!(!line.contains('\n'));

        let quiet = ProgressTracker::with_repositories(DisplayMode::Quiet, ["a"]);
        assert_eq!(quiet.render_progress(), "");

        let detailed = ProgressTracker::with_repositories(DisplayMode::Detailed, ["a", "b", "c"]);
        detailed.complete_repository("a", "cloned");
        detailed.set_repository_error("b", "access denied");
        let text = detailed.render_progress();
        assert!(text.contains("failed (1):"), "{text}");
        assert!(text.contains("access denied"), "{text}");
        assert!(text.contains("completed (1):"), "{text}");
        assert!(text.contains("pending (1):"), "{text}");
    }

    #[test]
    fn concurrent_updates_are_consistent() {
        let names: Vec<String> = (0..64).map(|idx| format!("repo-{idx}")).collect();
        let tracker = Arc::new(ProgressTracker::with_repositories(DisplayMode::Quiet, &names));
        let handles: Vec<_> = names
            .chunks(16)
            .map(|chunk| {
                let tracker = Arc::clone(&tracker);
                let chunk = chunk.to_vec();
                thread::spawn(move || {
                    for name in chunk {
                        tracker.update_repository(&name, RepoStatus::Started, "", None);
                        tracker.update_repository(&name, RepoStatus::Pulling, "", Some(0.3));
                        tracker.complete_repository(&name, "ok");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(tracker.is_completed());
        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.peak_active() <= 4);
        assert_eq!(tracker.overall_progress().completed, 64);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h02m");
    }
}
