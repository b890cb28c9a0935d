use crate::checkpoint::{Checkpoint, CheckpointStatus};
use crate::error::CheckpointError;
use crate::model::ProviderKind;
use crate::paths::state_file_path;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info, warn};

/// File-backed checkpoints, one JSON document per (provider, organization).
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    state_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct StoredCheckpoint {
    pub path: PathBuf,
    pub checkpoint: Checkpoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub max_completed: usize,
    pub max_failed: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            max_completed: 50,
            max_failed: 20,
        }
    }
}

impl CheckpointStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn path_for(&self, provider: ProviderKind, organization: &str) -> PathBuf {
        state_file_path(&self.state_dir, provider, organization)
    }

    /// Refresh `last_updated` and replace the checkpoint file atomically.
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<PathBuf, CheckpointError> {
        fs::create_dir_all(&self.state_dir)
            .map_err(|err| CheckpointError::io(&self.state_dir, err))?;
        checkpoint.last_updated = OffsetDateTime::now_utc();
        let path = self.path_for(checkpoint.provider, &checkpoint.organization);
        let data = serde_json::to_vec_pretty(checkpoint).map_err(|err| CheckpointError::Parse {
            path: path.clone(),
            source: err,
        })?;

        let tmp_path = temp_path(&path);
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        };
        if let Err(err) = write() {
            let _ = fs::remove_file(&tmp_path);
            return Err(CheckpointError::io(&path, err));
        }
        debug!(
            path = %path.display(),
            completed = checkpoint.completed().len(),
            failed = checkpoint.failed().len(),
            pending = checkpoint.pending().len(),
            "checkpoint saved"
        );
        Ok(path)
    }

    pub fn load(
        &self,
        provider: ProviderKind,
        organization: &str,
    ) -> Result<Checkpoint, CheckpointError> {
        read_checkpoint(&self.path_for(provider, organization))
    }

    pub fn has(&self, provider: ProviderKind, organization: &str) -> bool {
        self.path_for(provider, organization).is_file()
    }

    /// Returns `false` when there was nothing to delete.
    pub fn delete(&self, provider: ProviderKind, organization: &str) -> Result<bool, CheckpointError> {
        let path = self.path_for(provider, organization);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "checkpoint deleted");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CheckpointError::io(path, err)),
        }
    }

    /// Every readable checkpoint in the state directory, most recently
    /// updated first. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<StoredCheckpoint>, CheckpointError> {
        let entries = match fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CheckpointError::io(&self.state_dir, err)),
        };
        let mut stored = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| CheckpointError::io(&self.state_dir, err))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_checkpoint(&path) {
                Ok(checkpoint) => stored.push(StoredCheckpoint { path, checkpoint }),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint"),
            }
        }
        stored.sort_by(|a, b| b.checkpoint.last_updated.cmp(&a.checkpoint.last_updated));
        Ok(stored)
    }

    /// Apply the retention policy and return the paths removed. In-progress
    /// checkpoints are never touched.
    pub fn cleanup(
        &self,
        policy: &RetentionPolicy,
        now: OffsetDateTime,
    ) -> Result<Vec<PathBuf>, CheckpointError> {
        let cutoff = now - TimeDuration::days(i64::from(policy.max_age_days));
        let mut removed = Vec::new();
        let mut completed = Vec::new();
        let mut failed = Vec::new();

        for stored in self.list()? {
            let status = stored.checkpoint.status;
            if status == CheckpointStatus::InProgress {
                continue;
            }
            if stored.checkpoint.last_updated < cutoff {
                remove_stored(&stored.path, &mut removed)?;
                continue;
            }
            match status {
                CheckpointStatus::Completed => completed.push(stored),
                CheckpointStatus::Failed => failed.push(stored),
                _ => {}
            }
        }

        // `list` is newest first, so the overflow is at the tail.
        for stored in completed.iter().skip(policy.max_completed) {
            remove_stored(&stored.path, &mut removed)?;
        }
        for stored in failed.iter().skip(policy.max_failed) {
            remove_stored(&stored.path, &mut removed)?;
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "checkpoint cleanup removed files");
        }
        Ok(removed)
    }
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(CheckpointError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(err) => return Err(CheckpointError::io(path, err)),
    };
    let mut checkpoint: Checkpoint =
        serde_json::from_slice(&data).map_err(|err| CheckpointError::Parse {
            path: path.to_path_buf(),
            source: err,
        })?;
    if checkpoint.normalize() {
        warn!(path = %path.display(), "checkpoint lists were inconsistent; repaired on load");
    }
    Ok(checkpoint)
}

fn remove_stored(path: &Path, removed: &mut Vec<PathBuf>) -> Result<(), CheckpointError> {
    match fs::remove_file(path) {
        Ok(()) => {
            removed.push(path.to_path_buf());
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CheckpointError::io(path, err)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RepoOperation, SyncStrategy};
    use tempfile::TempDir;

    fn sample(org: &str) -> Checkpoint {
        let mut cp = Checkpoint::new(
            ProviderKind::GitHub,
            org,
            "/srv/mirror",
            SyncStrategy::Pull,
            5,
            2,
        );
        cp.set_pending(["a", "b", "c"]);
        cp.add_completed_repository("a", "/srv/mirror/a", RepoOperation::Clone, "cloned");
        cp.add_failed_repository("b", "/srv/mirror/b", RepoOperation::Pull, "refused", 3);
        cp
    }

    fn write_raw(dir: &Path, cp: &Checkpoint) {
        fs::create_dir_all(dir).unwrap();
        let path = state_file_path(dir, cp.provider, &cp.organization);
        fs::write(path, serde_json::to_vec(cp).unwrap()).unwrap();
    }

    #[test]
    fn save_then_load_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state"));
        let mut cp = sample("acme");
        let before = cp.last_updated;
        let path = store.save(&mut cp).unwrap();
        assert!(cp.last_updated >= before);
        assert_eq!(path, tmp.path().join("state").join("github_acme.json"));

        let loaded = store.load(ProviderKind::GitHub, "acme").unwrap();
        assert_eq!(loaded, cp);
        assert!(store.has(ProviderKind::GitHub, "acme"));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let mut cp = sample("acme");
        store.save(&mut cp).unwrap();
        store.save(&mut cp).unwrap();
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["github_acme.json".to_string()]);
    }

    #[test]
    fn load_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let err = store.load(ProviderKind::GitLab, "nobody").unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.has(ProviderKind::GitLab, "nobody"));
    }

    #[test]
    fn load_corrupt_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        fs::write(store.path_for(ProviderKind::GitHub, "acme"), "{ not json").unwrap();
        let err = store.load(ProviderKind::GitHub, "acme").unwrap_err();
        assert!(matches!(err, CheckpointError::Parse { .. }));
    }

    #[test]
    fn load_repairs_inconsistent_lists() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let mut value = serde_json::to_value(sample("acme")).unwrap();
        value["total_repositories"] = serde_json::json!(99);
        value["pending"] = serde_json::json!(["a", "b", "c", "c"]);
        fs::write(
            store.path_for(ProviderKind::GitHub, "acme"),
            serde_json::to_vec(&value).unwrap(),
        )
        .unwrap();

        let loaded = store.load(ProviderKind::GitHub, "acme").unwrap();
        assert_eq!(loaded.pending(), ["c".to_string()]);
        assert_eq!(loaded.completed().len(), 1);
        assert_eq!(loaded.failed().len(), 1);
        assert_eq!(loaded.total_repositories(), 3);
    }

    #[test]
    fn delete_reports_whether_file_existed() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let mut cp = sample("acme");
        store.save(&mut cp).unwrap();
        assert!(store.delete(ProviderKind::GitHub, "acme").unwrap());
        assert!(!store.delete(ProviderKind::GitHub, "acme").unwrap());
    }

    #[test]
    fn list_skips_unparseable_files() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        store.save(&mut sample("one")).unwrap();
        store.save(&mut sample("two")).unwrap();
        fs::write(tmp.path().join("github_broken.json"), "garbage").unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let listed = store.list().unwrap();
        let mut orgs: Vec<&str> = listed
            .iter()
            .map(|stored| stored.checkpoint.organization.as_str())
            .collect();
        orgs.sort();
        assert_eq!(orgs, vec!["one", "two"]);
    }

    #[test]
    fn list_of_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn cleanup_applies_age_and_count_limits() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let now = OffsetDateTime::now_utc();

        let mut old = sample("old");
        old.mark_completed();
        old.last_updated = now - TimeDuration::days(40);
        write_raw(tmp.path(), &old);

        let mut running = sample("running");
        running.last_updated = now - TimeDuration::days(90);
        write_raw(tmp.path(), &running);

        for (index, org) in ["f1", "f2", "f3"].iter().enumerate() {
            let mut failed = sample(org);
            failed.mark_failed();
            failed.last_updated = now - TimeDuration::hours(index as i64 + 1);
            write_raw(tmp.path(), &failed);
        }

        let policy = RetentionPolicy {
            max_age_days: 30,
            max_completed: 50,
            max_failed: 2,
        };
        let removed = store.cleanup(&policy, now).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!store.has(ProviderKind::GitHub, "old"));
        assert!(!store.has(ProviderKind::GitHub, "f3"));
        assert!(store.has(ProviderKind::GitHub, "f1"));
        assert!(store.has(ProviderKind::GitHub, "f2"));
        assert!(store.has(ProviderKind::GitHub, "running"));
    }
}
