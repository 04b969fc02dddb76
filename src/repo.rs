//! Repository references, on-disk layout and mirror sync.
//!
//! A mirror's state is never tracked in memory: every sync looks at the
//! filesystem and either clones (directory absent) or pulls (present).
//! Syncs of the same repository are serialized by a per-repository lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::git::GitOps;
use crate::operation::{FailureKind, Operation, OperationError};
use crate::runner::{CommandSpec, ProcessRunner};
use crate::util::blocking_with_timeout;
use crate::{tlog, tlog_debug, tlog_warn, Error, Result};

const GITHUB_PREFIXES: &[&str] = &[
    "https://github.com/",
    "http://github.com/",
    "ssh://git@github.com/",
    "git@github.com:",
    "github.com/",
];

const REVISION_TIMEOUT: Duration = Duration::from_secs(10);

/// A remote repository identified by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: &str, name: &str) -> Result<Self> {
        validate_component("owner", owner)?;
        validate_component("repository", name)?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse `owner/repo` or any common GitHub URL form of it.
    pub fn parse(input: &str) -> Result<Self> {
        let mut s = input.trim();
        s = s.strip_suffix('/').unwrap_or(s);
        s = s.strip_suffix(".git").unwrap_or(s);
        s = s.strip_suffix('/').unwrap_or(s);
        if s.is_empty() {
            return Err(Error::Validation("empty repo".to_string()));
        }
        for prefix in GITHUB_PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest;
                break;
            }
        }
        let mut parts = s.split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
                Self::new(owner, name)
            }
            _ => Err(Error::Validation(
                "invalid GitHub repo; expected owner/repo".to_string(),
            )),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepoRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Reject anything that could escape the workdir when joined into a path.
pub(crate) fn validate_component(what: &str, value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid {} name: {:?}", what, value)))
    }
}

/// Directory layout under the workdir.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror_dir(&self, repo: &RepoRef) -> PathBuf {
        self.root.join("clone").join(&repo.owner).join(&repo.name)
    }

    pub fn notebook_dir(&self, repo: &RepoRef, notebook: &str) -> PathBuf {
        self.root
            .join("worktree")
            .join(&repo.owner)
            .join(&repo.name)
            .join(notebook)
    }
}

/// Mirror state as seen on disk. An existing mirror is always treated as
/// stale and pulled; only a finished sync job reports it current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorState {
    Absent,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Clone,
    Update,
}

/// Result of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub path: PathBuf,
    pub revision: String,
    pub action: SyncAction,
}

/// A sync operation plus the outcome it publishes on success.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub repo: RepoRef,
    pub operation: Operation,
    outcome: Arc<OnceCell<SyncOutcome>>,
}

impl SyncJob {
    pub fn new(repo: RepoRef, operation: Operation) -> Self {
        Self {
            repo,
            operation,
            outcome: Arc::new(OnceCell::new()),
        }
    }

    pub fn outcome(&self) -> Option<&SyncOutcome> {
        self.outcome.get()
    }
}

/// Clone-or-update coordinator for repository mirrors.
pub struct RepoSync {
    layout: Layout,
    remote_url: String,
    limit: Duration,
    locks: Mutex<HashMap<RepoRef, Arc<Mutex<()>>>>,
}

impl RepoSync {
    pub fn new(layout: Layout, remote_url: impl Into<String>, limit: Duration) -> Self {
        Self {
            layout,
            remote_url: remote_url.into(),
            limit,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn remote_url(&self, repo: &RepoRef) -> String {
        self.remote_url
            .replace("{owner}", &repo.owner)
            .replace("{repo}", &repo.name)
    }

    pub fn mirror_state(&self, repo: &RepoRef) -> MirrorState {
        if self.layout.mirror_dir(repo).exists() {
            MirrorState::Stale
        } else {
            MirrorState::Absent
        }
    }

    fn remaining(&self, started: Instant) -> Duration {
        self.limit.saturating_sub(started.elapsed())
    }

    /// Advisory lock for everything that touches one repository's mirror.
    pub async fn lock(&self, repo: &RepoRef) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(repo.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Bring the job's mirror up to date and finalize its operation.
    pub async fn run(&self, job: &SyncJob, cancel: CancellationToken) {
        let op = &job.operation;
        let result = self.sync(job, cancel).await;
        if let Err(err) = &result {
            tlog_warn!("Sync of {} failed: {}", job.repo, err.message);
            if err.kind != FailureKind::Spawn {
                op.append_line(&err.message).await;
            }
        }
        op.finish(result).await;
    }

    async fn sync(
        &self,
        job: &SyncJob,
        cancel: CancellationToken,
    ) -> std::result::Result<(), OperationError> {
        let repo = &job.repo;
        let op = &job.operation;
        let _guard = self.lock(repo).await;

        let started = Instant::now();
        let dir = self.layout.mirror_dir(repo);
        let url = self.remote_url(repo);

        let action = match self.mirror_state(repo) {
            MirrorState::Stale => {
                tlog!("Starting git pull for {} in {}", url, dir.display());
                op.append_line(&format!("Updating {} in {}", repo, dir.display()))
                    .await;
                let spec = CommandSpec::new("git").arg("pull").current_dir(&dir);
                ProcessRunner::run_step(op, &spec, cancel, Some(self.remaining(started)))
                    .await?;
                SyncAction::Update
            }
            MirrorState::Absent => {
                tlog!("Starting git clone of {} into {}", url, dir.display());
                op.append_line(&format!("Cloning {} into {}", url, dir.display()))
                    .await;
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    OperationError::new(
                        FailureKind::Io,
                        format!("create repo directory {}: {}", dir.display(), e),
                    )
                })?;
                let spec = CommandSpec::new("git")
                    .args(["clone", "--depth=1", "--single-branch"])
                    .arg(url.as_str())
                    .arg(dir.to_string_lossy());
                let limit = self.remaining(started);
                if let Err(err) = ProcessRunner::run_step(op, &spec, cancel, Some(limit)).await {
                    // A half-written clone would be pulled next time.
                    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                        tlog_warn!("Failed to remove partial clone {}: {}", dir.display(), e);
                    }
                    return Err(err);
                }
                SyncAction::Clone
            }
        };
        tlog!(
            "Completed {:?} for {} in {:?}",
            action,
            repo,
            started.elapsed()
        );

        let revision = revision(&dir).await.map_err(|e| {
            OperationError::new(
                FailureKind::Io,
                format!("could not get HEAD commit after {:?}: {}", action, e),
            )
        })?;
        op.append_line(&format!("At revision {}", revision)).await;

        let outcome = SyncOutcome {
            path: dir,
            revision,
            action,
        };
        tlog_debug!("Sync outcome for {}: {:?}", repo, outcome);
        if let Err(e) = job.outcome.set(outcome) {
            tlog_warn!("Sync job for {} already had an outcome: {}", repo, e);
        }
        Ok(())
    }
}

/// HEAD commit id of the repository at `dir`.
pub async fn revision(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();
    blocking_with_timeout(REVISION_TIMEOUT, move || GitOps::open(&dir)?.head_commit()).await
}
