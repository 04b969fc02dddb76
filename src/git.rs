use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, Repository, WorktreeAddOptions};

use crate::{tlog_debug, tlog_warn, Error, Result};

/// Local git operations on a mirror through libgit2.
///
/// Network operations (clone, pull) go through the `git` executable and the
/// process runner instead, so their output is streamed to pollers.
pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn open(repo_path: &Path) -> Result<Self> {
        tlog_debug!("GitOps::open path={}", repo_path.display());
        let _ = Repository::open(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::open(&self.repo_path)?)
    }

    /// Full id of the commit HEAD points at.
    pub fn head_commit(&self) -> Result<String> {
        let repo = self.repo()?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Branch name HEAD points at, or the short commit id when detached.
    pub fn current_head(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head()?;
        if head.is_branch() {
            if let Some(name) = head.shorthand() {
                return Ok(name.to_string());
            }
        }
        let commit = head.peel_to_commit()?;
        Ok(format!("{:.7}", commit.id()))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let found = match repo.find_branch(branch, BranchType::Local).map(|_| ()) {
            Ok(()) => true,
            Err(e) if e.code() == ErrorCode::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        Ok(found)
    }

    /// Create `branch` at the mirror's HEAD commit and check it out in a new
    /// worktree at `worktree_path`. The mirror's own checkout is untouched.
    ///
    /// Refuses to run when the branch, the directory or the worktree entry
    /// already exists. If adding the worktree fails, only what this call
    /// created is removed again.
    pub fn create_worktree(&self, branch: &str, worktree_path: &Path) -> Result<()> {
        tlog_debug!(
            "GitOps::create_worktree branch={} path={}",
            branch,
            worktree_path.display()
        );
        let worktree_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch)
            .to_string();

        if self.branch_exists(branch)? {
            return Err(Error::AlreadyExists(format!("branch '{}'", branch)));
        }
        if worktree_path.exists() {
            return Err(Error::AlreadyExists(worktree_path.display().to_string()));
        }
        let repo = self.repo()?;
        if repo.find_worktree(&worktree_name).is_ok() {
            return Err(Error::AlreadyExists(format!("worktree '{}'", worktree_name)));
        }

        let commit = repo.head()?.peel_to_commit()?;
        tlog_debug!("Creating branch {} from commit {}", branch, commit.id());
        let mut branch_ref = repo.branch(branch, &commit, false)?.into_reference();

        let added = {
            let mut opts = WorktreeAddOptions::new();
            opts.reference(Some(&branch_ref));
            repo.worktree(&worktree_name, worktree_path, Some(&opts))
                .map(|_| ())
        };
        if let Err(e) = added {
            tlog_warn!("Failed to add worktree {}: {}", worktree_name, e);
            if worktree_path.exists() {
                if let Err(e) = std::fs::remove_dir_all(worktree_path) {
                    tlog_warn!(
                        "Failed to remove worktree dir {}: {}",
                        worktree_path.display(),
                        e
                    );
                }
            }
            let admin_dir = repo.path().join("worktrees").join(&worktree_name);
            if admin_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&admin_dir) {
                    tlog_warn!("Failed to remove {}: {}", admin_dir.display(), e);
                }
            }
            if let Err(e) = branch_ref.delete() {
                tlog_warn!("Failed to delete branch '{}': {}", branch, e);
            }
            return Err(e.into());
        }
        tlog_debug!("Worktree {} created", worktree_name);
        Ok(())
    }
}
