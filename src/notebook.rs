//! Notebooks: isolated worktrees of a synced mirror, one branch each.

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::git::GitOps;
use crate::repo::{validate_component, Layout, RepoRef, RepoSync};
use crate::util::{blocking, random_hex, slug};
use crate::{tlog, tlog_debug, tlog_error, Error, Result};

const SUFFIX_LEN: usize = 6;

/// Everything a client needs to show a notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notebook {
    pub owner: String,
    pub repo: String,
    pub name: String,
    pub branch: String,
    pub path: PathBuf,
    pub exists: bool,
}

impl Notebook {
    /// Descriptor derived from the identity alone; `exists` reflects the disk.
    pub fn describe(layout: &Layout, repo: &RepoRef, name: &str) -> Result<Self> {
        validate_component("notebook", name)?;
        let path = layout.notebook_dir(repo, name);
        Ok(Self {
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
            name: name.to_string(),
            branch: name.to_string(),
            exists: path.is_dir(),
            path,
        })
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef {
            owner: self.owner.clone(),
            name: self.repo.clone(),
        }
    }
}

/// `<owner>-<repo>-<YYYYMMDD>-<6 hex>`.
pub fn notebook_name(repo: &RepoRef, date: NaiveDate) -> String {
    format!(
        "{}-{}-{}",
        slug(&format!("{}-{}", repo.owner, repo.name)),
        date.format("%Y%m%d"),
        random_hex(SUFFIX_LEN)
    )
}

/// Create a fresh notebook for `repo`. The mirror must already be synced.
pub async fn create(sync: &RepoSync, repo: &RepoRef) -> Result<Notebook> {
    let name = notebook_name(repo, Local::now().date_naive());
    provision(sync, repo, &name).await
}

/// Check out a new worktree named `name`. An existing notebook of that name
/// is left as it is and reported as [`Error::AlreadyExists`].
async fn provision(sync: &RepoSync, repo: &RepoRef, name: &str) -> Result<Notebook> {
    let layout = sync.layout();
    let mirror = layout.mirror_dir(repo);
    if !mirror.is_dir() {
        return Err(Error::MirrorNotFound(repo.full_name()));
    }

    let _guard = sync.lock(repo).await;
    let notebook = Notebook::describe(layout, repo, name)?;
    tlog!(
        "Creating notebook {} for {} at {}",
        name,
        repo,
        notebook.path.display()
    );

    if let Some(parent) = notebook.path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let branch = notebook.branch.clone();
    let path = notebook.path.clone();
    let result = blocking(move || GitOps::open(&mirror)?.create_worktree(&branch, &path)).await;

    match result {
        Ok(()) => {
            tlog_debug!("Notebook {} ready", name);
            Ok(Notebook {
                exists: true,
                ..notebook
            })
        }
        Err(e) => {
            tlog_error!("Failed to create notebook {}: {}", name, e);
            Err(e)
        }
    }
}
