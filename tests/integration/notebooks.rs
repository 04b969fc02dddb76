//! Notebook provisioning tests.

use std::process::Command;

use trybook::repo::RepoRef;
use trybook::Error;

use crate::fixtures::TestEnv;

fn current_branch(dir: &std::path::Path) -> String {
    let output = Command::new("git")
        .args(["branch", "--show-current"])
        .current_dir(dir)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Test: Notebook from a synced mirror
/// Given a synced mirror
/// When a notebook is created
/// Then it has its own branch and directory and the mirror stays on main
#[tokio::test]
async fn test_notebook_is_isolated_worktree() {
    let env = TestEnv::echo();
    let notebook = env.notebook("octo", "hello").await;

    assert!(notebook.exists);
    assert_eq!(notebook.branch, notebook.name);
    assert!(notebook.name.starts_with("octo-hello-"));
    assert!(notebook.path.join("README.md").exists());
    assert_eq!(current_branch(&notebook.path), notebook.branch);

    let mirror = env
        .trybook
        .layout()
        .mirror_dir(&RepoRef::new("octo", "hello").unwrap());
    assert_eq!(current_branch(&mirror), "main");
}

/// Test: Two notebooks
/// Given a synced mirror
/// When two notebooks are created on the same day
/// Then their names share a prefix and differ only in the suffix
#[tokio::test]
async fn test_two_notebooks_are_distinct() {
    let env = TestEnv::echo();
    let first = env.notebook("octo", "hello").await;
    let second = env.trybook.create_notebook("octo", "hello").await.unwrap();

    assert_ne!(first.name, second.name);
    assert_ne!(first.path, second.path);
    let prefix = |name: &str| name[..name.len() - 6].to_string();
    assert_eq!(prefix(&first.name), prefix(&second.name));
    assert!(second.path.join("README.md").exists());
}

/// Test: Descriptor lookup
/// Given an existing notebook
/// When it is looked up by identity
/// Then the same descriptor comes back; unknown names are not found
#[tokio::test]
async fn test_notebook_lookup() {
    let env = TestEnv::echo();
    let notebook = env.notebook("octo", "hello").await;

    let found = env
        .trybook
        .notebook("octo", "hello", &notebook.name)
        .unwrap();
    assert_eq!(found, notebook);

    let missing = env.trybook.notebook("octo", "hello", "octo-hello-19700101-000000");
    assert!(matches!(missing, Err(Error::NotebookNotFound(_))));
}

/// Test: No mirror
/// Given a repository that was never synced
/// When a notebook is requested
/// Then creation fails as not-found and nothing is written
#[tokio::test]
async fn test_notebook_requires_synced_mirror() {
    let env = TestEnv::echo();
    let err = env.trybook.create_notebook("octo", "hello").await.unwrap_err();
    assert!(matches!(err, Error::MirrorNotFound(_)));
    assert!(!env.workdir.path().join("worktree").exists());
}
