//! Mirror sync tests against local `file://` remotes.

use trybook::repo::{RepoRef, SyncAction};
use trybook::status::SyncView;
use trybook::OperationStatus;

use crate::fixtures::{wait_for_sync, TestEnv};

fn mirror_dir(env: &TestEnv, owner: &str, repo: &str) -> std::path::PathBuf {
    env.trybook
        .layout()
        .mirror_dir(&RepoRef::new(owner, repo).unwrap())
}

fn assert_success(view: &SyncView) {
    assert!(view.operation.done);
    assert_eq!(
        view.operation.status,
        OperationStatus::Success,
        "output: {}",
        view.operation.output
    );
}

/// Test: Clone then update
/// Given an upstream repository and no local mirror
/// When the repository is synced twice with a new upstream commit in between
/// Then the first sync clones, the second updates, and each reports HEAD
#[tokio::test]
async fn test_sync_clones_then_updates() {
    let env = TestEnv::echo();
    env.remotes.create("octo", "hello");
    let first_head = env.remotes.head("octo", "hello");

    let first = env.sync("octo/hello").await;
    assert_success(&first);
    assert!(first.operation.output.contains("Cloning"));
    assert_eq!(first.revision.as_deref(), Some(first_head.as_str()));
    assert_eq!(first.path.as_deref(), Some(mirror_dir(&env, "octo", "hello").as_path()));

    // A shallow clone has exactly one commit.
    let count = std::process::Command::new("git")
        .args(["rev-list", "--count", "HEAD"])
        .current_dir(mirror_dir(&env, "octo", "hello"))
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&count.stdout).trim(), "1");

    let second_head = env
        .remotes
        .commit("octo", "hello", "lib.rs", "fn main() {}\n", "Add lib");
    let second = env.sync("https://github.com/octo/hello.git").await;
    assert_success(&second);
    assert!(second.operation.output.contains("Updating"));
    assert_eq!(second.revision.as_deref(), Some(second_head.as_str()));
    assert!(mirror_dir(&env, "octo", "hello").join("lib.rs").exists());
}

/// Test: Missing upstream
/// Given no upstream repository
/// When the repository is synced
/// Then the sync ends in error with output and no mirror directory remains
#[tokio::test]
async fn test_failed_clone_leaves_no_mirror() {
    let env = TestEnv::echo();
    let view = env.sync("octo/missing").await;

    assert!(view.operation.done);
    assert_eq!(view.operation.status, OperationStatus::Error);
    assert!(!view.operation.output.is_empty());
    assert!(view.revision.is_none());
    assert!(!mirror_dir(&env, "octo", "missing").exists());
}

/// Test: Concurrent syncs
/// Given an upstream repository
/// When two syncs of it start at the same time
/// Then both succeed; one clones and the other updates
#[tokio::test]
async fn test_concurrent_syncs_are_serialized() {
    let env = TestEnv::echo();
    env.remotes.create("octo", "hello");

    let a = env.trybook.start_sync("octo/hello").await.unwrap();
    let b = env.trybook.start_sync("octo/hello").await.unwrap();
    assert_ne!(a, b);

    let (va, vb) = tokio::join!(
        wait_for_sync(&env.trybook, &a),
        wait_for_sync(&env.trybook, &b)
    );
    assert_success(&va);
    assert_success(&vb);

    let clones = [&va, &vb]
        .iter()
        .filter(|v| v.operation.output.contains("Cloning"))
        .count();
    assert_eq!(clones, 1);
    assert_eq!(va.revision, vb.revision);
}

#[tokio::test]
async fn test_sync_outcome_action() {
    let env = TestEnv::echo();
    env.remotes.create("octo", "hello");
    let sync = trybook::repo::RepoSync::new(
        env.trybook.layout().clone(),
        env.remotes.url_template(),
        std::time::Duration::from_secs(30),
    );
    let repo = RepoRef::new("octo", "hello").unwrap();

    let mut actions = Vec::new();
    for _ in 0..2 {
        let job = trybook::repo::SyncJob::new(
            repo.clone(),
            trybook::Operation::new(
                trybook::Id::new(),
                "sync",
                trybook::operation::SummaryRole::Build,
            ),
        );
        sync.run(&job, tokio_util::sync::CancellationToken::new()).await;
        actions.push(job.outcome().map(|o| o.action));
    }
    assert_eq!(actions, vec![Some(SyncAction::Clone), Some(SyncAction::Update)]);
}
