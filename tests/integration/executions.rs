//! Prompt execution tests with shell-script agents and build tools.

use std::time::Duration;

use trybook::execution::{NO_TARGETS_MESSAGE, QUERY_FAILED_MESSAGE};
use trybook::{Error, Id, OperationStatus};

use crate::fixtures::{sh_agent, sh_build, wait_for_execution, TestEnv};

/// Test: Plain prompt
/// Given one agent that prints over two seconds
/// When "fix the bug" is posted
/// Then exactly one sub-operation runs, polls show it running with growing
/// output, and it ends in success
#[tokio::test]
async fn test_plain_prompt_runs_single_agent() {
    let env = TestEnv::new(
        vec![sh_agent(
            "agent",
            "echo \"start: $1\"; sleep 1; echo middle; sleep 1; echo end",
        )],
        sh_build("true", "true"),
    );
    let notebook = env.notebook("octo", "hello").await;
    let id = env.prompt(&notebook, "fix the bug").await;

    let mut saw_running = false;
    let mut last_len = 0;
    let view = loop {
        let view = env.trybook.execution_status(&id).await.unwrap();
        assert_eq!(view.operations.len(), 1);
        let op = &view.operations[0];
        assert!(op.output.len() >= last_len);
        last_len = op.output.len();
        if !view.done {
            assert_eq!(view.status, OperationStatus::Running);
            saw_running = true;
        } else {
            break view;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert!(saw_running);
    assert_eq!(view.status, OperationStatus::Success);
    let op = view.operation("agent").unwrap();
    assert_eq!(op.output, "start: fix the bug\nmiddle\nend\n");
    assert!(op.error.is_none());
}

/// Test: Final summary is stable
/// Given a finished execution
/// When it is polled repeatedly
/// Then every poll returns the same summary and the backend ran once more
#[tokio::test]
async fn test_final_summary_is_cached() {
    let env = TestEnv::echo();
    let notebook = env.notebook("octo", "hello").await;
    let id = env.prompt(&notebook, "fix the bug").await;

    let first = wait_for_execution(&env.trybook, &id).await;
    let calls = env.summarizer.calls();
    let again = env.trybook.execution_status(&id).await.unwrap();
    let third = env.trybook.execution_status(&id).await.unwrap();

    let summary = &first.operation("agent").unwrap().summary;
    assert!(summary.ends_with("agent got: fix the bug"), "{}", summary);
    assert_eq!(&again.operation("agent").unwrap().summary, summary);
    assert_eq!(&third.operation("agent").unwrap().summary, summary);
    assert_eq!(env.summarizer.calls(), calls);
}

/// Test: Test trigger without targets
/// Given a query that prints nothing and a test tool that leaves a marker
/// When "test widget" is posted
/// Then the query receives "widget", test succeeds with the no-targets
/// message, and the test tool never runs
#[tokio::test]
async fn test_no_targets_resolves_test_without_running_it() {
    let env = TestEnv::new(
        vec![sh_agent("agent", "echo working")],
        sh_build(
            "echo \"$1\" > query-pattern",
            "touch test-ran",
        ),
    );
    let notebook = env.notebook("octo", "hello").await;
    let id = env.prompt(&notebook, "test widget").await;
    let view = wait_for_execution(&env.trybook, &id).await;

    let labels: Vec<_> = view.operations.iter().map(|op| op.label.as_str()).collect();
    assert_eq!(labels, vec!["agent", "query", "test"]);

    let pattern = std::fs::read_to_string(notebook.path.join("query-pattern")).unwrap();
    assert_eq!(pattern.trim(), "widget");

    let test = view.operation("test").unwrap();
    assert_eq!(test.status, OperationStatus::Success);
    assert_eq!(test.output.trim(), NO_TARGETS_MESSAGE);
    assert!(!notebook.path.join("test-ran").exists());
    assert_eq!(view.status, OperationStatus::Success);
}

/// Test: No targets with a failing agent
/// Given an agent that fails and a query that finds nothing
/// When "test widget" is posted
/// Then test is still success while the execution as a whole is error
#[tokio::test]
async fn test_no_targets_is_success_regardless_of_agent() {
    let env = TestEnv::new(
        vec![sh_agent("agent", "echo broken; exit 1")],
        sh_build("true", "touch test-ran"),
    );
    let notebook = env.notebook("octo", "hello").await;
    let id = env.prompt(&notebook, "test widget").await;
    let view = wait_for_execution(&env.trybook, &id).await;

    assert_eq!(view.operation("agent").unwrap().status, OperationStatus::Error);
    assert_eq!(view.operation("test").unwrap().status, OperationStatus::Success);
    assert_eq!(view.status, OperationStatus::Error);
}

/// Test: Targets found
/// Given a query that prints two targets
/// When "test widget" is posted
/// Then the test tool receives both targets
#[tokio::test]
async fn test_targets_flow_into_test_tool() {
    let env = TestEnv::new(
        vec![sh_agent("agent", "true")],
        sh_build("echo //$1:unit; echo //$1:e2e", "echo ran \"$@\""),
    );
    let notebook = env.notebook("octo", "hello").await;
    let id = env.prompt(&notebook, "test widget").await;
    let view = wait_for_execution(&env.trybook, &id).await;

    let test = view.operation("test").unwrap();
    assert_eq!(test.status, OperationStatus::Success);
    assert_eq!(test.output, "ran //widget:unit //widget:e2e\n");
    assert_eq!(view.status, OperationStatus::Success);
}

/// Test: Query failure
/// Given a query that exits non-zero
/// When "test widget" is posted
/// Then test resolves to success with the query-failed message
#[tokio::test]
async fn test_failed_query_skips_test() {
    let env = TestEnv::new(
        vec![sh_agent("agent", "true")],
        sh_build("echo 'no such package' >&2; exit 7", "touch test-ran"),
    );
    let notebook = env.notebook("octo", "hello").await;
    let id = env.prompt(&notebook, "test widget").await;
    let view = wait_for_execution(&env.trybook, &id).await;

    let query = view.operation("query").unwrap();
    assert_eq!(query.status, OperationStatus::Error);
    assert!(query.output.contains("no such package"));
    let test = view.operation("test").unwrap();
    assert_eq!(test.status, OperationStatus::Success);
    assert_eq!(test.output.trim(), QUERY_FAILED_MESSAGE);
    assert!(!notebook.path.join("test-ran").exists());
}

/// Test: Several agents
/// Given two agents, one of them failing
/// When a prompt is posted
/// Then both run to completion and the failure does not stop the other
#[tokio::test]
async fn test_agent_failure_does_not_cancel_siblings() {
    let env = TestEnv::new(
        vec![
            sh_agent("fast-fail", "exit 3"),
            sh_agent("slow-ok", "sleep 1; echo done"),
        ],
        sh_build("true", "true"),
    );
    let notebook = env.notebook("octo", "hello").await;
    let id = env.prompt(&notebook, "refactor").await;
    let view = wait_for_execution(&env.trybook, &id).await;

    assert_eq!(view.operation("fast-fail").unwrap().status, OperationStatus::Error);
    let ok = view.operation("slow-ok").unwrap();
    assert_eq!(ok.status, OperationStatus::Success);
    assert_eq!(ok.output, "done\n");
    assert_eq!(view.status, OperationStatus::Error);
}

#[tokio::test]
async fn test_unknown_execution_is_not_found() {
    let env = TestEnv::echo();
    let result = env.trybook.execution_status(&Id::new()).await;
    assert!(matches!(result, Err(Error::ExecutionNotFound(_))));
}
