//! Fan-out of one prompt to every configured agent, plus the optional
//! build query and test pair.
//!
//! Which sub-operations exist is decided once from the prompt text when the
//! execution is planned. Each sub-operation runs in its own task; the
//! execution has no stored status of its own and is aggregated on read.

use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, BuildTool};
use crate::config::Config;
use crate::notebook::Notebook;
use crate::operation::{FailureKind, Operation, OperationError, OperationStatus, SummaryRole};
use crate::registry::Id;
use crate::runner::{CommandSpec, ProcessRunner};
use crate::{tlog, tlog_debug, tlog_warn};

pub const QUERY_LABEL: &str = "query";
pub const TEST_LABEL: &str = "test";

pub const NO_TARGETS_MESSAGE: &str = "No targets matched; nothing to test.";
pub const QUERY_FAILED_MESSAGE: &str = "Query failed; nothing to test.";

static TEST_TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test\s+(\S.*)$").unwrap());

/// Pattern of a `test <pattern>` prompt, if the prompt is one.
pub fn test_pattern(prompt: &str) -> Option<&str> {
    let prompt = prompt.trim();
    if !prompt.starts_with("test ") {
        return None;
    }
    TEST_TRIGGER
        .captures(prompt)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Query and test sub-operations of a triggered execution.
#[derive(Debug, Clone)]
pub struct BuildOps {
    pub pattern: String,
    pub query: Operation,
    pub test: Operation,
}

/// One prompt dispatched to a notebook.
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: Id,
    pub prompt: String,
    pub notebook: Notebook,
    pub agents: Vec<Operation>,
    pub build: Option<BuildOps>,
}

impl Execution {
    /// All sub-operations: agents first, then query and test.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.agents.iter().chain(
            self.build
                .iter()
                .flat_map(|b| [&b.query, &b.test].into_iter()),
        )
    }

    pub fn operation(&self, label: &str) -> Option<&Operation> {
        self.operations().find(|op| op.label() == label)
    }

    pub async fn status(&self) -> OperationStatus {
        let mut statuses = Vec::new();
        for op in self.operations() {
            let snap = op.snapshot().await;
            statuses.push((snap.done, snap.status));
        }
        aggregate(&statuses)
    }
}

/// `success` when every sub-operation finished successfully, `error` as
/// soon as one finished with an error, `running` otherwise.
pub fn aggregate(subs: &[(bool, OperationStatus)]) -> OperationStatus {
    if subs
        .iter()
        .any(|(done, status)| *done && *status == OperationStatus::Error)
    {
        OperationStatus::Error
    } else if !subs.is_empty()
        && subs
            .iter()
            .all(|(done, status)| *done && *status == OperationStatus::Success)
    {
        OperationStatus::Success
    } else {
        OperationStatus::Running
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionStarted {
    pub execution_id: Id,
}

/// Plans and launches executions.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    agents: Vec<Agent>,
    build: BuildTool,
}

impl Orchestrator {
    pub fn new(agents: Vec<Agent>, build: BuildTool) -> Self {
        Self { agents, build }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Agent::all(config), BuildTool::from_config(&config.build))
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn build_tool(&self) -> &BuildTool {
        &self.build
    }

    /// Create the execution's sub-operations, all `running`, none started.
    pub fn plan(&self, id: Id, prompt: &str, notebook: Notebook) -> Execution {
        let agents = self
            .agents
            .iter()
            .map(|agent| Operation::new(Id::new(), agent.name(), SummaryRole::Agent))
            .collect();
        let build = test_pattern(prompt).map(|pattern| BuildOps {
            pattern: pattern.to_string(),
            query: Operation::new(Id::new(), QUERY_LABEL, SummaryRole::Build),
            test: Operation::new(Id::new(), TEST_LABEL, SummaryRole::Build),
        });
        tlog_debug!(
            "Planned execution {} agents={} build={:?}",
            id.short(),
            self.agents.len(),
            build.as_ref().map(|b| b.pattern.as_str())
        );
        Execution {
            id,
            prompt: prompt.to_string(),
            notebook,
            agents,
            build,
        }
    }

    /// Start every sub-operation. The returned task completes when all of
    /// them are done.
    pub fn launch(&self, execution: &Execution) -> JoinHandle<()> {
        let cwd = execution.notebook.path.clone();
        let mut tasks = Vec::with_capacity(self.agents.len() + 1);

        for (agent, op) in self.agents.iter().zip(&execution.agents) {
            let spec = agent.command(&execution.prompt, &cwd);
            let op = op.clone();
            tasks.push(tokio::spawn(async move {
                run_or_fail(&op, spec, CancellationToken::new()).await;
            }));
        }

        if let Some(build) = execution.build.clone() {
            let tool = self.build.clone();
            tasks.push(tokio::spawn(async move {
                run_build(&tool, &build, &cwd, CancellationToken::new()).await;
            }));
        }

        let id = execution.id;
        tlog!(
            "Launched execution {} in {} ({} tasks)",
            id.short(),
            execution.notebook.name,
            tasks.len()
        );
        tokio::spawn(async move {
            for joined in join_all(tasks).await {
                if let Err(e) = joined {
                    tlog_warn!("Execution {} task failed: {}", id.short(), e);
                }
            }
            tlog!("Execution {} finished", id.short());
        })
    }
}

async fn run_or_fail(op: &Operation, spec: Option<CommandSpec>, cancel: CancellationToken) {
    match spec {
        Some(spec) => ProcessRunner::run(op, &spec, cancel, None).await,
        None => {
            let message = format!("no command configured for {}", op.label());
            op.append_line(&message).await;
            op.finish(Err(OperationError::new(FailureKind::Spawn, message)))
                .await;
        }
    }
}

/// Query for targets, then test them. The test is resolved without running
/// the tool when the query fails or finds nothing.
async fn run_build(
    tool: &BuildTool,
    build: &BuildOps,
    cwd: &std::path::Path,
    cancel: CancellationToken,
) {
    let query = tool.query_command(&build.pattern, cwd);
    run_or_fail(&build.query, query, cancel.clone()).await;

    let snap = build.query.snapshot().await;
    if snap.status != OperationStatus::Success {
        skip_test(&build.test, QUERY_FAILED_MESSAGE).await;
        return;
    }
    let targets: Vec<String> = snap.output.split_whitespace().map(String::from).collect();
    if targets.is_empty() {
        skip_test(&build.test, NO_TARGETS_MESSAGE).await;
        return;
    }
    tlog_debug!("Testing {} targets for {:?}", targets.len(), build.pattern);
    let test = tool.test_command(&targets, cwd);
    run_or_fail(&build.test, test, cancel).await;
}

async fn skip_test(test: &Operation, message: &str) {
    tlog_debug!("Skipping test op={}: {}", test.id().short(), message);
    test.append_line(message).await;
    test.finish(Ok(())).await;
}
