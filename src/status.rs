//! Point-in-time views of operations for polling clients.

use std::path::PathBuf;

use futures::future::join_all;
use serde::Serialize;

use crate::execution::{aggregate, Execution};
use crate::operation::{Operation, OperationError, OperationStatus};
use crate::registry::Id;
use crate::repo::SyncJob;
use crate::summarizer::SummaryCache;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationView {
    pub id: Id,
    pub label: String,
    pub status: OperationStatus,
    pub output: String,
    pub summary: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionView {
    pub id: Id,
    pub notebook: String,
    pub prompt: String,
    pub status: OperationStatus,
    pub done: bool,
    pub operations: Vec<OperationView>,
}

impl ExecutionView {
    pub fn operation(&self, label: &str) -> Option<&OperationView> {
        self.operations.iter().find(|op| op.label == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncView {
    pub repo: String,
    #[serde(flatten)]
    pub operation: OperationView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Project one operation. The snapshot is taken before the summary so a
/// view that reports `done` always carries the final summary.
pub async fn operation_view(op: &Operation, summaries: &SummaryCache) -> OperationView {
    let snap = op.snapshot().await;
    let summary = summaries.summary_for(op).await;
    OperationView {
        id: snap.id,
        label: op.label().to_string(),
        status: snap.status,
        output: snap.output,
        summary,
        done: snap.done,
        error: snap.error,
    }
}

/// Project an execution. Sub-operation summaries are computed concurrently.
pub async fn execution_view(execution: &Execution, summaries: &SummaryCache) -> ExecutionView {
    let operations: Vec<OperationView> = join_all(
        execution
            .operations()
            .map(|op| operation_view(op, summaries)),
    )
    .await;
    let statuses: Vec<_> = operations.iter().map(|v| (v.done, v.status)).collect();
    let status = aggregate(&statuses);
    ExecutionView {
        id: execution.id,
        notebook: execution.notebook.name.clone(),
        prompt: execution.prompt.clone(),
        status,
        done: operations.iter().all(|v| v.done),
        operations,
    }
}

pub async fn sync_view(job: &SyncJob, summaries: &SummaryCache) -> SyncView {
    let operation = operation_view(&job.operation, summaries).await;
    let outcome = job.outcome();
    SyncView {
        repo: job.repo.full_name(),
        operation,
        path: outcome.map(|o| o.path.clone()),
        revision: outcome.map(|o| o.revision.clone()),
    }
}
