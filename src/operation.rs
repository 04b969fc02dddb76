//! Tracked background units of work.
//!
//! An [`Operation`] wraps one external process run (or, for repository sync,
//! a short sequence of runs). Its mutable state sits behind its own lock: the
//! background task that owns the operation is the only writer, pollers only
//! read. Once `done` is set the status, output and error are frozen; the only
//! later change is caching the final summary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};

use crate::registry::Id;
use crate::{tlog_debug, tlog_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    #[default]
    Running,
    Success,
    Error,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Running => write!(f, "running"),
            OperationStatus::Success => write!(f, "success"),
            OperationStatus::Error => write!(f, "error"),
        }
    }
}

/// Why an operation ended in `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The process could not be started.
    Spawn,
    /// The process exited with a non-zero status.
    Exit,
    /// The owning task cancelled the run.
    Cancelled,
    /// The run exceeded its time bound.
    Timeout,
    /// A filesystem step around the process failed.
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub kind: FailureKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Framing used when summarizing an operation's output. Fixed when the
/// operation is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryRole {
    Agent,
    Build,
}

#[derive(Debug, Default)]
struct OperationState {
    status: OperationStatus,
    output: String,
    done: bool,
    error: Option<OperationError>,
}

/// Point-in-time copy of an operation's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    pub id: Id,
    pub status: OperationStatus,
    pub output: String,
    pub done: bool,
    pub error: Option<OperationError>,
}

#[derive(Debug)]
struct OperationInner {
    id: Id,
    label: String,
    role: SummaryRole,
    state: RwLock<OperationState>,
    summary: OnceCell<String>,
}

/// Shared handle to one operation. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl Operation {
    pub fn new(id: Id, label: impl Into<String>, role: SummaryRole) -> Self {
        let label = label.into();
        tlog_debug!("Operation::new id={} label={} role={:?}", id.short(), label, role);
        Self {
            inner: Arc::new(OperationInner {
                id,
                label,
                role,
                state: RwLock::new(OperationState::default()),
                summary: OnceCell::new(),
            }),
        }
    }

    pub fn id(&self) -> Id {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn role(&self) -> SummaryRole {
        self.inner.role
    }

    /// Append one line of output. Ignored once the operation is done.
    pub async fn append_line(&self, line: &str) {
        let mut state = self.inner.state.write().await;
        if state.done {
            tlog_warn!(
                "Operation {} ({}) dropped output after completion",
                self.inner.id.short(),
                self.inner.label
            );
            return;
        }
        state.output.push_str(line);
        state.output.push('\n');
    }

    /// Move to the terminal state. Returns false (and changes nothing) if the
    /// operation was already done.
    pub async fn finish(&self, result: std::result::Result<(), OperationError>) -> bool {
        let mut state = self.inner.state.write().await;
        if state.done {
            tlog_warn!(
                "Operation {} ({}) finished twice; keeping {}",
                self.inner.id.short(),
                self.inner.label,
                state.status
            );
            return false;
        }
        match result {
            Ok(()) => state.status = OperationStatus::Success,
            Err(err) => {
                state.status = OperationStatus::Error;
                state.error = Some(err);
            }
        }
        state.done = true;
        tlog_debug!(
            "Operation {} ({}) finished status={} output_bytes={}",
            self.inner.id.short(),
            self.inner.label,
            state.status,
            state.output.len()
        );
        true
    }

    pub async fn snapshot(&self) -> OperationSnapshot {
        let state = self.inner.state.read().await;
        OperationSnapshot {
            id: self.inner.id,
            status: state.status,
            output: state.output.clone(),
            done: state.done,
            error: state.error.clone(),
        }
    }

    pub fn cached_summary(&self) -> Option<&str> {
        self.inner.summary.get().map(String::as_str)
    }

    /// Run `init` at most once over the operation's lifetime and keep its
    /// result. Concurrent callers wait for the first one.
    pub(crate) async fn summary_or_init<F, Fut>(&self, init: F) -> String
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = String>,
    {
        self.inner.summary.get_or_init(init).await.clone()
    }
}
