//! One-sentence summaries of operation output.
//!
//! Summaries of a running operation are recomputed on every request from the
//! output seen so far and never stored. The first summary computed after the
//! operation is done is cached on the operation and returned from then on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::operation::{Operation, SummaryRole};
use crate::runner::{CommandSpec, ProcessRunner};
use crate::{tlog_debug, tlog_warn, Error, Result};

/// Returned for empty output and whenever summarization fails.
pub const FALLBACK_SUMMARY: &str = "Processing...";

/// Only the tail of very long output is sent to the summarizer.
const MAX_SUMMARY_INPUT: usize = 64 * 1024;

impl SummaryRole {
    pub fn instruction(&self) -> &'static str {
        match self {
            SummaryRole::Agent => {
                "Summarize in one sentence what this coding agent has done so far \
                 or has finished doing. If the output has nothing to summarize, \
                 say that the agent produced no notable output."
            }
            SummaryRole::Build => {
                "Summarize this build tool output in one sentence. \
                 Name any failing targets."
            }
        }
    }
}

/// Text summarization backend.
#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, text: &str, role: SummaryRole) -> Result<String>;
}

/// Runs an external summarizer (by default `llm`) with the role instruction
/// as its last argument and the text on stdin.
pub struct CommandSummarizer {
    argv: Vec<String>,
    limit: Duration,
}

impl CommandSummarizer {
    pub fn new(argv: Vec<String>, limit: Duration) -> Self {
        Self { argv, limit }
    }
}

#[async_trait]
impl Summarize for CommandSummarizer {
    async fn summarize(&self, text: &str, role: SummaryRole) -> Result<String> {
        let spec = CommandSpec::from_argv(&self.argv)
            .ok_or_else(|| Error::Validation("summarizer command is empty".to_string()))?
            .arg(role.instruction());
        let output = ProcessRunner::output(&spec, Some(text), self.limit).await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: spec.display(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Applies the caching rule on top of a [`Summarize`] backend.
#[derive(Clone)]
pub struct SummaryCache {
    backend: Arc<dyn Summarize>,
    limit: Duration,
}

impl SummaryCache {
    pub fn new(backend: Arc<dyn Summarize>, limit: Duration) -> Self {
        Self { backend, limit }
    }

    /// Summary of `op`'s current output. Never fails.
    pub async fn summary_for(&self, op: &Operation) -> String {
        if let Some(cached) = op.cached_summary() {
            return cached.to_string();
        }

        let snap = op.snapshot().await;
        let role = op.role();
        if snap.done {
            op.summary_or_init(|| async {
                let summary = self.compute(&snap.output, role).await;
                tlog_debug!("Cached final summary for op={}", op.id().short());
                summary
            })
            .await
        } else {
            self.compute(&snap.output, role).await
        }
    }

    async fn compute(&self, text: &str, role: SummaryRole) -> String {
        if text.trim().is_empty() {
            return FALLBACK_SUMMARY.to_string();
        }
        let text = tail(text, MAX_SUMMARY_INPUT);
        match tokio::time::timeout(self.limit, self.backend.summarize(text, role)).await {
            Ok(Ok(summary)) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(Ok(_)) => FALLBACK_SUMMARY.to_string(),
            Ok(Err(e)) => {
                tlog_warn!("Summarization failed: {}", e);
                FALLBACK_SUMMARY.to_string()
            }
            Err(_) => {
                tlog_warn!("Summarization timed out after {:?}", self.limit);
                FALLBACK_SUMMARY.to_string()
            }
        }
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
