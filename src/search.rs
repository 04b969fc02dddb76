//! Repository suggestions through `gh search repos`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::{CommandSpec, ProcessRunner};
use crate::{tlog_debug, tlog_warn, Error, Result};

/// Queries shorter than this return no suggestions.
pub const MIN_QUERY_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSuggestion {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(default)]
    pub stargazers_count: u64,
}

pub struct RepoSearch {
    argv: Vec<String>,
    limit: usize,
    timeout: Duration,
}

impl RepoSearch {
    pub fn new(limit: usize, timeout: Duration) -> Self {
        Self::with_command(
            vec!["gh".to_string(), "search".to_string(), "repos".to_string()],
            limit,
            timeout,
        )
    }

    /// Use a different program; the query and `gh`'s flags are appended.
    pub fn with_command(argv: Vec<String>, limit: usize, timeout: Duration) -> Self {
        Self {
            argv,
            limit,
            timeout,
        }
    }

    /// Suggestions for `query`. Never fails: short queries and any error
    /// yield an empty list.
    pub async fn suggest(&self, query: &str) -> Vec<RepoSuggestion> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Vec::new();
        }
        match self.search(query).await {
            Ok(repos) => {
                tlog_debug!("Search {:?} returned {} repos", query, repos.len());
                repos
            }
            Err(e) => {
                tlog_warn!("Search error for {:?}: {}", query, e);
                Vec::new()
            }
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<RepoSuggestion>> {
        let spec = CommandSpec::from_argv(&self.argv)
            .ok_or_else(|| Error::Validation("search command is empty".to_string()))?
            .arg(query)
            .args(["--limit".to_string(), self.limit.to_string()])
            .args(["--json", "fullName,description,url,stargazersCount"])
            .env("GH_NO_UPDATE_NOTIFIER", "1");
        let output = ProcessRunner::output(&spec, None, self.timeout).await?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: spec.display(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_results(&output.stdout, self.limit)
    }
}

fn parse_results(stdout: &[u8], limit: usize) -> Result<Vec<RepoSuggestion>> {
    let mut repos: Vec<RepoSuggestion> = serde_json::from_slice(stdout)?;
    repos.truncate(limit);
    Ok(repos)
}
