use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{tlog_debug, Error, Result};

/// One coding agent that receives every prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// Program and arguments. A `{prompt}` argument is replaced by the
    /// prompt text, otherwise the prompt is appended.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Lists test targets; `{pattern}` is replaced by the trigger remainder.
    /// Every whitespace-separated word of its output is taken as a target.
    pub query: Vec<String>,
    /// Runs tests; the target list is appended.
    pub test: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            query: vec![
                "bazel".to_string(),
                "query".to_string(),
                "--noshow_progress".to_string(),
                "attr(name, '{pattern}', tests(//...))".to_string(),
            ],
            test: vec!["bazel".to_string(), "test".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workdir: Option<String>,
    pub listen: String,
    /// Remote URL with `{owner}` and `{repo}` placeholders.
    pub remote_url: String,
    pub sync_timeout_secs: u64,
    pub summary_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub search_limit: usize,
    pub agents: Vec<AgentConfig>,
    /// Summarizer program; the role instruction is appended and the output
    /// text is written to its stdin.
    pub summarizer: Vec<String>,
    pub build: BuildConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workdir: None,
            listen: "127.0.0.1:8080".to_string(),
            remote_url: "ssh://git@github.com/{owner}/{repo}".to_string(),
            sync_timeout_secs: 60,
            summary_timeout_secs: 10,
            search_timeout_secs: 5,
            search_limit: 5,
            agents: vec![AgentConfig {
                name: "gemini".to_string(),
                command: vec!["gemini".to_string(), "--prompt".to_string()],
            }],
            summarizer: vec![
                "llm".to_string(),
                "--model".to_string(),
                "gpt-5-nano".to_string(),
                "-s".to_string(),
            ],
            build: BuildConfig::default(),
        }
    }
}

impl Config {
    pub fn trybook_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".trybook"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::trybook_dir()?.join("trybook.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            tlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        tlog_debug!(
            "Config loaded: workdir={:?} listen={} agents={}",
            config.workdir,
            config.listen,
            config.agents.len()
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Root for mirrors (`clone/`), notebooks (`worktree/`) and the log file.
    pub fn workdir(&self) -> Result<PathBuf> {
        match &self.workdir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Self::trybook_dir(),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(Error::Validation(
                "at least one agent must be configured".to_string(),
            ));
        }
        for (i, agent) in self.agents.iter().enumerate() {
            if self.agents[..i].iter().any(|a| a.name == agent.name) {
                return Err(Error::Validation(format!(
                    "agent {:?} is configured twice",
                    agent.name
                )));
            }
            if agent.name.trim().is_empty() || agent.command.is_empty() {
                return Err(Error::Validation(format!(
                    "agent {:?} needs a name and a command",
                    agent.name
                )));
            }
            if matches!(agent.name.as_str(), "query" | "test") {
                return Err(Error::Validation(format!(
                    "agent name {:?} is reserved",
                    agent.name
                )));
            }
        }
        if self.summarizer.is_empty() || self.build.query.is_empty() || self.build.test.is_empty()
        {
            return Err(Error::Validation(
                "summarizer and build commands cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
