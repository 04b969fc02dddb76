use std::path::Path;

use crate::config::{AgentConfig, BuildConfig, Config};
use crate::runner::CommandSpec;

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const PATTERN_PLACEHOLDER: &str = "{pattern}";

/// A configured coding agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    name: String,
    base_command: Vec<String>,
}

impl Agent {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            name: config.name.clone(),
            base_command: config.command.clone(),
        }
    }

    pub fn all(config: &Config) -> Vec<Self> {
        config.agents.iter().map(Self::from_config).collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binary(&self) -> &str {
        self.base_command.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Argv for one prompt: `{prompt}` arguments are substituted, otherwise
    /// the prompt is appended as the last argument.
    pub fn argv(&self, prompt: &str) -> Vec<String> {
        substitute_or_append(&self.base_command, PROMPT_PLACEHOLDER, prompt)
    }

    pub fn command(&self, prompt: &str, notebook: &Path) -> Option<CommandSpec> {
        CommandSpec::from_argv(&self.argv(prompt)).map(|spec| spec.current_dir(notebook))
    }

    pub fn is_available(&self) -> bool {
        which::which(self.binary()).is_ok()
    }
}

/// The build tool behind the `test <pattern>` trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTool {
    query: Vec<String>,
    test: Vec<String>,
}

impl BuildTool {
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            query: config.query.clone(),
            test: config.test.clone(),
        }
    }

    pub fn query_command(&self, pattern: &str, notebook: &Path) -> Option<CommandSpec> {
        let argv = self
            .query
            .iter()
            .map(|arg| arg.replace(PATTERN_PLACEHOLDER, pattern))
            .collect::<Vec<_>>();
        CommandSpec::from_argv(&argv).map(|spec| spec.current_dir(notebook))
    }

    pub fn test_command(&self, targets: &[String], notebook: &Path) -> Option<CommandSpec> {
        CommandSpec::from_argv(&self.test)
            .map(|spec| spec.args(targets.iter().cloned()).current_dir(notebook))
    }

    pub fn binaries(&self) -> impl Iterator<Item = &str> {
        self.query
            .first()
            .into_iter()
            .chain(self.test.first())
            .map(String::as_str)
    }
}

fn substitute_or_append(base: &[String], placeholder: &str, value: &str) -> Vec<String> {
    if base.iter().any(|arg| arg.contains(placeholder)) {
        base.iter()
            .map(|arg| arg.replace(placeholder, value))
            .collect()
    } else {
        let mut argv = base.to_vec();
        argv.push(value.to_string());
        argv
    }
}
