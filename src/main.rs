use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use trybook::config::Config;
use trybook::repo::RepoRef;
use trybook::{server, tlog, tlog_warn, Error, Id, Result, Trybook};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Trybook - try coding agents on GitHub repositories in isolated worktrees
#[derive(Parser, Debug)]
#[command(name = "trybook")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TRYBOOK_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to <workdir>/trybook.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Directory for mirrors, notebooks and the log (default ~/.trybook)
    #[arg(short = 'w', long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Config file (default ~/.trybook/trybook.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Clone or update a repository mirror
    Sync {
        /// owner/repo or a GitHub URL
        repo: String,
    },

    /// Create a notebook from a synced mirror
    Notebook {
        /// owner/repo or a GitHub URL
        repo: String,
    },

    /// Send a prompt to a notebook's agents and wait for the result
    Run {
        /// owner/repo/notebook-name
        notebook: String,

        /// The prompt text
        prompt: String,
    },

    /// Write the default config file if there is none
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = &cli.workdir {
        config.workdir = Some(dir.to_string_lossy().to_string());
    }
    trybook::log::init(&config.workdir()?, cli.debug);
    tlog!("Trybook starting (debug={})", cli.debug);

    let command = cli.command.unwrap_or(Command::Serve { listen: None });
    if command == Command::InitConfig {
        let path = match cli.config {
            Some(path) => path,
            None => Config::config_path()?,
        };
        return init_config(&config, &path);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match command {
            Command::Serve { listen } => run_serve(config, listen).await,
            Command::Sync { repo } => run_sync(&config, &repo).await,
            Command::Notebook { repo } => run_notebook(&config, &repo).await,
            Command::Run { notebook, prompt } => run_prompt(&config, &notebook, &prompt).await,
            Command::InitConfig => Ok(()),
        }
    })
}

fn init_config(config: &Config, path: &Path) -> Result<()> {
    if path.exists() {
        println!("Config already exists at {}", path.display());
    } else {
        config.save_to(path)?;
        println!("Wrote default config to {}", path.display());
    }
    Ok(())
}

fn warn_missing_tools(trybook: &Trybook) {
    let orchestrator = trybook.orchestrator();
    for agent in orchestrator.agents() {
        if !agent.is_available() {
            tlog_warn!("Agent {} not found on PATH ({})", agent.name(), agent.binary());
            eprintln!(
                "warning: agent '{}' needs '{}', which is not on PATH",
                agent.name(),
                agent.binary()
            );
        }
    }
    for binary in orchestrator.build_tool().binaries() {
        if which::which(binary).is_err() {
            tlog_warn!("Build tool {} not found on PATH", binary);
        }
    }
}

async fn run_serve(config: Config, listen: Option<SocketAddr>) -> Result<()> {
    let addr = match listen {
        Some(addr) => addr,
        None => config
            .listen
            .parse()
            .map_err(|e| Error::Validation(format!("listen address {:?}: {}", config.listen, e)))?,
    };
    let trybook = Trybook::new(&config)?;
    warn_missing_tools(&trybook);
    server::serve(Arc::new(trybook), addr).await
}

async fn run_sync(config: &Config, repo: &str) -> Result<()> {
    let trybook = Trybook::new(config)?;
    let id = trybook.start_sync(repo).await?;
    let view = loop {
        let view = trybook.sync_status(&id).await?;
        if view.operation.done {
            break view;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    print_json(&view)
}

async fn run_notebook(config: &Config, repo: &str) -> Result<()> {
    let trybook = Trybook::new(config)?;
    let repo = RepoRef::parse(repo)?;
    let notebook = trybook.create_notebook(&repo.owner, &repo.name).await?;
    print_json(&notebook)
}

async fn run_prompt(config: &Config, notebook: &str, prompt: &str) -> Result<()> {
    let (owner, repo, name) = split_notebook(notebook)?;
    let trybook = Trybook::new(config)?;
    warn_missing_tools(&trybook);
    let id = trybook.start_prompt(owner, repo, name, prompt).await?;
    eprintln!("execution {}", id);
    let view = wait_for_execution(&trybook, &id).await?;
    print_json(&view)
}

async fn wait_for_execution(trybook: &Trybook, id: &Id) -> Result<trybook::status::ExecutionView> {
    let mut last = Vec::new();
    loop {
        let view = trybook.execution_status(id).await?;
        if view.done {
            return Ok(view);
        }
        let summaries: Vec<String> = view
            .operations
            .iter()
            .map(|op| format!("{}: {}", op.label, op.summary))
            .collect();
        if summaries != last {
            for line in &summaries {
                eprintln!("[{}] {}", view.status, line);
            }
            last = summaries;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn split_notebook(notebook: &str) -> Result<(&str, &str, &str)> {
    let mut parts = notebook.trim_matches('/').splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), Some(name)) if !name.contains('/') => Ok((owner, repo, name)),
        _ => Err(Error::Validation(format!(
            "expected owner/repo/notebook, got {:?}",
            notebook
        ))),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
