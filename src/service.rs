//! The engine behind the HTTP surface and the CLI.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::execution::{Execution, Orchestrator};
use crate::notebook::{self, Notebook};
use crate::operation::{Operation, SummaryRole};
use crate::registry::{Id, Registry};
use crate::repo::{Layout, RepoRef, RepoSync, SyncJob};
use crate::search::{RepoSearch, RepoSuggestion};
use crate::status::{execution_view, sync_view, ExecutionView, SyncView};
use crate::summarizer::{CommandSummarizer, Summarize, SummaryCache};
use crate::{tlog, Error, Result};

const SYNC_LABEL: &str = "sync";

/// One service instance owns every registry; nothing is global.
pub struct Trybook {
    sync: Arc<RepoSync>,
    orchestrator: Orchestrator,
    summaries: SummaryCache,
    search: RepoSearch,
    syncs: Registry<SyncJob>,
    executions: Registry<Execution>,
}

impl Trybook {
    pub fn new(config: &Config) -> Result<Self> {
        let summarizer = CommandSummarizer::new(config.summarizer.clone(), config.summary_timeout());
        Self::with_summarizer(config, Arc::new(summarizer))
    }

    /// Build with a custom summarization backend.
    pub fn with_summarizer(config: &Config, summarizer: Arc<dyn Summarize>) -> Result<Self> {
        config.validate()?;
        let layout = Layout::new(config.workdir()?);
        tlog!("Trybook workdir={}", layout.root().display());
        Ok(Self {
            sync: Arc::new(RepoSync::new(
                layout,
                config.remote_url.clone(),
                config.sync_timeout(),
            )),
            orchestrator: Orchestrator::from_config(config),
            summaries: SummaryCache::new(summarizer, config.summary_timeout()),
            search: RepoSearch::new(config.search_limit, config.search_timeout()),
            syncs: Registry::new(),
            executions: Registry::new(),
        })
    }

    pub fn layout(&self) -> &Layout {
        self.sync.layout()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn search(&self, query: &str) -> Vec<RepoSuggestion> {
        self.search.suggest(query).await
    }

    /// Start a clone-or-update of `repo` in the background.
    pub async fn start_sync(&self, repo: &str) -> Result<Id> {
        let repo = RepoRef::parse(repo)?;
        let job = self
            .syncs
            .create(|id| SyncJob::new(repo.clone(), Operation::new(id, SYNC_LABEL, SummaryRole::Build)))
            .await;
        let id = job.operation.id();
        tlog!("Sync {} started for {}", id.short(), repo);

        let sync = self.sync.clone();
        tokio::spawn(async move {
            sync.run(&job, CancellationToken::new()).await;
        });
        Ok(id)
    }

    pub async fn sync_status(&self, id: &Id) -> Result<SyncView> {
        let job = self
            .syncs
            .get(id)
            .await
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;
        Ok(sync_view(&job, &self.summaries).await)
    }

    pub async fn create_notebook(&self, owner: &str, repo: &str) -> Result<Notebook> {
        let repo = RepoRef::new(owner, repo)?;
        notebook::create(&self.sync, &repo).await
    }

    /// Descriptor of an existing notebook.
    pub fn notebook(&self, owner: &str, repo: &str, name: &str) -> Result<Notebook> {
        let repo = RepoRef::new(owner, repo)?;
        let notebook = Notebook::describe(self.layout(), &repo, name)?;
        if !notebook.exists {
            return Err(Error::NotebookNotFound(format!("{}/{}", repo, name)));
        }
        Ok(notebook)
    }

    /// Dispatch `prompt` to the notebook's agents in the background.
    pub async fn start_prompt(&self, owner: &str, repo: &str, name: &str, prompt: &str) -> Result<Id> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::Validation("prompt is required".to_string()));
        }
        let notebook = self.notebook(owner, repo, name)?;
        let execution = self
            .executions
            .create(|id| self.orchestrator.plan(id, prompt, notebook))
            .await;
        self.orchestrator.launch(&execution);
        Ok(execution.id)
    }

    pub async fn execution(&self, id: &Id) -> Result<Execution> {
        self.executions
            .get(id)
            .await
            .ok_or_else(|| Error::ExecutionNotFound(id.to_string()))
    }

    pub async fn execution_status(&self, id: &Id) -> Result<ExecutionView> {
        let execution = self.execution(id).await?;
        Ok(execution_view(&execution, &self.summaries).await)
    }
}
