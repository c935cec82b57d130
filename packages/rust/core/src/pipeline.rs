//! End-to-end run: text → entities → grounded summary → web content → web summaries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use entitylens_extract::{DocumentFetcher, HttpFetcher, RelevanceOptions};
use entitylens_providers::{LanguageModel, OpenAiCompatClient, SearchProvider, SearxngClient};
use entitylens_shared::{AppConfig, EntityLensError, GatherMode, Result, RunInput, RunState};

use crate::prompts::Prompts;
use crate::stages::{GatherOptions, NerStage, Stage, SummaryStage, WebGatherStage, WebSummaryStage};

/// Progress callback for reporting stage boundaries.
pub trait RunProgress: Send + Sync {
    /// Called before a stage runs. `index` is 1-based.
    fn stage_started(&self, stage: &str, index: usize, total: usize);
    /// Called after a stage's update has been merged.
    fn stage_finished(&self, stage: &str, elapsed: Duration);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl RunProgress for SilentProgress {
    fn stage_started(&self, _stage: &str, _index: usize, _total: usize) {}
    fn stage_finished(&self, _stage: &str, _elapsed: Duration) {}
}

/// External capabilities a run depends on.
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Arc<dyn LanguageModel>,
    pub search: Arc<dyn SearchProvider>,
    /// Needed only for ranked gathering.
    pub fetcher: Option<Arc<dyn DocumentFetcher>>,
}

/// An ordered list of stages over a shared [`RunState`].
///
/// A pipeline holds no per-run state, so one instance can serve many
/// concurrent runs.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// The standard four-stage pipeline.
    pub fn new(caps: Capabilities, prompts: Prompts, gather: GatherOptions) -> Result<Self> {
        let Prompts {
            ner,
            video_summary,
            web_summary,
        } = prompts;

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(NerStage::new(caps.llm.clone(), ner)),
            Box::new(SummaryStage::new(caps.llm.clone(), video_summary)),
            Box::new(WebGatherStage::new(caps.search, caps.fetcher, gather)?),
            Box::new(WebSummaryStage::new(caps.llm, web_summary)),
        ];
        Ok(Self { stages })
    }

    /// Build the standard pipeline with HTTP clients from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let llm: Arc<dyn LanguageModel> =
            Arc::new(OpenAiCompatClient::new(&config.llm, &config.retry)?);
        let search: Arc<dyn SearchProvider> =
            Arc::new(SearxngClient::new(&config.search, &config.retry)?);
        let fetcher: Option<Arc<dyn DocumentFetcher>> = match config.search.gather_mode {
            GatherMode::Ranked => Some(Arc::new(HttpFetcher::new(
                config.search.fetch_timeout_secs,
                &config.retry,
            )?)),
            GatherMode::Snippets => None,
        };

        let prompts = Prompts::load(config.paths.prompts_dir.as_deref())?;
        let gather = GatherOptions {
            query_suffix: config.search.query_suffix.clone(),
            mode: config.search.gather_mode,
            max_documents: config.search.max_documents,
            relevance: RelevanceOptions::default(),
        };

        info!(
            model = %config.llm.model,
            gather_mode = ?config.search.gather_mode,
            "pipeline configured"
        );
        Self::new(
            Capabilities {
                llm,
                search,
                fetcher,
            },
            prompts,
            gather,
        )
    }

    /// A pipeline over a custom stage list.
    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `text`.
    pub async fn run(&self, text: &str) -> Result<RunState> {
        self.run_with_progress(text, &SilentProgress).await
    }

    /// Run over a description/transcript pair.
    pub async fn run_input(&self, input: &RunInput) -> Result<RunState> {
        self.run(&input.to_text()).await
    }

    /// Run every stage, reporting boundaries to `progress`.
    ///
    /// The first failing stage aborts the run. On success the per-entity
    /// maps are checked against the entity list.
    #[instrument(skip_all, fields(text_chars = text.chars().count(), stages = self.stages.len()))]
    pub async fn run_with_progress(
        &self,
        text: &str,
        progress: &dyn RunProgress,
    ) -> Result<RunState> {
        let start = Instant::now();
        let total = self.stages.len();
        let mut state = RunState::new(text);

        for (i, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            progress.stage_started(name, i + 1, total);
            let stage_start = Instant::now();

            let update = stage.run(&state).await?;
            state.apply(update);

            let elapsed = stage_start.elapsed();
            info!(stage = name, elapsed_ms = elapsed.as_millis() as u64, "stage complete");
            progress.stage_finished(name, elapsed);
        }

        state
            .check_correspondence()
            .map_err(EntityLensError::validation)?;

        info!(
            entities = state.entities.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(state)
    }
}
