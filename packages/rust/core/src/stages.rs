//! The four stages of an enrichment run.
//!
//! Each stage reads the accumulated [`RunState`] and returns the
//! [`StateUpdate`] it is responsible for; the orchestrator merges updates.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use entitylens_extract::{DocumentFetcher, RelevanceOptions, download_relevant};
use entitylens_providers::{LanguageModel, SearchProvider};
use entitylens_shared::{
    EntityLensError, EntityMap, GatherMode, NO_RELEVANT_CONTENT, Result, RetrievedDocument,
    RunState, StateUpdate,
};

use crate::literal::parse_string_list;
use crate::prompts::Template;

/// Separator placed between framed documents in gathered content.
pub const DOCUMENT_SEPARATOR: &str = "NEW DOCUMENT:\n";

/// One step of the run.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs and progress output.
    fn name(&self) -> &'static str;

    async fn run(&self, state: &RunState) -> Result<StateUpdate>;
}

// ---------------------------------------------------------------------------
// Entity extraction
// ---------------------------------------------------------------------------

/// Extracts `"<name>,<location>"` strings from the run text.
pub struct NerStage {
    llm: Arc<dyn LanguageModel>,
    prompt: String,
}

impl NerStage {
    pub fn new(llm: Arc<dyn LanguageModel>, prompt: String) -> Self {
        Self { llm, prompt }
    }
}

#[async_trait]
impl Stage for NerStage {
    fn name(&self) -> &'static str {
        "ner"
    }

    #[instrument(skip_all, fields(stage = "ner"))]
    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let response = self.llm.complete(&self.prompt, Some(state.text.as_str())).await?;
        let entities = parse_entities(&response)?;
        info!(count = entities.len(), "entities extracted");
        Ok(StateUpdate {
            entities: Some(entities),
            ..Default::default()
        })
    }
}

/// Parse the model's entity list. Blank entries are dropped and duplicates
/// collapse to their first occurrence.
pub fn parse_entities(response: &str) -> Result<Vec<String>> {
    let raw = parse_string_list(response)
        .map_err(|e| EntityLensError::malformed("ner", e.to_string()))?;

    let mut entities: Vec<String> = Vec::with_capacity(raw.len());
    for entity in raw {
        let entity = entity.trim();
        if entity.is_empty() {
            continue;
        }
        if entities.iter().any(|seen| seen == entity) {
            debug!(entity, "duplicate entity dropped");
            continue;
        }
        entities.push(entity.to_string());
    }

    if entities.is_empty() {
        return Err(EntityLensError::DegenerateRun(
            "no entities found in the run text".into(),
        ));
    }
    Ok(entities)
}

// ---------------------------------------------------------------------------
// Grounded summarization
// ---------------------------------------------------------------------------

/// Produces the per-entity narrative payload from the run text alone.
pub struct SummaryStage {
    llm: Arc<dyn LanguageModel>,
    template: Template,
}

impl SummaryStage {
    pub fn new(llm: Arc<dyn LanguageModel>, template: Template) -> Self {
        Self { llm, template }
    }
}

#[async_trait]
impl Stage for SummaryStage {
    fn name(&self) -> &'static str {
        "summary"
    }

    #[instrument(skip_all, fields(stage = "summary", entities = state.entities.len()))]
    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let bullets = bullet_list(&state.entities);
        let system = self
            .template
            .render(&[("input_text", state.text.as_str()), ("entities", bullets.as_str())]);

        // Stored verbatim; the payload is only parsed at aggregation time.
        let summary = self.llm.complete(&system, None).await?;
        debug!(chars = summary.chars().count(), "summary payload received");
        Ok(StateUpdate {
            summary: Some(summary),
            ..Default::default()
        })
    }
}

/// `- <entity>` lines joined by newlines.
pub fn bullet_list(entities: &[String]) -> String {
    entities
        .iter()
        .map(|e| format!("- {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Web gathering
// ---------------------------------------------------------------------------

/// Settings for [`WebGatherStage`].
#[derive(Debug, Clone)]
pub struct GatherOptions {
    /// Appended to each entity to form the search query.
    pub query_suffix: String,
    pub mode: GatherMode,
    /// Pages fetched per entity in ranked mode.
    pub max_documents: usize,
    pub relevance: RelevanceOptions,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            query_suffix: " review".into(),
            mode: GatherMode::Snippets,
            max_documents: 3,
            relevance: RelevanceOptions::default(),
        }
    }
}

/// Searches the web for every entity and stores the framed results.
pub struct WebGatherStage {
    search: Arc<dyn SearchProvider>,
    fetcher: Option<Arc<dyn DocumentFetcher>>,
    options: GatherOptions,
}

impl WebGatherStage {
    /// Ranked mode requires a fetcher.
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Option<Arc<dyn DocumentFetcher>>,
        options: GatherOptions,
    ) -> Result<Self> {
        if options.mode == GatherMode::Ranked && fetcher.is_none() {
            return Err(EntityLensError::config(
                "ranked gathering needs a document fetcher",
            ));
        }
        Ok(Self {
            search,
            fetcher,
            options,
        })
    }

    async fn gather(&self, entity: &str) -> String {
        let query = format!("{entity}{}", self.options.query_suffix);
        let hits = match self.search.search(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(entity, error = %e, "search failed, continuing with empty content");
                return String::new();
            }
        };
        debug!(entity, hits = hits.len(), "search results received");

        if let (GatherMode::Ranked, Some(fetcher)) = (self.options.mode, &self.fetcher) {
            let relevant = download_relevant(
                fetcher.as_ref(),
                &query,
                &hits,
                self.options.max_documents,
                &self.options.relevance,
            )
            .await;
            if !relevant.is_empty() {
                return frame_documents(
                    relevant
                        .iter()
                        .map(|d| (d.title.as_str(), d.content.as_str())),
                );
            }
            debug!(entity, "no usable pages, using search snippets");
        }

        frame_snippets(&hits)
    }
}

#[async_trait]
impl Stage for WebGatherStage {
    fn name(&self) -> &'static str {
        "web_gather"
    }

    #[instrument(skip_all, fields(stage = "web_gather", entities = state.entities.len()))]
    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let mut content = EntityMap::new();
        for entity in &state.entities {
            let blob = self.gather(entity).await;
            content.insert(entity.clone(), blob);
        }
        let empty = content.values().filter(|c| c.is_empty()).count();
        info!(gathered = content.len() - empty, empty, "web content gathered");
        Ok(StateUpdate {
            entity_web_content: Some(content),
            ..Default::default()
        })
    }
}

/// Frame search hits using their snippets.
pub fn frame_snippets(hits: &[RetrievedDocument]) -> String {
    frame_documents(hits.iter().map(|d| (d.title.as_str(), d.content.as_str())))
}

/// `title: <t>\ncontent: <c>\n` per document, joined by [`DOCUMENT_SEPARATOR`].
pub fn frame_documents<'a>(docs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    docs.into_iter()
        .map(|(title, content)| format!("title: {title}\ncontent: {content}\n"))
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Web summarization
// ---------------------------------------------------------------------------

/// Summarizes each entity's gathered content.
pub struct WebSummaryStage {
    llm: Arc<dyn LanguageModel>,
    template: Template,
}

impl WebSummaryStage {
    pub fn new(llm: Arc<dyn LanguageModel>, template: Template) -> Self {
        Self { llm, template }
    }
}

#[async_trait]
impl Stage for WebSummaryStage {
    fn name(&self) -> &'static str {
        "web_summary"
    }

    #[instrument(skip_all, fields(stage = "web_summary", entities = state.entities.len()))]
    async fn run(&self, state: &RunState) -> Result<StateUpdate> {
        let mut summaries = EntityMap::new();
        let mut skipped = 0usize;

        for entity in &state.entities {
            let content = state
                .entity_web_content
                .get(entity)
                .map(String::as_str)
                .unwrap_or_default();

            if content.trim().is_empty() {
                skipped += 1;
                summaries.insert(entity.clone(), NO_RELEVANT_CONTENT.to_string());
                continue;
            }

            let system = self
                .template
                .render(&[("entity", entity.as_str()), ("documents", content)]);
            let summary = self.llm.complete(&system, Some(content)).await?;
            summaries.insert(entity.clone(), summary);
        }

        info!(
            summarized = summaries.len() - skipped,
            skipped, "web summaries complete"
        );
        Ok(StateUpdate {
            entity_web_summaries: Some(summaries),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::Prompts;
    use crate::test_support::{FakeFetcher, FakeModel, FakeSearch, doc};

    fn state_with_entities(entities: &[&str]) -> RunState {
        let mut state = RunState::new("Descripción: d\nTranscripción: t");
        state.entities = entities.iter().map(|e| e.to_string()).collect();
        state
    }

    // -----------------------------------------------------------------------
    // NER
    // -----------------------------------------------------------------------

    #[test]
    fn entities_are_trimmed_and_deduplicated() {
        let entities =
            parse_entities("['Louvre,Paris', ' ', 'Eiffel Tower,Paris', 'Louvre,Paris ']").unwrap();
        assert_eq!(entities, vec!["Louvre,Paris", "Eiffel Tower,Paris"]);
    }

    #[test]
    fn unparseable_entities_are_malformed_output() {
        let err = parse_entities("Sure! The entities are Louvre and Big Ben.").unwrap_err();
        assert!(err.is_malformed_output());
        assert!(err.to_string().contains("`ner`"));

        let err = parse_entities("['Louvre,Paris', 42]").unwrap_err();
        assert!(err.is_malformed_output());
    }

    #[test]
    fn runaway_nesting_is_malformed_output() {
        let err = parse_entities(&"[".repeat(200_000)).unwrap_err();
        assert!(err.is_malformed_output());
    }

    #[test]
    fn empty_entity_list_is_degenerate() {
        assert!(matches!(
            parse_entities("[]"),
            Err(EntityLensError::DegenerateRun(_))
        ));
        assert!(matches!(
            parse_entities("['', '  ']"),
            Err(EntityLensError::DegenerateRun(_))
        ));
    }

    #[tokio::test]
    async fn ner_sends_text_as_user_turn() {
        let model = FakeModel::new(|_, _| Ok("[\"Big Ben,London,UK\"]".into()));
        let stage = NerStage::new(model.clone(), "extract places".into());
        let state = RunState::new("the text");

        let update = stage.run(&state).await.unwrap();

        assert_eq!(update.entities.unwrap(), vec!["Big Ben,London,UK"]);
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "extract places");
        assert_eq!(calls[0].1.as_deref(), Some("the text"));
    }

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn summary_is_system_only_and_verbatim() {
        let model = FakeModel::new(|_, _| Ok("  {'A,B': 'narrative'}  ".into()));
        let prompts = Prompts::builtin().unwrap();
        let stage = SummaryStage::new(model.clone(), prompts.video_summary);
        let state = state_with_entities(&["A,B", "C,D"]);

        let update = stage.run(&state).await.unwrap();

        assert_eq!(update.summary.as_deref(), Some("  {'A,B': 'narrative'}  "));
        assert!(update.entities.is_none());
        let calls = model.calls();
        assert!(calls[0].1.is_none());
        assert!(calls[0].0.contains("- A,B\n- C,D"));
        assert!(calls[0].0.contains("Transcripción: t"));
    }

    // -----------------------------------------------------------------------
    // Gathering
    // -----------------------------------------------------------------------

    #[test]
    fn framing_layout() {
        let framed = frame_snippets(&[doc("T1", "C1", None), doc("T2", "", None)]);
        assert_eq!(framed, "title: T1\ncontent: C1\nNEW DOCUMENT:\ntitle: T2\ncontent: \n");
        assert_eq!(frame_snippets(&[]), "");
    }

    #[tokio::test]
    async fn snippet_gathering_per_entity() {
        let search = Arc::new(
            FakeSearch::default()
                .with(
                    "Eiffel Tower,Paris review",
                    vec![doc("Visit", "Great views", Some("https://a.example/1"))],
                )
                .failing("Louvre,Paris review", "connection refused"),
        );
        let stage =
            WebGatherStage::new(search.clone(), None, GatherOptions::default()).unwrap();
        let state = state_with_entities(&["Eiffel Tower,Paris", "Louvre,Paris", "Nowhere,X"]);

        let update = stage.run(&state).await.unwrap();
        let content = update.entity_web_content.unwrap();

        assert_eq!(content.len(), 3);
        assert_eq!(content["Eiffel Tower,Paris"], "title: Visit\ncontent: Great views\n");
        // Search failure is absorbed.
        assert_eq!(content["Louvre,Paris"], "");
        assert_eq!(content["Nowhere,X"], "");
        assert_eq!(
            content.keys().collect::<Vec<_>>(),
            vec!["Eiffel Tower,Paris", "Louvre,Paris", "Nowhere,X"]
        );
        assert_eq!(search.queries()[1], "Louvre,Paris review");
    }

    #[tokio::test]
    async fn ranked_gathering_uses_page_text() {
        let sentence = "The Eiffel Tower review praises the summit views at night";
        let page = format!(
            "<html><body><article>{}.</article></body></html>",
            std::iter::repeat_n(sentence, 5).collect::<Vec<_>>().join(". ")
        );
        let search = Arc::new(FakeSearch::default().with(
            "Eiffel Tower review",
            vec![
                doc("Dead", "dead snippet", Some("https://dead.example/x")),
                doc("Live", "live snippet", Some("https://live.example/x")),
            ],
        ));
        let fetcher = Arc::new(FakeFetcher::default().with("https://live.example/x", &page));
        let options = GatherOptions {
            mode: GatherMode::Ranked,
            ..Default::default()
        };
        let stage = WebGatherStage::new(search, Some(fetcher), options).unwrap();

        let update = stage
            .run(&state_with_entities(&["Eiffel Tower"]))
            .await
            .unwrap();
        let content = &update.entity_web_content.unwrap()["Eiffel Tower"];

        assert!(content.starts_with("title: Live\ncontent: The Eiffel Tower review"));
        assert!(!content.contains("snippet"));
        assert!(!content.contains(DOCUMENT_SEPARATOR));
    }

    #[tokio::test]
    async fn ranked_gathering_falls_back_to_snippets() {
        let search = Arc::new(FakeSearch::default().with(
            "Louvre review",
            vec![doc("Only", "snippet text", Some("https://gone.example/"))],
        ));
        let options = GatherOptions {
            mode: GatherMode::Ranked,
            ..Default::default()
        };
        let stage =
            WebGatherStage::new(search, Some(Arc::new(FakeFetcher::default())), options).unwrap();

        let update = stage.run(&state_with_entities(&["Louvre"])).await.unwrap();
        assert_eq!(
            update.entity_web_content.unwrap()["Louvre"],
            "title: Only\ncontent: snippet text\n"
        );
    }

    #[test]
    fn ranked_without_fetcher_is_rejected() {
        let options = GatherOptions {
            mode: GatherMode::Ranked,
            ..Default::default()
        };
        assert!(WebGatherStage::new(Arc::new(FakeSearch::default()), None, options).is_err());
    }

    // -----------------------------------------------------------------------
    // Web summary
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn empty_content_short_circuits_to_sentinel() {
        let model = FakeModel::new(|_, user| Ok(format!("summary: {}", user.unwrap_or(""))));
        let prompts = Prompts::builtin().unwrap();
        let stage = WebSummaryStage::new(model.clone(), prompts.web_summary);

        let mut state = state_with_entities(&["A,X", "B,Y", "C,Z"]);
        state.entity_web_content.insert("A,X".into(), "title: t\ncontent: c\n".into());
        state.entity_web_content.insert("B,Y".into(), "  \n\t".into());
        state.entity_web_content.insert("C,Z".into(), String::new());

        let update = stage.run(&state).await.unwrap();
        let summaries = update.entity_web_summaries.unwrap();

        assert_eq!(summaries["A,X"], "summary: title: t\ncontent: c\n");
        assert_eq!(summaries["B,Y"], NO_RELEVANT_CONTENT);
        assert_eq!(summaries["C,Z"], NO_RELEVANT_CONTENT);

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("A,X"));
        assert!(calls[0].0.contains("title: t\ncontent: c"));
    }

    #[tokio::test]
    async fn web_summary_model_failure_aborts() {
        let model = FakeModel::new(|_, _| Err(EntityLensError::Llm("server down".into())));
        let stage = WebSummaryStage::new(model, Prompts::builtin().unwrap().web_summary);
        let mut state = state_with_entities(&["A,X"]);
        state.entity_web_content.insert("A,X".into(), "content".into());

        assert!(matches!(
            stage.run(&state).await,
            Err(EntityLensError::Llm(_))
        ));
    }
}
