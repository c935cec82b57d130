//! Core domain types for EntityLens runs and the aggregated dataset.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Placeholder stored as the web summary of an entity whose gathered
/// content is empty. No model call is made for such entities.
pub const NO_RELEVANT_CONTENT: &str = "no relevant content found";

/// Ordered entity → text mapping; iteration follows `RunState::entities`.
pub type EntityMap = IndexMap<String, String>;

// ---------------------------------------------------------------------------
// RunInput
// ---------------------------------------------------------------------------

/// The two artifacts the acquisition side produces for one video.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInput {
    /// Free-form description scraped from the video page.
    pub description: String,
    /// Free-form speech transcript.
    pub transcript: String,
}

impl RunInput {
    /// Combine description and transcript into the pipeline's source text.
    ///
    /// The exact layout is part of the persisted-output contract.
    pub fn to_text(&self) -> String {
        format!(
            "Descripción: {}\nTranscripción: {}",
            self.description, self.transcript
        )
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// State threaded through the four pipeline stages of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Combined description + transcript.
    pub text: String,
    /// `"<name>,<location>"` strings from entity extraction.
    pub entities: Vec<String>,
    /// Raw summarization response (a serialized entity → narrative mapping).
    pub summary: String,
    /// Gathered web text per entity.
    pub entity_web_content: EntityMap,
    /// Web-grounded summary per entity, or [`NO_RELEVANT_CONTENT`].
    pub entity_web_summaries: EntityMap,
}

impl RunState {
    /// Fresh state for a run over `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Merge a stage's partial update; untouched fields are carried forward.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(entities) = update.entities {
            self.entities = entities;
        }
        if let Some(summary) = update.summary {
            self.summary = summary;
        }
        if let Some(content) = update.entity_web_content {
            self.entity_web_content = content;
        }
        if let Some(summaries) = update.entity_web_summaries {
            self.entity_web_summaries = summaries;
        }
    }

    /// Check that both per-entity maps hold exactly one entry per entity.
    pub fn check_correspondence(&self) -> std::result::Result<(), String> {
        for (label, map) in [
            ("entity_web_content", &self.entity_web_content),
            ("entity_web_summaries", &self.entity_web_summaries),
        ] {
            if map.len() != self.entities.len() {
                return Err(format!(
                    "{label} has {} entries for {} entities",
                    map.len(),
                    self.entities.len()
                ));
            }
            if let Some(missing) = self.entities.iter().find(|e| !map.contains_key(*e)) {
                return Err(format!("{label} has no entry for `{missing}`"));
            }
        }
        Ok(())
    }
}

/// Partial update returned by a stage. `None` fields leave state untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub entities: Option<Vec<String>>,
    pub summary: Option<String>,
    pub entity_web_content: Option<EntityMap>,
    pub entity_web_summaries: Option<EntityMap>,
}

// ---------------------------------------------------------------------------
// RetrievedDocument
// ---------------------------------------------------------------------------

/// One search hit, as rendered by the search service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Result page, when the service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// RunRecord
// ---------------------------------------------------------------------------

/// Bookkeeping stored alongside a run's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub model: String,
    pub completed_at: DateTime<Utc>,
}

/// The persisted output of one completed run.
///
/// Field names and the string-encoded `summary` match records written by
/// earlier versions of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub entities: Vec<String>,
    /// Serialized entity → narrative payload, kept as the model wrote it.
    pub summary: String,
    #[serde(rename = "entitiesWebContent")]
    pub entities_web_content: EntityMap,
    #[serde(rename = "entitiesWebSummaries")]
    pub entities_web_summaries: EntityMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RunMeta>,
}

impl RunRecord {
    /// Snapshot a completed run. The source text is not persisted.
    pub fn from_state(state: &RunState, meta: Option<RunMeta>) -> Self {
        Self {
            entities: state.entities.clone(),
            summary: state.summary.clone(),
            entities_web_content: state.entity_web_content.clone(),
            entities_web_summaries: state.entity_web_summaries.clone(),
            meta,
        }
    }
}

// ---------------------------------------------------------------------------
// EntityKey / AggregateRow
// ---------------------------------------------------------------------------

/// Normalized `"<entity>,<location>"` key used to merge runs.
///
/// Whitespace around every comma-separated part is trimmed, so
/// `"Big Ben, London"` and `"Big Ben,London"` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(raw: &str) -> Self {
        let normalized = raw
            .trim()
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(",");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the first comma.
    pub fn entity(&self) -> &str {
        self.0.split_once(',').map_or(self.0.as_str(), |(name, _)| name)
    }

    /// Everything after the first comma (empty when there is none).
    pub fn location_info(&self) -> &str {
        self.0.split_once(',').map_or("", |(_, location)| location)
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the merged, entity-keyed dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub entity: String,
    pub entity_description: String,
    pub location_info: String,
    pub summary: String,
    pub web_summary: String,
}
