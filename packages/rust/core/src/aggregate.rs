//! Merges persisted runs into one entity-keyed table.
//!
//! Runs are processed in run-id order, which fixes every tie-break:
//! - narratives for a key are space-joined in run order
//! - the first run to describe a key (smallest run id) provides
//!   `entity_description`, and the first real web summary wins
//! - later disagreeing values are counted as collisions and logged

use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use entitylens_shared::{
    AggregateRow, EntityKey, EntityLensError, NO_RELEVANT_CONTENT, Result, RunRecord,
};

use crate::literal::parse_string_map;

/// Merged table plus what had to be resolved or skipped to build it.
#[derive(Debug, Default)]
pub struct AggregateReport {
    /// One row per key, sorted by key.
    pub rows: Vec<AggregateRow>,
    /// Disagreements on `entity_description` or `web_summary` across runs.
    pub collisions: usize,
    /// Runs whose summary payload could not be parsed.
    pub malformed_runs: Vec<String>,
}

#[derive(Debug, Default)]
struct Accumulator {
    description: Option<String>,
    narratives: Vec<String>,
    web_summary: Option<String>,
    saw_sentinel: bool,
}

/// Merge `runs`. Input order does not matter; runs are sorted by id first.
#[instrument(skip_all, fields(runs = runs.len()))]
pub fn aggregate(runs: &[(String, RunRecord)]) -> AggregateReport {
    let mut ordered: Vec<&(String, RunRecord)> = runs.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    let mut table: BTreeMap<EntityKey, Accumulator> = BTreeMap::new();
    let mut report = AggregateReport::default();

    for (run_id, record) in ordered {
        let raw_payload = match parse_string_map(&record.summary) {
            Ok(map) => map,
            Err(e) => {
                let err = EntityLensError::malformed("summary", e.to_string());
                warn!(
                    run_id = %run_id,
                    error = %err,
                    "summary payload unreadable, skipping its narratives"
                );
                report.malformed_runs.push(run_id.clone());
                IndexMap::new()
            }
        };
        let payload = normalize_payload(&raw_payload);

        let mut seen: HashSet<EntityKey> = HashSet::new();
        for entity in &record.entities {
            let key = EntityKey::new(entity);
            if !seen.insert(key.clone()) {
                continue;
            }
            let acc = table.entry(key.clone()).or_default();

            if acc.description.is_none() {
                acc.description = Some(entity.clone());
            } else if let Some(existing) = acc.description.as_ref().filter(|d| *d != entity) {
                report.collisions += 1;
                warn!(
                    run_id = %run_id,
                    key = %key,
                    kept = %existing,
                    ignored = %entity,
                    "entity description collision"
                );
            }

            // Exact entity string first, then the normalized key.
            let narrative = raw_payload
                .get(entity)
                .map(String::as_str)
                .or_else(|| payload.get(&key).copied());
            if let Some(narrative) = narrative {
                push_narrative(acc, narrative);
            }

            match record.entities_web_summaries.get(entity).map(String::as_str) {
                Some(NO_RELEVANT_CONTENT) => acc.saw_sentinel = true,
                Some(summary) if !summary.trim().is_empty() => {
                    if acc.web_summary.is_none() {
                        acc.web_summary = Some(summary.to_string());
                    } else if acc.web_summary.as_deref() != Some(summary) {
                        report.collisions += 1;
                        warn!(
                            run_id = %run_id,
                            key = %key,
                            "web summary collision, keeping earlier run"
                        );
                    }
                }
                _ => {}
            }
        }

        // Narratives for keys the run's entity list does not mention.
        for (key, narrative) in &payload {
            if seen.contains(key) {
                continue;
            }
            debug!(run_id = %run_id, key = %key, "key only present in summary payload");
            push_narrative(table.entry(key.clone()).or_default(), narrative);
        }
    }

    report.rows = table
        .into_iter()
        .map(|(key, acc)| AggregateRow {
            entity: key.entity().to_string(),
            entity_description: acc.description.unwrap_or_default(),
            location_info: key.location_info().to_string(),
            summary: acc.narratives.join(" "),
            web_summary: acc.web_summary.unwrap_or_else(|| {
                if acc.saw_sentinel {
                    NO_RELEVANT_CONTENT.to_string()
                } else {
                    String::new()
                }
            }),
        })
        .collect();

    info!(
        rows = report.rows.len(),
        collisions = report.collisions,
        malformed_runs = report.malformed_runs.len(),
        "aggregation complete"
    );
    report
}

/// Key the payload by normalized entity; the first entry for a key wins.
fn normalize_payload(map: &IndexMap<String, String>) -> IndexMap<EntityKey, &str> {
    let mut out = IndexMap::with_capacity(map.len());
    for (entity, narrative) in map {
        out.entry(EntityKey::new(entity)).or_insert(narrative.as_str());
    }
    out
}

fn push_narrative(acc: &mut Accumulator, narrative: &str) {
    if !narrative.trim().is_empty() {
        acc.narratives.push(narrative.to_string());
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Write rows as CSV with a header line.
pub fn write_csv<W: Write>(rows: &[AggregateRow], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows {
        csv.serialize(row)
            .map_err(|e| EntityLensError::validation(format!("CSV serialization failed: {e}")))?;
    }
    csv.flush()
        .map_err(|e| EntityLensError::validation(format!("CSV flush failed: {e}")))?;
    Ok(())
}

/// Write rows as a pretty-printed JSON array.
pub fn write_json<W: Write>(rows: &[AggregateRow], writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, rows)
        .map_err(|e| EntityLensError::validation(format!("JSON serialization failed: {e}")))
}
