//! Runs the pipeline over every video in the acquisition layout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use entitylens_shared::{EntityLensError, Result, RunMeta, RunRecord};

use crate::input::{discover_run_ids, load_run_input};
use crate::persist::{record_exists, write_run_record};
use crate::pipeline::{Pipeline, SilentProgress};

/// Configuration for [`run_batch`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub data_dir: PathBuf,
    pub transcripts_dir: PathBuf,
    pub runs_dir: PathBuf,
    /// Maximum runs in flight.
    pub concurrency: usize,
    /// Re-run ids that already have a record.
    pub force: bool,
    /// Model name stored in each record's metadata.
    pub model: String,
}

/// Outcome of a batch. Lists are in run-id order.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, EntityLensError)>,
    pub skipped: Vec<String>,
}

/// Progress callback for batch runs.
pub trait BatchProgress: Send + Sync {
    /// Called once the work list is known.
    fn planned(&self, total: usize, skipped: usize);
    /// Called when a run finishes, successfully or not.
    fn run_finished(&self, run_id: &str, ok: bool);
}

impl BatchProgress for SilentProgress {
    fn planned(&self, _total: usize, _skipped: usize) {}
    fn run_finished(&self, _run_id: &str, _ok: bool) {}
}

/// Run every discovered id that has no record yet (all ids with `force`).
///
/// A failed run is logged and recorded in the result; the batch continues.
/// Records are written only for runs that completed every stage.
#[instrument(skip_all, fields(concurrency = config.concurrency, force = config.force))]
pub async fn run_batch(
    pipeline: Arc<Pipeline>,
    config: &BatchConfig,
    progress: Arc<dyn BatchProgress>,
) -> Result<BatchResult> {
    let start = Instant::now();
    let ids = discover_run_ids(&config.transcripts_dir)?;

    let mut result = BatchResult::default();
    let mut pending = Vec::new();
    for id in ids {
        if !config.force && record_exists(&config.runs_dir, &id) {
            result.skipped.push(id);
        } else {
            pending.push(id);
        }
    }

    info!(
        pending = pending.len(),
        skipped = result.skipped.len(),
        "starting batch"
    );
    progress.planned(pending.len(), result.skipped.len());

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut handles = Vec::with_capacity(pending.len());

    for id in pending {
        let sem = semaphore.clone();
        let pipeline = pipeline.clone();
        let progress = progress.clone();
        let config = config.clone();

        handles.push((
            id.clone(),
            tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| EntityLensError::validation(format!("batch cancelled: {e}")))?;
                let outcome = run_one(&pipeline, &config, &id).await;
                progress.run_finished(&id, outcome.is_ok());
                outcome
            }),
        ));
    }

    for (id, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(EntityLensError::validation(format!("run task failed: {e}"))),
        };
        match outcome {
            Ok(path) => {
                info!(run_id = %id, path = %path.display(), "run persisted");
                result.succeeded.push(id);
            }
            Err(e) => {
                warn!(run_id = %id, error = %e, "run failed");
                result.failed.push((id, e));
            }
        }
    }

    info!(
        succeeded = result.succeeded.len(),
        failed = result.failed.len(),
        skipped = result.skipped.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "batch complete"
    );
    Ok(result)
}

async fn run_one(pipeline: &Pipeline, config: &BatchConfig, id: &str) -> Result<PathBuf> {
    let input = load_run_input(&config.data_dir, &config.transcripts_dir, id)?;
    let state = pipeline.run_input(&input).await?;
    let record = RunRecord::from_state(
        &state,
        Some(RunMeta {
            run_id: id.to_string(),
            model: config.model.clone(),
            completed_at: Utc::now(),
        }),
    );
    write_run_record(&config.runs_dir, id, &record)
}
