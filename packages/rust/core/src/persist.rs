//! Run records on disk: one JSON document per run at `<runs_dir>/<run_id>.json`.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use entitylens_shared::{EntityLensError, Result, RunRecord};

/// Path of the record for `run_id`.
pub fn record_path(runs_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir.join(format!("{run_id}.json"))
}

pub fn record_exists(runs_dir: &Path, run_id: &str) -> bool {
    record_path(runs_dir, run_id).is_file()
}

/// Write a record atomically (write to temp, then rename), so a crash never
/// leaves a partial record behind.
#[instrument(skip_all, fields(run_id = %run_id))]
pub fn write_run_record(runs_dir: &Path, run_id: &str, record: &RunRecord) -> Result<PathBuf> {
    if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
        return Err(EntityLensError::validation(format!(
            "invalid run id `{run_id}`"
        )));
    }

    std::fs::create_dir_all(runs_dir).map_err(|e| EntityLensError::io(runs_dir, e))?;

    let json = serde_json::to_string_pretty(record).map_err(|e| {
        EntityLensError::validation(format!("JSON serialization failed: {e}"))
    })?;

    let target = record_path(runs_dir, run_id);
    let temp = runs_dir.join(format!(".{run_id}.json.tmp"));
    std::fs::write(&temp, json).map_err(|e| EntityLensError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| EntityLensError::io(&target, e))?;

    debug!(path = %target.display(), "run record written");
    Ok(target)
}

pub fn read_run_record(path: &Path) -> Result<RunRecord> {
    let content = std::fs::read_to_string(path).map_err(|e| EntityLensError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| EntityLensError::parse(format!("{}: {e}", path.display())))
}

/// Load every record in `runs_dir`, sorted by run id.
///
/// Records that fail to decode are logged and skipped.
#[instrument(skip_all, fields(runs_dir = %runs_dir.display()))]
pub fn load_run_records(runs_dir: &Path) -> Result<Vec<(String, RunRecord)>> {
    let entries = std::fs::read_dir(runs_dir).map_err(|e| EntityLensError::io(runs_dir, e))?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for entry in entries {
        let path = entry.map_err(|e| EntityLensError::io(runs_dir, e))?.path();
        let Some(run_id) = run_id_of(&path) else {
            continue;
        };
        match read_run_record(&path) {
            Ok(record) => records.push((run_id, record)),
            Err(e) => {
                skipped += 1;
                warn!(path = %path.display(), error = %e, "unreadable run record, skipping");
            }
        }
    }

    records.sort_by(|a, b| a.0.cmp(&b.0));
    info!(loaded = records.len(), skipped, "run records loaded");
    Ok(records)
}

/// `<run_id>.json` → `run_id`; hidden and temp files are ignored.
fn run_id_of(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}
