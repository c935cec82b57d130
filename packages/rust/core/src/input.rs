//! Loading run inputs from the acquisition layout.
//!
//! ```text
//! <data_dir>/tiktok_data_<id>.json          metadata; `basic_info.description`
//! <transcripts_dir>/tiktok_video_<id>.txt   speech transcript
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use entitylens_shared::{EntityLensError, Result, RunInput};

const METADATA_PREFIX: &str = "tiktok_data_";
const TRANSCRIPT_PREFIX: &str = "tiktok_video_";

#[derive(Debug, Default, Deserialize)]
struct VideoMetadata {
    #[serde(default)]
    basic_info: BasicInfo,
}

#[derive(Debug, Default, Deserialize)]
struct BasicInfo {
    #[serde(default)]
    description: Option<String>,
}

pub fn metadata_path(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join(format!("{METADATA_PREFIX}{id}.json"))
}

pub fn transcript_path(transcripts_dir: &Path, id: &str) -> PathBuf {
    transcripts_dir.join(format!("{TRANSCRIPT_PREFIX}{id}.txt"))
}

/// Load the description and transcript for one video.
///
/// The transcript is required. A missing metadata file or description
/// yields an empty description.
pub fn load_run_input(data_dir: &Path, transcripts_dir: &Path, id: &str) -> Result<RunInput> {
    let transcript_file = transcript_path(transcripts_dir, id);
    let transcript = std::fs::read_to_string(&transcript_file)
        .map_err(|e| EntityLensError::io(&transcript_file, e))?;

    let metadata_file = metadata_path(data_dir, id);
    let description = if metadata_file.exists() {
        let raw = std::fs::read_to_string(&metadata_file)
            .map_err(|e| EntityLensError::io(&metadata_file, e))?;
        let meta: VideoMetadata = serde_json::from_str(&raw).map_err(|e| {
            EntityLensError::parse(format!("{}: {e}", metadata_file.display()))
        })?;
        meta.basic_info.description.unwrap_or_default()
    } else {
        warn!(path = %metadata_file.display(), "metadata file missing, using empty description");
        String::new()
    };

    debug!(
        id,
        description_chars = description.chars().count(),
        transcript_chars = transcript.chars().count(),
        "run input loaded"
    );
    Ok(RunInput {
        description,
        transcript,
    })
}

/// List the ids of every transcript in `transcripts_dir`, sorted.
pub fn discover_run_ids(transcripts_dir: &Path) -> Result<Vec<String>> {
    let entries =
        std::fs::read_dir(transcripts_dir).map_err(|e| EntityLensError::io(transcripts_dir, e))?;

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EntityLensError::io(transcripts_dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = name
            .strip_prefix(TRANSCRIPT_PREFIX)
            .and_then(|rest| rest.strip_suffix(".txt"))
            .filter(|id| !id.is_empty())
        {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn loads_description_and_transcript() {
        let root = temp_dir("input");
        let data = root.join("data");
        let transcripts = root.join("transcripts");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::create_dir_all(&transcripts).unwrap();

        std::fs::write(
            metadata_path(&data, "20250913_005000"),
            r##"{"basic_info": {"description": "Cena en París", "hashtags": ["#food"]}}"##,
        )
        .unwrap();
        std::fs::write(transcript_path(&transcripts, "20250913_005000"), "Hola a todos").unwrap();

        let input = load_run_input(&data, &transcripts, "20250913_005000").unwrap();
        assert_eq!(input.description, "Cena en París");
        assert_eq!(input.transcript, "Hola a todos");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_description_is_empty() {
        let root = temp_dir("input");
        std::fs::write(root.join("tiktok_data_a.json"), r#"{"basic_info": {}}"#).unwrap();
        std::fs::write(root.join("tiktok_video_a.txt"), "t").unwrap();
        std::fs::write(root.join("tiktok_video_b.txt"), "t").unwrap();

        assert_eq!(load_run_input(&root, &root, "a").unwrap().description, "");
        // No metadata file at all.
        assert_eq!(load_run_input(&root, &root, "b").unwrap().description, "");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_transcript_is_an_error() {
        let root = temp_dir("input");
        let err = load_run_input(&root, &root, "nope").unwrap_err();
        assert!(matches!(err, EntityLensError::Io { .. }));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn malformed_metadata_is_a_parse_error() {
        let root = temp_dir("input");
        std::fs::write(root.join("tiktok_data_x.json"), "{not json").unwrap();
        std::fs::write(root.join("tiktok_video_x.txt"), "t").unwrap();
        let err = load_run_input(&root, &root, "x").unwrap_err();
        assert!(matches!(err, EntityLensError::Parse { .. }));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn discovers_sorted_ids() {
        let root = temp_dir("discover");
        for name in [
            "tiktok_video_20250914_120000.txt",
            "tiktok_video_20250913_005000.txt",
            "tiktok_video_.txt",
            "notes.txt",
            "tiktok_video_20250915.mp4",
        ] {
            std::fs::write(root.join(name), "").unwrap();
        }

        let ids = discover_run_ids(&root).unwrap();
        assert_eq!(ids, vec!["20250913_005000", "20250914_120000"]);

        let _ = std::fs::remove_dir_all(&root);
    }
}
