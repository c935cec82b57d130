//! Instruction templates for the three model calls of a run.
//!
//! Built-in defaults can be overridden per file from a prompts directory.
//! Templates use `{name}` placeholders; `{{` and `}}` render literal braces.

use std::path::Path;

use tracing::{debug, info};

use entitylens_shared::{EntityLensError, Result};

/// File names looked up in the prompts directory.
pub const NER_PROMPT_FILE: &str = "ner_prompt.txt";
pub const VIDEO_SUMMARY_PROMPT_FILE: &str = "video_summarize_prompt.txt";
pub const WEB_SUMMARY_PROMPT_FILE: &str = "web_summarize_prompt.txt";

const DEFAULT_NER_PROMPT: &str = "\
You extract named places from short-form travel and food videos.

The user message contains the video description and its speech transcript.
List every concrete, visitable entity mentioned (restaurants, bars, cafes,
hotels, museums, monuments, shops, parks, viewpoints). For each entity write
\"<name>,<location>\" where <location> is the most specific location stated or
clearly implied (neighbourhood, city, country), comma-separated.

Answer with a Python list of strings and nothing else, for example:
['Eiffel Tower,Paris,France', 'Café de Flore,Saint-Germain,Paris']

If no entity is mentioned, answer [].";

const DEFAULT_VIDEO_SUMMARY_PROMPT: &str = "\
You summarize what a video says about specific places.

Video text:
{input_text}

Entities:
{entities}

For every entity above, write two or three sentences describing what the video
says about it: what was tried or seen, opinions, prices, tips. Use only the
video text. Answer with a Python dictionary mapping each entity string exactly
as listed to its summary, for example:
{{'Eiffel Tower,Paris,France': 'The creator recommends going at sunset.'}}";

const DEFAULT_WEB_SUMMARY_PROMPT: &str = "\
You summarize web search results about one place: {entity}

The documents below are separated by the line \"NEW DOCUMENT:\".

{documents}

Write a short, neutral paragraph with what the documents say about {entity}:
reputation, highlights, common complaints, practical information. Ignore
documents about other places. Do not invent facts.";

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed instruction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `source`, requiring exactly the placeholders in `required`
    /// (each at least once, nothing else).
    pub fn parse(name: &str, source: &str, required: &[&str]) -> Result<Self> {
        let segments = parse_segments(name, source)?;

        for placeholder in segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        }) {
            if !required.contains(&placeholder.as_str()) {
                return Err(EntityLensError::config(format!(
                    "prompt `{name}` uses unknown placeholder `{{{placeholder}}}`"
                )));
            }
        }
        for req in required {
            let present = segments
                .iter()
                .any(|s| matches!(s, Segment::Placeholder(p) if p == req));
            if !present {
                return Err(EntityLensError::config(format!(
                    "prompt `{name}` is missing placeholder `{{{req}}}`"
                )));
            }
        }

        Ok(Self { segments })
    }

    /// Substitute `vars`. Placeholders were validated at parse time.
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    if let Some((_, value)) = vars.iter().find(|(k, _)| *k == key.as_str()) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

fn parse_segments(name: &str, source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) if k.is_alphanumeric() || k == '_' => key.push(k),
                        _ => {
                            return Err(EntityLensError::config(format!(
                                "prompt `{name}` has a malformed placeholder near `{{{key}`"
                            )));
                        }
                    }
                }
                if key.is_empty() {
                    return Err(EntityLensError::config(format!(
                        "prompt `{name}` has an empty placeholder `{{}}`"
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(key));
            }
            '}' => {
                return Err(EntityLensError::config(format!(
                    "prompt `{name}` has an unmatched `}}` (write `}}}}` for a literal brace)"
                )));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

// ---------------------------------------------------------------------------
// Prompt set
// ---------------------------------------------------------------------------

/// The three instructions a run needs.
#[derive(Debug, Clone)]
pub struct Prompts {
    /// Entity extraction instruction, sent verbatim.
    pub ner: String,
    /// Grounded summary; placeholders `input_text`, `entities`.
    pub video_summary: Template,
    /// Web summary; placeholders `entity`, `documents`.
    pub web_summary: Template,
}

impl Prompts {
    /// The built-in defaults.
    pub fn builtin() -> Result<Self> {
        Self::from_sources(
            DEFAULT_NER_PROMPT.to_string(),
            DEFAULT_VIDEO_SUMMARY_PROMPT,
            DEFAULT_WEB_SUMMARY_PROMPT,
        )
    }

    /// Load prompts, taking each file present in `dir` over the default.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let Some(dir) = dir else {
            return Self::builtin();
        };
        if !dir.is_dir() {
            return Err(EntityLensError::config(format!(
                "prompts directory not found: {}",
                dir.display()
            )));
        }

        let ner = read_override(dir, NER_PROMPT_FILE)?.unwrap_or_else(|| DEFAULT_NER_PROMPT.into());
        let video = read_override(dir, VIDEO_SUMMARY_PROMPT_FILE)?;
        let web = read_override(dir, WEB_SUMMARY_PROMPT_FILE)?;

        let prompts = Self::from_sources(
            ner,
            video.as_deref().unwrap_or(DEFAULT_VIDEO_SUMMARY_PROMPT),
            web.as_deref().unwrap_or(DEFAULT_WEB_SUMMARY_PROMPT),
        )?;
        info!(dir = %dir.display(), "prompts loaded");
        Ok(prompts)
    }

    fn from_sources(ner: String, video: &str, web: &str) -> Result<Self> {
        Ok(Self {
            ner,
            video_summary: Template::parse(
                VIDEO_SUMMARY_PROMPT_FILE,
                video,
                &["input_text", "entities"],
            )?,
            web_summary: Template::parse(WEB_SUMMARY_PROMPT_FILE, web, &["entity", "documents"])?,
        })
    }
}

fn read_override(dir: &Path, file: &str) -> Result<Option<String>> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| EntityLensError::io(&path, e))?;
    debug!(path = %path.display(), "prompt override found");
    Ok(Some(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("el-prompts-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn builtin_prompts_parse() {
        let prompts = Prompts::builtin().unwrap();
        let rendered = prompts
            .video_summary
            .render(&[("input_text", "TEXT"), ("entities", "- A,B")]);
        assert!(rendered.contains("TEXT"));
        assert!(rendered.contains("- A,B"));
        // Escaped braces survive as literal braces.
        assert!(rendered.contains("{'Eiffel Tower"));
    }

    #[test]
    fn render_substitutes_every_occurrence() {
        let t = Template::parse("t", "{entity}: {documents} ({entity})", &["entity", "documents"])
            .unwrap();
        assert_eq!(t.render(&[("entity", "X"), ("documents", "D")]), "X: D (X)");
    }

    #[test]
    fn literal_braces() {
        let t = Template::parse("t", "{{\"k\": {entity}}}", &["entity"]).unwrap();
        assert_eq!(t.render(&[("entity", "1")]), "{\"k\": 1}");
    }

    #[test]
    fn missing_placeholder_is_config_error() {
        let err = Template::parse("t", "only {entity}", &["entity", "documents"]).unwrap_err();
        assert!(matches!(err, EntityLensError::Config { .. }));
        assert!(err.to_string().contains("{documents}"));
    }

    #[test]
    fn unknown_or_malformed_placeholders_rejected() {
        assert!(Template::parse("t", "{entity} {other}", &["entity"]).is_err());
        assert!(Template::parse("t", "{entity", &["entity"]).is_err());
        assert!(Template::parse("t", "{entity} }", &["entity"]).is_err());
        assert!(Template::parse("t", "{} {entity}", &["entity"]).is_err());
    }

    #[test]
    fn directory_overrides_individual_files() {
        let dir = temp_dir();
        std::fs::write(dir.join(NER_PROMPT_FILE), "custom ner {not a template}").unwrap();
        std::fs::write(dir.join(WEB_SUMMARY_PROMPT_FILE), "About {entity}:\n{documents}").unwrap();

        let prompts = Prompts::load(Some(&dir)).unwrap();
        assert_eq!(prompts.ner, "custom ner {not a template}");
        assert_eq!(
            prompts.web_summary.render(&[("entity", "E"), ("documents", "D")]),
            "About E:\nD"
        );
        // Untouched file keeps the default.
        assert_eq!(prompts.video_summary, Prompts::builtin().unwrap().video_summary);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_override_fails_at_load() {
        let dir = temp_dir();
        std::fs::write(dir.join(VIDEO_SUMMARY_PROMPT_FILE), "no placeholders").unwrap();
        let err = Prompts::load(Some(&dir)).unwrap_err();
        assert!(err.to_string().contains("video_summarize_prompt.txt"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_is_config_error() {
        let dir = std::env::temp_dir().join(format!("el-missing-{}", uuid::Uuid::now_v7()));
        assert!(Prompts::load(Some(&dir)).is_err());
    }
}
