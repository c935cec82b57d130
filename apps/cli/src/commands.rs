//! CLI command definitions, routing, and tracing setup.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use entitylens_core::input::load_run_input;
use entitylens_core::persist::{load_run_records, write_run_record};
use entitylens_core::{
    BatchConfig, BatchProgress, Pipeline, RunProgress, aggregate, run_batch, write_csv, write_json,
};
use entitylens_extract::extract_relevant;
use entitylens_shared::{
    AppConfig, RunInput, RunMeta, RunRecord, init_config, load_config, load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// EntityLens: place entities and web context from video transcripts.
#[derive(Parser)]
#[command(
    name = "entitylens",
    version,
    about = "Extract place entities from video transcripts, enrich them from the web, and merge runs into one table.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.entitylens/entitylens.toml).
    #[arg(long, global = true, env = "ENTITYLENS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Aggregate table format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum TableFormat {
    Csv,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline for one video.
    Run {
        /// Video id; inputs are read from the configured data and transcript dirs.
        #[arg(long, required_unless_present = "transcript_file")]
        id: Option<String>,

        /// Description text file (used with --transcript-file).
        #[arg(long, requires = "transcript_file")]
        description_file: Option<PathBuf>,

        /// Transcript text file, instead of the configured layout.
        #[arg(long)]
        transcript_file: Option<PathBuf>,

        /// Print the record without persisting it.
        #[arg(long)]
        no_save: bool,
    },

    /// Run the pipeline for every video that has no record yet.
    Batch {
        /// Runs in flight (defaults to [batch] concurrency).
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Re-run videos that already have a record.
        #[arg(long)]
        force: bool,
    },

    /// Merge persisted runs into one entity table.
    Aggregate {
        /// Run records directory (defaults to [paths] runs_dir).
        #[arg(long)]
        runs: Option<PathBuf>,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: TableFormat,
    },

    /// Print the query-relevant text of a local HTML file.
    Extract {
        /// HTML file to extract from.
        #[arg(long)]
        file: PathBuf,

        /// Query whose whitespace-separated terms drive relevance.
        #[arg(long)]
        query: String,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "entitylens=info",
        1 => "entitylens=debug",
        _ => "entitylens=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run {
            id,
            description_file,
            transcript_file,
            no_save,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_run(
                &config,
                id.as_deref(),
                description_file.as_deref(),
                transcript_file.as_deref(),
                no_save,
            )
            .await
        }
        Command::Batch { concurrency, force } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_batch(&config, concurrency, force).await
        }
        Command::Aggregate { runs, out, format } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_aggregate(&config, runs, out.as_deref(), format)
        }
        Command::Extract { file, query } => cmd_extract(&file, &query),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    id: Option<&str>,
    description_file: Option<&Path>,
    transcript_file: Option<&Path>,
    no_save: bool,
) -> Result<()> {
    let (run_id, input) = match transcript_file {
        Some(transcript_file) => {
            let transcript = read_text(transcript_file)?;
            let description = match description_file {
                Some(p) => read_text(p)?,
                None => String::new(),
            };
            let run_id = match id {
                Some(id) => id.to_string(),
                None => transcript_file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(String::from)
                    .ok_or_else(|| {
                        eyre!(
                            "cannot derive a run id from '{}'; pass --id",
                            transcript_file.display()
                        )
                    })?,
            };
            (
                run_id,
                RunInput {
                    description,
                    transcript,
                },
            )
        }
        None => {
            let id = id.ok_or_else(|| eyre!("either --id or --transcript-file is required"))?;
            let input = load_run_input(&config.paths.data_dir, &config.paths.transcripts_dir, id)?;
            (id.to_string(), input)
        }
    };

    info!(run_id = %run_id, model = %config.llm.model, "starting run");

    let pipeline = Pipeline::from_config(config)?;
    let progress = CliProgress::new();
    let outcome = pipeline
        .run_with_progress(&input.to_text(), &progress)
        .await;
    progress.spinner.finish_and_clear();
    let state = outcome?;

    let record = RunRecord::from_state(
        &state,
        Some(RunMeta {
            run_id: run_id.clone(),
            model: config.llm.model.clone(),
            completed_at: Utc::now(),
        }),
    );

    println!("{}", serde_json::to_string_pretty(&record)?);

    if !no_save {
        let path = write_run_record(&config.paths.runs_dir, &run_id, &record)?;
        eprintln!("Saved run record to: {}", path.display());
    }
    Ok(())
}

async fn cmd_batch(config: &AppConfig, concurrency: Option<usize>, force: bool) -> Result<()> {
    let batch = BatchConfig {
        data_dir: config.paths.data_dir.clone(),
        transcripts_dir: config.paths.transcripts_dir.clone(),
        runs_dir: config.paths.runs_dir.clone(),
        concurrency: concurrency.unwrap_or(config.batch.concurrency),
        force,
        model: config.llm.model.clone(),
    };
    if batch.concurrency == 0 {
        return Err(eyre!("--concurrency must be at least 1"));
    }

    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let progress = Arc::new(BatchBar::new());
    let result = run_batch(pipeline, &batch, progress.clone()).await?;
    progress.bar.finish_and_clear();

    eprintln!();
    eprintln!("  Batch complete");
    eprintln!("  Succeeded: {}", result.succeeded.len());
    eprintln!("  Skipped:   {}", result.skipped.len());
    eprintln!("  Failed:    {}", result.failed.len());
    for (id, err) in &result.failed {
        eprintln!("    {id}: {err}");
    }
    eprintln!();

    if !result.failed.is_empty() {
        return Err(eyre!("{} run(s) failed", result.failed.len()));
    }
    Ok(())
}

fn cmd_aggregate(
    config: &AppConfig,
    runs: Option<PathBuf>,
    out: Option<&Path>,
    format: TableFormat,
) -> Result<()> {
    let runs_dir = runs.unwrap_or_else(|| config.paths.runs_dir.clone());
    let records = load_run_records(&runs_dir)?;
    if records.is_empty() {
        warn!(runs_dir = %runs_dir.display(), "no run records found");
    }

    let report = aggregate(&records);

    match out {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| eyre!("cannot create '{}': {e}", path.display()))?;
            write_table(&report.rows, format, BufWriter::new(file))?;
            eprintln!("Wrote {} rows to: {}", report.rows.len(), path.display());
        }
        None => write_table(&report.rows, format, std::io::stdout().lock())?,
    }

    if report.collisions > 0 {
        eprintln!("  {} conflicting value(s) resolved by earliest run", report.collisions);
    }
    if !report.malformed_runs.is_empty() {
        eprintln!(
            "  Unreadable summaries skipped: {}",
            report.malformed_runs.join(", ")
        );
    }
    Ok(())
}

fn write_table<W: Write>(
    rows: &[entitylens_shared::AggregateRow],
    format: TableFormat,
    writer: W,
) -> Result<()> {
    match format {
        TableFormat::Csv => write_csv(rows, writer)?,
        TableFormat::Json => write_json(rows, writer)?,
    }
    Ok(())
}

fn cmd_extract(file: &Path, query: &str) -> Result<()> {
    let html = read_text(file)?;
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return Err(eyre!("--query must contain at least one term"));
    }

    let text = extract_relevant(&html, &terms);
    if text.is_empty() {
        eprintln!("No relevant content found.");
    } else {
        println!("{text}");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| eyre!("cannot read '{}': {e}", path.display()))
}

// ---------------------------------------------------------------------------
// CLI progress reporters
// ---------------------------------------------------------------------------

/// Spinner showing the current stage of a single run.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl RunProgress for CliProgress {
    fn stage_started(&self, stage: &str, index: usize, total: usize) {
        self.spinner.set_message(format!("[{index}/{total}] {stage}"));
    }

    fn stage_finished(&self, stage: &str, elapsed: Duration) {
        self.spinner
            .println(format!("  {stage} done in {:.1}s", elapsed.as_secs_f64()));
    }
}

/// Bar counting finished runs of a batch.
struct BatchBar {
    bar: ProgressBar,
}

impl BatchBar {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl BatchProgress for BatchBar {
    fn planned(&self, total: usize, skipped: usize) {
        self.bar.set_length(total as u64);
        if skipped > 0 {
            self.bar
                .println(format!("  Skipping {skipped} video(s) with existing records"));
        }
    }

    fn run_finished(&self, run_id: &str, ok: bool) {
        self.bar.inc(1);
        let status = if ok { "ok" } else { "failed" };
        self.bar.set_message(format!("{run_id} {status}"));
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_needs_an_id_or_a_transcript() {
        assert!(Cli::try_parse_from(["entitylens", "run"]).is_err());
        assert!(Cli::try_parse_from(["entitylens", "run", "--id", "20250913_005000"]).is_ok());
        assert!(Cli::try_parse_from(["entitylens", "run", "--transcript-file", "t.txt"]).is_ok());
        assert!(
            Cli::try_parse_from(["entitylens", "run", "--id", "x", "--description-file", "d.txt"])
                .is_err()
        );
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "entitylens",
            "aggregate",
            "--format",
            "json",
            "--config",
            "alt.toml",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(
            cli.command,
            Command::Aggregate {
                format: TableFormat::Json,
                ..
            }
        ));
    }
}
