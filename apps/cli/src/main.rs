//! EntityLens CLI: enrich short-form video transcripts with place entities,
//! grounded summaries, and web-sourced context, then merge the runs into one
//! table.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
