mod source;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};
use wikisearch_core::{
    build_status, clean_build, Analyzer, BuildConfig, BuildOptions, BuildOutcome, BuildPhase, IndexBuilder, Language,
};

use crate::source::JsonlSource;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and manage per-language TF-IDF indices", long_about = None)]
struct Cli {
    /// Root directory holding one sub-directory per language
    #[arg(long, global = true, env = "WIKISEARCH_INDEX", default_value = "./index")]
    index_root: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or resume building) the index of one language
    Build {
        #[arg(long)]
        lang: Language,
        /// Input path (file or WikiExtractor output directory)
        #[arg(long)]
        input: PathBuf,
        /// Postings entries buffered in memory before spilling a segment
        #[arg(long, default_value_t = 2_000_000)]
        buffer_entries: usize,
        /// Maximum segments merged at once
        #[arg(long, default_value_t = 64)]
        merge_fan_in: usize,
        /// Skip articles whose text is shorter than this
        #[arg(long, default_value_t = 100)]
        min_text_chars: usize,
        /// Stop after reading this many documents from the input
        #[arg(long)]
        max_docs: Option<u64>,
        /// Stop once this phase is recorded (scanned, spilled, merged, weighted)
        #[arg(long)]
        halt_after: Option<BuildPhase>,
        /// Discard any existing checkpoint and build from scratch
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        /// Sort spill buffers on a single thread
        #[arg(long, default_value_t = false)]
        no_parallel_sort: bool,
    },
    /// Show the checkpoint and published statistics of a language
    Status {
        #[arg(long)]
        lang: Language,
    },
    /// Remove intermediate build state; the published index is kept
    Clean {
        #[arg(long)]
        lang: Language,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            lang,
            input,
            buffer_entries,
            merge_fan_in,
            min_text_chars,
            max_docs,
            halt_after,
            rebuild,
            no_parallel_sort,
        } => {
            let config = BuildConfig {
                buffer_capacity: buffer_entries,
                merge_fan_in,
                parallel_sort: !no_parallel_sort,
                ..BuildConfig::default()
            };
            let options = BuildOptions { halt_after, rebuild, max_docs };
            build_index(&cli.index_root, lang, &input, min_text_chars, config, &options)
        }
        Commands::Status { lang } => {
            let status = build_status(&cli.index_root, lang);
            let report = serde_json::json!({
                "language": lang,
                "checkpoint": status.checkpoint,
                "stats": status.stats,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Clean { lang } => {
            clean_build(&cli.index_root, lang).with_context(|| format!("cleaning build state of {lang}"))?;
            tracing::info!(language = %lang, "build state removed");
            Ok(())
        }
    }
}

fn build_index(
    root: &Path,
    lang: Language,
    input: &Path,
    min_text_chars: usize,
    config: BuildConfig,
    options: &BuildOptions,
) -> Result<()> {
    let analyzer = Analyzer::for_language(lang);
    let mut source = JsonlSource::open(input, min_text_chars)?;
    let builder = IndexBuilder::new(root, lang, config, &analyzer);
    tracing::info!(language = %lang, input = %input.display(), root = %root.display(), "starting build");

    let outcome = builder.build(&mut source, options).with_context(|| format!("building {lang} index"))?;
    let (short, malformed) = source.skipped();
    match outcome {
        BuildOutcome::Complete(stats) => {
            tracing::info!(
                language = %lang,
                documents = stats.total_documents,
                terms = stats.vocabulary_size,
                short_articles = short,
                malformed_records = malformed,
                "index build complete"
            );
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        BuildOutcome::Halted(phase) => {
            tracing::info!(language = %lang, %phase, "build halted; rerun to resume");
        }
    }
    Ok(())
}
