use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use therapy_synth::core;
use therapy_synth::core::cancel::CancellationToken;
use therapy_synth::core::config::defaults::starter_config_yaml;
use therapy_synth::core::config::{AppPaths, ConfigService};
use therapy_synth::index::ingest::{embed_rows, read_corpus};
use therapy_synth::index::{IndexStore, SqliteIndexStore};
use therapy_synth::llm::OpenAiProvider;

#[derive(Parser, Debug)]
#[command(name = "build_index")]
#[command(about = "Embed a therapy corpus CSV into the similarity index")]
struct Args {
    /// Corpus CSV with prompt, hq1/hq2, mq1, lq1..lq5 and search_keywords columns
    csv: Option<PathBuf>,

    /// Output database (defaults to the configured index path)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write a starter config.yml into the data directory and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let paths = Arc::new(AppPaths::new());
    core::logging::init(&paths.log_dir, "build-index.log");

    if args.init_config {
        let target = paths.user_data_dir.join("config.yml");
        if target.exists() {
            bail!("{} already exists", target.display());
        }
        std::fs::write(&target, starter_config_yaml())
            .with_context(|| format!("Failed to write {}", target.display()))?;
        tracing::info!("Wrote {}", target.display());
        return Ok(());
    }

    let Some(csv_path) = args.csv else {
        bail!("missing corpus CSV path (see --help)");
    };

    let config_service = ConfigService::new(paths.clone());
    let config = config_service
        .load_app_config()
        .context("Failed to load configuration")?;
    let out_path = match args.out {
        Some(path) => path,
        None => config_service.index_path(&config),
    };

    let file = File::open(&csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;
    let rows = read_corpus(file).context("Failed to read corpus")?;
    tracing::info!("Read {} usable rows from {}", rows.len(), csv_path.display());

    let embedder = OpenAiProvider::new(
        &config.embedding.base_url,
        &config.embedding.model,
        config.embedding.api_key.clone(),
        config.embedding.timeout(),
    )
    .context("Failed to build embedding client")?
    .with_dimensions(config.embedding.dimensions);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current row");
            ctrl_c_cancel.cancel();
        }
    });

    let report = embed_rows(rows, &embedder, &config.retry.policy(), &cancel)
        .await
        .context("Failed to embed corpus")?;
    if !report.skipped_rows.is_empty() {
        tracing::warn!(
            "Skipped {} row(s) whose embedding failed: {:?}",
            report.skipped_rows.len(),
            report.skipped_rows
        );
    }
    if report.items.is_empty() {
        bail!("no rows could be embedded; index left unchanged");
    }

    let store = SqliteIndexStore::create(&out_path)
        .await
        .with_context(|| format!("Failed to open {}", out_path.display()))?;
    let written = report.items.len();
    store
        .replace_all(report.items, &config.embedding.model)
        .await
        .context("Failed to write index")?;

    tracing::info!("Wrote {} items to {}", written, out_path.display());
    Ok(())
}
