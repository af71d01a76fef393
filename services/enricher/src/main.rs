//! tagscout
//!
//! Checks container images for newer compatible versions and prints one JSON
//! record per image on stdout. Logs go to stderr as JSON.
//!
//! ```text
//! tagscout mongo:4.4 ghcr.io/home-assistant/home-assistant:2024.5.0
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use serde::Serialize;
use tagscout_cache::Cache;
use tagscout_enricher::config::Config;
use tagscout_enricher::github::GitHubClient;
use tagscout_enricher::jobs::{build_pipeline, ImageRecord, PipelineDeps};
use tagscout_enricher::pipeline::{ExecutionContext, Pipeline};
use tagscout_enricher::reference::Reference;
use tagscout_enricher::registry::{http_client, Registries};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tagscout", version, about = "Find newer versions of container images")]
struct Args {
    /// Image references, e.g. `mongo:4.4` or `quay.io/prometheus/node-exporter:v1.7.0`.
    #[arg(required = true)]
    images: Vec<String>,

    /// Pretty-print records instead of one JSON object per line.
    #[arg(long)]
    pretty: bool,
}

/// One line of output.
#[derive(Debug, Serialize)]
struct Report<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<ImageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!(
        cache_path = %config.cache_path.display(),
        images = args.images.len(),
        "Starting tagscout"
    );

    let cache = Arc::new(
        Cache::open(&config.cache_path, config.cache_config())
            .await
            .context("failed to open cache")?,
    );

    let registries = Registries::new(&config.registries_config())?;
    let github = GitHubClient::new(
        config.github_config(),
        http_client(config.registries_config().http_timeout)?,
    );
    let deps = PipelineDeps {
        registries,
        github: Arc::new(github),
        ttls: config.cache_ttls(),
    };
    let pipeline = Pipeline::new(build_pipeline(&deps), Arc::clone(&cache));

    // Ctrl-C cancels every in-flight run; partial records are still printed
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    let reports = join_all(args.images.iter().map(|image| {
        let exec =
            ExecutionContext::from_shutdown(shutdown_rx.clone()).with_timeout(config.run_timeout());
        run_image(&pipeline, image, exec)
    }))
    .await;
    signal.abort();

    let mut failed = 0;
    for report in &reports {
        if report.error.is_some() {
            failed += 1;
        }
        let line = if args.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        println!("{line}");
    }

    let stats = cache.stats();
    info!(
        hits = stats.hits.load(Ordering::Relaxed),
        misses = stats.misses.load(Ordering::Relaxed),
        failed = failed,
        "All images processed"
    );

    if let Err(e) = cache.close().await {
        error!(error = %e, "Failed to close cache");
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Enrich one image. A failure here never affects the other images.
async fn run_image<'a>(
    pipeline: &Pipeline<ImageRecord>,
    image: &'a str,
    exec: ExecutionContext,
) -> Report<'a> {
    let reference = match Reference::parse(image) {
        Ok(reference) => reference,
        Err(e) => {
            warn!(image = image, error = %e, "Invalid image reference");
            return Report {
                image,
                record: None,
                error: Some(e.to_string()),
            };
        }
    };

    let (record, result) = pipeline.run(exec, ImageRecord::new(reference)).await;
    if let Err(e) = &result {
        warn!(image = image, error = %e, "Enrichment incomplete");
    }

    Report {
        image,
        record: Some(record),
        error: result.err().map(|e| e.to_string()),
    }
}
