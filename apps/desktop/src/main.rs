use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    inference_service_from_settings, load_settings, load_settings_from, AnalysisOrchestrator,
    FailurePolicy, FileCandidate, UiState,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod notifications;
mod presenter;

#[derive(Parser, Debug)]
#[command(name = "gradcam", about = "Classify images and fetch Grad-CAM heatmaps")]
struct Args {
    /// Settings file to use instead of ./gradcam.toml; must exist and parse.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Base URL of the inference service; overrides gradcam.toml and API_URL.
    #[arg(long)]
    api_url: Option<String>,
    /// partial-success or all-or-nothing.
    #[arg(long, value_parser = parse_policy)]
    policy: Option<FailurePolicy>,
    #[arg(long)]
    max_predictions: Option<usize>,
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,
    /// Directory to write each returned heatmap PNG into.
    #[arg(long)]
    heatmap_out: Option<PathBuf>,
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn parse_policy(raw: &str) -> Result<FailurePolicy, String> {
    FailurePolicy::parse(raw).ok_or_else(|| format!("unknown failure policy '{raw}'"))
}

async fn read_candidate(path: &Path) -> Result<FileCandidate> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let media_type = mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string());
    Ok(FileCandidate::new(name, media_type, bytes))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }
    if let Some(policy) = args.policy {
        settings.failure_policy = policy;
    }
    if let Some(limit) = args.max_predictions {
        settings.max_predictions = Some(limit);
    }
    if let Some(timeout) = args.timeout_secs {
        settings.request_timeout_secs = timeout;
    }

    let service = inference_service_from_settings(&settings);
    info!(policy = ?settings.failure_policy, "gradcam: starting");
    let orchestrator = AnalysisOrchestrator::with_policy(service, settings.failure_policy);
    let sink = notifications::spawn_notification_sink(orchestrator.subscribe_events());

    let mut failures = 0usize;
    for path in &args.images {
        let label = path.display().to_string();
        orchestrator.begin_selection();
        let candidate = match read_candidate(path).await {
            Ok(candidate) => candidate,
            Err(err) => {
                error!(path = %label, error = %err, "gradcam: could not load image");
                orchestrator.cancel_selection();
                failures += 1;
                continue;
            }
        };

        if let state @ UiState::Failed(_) = orchestrator.select(candidate) {
            print!("{}", presenter::render(&label, &state, None));
            failures += 1;
            continue;
        }

        match orchestrator.analyze() {
            Ok(handle) => handle.wait().await,
            Err(err) => {
                print!("{}", presenter::render(&label, &UiState::Failed(err), None));
                failures += 1;
                continue;
            }
        }

        let state = orchestrator.ui_state();
        let outcome = orchestrator.outcome();
        print!("{}", presenter::render(&label, &state, outcome.as_ref()));

        if let (Some(dir), Some(outcome)) = (&args.heatmap_out, outcome.as_ref()) {
            match presenter::save_heatmap(dir, path, outcome).await {
                Ok(Some(saved)) => println!("   heatmap saved to {}", saved.display()),
                Ok(None) => {}
                Err(err) => error!(error = %err, "gradcam: could not save heatmap"),
            }
        }
        if matches!(state, UiState::Failed(_)) {
            failures += 1;
        }
    }

    orchestrator.clear();
    drop(orchestrator);
    let delivered = sink.await.unwrap_or_default();
    info!(notifications = delivered, "gradcam: finished");

    if failures > 0 {
        bail!("{failures} of {} image(s) could not be analyzed", args.images.len());
    }
    Ok(())
}
