//! Terminal rendering of the orchestrator's state and outcome.

use std::{fmt::Write as _, path::Path};

use anyhow::{Context, Result};
use client_core::{AnalysisOutcome, SubCall, UiState};
use shared::error::AnalysisError;

pub fn describe_failure(err: &AnalysisError) -> String {
    match err {
        AnalysisError::InvalidFile { .. } => "Please upload a valid image file.".to_string(),
        AnalysisError::NoImageSelected => "Please upload an image to analyze.".to_string(),
        AnalysisError::NetworkFailure { reason, .. } => {
            let lower = reason.to_ascii_lowercase();
            if lower.contains("connect")
                || lower.contains("connection refused")
                || lower.contains("dns")
                || lower.contains("timed out")
            {
                "Server unreachable; check URL/network and retry.".to_string()
            } else {
                format!("Network error: {reason}")
            }
        }
        AnalysisError::SubCallFailure { which, reason } => format!("{which} failed: {reason}"),
        AnalysisError::Superseded => "Analysis was replaced by a newer request.".to_string(),
    }
}

pub fn render(label: &str, state: &UiState, outcome: Option<&AnalysisOutcome>) -> String {
    let mut out = String::new();
    let status = match state {
        UiState::Idle => "waiting for image".to_string(),
        UiState::Selecting => "choosing image".to_string(),
        UiState::Ready => "ready to analyze".to_string(),
        UiState::Analyzing => "analyzing".to_string(),
        UiState::Succeeded => "done".to_string(),
        UiState::Failed(err) => format!("failed: {}", describe_failure(err)),
    };
    let _ = writeln!(out, "== {label} ({status})");

    let Some(outcome) = outcome else {
        if !matches!(state, UiState::Failed(_)) {
            let _ = writeln!(out, "   no results yet");
        }
        return out;
    };

    let _ = writeln!(out, "   predictions:");
    match &outcome.predictions {
        SubCall::Pending => {
            let _ = writeln!(out, "     (pending)");
        }
        SubCall::Failed(err) => {
            let _ = writeln!(out, "     (unavailable: {})", describe_failure(err));
        }
        SubCall::Ready(list) if list.is_empty() => {
            let _ = writeln!(out, "     (no predictions)");
        }
        SubCall::Ready(list) => {
            for (rank, prediction) in list.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "     #{} {:<24} {:>5.1}%",
                    rank + 1,
                    prediction.label,
                    prediction.percent()
                );
            }
        }
    }

    match &outcome.heatmap {
        SubCall::Pending => {
            let _ = writeln!(out, "   heatmap: (pending)");
        }
        SubCall::Failed(err) => {
            let _ = writeln!(out, "   heatmap: (unavailable: {})", describe_failure(err));
        }
        SubCall::Ready(heatmap) => {
            let _ = writeln!(out, "   heatmap: {} byte PNG", heatmap.png_bytes().len());
        }
    }
    out
}

/// Writes the heatmap PNG next to the others in `dir`, named after the source image.
pub async fn save_heatmap(
    dir: &Path,
    source: &Path,
    outcome: &AnalysisOutcome,
) -> Result<Option<std::path::PathBuf>> {
    let Some(heatmap) = outcome.heatmap_image() else {
        return Ok(None);
    };
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create heatmap directory '{}'", dir.display()))?;
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("request-{}", outcome.request));
    let target = dir.join(format!("{stem}.gradcam.png"));
    tokio::fs::write(&target, heatmap.png_bytes())
        .await
        .with_context(|| format!("failed to write heatmap '{}'", target.display()))?;
    Ok(Some(target))
}

#[cfg(test)]
#[path = "tests/presenter_tests.rs"]
mod tests;
