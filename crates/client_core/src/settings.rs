use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

pub const SETTINGS_FILE: &str = "gradcam.toml";

/// How a sub-call failure affects the overall analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Show whichever half succeeded; a failed half renders as empty.
    #[default]
    PartialSuccess,
    /// Any failed half fails the whole analysis.
    AllOrNothing,
}

impl FailurePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "partial_success" | "partial" => Some(Self::PartialSuccess),
            "all_or_nothing" | "strict" => Some(Self::AllOrNothing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub heatmap_path: String,
    pub predict_path: String,
    pub request_timeout_secs: u64,
    pub failure_policy: FailurePolicy,
    pub max_predictions: Option<usize>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".into(),
            heatmap_path: "/gradcam".into(),
            predict_path: "/predict".into(),
            request_timeout_secs: 60,
            failure_policy: FailurePolicy::PartialSuccess,
            max_predictions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceEndpoints {
    pub heatmap: Url,
    pub predictions: Url,
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn endpoints(&self) -> anyhow::Result<InferenceEndpoints> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            bail!("inference api base url is empty");
        }
        let base = Url::parse(base.trim_end_matches('/'))
            .with_context(|| format!("invalid inference api base url '{base}'"))?;
        if base.cannot_be_a_base() {
            bail!("inference api base url '{base}' cannot carry endpoint paths");
        }

        Ok(InferenceEndpoints {
            heatmap: join_endpoint(&base, &self.heatmap_path)?,
            predictions: join_endpoint(&base, &self.predict_path)?,
        })
    }
}

fn join_endpoint(base: &Url, suffix: &str) -> anyhow::Result<Url> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        suffix.trim().trim_start_matches('/')
    );
    Url::parse(&joined).with_context(|| format!("invalid endpoint url '{joined}'"))
}

pub fn load_settings() -> ClientSettings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    settings_from_sources(file.as_deref(), |key| std::env::var(key).ok())
}

/// Loads an explicitly named settings file. Unlike [`load_settings`], a missing or
/// malformed file is an error; environment overrides still apply on top.
pub fn load_settings_from(path: &Path) -> anyhow::Result<ClientSettings> {
    settings_from_path(path, |key| std::env::var(key).ok())
}

pub fn settings_from_path(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ClientSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let settings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
    Ok(apply_overrides(settings, env))
}

/// File values first, then environment overrides. Unparseable overrides are skipped.
pub fn settings_from_sources(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let settings = match file.map(toml::from_str::<ClientSettings>) {
        Some(Ok(parsed)) => parsed,
        Some(Err(err)) => {
            warn!(error = %err, file = SETTINGS_FILE, "settings: ignoring malformed file");
            ClientSettings::default()
        }
        None => ClientSettings::default(),
    };
    apply_overrides(settings, env)
}

fn apply_overrides(
    mut settings: ClientSettings,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    if settings.request_timeout_secs == 0 {
        warn!("settings: ignoring request_timeout_secs = 0");
        settings.request_timeout_secs = ClientSettings::default().request_timeout_secs;
    }

    let overrides: HashMap<&str, String> = [
        "API_URL",
        "APP__API_BASE_URL",
        "APP__HEATMAP_PATH",
        "APP__PREDICT_PATH",
        "APP__REQUEST_TIMEOUT_SECS",
        "APP__FAILURE_POLICY",
        "APP__MAX_PREDICTIONS",
    ]
    .into_iter()
    .filter_map(|key| env(key).map(|value| (key, value)))
    .collect();

    if let Some(v) = overrides.get("API_URL") {
        settings.api_base_url = v.clone();
    }
    if let Some(v) = overrides.get("APP__API_BASE_URL") {
        settings.api_base_url = v.clone();
    }
    if let Some(v) = overrides.get("APP__HEATMAP_PATH") {
        settings.heatmap_path = v.clone();
    }
    if let Some(v) = overrides.get("APP__PREDICT_PATH") {
        settings.predict_path = v.clone();
    }
    if let Some(v) = overrides.get("APP__REQUEST_TIMEOUT_SECS") {
        match v.parse::<u64>() {
            Ok(parsed) if parsed > 0 => settings.request_timeout_secs = parsed,
            _ => warn!(value = %v, "settings: ignoring APP__REQUEST_TIMEOUT_SECS"),
        }
    }
    if let Some(v) = overrides.get("APP__FAILURE_POLICY") {
        match FailurePolicy::parse(v) {
            Some(policy) => settings.failure_policy = policy,
            None => warn!(value = %v, "settings: ignoring APP__FAILURE_POLICY"),
        }
    }
    if let Some(v) = overrides.get("APP__MAX_PREDICTIONS") {
        match v.parse::<usize>() {
            Ok(parsed) => settings.max_predictions = Some(parsed),
            Err(_) => warn!(value = %v, "settings: ignoring APP__MAX_PREDICTIONS"),
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
