use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SelectionId);
id_newtype!(RequestSeq);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCallKind {
    Heatmap,
    Predictions,
}

impl fmt::Display for SubCallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heatmap => f.write_str("heatmap"),
            Self::Predictions => f.write_str("predictions"),
        }
    }
}

/// Grad-CAM overlay returned by the inference service, already decoded from base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatmapImage {
    png: Vec<u8>,
}

impl HeatmapImage {
    pub fn from_png(png: Vec<u8>) -> Self {
        Self { png }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded.trim()).map(Self::from_png)
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    pub fn percent(&self) -> f64 {
        self.confidence * 100.0
    }
}

/// Predictions ordered by descending confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionList(Vec<Prediction>);

impl PredictionList {
    pub fn ranked(mut predictions: Vec<Prediction>) -> Self {
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Self(predictions)
    }

    pub fn truncated(mut self, limit: usize) -> Self {
        self.0.truncate(limit);
        self
    }

    pub fn top(&self) -> Option<&Prediction> {
        self.0.first()
    }

    pub fn as_slice(&self) -> &[Prediction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Prediction> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

/// Transient user-facing notice, one per terminal analysis event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSeq>,
    pub issued_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        title: impl Into<String>,
        description: impl Into<String>,
        request: Option<RequestSeq>,
    ) -> Self {
        Self {
            level,
            title: title.into(),
            description: description.into(),
            request,
            issued_at: Utc::now(),
        }
    }
}
