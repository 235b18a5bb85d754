use serde::{Deserialize, Serialize};

use crate::domain::Prediction;

/// Multipart field the inference service reads the upload from.
pub const IMAGE_FORM_FIELD: &str = "image";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeatmapResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<WirePrediction>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePrediction {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f64,
}

impl From<WirePrediction> for Prediction {
    fn from(value: WirePrediction) -> Self {
        Prediction::new(value.label, value.confidence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
