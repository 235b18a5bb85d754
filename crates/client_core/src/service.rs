//! Remote inference calls: one for the Grad-CAM heatmap, one for classification.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{HeatmapImage, Prediction, PredictionList, SubCallKind},
    error::AnalysisError,
    protocol::{ClassifyResponse, ErrorBody, HeatmapResponse, IMAGE_FORM_FIELD},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    settings::{ClientSettings, InferenceEndpoints},
    validator::SelectedImage,
};

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn generate_heatmap(&self, image: &SelectedImage) -> Result<HeatmapImage, AnalysisError>;
    async fn classify_image(&self, image: &SelectedImage) -> Result<PredictionList, AnalysisError>;
}

/// Stands in when no usable endpoint configuration exists; every call is a network failure.
pub struct MissingInferenceService;

/// Builds the HTTP service, or falls back to [`MissingInferenceService`] when the
/// settings cannot produce one.
pub fn inference_service_from_settings(settings: &ClientSettings) -> Arc<dyn InferenceService> {
    match HttpInferenceService::from_settings(settings) {
        Ok(service) => {
            info!(
                heatmap = %service.endpoints().heatmap,
                predictions = %service.endpoints().predictions,
                "inference: endpoints configured"
            );
            Arc::new(service)
        }
        Err(err) => {
            warn!(error = %err, "inference: no usable endpoint configuration, analyses will fail");
            Arc::new(MissingInferenceService)
        }
    }
}

#[async_trait]
impl InferenceService for MissingInferenceService {
    async fn generate_heatmap(
        &self,
        _image: &SelectedImage,
    ) -> Result<HeatmapImage, AnalysisError> {
        Err(AnalysisError::network(
            SubCallKind::Heatmap,
            "inference service is unavailable",
        ))
    }

    async fn classify_image(
        &self,
        _image: &SelectedImage,
    ) -> Result<PredictionList, AnalysisError> {
        Err(AnalysisError::network(
            SubCallKind::Predictions,
            "inference service is unavailable",
        ))
    }
}

pub struct HttpInferenceService {
    http: Client,
    endpoints: InferenceEndpoints,
    max_predictions: Option<usize>,
}

impl HttpInferenceService {
    pub fn new(endpoints: InferenceEndpoints) -> Self {
        Self::with_client(Client::new(), endpoints)
    }

    pub fn with_client(http: Client, endpoints: InferenceEndpoints) -> Self {
        Self {
            http,
            endpoints,
            max_predictions: None,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        let mut service = Self::with_client(http, settings.endpoints()?);
        service.max_predictions = settings.max_predictions;
        Ok(service)
    }

    pub fn with_max_predictions(mut self, limit: Option<usize>) -> Self {
        self.max_predictions = limit;
        self
    }

    pub fn endpoints(&self) -> &InferenceEndpoints {
        &self.endpoints
    }

    async fn upload<T: DeserializeOwned>(
        &self,
        which: SubCallKind,
        url: &Url,
        image: &SelectedImage,
    ) -> Result<T, AnalysisError> {
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.name().to_string())
            .mime_str(image.media_type())
            .map_err(|e| AnalysisError::sub_call(which, format!("invalid media type: {e}")))?;
        let form = Form::new().part(IMAGE_FORM_FIELD, part);

        debug!(kind = %which, url = %url, bytes = image.len(), "inference: uploading image");
        let response = self
            .http
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(which, e))?;

        let status = response.status();
        if !status.is_success() {
            let reason = error_reason(status, response).await;
            warn!(kind = %which, status = status.as_u16(), reason = %reason, "inference: request rejected");
            return Err(AnalysisError::sub_call(which, reason));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(which, e)
            } else {
                AnalysisError::sub_call(which, format!("malformed response: {e}"))
            }
        })
    }
}

#[async_trait]
impl InferenceService for HttpInferenceService {
    async fn generate_heatmap(&self, image: &SelectedImage) -> Result<HeatmapImage, AnalysisError> {
        let which = SubCallKind::Heatmap;
        let body: HeatmapResponse = self.upload(which, &self.endpoints.heatmap, image).await?;
        let encoded = body
            .heatmap
            .ok_or_else(|| AnalysisError::sub_call(which, "no heatmap returned from server"))?;
        HeatmapImage::from_base64(&encoded)
            .map_err(|e| AnalysisError::sub_call(which, format!("invalid heatmap payload: {e}")))
    }

    async fn classify_image(&self, image: &SelectedImage) -> Result<PredictionList, AnalysisError> {
        let which = SubCallKind::Predictions;
        let body: ClassifyResponse = self
            .upload(which, &self.endpoints.predictions, image)
            .await?;
        let predictions = body
            .predictions
            .ok_or_else(|| AnalysisError::sub_call(which, "no predictions returned from server"))?;

        let predictions = predictions
            .into_iter()
            .map(Prediction::from)
            .map(|p| {
                if p.confidence.is_finite() && (0.0..=1.0).contains(&p.confidence) {
                    Ok(p)
                } else {
                    Err(AnalysisError::sub_call(
                        which,
                        format!("confidence {} for '{}' is outside [0, 1]", p.confidence, p.label),
                    ))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ranked = PredictionList::ranked(predictions);
        Ok(match self.max_predictions {
            Some(limit) => ranked.truncated(limit),
            None => ranked,
        })
    }
}

fn transport_error(which: SubCallKind, err: reqwest::Error) -> AnalysisError {
    AnalysisError::network(which, err.to_string())
}

async fn error_reason(status: StatusCode, response: Response) -> String {
    match response.json::<ErrorBody>().await {
        Ok(body) if !body.error.trim().is_empty() => body.error,
        _ => format!("server error (HTTP {})", status.as_u16()),
    }
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
