use shared::domain::Notification;

pub mod orchestrator;
pub mod selection;
pub mod service;
pub mod settings;
pub mod validator;

pub use orchestrator::{
    AnalysisHandle, AnalysisOrchestrator, AnalysisOutcome, AnalysisRequest, SubCall, UiState,
};
pub use selection::{Selection, SelectionStore};
pub use service::{
    inference_service_from_settings, HttpInferenceService, InferenceService,
    MissingInferenceService,
};
pub use settings::{
    load_settings, load_settings_from, ClientSettings, FailurePolicy, InferenceEndpoints,
};
pub use validator::{validate, FileCandidate, FileValidation, SelectedImage};

/// Everything a presenter or notification sink needs to follow the orchestrator.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(UiState),
    OutcomeUpdated(AnalysisOutcome),
    OutcomeCleared,
    Notification(Notification),
}
