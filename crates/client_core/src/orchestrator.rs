//! Analysis orchestration: selection, the two sub-call tasks, and the UI state they drive.
//!
//! Every request carries a sequence number. A sub-call result is applied only while its
//! request is still the live one for the current selection; anything else is dropped on
//! arrival. Superseded tasks are never aborted, they run to completion and are ignored.

use std::sync::{Arc, Mutex, MutexGuard};

use shared::{
    domain::{
        HeatmapImage, Notification, NotificationLevel, PredictionList, RequestSeq, SelectionId,
        SubCallKind,
    },
    error::AnalysisError,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    selection::{Selection, SelectionStore},
    service::InferenceService,
    settings::FailurePolicy,
    validator::FileCandidate,
    ClientEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiState {
    Idle,
    Selecting,
    Ready,
    Analyzing,
    Succeeded,
    Failed(AnalysisError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub seq: RequestSeq,
    pub selection: SelectionId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubCall<T> {
    Pending,
    Ready(T),
    Failed(AnalysisError),
}

impl<T> SubCall<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl<T> From<Result<T, AnalysisError>> for SubCall<T> {
    fn from(value: Result<T, AnalysisError>) -> Self {
        match value {
            Ok(value) => Self::Ready(value),
            Err(err) => Self::Failed(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub request: RequestSeq,
    pub heatmap: SubCall<HeatmapImage>,
    pub predictions: SubCall<PredictionList>,
}

impl AnalysisOutcome {
    fn pending(request: RequestSeq) -> Self {
        Self {
            request,
            heatmap: SubCall::Pending,
            predictions: SubCall::Pending,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.heatmap.is_pending() && !self.predictions.is_pending()
    }

    pub fn heatmap_image(&self) -> Option<&HeatmapImage> {
        self.heatmap.value()
    }

    /// Ranked predictions, empty while pending or when the call failed.
    pub fn prediction_list(&self) -> &[shared::domain::Prediction] {
        self.predictions
            .value()
            .map(PredictionList::as_slice)
            .unwrap_or_default()
    }

    /// First failed half, heatmap before predictions.
    pub fn first_error(&self) -> Option<&AnalysisError> {
        self.heatmap.error().or_else(|| self.predictions.error())
    }

    fn failed_kinds(&self) -> Vec<SubCallKind> {
        let mut kinds = Vec::new();
        if self.heatmap.error().is_some() {
            kinds.push(SubCallKind::Heatmap);
        }
        if self.predictions.error().is_some() {
            kinds.push(SubCallKind::Predictions);
        }
        kinds
    }
}

#[derive(Debug)]
pub(crate) enum SubCallResult {
    Heatmap(Result<HeatmapImage, AnalysisError>),
    Predictions(Result<PredictionList, AnalysisError>),
}

impl SubCallResult {
    fn kind(&self) -> SubCallKind {
        match self {
            Self::Heatmap(_) => SubCallKind::Heatmap,
            Self::Predictions(_) => SubCallKind::Predictions,
        }
    }
}

/// Tasks spawned for one request. Dropping the handle detaches them.
pub struct AnalysisHandle {
    request: AnalysisRequest,
    heatmap: JoinHandle<()>,
    predictions: JoinHandle<()>,
}

impl AnalysisHandle {
    pub fn request(&self) -> AnalysisRequest {
        self.request
    }

    /// Waits until both sub-call results have been applied or discarded.
    pub async fn wait(self) {
        let (heatmap, predictions) = futures::future::join(self.heatmap, self.predictions).await;
        for (kind, joined) in [
            (SubCallKind::Heatmap, heatmap),
            (SubCallKind::Predictions, predictions),
        ] {
            if let Err(err) = joined {
                warn!(request = %self.request.seq, kind = %kind, error = %err, "analysis: sub-call task aborted");
            }
        }
    }
}

struct OrchestratorState {
    selection: SelectionStore,
    ui_state: UiState,
    /// State to return to when an open picker is cancelled.
    resume: Option<UiState>,
    last_seq: u64,
    live: Option<AnalysisRequest>,
    outcome: Option<AnalysisOutcome>,
}

pub struct AnalysisOrchestrator {
    service: Arc<dyn InferenceService>,
    policy: FailurePolicy,
    inner: Mutex<OrchestratorState>,
    events: broadcast::Sender<ClientEvent>,
}

impl AnalysisOrchestrator {
    pub fn new(service: Arc<dyn InferenceService>) -> Arc<Self> {
        Self::with_policy(service, FailurePolicy::default())
    }

    pub fn with_policy(service: Arc<dyn InferenceService>, policy: FailurePolicy) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            service,
            policy,
            inner: Mutex::new(OrchestratorState {
                selection: SelectionStore::new(),
                ui_state: UiState::Idle,
                resume: None,
                last_seq: 0,
                live: None,
                outcome: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn ui_state(&self) -> UiState {
        self.lock().ui_state.clone()
    }

    pub fn outcome(&self) -> Option<AnalysisOutcome> {
        self.lock().outcome.clone()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.lock().selection.current().cloned()
    }

    pub fn live_request(&self) -> Option<AnalysisRequest> {
        self.lock().live
    }

    /// A picker or drop target opened. Ignored while an analysis is running.
    pub fn begin_selection(&self) -> UiState {
        let mut state = self.lock();
        if !matches!(state.ui_state, UiState::Analyzing | UiState::Selecting) {
            state.resume = Some(state.ui_state.clone());
            self.transition(&mut state, UiState::Selecting);
        }
        state.ui_state.clone()
    }

    /// Closes the picker without a file and restores the state it was opened from.
    pub fn cancel_selection(&self) -> UiState {
        let mut state = self.lock();
        if state.ui_state == UiState::Selecting {
            let next = match state.resume.take() {
                Some(previous) => previous,
                None if state.selection.current().is_some() => UiState::Ready,
                None => UiState::Idle,
            };
            self.transition(&mut state, next);
        }
        state.ui_state.clone()
    }

    pub fn select(&self, file: FileCandidate) -> UiState {
        let mut state = self.lock();
        state.resume = None;
        let name = file.name.clone();
        match state.selection.select(file) {
            Ok(selection) => {
                let id = selection.id;
                info!(selection = %id, name = %name, "selection: image accepted");
                self.supersede(&mut state, "new selection");
                self.transition(&mut state, UiState::Ready);
            }
            Err(err) => {
                warn!(name = %name, error = %err, "selection: file rejected");
                self.notify(Notification::new(
                    NotificationLevel::Error,
                    "Invalid File",
                    "Please upload a valid image file.",
                    None,
                ));
                self.transition(&mut state, UiState::Failed(err));
            }
        }
        state.ui_state.clone()
    }

    pub fn clear(&self) -> UiState {
        let mut state = self.lock();
        state.resume = None;
        if state.selection.clear().is_some() {
            debug!("selection: cleared");
        }
        self.supersede(&mut state, "selection cleared");
        self.transition(&mut state, UiState::Idle);
        state.ui_state.clone()
    }

    /// Starts both sub-calls for the current selection. Must run inside a tokio runtime.
    pub fn analyze(self: &Arc<Self>) -> Result<AnalysisHandle, AnalysisError> {
        let (request, image) = {
            let mut state = self.lock();
            state.resume = None;
            let Some(selection) = state.selection.current().cloned() else {
                warn!("analysis: no image selected");
                let err = AnalysisError::NoImageSelected;
                self.notify(Notification::new(
                    NotificationLevel::Error,
                    "No Image Selected",
                    "Please upload an image to analyze",
                    None,
                ));
                self.transition(&mut state, UiState::Failed(err.clone()));
                return Err(err);
            };

            state.last_seq += 1;
            let request = AnalysisRequest {
                seq: RequestSeq(state.last_seq),
                selection: selection.id,
            };
            if let Some(previous) = state.live.replace(request) {
                debug!(superseded = %previous.seq, by = %request.seq, "analysis: request superseded");
            }
            let outcome = AnalysisOutcome::pending(request.seq);
            state.outcome = Some(outcome.clone());
            self.transition(&mut state, UiState::Analyzing);
            let _ = self.events.send(ClientEvent::OutcomeUpdated(outcome));
            (request, selection.image)
        };

        info!(
            request = %request.seq,
            selection = %request.selection,
            name = %image.name(),
            "analysis: dispatching heatmap and predictions"
        );

        let heatmap = {
            let orchestrator = Arc::clone(self);
            let image = image.clone();
            tokio::spawn(async move {
                let result = orchestrator.service.generate_heatmap(&image).await;
                orchestrator.resolve(request, SubCallResult::Heatmap(result));
            })
        };
        let predictions = {
            let orchestrator = Arc::clone(self);
            tokio::spawn(async move {
                let result = orchestrator.service.classify_image(&image).await;
                orchestrator.resolve(request, SubCallResult::Predictions(result));
            })
        };

        Ok(AnalysisHandle {
            request,
            heatmap,
            predictions,
        })
    }

    /// Applies one sub-call result if `request` is still live; otherwise drops it.
    pub(crate) fn resolve(&self, request: AnalysisRequest, result: SubCallResult) {
        let kind = result.kind();
        let mut state = self.lock();

        let is_live = state.live == Some(request) && state.selection.is_current(request.selection);
        let Some(outcome) = state
            .outcome
            .as_mut()
            .filter(|outcome| is_live && outcome.request == request.seq)
        else {
            debug!(request = %request.seq, kind = %kind, "analysis: discarding superseded result");
            return;
        };

        match result {
            SubCallResult::Heatmap(result) => {
                if let Err(err) = &result {
                    warn!(request = %request.seq, error = %err, "analysis: heatmap failed");
                }
                outcome.heatmap = result.into();
            }
            SubCallResult::Predictions(result) => {
                if let Err(err) = &result {
                    warn!(request = %request.seq, error = %err, "analysis: predictions failed");
                }
                outcome.predictions = result.into();
            }
        }
        let snapshot = outcome.clone();
        let _ = self.events.send(ClientEvent::OutcomeUpdated(snapshot.clone()));

        if snapshot.is_resolved() {
            self.finish(&mut state, snapshot);
        }
    }

    fn finish(&self, state: &mut OrchestratorState, outcome: AnalysisOutcome) {
        state.live = None;
        let seq = outcome.request;
        let failed = outcome.failed_kinds();

        match (self.policy, outcome.first_error()) {
            (FailurePolicy::AllOrNothing, Some(err)) => {
                let err = err.clone();
                info!(request = %seq, error = %err, "analysis: failed");
                state.outcome = None;
                let _ = self.events.send(ClientEvent::OutcomeCleared);
                self.notify(Notification::new(
                    NotificationLevel::Error,
                    "Analysis Failed",
                    err.to_string(),
                    Some(seq),
                ));
                self.transition(state, UiState::Failed(err));
            }
            _ if failed.is_empty() => {
                info!(request = %seq, "analysis: complete");
                self.notify(Notification::new(
                    NotificationLevel::Success,
                    "Analysis Complete",
                    "Image classification and GradCAM explanation generated successfully",
                    Some(seq),
                ));
                self.transition(state, UiState::Succeeded);
            }
            _ => {
                let missing = failed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" and ");
                info!(request = %seq, missing = %missing, "analysis: complete with missing results");
                self.notify(Notification::new(
                    NotificationLevel::Warning,
                    "Analysis Complete",
                    format!("Results are incomplete: {missing} unavailable"),
                    Some(seq),
                ));
                self.transition(state, UiState::Succeeded);
            }
        }
    }

    fn supersede(&self, state: &mut OrchestratorState, reason: &str) {
        if let Some(previous) = state.live.take() {
            debug!(request = %previous.seq, reason, "analysis: request superseded");
        }
        if state.outcome.take().is_some() {
            let _ = self.events.send(ClientEvent::OutcomeCleared);
        }
    }

    fn transition(&self, state: &mut OrchestratorState, next: UiState) {
        if state.ui_state != next {
            debug!(from = ?state.ui_state, to = ?next, "ui: state changed");
            state.ui_state = next.clone();
            let _ = self.events.send(ClientEvent::StateChanged(next));
        }
    }

    fn notify(&self, notification: Notification) {
        let _ = self.events.send(ClientEvent::Notification(notification));
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
