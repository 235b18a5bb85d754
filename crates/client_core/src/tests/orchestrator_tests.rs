use async_trait::async_trait;
use shared::domain::Prediction;
use tokio::sync::{mpsc, oneshot};

use super::*;
use crate::validator::SelectedImage;

enum Payload {
    Heatmap(HeatmapImage),
    Predictions(PredictionList),
}

struct PendingCall {
    kind: SubCallKind,
    image: String,
    respond: oneshot::Sender<Result<Payload, AnalysisError>>,
}

impl PendingCall {
    fn heatmap(self, result: Result<HeatmapImage, AnalysisError>) {
        assert_eq!(self.kind, SubCallKind::Heatmap);
        let _ = self.respond.send(result.map(Payload::Heatmap));
    }

    fn predictions(self, result: Result<PredictionList, AnalysisError>) {
        assert_eq!(self.kind, SubCallKind::Predictions);
        let _ = self.respond.send(result.map(Payload::Predictions));
    }
}

/// Parks every call until the test answers it through the matching [`PendingCall`].
struct GatedInferenceService {
    calls: mpsc::UnboundedSender<PendingCall>,
}

impl GatedInferenceService {
    async fn park(
        &self,
        kind: SubCallKind,
        image: &SelectedImage,
    ) -> Result<Payload, AnalysisError> {
        let (respond, rx) = oneshot::channel();
        self.calls
            .send(PendingCall {
                kind,
                image: image.name().to_string(),
                respond,
            })
            .map_err(|_| AnalysisError::network(kind, "test harness dropped"))?;
        rx.await
            .map_err(|_| AnalysisError::network(kind, "test responder dropped"))?
    }
}

#[async_trait]
impl InferenceService for GatedInferenceService {
    async fn generate_heatmap(&self, image: &SelectedImage) -> Result<HeatmapImage, AnalysisError> {
        match self.park(SubCallKind::Heatmap, image).await? {
            Payload::Heatmap(heatmap) => Ok(heatmap),
            Payload::Predictions(_) => panic!("predictions payload sent to heatmap call"),
        }
    }

    async fn classify_image(&self, image: &SelectedImage) -> Result<PredictionList, AnalysisError> {
        match self.park(SubCallKind::Predictions, image).await? {
            Payload::Predictions(predictions) => Ok(predictions),
            Payload::Heatmap(_) => panic!("heatmap payload sent to predictions call"),
        }
    }
}

struct Harness {
    orchestrator: Arc<AnalysisOrchestrator>,
    calls: mpsc::UnboundedReceiver<PendingCall>,
    events: broadcast::Receiver<ClientEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(FailurePolicy::PartialSuccess)
    }

    fn with_policy(policy: FailurePolicy) -> Self {
        let (tx, calls) = mpsc::unbounded_channel();
        let orchestrator =
            AnalysisOrchestrator::with_policy(Arc::new(GatedInferenceService { calls: tx }), policy);
        let events = orchestrator.subscribe_events();
        Self {
            orchestrator,
            calls,
            events,
        }
    }

    /// Next two parked calls, returned as (heatmap, predictions).
    async fn next_pair(&mut self) -> (PendingCall, PendingCall) {
        let first = self.calls.recv().await.expect("first call");
        let second = self.calls.recv().await.expect("second call");
        match (first.kind, second.kind) {
            (SubCallKind::Heatmap, SubCallKind::Predictions) => (first, second),
            (SubCallKind::Predictions, SubCallKind::Heatmap) => (second, first),
            other => panic!("expected one call of each kind, got {other:?}"),
        }
    }

    fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn notifications(&mut self) -> Vec<Notification> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::Notification(notification) => Some(notification),
                _ => None,
            })
            .collect()
    }
}

fn png(name: &str) -> FileCandidate {
    FileCandidate::new(name, Some("image/png"), name.as_bytes().to_vec())
}

fn heatmap(tag: &str) -> HeatmapImage {
    HeatmapImage::from_png(format!("png:{tag}").into_bytes())
}

fn predictions(top: &str) -> PredictionList {
    PredictionList::ranked(vec![
        Prediction::new("SeaLake", 0.04),
        Prediction::new(top, 0.9),
    ])
}

fn http_error(which: SubCallKind) -> AnalysisError {
    AnalysisError::sub_call(which, "server error (HTTP 500)")
}

#[tokio::test]
async fn analyze_without_selection_fails_fast_without_dispatch() {
    let mut harness = Harness::new();

    let err = harness.orchestrator.analyze().err().expect("should fail");
    tokio::task::yield_now().await;

    assert_eq!(err, AnalysisError::NoImageSelected);
    assert_eq!(
        harness.orchestrator.ui_state(),
        UiState::Failed(AnalysisError::NoImageSelected)
    );
    assert!(harness.calls.try_recv().is_err(), "no call may be dispatched");
    assert!(harness.orchestrator.live_request().is_none());

    let notifications = harness.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    assert_eq!(notifications[0].title, "No Image Selected");
}

#[tokio::test]
async fn non_image_selection_fails_and_keeps_previous_selection() {
    let mut harness = Harness::new();
    assert_eq!(harness.orchestrator.select(png("field.png")), UiState::Ready);
    let kept = harness.orchestrator.selection().expect("selection").id;

    let state = harness.orchestrator.select(FileCandidate::new(
        "notes.txt",
        Some("text/plain"),
        b"hello".to_vec(),
    ));

    assert_eq!(state, UiState::Failed(AnalysisError::invalid_file()));
    let selection = harness.orchestrator.selection().expect("selection kept");
    assert_eq!(selection.id, kept);
    assert_eq!(selection.image.name(), "field.png");
    assert_eq!(harness.notifications().len(), 1);

    assert_eq!(harness.orchestrator.select(png("river.png")), UiState::Ready);
}

#[tokio::test]
async fn clear_twice_is_the_same_as_once() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("field.png"));

    assert_eq!(harness.orchestrator.clear(), UiState::Idle);
    let after_first = harness.drain_events();
    assert_eq!(harness.orchestrator.clear(), UiState::Idle);

    assert!(harness.drain_events().is_empty());
    assert!(after_first
        .iter()
        .any(|e| matches!(e, ClientEvent::StateChanged(UiState::Idle))));
    assert!(harness.orchestrator.selection().is_none());
    assert!(harness.orchestrator.outcome().is_none());
}

#[tokio::test]
async fn both_sub_calls_succeeding_yields_one_success_notification() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("field.png"));

    let handle = harness.orchestrator.analyze().expect("analyze");
    assert_eq!(harness.orchestrator.ui_state(), UiState::Analyzing);
    let (heat, pred) = harness.next_pair().await;
    assert_eq!(heat.image, "field.png");
    assert_eq!(pred.image, "field.png");

    heat.heatmap(Ok(heatmap("a")));
    pred.predictions(Ok(predictions("Forest")));
    handle.wait().await;

    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);
    let outcome = harness.orchestrator.outcome().expect("outcome");
    assert_eq!(outcome.heatmap_image(), Some(&heatmap("a")));
    assert_eq!(outcome.prediction_list()[0].label, "Forest");
    assert!(harness.orchestrator.live_request().is_none());

    let notifications = harness.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Success);
    assert_eq!(notifications[0].request, Some(RequestSeq(1)));
}

#[tokio::test]
async fn heatmap_ok_and_predictions_error_is_partial_success() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("field.png"));

    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;
    heat.heatmap(Ok(heatmap("partial")));
    pred.predictions(Err(http_error(SubCallKind::Predictions)));
    handle.wait().await;

    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);
    let outcome = harness.orchestrator.outcome().expect("outcome");
    assert_eq!(outcome.heatmap_image(), Some(&heatmap("partial")));
    assert!(outcome.prediction_list().is_empty());
    assert_eq!(
        outcome.predictions.error(),
        Some(&http_error(SubCallKind::Predictions))
    );

    let notifications = harness.notifications();
    assert_eq!(notifications.len(), 1, "exactly one terminal notification");
    assert_ne!(notifications[0].level, NotificationLevel::Error);
}

#[tokio::test]
async fn both_halves_failing_still_settles_as_succeeded_under_partial_policy() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("field.png"));

    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;
    heat.heatmap(Err(AnalysisError::network(SubCallKind::Heatmap, "connection refused")));
    pred.predictions(Err(http_error(SubCallKind::Predictions)));
    handle.wait().await;

    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);
    let outcome = harness.orchestrator.outcome().expect("outcome");
    assert!(outcome.heatmap_image().is_none());
    assert!(outcome.prediction_list().is_empty());

    let notifications = harness.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Warning);
    assert!(notifications[0].description.contains("heatmap and predictions"));
}

#[tokio::test]
async fn all_or_nothing_policy_fails_whole_analysis_on_one_failed_half() {
    let mut harness = Harness::with_policy(FailurePolicy::AllOrNothing);
    harness.orchestrator.select(png("field.png"));

    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;
    pred.predictions(Err(http_error(SubCallKind::Predictions)));
    heat.heatmap(Ok(heatmap("unused")));
    handle.wait().await;

    assert_eq!(
        harness.orchestrator.ui_state(),
        UiState::Failed(http_error(SubCallKind::Predictions))
    );
    assert!(harness.orchestrator.outcome().is_none());
    let notifications = harness.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
}

#[tokio::test]
async fn all_or_nothing_policy_succeeds_when_both_halves_do() {
    let mut harness = Harness::with_policy(FailurePolicy::AllOrNothing);
    harness.orchestrator.select(png("field.png"));

    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;
    heat.heatmap(Ok(heatmap("a")));
    pred.predictions(Ok(predictions("River")));
    handle.wait().await;

    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);
    assert!(harness.orchestrator.outcome().is_some());
}

#[tokio::test]
async fn first_half_is_visible_while_second_is_pending() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("field.png"));

    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;
    pred.predictions(Ok(predictions("Industrial")));
    handle.predictions.await.expect("predictions task");

    assert_eq!(harness.orchestrator.ui_state(), UiState::Analyzing);
    let outcome = harness.orchestrator.outcome().expect("outcome");
    assert!(outcome.heatmap.is_pending());
    assert_eq!(outcome.prediction_list()[0].label, "Industrial");
    assert!(harness.notifications().is_empty());

    heat.heatmap(Ok(heatmap("late")));
    handle.heatmap.await.expect("heatmap task");
    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);
}

#[tokio::test]
async fn second_analyze_discards_late_results_of_the_first() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("field.png"));

    let first = harness.orchestrator.analyze().expect("first analyze");
    let (first_heat, first_pred) = harness.next_pair().await;
    let second = harness.orchestrator.analyze().expect("second analyze");
    let (second_heat, second_pred) = harness.next_pair().await;
    assert!(second.request().seq > first.request().seq);

    second_pred.predictions(Ok(predictions("Residential")));
    second.predictions.await.expect("second predictions task");

    first_heat.heatmap(Ok(heatmap("stale")));
    first.heatmap.await.expect("first heatmap task");

    let outcome = harness.orchestrator.outcome().expect("outcome");
    assert_eq!(outcome.request, RequestSeq(2));
    assert!(outcome.heatmap.is_pending(), "stale heatmap must not land");
    assert_eq!(harness.orchestrator.ui_state(), UiState::Analyzing);

    second_heat.heatmap(Ok(heatmap("fresh")));
    second.heatmap.await.expect("second heatmap task");
    first_pred.predictions(Ok(predictions("Highway")));
    first.predictions.await.expect("first predictions task");

    let outcome = harness.orchestrator.outcome().expect("outcome");
    assert_eq!(outcome.request, RequestSeq(2));
    assert_eq!(outcome.heatmap_image(), Some(&heatmap("fresh")));
    assert_eq!(outcome.prediction_list()[0].label, "Residential");
    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);

    let events = harness.drain_events();
    let terminal = events
        .iter()
        .filter(|event| matches!(event, ClientEvent::Notification(_)))
        .count();
    assert_eq!(terminal, 1, "only the live request notifies");

    let presented: Vec<RequestSeq> = events
        .into_iter()
        .filter_map(|event| match event {
            ClientEvent::OutcomeUpdated(outcome) => Some(outcome.request),
            ClientEvent::Notification(notification) => notification.request,
            _ => None,
        })
        .collect();
    assert_eq!(
        presented.first(),
        Some(&RequestSeq(1)),
        "pending placeholder of the first request"
    );
    assert!(
        presented[1..].iter().all(|seq| *seq == RequestSeq(2)),
        "after the second request started only its results may be presented: {presented:?}"
    );
}

#[tokio::test]
async fn completion_order_does_not_change_the_outcome() {
    async fn run(heatmap_first: bool) -> AnalysisOutcome {
        let mut harness = Harness::new();
        harness.orchestrator.select(png("field.png"));
        let handle = harness.orchestrator.analyze().expect("analyze");
        let (heat, pred) = harness.next_pair().await;
        if heatmap_first {
            heat.heatmap(Ok(heatmap("same")));
            handle.heatmap.await.expect("heatmap task");
            pred.predictions(Ok(predictions("PermanentCrop")));
            handle.predictions.await.expect("predictions task");
        } else {
            pred.predictions(Ok(predictions("PermanentCrop")));
            handle.predictions.await.expect("predictions task");
            heat.heatmap(Ok(heatmap("same")));
            handle.heatmap.await.expect("heatmap task");
        }
        assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);
        harness.orchestrator.outcome().expect("outcome")
    }

    assert_eq!(run(true).await, run(false).await);
}

#[tokio::test]
async fn new_selection_supersedes_running_analysis() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("a.png"));
    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;

    assert_eq!(harness.orchestrator.select(png("b.png")), UiState::Ready);
    assert!(harness.orchestrator.outcome().is_none());
    assert!(harness.orchestrator.live_request().is_none());
    harness.drain_events();

    heat.heatmap(Ok(heatmap("for-a")));
    pred.predictions(Ok(predictions("Forest")));
    handle.wait().await;

    assert_eq!(harness.orchestrator.ui_state(), UiState::Ready);
    assert!(harness.orchestrator.outcome().is_none());
    assert!(harness.drain_events().is_empty(), "superseded results stay silent");

    let handle = harness.orchestrator.analyze().expect("analyze b");
    let (heat, pred) = harness.next_pair().await;
    assert_eq!(heat.image, "b.png");
    heat.heatmap(Ok(heatmap("for-b")));
    pred.predictions(Ok(predictions("River")));
    handle.wait().await;
    assert_eq!(
        harness.orchestrator.outcome().and_then(|o| o.heatmap_image().cloned()),
        Some(heatmap("for-b"))
    );
}

#[tokio::test]
async fn clear_during_analysis_returns_to_idle_and_ignores_results() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("a.png"));
    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;

    assert_eq!(harness.orchestrator.clear(), UiState::Idle);
    heat.heatmap(Ok(heatmap("a")));
    pred.predictions(Ok(predictions("Forest")));
    handle.wait().await;

    assert_eq!(harness.orchestrator.ui_state(), UiState::Idle);
    assert!(harness.orchestrator.outcome().is_none());
    assert!(harness.notifications().is_empty());
}

#[tokio::test]
async fn rejected_file_during_analysis_keeps_request_live() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("a.png"));
    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;

    let state = harness.orchestrator.select(FileCandidate::new(
        "clip.mp4",
        Some("video/mp4"),
        Vec::<u8>::new(),
    ));
    assert_eq!(state, UiState::Failed(AnalysisError::invalid_file()));
    assert_eq!(harness.orchestrator.live_request(), Some(handle.request()));

    heat.heatmap(Ok(heatmap("a")));
    pred.predictions(Ok(predictions("Forest")));
    handle.wait().await;
    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);
}

#[tokio::test]
async fn reanalyze_clears_previous_outcome_immediately() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("a.png"));
    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;
    heat.heatmap(Ok(heatmap("a")));
    pred.predictions(Ok(predictions("Forest")));
    handle.wait().await;

    let again = harness.orchestrator.analyze().expect("analyze again");
    let outcome = harness.orchestrator.outcome().expect("pending outcome");
    assert_eq!(outcome.request, again.request().seq);
    assert!(outcome.heatmap.is_pending() && outcome.predictions.is_pending());
    assert_eq!(harness.orchestrator.ui_state(), UiState::Analyzing);
}

#[tokio::test]
async fn stale_result_for_unknown_request_is_ignored() {
    let harness = Harness::new();
    harness.orchestrator.select(png("a.png"));
    let selection = harness.orchestrator.selection().expect("selection").id;

    harness.orchestrator.resolve(
        AnalysisRequest {
            seq: RequestSeq(42),
            selection,
        },
        SubCallResult::Heatmap(Ok(heatmap("ghost"))),
    );

    assert!(harness.orchestrator.outcome().is_none());
    assert_eq!(harness.orchestrator.ui_state(), UiState::Ready);
}

#[tokio::test]
async fn picker_states_round_trip() {
    let harness = Harness::new();
    assert_eq!(harness.orchestrator.begin_selection(), UiState::Selecting);
    assert_eq!(harness.orchestrator.cancel_selection(), UiState::Idle);

    harness.orchestrator.select(png("a.png"));
    assert_eq!(harness.orchestrator.begin_selection(), UiState::Selecting);
    assert_eq!(harness.orchestrator.cancel_selection(), UiState::Ready);

    harness.orchestrator.begin_selection();
    assert_eq!(harness.orchestrator.select(png("b.png")), UiState::Ready);
}

#[tokio::test]
async fn cancelled_picker_restores_finished_analysis() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("field.png"));
    let handle = harness.orchestrator.analyze().expect("analyze");
    let (heat, pred) = harness.next_pair().await;
    heat.heatmap(Ok(heatmap("a")));
    pred.predictions(Ok(predictions("Forest")));
    handle.wait().await;
    assert_eq!(harness.orchestrator.ui_state(), UiState::Succeeded);

    assert_eq!(harness.orchestrator.begin_selection(), UiState::Selecting);
    assert_eq!(harness.orchestrator.begin_selection(), UiState::Selecting);
    assert_eq!(harness.orchestrator.cancel_selection(), UiState::Succeeded);
    assert!(harness.orchestrator.outcome().is_some());
}

#[tokio::test]
async fn cancelled_picker_restores_failure() {
    let harness = Harness::new();
    harness.orchestrator.analyze().err().expect("no selection");
    let failed = UiState::Failed(AnalysisError::NoImageSelected);
    assert_eq!(harness.orchestrator.ui_state(), failed);

    harness.orchestrator.begin_selection();
    assert_eq!(harness.orchestrator.cancel_selection(), failed);
}

#[tokio::test]
async fn begin_selection_does_not_interrupt_analysis() {
    let mut harness = Harness::new();
    harness.orchestrator.select(png("a.png"));
    let _handle = harness.orchestrator.analyze().expect("analyze");
    let _pair = harness.next_pair().await;

    assert_eq!(harness.orchestrator.begin_selection(), UiState::Analyzing);
    assert_eq!(harness.orchestrator.cancel_selection(), UiState::Analyzing);
}
