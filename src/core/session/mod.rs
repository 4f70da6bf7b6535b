//! Session lifecycle controller.
//!
//! The controller is the single owner of a session's UI state. It reacts to
//! realtime events, camera results and analysis reports, and hands background
//! work (delivery, artifact cleanup) to spawned tasks that share only the
//! [`SessionHandle`].
//!
//! # States
//!
//! ```text
//! Idle --take_photo--> CameraRequested --photo--> Analyzing --report--> Idle
//!   ^                        |                                           |
//!   +------- dismiss --------+                   stop() from any state --+
//! ```
//!
//! A `take_photo` call while analyzing is ignored. Analysis reports carry the
//! generation they were started in; a report from an earlier generation (the
//! session was restarted or the image superseded) is discarded and its
//! artifact removed.

mod artifacts;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::capture::{CaptureError, CapturedImage};
use crate::core::delivery::{DeliveryAdapter, DeliveryPlan, DeliveryPolicy, SessionHandle};
use crate::core::realtime::{
    DataChannel, RealtimeEvent, ToolInvocation, classify, classify_latest,
};
use crate::core::vision::{
    DEFAULT_ANALYSIS_TIMEOUT, VisionAnalyzer, VisionError, analyze_with_timeout,
};

pub use artifacts::{ArtifactError, ArtifactResult, ArtifactStore, HttpArtifactStore};

/// Error shown when analysis exceeds its budget.
pub const TIMEOUT_MESSAGE: &str = "Image analysis timed out. Please try again.";

/// Error shown for any other analysis failure.
pub const FAILURE_MESSAGE: &str = "Failed to analyze image. Please try again.";

/// Spoken when analysis exceeds its budget.
pub const TIMEOUT_APOLOGY: &str =
    "Sorry, looking at that photo took too long. Please ask me to take another one.";

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    CameraRequested,
    Analyzing,
}

/// Reference to the image currently shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub id: Uuid,
    /// Server-side filename once persisted
    pub remote: Option<String>,
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub camera_visible: bool,
    pub capture_enabled: bool,
    pub analyzing: bool,
    pub error: Option<String>,
    /// Non-fatal camera error shown in place of the feed
    pub camera_error: Option<String>,
    pub image: Option<ImageRef>,
    pub description: Option<String>,
}

/// Result of feeding an analysis report to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Completed(String),
    Failed(VisionError),
    /// The report belonged to an earlier generation and was discarded
    Stale,
}

/// Collaborators of a [`SessionController`].
#[derive(Clone)]
pub struct SessionDeps {
    pub analyzer: Arc<dyn VisionAnalyzer>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub delivery_policy: DeliveryPolicy,
    pub analysis_timeout: Duration,
}

impl SessionDeps {
    pub fn new(analyzer: Arc<dyn VisionAnalyzer>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            analyzer,
            artifacts,
            delivery_policy: DeliveryPolicy::default(),
            analysis_timeout: DEFAULT_ANALYSIS_TIMEOUT,
        }
    }
}

/// An analysis ready to run. Owns everything it needs so it can be moved into
/// a task while the controller keeps handling events.
pub struct PendingAnalysis {
    generation: u64,
    image: CapturedImage,
    call_id: Option<String>,
    analyzer: Arc<dyn VisionAnalyzer>,
    artifacts: Arc<dyn ArtifactStore>,
    timeout: Duration,
}

impl PendingAnalysis {
    pub fn image(&self) -> &CapturedImage {
        &self.image
    }

    /// Persist the image and analyze it concurrently.
    pub async fn run(self) -> AnalysisReport {
        let image_id = self.image.id;
        let persist = async {
            match self.artifacts.persist(&self.image).await {
                Ok(filename) => Some(filename),
                Err(e) => {
                    tracing::warn!("Failed to persist captured image: {}", e);
                    None
                }
            }
        };
        let analyze = analyze_with_timeout(self.analyzer.clone(), self.image.clone(), self.timeout);
        let (remote, result) = tokio::join!(persist, analyze);

        AnalysisReport {
            generation: self.generation,
            image_id,
            call_id: self.call_id,
            remote,
            result,
        }
    }
}

/// Finished analysis, fed back through [`SessionController::complete_analysis`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub generation: u64,
    pub image_id: Uuid,
    pub call_id: Option<String>,
    pub remote: Option<String>,
    pub result: Result<String, VisionError>,
}

/// Drives one realtime session.
pub struct SessionController {
    session: SessionHandle,
    delivery: DeliveryAdapter,
    deps: SessionDeps,
    phase: SessionPhase,
    ui: UiState,
    generation: u64,
    call_id: Option<String>,
    pending_delivery: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(deps: SessionDeps) -> Self {
        let session = SessionHandle::new();
        let delivery = DeliveryAdapter::new(session.clone(), deps.delivery_policy.clone());
        Self {
            session,
            delivery,
            deps,
            phase: SessionPhase::Idle,
            ui: UiState::default(),
            generation: 0,
            call_id: None,
            pending_delivery: None,
            background: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Begin a session over `channel`.
    ///
    /// Each start gets its own [`SessionHandle`], so deliveries still backing
    /// off for an earlier session never reach the new channel.
    pub fn start(&mut self, channel: Arc<dyn DataChannel>) {
        self.session.set_active(false);
        self.session.detach();
        if let Some(previous) = self.pending_delivery.take() {
            self.background.push(previous);
        }

        self.session = SessionHandle::new();
        self.delivery = DeliveryAdapter::new(self.session.clone(), self.deps.delivery_policy.clone());
        self.session.attach(channel);
        self.session.set_active(true);
        self.generation += 1;
        self.phase = SessionPhase::Idle;
        self.ui = UiState::default();
        self.call_id = None;
        tracing::info!("Session started");
    }

    /// End the session. Resets UI state and removes the server copy of the
    /// current image. In-flight deliveries stop at their next readiness check.
    pub fn stop(&mut self) {
        if !self.session.is_active() {
            return;
        }
        self.session.set_active(false);
        self.session.detach();
        self.generation += 1;
        self.phase = SessionPhase::Idle;
        self.call_id = None;

        let image = self.ui.image.take();
        self.ui = UiState::default();
        if let Some(remote) = image.and_then(|image| image.remote) {
            self.spawn_cleanup(remote);
        }
        tracing::info!("Session stopped");
    }

    /// React to the newest realtime event. Returns true when the camera was
    /// requested.
    pub fn handle_event(&mut self, event: &RealtimeEvent) -> bool {
        self.handle_invocation(classify(event))
    }

    /// React to an arrival-ordered event sequence; only the newest is inspected.
    pub fn handle_events(&mut self, events: &[RealtimeEvent]) -> bool {
        self.handle_invocation(classify_latest(events))
    }

    fn handle_invocation(&mut self, invocation: ToolInvocation) -> bool {
        if !self.session.is_active() || !invocation.is_take_photo() {
            return false;
        }
        if self.phase == SessionPhase::Analyzing {
            tracing::debug!("Ignoring take_photo while an analysis is in progress");
            return false;
        }

        self.phase = SessionPhase::CameraRequested;
        self.call_id = invocation.call_id;
        self.ui.camera_visible = true;
        self.ui.capture_enabled = true;
        self.ui.camera_error = None;
        self.ui.error = None;
        tracing::info!("Camera requested");
        true
    }

    /// The camera could not be opened. Shown in place of the feed.
    pub fn camera_failed(&mut self, error: &CaptureError) {
        tracing::warn!("Camera error: {}", error);
        self.ui.camera_error = Some(error.to_string());
        self.ui.capture_enabled = false;
    }

    /// Close the camera without capturing.
    pub fn dismiss_camera(&mut self) {
        self.ui.camera_visible = false;
        self.ui.camera_error = None;
        if self.phase == SessionPhase::CameraRequested {
            self.phase = SessionPhase::Idle;
            self.call_id = None;
        }
    }

    /// A photo was taken. Returns the analysis to run, or `None` when no
    /// camera request is outstanding.
    pub fn photo_captured(&mut self, image: CapturedImage) -> Option<PendingAnalysis> {
        if !self.session.is_active() || self.phase != SessionPhase::CameraRequested {
            tracing::debug!("Ignoring photo outside of a camera request");
            return None;
        }

        if let Some(remote) = self.ui.image.take().and_then(|previous| previous.remote) {
            self.spawn_cleanup(remote);
        }

        self.generation += 1;
        self.phase = SessionPhase::Analyzing;
        self.ui.camera_visible = false;
        self.ui.camera_error = None;
        self.ui.analyzing = true;
        self.ui.error = None;
        self.ui.description = None;
        self.ui.image = Some(ImageRef {
            id: image.id,
            remote: None,
        });

        Some(PendingAnalysis {
            generation: self.generation,
            image,
            call_id: self.call_id.take(),
            analyzer: self.deps.analyzer.clone(),
            artifacts: self.deps.artifacts.clone(),
            timeout: self.deps.analysis_timeout,
        })
    }

    /// Apply a finished analysis.
    pub fn complete_analysis(&mut self, report: AnalysisReport) -> AnalysisOutcome {
        let current = self.session.is_active()
            && report.generation == self.generation
            && self.phase == SessionPhase::Analyzing;
        if !current {
            tracing::debug!("Discarding stale analysis for image {}", report.image_id);
            if let Some(remote) = report.remote {
                self.spawn_cleanup(remote);
            }
            return AnalysisOutcome::Stale;
        }

        if let Some(image) = self.ui.image.as_mut() {
            if image.id == report.image_id {
                image.remote = report.remote;
            }
        }
        self.phase = SessionPhase::Idle;
        self.ui.analyzing = false;

        match report.result {
            Ok(text) => {
                tracing::info!("Image analysis complete");
                self.ui.error = None;
                self.ui.description = Some(text.clone());
                self.queue_delivery(DeliveryPlan::AnalysisResult {
                    call_id: report.call_id,
                    text: text.clone(),
                });
                AnalysisOutcome::Completed(text)
            }
            Err(e) => {
                tracing::warn!("Image analysis failed: {}", e);
                if matches!(e, VisionError::Timeout(_)) {
                    self.ui.error = Some(TIMEOUT_MESSAGE.to_string());
                    self.queue_delivery(DeliveryPlan::Apology {
                        text: TIMEOUT_APOLOGY.to_string(),
                    });
                } else {
                    self.ui.error = Some(FAILURE_MESSAGE.to_string());
                }
                AnalysisOutcome::Failed(e)
            }
        }
    }

    /// Apply reports of analyses still in flight, waiting at most `bound` for
    /// the senders to finish. Used at shutdown after [`stop`](Self::stop) so
    /// that artifacts persisted by late analyses are removed.
    pub async fn drain_reports(
        &mut self,
        reports: &mut mpsc::Receiver<AnalysisReport>,
        bound: Duration,
    ) {
        let drain = async {
            while let Some(report) = reports.recv().await {
                self.complete_analysis(report);
            }
        };
        if tokio::time::timeout(bound, drain).await.is_err() {
            tracing::warn!("Gave up waiting for in-flight analyses after {:?}", bound);
        }
    }

    /// Wait for background deliveries and cleanups to finish.
    pub async fn settle(&mut self) {
        if let Some(handle) = self.pending_delivery.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Delivery task failed: {}", e);
            }
        }
        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Background task failed: {}", e);
            }
        }
    }

    /// Deliveries run one at a time: each waits for the previous to finish.
    fn queue_delivery(&mut self, plan: DeliveryPlan) {
        let previous = self.pending_delivery.take();
        let delivery = self.delivery.clone();
        self.pending_delivery = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::warn!("Previous delivery task failed: {}", e);
                }
            }
            delivery.deliver_logged(&plan).await;
        }));
    }

    fn spawn_cleanup(&mut self, filename: String) {
        self.background.retain(|handle| !handle.is_finished());
        let artifacts = self.deps.artifacts.clone();
        self.background.push(tokio::spawn(async move {
            match artifacts.remove(&filename).await {
                Ok(()) => tracing::debug!("Removed artifact {}", filename),
                Err(e) => tracing::warn!("Failed to remove artifact {}: {}", filename, e),
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::{ClientEvent, RealtimeResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingChannel {
        open: AtomicBool,
        sent: Mutex<Vec<ClientEvent>>,
    }

    impl RecordingChannel {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(open),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DataChannel for RecordingChannel {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
            self.sent.lock().push(event);
            Ok(())
        }
    }

    struct FixedAnalyzer(VisionResult);

    type VisionResult = Result<String, VisionError>;

    #[async_trait]
    impl VisionAnalyzer for FixedAnalyzer {
        async fn analyze(&self, _image: &CapturedImage) -> VisionResult {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct MemoryArtifacts {
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryArtifacts {
        async fn persist(&self, image: &CapturedImage) -> ArtifactResult<String> {
            Ok(format!("{}.jpg", image.id))
        }

        async fn remove(&self, filename: &str) -> ArtifactResult<()> {
            self.removed.lock().push(filename.to_string());
            Ok(())
        }
    }

    fn take_photo() -> RealtimeEvent {
        RealtimeEvent::from_json(
            r#"{"type":"function_call","function":{"name":"take_photo"},"call_id":"call_7"}"#,
        )
        .unwrap()
    }

    fn controller(result: VisionResult) -> (SessionController, Arc<MemoryArtifacts>) {
        let artifacts = Arc::new(MemoryArtifacts::default());
        let deps = SessionDeps::new(Arc::new(FixedAnalyzer(result)), artifacts.clone());
        (SessionController::new(deps), artifacts)
    }

    fn image() -> CapturedImage {
        CapturedImage::new("image/jpeg", vec![0xFF, 0xD8, 0xFF])
    }

    #[test]
    fn test_events_ignored_while_inactive() {
        let (mut controller, _) = controller(Ok(String::new()));
        assert!(!controller.handle_event(&take_photo()));
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(!controller.ui().camera_visible);
    }

    #[tokio::test]
    async fn test_take_photo_shows_camera_and_clears_error() {
        let (mut controller, _) = controller(Ok(String::new()));
        controller.start(RecordingChannel::new(true));
        controller.ui.error = Some("old".to_string());

        assert!(controller.handle_event(&take_photo()));
        assert_eq!(controller.phase(), SessionPhase::CameraRequested);
        assert!(controller.ui().camera_visible);
        assert!(controller.ui().capture_enabled);
        assert!(controller.ui().error.is_none());
    }

    #[tokio::test]
    async fn test_take_photo_ignored_while_analyzing() {
        let (mut controller, _) = controller(Ok(String::new()));
        controller.start(RecordingChannel::new(true));
        controller.handle_event(&take_photo());
        let _pending = controller.photo_captured(image()).unwrap();

        assert!(!controller.handle_event(&take_photo()));
        assert_eq!(controller.phase(), SessionPhase::Analyzing);
        assert!(!controller.ui().camera_visible);
    }

    #[tokio::test]
    async fn test_photo_without_request_is_ignored() {
        let (mut controller, _) = controller(Ok(String::new()));
        controller.start(RecordingChannel::new(true));
        assert!(controller.photo_captured(image()).is_none());
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_camera_failure_disables_capture() {
        let (mut controller, _) = controller(Ok(String::new()));
        controller.start(RecordingChannel::new(true));
        controller.handle_event(&take_photo());
        controller.camera_failed(&CaptureError::PermissionDenied);

        assert!(controller.ui().camera_visible);
        assert!(!controller.ui().capture_enabled);
        assert_eq!(
            controller.ui().camera_error.as_deref(),
            Some("Camera permission denied")
        );

        controller.dismiss_camera();
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(!controller.ui().camera_visible);
        assert!(controller.ui().camera_error.is_none());
    }

    #[tokio::test]
    async fn test_successful_analysis_delivers_triple() {
        let (mut controller, _) = controller(Ok("A cup on a table.".to_string()));
        let channel = RecordingChannel::new(true);
        controller.start(channel.clone());
        controller.handle_event(&take_photo());

        let report = controller.photo_captured(image()).unwrap().run().await;
        let outcome = controller.complete_analysis(report);
        controller.settle().await;

        assert_eq!(outcome, AnalysisOutcome::Completed("A cup on a table.".to_string()));
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(!controller.ui().analyzing);
        assert!(controller.ui().error.is_none());
        assert!(controller.ui().image.as_ref().unwrap().remote.is_some());
        assert_eq!(
            *channel.sent.lock(),
            DeliveryPlan::AnalysisResult {
                call_id: Some("call_7".to_string()),
                text: "A cup on a table.".to_string(),
            }
            .messages()
        );
    }

    #[tokio::test]
    async fn test_request_failure_sets_error_without_delivery() {
        let (mut controller, _) = controller(Err(VisionError::RequestFailed("500".to_string())));
        let channel = RecordingChannel::new(true);
        controller.start(channel.clone());
        controller.handle_event(&take_photo());

        let report = controller.photo_captured(image()).unwrap().run().await;
        let outcome = controller.complete_analysis(report);
        controller.settle().await;

        assert!(matches!(outcome, AnalysisOutcome::Failed(VisionError::RequestFailed(_))));
        assert_eq!(controller.ui().error.as_deref(), Some(FAILURE_MESSAGE));
        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_cleans_up_image_once_and_resets_ui() {
        let (mut controller, artifacts) = controller(Ok("A cup.".to_string()));
        controller.start(RecordingChannel::new(true));
        controller.handle_event(&take_photo());
        let report = controller.photo_captured(image()).unwrap().run().await;
        let filename = report.remote.clone().unwrap();
        controller.complete_analysis(report);

        controller.stop();
        controller.stop();
        controller.settle().await;

        assert_eq!(*artifacts.removed.lock(), vec![filename]);
        assert_eq!(controller.ui(), &UiState::default());
        assert!(!controller.is_active());
        assert!(controller.session().channel().is_none());
    }

    #[tokio::test]
    async fn test_stale_report_is_discarded_and_cleaned_up() {
        let (mut controller, artifacts) = controller(Ok("A cup.".to_string()));
        let channel = RecordingChannel::new(true);
        controller.start(channel.clone());
        controller.handle_event(&take_photo());
        let pending = controller.photo_captured(image()).unwrap();

        controller.stop();
        controller.start(channel.clone());

        let report = pending.run().await;
        let filename = report.remote.clone().unwrap();
        assert_eq!(controller.complete_analysis(report), AnalysisOutcome::Stale);
        controller.settle().await;

        assert!(channel.sent.lock().is_empty());
        assert_eq!(*artifacts.removed.lock(), vec![filename]);
        assert!(controller.ui().description.is_none());
    }

    #[tokio::test]
    async fn test_new_capture_supersedes_previous_image() {
        let (mut controller, artifacts) = controller(Ok("A cup.".to_string()));
        controller.start(RecordingChannel::new(true));

        controller.handle_event(&take_photo());
        let first = controller.photo_captured(image()).unwrap().run().await;
        let first_file = first.remote.clone().unwrap();
        controller.complete_analysis(first);

        controller.handle_event(&take_photo());
        let second = controller.photo_captured(image()).unwrap();
        assert_eq!(
            controller.ui().image.as_ref().map(|image| image.id),
            Some(second.image().id)
        );
        drop(second);
        controller.settle().await;

        assert_eq!(*artifacts.removed.lock(), vec![first_file]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_during_backoff_does_not_reach_new_channel() {
        let (mut controller, _) = controller(Ok("A cup.".to_string()));
        let closed = RecordingChannel::new(false);
        controller.start(closed.clone());
        controller.handle_event(&take_photo());
        let report = controller.photo_captured(image()).unwrap().run().await;
        controller.complete_analysis(report);

        // The delivery is now waiting out its first backoff
        tokio::time::sleep(Duration::from_millis(500)).await;
        controller.stop();
        let reopened = RecordingChannel::new(true);
        controller.start(reopened.clone());
        controller.settle().await;

        assert!(closed.sent.lock().is_empty());
        assert!(reopened.sent.lock().is_empty());
        assert!(controller.is_active());

        // The new session still delivers its own results
        controller.handle_event(&take_photo());
        let report = controller.photo_captured(image()).unwrap().run().await;
        controller.complete_analysis(report);
        controller.settle().await;
        assert_eq!(reopened.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_reports_cleans_up_analysis_in_flight_at_stop() {
        let (mut controller, artifacts) = controller(Ok("A cup.".to_string()));
        let channel = RecordingChannel::new(true);
        controller.start(channel.clone());
        controller.handle_event(&take_photo());
        let pending = controller.photo_captured(image()).unwrap();
        let filename = format!("{}.jpg", pending.image().id);

        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(async move {
            let _ = tx.send(pending.run().await).await;
        });

        // Nothing is persisted yet, so stopping alone has nothing to remove
        controller.stop();
        controller.drain_reports(&mut rx, Duration::from_secs(15)).await;
        controller.settle().await;
        task.await.unwrap();

        assert_eq!(*artifacts.removed.lock(), vec![filename]);
        assert!(channel.sent.lock().is_empty());
        assert_eq!(controller.ui(), &UiState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_follows_aborted_predecessor() {
        let (mut controller, _) = controller(Ok(String::new()));
        let channel = RecordingChannel::new(false);
        controller.start(channel.clone());

        controller.queue_delivery(DeliveryPlan::Apology {
            text: "first".to_string(),
        });
        controller.pending_delivery.as_ref().unwrap().abort();

        channel.open.store(true, Ordering::SeqCst);
        controller.queue_delivery(DeliveryPlan::Apology {
            text: "second".to_string(),
        });
        controller.settle().await;

        assert_eq!(
            *channel.sent.lock(),
            DeliveryPlan::Apology {
                text: "second".to_string()
            }
            .messages()
        );
    }
}
