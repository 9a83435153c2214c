// Detection coordinator
//
// Owns the source, the estimator, loop state and the transcript. Every loop
// state change goes through `LoopState::transition`; the effects it returns
// are carried out here.

use crate::core::config::Config;
use crate::core::loop_state::{Cadence, LoopCommand, LoopEffect, LoopPhase, LoopState, StepOutcome};
use crate::core::sink::{FrameSink, Notice};
use crate::core::source_manager::SourceManager;
use crate::core::stats::{FpsWindow, LoopStats};
use crate::core::submitter::{normalize_base_url, FrameSubmitter, MIN_PAYLOAD_BYTES};
use crate::core::transcript::Transcript;
use crate::core::variant_controller::VariantController;
use crate::models::capture::{Frame, SourceError, SourceInfo, SourceKind};
use crate::models::pose::{DetectionFrame, Pose, PoseError, PoseResult, Variant};
use crate::models::submission::{SubmitError, SubmitReceipt, SubmitResult};
use crate::platform::camera::CameraProvider;
use crate::platform::pose::{EstimatorFactory, PoseEstimator};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const WEBCAM_FAILED_NOTICE: &str = "Webcam failed or blocked. Try image/video upload.";
pub const SOURCE_ENDED_NOTICE: &str = "Source ended";
pub const FRAME_SENT_NOTICE: &str = "Frame sent to backend";
pub const SEND_FAILED_NOTICE: &str = "Send failed (check URL/CORS/Port visibility)";

// ==============================================================================
// Errors
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("Estimation failed: {0}")]
    EstimationFailure(#[from] PoseError),

    #[error("Submission failed: {0}")]
    SubmissionFailure(#[from] SubmitError),

    #[error("No active source")]
    NoActiveSource,

    #[error("Export failed: {0}")]
    Export(#[from] std::io::Error),

    #[error("Coordinator is not running")]
    Closed,
}

/// How an error is recovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Prompt the user; the loop does not start
    SourceUnavailable,
    /// The loop halts until explicitly restarted
    EstimationFailure,
    /// Transient; loop state is unaffected
    SubmissionFailure,
    Export,
    Closed,
}

impl CoordinatorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoordinatorError::SourceUnavailable(_) | CoordinatorError::NoActiveSource => {
                ErrorClass::SourceUnavailable
            }
            CoordinatorError::EstimationFailure(_) => ErrorClass::EstimationFailure,
            CoordinatorError::SubmissionFailure(_) => ErrorClass::SubmissionFailure,
            CoordinatorError::Export(_) => ErrorClass::Export,
            CoordinatorError::Closed => ErrorClass::Closed,
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

// ==============================================================================
// Status
// ==============================================================================

/// Snapshot for status badges
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub session_id: Uuid,
    pub phase: LoopPhase,
    pub variant: Variant,
    pub variant_name: &'static str,
    pub source: Option<SourceInfo>,
    pub backend_host: Option<String>,
    pub auto_submit: bool,
    pub frames_recorded: usize,
    pub fps: f64,
    pub last_receipt: Option<String>,
}

// ==============================================================================
// Detection Steps
// ==============================================================================

/// Result of one estimator call, carrying the lent estimator back
pub(crate) struct StepCompletion {
    epoch: u64,
    estimator: Box<dyn PoseEstimator>,
    result: PoseResult<Vec<Pose>>,
    started: Instant,
    frame: Frame,
}

pub(crate) type InFlightStep = Pin<Box<dyn Future<Output = StepCompletion> + Send>>;

/// Wait for the step in `slot` and clear it. Pending forever when the slot is empty.
pub(crate) async fn next_completion(slot: &mut Option<InFlightStep>) -> StepCompletion {
    match slot.as_mut() {
        Some(step) => {
            let completion = step.await;
            *slot = None;
            completion
        }
        None => std::future::pending().await,
    }
}

fn cadence_for(kind: SourceKind) -> Cadence {
    if kind.is_continuous() {
        Cadence::Continuous
    } else {
        Cadence::OneShot
    }
}

// ==============================================================================
// Coordinator
// ==============================================================================

pub struct Coordinator {
    session_id: Uuid,
    config: Config,
    sources: SourceManager,
    variants: VariantController,
    state: LoopState,
    transcript: Transcript,
    fps: FpsWindow,
    frames_recorded: usize,
    sink: Box<dyn FrameSink>,
    submitter: Option<FrameSubmitter>,
    auto_submit: bool,
    last_receipt: Option<String>,
    tick_scheduled: bool,
    pub(crate) in_flight: Option<InFlightStep>,
    submissions_tx: mpsc::UnboundedSender<SubmitResult<SubmitReceipt>>,
    submissions_rx: Option<mpsc::UnboundedReceiver<SubmitResult<SubmitReceipt>>>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        camera: Arc<dyn CameraProvider>,
        factory: Arc<dyn EstimatorFactory>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        let sources = SourceManager::new(camera, config.first_frame_timeout(), config.loop_video);
        let variants = VariantController::new(factory, config.variant, config.estimator.clone());
        let (submissions_tx, submissions_rx) = mpsc::unbounded_channel();

        let mut coordinator = Self {
            session_id: Uuid::new_v4(),
            transcript: Transcript::new(config.transcript_retention),
            auto_submit: config.auto_submit,
            sources,
            variants,
            state: LoopState::default(),
            fps: FpsWindow::default(),
            frames_recorded: 0,
            sink,
            submitter: None,
            last_receipt: None,
            tick_scheduled: false,
            in_flight: None,
            submissions_tx,
            submissions_rx: Some(submissions_rx),
            config,
        };

        let configured = coordinator.config.backend_url.clone();
        if let Err(e) = coordinator.install_backend(configured.as_deref()) {
            warn!("Ignoring configured backend URL: {}", e);
        }

        info!(session_id = %coordinator.session_id, variant = %coordinator.variants.active(), "Coordinator created");
        coordinator
    }

    // --------------------------------------------------------------------------
    // Sources
    // --------------------------------------------------------------------------

    /// Acquire the camera and start continuous detection
    pub async fn acquire_webcam(&mut self) -> CoordinatorResult<SourceInfo> {
        self.apply(LoopCommand::Stop);
        match self.sources.acquire_webcam().await {
            Ok(info) => {
                self.start_with(Cadence::Continuous).await?;
                Ok(info)
            }
            Err(e) => {
                let error = CoordinatorError::from(e);
                self.surface_error(&error);
                self.sink.on_notice(&Notice::warning(WEBCAM_FAILED_NOTICE));
                Err(error)
            }
        }
    }

    /// Load a still image and run one detection pass
    pub async fn acquire_image(&mut self, bytes: &[u8]) -> CoordinatorResult<SourceInfo> {
        self.apply(LoopCommand::Stop);
        let info = self.sources.acquire_image(bytes).map_err(|e| self.surfaced(e.into()))?;
        self.start_with(Cadence::OneShot).await?;
        Ok(info)
    }

    /// Load a video clip and detect continuously while it plays
    pub async fn acquire_video_file(&mut self, bytes: &[u8]) -> CoordinatorResult<SourceInfo> {
        self.apply(LoopCommand::Stop);
        let info = self
            .sources
            .acquire_video_file(bytes)
            .map_err(|e| self.surfaced(e.into()))?;
        self.start_with(Cadence::Continuous).await?;
        Ok(info)
    }

    /// Stop the loop, release the source and clear the surface. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.apply(LoopCommand::Stop);
        self.tick_scheduled = false;
        if self.sources.release() {
            self.fps.clear();
        }
        if self.auto_submit {
            self.set_auto_submit(false);
        }
    }

    // --------------------------------------------------------------------------
    // Loop Control
    // --------------------------------------------------------------------------

    /// Explicit (re)start against the current source
    pub async fn start(&mut self) -> CoordinatorResult<()> {
        let kind = match self.sources.kind() {
            Some(kind) if self.sources.is_valid() => kind,
            _ => return Err(self.surfaced(CoordinatorError::NoActiveSource)),
        };
        self.start_with(cadence_for(kind)).await
    }

    /// Pause detection without releasing the source
    pub fn stop(&mut self) {
        self.apply(LoopCommand::Stop);
        self.tick_scheduled = false;
    }

    async fn start_with(&mut self, cadence: Cadence) -> CoordinatorResult<()> {
        if let Err(e) = self.variants.ensure().await {
            return Err(self.surfaced(e.into()));
        }
        self.apply(LoopCommand::Start { cadence });
        info!(cadence = ?cadence, variant = %self.variants.active(), "Detection loop started");
        Ok(())
    }

    /// Switch the model variant, resuming the loop if the source is still valid.
    ///
    /// Returns whether detection resumed.
    pub async fn switch_variant(&mut self, variant: Variant) -> CoordinatorResult<bool> {
        let resumed = self.replace_estimator(variant, true).await?;
        info!(variant = %variant, resumed, "Variant switched");
        Ok(resumed)
    }

    /// Pause, dispose the estimator and create one for `variant`. The loop
    /// resumes only when `resume` is set and the source is still valid.
    async fn replace_estimator(&mut self, variant: Variant, resume: bool) -> CoordinatorResult<bool> {
        self.apply(LoopCommand::Stop);
        self.tick_scheduled = false;
        self.complete_in_flight().await;

        if let Err(e) = self.variants.switch(variant).await {
            error!(variant = %variant, "Estimator creation failed: {}", e);
            return Err(self.surfaced(e.into()));
        }

        match self.sources.kind() {
            Some(kind) if resume && self.sources.is_valid() => {
                self.apply(LoopCommand::Start {
                    cadence: cadence_for(kind),
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Feed `command` through the state machine. Scheduling effects are applied
    /// here; the rest are returned.
    fn apply(&mut self, command: LoopCommand) -> Vec<LoopEffect> {
        let previous = self.state.phase;
        let (next, effects) = self.state.transition(command);
        self.state = next;
        if previous != next.phase {
            debug!(from = ?previous, to = ?next.phase, epoch = next.epoch, "Loop phase changed");
        }

        effects
            .into_iter()
            .filter(|effect| {
                if *effect == LoopEffect::ScheduleTick {
                    self.tick_scheduled = true;
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Whether the next refresh boundary should start a step
    pub fn wants_tick(&self) -> bool {
        self.tick_scheduled && self.state.is_running() && self.in_flight.is_none()
    }

    /// Refresh boundary: begin a step if the loop is running and idle. Returns whether one began.
    pub fn tick(&mut self) -> bool {
        self.tick_scheduled = false;

        if self.state.is_running() && !self.sources.is_valid() {
            info!("Source ended; stopping detection");
            self.apply(LoopCommand::Stop);
            self.sink.on_notice(&Notice::warning(SOURCE_ENDED_NOTICE));
            return false;
        }

        let mut began = false;
        for effect in self.apply(LoopCommand::Tick) {
            if let LoopEffect::BeginStep { epoch } = effect {
                began = self.begin_step(epoch);
            }
        }
        began
    }

    fn begin_step(&mut self, epoch: u64) -> bool {
        let frame = match self.sources.capture() {
            Ok(frame) => frame,
            Err(e) => {
                self.apply(LoopCommand::StepResolved {
                    epoch,
                    outcome: StepOutcome::Failed,
                });
                self.surface_error(&e.into());
                return false;
            }
        };

        let mut estimator = match self.variants.lend() {
            Some(estimator) => estimator,
            None => {
                self.apply(LoopCommand::StepResolved {
                    epoch,
                    outcome: StepOutcome::Failed,
                });
                self.surface_error(&PoseError::NotInitialized.into());
                return false;
            }
        };

        let started = Instant::now();
        self.in_flight = Some(Box::pin(async move {
            let result = estimator.estimate(&frame).await;
            StepCompletion {
                epoch,
                estimator,
                result,
                started,
                frame,
            }
        }));
        true
    }

    /// Apply a resolved step: restore the estimator, then record, surface or discard
    pub(crate) fn finish_step(&mut self, completion: StepCompletion) {
        let StepCompletion {
            epoch,
            estimator,
            result,
            started,
            frame,
        } = completion;
        let variant = estimator.variant();
        self.variants.restore(estimator);
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match result {
            Ok(_) => StepOutcome::Succeeded,
            Err(_) => StepOutcome::Failed,
        };
        let mut result = Some(result);

        for effect in self.apply(LoopCommand::StepResolved { epoch, outcome }) {
            match effect {
                LoopEffect::RecordFrame => {
                    if let Some(Ok(poses)) = result.take() {
                        self.record_frame(&frame, variant, poses, latency_ms);
                    }
                }
                LoopEffect::SurfaceFailure => {
                    if let Some(Err(e)) = result.take() {
                        error!(variant = %variant, "Detection step failed; loop halted: {}", e);
                        self.surface_error(&e.into());
                    }
                }
                LoopEffect::DiscardResult => {
                    debug!(epoch, "Discarded result of a cancelled step");
                }
                LoopEffect::BeginStep { .. } | LoopEffect::ScheduleTick => {}
            }
        }
    }

    fn record_frame(&mut self, frame: &Frame, variant: Variant, poses: Vec<Pose>, latency_ms: f64) {
        let threshold = self.config.keypoint_score_threshold;
        let surface = self.sources.surface_mut();
        surface.draw_frame(&frame.image);
        surface.draw_poses(&poses, threshold);
        surface.draw_label(&format!("Variant: {}", variant.display_name()));

        let detection = DetectionFrame {
            timestamp: frame.timestamp,
            variant,
            poses,
            frame_latency_ms: latency_ms,
        };
        self.fps.push(latency_ms);
        self.frames_recorded += 1;
        let stats = LoopStats::sample(&self.fps, latency_ms, self.frames_recorded);

        self.sink.on_frame(&detection, &stats, self.sources.surface());
        self.transcript.append(detection);
    }

    /// Await the in-flight step, if any, and apply it. Returns whether there was one.
    pub async fn complete_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(step) => {
                let completion = step.await;
                self.finish_step(completion);
                true
            }
            None => false,
        }
    }

    /// Tick and wait for the resulting step. Returns whether a step ran.
    pub async fn run_step(&mut self) -> bool {
        if !self.tick() {
            return false;
        }
        self.complete_in_flight().await
    }

    // --------------------------------------------------------------------------
    // Submission
    // --------------------------------------------------------------------------

    /// Point submission and estimation at another backend.
    ///
    /// A live estimator is rebuilt against the new URL; a running loop keeps running.
    pub async fn set_backend_url(&mut self, url: Option<String>) -> CoordinatorResult<()> {
        self.install_backend(url.as_deref())?;
        info!(backend = ?self.config.backend_url, "Backend URL updated");

        if self.variants.has_estimator() {
            let variant = self.variants.active();
            let was_running = self.state.is_running();
            self.replace_estimator(variant, was_running).await?;
        }
        Ok(())
    }

    fn install_backend(&mut self, url: Option<&str>) -> CoordinatorResult<()> {
        self.submitter = match url.and_then(normalize_base_url) {
            Some(url) => Some(FrameSubmitter::new(&url, self.config.submit_timeout())?),
            None => None,
        };
        self.config.backend_url = self.submitter.as_ref().map(|s| s.base_url().to_string());
        self.variants.set_backend_url(self.config.backend_url.as_deref());
        Ok(())
    }

    pub fn set_auto_submit(&mut self, enabled: bool) {
        self.auto_submit = enabled;
        let notice = if enabled { "Auto-submit ON" } else { "Auto-submit OFF" };
        self.sink.on_notice(&Notice::info(notice));
    }

    /// Encode the rendered frame and submit it on a background task.
    ///
    /// The outcome arrives later through the submission channel.
    pub fn submit_frame(&mut self) -> CoordinatorResult<()> {
        let submitter = match &self.submitter {
            Some(submitter) => submitter.clone(),
            None => return Err(self.local_submit_failure(SubmitError::NoBackend)),
        };

        let jpeg = match self.sources.surface().encode_jpeg() {
            Some(Ok(bytes)) if bytes.len() >= MIN_PAYLOAD_BYTES => bytes,
            Some(Err(e)) => return Err(self.local_submit_failure(SubmitError::Encode(e.to_string()))),
            _ => return Err(self.local_submit_failure(SubmitError::EmptyFrame)),
        };

        let variant = self.variants.active();
        let store = self.config.store_on_submit;
        let tx = self.submissions_tx.clone();
        tokio::spawn(async move {
            let result = submitter.submit(jpeg, variant, store).await;
            let _ = tx.send(result);
        });
        Ok(())
    }

    /// Auto-submit timer fired
    pub fn auto_submit_due(&mut self) {
        if self.auto_submit && self.state.is_running() {
            let _ = self.submit_frame();
        }
    }

    pub(crate) fn take_submission_events(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<SubmitResult<SubmitReceipt>>> {
        self.submissions_rx.take()
    }

    /// Wait for the next submission outcome and apply it
    pub async fn await_submission(&mut self) -> bool {
        let result = match self.submissions_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        };
        match result {
            Some(result) => {
                self.handle_submission(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn handle_submission(&mut self, result: SubmitResult<SubmitReceipt>) {
        match result {
            Ok(receipt) => {
                self.last_receipt = Some(receipt.status_text());
                self.sink.on_notice(&Notice::info(FRAME_SENT_NOTICE));
            }
            Err(e) => {
                warn!("Frame submission failed: {}", e);
                self.sink.on_error(&e.into());
                self.sink.on_notice(&Notice::warning(SEND_FAILED_NOTICE));
            }
        }
    }

    fn local_submit_failure(&mut self, error: SubmitError) -> CoordinatorError {
        self.sink.on_notice(&Notice::warning(error.to_string()));
        error.into()
    }

    // --------------------------------------------------------------------------
    // Transcript, Status, Teardown
    // --------------------------------------------------------------------------

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The transcript as a JSON array
    pub fn export(&self) -> CoordinatorResult<Vec<u8>> {
        Ok(self.transcript.to_json().map_err(std::io::Error::from)?)
    }

    /// Write the transcript to `path`, or to the configured export path
    pub fn export_to(&self, path: Option<&Path>) -> CoordinatorResult<PathBuf> {
        let path = path.unwrap_or(self.config.export_path.as_path()).to_path_buf();
        self.transcript.export_to(&path)?;
        Ok(path)
    }

    pub fn phase(&self) -> LoopPhase {
        self.state.phase
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> CoordinatorStatus {
        let variant = self.variants.active();
        CoordinatorStatus {
            session_id: self.session_id,
            phase: self.state.phase,
            variant,
            variant_name: variant.display_name(),
            source: self.sources.info(),
            backend_host: self.submitter.as_ref().and_then(FrameSubmitter::host),
            auto_submit: self.auto_submit,
            frames_recorded: self.frames_recorded,
            fps: self.fps.smoothed(),
            last_receipt: self.last_receipt.clone(),
        }
    }

    /// Release everything and dispose the estimator
    pub async fn shutdown(&mut self) {
        self.release();
        self.complete_in_flight().await;
        self.variants.dispose().await;
        info!(session_id = %self.session_id, frames = self.frames_recorded, "Coordinator shut down");
    }

    fn surface_error(&mut self, error: &CoordinatorError) {
        self.sink.on_error(error);
    }

    fn surfaced(&mut self, error: CoordinatorError) -> CoordinatorError {
        self.surface_error(&error);
        error
    }
}
