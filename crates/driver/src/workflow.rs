//! Per-segment render workflow state machine.
//!
//! One audio segment moves through a linear sequence of stages, each
//! recovered from observed page state. Any stage can fail the segment;
//! steps marked best-effort never do. The asymmetry between the
//! advisory transcription wait and the fatal scene-render wait is
//! intentional, preserved from observed production behavior.

use async_trait::async_trait;
use avrender_core::{Config, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::download::VideoDownloader;
use crate::locator::{resolve, ElementHandle, SemanticTarget};
use crate::poll::{poll_until, OnTimeout, PollOutcome};
use crate::session::{Session, SessionMode};

/// One audio clip mapped to one rendered avatar video.
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: String,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
}

/// Workflow stages, in order. `Failed` is the one terminal branch every
/// stage can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    Navigated,
    AudioUploadOpened,
    AudioUploaded,
    TranscriptionReady,
    SceneRendered,
    ResolutionSelected,
    GenerationSubmitted,
    VideoLocated,
    Downloaded,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::NotStarted => "not started",
            Stage::Navigated => "navigated",
            Stage::AudioUploadOpened => "audio upload opened",
            Stage::AudioUploaded => "audio uploaded",
            Stage::TranscriptionReady => "transcription ready",
            Stage::SceneRendered => "scene rendered",
            Stage::ResolutionSelected => "resolution selected",
            Stage::GenerationSubmitted => "generation submitted",
            Stage::VideoLocated => "video located",
            Stage::Downloaded => "downloaded",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a best-effort step. Distinct from hard failure so the
/// advisory-vs-fatal distinction stays visible in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Skipped,
    Absent,
}

/// Per-segment workflow outcome.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub segment_id: String,
    pub output: Option<PathBuf>,
    pub success: bool,
    /// Stage at which a failed attempt stopped, for operator logs.
    pub failed_stage: Option<Stage>,
}

impl RenderResult {
    pub fn succeeded(segment: &Segment) -> Self {
        Self {
            segment_id: segment.id.clone(),
            output: Some(segment.output_path.clone()),
            success: true,
            failed_stage: None,
        }
    }

    /// Output already existed; success without invoking automation.
    pub fn resumed(segment: &Segment) -> Self {
        Self::succeeded(segment)
    }

    pub fn failed(segment: &Segment, stage: Stage) -> Self {
        Self {
            segment_id: segment.id.clone(),
            output: None,
            success: false,
            failed_stage: Some(stage),
        }
    }
}

/// Transient state of one render attempt, owned by the running machine.
struct RenderAttempt {
    stage: Stage,
    stage_started: std::time::Instant,
    last_signal: Option<String>,
}

impl RenderAttempt {
    fn new() -> Self {
        Self {
            stage: Stage::NotStarted,
            stage_started: std::time::Instant::now(),
            last_signal: None,
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(
            "leaving stage '{}' after {}s (last signal: {:?})",
            self.stage,
            self.stage_started.elapsed().as_secs(),
            self.last_signal
        );
        self.stage = stage;
        self.stage_started = std::time::Instant::now();
        info!("stage: {}", stage);
    }

    fn observe(&mut self, signal: impl Into<String>) {
        self.last_signal = Some(signal.into());
    }
}

/// The seam the batch driver runs against. The production impl drives a
/// browser; tests substitute a scripted renderer.
#[async_trait]
pub trait RenderSegment: Send {
    async fn render(&mut self, segment: &Segment) -> RenderResult;
}

/// Session lifecycle around a batch: the login precondition, fatal for
/// the whole run, and guaranteed release afterwards.
#[async_trait]
pub trait RenderBackend: RenderSegment {
    async fn verify_login(&self) -> Result<()>;
    async fn close(&mut self);
}

/// Reveals file inputs that upload widgets keep invisible, so
/// DOM.setFileInputFiles has a target to hit.
const REVEAL_FILE_INPUTS_JS: &str = r#"(() => {
    document.querySelectorAll('input[type="file"]').forEach(input => {
        input.style.display = 'block';
        input.style.opacity = '1';
        input.style.position = 'relative';
        input.style.width = '200px';
        input.style.height = '50px';
    });
})()"#;

const VIDEO_URL_JS: &str = r#"(() => {
    const v = document.querySelector('video');
    if (v && v.src) return v.src;
    const s = document.querySelector('video source');
    if (s && s.src) return s.src;
    return null;
})()"#;

/// Drives segments through the studio UI over one session.
pub struct StudioRenderer {
    session: Session,
    config: Config,
    downloader: VideoDownloader,
}

impl StudioRenderer {
    pub async fn open(mode: &SessionMode, config: Config) -> Result<Self> {
        let session = Session::open(mode, config.clone()).await?;
        let downloader = VideoDownloader::new(
            config.studio.referrer.clone(),
            config.studio.user_agent.clone(),
        );
        Ok(Self {
            session,
            config,
            downloader,
        })
    }

    fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.candidate_ms)
    }

    async fn try_render(&mut self, segment: &Segment) -> std::result::Result<(), Stage> {
        let mut attempt = RenderAttempt::new();

        self.navigate_to_create()
            .await
            .map_err(|e| stage_fail(Stage::Navigated, &e))?;
        attempt.advance(Stage::Navigated);

        self.open_upload_dialog()
            .await
            .map_err(|e| stage_fail(Stage::AudioUploadOpened, &e))?
            .ok_or_else(|| {
                error!("could not find the Upload audio control");
                Stage::AudioUploadOpened
            })?;
        attempt.advance(Stage::AudioUploadOpened);

        self.upload_audio(segment)
            .await
            .map_err(|e| stage_fail(Stage::AudioUploaded, &e))?
            .ok_or_else(|| {
                error!("no file input found in the upload dialog");
                Stage::AudioUploaded
            })?;
        attempt.advance(Stage::AudioUploaded);

        // Advisory wait: absence of the Render affordance does not
        // reliably mean transcription is incomplete.
        self.await_transcription(&mut attempt).await;
        attempt.advance(Stage::TranscriptionReady);

        let generate = self
            .render_scene(&mut attempt)
            .await
            .ok_or(Stage::SceneRendered)?;
        attempt.advance(Stage::SceneRendered);

        let resolution = self.submit_generation(&generate).await.map_err(|e| {
            stage_fail(Stage::GenerationSubmitted, &e)
        })?;
        attempt.advance(Stage::ResolutionSelected);
        if resolution == StepOutcome::Absent {
            info!("no explicit resolution selector - using studio default");
        }
        attempt.advance(Stage::GenerationSubmitted);

        let video_url = self
            .locate_video_url(&mut attempt)
            .await
            .ok_or_else(|| {
                error!("could not locate a video URL");
                Stage::VideoLocated
            })?;
        attempt.advance(Stage::VideoLocated);

        if !self.downloader.download(&video_url, &segment.output_path).await {
            return Err(Stage::Downloaded);
        }
        attempt.advance(Stage::Downloaded);
        Ok(())
    }

    /// Load the creation surface and let it settle; the app gives no
    /// deterministic ready signal.
    async fn navigate_to_create(&self) -> Result<()> {
        info!("navigating to create page");
        let url = self.config.studio.create_url.clone();
        self.session.goto(&url).await?;
        self.session.settle(self.config.timeouts.settle_ms).await;
        Ok(())
    }

    /// Resolve and activate the Upload-audio control. Some layouts only
    /// reveal it after the script area has been poked.
    async fn open_upload_dialog(&self) -> Result<Option<()>> {
        let mut control = resolve(
            &self.session,
            &SemanticTarget::UploadAudioControl,
            self.candidate_timeout(),
        )
        .await;

        if control.is_none() {
            if let Some(area) = resolve(
                &self.session,
                &SemanticTarget::ScriptArea,
                self.candidate_timeout(),
            )
            .await
            {
                best_effort("script area poke", self.session.click(&area).await);
                self.session
                    .settle(self.config.timeouts.short_settle_ms)
                    .await;
            }
            control = resolve(
                &self.session,
                &SemanticTarget::UploadAudioControl,
                self.candidate_timeout(),
            )
            .await;
        }

        let Some(control) = control else {
            return Ok(None);
        };
        self.session.click(&control).await?;
        info!("opened upload dialog");
        self.session
            .settle(self.config.timeouts.short_settle_ms)
            .await;
        Ok(Some(()))
    }

    /// Inject the audio file into the (possibly hidden) file input and
    /// confirm. The confirmation sub-steps are best-effort; only a
    /// missing file input fails the stage.
    async fn upload_audio(&self, segment: &Segment) -> Result<Option<()>> {
        // Upload Audio tab, when the dialog has one
        if let Some(tab) = resolve(
            &self.session,
            &SemanticTarget::UploadAudioTab,
            Duration::from_millis(self.config.timeouts.candidate_ms / 2),
        )
        .await
        {
            best_effort("upload tab click", self.session.click(&tab).await);
            self.session.settle(1_000).await;
        }

        self.session.eval(REVEAL_FILE_INPUTS_JS).await?;
        self.session.settle(1_000).await;

        let Some(input) = resolve(
            &self.session,
            &SemanticTarget::FileInput,
            self.candidate_timeout(),
        )
        .await
        else {
            return Ok(None);
        };

        self.session.set_files(&input, &segment.audio_path).await?;
        info!("audio file injected: {}", segment.audio_path.display());
        self.session.settle(self.config.timeouts.settle_ms).await;

        // Select the uploaded entry by filename, then confirm
        let filename = segment
            .audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| segment.id.clone());
        match resolve(
            &self.session,
            &SemanticTarget::UploadedFileEntry(filename.clone()),
            self.candidate_timeout(),
        )
        .await
        {
            Some(entry) => {
                best_effort("uploaded entry click", self.session.click(&entry).await);
                self.session.settle(1_000).await;
            }
            None => warn!("uploaded file '{}' not found in list", filename),
        }

        match resolve(
            &self.session,
            &SemanticTarget::AddAudioConfirm,
            self.candidate_timeout(),
        )
        .await
        {
            Some(confirm) => {
                if best_effort("add-audio confirm click", self.session.click(&confirm).await)
                    .is_some()
                {
                    info!("confirmed audio selection");
                }
                self.session
                    .settle(self.config.timeouts.short_settle_ms)
                    .await;
            }
            None => warn!("no Add-audio confirmation found - continuing"),
        }

        Ok(Some(()))
    }

    /// Wait for the Render affordance as a transcription-done signal.
    /// Timeout is advisory: the workflow proceeds regardless.
    async fn await_transcription(&self, attempt: &mut RenderAttempt) {
        info!("waiting for transcription");
        let session = &self.session;
        let outcome = poll_until(
            "transcription",
            || async move {
                resolve(session, &SemanticTarget::RenderControl, Duration::ZERO)
                    .await
                    .map(|_| ())
            },
            Duration::from_millis(self.config.timeouts.transcription_poll_ms),
            Duration::from_millis(self.config.timeouts.transcription_ms),
            OnTimeout::Advisory,
        )
        .await;
        if outcome.is_ready() {
            attempt.observe("render control present");
        } else {
            attempt.observe("transcription signal absent");
        }
    }

    /// Click Render and wait for the Generate control to become
    /// enabled. Hard error text or full timeout fails the stage.
    async fn render_scene(&self, attempt: &mut RenderAttempt) -> Option<ElementHandle> {
        let render = resolve(
            &self.session,
            &SemanticTarget::RenderControl,
            self.candidate_timeout(),
        )
        .await?;
        if let Err(e) = self.session.click(&render).await {
            error!("failed to click Render: {}", e);
            return None;
        }
        info!("rendering scene");

        let session = &self.session;
        let outcome = poll_until(
            "scene render",
            || async move {
                if let Some(generate) =
                    resolve(session, &SemanticTarget::GenerateEnabled, Duration::ZERO).await
                {
                    return Some(Ok(generate));
                }
                let content = session.content().await.unwrap_or_default();
                let lower = content.to_lowercase();
                if lower.contains("error") && lower.contains("render") {
                    return Some(Err(()));
                }
                None
            },
            Duration::from_millis(self.config.timeouts.render_poll_ms),
            Duration::from_millis(self.config.timeouts.render_ms),
            OnTimeout::Fatal,
        )
        .await;

        match outcome {
            PollOutcome::Ready(Ok(generate)) => {
                attempt.observe("generate control enabled");
                Some(generate)
            }
            PollOutcome::Ready(Err(())) => {
                attempt.observe("render error text detected");
                error!("render error detected on page");
                None
            }
            _ => None,
        }
    }

    /// Click Generate, pick the high-resolution option when present
    /// (best-effort), and confirm through the fallback chain.
    async fn submit_generation(&self, generate: &ElementHandle) -> Result<StepOutcome> {
        self.session.click(generate).await?;
        info!("submitting generation");
        self.session
            .settle(self.config.timeouts.short_settle_ms)
            .await;

        let resolution = match &self.config.studio.preferred_resolution {
            None => StepOutcome::Skipped,
            Some(label) => {
                match resolve(
                    &self.session,
                    &SemanticTarget::ResolutionOption(label.clone()),
                    Duration::from_millis(self.config.timeouts.candidate_ms / 2),
                )
                .await
                {
                    Some(option) => {
                        match best_effort(
                            "resolution option click",
                            self.session.click(&option).await,
                        ) {
                            Some(()) => {
                                info!("selected {} resolution", label);
                                self.session.settle(1_000).await;
                                StepOutcome::Completed
                            }
                            None => StepOutcome::Absent,
                        }
                    }
                    None => StepOutcome::Absent,
                }
            }
        };

        self.session.settle(1_000).await;
        match resolve(
            &self.session,
            &SemanticTarget::ConfirmControl,
            self.candidate_timeout(),
        )
        .await
        {
            Some(confirm) => {
                best_effort("generation confirm click", self.session.click(&confirm).await);
            }
            None => warn!("no generation confirmation control found - continuing"),
        }

        Ok(resolution)
    }

    /// Wait for a direct media URL or a Download affordance. A lone
    /// Download affordance gets one more same-page look; after that (or
    /// on expiry) fall back to the most recent projects-listing entry.
    async fn locate_video_url(&self, attempt: &mut RenderAttempt) -> Option<String> {
        let session = &self.session;
        let outcome = poll_until(
            "generation",
            || async move {
                if let Ok(value) = session.eval(VIDEO_URL_JS).await {
                    if let Some(url) = url_from_eval(&value) {
                        return Some(Some(url));
                    }
                }
                if resolve(session, &SemanticTarget::DownloadButton, Duration::ZERO)
                    .await
                    .is_some()
                {
                    // Readiness signal without a URL yet
                    return Some(None);
                }
                None
            },
            Duration::from_millis(self.config.timeouts.generation_poll_ms),
            Duration::from_millis(self.config.timeouts.generation_ms),
            OnTimeout::Advisory,
        )
        .await;

        match outcome {
            PollOutcome::Ready(Some(url)) => {
                attempt.observe("video element url");
                return Some(url);
            }
            PollOutcome::Ready(None) => {
                // Download affordance can appear before the player gets
                // its src; look at the current page again before leaving.
                self.session
                    .settle(self.config.timeouts.short_settle_ms)
                    .await;
                if let Ok(value) = self.session.eval(VIDEO_URL_JS).await {
                    if let Some(url) = url_from_eval(&value) {
                        attempt.observe("video url beside download control");
                        return Some(url);
                    }
                }
            }
            _ => {}
        }

        // Projects-page fallback
        info!("checking projects listing for the video");
        let projects_url = self.config.studio.projects_url.clone();
        if self.session.goto(&projects_url).await.is_err() {
            return None;
        }
        self.session
            .settle(self.config.timeouts.short_settle_ms)
            .await;

        let card = resolve(
            &self.session,
            &SemanticTarget::ProjectCard,
            self.candidate_timeout(),
        )
        .await?;
        if self.session.click(&card).await.is_err() {
            return None;
        }
        self.session
            .settle(self.config.timeouts.short_settle_ms)
            .await;

        match self.session.eval(VIDEO_URL_JS).await {
            Ok(value) => {
                let url = url_from_eval(&value);
                if url.is_some() {
                    attempt.observe("video url via projects listing");
                }
                url
            }
            Err(_) => None,
        }
    }
}

fn stage_fail(stage: Stage, err: &avrender_core::Error) -> Stage {
    error!("stage '{}' failed: {}", stage, err);
    stage
}

/// Absorb an error from a sub-step that must never fail a segment on
/// its own. Hard steps propagate through `stage_fail` instead.
fn best_effort<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed - continuing: {}", what, e);
            None
        }
    }
}

fn url_from_eval(value: &serde_json::Value) -> Option<String> {
    value.as_str().map(|s| s.to_string())
}

#[async_trait]
impl RenderBackend for StudioRenderer {
    async fn verify_login(&self) -> Result<()> {
        self.session.check_login().await
    }

    async fn close(&mut self) {
        self.session.close().await;
    }
}

#[async_trait]
impl RenderSegment for StudioRenderer {
    async fn render(&mut self, segment: &Segment) -> RenderResult {
        info!("──── segment {} ────", segment.id);
        match self.try_render(segment).await {
            Ok(()) => {
                info!("segment complete: {}", segment.output_path.display());
                RenderResult::succeeded(segment)
            }
            Err(stage) => {
                warn!("segment {} failed at stage '{}'", segment.id, stage);
                RenderResult::failed(segment, stage)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> Segment {
        Segment {
            id: "hook".into(),
            audio_path: PathBuf::from("/audio/hook.mp3"),
            output_path: PathBuf::from("/out/hook.mp4"),
        }
    }

    #[test]
    fn test_result_succeeded() {
        let r = RenderResult::succeeded(&segment());
        assert!(r.success);
        assert_eq!(r.output, Some(PathBuf::from("/out/hook.mp4")));
        assert!(r.failed_stage.is_none());
    }

    #[test]
    fn test_result_failed_has_no_output() {
        let r = RenderResult::failed(&segment(), Stage::SceneRendered);
        assert!(!r.success);
        assert!(r.output.is_none());
        assert_eq!(r.failed_stage, Some(Stage::SceneRendered));
    }

    #[test]
    fn test_resumed_counts_as_success() {
        let r = RenderResult::resumed(&segment());
        assert!(r.success);
        assert!(r.output.is_some());
    }

    #[test]
    fn test_attempt_advance_resets_timer() {
        let mut attempt = RenderAttempt::new();
        assert_eq!(attempt.stage, Stage::NotStarted);
        std::thread::sleep(std::time::Duration::from_millis(10));
        attempt.advance(Stage::Navigated);
        assert_eq!(attempt.stage, Stage::Navigated);
        assert!(attempt.stage_started.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_attempt_observe() {
        let mut attempt = RenderAttempt::new();
        attempt.observe("generate control enabled");
        assert_eq!(
            attempt.last_signal.as_deref(),
            Some("generate control enabled")
        );
    }

    #[test]
    fn test_best_effort_absorbs_errors() {
        // A click error on an optional control must not bubble up as a
        // stage failure
        let failed: Result<()> =
            Err(avrender_core::Error::Cdp("node detached".into()));
        assert!(best_effort("resolution option click", failed).is_none());
        assert_eq!(best_effort("resolution option click", Ok(5)), Some(5));
    }

    #[test]
    fn test_url_from_eval() {
        assert_eq!(
            url_from_eval(&serde_json::json!("https://cdn.example.com/v.mp4")),
            Some("https://cdn.example.com/v.mp4".to_string())
        );
        assert_eq!(url_from_eval(&serde_json::Value::Null), None);
        assert_eq!(url_from_eval(&serde_json::json!(42)), None);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::SceneRendered.to_string(), "scene rendered");
        assert_eq!(Stage::Downloaded.to_string(), "downloaded");
    }
}
