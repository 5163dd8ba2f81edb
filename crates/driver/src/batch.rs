//! Batch orchestration: enumerate inputs, resume, drive the state
//! machine per segment, and persist the summary artifact.

use avrender_core::{Config, Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::session::SessionMode;
use crate::workflow::{
    RenderBackend, RenderResult, RenderSegment, Segment, Stage, StudioRenderer,
};

pub const SUMMARY_FILE: &str = "render_results.json";

/// Aggregate of all per-segment results, written once per batch run.
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub timestamp: String,
    pub results: BTreeMap<String, Option<String>>,
    pub success_count: usize,
    pub total_count: usize,
}

impl BatchSummary {
    fn from_results(results: &[RenderResult]) -> Self {
        let map: BTreeMap<String, Option<String>> = results
            .iter()
            .map(|r| {
                (
                    r.segment_id.clone(),
                    r.output.as_ref().map(|p| p.display().to_string()),
                )
            })
            .collect();
        let success_count = results.iter().filter(|r| r.success).count();
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            results: map,
            success_count,
            total_count: results.len(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.success_count == self.total_count
    }

    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(SUMMARY_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("results saved to {}", path.display());
        Ok(path)
    }
}

/// Discover audio inputs in deterministic (lexicographic) order.
/// Missing directory or an empty input set are batch preconditions and
/// fail before any segment is touched.
pub fn enumerate_segments(
    audio_dir: &Path,
    output_dir: &Path,
    config: &Config,
    filter: Option<&str>,
) -> Result<Vec<Segment>> {
    if !audio_dir.is_dir() {
        return Err(Error::NotFound(format!(
            "audio directory not found: {}",
            audio_dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(audio_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|ext| {
                    config
                        .batch
                        .audio_extensions
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
                })
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut segments: Vec<Segment> = files
        .into_iter()
        .filter_map(|path| {
            let id = path.file_stem()?.to_string_lossy().to_string();
            let output_path = output_dir.join(format!("{}.{}", id, config.batch.output_extension));
            Some(Segment {
                id,
                audio_path: path,
                output_path,
            })
        })
        .collect();

    if let Some(wanted) = filter {
        segments.retain(|s| s.id == wanted);
    }

    if segments.is_empty() {
        return Err(Error::NotFound("no audio files found".into()));
    }
    Ok(segments)
}

/// Drive every segment through `renderer`, skipping those whose output
/// already exists (resume semantics), then write the summary. Segment
/// failures never abort the batch.
pub async fn run_with_renderer<R: RenderSegment>(
    segments: &[Segment],
    renderer: &mut R,
    pause: Duration,
    output_dir: &Path,
) -> Result<BatchSummary> {
    std::fs::create_dir_all(output_dir)?;

    let mut results = Vec::with_capacity(segments.len());
    for segment in segments {
        if segment.output_path.exists() {
            info!(
                "[SKIP] already exists: {}",
                segment.output_path.display()
            );
            results.push(RenderResult::resumed(segment));
            continue;
        }

        results.push(renderer.render(segment).await);
        // Throttle so we do not hammer the remote application
        tokio::time::sleep(pause).await;
    }

    for result in &results {
        let status = if result.success { "[OK]" } else { "[FAIL]" };
        let output = result
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "FAILED".into());
        info!("  {} {}: {}", status, result.segment_id, output);
    }

    let summary = BatchSummary::from_results(&results);
    info!(
        "successful: {}/{}",
        summary.success_count, summary.total_count
    );
    summary.write(output_dir)?;
    Ok(summary)
}

/// Stand-in renderer for batches where every output already exists and
/// no session is opened. Never reached while the resume check holds.
struct PreRendered;

#[async_trait::async_trait]
impl RenderSegment for PreRendered {
    async fn render(&mut self, segment: &Segment) -> RenderResult {
        warn!(
            "render invoked for '{}' without a session; output was expected to exist",
            segment.id
        );
        RenderResult::failed(segment, Stage::NotStarted)
    }
}

/// Verify the login precondition, render every segment, and release the
/// session on every exit path. An unauthenticated studio aborts before
/// any segment is attempted and no summary is written.
pub async fn run_with_backend<R: RenderBackend>(
    segments: &[Segment],
    backend: &mut R,
    pause: Duration,
    output_dir: &Path,
) -> Result<BatchSummary> {
    if let Err(e) = backend.verify_login().await {
        backend.close().await;
        return Err(e);
    }

    let outcome = run_with_renderer(segments, backend, pause, output_dir).await;
    backend.close().await;
    outcome
}

/// Full batch run: enumerate, acquire a session only when some segment
/// actually needs automation, and drive the backend.
pub async fn run(
    config: &Config,
    audio_dir: &Path,
    output_dir: &Path,
    mode: &SessionMode,
    filter: Option<&str>,
) -> Result<BatchSummary> {
    let segments = enumerate_segments(audio_dir, output_dir, config, filter)?;
    info!("found {} audio file(s) to process", segments.len());

    let pause = Duration::from_millis(config.batch.inter_segment_pause_ms);
    let needs_automation = segments.iter().any(|s| !s.output_path.exists());

    if !needs_automation {
        return run_with_renderer(&segments, &mut PreRendered, pause, output_dir).await;
    }

    let mut renderer = StudioRenderer::open(mode, config.clone()).await?;
    run_with_backend(&segments, &mut renderer, pause, output_dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Scripted renderer: succeeds or fails per segment id, records
    /// every invocation.
    struct ScriptedRenderer {
        fail_at: HashMap<String, Stage>,
        invocations: Vec<String>,
    }

    impl ScriptedRenderer {
        fn new() -> Self {
            Self {
                fail_at: HashMap::new(),
                invocations: Vec::new(),
            }
        }

        fn failing(id: &str, stage: Stage) -> Self {
            let mut s = Self::new();
            s.fail_at.insert(id.to_string(), stage);
            s
        }
    }

    #[async_trait]
    impl RenderSegment for ScriptedRenderer {
        async fn render(&mut self, segment: &Segment) -> RenderResult {
            self.invocations.push(segment.id.clone());
            match self.fail_at.get(&segment.id) {
                Some(stage) => RenderResult::failed(segment, *stage),
                None => {
                    std::fs::write(&segment.output_path, b"video").unwrap();
                    RenderResult::succeeded(segment)
                }
            }
        }
    }

    fn fixture(audio_names: &[&str]) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio");
        let out = dir.path().join("out");
        std::fs::create_dir_all(&audio).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        for name in audio_names {
            std::fs::write(audio.join(name), b"mp3").unwrap();
        }
        (dir, audio, out)
    }

    #[test]
    fn test_enumerate_lexicographic_order() {
        let (_dir, audio, out) = fixture(&["outro.mp3", "hook.mp3", "body.mp3", "notes.txt"]);
        let segments = enumerate_segments(&audio, &out, &Config::default(), None).unwrap();
        let ids: Vec<&str> = segments.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["body", "hook", "outro"]);
    }

    #[test]
    fn test_enumerate_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = enumerate_segments(&missing, dir.path(), &Config::default(), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_enumerate_empty_is_error() {
        let (_dir, audio, out) = fixture(&["readme.txt"]);
        assert!(enumerate_segments(&audio, &out, &Config::default(), None).is_err());
    }

    #[test]
    fn test_enumerate_segment_filter() {
        let (_dir, audio, out) = fixture(&["hook.mp3", "outro.mp3"]);
        let segments =
            enumerate_segments(&audio, &out, &Config::default(), Some("outro")).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].id, "outro");
    }

    #[tokio::test]
    async fn test_resume_skips_existing_output() {
        let (_dir, audio, out) = fixture(&["hook.mp3", "outro.mp3"]);
        std::fs::write(out.join("hook.mp4"), b"already rendered").unwrap();

        let segments = enumerate_segments(&audio, &out, &Config::default(), None).unwrap();
        let mut renderer = ScriptedRenderer::new();
        let summary =
            run_with_renderer(&segments, &mut renderer, Duration::ZERO, &out)
                .await
                .unwrap();

        // Exactly one automation invocation, for the missing segment
        assert_eq!(renderer.invocations, vec!["outro".to_string()]);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.total_count, 2);
        assert!(summary.results["hook"].as_ref().unwrap().ends_with("hook.mp4"));
        assert!(summary.results["outro"].is_some());
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let (_dir, audio, out) = fixture(&["hook.mp3", "outro.mp3"]);
        let segments = enumerate_segments(&audio, &out, &Config::default(), None).unwrap();

        let mut renderer = ScriptedRenderer::failing("hook", Stage::SceneRendered);
        let summary =
            run_with_renderer(&segments, &mut renderer, Duration::ZERO, &out)
                .await
                .unwrap();

        // Both segments were attempted despite the first failing
        assert_eq!(
            renderer.invocations,
            vec!["hook".to_string(), "outro".to_string()]
        );
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.total_count, 2);
        assert!(summary.results["hook"].is_none());
        assert!(summary.results["outro"].is_some());
        assert!(!summary.all_succeeded());
    }

    #[tokio::test]
    async fn test_idempotent_second_run() {
        let (_dir, audio, out) = fixture(&["hook.mp3", "outro.mp3"]);
        let segments = enumerate_segments(&audio, &out, &Config::default(), None).unwrap();

        let mut first = ScriptedRenderer::new();
        let summary1 = run_with_renderer(&segments, &mut first, Duration::ZERO, &out)
            .await
            .unwrap();

        // All outputs now exist; second run performs no automation
        let mut second = ScriptedRenderer::new();
        let summary2 = run_with_renderer(&segments, &mut second, Duration::ZERO, &out)
            .await
            .unwrap();

        assert!(second.invocations.is_empty());
        assert_eq!(summary1.success_count, summary2.success_count);
        assert_eq!(summary1.total_count, summary2.total_count);
    }

    #[tokio::test]
    async fn test_every_id_appears_exactly_once() {
        let (_dir, audio, out) = fixture(&["a.mp3", "b.mp3", "c.mp3"]);
        let segments = enumerate_segments(&audio, &out, &Config::default(), None).unwrap();

        let mut renderer = ScriptedRenderer::failing("b", Stage::Downloaded);
        let summary =
            run_with_renderer(&segments, &mut renderer, Duration::ZERO, &out)
                .await
                .unwrap();

        assert!(summary.success_count <= summary.total_count);
        let keys: Vec<&String> = summary.results.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_summary_json_shape() {
        let (_dir, audio, out) = fixture(&["hook.mp3"]);
        let segments = enumerate_segments(&audio, &out, &Config::default(), None).unwrap();
        let mut renderer = ScriptedRenderer::new();
        run_with_renderer(&segments, &mut renderer, Duration::ZERO, &out)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert!(parsed["results"].is_object());
        assert_eq!(parsed["success_count"], 1);
        assert_eq!(parsed["total_count"], 1);
    }

    /// Backend whose login check always fails, recording lifecycle
    /// calls.
    struct LockedOutBackend {
        invocations: u32,
        closed: bool,
    }

    #[async_trait]
    impl RenderSegment for LockedOutBackend {
        async fn render(&mut self, segment: &Segment) -> RenderResult {
            self.invocations += 1;
            RenderResult::failed(segment, Stage::NotStarted)
        }
    }

    #[async_trait]
    impl RenderBackend for LockedOutBackend {
        async fn verify_login(&self) -> Result<()> {
            Err(Error::NotAuthenticated("redirected to login page".into()))
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    #[tokio::test]
    async fn test_login_failure_aborts_before_any_segment() {
        let (_dir, audio, out) = fixture(&["hook.mp3", "outro.mp3"]);
        let segments = enumerate_segments(&audio, &out, &Config::default(), None).unwrap();

        let mut backend = LockedOutBackend {
            invocations: 0,
            closed: false,
        };
        let result = run_with_backend(&segments, &mut backend, Duration::ZERO, &out).await;

        assert!(matches!(result, Err(Error::NotAuthenticated(_))));
        // No segment was attempted, the session was released, and no
        // summary artifact exists
        assert_eq!(backend.invocations, 0);
        assert!(backend.closed);
        assert!(!out.join(SUMMARY_FILE).exists());
    }

    #[tokio::test]
    async fn test_precondition_failure_writes_no_summary() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("audio");
        let out = dir.path().join("out");

        let result = run(
            &Config::default(),
            &missing,
            &out,
            &SessionMode::Attach {
                cdp_url: "http://127.0.0.1:1".into(),
            },
            None,
        )
        .await;

        assert!(result.is_err());
        assert!(!out.join(SUMMARY_FILE).exists());
    }
}
