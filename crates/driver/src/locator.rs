//! Semantic element location with ordered fallback candidates.
//!
//! The studio's markup is not contractually stable, so each UI intent
//! ("the Upload-audio control", "the Render button") maps to an ordered
//! list of independent element queries tried short-circuit. Adding a
//! new strategy for a target is a table edit, not new branching logic.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Poll step while waiting for a single candidate to match.
const CANDIDATE_RETRY_MS: u64 = 250;

/// A handle to a located element in the live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    /// Remote objectId from Runtime.evaluate.
    pub object_id: String,
}

/// One concrete way of finding a target: a JS expression evaluating to
/// an element or null.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub description: &'static str,
    pub js: String,
}

fn js_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Candidate {
    /// A `<button>` whose text contains `text`.
    fn button_text(text: &str) -> Self {
        let t = js_escape(text);
        Self {
            description: "button by text",
            js: format!(
                "[...document.querySelectorAll('button')].find(b => b.textContent && b.textContent.includes(\"{}\")) || null",
                t
            ),
        }
    }

    /// A `<button>` whose text contains `text` and which is enabled.
    fn enabled_button_text(text: &str) -> Self {
        let t = js_escape(text);
        Self {
            description: "enabled button by text",
            js: format!(
                "[...document.querySelectorAll('button')].find(b => b.textContent && b.textContent.includes(\"{}\") && !b.disabled) || null",
                t
            ),
        }
    }

    /// Any element with `role="button"` whose text contains `text`.
    fn role_button_text(text: &str) -> Self {
        let t = js_escape(text);
        Self {
            description: "role=button by text",
            js: format!(
                "[...document.querySelectorAll('[role=\"button\"]')].find(b => b.textContent && b.textContent.includes(\"{}\")) || null",
                t
            ),
        }
    }

    /// Deepest element containing `text` with no child that also
    /// contains it (structural containment heuristic).
    fn leaf_text(text: &str) -> Self {
        let t = js_escape(text);
        Self {
            description: "leaf element by text",
            js: format!(
                "(() => {{ const t = \"{}\"; const all = [...document.querySelectorAll('div,span,button,a,p')].filter(e => e.textContent && e.textContent.includes(t)); return all.find(e => ![...e.children].some(c => c.textContent && c.textContent.includes(t))) || null; }})()",
                t
            ),
        }
    }

    /// Plain CSS selector.
    fn css(selector: &'static str) -> Self {
        Self {
            description: "css selector",
            js: format!(
                "document.querySelector('{}')",
                selector.replace('\'', "\\'")
            ),
        }
    }
}

/// A named UI intent, resolved via its candidate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticTarget {
    /// The script input area on the creation surface. Poking it first
    /// coaxes the upload affordance into existing on some layouts.
    ScriptArea,
    /// The "Upload audio" control that opens the upload dialog.
    UploadAudioControl,
    /// The "Upload Audio" tab inside the dialog.
    UploadAudioTab,
    /// The native file input (usually hidden by the upload widget).
    FileInput,
    /// The uploaded file's entry in the dialog list, by filename.
    UploadedFileEntry(String),
    /// The "Add audio" confirmation in the upload dialog.
    AddAudioConfirm,
    /// The scene "Render" control ("Submit" on some layouts).
    RenderControl,
    /// The "Generate" control once it becomes enabled.
    GenerateEnabled,
    /// An explicit resolution option (e.g. "1080p").
    ResolutionOption(String),
    /// The generation confirmation, in fallback order.
    ConfirmControl,
    /// The "Download" affordance signaling a finished video.
    DownloadButton,
    /// The most recent entry on the projects listing.
    ProjectCard,
}

impl SemanticTarget {
    /// Ordered candidate queries for this target. First match wins.
    pub fn candidates(&self) -> Vec<Candidate> {
        match self {
            Self::ScriptArea => vec![
                Candidate::leaf_text("Type your script"),
                Candidate::css("[contenteditable=\"true\"]"),
            ],
            Self::UploadAudioControl => vec![
                Candidate::button_text("Upload audio"),
                Candidate::role_button_text("Upload audio"),
                Candidate::leaf_text("Upload audio"),
            ],
            Self::UploadAudioTab => vec![
                Candidate::leaf_text("Upload Audio"),
                Candidate::role_button_text("Upload Audio"),
            ],
            Self::FileInput => vec![Candidate::css("input[type=\"file\"]")],
            Self::UploadedFileEntry(name) => vec![
                Candidate::leaf_text(name),
                Candidate::button_text(name),
            ],
            Self::AddAudioConfirm => vec![
                Candidate::button_text("Add audio"),
                Candidate::role_button_text("Add audio"),
            ],
            Self::RenderControl => vec![
                Candidate::button_text("Render"),
                Candidate::button_text("Submit"),
            ],
            Self::GenerateEnabled => vec![
                Candidate::enabled_button_text("Generate"),
            ],
            Self::ResolutionOption(label) => vec![
                Candidate::leaf_text(label),
                Candidate::role_button_text(label),
            ],
            Self::ConfirmControl => vec![
                Candidate::button_text("Submit"),
                Candidate::button_text("Confirm"),
                Candidate::button_text("Generate"),
            ],
            Self::DownloadButton => vec![
                Candidate::button_text("Download"),
                Candidate::role_button_text("Download"),
            ],
            Self::ProjectCard => vec![
                Candidate::css("[data-testid=\"project-card\"]"),
            ],
        }
    }
}

/// Anything that can try one candidate query against a live page.
#[async_trait]
pub trait PageQuery: Send + Sync {
    async fn find(&self, candidate: &Candidate) -> Option<ElementHandle>;
}

/// Try each candidate in order, waiting up to `per_candidate` for it to
/// match before moving to the next. `None` when every candidate fails;
/// callers decide whether absence is fatal.
pub async fn resolve<P: PageQuery + ?Sized>(
    page: &P,
    target: &SemanticTarget,
    per_candidate: Duration,
) -> Option<ElementHandle> {
    for candidate in target.candidates() {
        let start = std::time::Instant::now();
        loop {
            if let Some(handle) = page.find(&candidate).await {
                debug!("resolved {:?} via {}", target, candidate.description);
                return Some(handle);
            }
            if start.elapsed() >= per_candidate {
                debug!(
                    "candidate '{}' for {:?} did not match within {}ms",
                    candidate.description,
                    target,
                    per_candidate.as_millis()
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(CANDIDATE_RETRY_MS)).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Mock page that matches only a chosen candidate description.
    struct FixedPage {
        match_description: Option<&'static str>,
        queries: AtomicU32,
    }

    #[async_trait]
    impl PageQuery for FixedPage {
        async fn find(&self, candidate: &Candidate) -> Option<ElementHandle> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if Some(candidate.description) == self.match_description {
                Some(ElementHandle {
                    object_id: "obj-1".into(),
                })
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn test_last_candidate_wins() {
        // UploadAudioControl's last candidate is the leaf-text heuristic
        let page = FixedPage {
            match_description: Some("leaf element by text"),
            queries: AtomicU32::new(0),
        };
        let handle = resolve(
            &page,
            &SemanticTarget::UploadAudioControl,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(handle.unwrap().object_id, "obj-1");
    }

    #[tokio::test]
    async fn test_all_candidates_fail_returns_none() {
        let page = FixedPage {
            match_description: None,
            queries: AtomicU32::new(0),
        };
        let start = std::time::Instant::now();
        let handle = resolve(
            &page,
            &SemanticTarget::ConfirmControl,
            Duration::from_millis(20),
        )
        .await;
        assert!(handle.is_none());
        // Bounded by roughly candidates * per_candidate, not infinite
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_first_match_short_circuits() {
        let page = FixedPage {
            match_description: Some("button by text"),
            queries: AtomicU32::new(0),
        };
        let handle = resolve(
            &page,
            &SemanticTarget::RenderControl,
            Duration::from_millis(1),
        )
        .await;
        assert!(handle.is_some());
        assert_eq!(page.queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_every_target_has_candidates() {
        let targets = [
            SemanticTarget::ScriptArea,
            SemanticTarget::UploadAudioControl,
            SemanticTarget::UploadAudioTab,
            SemanticTarget::FileInput,
            SemanticTarget::UploadedFileEntry("hook.mp3".into()),
            SemanticTarget::AddAudioConfirm,
            SemanticTarget::RenderControl,
            SemanticTarget::GenerateEnabled,
            SemanticTarget::ResolutionOption("1080p".into()),
            SemanticTarget::ConfirmControl,
            SemanticTarget::DownloadButton,
            SemanticTarget::ProjectCard,
        ];
        for target in &targets {
            assert!(
                !target.candidates().is_empty(),
                "{:?} has no candidates",
                target
            );
        }
    }

    #[test]
    fn test_candidate_js_escapes_quotes() {
        let c = Candidate::button_text("say \"hi\"");
        assert!(c.js.contains("\\\"hi\\\""));
    }

    #[test]
    fn test_confirm_fallback_order() {
        let cands = SemanticTarget::ConfirmControl.candidates();
        assert!(cands[0].js.contains("Submit"));
        assert!(cands[1].js.contains("Confirm"));
        assert!(cands[2].js.contains("Generate"));
    }
}
