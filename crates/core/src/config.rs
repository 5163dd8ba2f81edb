use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

/// URLs and textual signals of the avatar studio web application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudioConfig {
    #[serde(default = "default_home_url")]
    pub home_url: String,
    #[serde(default = "default_create_url")]
    pub create_url: String,
    #[serde(default = "default_projects_url")]
    pub projects_url: String,
    /// URL fragments that mean we landed on a login page.
    #[serde(default = "default_login_markers")]
    pub login_markers: Vec<String>,
    /// Page-content fragments that indicate a logged-in dashboard.
    #[serde(default = "default_logged_in_cues")]
    pub logged_in_cues: Vec<String>,
    /// Resolution option to pick after Generate, when the selector is
    /// present. `None` skips selection and keeps the studio default.
    #[serde(default = "default_preferred_resolution")]
    pub preferred_resolution: Option<String>,
    /// Referer header the media CDN expects on downloads.
    #[serde(default = "default_referrer")]
    pub referrer: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_home_url() -> String {
    "https://app.heygen.com/home".into()
}
fn default_create_url() -> String {
    "https://app.heygen.com/create-v4".into()
}
fn default_projects_url() -> String {
    "https://app.heygen.com/projects".into()
}
fn default_login_markers() -> Vec<String> {
    vec!["login".into(), "signin".into()]
}
fn default_logged_in_cues() -> Vec<String> {
    vec![
        "Create video".into(),
        "My Projects".into(),
        "projects".into(),
        "home".into(),
    ]
}
fn default_preferred_resolution() -> Option<String> {
    Some("1080p".into())
}
fn default_referrer() -> String {
    "https://app.heygen.com/".into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into()
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            home_url: default_home_url(),
            create_url: default_create_url(),
            projects_url: default_projects_url(),
            login_markers: default_login_markers(),
            logged_in_cues: default_logged_in_cues(),
            preferred_resolution: default_preferred_resolution(),
            referrer: default_referrer(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Override for the persistent profile directory (default: Paths).
    #[serde(default)]
    pub profile_dir: Option<String>,
    /// Control endpoint of an externally running browser (attach mode).
    #[serde(default = "default_attach_url")]
    pub attach_url: String,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// How long to wait for the debugging endpoint after launch.
    #[serde(default = "default_cdp_ready_secs")]
    pub cdp_ready_secs: u64,
}

fn default_attach_url() -> String {
    "http://127.0.0.1:18800".into()
}
fn default_viewport_width() -> u32 {
    1920
}
fn default_viewport_height() -> u32 {
    1080
}
fn default_cdp_ready_secs() -> u64 {
    15
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            profile_dir: None,
            attach_url: default_attach_url(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            cdp_ready_secs: default_cdp_ready_secs(),
        }
    }
}

/// Per-stage timeouts and poll intervals, all in milliseconds.
/// Each stage of the workflow reads its own bound so product can tune
/// one stage without touching the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_page_load_ms")]
    pub page_load_ms: u64,
    /// Settle delay after navigating to the creation surface. The app
    /// exposes no deterministic ready signal, so we observe a window.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_short_settle_ms")]
    pub short_settle_ms: u64,
    /// Per-candidate wait inside the locator fallback chain.
    #[serde(default = "default_candidate_ms")]
    pub candidate_ms: u64,
    #[serde(default = "default_transcription_ms")]
    pub transcription_ms: u64,
    #[serde(default = "default_transcription_poll_ms")]
    pub transcription_poll_ms: u64,
    #[serde(default = "default_render_ms")]
    pub render_ms: u64,
    #[serde(default = "default_render_poll_ms")]
    pub render_poll_ms: u64,
    #[serde(default = "default_generation_ms")]
    pub generation_ms: u64,
    #[serde(default = "default_generation_poll_ms")]
    pub generation_poll_ms: u64,
}

fn default_page_load_ms() -> u64 {
    30_000
}
fn default_settle_ms() -> u64 {
    6_000
}
fn default_short_settle_ms() -> u64 {
    2_000
}
fn default_candidate_ms() -> u64 {
    5_000
}
fn default_transcription_ms() -> u64 {
    60_000
}
fn default_transcription_poll_ms() -> u64 {
    2_000
}
fn default_render_ms() -> u64 {
    420_000
}
fn default_render_poll_ms() -> u64 {
    5_000
}
fn default_generation_ms() -> u64 {
    420_000
}
fn default_generation_poll_ms() -> u64 {
    10_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            page_load_ms: default_page_load_ms(),
            settle_ms: default_settle_ms(),
            short_settle_ms: default_short_settle_ms(),
            candidate_ms: default_candidate_ms(),
            transcription_ms: default_transcription_ms(),
            transcription_poll_ms: default_transcription_poll_ms(),
            render_ms: default_render_ms(),
            render_poll_ms: default_render_poll_ms(),
            generation_ms: default_generation_ms(),
            generation_poll_ms: default_generation_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default = "default_audio_extensions")]
    pub audio_extensions: Vec<String>,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    /// Pause between segments so we do not hammer the remote app.
    #[serde(default = "default_inter_segment_pause_ms")]
    pub inter_segment_pause_ms: u64,
}

fn default_audio_extensions() -> Vec<String> {
    vec!["mp3".into()]
}
fn default_output_extension() -> String {
    "mp4".into()
}
fn default_inter_segment_pause_ms() -> u64 {
    3_000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            audio_extensions: default_audio_extensions(),
            output_extension: default_output_extension(),
            inter_segment_pause_ms: default_inter_segment_pause_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub studio: StudioConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.studio.create_url.contains("create"));
        assert_eq!(config.timeouts.render_ms, 420_000);
        assert_eq!(config.timeouts.transcription_ms, 60_000);
        assert_eq!(config.batch.audio_extensions, vec!["mp3".to_string()]);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"timeouts": {"renderMs": 10000}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeouts.render_ms, 10_000);
        // Untouched fields keep their defaults
        assert_eq!(config.timeouts.generation_ms, 420_000);
        assert_eq!(config.batch.inter_segment_pause_ms, 3_000);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let config = Config::load_or_default(&paths).unwrap();
        assert_eq!(config.browser.viewport_width, 1920);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.batch.inter_segment_pause_ms = 500;
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.batch.inter_segment_pause_ms, 500);
    }
}
