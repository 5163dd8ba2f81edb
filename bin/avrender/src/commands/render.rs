use avrender_core::{Config, Paths};
use avrender_driver::{batch, SessionMode};
use std::path::{Path, PathBuf};

/// Run a render batch. Returns whether every processed segment
/// succeeded; precondition failures (missing inputs, no auth, no
/// browser) surface as errors before any segment is attempted.
pub async fn run(
    audio_dir: &Path,
    output_dir: &Path,
    headless: bool,
    segment: Option<&str>,
    attach: bool,
    cdp_url: Option<String>,
) -> anyhow::Result<bool> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let mode = if attach || cdp_url.is_some() {
        SessionMode::Attach {
            cdp_url: cdp_url.unwrap_or_else(|| config.browser.attach_url.clone()),
        }
    } else {
        let profile_dir = config
            .browser
            .profile_dir
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| paths.browser_profile_dir());
        SessionMode::Launch {
            profile_dir,
            headless,
        }
    };

    let summary = batch::run(&config, audio_dir, output_dir, &mode, segment).await?;
    Ok(summary.all_succeeded())
}
