//! Browser session acquisition and page-level operations.
//!
//! Two ways to obtain a controllable page behind one `Session` type:
//! launching Chrome with a persistent profile (login cookies survive
//! across runs), or attaching to an already-running instance over its
//! local debugging port. Either way the session owns exactly one page
//! and must be released on every exit path.

use async_trait::async_trait;
use avrender_core::{Config, Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::locator::{Candidate, ElementHandle, PageQuery};

/// How the session acquires its browser.
#[derive(Debug, Clone)]
pub enum SessionMode {
    /// Launch Chrome with a persistent local profile directory.
    Launch {
        profile_dir: PathBuf,
        headless: bool,
    },
    /// Attach to an externally launched browser over its control port.
    Attach { cdp_url: String },
}

enum Backend {
    Launched { process: Child },
    Attached { base_url: String, target_id: String },
}

/// An opened browser context with one active page.
pub struct Session {
    cdp: CdpClient,
    config: Config,
    backend: Backend,
}

impl Session {
    /// Acquire a session in the given mode and enable the CDP domains
    /// the workflow relies on.
    pub async fn open(mode: &SessionMode, config: Config) -> Result<Self> {
        let (cdp, backend) = match mode {
            SessionMode::Launch {
                profile_dir,
                headless,
            } => {
                let (cdp, process) =
                    launch_browser(profile_dir, *headless, &config).await?;
                (cdp, Backend::Launched { process })
            }
            SessionMode::Attach { cdp_url } => {
                let (cdp, target_id) = attach_browser(cdp_url).await?;
                (
                    cdp,
                    Backend::Attached {
                        base_url: cdp_url.trim_end_matches('/').to_string(),
                        target_id,
                    },
                )
            }
        };

        for domain in ["Page", "Runtime", "DOM", "Network"] {
            cdp.enable_domain(domain).await?;
        }

        Ok(Self {
            cdp,
            config,
            backend,
        })
    }

    /// Release the session. In launch mode the browser is closed and
    /// the process killed; in attach mode only our tab is closed, the
    /// external browser keeps running.
    pub async fn close(&mut self) {
        match &mut self.backend {
            Backend::Launched { process } => {
                if let Err(e) = self.cdp.send_command("Browser.close", serde_json::json!({})).await
                {
                    debug!("Browser.close failed (may already be closed): {}", e);
                }
                let _ = process.kill().await;
                info!("browser closed");
            }
            Backend::Attached {
                base_url,
                target_id,
            } => {
                let url = format!("{}/json/close/{}", base_url, target_id);
                if let Err(e) = reqwest::get(&url).await {
                    debug!("failed to close attached tab: {}", e);
                }
                info!("detached from browser (tab closed)");
            }
        }
    }

    /// Verify we are logged into the studio. Fatal when the home surface
    /// redirects to a login page; best-effort otherwise.
    pub async fn check_login(&self) -> Result<()> {
        let home_url = self.config.studio.home_url.clone();
        self.goto(&home_url).await?;
        self.settle(self.config.timeouts.short_settle_ms).await;

        let url = self.current_url().await?;
        if self
            .config
            .studio
            .login_markers
            .iter()
            .any(|m| url.contains(m.as_str()))
        {
            return Err(Error::NotAuthenticated(
                "studio redirected to login page; log in manually in the browser profile first"
                    .into(),
            ));
        }

        let content = self.content().await.unwrap_or_default();
        if self
            .config
            .studio
            .logged_in_cues
            .iter()
            .any(|cue| content.contains(cue.as_str()))
        {
            info!("logged into studio");
        } else {
            warn!("could not verify studio login status - proceeding anyway");
        }
        Ok(())
    }

    // ─── Page operations used by the workflow ─────────────────────────

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.cdp.navigate(url).await?;
        Ok(())
    }

    /// Fixed observation window; the studio exposes no ready signal.
    pub async fn settle(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    pub async fn current_url(&self) -> Result<String> {
        let v = self.cdp.evaluate_js("location.href").await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    /// Full page markup, for textual state signals.
    pub async fn content(&self) -> Result<String> {
        let v = self
            .cdp
            .evaluate_js("document.documentElement.outerHTML")
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    pub async fn eval(&self, js: &str) -> Result<Value> {
        self.cdp.evaluate_js(js).await
    }

    pub async fn click(&self, handle: &ElementHandle) -> Result<()> {
        self.cdp
            .call_function_on(
                &handle.object_id,
                "function() { this.scrollIntoView({block: 'center'}); this.click(); }",
            )
            .await?;
        Ok(())
    }

    /// Inject a local file into a file input element and fire its
    /// change event so the upload widget reacts.
    pub async fn set_files(&self, handle: &ElementHandle, path: &Path) -> Result<()> {
        self.cdp
            .set_file_input_files(
                vec![path.display().to_string()],
                &handle.object_id,
            )
            .await?;
        self.cdp
            .call_function_on(
                &handle.object_id,
                "function() { this.dispatchEvent(new Event('change', {bubbles: true})); }",
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PageQuery for Session {
    async fn find(&self, candidate: &Candidate) -> Option<ElementHandle> {
        match self.cdp.evaluate_object(&candidate.js).await {
            Ok(Some(object_id)) => Some(ElementHandle { object_id }),
            Ok(None) => None,
            Err(e) => {
                debug!("candidate query failed: {}", e);
                None
            }
        }
    }
}

// ─── Launch mode ──────────────────────────────────────────────────────

async fn launch_browser(
    profile_dir: &Path,
    headless: bool,
    config: &Config,
) -> Result<(CdpClient, Child)> {
    let browser_path = find_chrome_binary()
        .ok_or_else(|| Error::Browser("Chrome/Chromium not found on this system".into()))?;

    std::fs::create_dir_all(profile_dir)?;

    let debug_port = find_free_port().await?;
    let args = build_chrome_args(debug_port, profile_dir, headless, config);

    info!(
        port = debug_port,
        headless = headless,
        profile = %profile_dir.display(),
        "launching browser"
    );

    let child = Command::new(&browser_path)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Browser(format!("failed to launch {}: {}", browser_path, e)))?;

    wait_for_cdp_ready(debug_port, config.browser.cdp_ready_secs).await?;
    let page_ws_url = get_page_ws_url(debug_port).await?;
    let cdp = CdpClient::connect(&page_ws_url).await?;

    info!(ws_url = %page_ws_url, "CDP connection established");
    Ok((cdp, child))
}

fn build_chrome_args(
    debug_port: u16,
    profile_dir: &Path,
    headless: bool,
    config: &Config,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--password-store=basic".to_string(),
        "--no-sandbox".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--window-size={},{}",
        config.browser.viewport_width, config.browser.viewport_height
    ));
    args.push("about:blank".to_string());
    args
}

pub fn find_chrome_binary() -> Option<String> {
    let candidates = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Browser(format!("failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Browser(format!("failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the debugging endpoint responds.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<()> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Browser(format!(
                "CDP endpoint not ready after {}s on port {}",
                timeout_secs, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if resp.json::<Value>().await.is_ok() {
                return Ok(());
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve the first page target's WebSocket URL via /json/list.
/// Retries a few times since the page target may not appear at once.
async fn get_page_ws_url(port: u16) -> Result<String> {
    let base = format!("http://127.0.0.1:{}", port);
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if let Some(ws_url) = first_page_ws(&base, None).await {
            return Ok(ws_url);
        }
    }
    Err(Error::Browser("no page target found after retries".into()))
}

/// List targets at `{base}/json/list` and return the WebSocket URL of
/// either the named target or the first page target.
async fn first_page_ws(base: &str, target_id: Option<&str>) -> Option<String> {
    let resp = reqwest::get(format!("{}/json/list", base)).await.ok()?;
    let targets: Vec<Value> = resp.json().await.ok()?;
    for target in &targets {
        let matches = match target_id {
            Some(id) => target.get("id").and_then(|v| v.as_str()) == Some(id),
            None => target.get("type").and_then(|v| v.as_str()) == Some("page"),
        };
        if matches {
            if let Some(ws) = target
                .get("webSocketDebuggerUrl")
                .and_then(|v| v.as_str())
            {
                return Some(ws.to_string());
            }
        }
    }
    None
}

// ─── Attach mode ──────────────────────────────────────────────────────

/// Connect to an already-running browser: create a fresh tab via the
/// browser-level CDP connection, then connect to that tab's page target.
async fn attach_browser(cdp_url: &str) -> Result<(CdpClient, String)> {
    let base = cdp_url.trim_end_matches('/');

    let resp = reqwest::get(format!("{}/json/version", base))
        .await
        .map_err(|e| {
            Error::Browser(format!(
                "no browser reachable at {}: {} (launch it with --remote-debugging-port)",
                base, e
            ))
        })?;
    let version: Value = resp
        .json()
        .await
        .map_err(|e| Error::Browser(format!("bad /json/version response: {}", e)))?;
    let browser_ws = version
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Browser("no webSocketDebuggerUrl in /json/version".into()))?;

    let browser_cdp = CdpClient::connect(browser_ws).await?;
    let target_id = browser_cdp.create_target("about:blank").await?;
    drop(browser_cdp);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if let Some(ws_url) = first_page_ws(base, Some(&target_id)).await {
            let cdp = CdpClient::connect(&ws_url).await?;
            info!(target = %target_id, "attached to running browser");
            return Ok((cdp, target_id));
        }
    }

    Err(Error::Browser(format!(
        "no WebSocket URL found for created tab '{}'",
        target_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_args_headless() {
        let config = Config::default();
        let args = build_chrome_args(9222, Path::new("/tmp/profile"), true, &config);
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.iter().any(|a| a == "--remote-debugging-port=9222"));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
    }

    #[test]
    fn test_chrome_args_headed_window() {
        let config = Config::default();
        let args = build_chrome_args(9222, Path::new("/tmp/profile"), false, &config);
        assert!(!args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1920,1080".to_string()));
    }

    #[test]
    fn test_session_mode_attach_url_trim() {
        // Trailing slash must not produce "//json" paths
        let mode = SessionMode::Attach {
            cdp_url: "http://127.0.0.1:18800/".into(),
        };
        if let SessionMode::Attach { cdp_url } = mode {
            assert_eq!(cdp_url.trim_end_matches('/'), "http://127.0.0.1:18800");
        }
    }
}
