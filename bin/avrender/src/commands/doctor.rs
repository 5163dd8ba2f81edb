use avrender_core::{Config, Paths};
use avrender_driver::session::find_chrome_binary;

/// Run environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("avrender doctor - environment diagnostics");
    println!("=========================================");
    println!();

    let mut err_count = 0u32;

    // --- Config ---
    println!("Configuration");
    if paths.config_file().exists() {
        print_ok("config file", &paths.config_file().display().to_string());
    } else {
        print_warn("config file not found", "defaults will be used");
    }
    let config = Config::load_or_default(&paths)?;
    println!("  studio: {}", config.studio.home_url);
    println!();

    // --- Browser ---
    println!("Browser");
    match find_chrome_binary() {
        Some(path) => print_ok("chrome binary", &path),
        None => {
            print_err("chrome binary not found", "install Chrome or Chromium");
            err_count += 1;
        }
    }
    let profile = config
        .browser
        .profile_dir
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| paths.browser_profile_dir());
    if profile.exists() {
        print_ok("browser profile", &profile.display().to_string());
    } else {
        print_warn(
            "browser profile missing",
            "first render will create it; log into the studio manually once",
        );
    }
    println!();

    // --- Compositor ---
    println!("Compositor");
    match which::which("ffmpeg") {
        Ok(path) => print_ok("ffmpeg", &path.display().to_string()),
        Err(_) => {
            print_err("ffmpeg not found", "required for `avrender compose`");
            err_count += 1;
        }
    }
    println!();

    if err_count == 0 {
        println!("All checks passed.");
    } else {
        println!("{} problem(s) found.", err_count);
    }
    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    println!("  [ok]   {}: {}", label, detail);
}

fn print_warn(label: &str, detail: &str) {
    println!("  [warn] {}: {}", label, detail);
}

fn print_err(label: &str, detail: &str) {
    println!("  [err]  {}: {}", label, detail);
}
