use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".avrender"))
            .unwrap_or_else(|| PathBuf::from(".avrender"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Persistent Chrome profile that holds the studio login cookies.
    /// The user logs in manually once; every launch reuses this profile.
    pub fn browser_profile_dir(&self) -> PathBuf {
        self.base.join("browser").join("profile")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = Paths::with_base(PathBuf::from("/tmp/avrender-test"));
        assert_eq!(
            paths.config_file(),
            PathBuf::from("/tmp/avrender-test/config.json")
        );
        assert!(paths
            .browser_profile_dir()
            .ends_with("browser/profile"));
    }
}
