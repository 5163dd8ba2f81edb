//! Media compositor wrapper: opaque ffmpeg invocations that turn the
//! per-segment videos into a single delivery artifact.

use avrender_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct Compositor {
    ffmpeg: PathBuf,
}

impl Compositor {
    /// Locate ffmpeg on the system.
    pub fn discover() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| Error::Compositor("ffmpeg not found on PATH".into()))?;
        Ok(Self { ffmpeg })
    }

    pub fn with_binary(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        debug!(args = ?args, "running ffmpeg");
        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Compositor(format!("failed to run ffmpeg: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let tail = if stderr.len() > 1000 {
                format!("...{}", &stderr[stderr.len() - 1000..])
            } else {
                stderr
            };
            return Err(Error::Compositor(format!("ffmpeg failed: {}", tail)));
        }
        Ok(())
    }

    /// Concatenate segment videos, in the given order, into one file.
    pub async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<()> {
        if segments.is_empty() {
            return Err(Error::Compositor("no segment videos to concatenate".into()));
        }
        for segment in segments {
            if !segment.exists() {
                return Err(Error::Compositor(format!(
                    "missing segment video: {}",
                    segment.display()
                )));
            }
        }

        let list_path = output
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("concat.txt");
        let list = segments
            .iter()
            .map(|p| format!("file '{}'\n", p.display()))
            .collect::<String>();
        std::fs::write(&list_path, list)?;

        info!("compositing {} segment(s)", segments.len());
        let list_str = list_path.display().to_string();
        let out_str = output.display().to_string();
        self.run(&[
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            &list_str,
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "23",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            &out_str,
        ])
        .await?;
        info!("final video: {}", output.display());
        Ok(())
    }

    /// Size-reduced 720p delivery pass.
    pub async fn compress(&self, input: &Path, output: &Path) -> Result<()> {
        if !input.exists() {
            return Err(Error::Compositor(format!(
                "no video to compress: {}",
                input.display()
            )));
        }
        info!("compressing for delivery");
        let in_str = input.display().to_string();
        let out_str = output.display().to_string();
        self.run(&[
            "-y",
            "-i",
            &in_str,
            "-c:v",
            "libx264",
            "-crf",
            "26",
            "-vf",
            "scale=1280:720",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            &out_str,
        ])
        .await?;
        info!("delivery video: {}", output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concat_rejects_empty_input() {
        let compositor = Compositor::with_binary(PathBuf::from("ffmpeg"));
        let err = compositor
            .concat(&[], Path::new("/tmp/out.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no segment videos"));
    }

    #[tokio::test]
    async fn test_concat_rejects_missing_segment() {
        let dir = tempfile::tempdir().unwrap();
        let compositor = Compositor::with_binary(PathBuf::from("ffmpeg"));
        let missing = dir.path().join("nope.mp4");
        let err = compositor
            .concat(&[missing], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing segment video"));
    }

    #[tokio::test]
    async fn test_compress_rejects_missing_input() {
        let compositor = Compositor::with_binary(PathBuf::from("ffmpeg"));
        let err = compositor
            .compress(Path::new("/definitely/not/here.mp4"), Path::new("/tmp/o.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no video to compress"));
    }

    #[tokio::test]
    async fn test_failed_binary_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let seg = dir.path().join("a.mp4");
        std::fs::write(&seg, b"not a video").unwrap();
        // `false` exits non-zero regardless of args
        let compositor = Compositor::with_binary(PathBuf::from("false"));
        let result = compositor.concat(&[seg], &dir.path().join("out.mp4")).await;
        assert!(result.is_err());
    }
}
