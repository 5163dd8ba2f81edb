//! Streamed video download with the headers the studio CDN expects.

use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

pub struct VideoDownloader {
    client: reqwest::Client,
    referrer: String,
    user_agent: String,
}

impl VideoDownloader {
    pub fn new(referrer: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            referrer: referrer.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Stream `url` to `out_path`. Returns `false` on non-200 status or
    /// transport error; no file is left behind on failure.
    pub async fn download(&self, url: &str, out_path: &Path) -> bool {
        info!("downloading video to {}", out_path.display());

        let response = match self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Referer", &self.referrer)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("download request failed: {}", e);
                return false;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            error!("download failed: HTTP {}", response.status());
            return false;
        }

        if let Some(parent) = out_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!("failed to create output directory: {}", e);
                return false;
            }
        }

        let mut file = match tokio::fs::File::create(out_path).await {
            Ok(f) => f,
            Err(e) => {
                error!("failed to create {}: {}", out_path.display(), e);
                return false;
            }
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    error!("download stream error: {}", e);
                    cleanup_partial(out_path).await;
                    return false;
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                error!("write error: {}", e);
                cleanup_partial(out_path).await;
                return false;
            }
        }

        if let Err(e) = file.flush().await {
            error!("flush error: {}", e);
            cleanup_partial(out_path).await;
            return false;
        }

        info!("downloaded: {}", out_path.display());
        true
    }
}

async fn cleanup_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("could not remove partial file {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Serve one canned HTTP response on a local socket.
    async fn one_shot_server(response: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_404_returns_false_and_no_file() {
        let base = one_shot_server(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("video.mp4");

        let dl = VideoDownloader::new("https://app.example.com/", "test-agent");
        let ok = dl.download(&format!("{}/video.mp4", base), &out).await;

        assert!(!ok);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_200_writes_file() {
        let base = one_shot_server(
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("video.mp4");

        let dl = VideoDownloader::new("https://app.example.com/", "test-agent");
        let ok = dl.download(&format!("{}/video.mp4", base), &out).await;

        assert!(ok);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_unreachable_host_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("video.mp4");
        let dl = VideoDownloader::new("https://app.example.com/", "test-agent");
        // Port 1 is essentially never listening
        let ok = dl.download("http://127.0.0.1:1/video.mp4", &out).await;
        assert!(!ok);
        assert!(!out.exists());
    }
}
