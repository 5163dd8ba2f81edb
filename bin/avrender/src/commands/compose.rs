use avrender_driver::compose::Compositor;
use std::path::{Path, PathBuf};

/// Concatenate rendered segment videos (lexicographic order) and
/// optionally produce the compressed delivery variant.
pub async fn run(segments_dir: &Path, output: &Path, compress: bool) -> anyhow::Result<()> {
    let mut segments: Vec<PathBuf> = std::fs::read_dir(segments_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("mp4"))
        .collect();
    segments.sort();

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let compositor = Compositor::discover()?;
    compositor.concat(&segments, output).await?;

    if compress {
        let delivery = delivery_path(output);
        compositor.compress(output, &delivery).await?;
        println!("Delivery video: {}", delivery.display());
    }

    println!("Final video: {}", output.display());
    Ok(())
}

fn delivery_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "final".into());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".into());
    output.with_file_name(format!("{}-delivery.{}", stem, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_path_suffix() {
        let p = delivery_path(Path::new("/out/final-1080p.mp4"));
        assert_eq!(p, PathBuf::from("/out/final-1080p-delivery.mp4"));
    }
}
