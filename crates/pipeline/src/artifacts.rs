//! Turning an [`ImageRef`] into something a user can open.
//!
//! The `/view` URL is always available. When ComfyUI shares a filesystem
//! with us the file is looked up in a few likely locations; otherwise it
//! is downloaded into the download directory.

use std::path::{Path, PathBuf};

use nesupixel_comfyui::{ComfyUIApi, ImageRef};
use nesupixel_core::config::ComfyConfig;
use serde::Serialize;

/// A generated image: its view URL and, if obtainable, a local copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArtifact {
    pub url: String,
    pub local_path: Option<PathBuf>,
}

/// Paths where `image` may already exist on disk, most likely first.
///
/// `image.subfolder` may use Windows separators; they are normalised.
pub fn candidate_paths(output_dir: &Path, subfolder_name: &str, image: &ImageRef) -> Vec<PathBuf> {
    let sub = image.subfolder.replace('\\', "/");
    let relative = if sub.is_empty() {
        PathBuf::from(&image.filename)
    } else {
        Path::new(&sub).join(&image.filename)
    };

    let mut candidates = vec![output_dir.join(&relative)];

    // Outputs are often written to `<output>/<subfolder>/...` while the
    // configured dir already ends in the subfolder.
    let output_str = output_dir.to_string_lossy();
    if !subfolder_name.is_empty() && output_str.contains(subfolder_name) {
        let stripped = output_str.replacen(subfolder_name, "", 1);
        candidates.push(PathBuf::from(stripped).join(&relative));
    }

    candidates.push(Path::new("output").join(subfolder_name).join(&relative));
    candidates.push(Path::new("output").join(&relative));

    let mut unique: Vec<PathBuf> = Vec::with_capacity(candidates.len());
    for path in candidates {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    unique
}

/// First candidate that exists as a regular file.
pub async fn find_local(candidates: &[PathBuf]) -> Option<PathBuf> {
    for path in candidates {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.is_file() {
                return Some(path.clone());
            }
        }
    }
    None
}

/// Resolves image references against the configured directories and
/// falls back to downloading through `/view`.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    api: ComfyUIApi,
    output_dir: PathBuf,
    subfolder: String,
    download_dir: PathBuf,
}

impl ArtifactResolver {
    pub fn new(
        api: ComfyUIApi,
        output_dir: impl Into<PathBuf>,
        subfolder: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            output_dir: output_dir.into(),
            subfolder: subfolder.into(),
            download_dir: download_dir.into(),
        }
    }

    pub fn from_config(api: ComfyUIApi, config: &ComfyConfig) -> Self {
        Self::new(
            api,
            config.output_dir.clone(),
            config.subfolder.clone(),
            config.download_dir.clone(),
        )
    }

    /// Resolve `image`. Never fails: the URL is always returned and
    /// `local_path` is `None` when neither lookup nor download worked.
    pub async fn resolve(&self, image: &ImageRef) -> ResolvedArtifact {
        let url = image.view_url(self.api.api_url());

        let candidates = candidate_paths(&self.output_dir, &self.subfolder, image);
        if let Some(path) = find_local(&candidates).await {
            tracing::debug!(path = %path.display(), "Artifact found locally");
            return ResolvedArtifact {
                url,
                local_path: Some(path),
            };
        }
        tracing::debug!(tried = ?candidates, "Artifact not found locally, downloading");

        let local_path = self.download(&url, &image.filename).await;
        ResolvedArtifact { url, local_path }
    }

    async fn download(&self, url: &str, filename: &str) -> Option<PathBuf> {
        let bytes = match self.api.download(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Artifact download failed");
                return None;
            }
        };

        // Only the final component of a server-supplied name is trusted.
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("download_{}.png", uuid::Uuid::new_v4()).into());
        let target = self.download_dir.join(name);

        if let Err(e) = tokio::fs::create_dir_all(&self.download_dir).await {
            tracing::warn!(dir = %self.download_dir.display(), error = %e, "Cannot create download dir");
            return None;
        }
        match tokio::fs::write(&target, &bytes).await {
            Ok(()) => {
                tracing::info!(path = %target.display(), size = bytes.len(), "Artifact downloaded");
                Some(target)
            }
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "Cannot write downloaded artifact");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(filename: &str, subfolder: &str) -> ImageRef {
        ImageRef {
            filename: filename.into(),
            subfolder: subfolder.into(),
            folder_type: "output".into(),
        }
    }

    #[test]
    fn candidates_follow_lookup_order() {
        let candidates = candidate_paths(
            Path::new("/comfy/output/NESUPixel"),
            "NESUPixel",
            &image("a.png", "NESUPixel\\Txt2Img"),
        );

        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/comfy/output/NESUPixel/NESUPixel/Txt2Img/a.png"),
                PathBuf::from("/comfy/output/NESUPixel/Txt2Img/a.png"),
                PathBuf::from("output/NESUPixel/NESUPixel/Txt2Img/a.png"),
                PathBuf::from("output/NESUPixel/Txt2Img/a.png"),
            ]
        );
    }

    #[test]
    fn candidates_skip_strip_when_subfolder_absent_from_dir() {
        let candidates = candidate_paths(Path::new("/srv/out"), "NESUPixel", &image("a.png", ""));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/srv/out/a.png"),
                PathBuf::from("output/NESUPixel/a.png"),
                PathBuf::from("output/a.png"),
            ]
        );
    }

    #[tokio::test]
    async fn find_local_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("a.png");
        std::fs::create_dir_all(&folder).unwrap();
        let file = dir.path().join("b.png");
        std::fs::write(&file, b"png").unwrap();

        let missing = dir.path().join("c.png");
        assert_eq!(find_local(&[missing.clone(), folder.clone()]).await, None);
        assert_eq!(find_local(&[missing, folder, file.clone()]).await, Some(file));
    }

    #[tokio::test]
    async fn local_file_wins_over_download() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("NESUPixel");
        std::fs::create_dir_all(output_dir.join("Txt2Img")).unwrap();
        std::fs::write(output_dir.join("Txt2Img").join("a.png"), b"png").unwrap();

        let resolver = ArtifactResolver::new(
            ComfyUIApi::new("http://127.0.0.1:9"),
            &output_dir,
            "NESUPixel",
            dir.path().join("downloads"),
        );
        let resolved = resolver.resolve(&image("a.png", "Txt2Img")).await;

        assert_eq!(resolved.local_path, Some(output_dir.join("Txt2Img").join("a.png")));
        assert!(resolved.url.starts_with("http://127.0.0.1:9/view?filename=a.png"));
    }

    #[tokio::test]
    async fn unreachable_download_still_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ArtifactResolver::new(
            ComfyUIApi::new("http://127.0.0.1:9"),
            dir.path().join("missing"),
            "NESUPixel",
            dir.path().join("downloads"),
        );

        let resolved = resolver.resolve(&image("zz_missing_artifact.png", "")).await;
        assert!(resolved.local_path.is_none());
        assert!(resolved.url.contains("filename=zz_missing_artifact.png"));
    }
}
