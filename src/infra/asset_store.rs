use crate::pipeline::ingestion::Fetcher;
use async_trait::async_trait;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "avif"];

/// Image bookkeeping for catalog records. Best effort: failures yield `None`.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store the image at `url` under `key`, returning its local path.
    async fn download_image(&self, url: &str, key: &str) -> Option<PathBuf>;
    /// Remote size in KB, when the server reports it.
    async fn head_size_kb(&self, url: &str) -> Option<u32>;
}

/// Stores images as files under one directory, fetched through the shared fetcher.
pub struct FsAssetStore {
    fetcher: Arc<Fetcher>,
    dir: PathBuf,
}

impl FsAssetStore {
    pub fn new(fetcher: Arc<Fetcher>, dir: impl Into<PathBuf>) -> Self {
        Self { fetcher, dir: dir.into() }
    }

    /// Local path for `key`, keeping the remote file extension when it is an image type.
    pub fn path_for(&self, url: &str, key: &str) -> PathBuf {
        let ext = Url::parse(url)
            .ok()
            .and_then(|u| {
                Path::new(u.path())
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
            })
            .filter(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
            .unwrap_or_else(|| "jpg".to_string());
        self.dir.join(format!("{key}.{ext}"))
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn download_image(&self, url: &str, key: &str) -> Option<PathBuf> {
        let path = self.path_for(url, key);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Image already stored");
            return Some(path);
        }

        let bytes = match self.fetcher.get_bytes(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url, error = %e, "Image download failed");
                return None;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Cannot create image directory");
            return None;
        }
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot write image");
                None
            }
        }
    }

    async fn head_size_kb(&self, url: &str) -> Option<u32> {
        match self.fetcher.head_size_kb(url).await {
            Ok(size) => size,
            Err(e) => {
                debug!(url, error = %e, "Image HEAD failed");
                None
            }
        }
    }
}
