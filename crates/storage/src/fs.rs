use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::traits::ArtifactStore;
use crate::{StoreError, StoreResult};

const URL_SCHEME: &str = "file://";

/// Artifact store rooted at a local directory. Keys are relative paths such as
/// `reports/<job_id>/analyzer-output.json`; URLs are `file://` absolute paths.
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = std::fs::canonicalize(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_key(&self, key: &str) -> StoreResult<PathBuf> {
        let rel = Path::new(key);
        let plain = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !plain {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn resolve_url(&self, url: &str) -> StoreResult<PathBuf> {
        let raw = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| StoreError::InvalidKey(url.to_string()))?;
        let key = Path::new(raw)
            .strip_prefix(&self.root)
            .map_err(|_| StoreError::InvalidKey(url.to_string()))?;
        self.resolve_key(&key.to_string_lossy())
    }

    fn url_for(path: &Path) -> String {
        format!("{URL_SCHEME}{}", path.display())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put_blob(&self, path: &str, bytes: Vec<u8>) -> StoreResult<String> {
        let dest = self.resolve_key(path)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so readers never see a torn blob.
        let mut partial = dest.clone().into_os_string();
        partial.push(".partial");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &dest).await?;
        Ok(Self::url_for(&dest))
    }

    async fn get_blob(&self, url: &str) -> StoreResult<Vec<u8>> {
        let path = self.resolve_url(url)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found("blob", url))
            }
            Err(e) => Err(e.into()),
        }
    }
}
