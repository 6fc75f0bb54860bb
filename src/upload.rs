//! Artifact upload boundary.

use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;

use crate::foundation::error::{DatelapseError, DatelapseResult};

/// Publishes a finished artifact somewhere outside the local output roots.
#[async_trait]
pub trait UploadConnector: Send + Sync {
    /// Upload `local` into `folder` (the connector's root when `None`) and return the remote id.
    async fn upload(
        &self,
        local: &Path,
        folder: Option<&str>,
        share_publicly: bool,
    ) -> DatelapseResult<String>;
}

/// Mirrors artifacts into a directory, e.g. a synced or network-mounted folder.
///
/// The remote id is the artifact's path relative to the root, with `/` separators. Shared
/// artifacts are made world-readable on Unix; private ones are owner-only.
#[derive(Clone, Debug)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, folder: Option<&str>) -> DatelapseResult<(PathBuf, Vec<String>)> {
        let mut dir = self.root.clone();
        let mut segments = Vec::new();
        if let Some(folder) = folder {
            for comp in Path::new(folder).components() {
                match comp {
                    Component::Normal(seg) => {
                        dir.push(seg);
                        segments.push(seg.to_string_lossy().into_owned());
                    }
                    Component::CurDir => {}
                    _ => {
                        return Err(DatelapseError::config(format!(
                            "upload folder '{folder}' must be a relative path inside the upload root"
                        )));
                    }
                }
            }
        }
        Ok((dir, segments))
    }
}

#[async_trait]
impl UploadConnector for DirectoryUploader {
    #[tracing::instrument(skip(self), fields(root = %self.root.display()))]
    async fn upload(
        &self,
        local: &Path,
        folder: Option<&str>,
        share_publicly: bool,
    ) -> DatelapseResult<String> {
        let name = local.file_name().ok_or_else(|| {
            DatelapseError::config(format!("'{}' has no file name", local.display()))
        })?;
        let (dir, mut segments) = self.target_dir(folder)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create upload folder '{}'", dir.display()))?;

        let dest = dir.join(name);
        let partial = dir.join(format!(".{}.part", name.to_string_lossy()));
        tokio::fs::copy(local, &partial)
            .await
            .with_context(|| format!("copy '{}' to '{}'", local.display(), partial.display()))?;
        set_shared(&partial, share_publicly).await?;
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(anyhow::Error::new(e)
                .context(format!("publish '{}'", dest.display()))
                .into());
        }

        segments.push(name.to_string_lossy().into_owned());
        let id = segments.join("/");
        tracing::info!(id = %id, shared = share_publicly, "uploaded artifact");
        Ok(id)
    }
}

#[cfg(unix)]
async fn set_shared(path: &Path, shared: bool) -> DatelapseResult<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let mode = if shared { 0o644 } else { 0o600 };
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("set permissions on '{}'", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_shared(_path: &Path, _shared: bool) -> DatelapseResult<()> {
    Ok(())
}

#[cfg(test)]
#[path = "../tests/unit/upload.rs"]
mod tests;
