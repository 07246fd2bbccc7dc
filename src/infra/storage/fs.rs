//! Filesystem-backed derivative storage.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::application::ports::{
    Derivative, DerivativeAddress, Probe, StorageBackend, StorageError,
};
use crate::domain::source::SourceUrl;

pub const SCHEME: &str = "fs";

/// Stores each derivative under
/// `<root>/<preset>/<h0h1>/<h2h3>/<sha256(url)>[.<ext>]`.
///
/// Writes land in a sibling temp file that is renamed over the final path, so
/// a reader never observes a partially written derivative and re-storing the
/// same derivative simply replaces it.
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
    public_base_url: String,
}

impl FsBackend {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Result<Self, std::io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            root,
            public_base_url,
        })
    }

    /// Path of a derivative relative to the storage root, `/`-separated.
    pub fn relative_path(&self, preset: &str, source: &SourceUrl) -> String {
        let digest = hex::encode(Sha256::digest(source.as_str().as_bytes()));
        let extension = source
            .extension()
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        format!(
            "{preset}/{}/{}/{digest}{extension}",
            &digest[..2],
            &digest[2..4]
        )
    }

    /// Read a stored derivative by its root-relative path.
    pub async fn read(&self, relative: &str) -> Result<Bytes, StorageError> {
        let absolute = self.resolve(relative)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Resolve a root-relative path, rejecting anything that could escape the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(relative);
        if relative.as_os_str().is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }

    async fn write_atomically(
        &self,
        target: &Path,
        derivative: Derivative,
    ) -> Result<(), StorageError> {
        let parent = target.parent().ok_or(StorageError::InvalidPath)?;
        fs::create_dir_all(parent).await?;

        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(StorageError::InvalidPath)?;
        let temp = parent.join(format!(".{file_name}.{}.part", Uuid::new_v4()));

        if let Err(err) = write_stream(&temp, derivative).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&temp, target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }
}

async fn write_stream(path: &Path, derivative: Derivative) -> Result<(), StorageError> {
    let Derivative {
        mut content, size, ..
    } = derivative;

    let mut file = fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = content.next().await {
        let chunk = chunk.map_err(|err| StorageError::Stream(err.to_string()))?;
        if chunk.is_empty() {
            continue;
        }
        written = written.saturating_add(chunk.len() as u64);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    if written != size {
        return Err(StorageError::SizeMismatch {
            declared: size,
            actual: written,
        });
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for FsBackend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn locate(&self, preset: &str, source: &SourceUrl) -> DerivativeAddress {
        let relative = self.relative_path(preset, source);
        DerivativeAddress {
            path: self.root.join(&relative).to_string_lossy().into_owned(),
            url: format!("{}/{relative}", self.public_base_url),
        }
    }

    async fn exists(&self, preset: &str, source: &SourceUrl) -> Result<Probe, StorageError> {
        let address = self.locate(preset, source);
        match fs::metadata(&address.path).await {
            Ok(metadata) => Ok(Probe {
                present: metadata.is_file(),
                address,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Probe {
                present: false,
                address,
            }),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    async fn store(
        &self,
        preset: &str,
        source: &SourceUrl,
        derivative: Derivative,
    ) -> Result<DerivativeAddress, StorageError> {
        let address = self.locate(preset, source);
        self.write_atomically(Path::new(&address.path), derivative)
            .await?;
        Ok(address)
    }

    /// Remove the stored derivative. Missing files are treated as success.
    async fn remove(&self, preset: &str, source: &SourceUrl) -> Result<(), StorageError> {
        let address = self.locate(preset, source);
        match fs::remove_file(&address.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}
