//! Blob store backends
//!
//! The engine only ever hands a blob store flat, generated names; anything
//! that would resolve outside the store root is rejected.

use crate::error::{CrmError, CrmResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Opaque byte storage addressed by path
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under a new path. Existing paths are never overwritten.
    async fn upload(&self, path: &str, bytes: &[u8]) -> CrmResult<()>;

    async fn download(&self, path: &str) -> CrmResult<Vec<u8>>;

    /// Remove a blob; removing a missing blob is not an error
    async fn delete(&self, path: &str) -> CrmResult<()>;
}

fn validate_path(path: &str) -> CrmResult<&Path> {
    let candidate = Path::new(path);
    let mut components = candidate.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(candidate),
        _ => Err(CrmError::InvalidPath(path.to_string())),
    }
}

/// Blob store rooted at a local directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> CrmResult<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }
}

/// Write a freshly created blob, deleting it again if the write fails
async fn write_or_remove<W>(mut writer: W, target: &Path, bytes: &[u8]) -> CrmResult<()>
where
    W: AsyncWrite + Unpin,
{
    let written = match writer.write_all(bytes).await {
        Ok(()) => writer.flush().await,
        Err(e) => Err(e),
    };
    drop(writer);
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(target).await {
            tracing::warn!(path = %target.display(), error = %cleanup, "could not remove partial blob");
        }
        return Err(CrmError::FileTransfer(format!(
            "cannot write {}: {}",
            target.display(),
            e
        )));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> CrmResult<()> {
        let target = self.resolve(path)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| CrmError::FileTransfer(format!("cannot create {}: {}", path, e)))?;
        write_or_remove(file, &target, bytes).await
    }

    async fn download(&self, path: &str) -> CrmResult<Vec<u8>> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| CrmError::FileTransfer(format!("cannot read {}: {}", path, e)))
    }

    async fn delete(&self, path: &str) -> CrmResult<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Blob store kept in process memory
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_transfers: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload and download fail until switched off
    pub fn fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs
            .lock()
            .map(|blobs| blobs.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> CrmResult<()> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(CrmError::FileTransfer("blob store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> CrmResult<()> {
        self.check_available()?;
        validate_path(path)?;
        let mut blobs = self.blobs.lock()?;
        if blobs.contains_key(path) {
            return Err(CrmError::FileTransfer(format!("{} already exists", path)));
        }
        blobs.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn download(&self, path: &str) -> CrmResult<Vec<u8>> {
        self.check_available()?;
        self.blobs
            .lock()?
            .get(path)
            .cloned()
            .ok_or_else(|| CrmError::FileTransfer(format!("{} not found", path)))
    }

    async fn delete(&self, path: &str) -> CrmResult<()> {
        self.blobs.lock()?.remove(path);
        Ok(())
    }
}
