//! File reference resolution
//!
//! File-typed fields store nothing but an opaque path. This module owns how
//! those paths are minted, how bytes reach the blob store, and how they come
//! back for download or preview.

pub mod blob;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};

use crate::error::{CrmError, CrmResult};
use crate::model::UploadedFile;
use crate::repository::UploadLog;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Bytes fetched for a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    /// Name to offer the user when saving
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Bytes fetched for an in-app preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePreview {
    pub content_type: String,
    /// Only images can be previewed inline
    pub previewable: bool,
    pub bytes: Vec<u8>,
}

/// Guess a MIME type from a file name's extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Reduce a user-supplied name to a safe single path segment
fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Mint a blob path that is never reused: time prefix, random token, name
pub fn unique_path(file_name: &str) -> String {
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        sanitize_file_name(file_name)
    )
}

/// Uploads, downloads, and previews the files behind file-typed fields
#[derive(Clone)]
pub struct FileReferenceResolver {
    blobs: Arc<dyn BlobStore>,
    log: Arc<dyn UploadLog>,
}

impl FileReferenceResolver {
    pub fn new(blobs: Arc<dyn BlobStore>, log: Arc<dyn UploadLog>) -> Self {
        Self { blobs, log }
    }

    /// Upload a selected file and record it in the upload log.
    ///
    /// If the log write fails the blob is removed again, so a returned error
    /// never leaves an unrecorded blob behind.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        uploaded_by: Option<&str>,
    ) -> CrmResult<UploadedFile> {
        let file_path = unique_path(file_name);
        self.blobs
            .upload(&file_path, bytes)
            .await
            .map_err(CrmError::into_file_transfer)?;

        let record = UploadedFile {
            file_name: file_name.to_string(),
            file_path: file_path.clone(),
            file_size: bytes.len() as u64,
            content_type: content_type_for(file_name).to_string(),
            uploaded_by: uploaded_by.map(str::to_string),
            uploaded_at: Utc::now(),
        };

        if let Err(e) = self.log.record_upload(&record).await {
            tracing::warn!(path = %file_path, error = %e, "upload log write failed, removing blob");
            if let Err(cleanup) = self.blobs.delete(&file_path).await {
                tracing::warn!(path = %file_path, error = %cleanup, "could not remove unrecorded blob");
            }
            return Err(e.into_file_transfer());
        }

        tracing::info!(path = %file_path, size = record.file_size, "uploaded file");
        Ok(record)
    }

    /// Fetch a file for saving
    pub async fn download(&self, file_path: &str) -> CrmResult<FileDownload> {
        let bytes = self
            .blobs
            .download(file_path)
            .await
            .map_err(CrmError::into_file_transfer)?;
        let (file_name, content_type) = match self.log.find_upload(file_path).await {
            Ok(Some(record)) => (record.file_name, record.content_type),
            _ => {
                let name = file_path.rsplit('/').next().unwrap_or(file_path).to_string();
                let content_type = content_type_for(&name).to_string();
                (name, content_type)
            }
        };
        Ok(FileDownload {
            file_name,
            content_type,
            bytes,
        })
    }

    /// Fetch a file for inline display
    pub async fn preview(&self, file_path: &str) -> CrmResult<FilePreview> {
        let download = self.download(file_path).await?;
        let previewable = download.content_type.starts_with("image/");
        Ok(FilePreview {
            content_type: download.content_type,
            previewable,
            bytes: download.bytes,
        })
    }

    /// Remove a blob that never made it into a committed document
    pub async fn discard(&self, file_path: &str) -> CrmResult<()> {
        self.blobs
            .delete(file_path)
            .await
            .map_err(CrmError::into_file_transfer)?;
        self.log.forget_upload(file_path).await?;
        tracing::debug!(path = %file_path, "discarded uncommitted upload");
        Ok(())
    }
}
