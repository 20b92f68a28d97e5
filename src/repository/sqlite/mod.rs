//! SQLite-backed implementation of every relational repository
//!
//! One connection is shared behind an async mutex, so statements from
//! concurrent sessions are serialized. Multi-row writes run inside a single
//! transaction and roll back as a unit.

mod catalog;
mod documents;
mod schema;

use super::traits::{EnquiryRepository, SessionStore, UploadLog};
use crate::error::{CrmError, CrmResult};
use crate::model::{CommitBatch, EnquiryId, EnquiryPointer, StageDocument, UploadedFile};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};

/// SQLite store for schema, documents, enquiry pointers, and the upload log
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> CrmResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened pipeline database");
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> CrmResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> CrmResult<Self> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Make sure an enquiry row exists so its pointer can be written.
    ///
    /// The surrounding CRM owns enquiry records; this exists for hosts that
    /// keep them in the same database and for tests.
    pub async fn register_enquiry(&self, enquiry_id: EnquiryId) -> CrmResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT OR IGNORE INTO enquiries (id) VALUES (?1)",
            params![enquiry_id],
        )?;
        Ok(())
    }
}

fn now_text() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn write_pointer(conn: &Connection, pointer: &EnquiryPointer) -> CrmResult<()> {
    let updated = conn.execute(
        "UPDATE enquiries SET pipeline_id = ?1, current_stage_id = ?2 WHERE id = ?3",
        params![pointer.pipeline_id, pointer.current_stage_id, pointer.enquiry_id],
    )?;
    if updated == 0 {
        return Err(CrmError::NotFound(format!("enquiry {}", pointer.enquiry_id)));
    }
    Ok(())
}

#[async_trait]
impl EnquiryRepository for SqliteStore {
    async fn get_pointer(&self, enquiry_id: EnquiryId) -> CrmResult<EnquiryPointer> {
        let conn = self.conn().await;
        conn.query_row(
            "SELECT pipeline_id, current_stage_id FROM enquiries WHERE id = ?1",
            params![enquiry_id],
            |row| {
                Ok(EnquiryPointer {
                    enquiry_id,
                    pipeline_id: row.get(0)?,
                    current_stage_id: row.get(1)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| CrmError::NotFound(format!("enquiry {}", enquiry_id)))
    }

    async fn set_pointer(&self, pointer: &EnquiryPointer) -> CrmResult<()> {
        let conn = self.conn().await;
        write_pointer(&conn, pointer)
    }
}

#[async_trait]
impl UploadLog for SqliteStore {
    async fn record_upload(&self, file: &UploadedFile) -> CrmResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO uploaded_files
                (file_path, file_name, file_size, file_type, uploaded_by, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.file_path,
                file.file_name,
                file.file_size as i64,
                file.content_type,
                file.uploaded_by,
                file.uploaded_at,
            ],
        )?;
        Ok(())
    }

    async fn find_upload(&self, file_path: &str) -> CrmResult<Option<UploadedFile>> {
        let conn = self.conn().await;
        let found = conn
            .query_row(
                "SELECT file_path, file_name, file_size, file_type, uploaded_by, uploaded_at
                 FROM uploaded_files WHERE file_path = ?1",
                params![file_path],
                |row| {
                    let size: i64 = row.get(2)?;
                    Ok(UploadedFile {
                        file_path: row.get(0)?,
                        file_name: row.get(1)?,
                        file_size: size.max(0) as u64,
                        content_type: row.get(3)?,
                        uploaded_by: row.get(4)?,
                        uploaded_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    async fn forget_upload(&self, file_path: &str) -> CrmResult<()> {
        let conn = self.conn().await;
        conn.execute(
            "DELETE FROM uploaded_files WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    /// Documents and pointer share one transaction, so a failed pointer
    /// update also discards the document writes.
    async fn commit_session(
        &self,
        batch: &CommitBatch,
        pointer: &EnquiryPointer,
    ) -> CrmResult<Vec<StageDocument>> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let stored = documents::upsert_all(&tx, batch)?;
        write_pointer(&tx, pointer)?;
        tx.commit()?;
        tracing::info!(
            enquiry_id = %batch.enquiry_id,
            pipeline_id = %batch.pipeline_id,
            stages = stored.len(),
            "committed pipeline session"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PipelineId, StageId};
    use crate::repository::traits::{DocumentRepository, SchemaAdmin};

    #[tokio::test]
    async fn test_pointer_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let pipeline = store.create_pipeline("Sales").await.unwrap();
        let stage = store.create_stage(pipeline.id, "Lead").await.unwrap();
        store.register_enquiry(EnquiryId(7)).await.unwrap();

        let initial = store.get_pointer(EnquiryId(7)).await.unwrap();
        assert_eq!(initial, EnquiryPointer::unassigned(EnquiryId(7)));

        let pointer = EnquiryPointer {
            enquiry_id: EnquiryId(7),
            pipeline_id: Some(pipeline.id),
            current_stage_id: Some(stage.id),
        };
        store.set_pointer(&pointer).await.unwrap();
        assert_eq!(store.get_pointer(EnquiryId(7)).await.unwrap(), pointer);
    }

    #[tokio::test]
    async fn test_unknown_enquiry_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.get_pointer(EnquiryId(1)).await,
            Err(CrmError::NotFound(_))
        ));
        let pointer = EnquiryPointer {
            enquiry_id: EnquiryId(1),
            pipeline_id: Some(PipelineId(1)),
            current_stage_id: Some(StageId(1)),
        };
        assert!(store.set_pointer(&pointer).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_pointer_write_rolls_back_documents() {
        let store = SqliteStore::in_memory().unwrap();
        let pipeline = store.create_pipeline("Sales").await.unwrap();
        let stage = store.create_stage(pipeline.id, "Lead").await.unwrap();

        // Enquiry 9 was never registered, so the pointer update finds no row
        let mut batch = CommitBatch::new(EnquiryId(9), pipeline.id);
        batch.push(stage.id, Default::default(), None);
        let pointer = EnquiryPointer {
            enquiry_id: EnquiryId(9),
            pipeline_id: Some(pipeline.id),
            current_stage_id: Some(stage.id),
        };

        assert!(matches!(
            store.commit_session(&batch, &pointer).await,
            Err(CrmError::NotFound(_))
        ));
        assert!(store
            .load(EnquiryId(9), pipeline.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_upload_log() {
        let store = SqliteStore::in_memory().unwrap();
        let file = UploadedFile {
            file_name: "quote.pdf".into(),
            file_path: "1700000000000-abc-quote.pdf".into(),
            file_size: 12,
            content_type: "application/pdf".into(),
            uploaded_by: Some("user-1".into()),
            uploaded_at: chrono::Utc::now(),
        };
        store.record_upload(&file).await.unwrap();

        let found = store.find_upload(&file.file_path).await.unwrap().unwrap();
        assert_eq!(found.file_name, "quote.pdf");
        assert_eq!(found.file_size, 12);

        // Paths are never reused
        assert!(store.record_upload(&file).await.is_err());

        store.forget_upload(&file.file_path).await.unwrap();
        assert!(store.find_upload(&file.file_path).await.unwrap().is_none());
    }
}
