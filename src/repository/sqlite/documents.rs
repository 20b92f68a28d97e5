use super::{now_text, SqliteStore};
use crate::error::{CrmError, CrmResult};
use crate::model::{
    decode_values, encode_values, CommitBatch, DocumentKey, EnquiryId, PipelineId, StageDocument,
    StageDocuments, StageId,
};
use crate::repository::traits::DocumentRepository;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

/// Whole-map replace on the composite key.
///
/// The version only moves when the stored text changes, which keeps repeated
/// identical writes idempotent.
const UPSERT_SQL: &str = "
    INSERT INTO pipeline_data_json (enquiry_id, pipeline_id, stage_id, data, version, updated_at)
    VALUES (?1, ?2, ?3, ?4, 1, ?5)
    ON CONFLICT (enquiry_id, pipeline_id, stage_id) DO UPDATE SET
        version = CASE WHEN pipeline_data_json.data = excluded.data
                       THEN pipeline_data_json.version
                       ELSE pipeline_data_json.version + 1 END,
        updated_at = CASE WHEN pipeline_data_json.data = excluded.data
                          THEN pipeline_data_json.updated_at
                          ELSE excluded.updated_at END,
        data = excluded.data
    RETURNING version";

fn stored_version(conn: &Connection, key: &DocumentKey) -> CrmResult<i64> {
    let version = conn
        .query_row(
            "SELECT version FROM pipeline_data_json
             WHERE enquiry_id = ?1 AND pipeline_id = ?2 AND stage_id = ?3",
            params![key.enquiry_id, key.pipeline_id, key.stage_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn check_stage_owner(conn: &Connection, key: &DocumentKey) -> CrmResult<()> {
    let owner: Option<PipelineId> = conn
        .query_row(
            "SELECT pipeline_id FROM pipeline_stages WHERE stage_id = ?1",
            params![key.stage_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        Some(pipeline_id) if pipeline_id == key.pipeline_id => Ok(()),
        Some(pipeline_id) => Err(CrmError::InvalidInput(format!(
            "stage {} belongs to pipeline {}, not {}",
            key.stage_id, pipeline_id, key.pipeline_id
        ))),
        None => Err(CrmError::NotFound(format!("stage {}", key.stage_id))),
    }
}

/// Write every entry of `batch` on an open connection or transaction.
///
/// Stops at the first failing entry; the caller's transaction decides whether
/// earlier writes survive.
pub(super) fn upsert_all(conn: &Connection, batch: &CommitBatch) -> CrmResult<Vec<StageDocument>> {
    let updated_at = now_text();
    let mut stored = Vec::with_capacity(batch.entries.len());

    for entry in &batch.entries {
        let key = batch.key_for(entry.stage_id);
        check_stage_owner(conn, &key).map_err(CrmError::into_commit)?;

        if let Some(expected) = entry.expected_version {
            let actual = stored_version(conn, &key)?;
            if actual != expected {
                return Err(CrmError::VersionConflict {
                    stage_id: key.stage_id.get(),
                    expected,
                    actual,
                });
            }
        }

        let data = encode_values(&entry.values)?;
        let version: i64 = conn
            .query_row(
                UPSERT_SQL,
                params![key.enquiry_id, key.pipeline_id, key.stage_id, data, updated_at],
                |row| row.get(0),
            )
            .map_err(|e| CrmError::Commit(format!("stage {}: {}", key.stage_id, e)))?;

        tracing::debug!(stage_id = %key.stage_id, version, "upserted stage document");
        stored.push(StageDocument {
            key,
            values: entry.values.clone(),
            version,
        });
    }

    Ok(stored)
}

fn load_all(
    conn: &Connection,
    enquiry_id: EnquiryId,
    pipeline_id: PipelineId,
) -> CrmResult<StageDocuments> {
    let mut stmt = conn.prepare(
        "SELECT stage_id, data, version FROM pipeline_data_json
         WHERE enquiry_id = ?1 AND pipeline_id = ?2",
    )?;
    let rows = stmt.query_map(params![enquiry_id, pipeline_id], |row| {
        Ok((
            row.get::<_, StageId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut documents = StageDocuments::new();
    for row in rows {
        let (stage_id, data, version) = row?;
        let values = decode_values(&data)?;
        documents.insert(
            stage_id,
            StageDocument {
                key: DocumentKey {
                    enquiry_id,
                    pipeline_id,
                    stage_id,
                },
                values,
                version,
            },
        );
    }
    Ok(documents)
}

#[async_trait]
impl DocumentRepository for SqliteStore {
    async fn load(
        &self,
        enquiry_id: EnquiryId,
        pipeline_id: PipelineId,
    ) -> CrmResult<StageDocuments> {
        let conn = self.conn().await;
        load_all(&conn, enquiry_id, pipeline_id).map_err(CrmError::into_document_load)
    }

    async fn upsert_batch(&self, batch: &CommitBatch) -> CrmResult<Vec<StageDocument>> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let stored = upsert_all(&tx, batch).map_err(CrmError::into_commit)?;
        tx.commit()?;
        Ok(stored)
    }
}
