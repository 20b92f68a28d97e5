use super::{now_text, SqliteStore};
use crate::error::{CrmError, CrmResult};
use crate::model::schema::normalize_name;
use crate::model::{Field, FieldId, FieldType, Pipeline, PipelineId, Stage, StageId};
use crate::repository::traits::{SchemaAdmin, SchemaRepository};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

fn pipeline_from_row(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn stage_from_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        name: row.get(2)?,
        rank: row.get(3)?,
    })
}

fn field_from_row(row: &Row<'_>) -> rusqlite::Result<Field> {
    let raw_type: String = row.get(3)?;
    let field_type = raw_type.parse::<FieldType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Field {
        id: row.get(0)?,
        stage_id: row.get(1)?,
        name: row.get(2)?,
        field_type,
        rank: row.get(4)?,
    })
}

const STAGE_COLUMNS: &str = "stage_id, pipeline_id, stage_name, rank";
const FIELD_COLUMNS: &str = "field_id, stage_id, field_name, field_type, rank";

fn get_pipeline(conn: &Connection, id: PipelineId) -> CrmResult<Pipeline> {
    conn.query_row(
        "SELECT pipeline_id, pipeline_name FROM pipelines WHERE pipeline_id = ?1",
        params![id],
        pipeline_from_row,
    )
    .optional()?
    .ok_or_else(|| CrmError::NotFound(format!("pipeline {}", id)))
}

fn get_stage(conn: &Connection, id: StageId) -> CrmResult<Stage> {
    conn.query_row(
        &format!("SELECT {} FROM pipeline_stages WHERE stage_id = ?1", STAGE_COLUMNS),
        params![id],
        stage_from_row,
    )
    .optional()?
    .ok_or_else(|| CrmError::NotFound(format!("stage {}", id)))
}

fn get_field(conn: &Connection, id: FieldId) -> CrmResult<Field> {
    conn.query_row(
        &format!("SELECT {} FROM pipeline_fields WHERE field_id = ?1", FIELD_COLUMNS),
        params![id],
        field_from_row,
    )
    .optional()?
    .ok_or_else(|| CrmError::NotFound(format!("field {}", id)))
}

fn stages_of(conn: &Connection, pipeline_id: PipelineId) -> CrmResult<Vec<Stage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pipeline_stages WHERE pipeline_id = ?1 ORDER BY rank ASC, stage_id ASC",
        STAGE_COLUMNS
    ))?;
    let rows = stmt.query_map(params![pipeline_id], stage_from_row)?;
    let stages = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(stages)
}

fn delete_checked(conn: &Connection, sql: &str, id: i64, what: &str) -> CrmResult<()> {
    let deleted = conn.execute(sql, params![id])?;
    if deleted == 0 {
        return Err(CrmError::NotFound(format!("{} {}", what, id)));
    }
    Ok(())
}

#[async_trait]
impl SchemaRepository for SqliteStore {
    async fn list_pipelines(&self) -> CrmResult<Vec<Pipeline>> {
        let conn = self.conn().await;
        let mut stmt = conn
            .prepare("SELECT pipeline_id, pipeline_name FROM pipelines ORDER BY pipeline_id ASC")
            .map_err(|e| CrmError::SchemaFetch(e.to_string()))?;
        let rows = stmt
            .query_map([], pipeline_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CrmError::SchemaFetch(e.to_string()))?;
        Ok(rows)
    }

    async fn list_stages(&self, pipeline_id: PipelineId) -> CrmResult<Vec<Stage>> {
        let conn = self.conn().await;
        stages_of(&conn, pipeline_id).map_err(CrmError::into_schema_fetch)
    }

    async fn list_fields(&self, stage_id: StageId) -> CrmResult<Vec<Field>> {
        let conn = self.conn().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM pipeline_fields WHERE stage_id = ?1 ORDER BY rank ASC, field_id ASC",
                FIELD_COLUMNS
            ))
            .map_err(|e| CrmError::SchemaFetch(e.to_string()))?;
        let rows = stmt
            .query_map(params![stage_id], field_from_row)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| CrmError::SchemaFetch(e.to_string()))?;
        Ok(rows)
    }
}

#[async_trait]
impl SchemaAdmin for SqliteStore {
    async fn create_pipeline(&self, name: &str) -> CrmResult<Pipeline> {
        let name = normalize_name(name, "pipeline")?;
        let conn = self.conn().await;
        conn.execute(
            "INSERT INTO pipelines (pipeline_name, created_at) VALUES (?1, ?2)",
            params![name, now_text()],
        )?;
        let id = PipelineId(conn.last_insert_rowid());
        tracing::info!(pipeline_id = %id, name = %name, "created pipeline");
        Ok(Pipeline { id, name })
    }

    async fn rename_pipeline(&self, id: PipelineId, name: &str) -> CrmResult<Pipeline> {
        let name = normalize_name(name, "pipeline")?;
        let conn = self.conn().await;
        conn.execute(
            "UPDATE pipelines SET pipeline_name = ?1 WHERE pipeline_id = ?2",
            params![name, id],
        )?;
        get_pipeline(&conn, id)
    }

    async fn delete_pipeline(&self, id: PipelineId) -> CrmResult<()> {
        let conn = self.conn().await;
        delete_checked(
            &conn,
            "DELETE FROM pipelines WHERE pipeline_id = ?1",
            id.get(),
            "pipeline",
        )?;
        tracing::info!(pipeline_id = %id, "deleted pipeline with its stages, fields, and documents");
        Ok(())
    }

    async fn create_stage(&self, pipeline_id: PipelineId, name: &str) -> CrmResult<Stage> {
        let name = normalize_name(name, "stage")?;
        let conn = self.conn().await;
        get_pipeline(&conn, pipeline_id)?;
        let rank: i64 = conn.query_row(
            "SELECT COALESCE(MAX(rank), -1) + 1 FROM pipeline_stages WHERE pipeline_id = ?1",
            params![pipeline_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO pipeline_stages (pipeline_id, stage_name, rank, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![pipeline_id, name, rank, now_text()],
        )?;
        let id = StageId(conn.last_insert_rowid());
        tracing::info!(stage_id = %id, pipeline_id = %pipeline_id, rank, "created stage");
        Ok(Stage {
            id,
            pipeline_id,
            name,
            rank,
        })
    }

    async fn rename_stage(&self, id: StageId, name: &str) -> CrmResult<Stage> {
        let name = normalize_name(name, "stage")?;
        let conn = self.conn().await;
        conn.execute(
            "UPDATE pipeline_stages SET stage_name = ?1 WHERE stage_id = ?2",
            params![name, id],
        )?;
        get_stage(&conn, id)
    }

    async fn delete_stage(&self, id: StageId) -> CrmResult<()> {
        let conn = self.conn().await;
        delete_checked(
            &conn,
            "DELETE FROM pipeline_stages WHERE stage_id = ?1",
            id.get(),
            "stage",
        )?;
        tracing::info!(stage_id = %id, "deleted stage with its fields and documents");
        Ok(())
    }

    async fn reorder_stages(
        &self,
        pipeline_id: PipelineId,
        order: &[StageId],
    ) -> CrmResult<Vec<Stage>> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        get_pipeline(&tx, pipeline_id)?;

        let existing: HashSet<StageId> = stages_of(&tx, pipeline_id)?.iter().map(|s| s.id).collect();
        let requested: HashSet<StageId> = order.iter().copied().collect();
        if requested.len() != order.len() || requested != existing {
            return Err(CrmError::InvalidInput(format!(
                "new order must list each of the {} stages of pipeline {} exactly once",
                existing.len(),
                pipeline_id
            )));
        }

        for (rank, stage_id) in order.iter().enumerate() {
            tx.execute(
                "UPDATE pipeline_stages SET rank = ?1 WHERE stage_id = ?2",
                params![rank as i64, stage_id],
            )?;
        }
        let stages = stages_of(&tx, pipeline_id)?;
        tx.commit()?;
        Ok(stages)
    }

    async fn create_field(
        &self,
        stage_id: StageId,
        name: &str,
        field_type: FieldType,
    ) -> CrmResult<Field> {
        let name = normalize_name(name, "field")?;
        let conn = self.conn().await;
        get_stage(&conn, stage_id)?;
        let rank: i64 = conn.query_row(
            "SELECT COALESCE(MAX(rank), -1) + 1 FROM pipeline_fields WHERE stage_id = ?1",
            params![stage_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO pipeline_fields (stage_id, field_name, field_type, rank, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![stage_id, name, field_type.as_str(), rank, now_text()],
        )?;
        let id = FieldId(conn.last_insert_rowid());
        tracing::info!(field_id = %id, stage_id = %stage_id, field_type = %field_type, "created field");
        Ok(Field {
            id,
            stage_id,
            name,
            field_type,
            rank,
        })
    }

    async fn update_field(
        &self,
        id: FieldId,
        name: &str,
        field_type: FieldType,
    ) -> CrmResult<Field> {
        let name = normalize_name(name, "field")?;
        let conn = self.conn().await;
        conn.execute(
            "UPDATE pipeline_fields SET field_name = ?1, field_type = ?2 WHERE field_id = ?3",
            params![name, field_type.as_str(), id],
        )?;
        get_field(&conn, id)
    }

    async fn delete_field(&self, id: FieldId) -> CrmResult<()> {
        let conn = self.conn().await;
        delete_checked(
            &conn,
            "DELETE FROM pipeline_fields WHERE field_id = ?1",
            id.get(),
            "field",
        )
    }
}
