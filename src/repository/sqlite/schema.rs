use crate::error::CrmResult;
use rusqlite::Connection;

/// Tables backing the engine.
///
/// `enquiries` stands in for the CRM's own table; only the two pipeline
/// pointer columns are read or written here.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pipelines (
    pipeline_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_name TEXT NOT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_stages (
    stage_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines(pipeline_id) ON DELETE CASCADE,
    stage_name  TEXT NOT NULL,
    rank        INTEGER NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pipeline_stages_order
    ON pipeline_stages(pipeline_id, rank, stage_id);

CREATE TABLE IF NOT EXISTS pipeline_fields (
    field_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    stage_id   INTEGER NOT NULL REFERENCES pipeline_stages(stage_id) ON DELETE CASCADE,
    field_name TEXT NOT NULL,
    field_type TEXT NOT NULL CHECK (field_type IN ('text', 'checkbox', 'file')),
    rank       INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pipeline_fields_order
    ON pipeline_fields(stage_id, rank, field_id);

CREATE TABLE IF NOT EXISTS enquiries (
    id               INTEGER PRIMARY KEY,
    pipeline_id      INTEGER REFERENCES pipelines(pipeline_id) ON DELETE SET NULL,
    current_stage_id INTEGER REFERENCES pipeline_stages(stage_id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS pipeline_data_json (
    enquiry_id  INTEGER NOT NULL,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines(pipeline_id) ON DELETE CASCADE,
    stage_id    INTEGER NOT NULL REFERENCES pipeline_stages(stage_id) ON DELETE CASCADE,
    data        TEXT NOT NULL,
    version     INTEGER NOT NULL DEFAULT 1,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (enquiry_id, pipeline_id, stage_id)
);

CREATE TABLE IF NOT EXISTS uploaded_files (
    file_path   TEXT PRIMARY KEY,
    file_name   TEXT NOT NULL,
    file_size   INTEGER NOT NULL,
    file_type   TEXT NOT NULL,
    uploaded_by TEXT,
    uploaded_at TEXT NOT NULL
);
"#;

pub(super) fn migrate(conn: &Connection) -> CrmResult<()> {
    // Cascades depend on this; SQLite defaults it off per connection.
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
