//! Migration 001: Create the uploads table.
//!
//! One row per spreadsheet upload. Incidents reference it by `upload_id`.

use strata_core::MigrationDefinition;

/// Creates the uploads table.
pub const CREATE_UPLOADS_TABLE: MigrationDefinition = MigrationDefinition::new(
    1,
    "create_uploads_table",
    r#"
    CREATE TABLE IF NOT EXISTS uploads (
        id VARCHAR PRIMARY KEY,
        filename VARCHAR NOT NULL,
        original_filename VARCHAR NOT NULL,
        status VARCHAR NOT NULL CHECK (status IN ('uploaded', 'processing', 'completed', 'failed')),
        record_count INTEGER DEFAULT 0,
        processed_count INTEGER DEFAULT 0,
        error_count INTEGER DEFAULT 0,
        errors TEXT[],
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        processed_at TIMESTAMP
    )
    "#,
    "DROP TABLE IF EXISTS uploads",
)
.with_objects(&["uploads"]);
