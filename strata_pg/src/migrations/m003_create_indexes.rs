//! Migration 003: Index the columns used by the incident filters and the
//! upload listing.

use strata_core::MigrationDefinition;

/// Creates the lookup indexes on `incidents` and `uploads`.
pub const CREATE_INDEXES: MigrationDefinition = MigrationDefinition::new(
    3,
    "create_indexes",
    r#"
    CREATE INDEX IF NOT EXISTS idx_incidents_upload_id ON incidents(upload_id);
    CREATE INDEX IF NOT EXISTS idx_incidents_report_date ON incidents(report_date);
    CREATE INDEX IF NOT EXISTS idx_incidents_priority ON incidents(priority);
    CREATE INDEX IF NOT EXISTS idx_incidents_application ON incidents(application_name);
    CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status);
    CREATE INDEX IF NOT EXISTS idx_incidents_resolution_group ON incidents(resolution_group);
    CREATE INDEX IF NOT EXISTS idx_incidents_sentiment_label ON incidents(sentiment_label);
    CREATE INDEX IF NOT EXISTS idx_incidents_it_process_group ON incidents(it_process_group);
    CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status);
    CREATE INDEX IF NOT EXISTS idx_uploads_created_at ON uploads(created_at);
    "#,
    r#"
    DROP INDEX IF EXISTS idx_uploads_created_at;
    DROP INDEX IF EXISTS idx_uploads_status;
    DROP INDEX IF EXISTS idx_incidents_it_process_group;
    DROP INDEX IF EXISTS idx_incidents_sentiment_label;
    DROP INDEX IF EXISTS idx_incidents_resolution_group;
    DROP INDEX IF EXISTS idx_incidents_status;
    DROP INDEX IF EXISTS idx_incidents_application;
    DROP INDEX IF EXISTS idx_incidents_priority;
    DROP INDEX IF EXISTS idx_incidents_report_date;
    DROP INDEX IF EXISTS idx_incidents_upload_id;
    "#,
)
.with_objects(&[
    "idx_incidents_upload_id",
    "idx_incidents_report_date",
    "idx_incidents_priority",
    "idx_incidents_application",
    "idx_incidents_status",
    "idx_incidents_resolution_group",
    "idx_incidents_sentiment_label",
    "idx_incidents_it_process_group",
    "idx_uploads_status",
    "idx_uploads_created_at",
]);
