//! Migration 002: Create the incidents table.

use strata_core::MigrationDefinition;

/// Creates the incidents table, including the columns filled in by the
/// sentiment and automation analysis.
pub const CREATE_INCIDENTS_TABLE: MigrationDefinition = MigrationDefinition::new(
    2,
    "create_incidents_table",
    r#"
    CREATE TABLE IF NOT EXISTS incidents (
        id VARCHAR PRIMARY KEY,
        upload_id VARCHAR NOT NULL,
        incident_id VARCHAR NOT NULL,
        report_date DATE NOT NULL,
        resolve_date DATE,
        last_resolve_date DATE,
        brief_description TEXT NOT NULL,
        description TEXT,
        application_name VARCHAR NOT NULL,
        resolution_group VARCHAR NOT NULL,
        resolved_person VARCHAR NOT NULL,
        priority VARCHAR NOT NULL CHECK (priority IN ('P1', 'P2', 'P3', 'P4')),

        -- Optional source columns
        category VARCHAR,
        subcategory VARCHAR,
        impact VARCHAR,
        urgency VARCHAR,
        status VARCHAR,
        customer_affected VARCHAR,
        business_service VARCHAR,
        root_cause TEXT,
        resolution_notes TEXT,

        -- Filled in by processing
        sentiment_score FLOAT,
        sentiment_label VARCHAR CHECK (sentiment_label IN ('positive', 'negative', 'neutral')),
        resolution_time_hours INTEGER,
        automation_score FLOAT,
        automation_feasible BOOLEAN,
        it_process_group VARCHAR,

        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,

        CONSTRAINT valid_dates CHECK (resolve_date >= report_date OR resolve_date IS NULL),
        CONSTRAINT unique_incident_per_upload UNIQUE (upload_id, incident_id)
    )
    "#,
    "DROP TABLE IF EXISTS incidents",
)
.with_objects(&["incidents"]);
