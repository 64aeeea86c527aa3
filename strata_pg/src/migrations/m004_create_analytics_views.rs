//! Migration 004: Create the analytics views.
//!
//! PostgreSQL has no `CREATE VIEW IF NOT EXISTS`; `CREATE OR REPLACE VIEW`
//! gives the same re-run behavior for views whose columns do not change.

use strata_core::MigrationDefinition;

/// Creates the timeline, resolution, priority, sentiment and automation views.
pub const CREATE_ANALYTICS_VIEWS: MigrationDefinition = MigrationDefinition::new(
    4,
    "create_analytics_views",
    r#"
    -- Daily incident timeline
    CREATE OR REPLACE VIEW incident_timeline AS
    SELECT
        DATE_TRUNC('day', report_date) AS date,
        COUNT(*) AS incident_count,
        COUNT(CASE WHEN priority = 'P1' THEN 1 END) AS p1_count,
        COUNT(CASE WHEN priority = 'P2' THEN 1 END) AS p2_count,
        COUNT(CASE WHEN priority = 'P3' THEN 1 END) AS p3_count,
        COUNT(CASE WHEN priority = 'P4' THEN 1 END) AS p4_count
    FROM incidents
    GROUP BY DATE_TRUNC('day', report_date)
    ORDER BY date;

    -- Weekly incident timeline
    CREATE OR REPLACE VIEW weekly_timeline AS
    SELECT
        DATE_TRUNC('week', report_date) AS week,
        COUNT(*) AS incident_count,
        COUNT(CASE WHEN priority = 'P1' THEN 1 END) AS p1_count,
        COUNT(CASE WHEN priority = 'P2' THEN 1 END) AS p2_count,
        COUNT(CASE WHEN priority = 'P3' THEN 1 END) AS p3_count,
        COUNT(CASE WHEN priority = 'P4' THEN 1 END) AS p4_count
    FROM incidents
    GROUP BY DATE_TRUNC('week', report_date)
    ORDER BY week;

    -- Resolution metrics by application and priority
    CREATE OR REPLACE VIEW resolution_metrics AS
    SELECT
        application_name,
        priority,
        AVG(resolution_time_hours) AS avg_resolution_time,
        PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY resolution_time_hours) AS median_resolution_time,
        COUNT(*) AS total_incidents,
        COUNT(CASE WHEN resolve_date IS NOT NULL THEN 1 END) AS resolved_incidents
    FROM incidents
    WHERE resolution_time_hours IS NOT NULL
    GROUP BY application_name, priority;

    -- Priority analysis
    CREATE OR REPLACE VIEW priority_analysis AS
    SELECT
        priority,
        COUNT(*) AS count,
        ROUND(COUNT(*) * 100.0 / SUM(COUNT(*)) OVER (), 2) AS percentage
    FROM incidents
    GROUP BY priority
    ORDER BY priority;

    -- Sentiment summary
    CREATE OR REPLACE VIEW sentiment_summary AS
    SELECT
        sentiment_label,
        COUNT(*) AS count,
        ROUND(AVG(sentiment_score)::NUMERIC, 3) AS avg_score
    FROM incidents
    WHERE sentiment_label IS NOT NULL
    GROUP BY sentiment_label;

    -- Automation opportunities
    CREATE OR REPLACE VIEW automation_opportunities AS
    SELECT
        it_process_group,
        COUNT(*) AS incident_count,
        AVG(automation_score) AS avg_automation_score,
        COUNT(CASE WHEN automation_feasible = true THEN 1 END) AS automatable_count,
        ROUND(COUNT(CASE WHEN automation_feasible = true THEN 1 END) * 100.0 / COUNT(*), 2) AS automation_percentage
    FROM incidents
    WHERE it_process_group IS NOT NULL
    GROUP BY it_process_group
    ORDER BY automation_percentage DESC;
    "#,
    r#"
    DROP VIEW IF EXISTS automation_opportunities;
    DROP VIEW IF EXISTS sentiment_summary;
    DROP VIEW IF EXISTS priority_analysis;
    DROP VIEW IF EXISTS resolution_metrics;
    DROP VIEW IF EXISTS weekly_timeline;
    DROP VIEW IF EXISTS incident_timeline;
    "#,
)
.with_objects(&[
    "incident_timeline",
    "weekly_timeline",
    "resolution_metrics",
    "priority_analysis",
    "sentiment_summary",
    "automation_opportunities",
]);
