//! Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Current schema version (used for documentation/debugging)
#[allow(dead_code)]
const SCHEMA_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS builds (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            branch TEXT NOT NULL,
            commit_sha TEXT NOT NULL,
            slug TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id)
        );

        -- covered_lines: JSON object of "<package>/<sourcefile>" -> [line numbers]
        CREATE TABLE IF NOT EXISTS test_case_executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            build_id INTEGER NOT NULL,
            test_suite_name TEXT NOT NULL,
            name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            time REAL NOT NULL,
            passed INTEGER NOT NULL,
            failure_message TEXT,
            failure_type TEXT,
            failure_content TEXT,
            covered_lines TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            FOREIGN KEY (build_id) REFERENCES builds(id)
        );

        CREATE INDEX IF NOT EXISTS idx_builds_project_id ON builds(project_id, id);
        CREATE INDEX IF NOT EXISTS idx_executions_build_id ON test_case_executions(build_id);

        INSERT INTO schema_migrations (version, applied_at) VALUES (1, datetime('now'));
        "#,
    )?;

    Ok(())
}
