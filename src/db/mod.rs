//! Database module for covtrack
//!
//! SQLite storage for projects, builds and their test case executions. This is
//! the history the health analyzer reads and the coverage merge writes back to.

mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::health::BuildHistory;
use crate::model::{Build, BuildStatus, CoverageMap, NewBuild, Project, TestCaseExecution};

const BUILD_COLUMNS: &str = "id, project_id, branch, commit_sha, slug, status, created_at";
const EXECUTION_COLUMNS: &str = "id, build_id, test_suite_name, name, class_name, time, passed, \
     failure_message, failure_type, failure_content, covered_lines, created_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // === Projects ===

    /// Returns the project with `slug`, creating it on first use
    pub fn ensure_project(&self, slug: &str, name: &str) -> Result<Project> {
        self.conn.execute(
            "INSERT OR IGNORE INTO projects (slug, name) VALUES (?1, ?2)",
            params![slug, name],
        )?;

        let project = self.conn.query_row(
            "SELECT id, slug, name FROM projects WHERE slug = ?1",
            params![slug],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )?;

        Ok(project)
    }

    // === Builds ===

    pub fn create_build(&self, project_id: i64, build: &NewBuild) -> Result<Build> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO builds (project_id, branch, commit_sha, slug, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project_id,
                build.branch,
                build.commit,
                build.slug,
                BuildStatus::Pending.as_str(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Build {
            id: self.conn.last_insert_rowid(),
            project_id,
            branch: build.branch.clone(),
            commit: build.commit.clone(),
            slug: build.slug.clone(),
            status: BuildStatus::Pending,
            created_at: now,
            test_case_executions: Vec::new(),
        })
    }

    pub fn set_build_status(&self, build_id: i64, status: BuildStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE builds SET status = ?1 WHERE id = ?2",
            params![status.as_str(), build_id],
        )?;
        if updated == 0 {
            anyhow::bail!("Build {} not found", build_id);
        }
        Ok(())
    }

    /// A build together with its executions
    pub fn get_build(&self, build_id: i64) -> Result<Option<Build>> {
        let build = self
            .conn
            .query_row(
                &format!("SELECT {} FROM builds WHERE id = ?1", BUILD_COLUMNS),
                params![build_id],
                build_from_row,
            )
            .optional()?;

        match build {
            Some(mut build) => {
                build.test_case_executions = self.get_build_executions(build.id)?;
                Ok(Some(build))
            }
            None => Ok(None),
        }
    }

    /// Newest builds of a project first. Executions are only loaded when asked.
    pub fn get_recent_builds(&self, project_id: i64, limit: usize, with_executions: bool) -> Result<Vec<Build>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM builds WHERE project_id = ?1 ORDER BY id DESC LIMIT ?2",
            BUILD_COLUMNS
        ))?;

        let rows = stmt.query_map(params![project_id, limit as i64], build_from_row)?;
        let mut builds = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        if with_executions {
            for build in &mut builds {
                build.test_case_executions = self.get_build_executions(build.id)?;
            }
        }

        Ok(builds)
    }

    // === Test case executions ===

    /// Stores new executions in one transaction and returns them with their ids
    pub fn insert_executions(&self, executions: &[TestCaseExecution]) -> Result<Vec<TestCaseExecution>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut stored = Vec::with_capacity(executions.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO test_case_executions
                    (build_id, test_suite_name, name, class_name, time, passed,
                     failure_message, failure_type, failure_content, covered_lines, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            for execution in executions {
                let id = stmt.insert(params![
                    execution.build_id,
                    execution.test_suite_name,
                    execution.name,
                    execution.class_name,
                    execution.time,
                    execution.passed,
                    execution.failure_message,
                    execution.failure_type,
                    execution.failure_content,
                    serde_json::to_string(&execution.covered_lines)?,
                    execution.created_at.to_rfc3339(),
                ])?;

                stored.push(TestCaseExecution {
                    id,
                    ..execution.clone()
                });
            }
        }

        tx.commit()?;
        Ok(stored)
    }

    pub fn get_build_executions(&self, build_id: i64) -> Result<Vec<TestCaseExecution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM test_case_executions WHERE build_id = ?1 ORDER BY id ASC",
            EXECUTION_COLUMNS
        ))?;

        let rows = stmt.query_map(params![build_id], execution_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_execution(&self, id: i64) -> Result<Option<TestCaseExecution>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM test_case_executions WHERE id = ?1", EXECUTION_COLUMNS),
                params![id],
                execution_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Writes back the coverage map of already stored executions
    pub fn save_covered_lines(&self, executions: &[TestCaseExecution]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        for execution in executions {
            tx.execute(
                "UPDATE test_case_executions SET covered_lines = ?1 WHERE id = ?2",
                params![serde_json::to_string(&execution.covered_lines)?, execution.id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

impl BuildHistory for Database {
    fn find_build(&self, build_id: i64) -> Result<Option<Build>> {
        self.get_build(build_id)
    }

    fn recent_builds(&self, project_id: i64, limit: usize) -> Result<Vec<Build>> {
        self.get_recent_builds(project_id, limit, true)
    }
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&row.get::<_, String>(idx)?)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now()))
}

fn build_from_row(row: &Row) -> rusqlite::Result<Build> {
    let status = row
        .get::<_, String>(5)?
        .parse::<BuildStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;

    Ok(Build {
        id: row.get(0)?,
        project_id: row.get(1)?,
        branch: row.get(2)?,
        commit: row.get(3)?,
        slug: row.get(4)?,
        status,
        created_at: parse_timestamp(row, 6)?,
        test_case_executions: Vec::new(),
    })
}

fn execution_from_row(row: &Row) -> rusqlite::Result<TestCaseExecution> {
    let covered_lines: CoverageMap = serde_json::from_str(&row.get::<_, String>(10)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    Ok(TestCaseExecution {
        id: row.get(0)?,
        build_id: row.get(1)?,
        test_suite_name: row.get(2)?,
        name: row.get(3)?,
        class_name: row.get(4)?,
        time: row.get(5)?,
        passed: row.get(6)?,
        failure_message: row.get(7)?,
        failure_type: row.get(8)?,
        failure_content: row.get(9)?,
        covered_lines,
        created_at: parse_timestamp(row, 11)?,
    })
}
