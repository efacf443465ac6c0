use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{
    keys, AttemptStore, MetaStore, ProblemStore, SessionStateStore, SettingsStore, StoreError,
    StoreResult,
};
use crate::types::{Attempt, Problem, SessionState, UserSettings};

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS "_db_metadata" ("key" TEXT PRIMARY KEY, "value" TEXT NOT NULL)"#,
    r#"CREATE TABLE IF NOT EXISTS "problems" (
        "id" TEXT PRIMARY KEY,
        "box_level" INTEGER NOT NULL,
        "data" TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "attempts" (
        "id" TEXT PRIMARY KEY,
        "problem_id" TEXT NOT NULL,
        "attempt_date" TEXT NOT NULL,
        "data" TEXT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_attempts_problem_date" ON "attempts" ("problem_id", "attempt_date")"#,
    r#"CREATE TABLE IF NOT EXISTS "meta" ("key" TEXT PRIMARY KEY, "value" TEXT NOT NULL)"#,
    r#"CREATE TABLE IF NOT EXISTS "session_state" (
        "id" INTEGER PRIMARY KEY CHECK ("id" = 1),
        "data" TEXT NOT NULL
    )"#,
];

/// SQLite-backed record store. Records are kept as JSON documents next to the columns the
/// range queries need.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("cannot create {}: {e}", parent.display())))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Single-connection in-memory database; every connection of a pool would otherwise see
    /// its own empty database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("practice-scheduler")
        .join("practice.db")
}

async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(SCHEMA_V1[0]).execute(pool).await?;

    let version: Option<String> =
        sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
            .fetch_optional(pool)
            .await?;

    let current = match version {
        Some(v) => v
            .parse::<i64>()
            .map_err(|_| StoreError::Migration(format!("unrecognised schema version {v:?}")))?,
        None => 0,
    };

    if current > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than supported v{CURRENT_SCHEMA_VERSION}"
        )));
    }
    if current == CURRENT_SCHEMA_VERSION {
        debug!(version = current, "SQLite schema up to date");
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for stmt in SCHEMA_V1 {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }
    sqlx::query(
        r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#,
    )
    .bind(CURRENT_SCHEMA_VERSION.to_string())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(version = CURRENT_SCHEMA_VERSION, "SQLite schema initialised");
    Ok(())
}

fn sortable_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl ProblemStore for SqliteStore {
    async fn get_problem(&self, id: &str) -> StoreResult<Option<Problem>> {
        let data: Option<String> = sqlx::query_scalar(r#"SELECT "data" FROM "problems" WHERE "id" = ?"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        data.map(|d| serde_json::from_str(&d)).transpose().map_err(StoreError::from)
    }

    async fn all_problems(&self) -> StoreResult<Vec<Problem>> {
        let rows: Vec<String> = sqlx::query_scalar(r#"SELECT "data" FROM "problems" ORDER BY "id""#)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|d| serde_json::from_str(d).map_err(StoreError::from))
            .collect()
    }

    async fn put_problem(&self, problem: &Problem) -> StoreResult<()> {
        let data = serde_json::to_string(problem)?;
        sqlx::query(
            r#"INSERT INTO "problems" ("id", "box_level", "data") VALUES (?, ?, ?)
               ON CONFLICT ("id") DO UPDATE SET "box_level" = excluded."box_level", "data" = excluded."data""#,
        )
        .bind(&problem.id)
        .bind(problem.box_level as i64)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_problems(&self, problems: &[Problem]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for problem in problems {
            let data = serde_json::to_string(problem)?;
            sqlx::query(
                r#"INSERT INTO "problems" ("id", "box_level", "data") VALUES (?, ?, ?)
                   ON CONFLICT ("id") DO UPDATE SET "box_level" = excluded."box_level", "data" = excluded."data""#,
            )
            .bind(&problem.id)
            .bind(problem.box_level as i64)
            .bind(data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for SqliteStore {
    async fn put_attempt(&self, attempt: &Attempt) -> StoreResult<()> {
        let data = serde_json::to_string(attempt)?;
        sqlx::query(
            r#"INSERT OR REPLACE INTO "attempts" ("id", "problem_id", "attempt_date", "data") VALUES (?, ?, ?, ?)"#,
        )
        .bind(&attempt.id)
        .bind(&attempt.problem_id)
        .bind(sortable_timestamp(&attempt.attempt_date))
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempts_for_problem(&self, problem_id: &str) -> StoreResult<Vec<Attempt>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"SELECT "data" FROM "attempts" WHERE "problem_id" = ? ORDER BY "attempt_date" ASC, "rowid" ASC"#,
        )
        .bind(problem_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|d| serde_json::from_str(d).map_err(StoreError::from))
            .collect()
    }

    async fn latest_attempt_date(&self) -> StoreResult<Option<DateTime<Utc>>> {
        let latest: Option<String> = sqlx::query_scalar(r#"SELECT MAX("attempt_date") FROM "attempts""#)
            .fetch_one(&self.pool)
            .await?;
        Ok(latest
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

#[async_trait]
impl MetaStore for SqliteStore {
    async fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar(r#"SELECT "value" FROM "meta" WHERE "key" = ?"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> StoreResult<bool> {
        let affected = match (expected, value) {
            (None, Some(new)) => sqlx::query(
                r#"INSERT INTO "meta" ("key", "value") VALUES (?, ?) ON CONFLICT ("key") DO NOTHING"#,
            )
            .bind(key)
            .bind(new)
            .execute(&self.pool)
            .await?
            .rows_affected(),
            (Some(old), Some(new)) => {
                sqlx::query(r#"UPDATE "meta" SET "value" = ? WHERE "key" = ? AND "value" = ?"#)
                    .bind(new)
                    .bind(key)
                    .bind(old)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
            (Some(old), None) => sqlx::query(r#"DELETE FROM "meta" WHERE "key" = ? AND "value" = ?"#)
                .bind(key)
                .bind(old)
                .execute(&self.pool)
                .await?
                .rows_affected(),
            (None, None) => {
                let exists: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "meta" WHERE "key" = ?"#)
                    .bind(key)
                    .fetch_one(&self.pool)
                    .await?;
                return Ok(exists == 0);
            }
        };
        Ok(affected == 1)
    }
}

#[async_trait]
impl SessionStateStore for SqliteStore {
    async fn load_session_state(&self) -> StoreResult<Option<Value>> {
        let data: Option<String> = sqlx::query_scalar(r#"SELECT "data" FROM "session_state" WHERE "id" = 1"#)
            .fetch_optional(&self.pool)
            .await?;
        data.map(|d| serde_json::from_str(&d)).transpose().map_err(StoreError::from)
    }

    async fn save_session_state(&self, state: &SessionState) -> StoreResult<()> {
        let data = serde_json::to_string(state)?;
        sqlx::query(
            r#"INSERT INTO "session_state" ("id", "data") VALUES (1, ?)
               ON CONFLICT ("id") DO UPDATE SET "data" = excluded."data""#,
        )
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn load_settings(&self) -> StoreResult<Option<UserSettings>> {
        let raw = self.get_meta(keys::SETTINGS).await?;
        raw.map(|d| serde_json::from_str(&d)).transpose().map_err(StoreError::from)
    }

    async fn save_settings(&self, settings: &UserSettings) -> StoreResult<()> {
        let data = serde_json::to_string(settings)?;
        sqlx::query(
            r#"INSERT INTO "meta" ("key", "value") VALUES (?, ?)
               ON CONFLICT ("key") DO UPDATE SET "value" = excluded."value""#,
        )
        .bind(keys::SETTINGS)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
