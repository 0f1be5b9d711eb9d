//! Postgres run store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use runhub_core::{Run, RunState, Spec};

use super::RunStore;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};

/// Row of the run table.
#[derive(Debug, Clone, FromRow)]
struct RunRow {
    id: String,
    task_id: String,
    project: String,
    task: String,
    spec: serde_json::Value,
    state: String,
    message: Option<String>,
    framework: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for Run {
    type Error = AppError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let spec: Spec = serde_json::from_value(row.spec)?;
        let state: RunState = row.state.parse()?;
        Ok(Run {
            id: row.id,
            task_id: row.task_id,
            project: row.project,
            task: row.task,
            spec,
            state,
            message: row.message,
            framework: row.framework,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Run store over a `<schema>.run` table.
///
/// The upsert only touches rows that are not terminal yet, so a terminal
/// save stays the last write.
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: DbPool,
    table: String,
}

impl PgRunStore {
    pub fn new(pool: DbPool, schema: &str) -> AppResult<Self> {
        let valid = !schema.is_empty()
            && schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(AppError::Config(format!("invalid schema name '{}'", schema)));
        }

        Ok(Self {
            pool,
            table: format!("{}.run", schema),
        })
    }

    /// Create the schema and run table if missing.
    pub async fn migrate(&self) -> AppResult<()> {
        let schema = self.table.trim_end_matches(".run");
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                project TEXT NOT NULL,
                task TEXT NOT NULL,
                spec JSONB NOT NULL,
                state TEXT NOT NULL,
                message TEXT,
                framework TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS framework TEXT",
            self.table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS run_state_idx ON {} (state)",
            self.table
        ))
        .execute(&self.pool)
        .await?;

        tracing::info!(table = %self.table, "Run table ready");
        Ok(())
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn load(&self, run_id: &str) -> AppResult<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT id, task_id, project, task, spec, state, message, framework, created_at, updated_at
            FROM {}
            WHERE id = $1
            "#,
            self.table
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Run::try_from).transpose()
    }

    async fn save(&self, run: &Run) -> AppResult<()> {
        let spec = serde_json::to_value(&run.spec)?;

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (id, task_id, project, task, spec, state, message, framework, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                spec = EXCLUDED.spec,
                state = EXCLUDED.state,
                message = EXCLUDED.message,
                framework = EXCLUDED.framework,
                updated_at = EXCLUDED.updated_at
            WHERE {table}.state NOT IN ('COMPLETED', 'ERROR', 'STOPPED')
            "#,
            table = self.table
        ))
        .bind(&run.id)
        .bind(&run.task_id)
        .bind(&run.project)
        .bind(&run.task)
        .bind(&spec)
        .bind(run.state.as_str())
        .bind(&run.message)
        .bind(&run.framework)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Store(format!(
                "run '{}' is already terminal",
                run.id
            )));
        }

        tracing::trace!(run_id = %run.id, state = %run.state, "Run saved");
        Ok(())
    }

    async fn list_by_state(&self, state: RunState) -> AppResult<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT id, task_id, project, task, spec, state, message, framework, created_at, updated_at
            FROM {}
            WHERE state = $1
            ORDER BY created_at ASC
            "#,
            self.table
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Run::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_to_run() {
        let now = Utc::now();
        let row = RunRow {
            id: "r1".into(),
            task_id: "t1".into(),
            project: "demo".into(),
            task: "dbt/transform".into(),
            spec: json!({"kind": "dbt+transform", "known": {"image": "dbt:latest"}, "extra": {}}),
            state: "RUNNING".into(),
            message: None,
            framework: None,
            created_at: now,
            updated_at: now,
        };

        let run = Run::try_from(row).unwrap();
        assert_eq!(run.state, RunState::Running);
        assert_eq!(run.spec.get_str("image"), Some("dbt:latest"));
        assert_eq!(run.dispatch_key().unwrap().to_string(), "dbt+transform");
    }

    #[test]
    fn test_row_with_unknown_state() {
        let now = Utc::now();
        let row = RunRow {
            id: "r1".into(),
            task_id: "t1".into(),
            project: "demo".into(),
            task: "dbt/transform".into(),
            spec: json!({"kind": "dbt+transform"}),
            state: "PAUSED".into(),
            message: None,
            framework: None,
            created_at: now,
            updated_at: now,
        };
        assert!(Run::try_from(row).is_err());
    }

    #[tokio::test]
    async fn test_schema_name_is_validated() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy_with(crate::config::DatabaseConfig::default().connect_options());

        assert!(PgRunStore::new(pool.clone(), "runhub; DROP TABLE x").is_err());
        assert!(PgRunStore::new(pool.clone(), "").is_err());
        assert_eq!(PgRunStore::new(pool, "runhub").unwrap().table, "runhub.run");
    }
}
