//! PostgreSQL-backed store implementation.

use serde_json::Value;
use sqlx::PgPool;

use crate::error::{EngineError, Result};
use crate::interpreter::CallOutcome;

use super::{
    BatchStatus, CallCompletion, CallRecord, ExecutionRecord, ExecutionStatus,
    ExecutionTermination, NewCall, ResumeContext, Store, build_resume_results,
};

const EXECUTION_COLUMNS: &str = "id, code, external_functions, inputs, state, status, \
     current_resume_group_id, output, error, created_at, updated_at";

const CALL_COLUMNS: &str = "id, execution_id, resume_group_id, call_id, function_name, args, \
     status, result, error, job_handle, created_at, started_at, completed_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new Postgres-backed store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and run all migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to Postgres: {}", e),
            })?;

        crate::migrations::run_postgres(&pool)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    async fn fetch_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let record = sqlx::query_as::<_, ExecutionRecord>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn status_conflict(
        &self,
        execution_id: &str,
        expected: &str,
    ) -> Result<EngineError> {
        let actual: Option<(String,)> =
            sqlx::query_as("SELECT status FROM executions WHERE id = $1")
                .bind(execution_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match actual {
            Some((status,)) => EngineError::StatusConflict {
                execution_id: execution_id.to_string(),
                expected: expected.to_string(),
                actual: status,
            },
            None => EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            },
        })
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn create_execution(
        &self,
        execution_id: &str,
        code: &str,
        external_functions: &[String],
        inputs: Option<&Value>,
    ) -> Result<()> {
        let functions_json = serde_json::to_string(external_functions)?;
        let inputs_json = inputs.map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO executions (id, code, external_functions, inputs, status)
            VALUES ($1, $2, $3, $4, 'scheduled')
            "#,
        )
        .bind(execution_id)
        .bind(code)
        .bind(functions_json)
        .bind(inputs_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        self.fetch_execution(execution_id).await
    }

    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM executions
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn claim_scheduled(&self) -> Result<Option<ExecutionRecord>> {
        // Single statement: lock the oldest scheduled row, skipping rows
        // other workers already hold, and flip it to running.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE executions
            SET status = 'running', updated_at = NOW()
            WHERE id = (
                SELECT id FROM executions
                WHERE status = 'scheduled'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some((execution_id,)) => self.fetch_execution(&execution_id).await,
            None => Ok(None),
        }
    }

    async fn claim_execution(&self, execution_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'running', updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled'
            "#,
        )
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_suspension(
        &self,
        execution_id: &str,
        expected_status: ExecutionStatus,
        state: &[u8],
        resume_group_id: &str,
        calls: &[NewCall],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET state = $1, status = 'waiting', current_resume_group_id = $2,
                updated_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(state)
        .bind(resume_group_id)
        .bind(execution_id)
        .bind(expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            drop(tx);
            return Err(self
                .status_conflict(execution_id, expected_status.as_str())
                .await?);
        }

        for call in calls {
            sqlx::query(
                r#"
                INSERT INTO calls (execution_id, resume_group_id, call_id, function_name, args, status)
                VALUES ($1, $2, $3, $4, $5, 'pending')
                "#,
            )
            .bind(execution_id)
            .bind(resume_group_id)
            .bind(call.call_id)
            .bind(&call.function_name)
            .bind(&call.args)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn complete_call(
        &self,
        execution_id: &str,
        resume_group_id: &str,
        call_id: i64,
        outcome: &CallOutcome,
    ) -> Result<CallCompletion> {
        let (status, result_json, error) = match outcome {
            CallOutcome::Completed(value) => {
                ("completed", Some(serde_json::to_string(value)?), None)
            }
            CallOutcome::Failed(message) => ("failed", None, Some(message.clone())),
        };

        // Single guarded UPDATE: the winner terminates the call, everyone
        // else falls through to the classification read below.
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET status = $1, result = $2, error = $3, completed_at = NOW()
            WHERE execution_id = $4 AND resume_group_id = $5 AND call_id = $6
              AND status IN ('pending', 'running')
            "#,
        )
        .bind(status)
        .bind(result_json)
        .bind(error)
        .bind(execution_id)
        .bind(resume_group_id)
        .bind(call_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(CallCompletion::Applied);
        }

        // Nothing applied: the call is absent or already terminal.
        let existing = sqlx::query_as::<_, CallRecord>(&format!(
            r#"
            SELECT {CALL_COLUMNS} FROM calls
            WHERE execution_id = $1 AND resume_group_id = $2 AND call_id = $3
            "#
        ))
        .bind(execution_id)
        .bind(resume_group_id)
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(call) = existing else {
            return Err(EngineError::CallNotFound {
                execution_id: execution_id.to_string(),
                call_id,
            });
        };

        match call.terminal_outcome()? {
            Some(current) if current == *outcome => Ok(CallCompletion::Duplicate),
            _ => Err(EngineError::CallConflict {
                execution_id: execution_id.to_string(),
                call_id,
                reason: format!("already {} with a different outcome", call.status),
            }),
        }
    }

    async fn batch_status(&self, resume_group_id: &str) -> Result<BatchStatus> {
        let (total, completed, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM calls
            WHERE resume_group_id = $1
            "#,
        )
        .bind(resume_group_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(BatchStatus {
            total,
            completed,
            failed,
            pending_or_running: total - completed - failed,
        })
    }

    async fn claim_resume(&self, execution_id: &str, resume_group_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'resuming', updated_at = NOW()
            WHERE id = $1 AND status = 'waiting' AND current_resume_group_id = $2
              AND NOT EXISTS (
                  SELECT 1 FROM calls
                  WHERE execution_id = $1 AND resume_group_id = $2
                    AND status IN ('pending', 'running')
              )
            "#,
        )
        .bind(execution_id)
        .bind(resume_group_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_for_resume(&self, execution_id: &str) -> Result<ResumeContext> {
        let execution = self.fetch_execution(execution_id).await?.ok_or_else(|| {
            EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            }
        })?;

        let resume_group_id =
            execution
                .current_resume_group_id
                .ok_or_else(|| EngineError::StatusConflict {
                    execution_id: execution_id.to_string(),
                    expected: "resuming".to_string(),
                    actual: execution.status.clone(),
                })?;
        let state = execution
            .state
            .ok_or_else(|| EngineError::StatusConflict {
                execution_id: execution_id.to_string(),
                expected: "resuming".to_string(),
                actual: execution.status.clone(),
            })?;

        let calls = self
            .list_batch_calls(execution_id, &resume_group_id)
            .await?;
        let results = build_resume_results(execution_id, &calls)?;

        Ok(ResumeContext {
            state,
            code: execution.code,
            results,
        })
    }

    async fn finish(
        &self,
        execution_id: &str,
        termination: &ExecutionTermination,
    ) -> Result<()> {
        let (status, output_json, error) = match termination {
            ExecutionTermination::Completed(value) => {
                ("completed", Some(serde_json::to_string(value)?), None)
            }
            ExecutionTermination::Failed(message) => ("failed", None, Some(message.clone())),
        };

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $1, output = $2, error = $3, state = NULL,
                current_resume_group_id = NULL, updated_at = NOW()
            WHERE id = $4 AND status IN ('running', 'resuming')
            "#,
        )
        .bind(status)
        .bind(output_json)
        .bind(error)
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .status_conflict(execution_id, "running or resuming")
                .await?);
        }

        Ok(())
    }

    async fn list_waiting_executions(&self, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM executions
            WHERE status = 'waiting'
            ORDER BY updated_at ASC, id ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_pending_calls(&self, limit: i64) -> Result<Vec<CallRecord>> {
        let records = sqlx::query_as::<_, CallRecord>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM calls
            WHERE status = 'pending'
            ORDER BY id ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn mark_call_submitted(&self, row_id: i64, job_handle: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET status = 'running', job_handle = $1, started_at = NOW()
            WHERE id = $2 AND status = 'pending'
            "#,
        )
        .bind(job_handle)
        .bind(row_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_submitted_calls(&self, limit: i64) -> Result<Vec<CallRecord>> {
        let records = sqlx::query_as::<_, CallRecord>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM calls
            WHERE status = 'running' AND job_handle IS NOT NULL
            ORDER BY started_at ASC, id ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_batch_calls(
        &self,
        execution_id: &str,
        resume_group_id: &str,
    ) -> Result<Vec<CallRecord>> {
        let records = sqlx::query_as::<_, CallRecord>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM calls
            WHERE execution_id = $1 AND resume_group_id = $2
            ORDER BY call_id ASC
            "#
        ))
        .bind(execution_id)
        .bind(resume_group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn find_call_by_job_handle(&self, job_handle: &str) -> Result<Option<CallRecord>> {
        let record = sqlx::query_as::<_, CallRecord>(&format!(
            "SELECT {CALL_COLUMNS} FROM calls WHERE job_handle = $1 LIMIT 1"
        ))
        .bind(job_handle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<bool> {
        // The calls table cascades on delete.
        let result = sqlx::query("DELETE FROM executions WHERE id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_open_executions(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM executions
            WHERE status IN ('scheduled', 'running', 'waiting', 'resuming')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn health_check(&self) -> Result<bool> {
        let result: std::result::Result<(i32,), _> =
            sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}
