// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for reprise-core integration tests.
//!
//! Provides TestContext for setting up a throwaway SQLite database and a
//! scripted interpreter double that stands in for the external sandbox.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use reprise_core::executor::Executor;
use reprise_core::interpreter::{
    CallOutcome, Interpreter, InterpreterError, Outcome, PendingCall,
};
use reprise_core::migrations;
use reprise_core::service::Orchestrator;
use reprise_core::store::{CallRecord, ExecutionRecord, SqliteStore, Store};
use reprise_core::worker::Worker;

/// Test context that manages a temporary database and direct SQL access.
pub struct TestContext {
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub db_path: PathBuf,
    _dir: TempDir,
}

impl TestContext {
    /// Create a fresh database in a temp directory and run migrations.
    pub async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "reprise_core=warn".into()),
            )
            .try_init();

        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = dir.path().join("reprise-test.db");
        let url = format!("sqlite:{}?mode=rwc", db_path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("failed to connect to test database");
        migrations::run_sqlite(&pool)
            .await
            .expect("failed to run migrations");

        Self {
            store: Arc::new(SqliteStore::new(pool.clone())),
            pool,
            db_path,
            _dir: dir,
        }
    }

    /// The store as a trait object.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Build an orchestrator over this database and the given interpreter.
    pub fn service(&self, interpreter: Arc<dyn Interpreter>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(self.store(), interpreter))
    }

    /// Build a fast-ticking worker for tests.
    pub fn worker(&self, service: Arc<Orchestrator>, executor: Arc<dyn Executor>) -> Worker {
        Worker::new(service, self.store(), executor)
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Open a second, independent store over the same database file,
    /// simulating a fresh process after a crash.
    pub async fn reopen(&self) -> Arc<SqliteStore> {
        let url = format!("sqlite:{}?mode=rwc", self.db_path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("failed to reopen test database");
        Arc::new(SqliteStore::new(pool))
    }

    /// Fetch one execution row, panicking when absent.
    pub async fn execution(&self, execution_id: &str) -> ExecutionRecord {
        self.store
            .get_execution(execution_id)
            .await
            .expect("failed to fetch execution")
            .expect("execution not found")
    }

    /// Execution status text straight from the database.
    pub async fn execution_status(&self, execution_id: &str) -> String {
        self.execution(execution_id).await.status
    }

    /// All call rows of an execution, in insertion order.
    pub async fn all_call_rows(&self, execution_id: &str) -> Vec<CallRecord> {
        sqlx::query_as::<_, CallRecord>(
            r#"
            SELECT id, execution_id, resume_group_id, call_id, function_name, args,
                   status, result, error, job_handle, created_at, started_at, completed_at
            FROM calls
            WHERE execution_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .expect("failed to fetch call rows")
    }

    /// Count of call rows for an execution.
    pub async fn count_calls(&self, execution_id: &str) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM calls WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_one(&self.pool)
            .await
            .expect("failed to count calls");
        row.0
    }
}

// ============================================================================
// Scripted interpreter
// ============================================================================

/// What one scripted step produces.
pub enum ScriptedOutcome {
    /// Finish the workflow with this value.
    Complete(Value),
    /// Suspend on these calls.
    Suspend(Vec<PendingCall>),
    /// Raise inside the workflow.
    Fail(String),
}

type StartScript = Box<dyn Fn(Option<&Value>) -> ScriptedOutcome + Send + Sync>;
type ResumeScript = Box<dyn Fn(&BTreeMap<i64, CallOutcome>) -> ScriptedOutcome + Send + Sync>;

/// Interpreter double driven by a fixed script.
///
/// The snapshot encodes only a step counter; each resume consumes the next
/// scripted step. This mirrors the real contract, snapshots opaque to
/// the engine and call outcomes injected by call id, without a sandbox.
pub struct ScriptedInterpreter {
    start: StartScript,
    resumes: Vec<ResumeScript>,
}

impl ScriptedInterpreter {
    /// Script the start step.
    pub fn new<F>(start: F) -> Self
    where
        F: Fn(Option<&Value>) -> ScriptedOutcome + Send + Sync + 'static,
    {
        Self {
            start: Box::new(start),
            resumes: Vec::new(),
        }
    }

    /// Interpreter that completes immediately with `value`.
    pub fn completes(value: Value) -> Self {
        Self::new(move |_| ScriptedOutcome::Complete(value.clone()))
    }

    /// Append the next resume step.
    pub fn on_resume<F>(mut self, resume: F) -> Self
    where
        F: Fn(&BTreeMap<i64, CallOutcome>) -> ScriptedOutcome + Send + Sync + 'static,
    {
        self.resumes.push(Box::new(resume));
        self
    }

    fn wrap(
        &self,
        outcome: ScriptedOutcome,
        next_step: usize,
    ) -> Result<Outcome, InterpreterError> {
        match outcome {
            ScriptedOutcome::Complete(value) => Ok(Outcome::Complete(value)),
            ScriptedOutcome::Suspend(calls) => Ok(Outcome::Suspended {
                snapshot: snapshot_for(next_step),
                calls,
            }),
            ScriptedOutcome::Fail(message) => Err(InterpreterError::new(message)),
        }
    }
}

fn snapshot_for(step: usize) -> Vec<u8> {
    serde_json::to_vec(&json!({ "step": step })).expect("snapshot encoding")
}

fn step_of(snapshot: &[u8]) -> Result<usize, InterpreterError> {
    let value: Value = serde_json::from_slice(snapshot)
        .map_err(|e| InterpreterError::new(format!("snapshot incompatible: {e}")))?;
    value
        .get("step")
        .and_then(Value::as_u64)
        .map(|step| step as usize)
        .ok_or_else(|| InterpreterError::new("snapshot incompatible: no step"))
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn start(
        &self,
        _code: &str,
        inputs: Option<&Value>,
        _allowed_functions: &[String],
    ) -> Result<Outcome, InterpreterError> {
        self.wrap((self.start)(inputs), 1)
    }

    async fn resume(
        &self,
        snapshot: &[u8],
        results: &BTreeMap<i64, CallOutcome>,
    ) -> Result<Outcome, InterpreterError> {
        let step = step_of(snapshot)?;
        let script = self
            .resumes
            .get(step - 1)
            .ok_or_else(|| InterpreterError::new(format!("no scripted resume step {step}")))?;
        self.wrap(script(results), step + 1)
    }
}

/// Shorthand for building one pending call.
pub fn pending(call_id: i64, function_name: &str, args: Vec<Value>) -> PendingCall {
    PendingCall {
        call_id,
        function_name: function_name.to_string(),
        args,
    }
}

/// Extract the completed value for one call id, panicking on a failure.
pub fn completed_value(results: &BTreeMap<i64, CallOutcome>, call_id: i64) -> Value {
    match results.get(&call_id) {
        Some(CallOutcome::Completed(value)) => value.clone(),
        other => panic!("call {call_id} not completed: {other:?}"),
    }
}
