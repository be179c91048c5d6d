//! Persistence interfaces and backends for reprise-core.
//!
//! This module defines the store abstraction and backend implementations.
//! Statuses are persisted as plain text and structured payloads as
//! serialized JSON text so any transactional relational store can hold them;
//! the interpreter snapshot is the only binary column.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::interpreter::CallOutcome;

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Created, not yet picked up by a worker.
    Scheduled,
    /// A worker is driving the interpreter from the start of the program.
    Running,
    /// Suspended on a batch of external calls.
    Waiting,
    /// A worker claimed the settled batch and is driving the interpreter.
    Resuming,
    /// Terminal: the workflow produced its output.
    Completed,
    /// Terminal: the workflow or the interpreter failed.
    Failed,
}

impl ExecutionStatus {
    /// The persisted text form of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Resuming => "resuming",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the persisted text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "running" => Some(Self::Running),
            "waiting" => Some(Self::Waiting),
            "resuming" => Some(Self::Resuming),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether no further transition is legal from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an external function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Recorded with its batch, not yet handed to an executor.
    Pending,
    /// Submitted to an executor; job_handle is set.
    Running,
    /// Terminal: the call produced a result.
    Completed,
    /// Terminal: the call (or its submission) failed.
    Failed,
}

impl CallStatus {
    /// The persisted text form of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the persisted text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the call has terminated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution record from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionRecord {
    /// Stable opaque identifier (uuid rendered as text).
    pub id: String,
    /// The workflow program text, immutable after creation.
    pub code: String,
    /// JSON array of function names the workflow may invoke.
    pub external_functions: String,
    /// Serialized structured input, if any.
    pub inputs: Option<String>,
    /// Opaque interpreter snapshot from the last suspension.
    pub state: Option<Vec<u8>>,
    /// Current status text (see [`ExecutionStatus`]).
    pub status: String,
    /// Batch the execution is currently waiting for, when suspended.
    pub current_resume_group_id: Option<String>,
    /// Serialized final value, set once on completion.
    pub output: Option<String>,
    /// Failure description, set once on failure.
    pub error: Option<String>,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the execution last changed.
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// The typed status, or a validation error for unknown text.
    pub fn parsed_status(&self) -> Result<ExecutionStatus> {
        ExecutionStatus::parse(&self.status).ok_or_else(|| EngineError::ValidationError {
            field: "status".to_string(),
            message: format!("unknown execution status '{}'", self.status),
        })
    }

    /// The capability list passed to the interpreter.
    pub fn allowed_functions(&self) -> Result<Vec<String>> {
        Ok(serde_json::from_str(&self.external_functions)?)
    }

    /// The structured inputs, if any.
    pub fn parsed_inputs(&self) -> Result<Option<Value>> {
        match &self.inputs {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    /// The structured output, if the execution completed.
    pub fn parsed_output(&self) -> Result<Option<Value>> {
        match &self.output {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

/// Call record from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CallRecord {
    /// Dense auto-assigned row id.
    pub id: i64,
    /// Owning execution.
    pub execution_id: String,
    /// Batch this call belongs to.
    pub resume_group_id: String,
    /// Interpreter-assigned id, unique within the batch.
    pub call_id: i64,
    /// External function name.
    pub function_name: String,
    /// Serialized JSON array of positional arguments.
    pub args: String,
    /// Current status text (see [`CallStatus`]).
    pub status: String,
    /// Serialized result, present iff completed.
    pub result: Option<String>,
    /// Failure text, present iff failed.
    pub error: Option<String>,
    /// Opaque executor token for polling, when submitted.
    pub job_handle: Option<String>,
    /// When the call was recorded.
    pub created_at: DateTime<Utc>,
    /// When the call was submitted to an executor.
    pub started_at: Option<DateTime<Utc>>,
    /// When the call terminated.
    pub completed_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    /// The typed status, or a validation error for unknown text.
    pub fn parsed_status(&self) -> Result<CallStatus> {
        CallStatus::parse(&self.status).ok_or_else(|| EngineError::ValidationError {
            field: "status".to_string(),
            message: format!("unknown call status '{}'", self.status),
        })
    }

    /// The positional arguments as structured values.
    pub fn parsed_args(&self) -> Result<Vec<Value>> {
        Ok(serde_json::from_str(&self.args)?)
    }

    /// The terminal outcome of this call, if it has one.
    pub fn terminal_outcome(&self) -> Result<Option<CallOutcome>> {
        match self.parsed_status()? {
            CallStatus::Completed => {
                let raw = self.result.as_deref().unwrap_or("null");
                Ok(Some(CallOutcome::Completed(serde_json::from_str(raw)?)))
            }
            CallStatus::Failed => Ok(Some(CallOutcome::Failed(
                self.error.clone().unwrap_or_default(),
            ))),
            _ => Ok(None),
        }
    }
}

/// Insert shape for one call of a new batch.
#[derive(Debug, Clone)]
pub struct NewCall {
    /// Interpreter-assigned id within the batch.
    pub call_id: i64,
    /// External function name.
    pub function_name: String,
    /// Serialized JSON array of positional arguments.
    pub args: String,
}

/// Terminal outcome applied to an execution by [`Store::finish`].
#[derive(Debug, Clone)]
pub enum ExecutionTermination {
    /// The workflow produced its final value.
    Completed(Value),
    /// The workflow or interpreter failed with the given description.
    Failed(String),
}

/// Result of recording a call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCompletion {
    /// The outcome was written now.
    Applied,
    /// The call already carried the identical outcome; nothing changed.
    Duplicate,
}

/// Aggregate view of one batch, answered by a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStatus {
    /// Number of calls in the batch.
    pub total: i64,
    /// Calls that completed.
    pub completed: i64,
    /// Calls that failed.
    pub failed: i64,
    /// Calls still pending or running.
    pub pending_or_running: i64,
}

impl BatchStatus {
    /// Whether every call in the batch has terminated.
    pub fn is_settled(&self) -> bool {
        self.pending_or_running == 0
    }
}

/// Everything needed to resume an execution past its settled batch.
#[derive(Debug, Clone)]
pub struct ResumeContext {
    /// The snapshot to restore.
    pub state: Vec<u8>,
    /// The workflow program text.
    pub code: String,
    /// Terminal outcome per interpreter call id, in call-id order.
    pub results: BTreeMap<i64, CallOutcome>,
}

/// Build the resume result map from the batch's call rows.
///
/// Fails with a status conflict if any call is still non-terminal; callers
/// hold the resuming claim, so that would mean the claim guard is broken.
pub(crate) fn build_resume_results(
    execution_id: &str,
    calls: &[CallRecord],
) -> Result<BTreeMap<i64, CallOutcome>> {
    let mut results = BTreeMap::new();
    for call in calls {
        match call.terminal_outcome()? {
            Some(outcome) => {
                results.insert(call.call_id, outcome);
            }
            None => {
                return Err(EngineError::StatusConflict {
                    execution_id: execution_id.to_string(),
                    expected: "settled batch".to_string(),
                    actual: format!("call {} is {}", call.call_id, call.status),
                });
            }
        }
    }
    Ok(results)
}

/// Transactional store used by the orchestrator and the worker.
///
/// All conditional transitions are optimistic: a single guarded UPDATE whose
/// affected-row count decides the winner, so concurrent workers and call
/// completions can race without corrupting the state machine.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new execution with status `scheduled`.
    async fn create_execution(
        &self,
        execution_id: &str,
        code: &str,
        external_functions: &[String],
        inputs: Option<&Value>,
    ) -> Result<()>;

    /// Fetch one execution by id.
    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// List executions, optionally filtered by status, newest first.
    async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionRecord>>;

    /// Atomically transition the oldest `scheduled` execution to `running`
    /// and return it. Returns `None` when there is nothing to claim.
    async fn claim_scheduled(&self) -> Result<Option<ExecutionRecord>>;

    /// Conditionally transition one execution from `scheduled` to `running`.
    /// Returns false when the execution is absent or not scheduled.
    async fn claim_execution(&self, execution_id: &str) -> Result<bool>;

    /// In one transaction: verify the execution status equals
    /// `expected_status`, write the snapshot, set the current batch, move to
    /// `waiting`, and insert every call of the batch as `pending`.
    ///
    /// Fails with [`EngineError::StatusConflict`] if the status changed.
    async fn save_suspension(
        &self,
        execution_id: &str,
        expected_status: ExecutionStatus,
        state: &[u8],
        resume_group_id: &str,
        calls: &[NewCall],
    ) -> Result<()>;

    /// Terminate one call.
    ///
    /// Idempotent: an identical outcome on an already-terminal call returns
    /// [`CallCompletion::Duplicate`]; a differing outcome fails with
    /// [`EngineError::CallConflict`] and leaves the row unchanged.
    async fn complete_call(
        &self,
        execution_id: &str,
        resume_group_id: &str,
        call_id: i64,
        outcome: &CallOutcome,
    ) -> Result<CallCompletion>;

    /// Aggregate counts over one batch.
    async fn batch_status(&self, resume_group_id: &str) -> Result<BatchStatus>;

    /// Conditionally transition `waiting` to `resuming` iff the current batch
    /// matches and every call in it has terminated. True for exactly one
    /// caller per batch.
    async fn claim_resume(&self, execution_id: &str, resume_group_id: &str) -> Result<bool>;

    /// Load the snapshot, code, and per-call outcomes of the current batch.
    async fn load_for_resume(&self, execution_id: &str) -> Result<ResumeContext>;

    /// Terminal transition from `running`/`resuming` to `completed` or
    /// `failed`; clears the snapshot and the current batch pointer.
    async fn finish(&self, execution_id: &str, termination: &ExecutionTermination) -> Result<()>;

    /// Executions currently suspended on a batch, oldest update first.
    async fn list_waiting_executions(&self, limit: i64) -> Result<Vec<ExecutionRecord>>;

    /// Calls not yet handed to an executor, insertion order.
    async fn list_pending_calls(&self, limit: i64) -> Result<Vec<CallRecord>>;

    /// Record a successful submission: `pending` to `running` plus the job
    /// handle and start time. False when the call is no longer pending.
    async fn mark_call_submitted(&self, row_id: i64, job_handle: &str) -> Result<bool>;

    /// Submitted calls awaiting an outcome, for polling executors.
    async fn list_submitted_calls(&self, limit: i64) -> Result<Vec<CallRecord>>;

    /// All calls of one batch, in call-id order.
    async fn list_batch_calls(
        &self,
        execution_id: &str,
        resume_group_id: &str,
    ) -> Result<Vec<CallRecord>>;

    /// Resolve a webhook job id to its call row.
    async fn find_call_by_job_handle(&self, job_handle: &str) -> Result<Option<CallRecord>>;

    /// Delete an execution and all of its calls in one transaction.
    /// Returns false when the execution did not exist.
    async fn delete_execution(&self, execution_id: &str) -> Result<bool>;

    /// Count executions that have not reached a terminal status.
    async fn count_open_executions(&self) -> Result<i64>;

    /// Cheap connectivity probe.
    async fn health_check(&self) -> Result<bool>;
}
