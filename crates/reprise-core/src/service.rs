// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestrator service: the execution state machine.
//!
//! The service is a stateless façade over the store and the interpreter
//! adapter. Every operation is short, transactional where the state machine
//! requires it, and idempotent under retry; claims lost to concurrent
//! workers are plain no-ops.
//!
//! Legal transitions:
//!
//! ```text
//!                      ┌───────────┐
//!                      │ SCHEDULED │
//!                      └─────┬─────┘
//!                            │ claim (single winner)
//!                            ▼
//!                      ┌───────────┐
//!         interpreter  │  RUNNING  │  interpreter
//!        ┌─────────────┤           ├─────────────┐
//!        │  complete   └─────┬─────┘   raise     │
//!        │                   │ suspend            │
//!        ▼                   ▼                    ▼
//!  ┌───────────┐       ┌───────────┐        ┌────────┐
//!  │ COMPLETED │       │  WAITING  │        │ FAILED │
//!  └───────────┘       └─────┬─────┘        └────────┘
//!        ▲                   │ batch settled, claim (single winner)
//!        │                   ▼
//!        │             ┌───────────┐
//!        └─────────────┤ RESUMING  ├──── suspend again → WAITING
//!           complete   └─────┬─────┘      (fresh batch)
//!                            │ raise
//!                            ▼
//!                       ┌────────┐
//!                       │ FAILED │
//!                       └────────┘
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::interpreter::{CallOutcome, Interpreter, InterpreterError, Outcome};
use crate::store::{
    CallCompletion, ExecutionRecord, ExecutionStatus, ExecutionTermination, NewCall, Store,
};

/// Read-only view of one execution, as returned by poll.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    /// Execution id.
    pub execution_id: String,
    /// Current status text.
    pub status: String,
    /// Final value, when completed.
    pub output: Option<Value>,
    /// Failure description, when failed.
    pub error: Option<String>,
    /// Unterminated calls of the current batch.
    pub pending_calls: Vec<PendingCallView>,
}

/// One unterminated call of the current batch.
#[derive(Debug, Clone, Serialize)]
pub struct PendingCallView {
    /// Interpreter-assigned call id.
    pub call_id: i64,
    /// External function name.
    pub function_name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Call status text (pending or running).
    pub status: String,
}

/// Stateless orchestration façade over store + interpreter.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    interpreter: Arc<dyn Interpreter>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(store: Arc<dyn Store>, interpreter: Arc<dyn Interpreter>) -> Self {
        Self { store, interpreter }
    }

    /// The store this orchestrator writes through.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Schedule a new workflow execution; returns its id.
    ///
    /// Does not invoke the interpreter: a worker picks the execution up.
    #[instrument(skip(self, code, inputs))]
    pub async fn start_execution(
        &self,
        code: &str,
        external_functions: &[String],
        inputs: Option<Value>,
    ) -> Result<String> {
        if code.trim().is_empty() {
            return Err(EngineError::ValidationError {
                field: "code".to_string(),
                message: "workflow code must not be empty".to_string(),
            });
        }
        if external_functions.iter().any(|name| name.is_empty()) {
            return Err(EngineError::ValidationError {
                field: "external_functions".to_string(),
                message: "function names must not be empty".to_string(),
            });
        }

        let execution_id = Uuid::new_v4().to_string();
        self.store
            .create_execution(&execution_id, code, external_functions, inputs.as_ref())
            .await?;

        info!(execution_id = %execution_id, "execution scheduled");
        Ok(execution_id)
    }

    /// Drive one scheduled execution to its first suspension or completion.
    ///
    /// Idempotent: returns false without side effects when the execution is
    /// not in `scheduled` (another worker claimed it, or it already ran).
    #[instrument(skip(self))]
    pub async fn advance(&self, execution_id: &str) -> Result<bool> {
        if !self.store.claim_execution(execution_id).await? {
            debug!(execution_id, "not scheduled; advance is a no-op");
            return Ok(false);
        }

        let record = self.store.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            }
        })?;

        self.run_claimed(&record).await?;
        Ok(true)
    }

    /// Claim the oldest scheduled execution and drive it.
    ///
    /// Worker entry point; returns the id that was processed, if any.
    pub async fn advance_next(&self) -> Result<Option<String>> {
        let Some(record) = self.store.claim_scheduled().await? else {
            return Ok(None);
        };
        let execution_id = record.id.clone();
        self.run_claimed(&record).await?;
        Ok(Some(execution_id))
    }

    /// Record the outcome of one external call.
    ///
    /// Never drives the execution forward itself: the worker observes the
    /// batch settling and triggers resume. When `resume_group_id` is absent
    /// the current batch is assumed. A completion for a batch the execution
    /// already resumed past is recorded for auditing but changes nothing
    /// else.
    #[instrument(skip(self, outcome))]
    pub async fn complete_call(
        &self,
        execution_id: &str,
        resume_group_id: Option<&str>,
        call_id: i64,
        outcome: CallOutcome,
    ) -> Result<CallCompletion> {
        let group = match resume_group_id {
            Some(group) => group.to_string(),
            None => {
                let record = self.store.get_execution(execution_id).await?.ok_or_else(|| {
                    EngineError::ExecutionNotFound {
                        execution_id: execution_id.to_string(),
                    }
                })?;
                record
                    .current_resume_group_id
                    .ok_or_else(|| EngineError::CallNotFound {
                        execution_id: execution_id.to_string(),
                        call_id,
                    })?
            }
        };

        let completion = self
            .store
            .complete_call(execution_id, &group, call_id, &outcome)
            .await?;

        match completion {
            CallCompletion::Applied => {
                debug!(execution_id, call_id, "call outcome recorded");
            }
            CallCompletion::Duplicate => {
                debug!(execution_id, call_id, "duplicate call outcome ignored");
            }
        }
        Ok(completion)
    }

    /// Drive one waiting execution past its settled batch.
    ///
    /// Returns false when the claim is lost or the batch is not settled;
    /// exactly one concurrent caller proceeds per batch.
    #[instrument(skip(self))]
    pub async fn resume(&self, execution_id: &str) -> Result<bool> {
        let record = self.store.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            }
        })?;

        let Some(group) = record.current_resume_group_id.clone() else {
            debug!(execution_id, "no current batch; resume is a no-op");
            return Ok(false);
        };

        if !self.store.claim_resume(execution_id, &group).await? {
            debug!(execution_id, "lost resume claim or batch not settled");
            return Ok(false);
        }

        let context = self.store.load_for_resume(execution_id).await?;
        let outcome = self
            .interpreter
            .resume(&context.state, &context.results)
            .await;

        self.apply_outcome(execution_id, ExecutionStatus::Resuming, outcome)
            .await?;
        Ok(true)
    }

    /// Read-only status snapshot of one execution.
    pub async fn poll(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        let record = self.store.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            }
        })?;
        self.snapshot(&record).await
    }

    /// Read-only snapshots of every known execution, newest first.
    pub async fn poll_all(&self, limit: i64, offset: i64) -> Result<Vec<ExecutionSnapshot>> {
        let records = self.store.list_executions(None, limit, offset).await?;
        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            snapshots.push(self.snapshot(&record).await?);
        }
        Ok(snapshots)
    }

    /// Unterminated calls of the execution's current batch.
    pub async fn get_pending_calls(&self, execution_id: &str) -> Result<Vec<PendingCallView>> {
        let record = self.store.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            }
        })?;
        self.pending_calls(&record).await
    }

    /// Final output of a completed execution.
    ///
    /// Fails with `EXECUTION_FAILED` when the workflow failed and with
    /// `EXECUTION_NOT_TERMINAL` while it is still in flight.
    pub async fn get_result(&self, execution_id: &str) -> Result<Value> {
        let record = self.store.get_execution(execution_id).await?.ok_or_else(|| {
            EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            }
        })?;

        match record.parsed_status()? {
            ExecutionStatus::Completed => Ok(record.parsed_output()?.unwrap_or(Value::Null)),
            ExecutionStatus::Failed => Err(EngineError::ExecutionFailed {
                execution_id: execution_id.to_string(),
                error: record.error.unwrap_or_default(),
            }),
            status => Err(EngineError::ExecutionNotTerminal {
                execution_id: execution_id.to_string(),
                status: status.as_str().to_string(),
            }),
        }
    }

    /// Delete an execution and its calls. Returns false when absent.
    #[instrument(skip(self))]
    pub async fn delete_execution(&self, execution_id: &str) -> Result<bool> {
        let deleted = self.store.delete_execution(execution_id).await?;
        if deleted {
            info!(execution_id, "execution deleted");
        }
        Ok(deleted)
    }

    /// Run the interpreter from the start for a freshly claimed execution.
    async fn run_claimed(&self, record: &ExecutionRecord) -> Result<()> {
        let allowed = record.allowed_functions()?;
        let inputs = record.parsed_inputs()?;

        info!(execution_id = %record.id, "starting execution");
        let outcome = self
            .interpreter
            .start(&record.code, inputs.as_ref(), &allowed)
            .await;

        self.apply_outcome(&record.id, ExecutionStatus::Running, outcome)
            .await
    }

    /// Apply one interpreter outcome via the transition table.
    ///
    /// Loops instead of recursing so a degenerate zero-call batch resumes
    /// immediately within the same service call.
    async fn apply_outcome(
        &self,
        execution_id: &str,
        mut expected: ExecutionStatus,
        mut outcome: std::result::Result<Outcome, InterpreterError>,
    ) -> Result<()> {
        loop {
            match outcome {
                Err(err) => {
                    warn!(execution_id, error = %err, "interpreter raised; failing execution");
                    self.store
                        .finish(execution_id, &ExecutionTermination::Failed(err.message))
                        .await?;
                    return Ok(());
                }
                Ok(Outcome::Complete(value)) => {
                    self.store
                        .finish(execution_id, &ExecutionTermination::Completed(value))
                        .await?;
                    info!(execution_id, "execution completed");
                    return Ok(());
                }
                Ok(Outcome::Suspended { snapshot, calls }) => {
                    let resume_group_id = Uuid::new_v4().to_string();
                    let mut new_calls = Vec::with_capacity(calls.len());
                    for call in &calls {
                        new_calls.push(NewCall {
                            call_id: call.call_id,
                            function_name: call.function_name.clone(),
                            args: serde_json::to_string(&call.args)?,
                        });
                    }

                    self.store
                        .save_suspension(
                            execution_id,
                            expected,
                            &snapshot,
                            &resume_group_id,
                            &new_calls,
                        )
                        .await?;
                    debug!(
                        execution_id,
                        resume_group_id = %resume_group_id,
                        calls = calls.len(),
                        "execution suspended"
                    );

                    if !calls.is_empty() {
                        return Ok(());
                    }

                    // Degenerate empty batch: nothing to wait for.
                    if !self.store.claim_resume(execution_id, &resume_group_id).await? {
                        return Ok(());
                    }
                    let context = self.store.load_for_resume(execution_id).await?;
                    outcome = self
                        .interpreter
                        .resume(&context.state, &context.results)
                        .await;
                    expected = ExecutionStatus::Resuming;
                }
            }
        }
    }

    async fn snapshot(&self, record: &ExecutionRecord) -> Result<ExecutionSnapshot> {
        Ok(ExecutionSnapshot {
            execution_id: record.id.clone(),
            status: record.status.clone(),
            output: record.parsed_output()?,
            error: record.error.clone(),
            pending_calls: self.pending_calls(record).await?,
        })
    }

    async fn pending_calls(&self, record: &ExecutionRecord) -> Result<Vec<PendingCallView>> {
        let Some(group) = &record.current_resume_group_id else {
            return Ok(Vec::new());
        };

        let calls = self.store.list_batch_calls(&record.id, group).await?;
        let mut views = Vec::new();
        for call in calls {
            if call.parsed_status()?.is_terminal() {
                continue;
            }
            views.push(PendingCallView {
                call_id: call.call_id,
                function_name: call.function_name.clone(),
                args: call.parsed_args()?,
                status: call.status.clone(),
            });
        }
        Ok(views)
    }
}
