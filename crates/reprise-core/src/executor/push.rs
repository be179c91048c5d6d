// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Push-based executor for remote compute.
//!
//! Submit hands the serialized call to a caller-supplied channel; whatever
//! transport drains that channel (task queue bridge, cloud RPC, plain HTTP
//! client) is outside the engine. The remote side reports back by POSTing to
//! the webhook endpoint with the job handle, so this executor never supports
//! polling.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::store::CallRecord;

use super::{Executor, ExecutorStats, JobStatus};

/// A call handed to the remote transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchedCall {
    /// Handle the remote side must echo in its webhook completion.
    pub job_handle: String,
    /// Owning execution.
    pub execution_id: String,
    /// Batch the call belongs to.
    pub resume_group_id: String,
    /// Interpreter-assigned call id within the batch.
    pub call_id: i64,
    /// External function name.
    pub function_name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

/// Executor that forwards calls to a remote system and never polls.
pub struct PushExecutor {
    sink: mpsc::UnboundedSender<DispatchedCall>,
    submitted: AtomicU64,
}

impl PushExecutor {
    /// Create a push executor writing into the given sink.
    pub fn new(sink: mpsc::UnboundedSender<DispatchedCall>) -> Self {
        Self {
            sink,
            submitted: AtomicU64::new(0),
        }
    }

    /// Convenience constructor returning the executor and the receiving end
    /// the transport adapter should drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchedCall>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

#[async_trait::async_trait]
impl Executor for PushExecutor {
    async fn submit(&self, call: &CallRecord) -> Result<String> {
        let args = call
            .parsed_args()
            .map_err(|e| EngineError::SubmitFailed {
                function_name: call.function_name.clone(),
                reason: format!("malformed arguments: {}", e),
            })?;

        let job_handle = Uuid::new_v4().to_string();
        let dispatched = DispatchedCall {
            job_handle: job_handle.clone(),
            execution_id: call.execution_id.clone(),
            resume_group_id: call.resume_group_id.clone(),
            call_id: call.call_id,
            function_name: call.function_name.clone(),
            args,
        };

        self.sink
            .send(dispatched)
            .map_err(|_| EngineError::SubmitFailed {
                function_name: call.function_name.clone(),
                reason: "dispatch channel is closed".to_string(),
            })?;

        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(job_handle)
    }

    fn supports_polling(&self) -> bool {
        false
    }

    async fn poll(&self, _job_handle: &str) -> Result<JobStatus> {
        // Completions arrive through the webhook; there is nothing to poll.
        Ok(JobStatus::Pending)
    }

    fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: 0,
            failed: 0,
        }
    }
}
