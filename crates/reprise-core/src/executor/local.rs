// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process executor that runs functions synchronously on submit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::registry::FunctionRegistry;
use crate::store::CallRecord;

use super::{Executor, ExecutorStats, JobStatus};

/// Executes functions in the worker's process, synchronously during submit.
///
/// The outcome is held in memory until the worker polls it back; the job
/// handle is otherwise unused.
pub struct LocalExecutor {
    registry: Arc<FunctionRegistry>,
    outcomes: Mutex<HashMap<String, JobStatus>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl LocalExecutor {
    /// Create a local executor over the given registry.
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            outcomes: Mutex::new(HashMap::new()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Executor for LocalExecutor {
    async fn submit(&self, call: &CallRecord) -> Result<String> {
        let args = call
            .parsed_args()
            .map_err(|e| EngineError::SubmitFailed {
                function_name: call.function_name.clone(),
                reason: format!("malformed arguments: {}", e),
            })?;

        let job_handle = Uuid::new_v4().to_string();
        self.submitted.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.registry.invoke(&call.function_name, &args) {
            Ok(value) => {
                debug!(function = %call.function_name, "local call completed");
                self.completed.fetch_add(1, Ordering::Relaxed);
                JobStatus::Completed(value)
            }
            Err(message) => {
                warn!(function = %call.function_name, error = %message, "local call failed");
                self.failed.fetch_add(1, Ordering::Relaxed);
                JobStatus::Failed(message)
            }
        };

        self.outcomes.lock().await.insert(job_handle.clone(), outcome);
        Ok(job_handle)
    }

    async fn poll(&self, job_handle: &str) -> Result<JobStatus> {
        // Handles from before a restart are unknown here; report Pending and
        // let completions arrive through complete_call.
        Ok(self
            .outcomes
            .lock()
            .await
            .get(job_handle)
            .cloned()
            .unwrap_or(JobStatus::Pending))
    }

    fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
