// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task-queue executor with a pool of consumer tasks.
//!
//! Submit serializes the call (function name, arguments, job handle) onto an
//! in-process queue; consumer tasks look the function up in their own
//! registry handle, run it, and record the outcome for the worker to poll
//! back. The queue stands in for any external task queue with the same
//! shape: dispatch by name, outcome observed by handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::registry::FunctionRegistry;
use crate::store::CallRecord;

use super::{Executor, ExecutorStats, JobStatus};

/// One serialized job on the queue.
#[derive(Debug)]
struct QueuedJob {
    job_handle: String,
    function_name: String,
    args: Vec<Value>,
}

#[derive(Default)]
struct QueueCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Queue-backed executor with `consumers` parallel consumer tasks.
pub struct QueueExecutor {
    sender: mpsc::UnboundedSender<QueuedJob>,
    outcomes: Arc<Mutex<HashMap<String, JobStatus>>>,
    counters: Arc<QueueCounters>,
}

impl QueueExecutor {
    /// Create the executor and spawn its consumer tasks.
    ///
    /// Consumers exit when the executor is dropped (the queue closes).
    pub fn new(registry: FunctionRegistry, consumers: usize) -> Self {
        let registry = Arc::new(registry);
        let outcomes: Arc<Mutex<HashMap<String, JobStatus>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let counters = Arc::new(QueueCounters::default());

        let (sender, receiver) = mpsc::unbounded_channel::<QueuedJob>();
        let receiver = Arc::new(Mutex::new(receiver));

        for consumer_id in 0..consumers.max(1) {
            tokio::spawn(consume(
                consumer_id,
                receiver.clone(),
                registry.clone(),
                outcomes.clone(),
                counters.clone(),
            ));
        }

        Self {
            sender,
            outcomes,
            counters,
        }
    }
}

async fn consume(
    consumer_id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    registry: Arc<FunctionRegistry>,
    outcomes: Arc<Mutex<HashMap<String, JobStatus>>>,
    counters: Arc<QueueCounters>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            debug!(consumer_id, "queue closed, consumer exiting");
            break;
        };

        let outcome = match registry.invoke(&job.function_name, &job.args) {
            Ok(value) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                JobStatus::Completed(value)
            }
            Err(message) => {
                warn!(
                    consumer_id,
                    function = %job.function_name,
                    error = %message,
                    "queued call failed"
                );
                counters.failed.fetch_add(1, Ordering::Relaxed);
                JobStatus::Failed(message)
            }
        };

        outcomes.lock().await.insert(job.job_handle, outcome);
    }
}

#[async_trait::async_trait]
impl Executor for QueueExecutor {
    async fn submit(&self, call: &CallRecord) -> Result<String> {
        let args = call
            .parsed_args()
            .map_err(|e| EngineError::SubmitFailed {
                function_name: call.function_name.clone(),
                reason: format!("malformed arguments: {}", e),
            })?;

        let job_handle = Uuid::new_v4().to_string();
        let job = QueuedJob {
            job_handle: job_handle.clone(),
            function_name: call.function_name.clone(),
            args,
        };

        self.sender
            .send(job)
            .map_err(|_| EngineError::SubmitFailed {
                function_name: call.function_name.clone(),
                reason: "queue is closed".to_string(),
            })?;

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(job_handle)
    }

    async fn poll(&self, job_handle: &str) -> Result<JobStatus> {
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
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn pending_call(function_name: &str, args: &str) -> CallRecord {
        CallRecord {
            id: 1,
            execution_id: "e".to_string(),
            resume_group_id: "g".to_string(),
            call_id: 0,
            function_name: function_name.to_string(),
            args: args.to_string(),
            status: "pending".to_string(),
            result: None,
            error: None,
            job_handle: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    async fn poll_until_settled(executor: &QueueExecutor, handle: &str) -> JobStatus {
        for _ in 0..100 {
            match executor.poll(handle).await.unwrap() {
                JobStatus::Pending => tokio::time::sleep(Duration::from_millis(10)).await,
                settled => return settled,
            }
        }
        panic!("job never settled");
    }

    #[tokio::test]
    async fn test_jobs_flow_through_consumers() {
        let registry = FunctionRegistry::new().with("double", |args: &[Value]| {
            let x = args.first().and_then(Value::as_i64).unwrap();
            Ok(json!(x * 2))
        });
        let executor = QueueExecutor::new(registry, 2);

        let h1 = executor.submit(&pending_call("double", "[2]")).await.unwrap();
        let h2 = executor.submit(&pending_call("double", "[5]")).await.unwrap();

        assert_eq!(
            poll_until_settled(&executor, &h1).await,
            JobStatus::Completed(json!(4))
        );
        assert_eq!(
            poll_until_settled(&executor, &h2).await,
            JobStatus::Completed(json!(10))
        );
        assert_eq!(executor.stats().completed, 2);
    }

    #[tokio::test]
    async fn test_failed_function_reports_failed_job() {
        let registry =
            FunctionRegistry::new().with("boom", |_: &[Value]| Err("kaput".to_string()));
        let executor = QueueExecutor::new(registry, 1);

        let handle = executor.submit(&pending_call("boom", "[]")).await.unwrap();
        assert_eq!(
            poll_until_settled(&executor, &handle).await,
            JobStatus::Failed("kaput".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_handle_is_pending() {
        let executor = QueueExecutor::new(FunctionRegistry::new(), 1);
        assert_eq!(
            executor.poll("nope").await.unwrap(),
            JobStatus::Pending
        );
    }
}
