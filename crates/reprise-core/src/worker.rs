// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker loop driving executions forward.
//!
//! A worker holds no durable state of its own. Each tick it claims and
//! advances scheduled executions, submits freshly recorded calls to the
//! executor, polls submitted jobs when the executor supports it, and resumes
//! waiting executions whose batch has settled. Any number of workers may run
//! against the same store; every transition they race on is single-winner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::executor::{Executor, JobStatus};
use crate::interpreter::CallOutcome;
use crate::service::Orchestrator;
use crate::store::Store;

/// Counts of what one tick accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Scheduled executions advanced.
    pub started: usize,
    /// Calls submitted to the executor.
    pub submitted: usize,
    /// Call outcomes collected from polling.
    pub collected: usize,
    /// Waiting executions resumed.
    pub resumed: usize,
}

impl TickSummary {
    /// Whether the tick moved anything at all.
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodic driver over one store, one service, and one executor.
pub struct Worker {
    service: Arc<Orchestrator>,
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    poll_interval: Duration,
    call_batch_limit: i64,
}

impl Worker {
    /// Create a worker with default pacing (1s interval, 50 calls per scan).
    pub fn new(
        service: Arc<Orchestrator>,
        store: Arc<dyn Store>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            service,
            store,
            executor,
            poll_interval: Duration::from_secs(1),
            call_batch_limit: 50,
        }
    }

    /// Set the sleep between ticks.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set how many calls each scan picks up.
    pub fn with_call_batch_limit(mut self, limit: i64) -> Self {
        self.call_batch_limit = limit.max(1);
        self
    }

    /// Run until the shutdown channel flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("worker started");
        loop {
            match self.run_once().await {
                Ok(summary) if !summary.is_idle() => {
                    debug!(?summary, "worker tick");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "worker tick failed");
                }
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    match changed {
                        Ok(()) => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                        // Sender dropped: treat as shutdown.
                        Err(_) => break,
                    }
                }

                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("worker stopped");
    }

    /// Run a single tick: advance, submit, poll, resume.
    pub async fn run_once(&self) -> Result<TickSummary> {
        let started = self.start_scheduled().await;
        let submitted = self.submit_pending_calls().await?;
        let collected = self.poll_submitted_calls().await?;
        let resumed = self.resume_ready().await?;

        Ok(TickSummary {
            started,
            submitted,
            collected,
            resumed,
        })
    }

    /// Tick repeatedly until every known execution is terminal.
    ///
    /// Only meaningful with executors that settle their own jobs (local,
    /// queue); with a push executor an unfinished call would spin forever.
    pub async fn run_until_idle(&self) -> Result<()> {
        while self.store.count_open_executions().await? > 0 {
            self.run_once().await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn start_scheduled(&self) -> usize {
        let mut started = 0;
        loop {
            match self.service.advance_next().await {
                Ok(Some(execution_id)) => {
                    debug!(execution_id = %execution_id, "advanced scheduled execution");
                    started += 1;
                }
                Ok(None) => break,
                Err(e) if e.is_conflict() => {
                    debug!(error = %e, "lost a claim while advancing; yielding");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to advance a scheduled execution");
                    break;
                }
            }
        }
        started
    }

    async fn submit_pending_calls(&self) -> Result<usize> {
        let calls = self.store.list_pending_calls(self.call_batch_limit).await?;
        let mut submitted = 0;

        for call in calls {
            match self.executor.submit(&call).await {
                Ok(job_handle) => {
                    if self.store.mark_call_submitted(call.id, &job_handle).await? {
                        submitted += 1;
                    } else {
                        debug!(
                            execution_id = %call.execution_id,
                            call_id = call.call_id,
                            "call no longer pending; submission bookkeeping skipped"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        execution_id = %call.execution_id,
                        call_id = call.call_id,
                        error = %e,
                        "submission failed; failing call"
                    );
                    let failed = CallOutcome::Failed(e.to_string());
                    if let Err(complete_err) = self
                        .service
                        .complete_call(
                            &call.execution_id,
                            Some(&call.resume_group_id),
                            call.call_id,
                            failed,
                        )
                        .await
                    {
                        error!(
                            execution_id = %call.execution_id,
                            call_id = call.call_id,
                            error = %complete_err,
                            "failed to record submission failure"
                        );
                    }
                }
            }
        }

        Ok(submitted)
    }

    async fn poll_submitted_calls(&self) -> Result<usize> {
        if !self.executor.supports_polling() {
            return Ok(0);
        }

        let calls = self.store.list_submitted_calls(self.call_batch_limit).await?;
        let mut collected = 0;

        for call in calls {
            let Some(job_handle) = call.job_handle.as_deref() else {
                continue;
            };

            let status = match self.executor.poll(job_handle).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        execution_id = %call.execution_id,
                        call_id = call.call_id,
                        error = %e,
                        "executor poll failed"
                    );
                    continue;
                }
            };

            let outcome = match status {
                JobStatus::Pending => continue,
                JobStatus::Completed(value) => CallOutcome::Completed(value),
                JobStatus::Failed(message) => CallOutcome::Failed(message),
            };

            match self
                .service
                .complete_call(
                    &call.execution_id,
                    Some(&call.resume_group_id),
                    call.call_id,
                    outcome,
                )
                .await
            {
                Ok(_) => collected += 1,
                Err(e) if e.is_conflict() => {
                    debug!(
                        execution_id = %call.execution_id,
                        call_id = call.call_id,
                        error = %e,
                        "call already terminated differently"
                    );
                }
                Err(e) => {
                    error!(
                        execution_id = %call.execution_id,
                        call_id = call.call_id,
                        error = %e,
                        "failed to record polled outcome"
                    );
                }
            }
        }

        Ok(collected)
    }

    async fn resume_ready(&self) -> Result<usize> {
        let waiting = self
            .store
            .list_waiting_executions(self.call_batch_limit)
            .await?;
        let mut resumed = 0;

        for execution in waiting {
            let Some(group) = execution.current_resume_group_id.as_deref() else {
                continue;
            };

            let batch = self.store.batch_status(group).await?;
            if !batch.is_settled() {
                continue;
            }

            match self.service.resume(&execution.id).await {
                Ok(true) => resumed += 1,
                Ok(false) => {
                    debug!(execution_id = %execution.id, "another worker resumed first");
                }
                Err(e) if e.is_conflict() => {
                    debug!(execution_id = %execution.id, error = %e, "resume claim conflicted");
                }
                Err(e) => {
                    error!(execution_id = %execution.id, error = %e, "resume failed");
                }
            }
        }

        Ok(resumed)
    }
}
