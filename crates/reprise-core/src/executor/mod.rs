// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pluggable call dispatchers.
//!
//! An executor takes one submitted [`CallRecord`](crate::store::CallRecord)
//! and eventually produces an outcome for it. Poll-based executors surface
//! outcomes through [`Executor::poll`]; push-based executors report
//! `Pending` forever and deliver outcomes out of band through the webhook
//! endpoint. Either way the outcome reaches the store exclusively through
//! the orchestrator's `complete_call`.

pub mod local;
pub mod push;
pub mod queue;

pub use self::local::LocalExecutor;
pub use self::push::{DispatchedCall, PushExecutor};
pub use self::queue::QueueExecutor;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::store::CallRecord;

/// Status of one submitted job, as reported by a polling executor.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// No outcome yet. Push-only executors report this forever; recovery
    /// after a lost job goes through `complete_call`, never through poll.
    Pending,
    /// The function produced a value.
    Completed(Value),
    /// The function (or its dispatch) failed.
    Failed(String),
}

/// Diagnostic counters for one executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Calls accepted by submit.
    pub submitted: u64,
    /// Calls that produced a value.
    pub completed: u64,
    /// Calls that failed.
    pub failed: u64,
}

/// Dispatcher for individual external calls.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Dispatch one call; returns an opaque job handle.
    ///
    /// A submission error is terminal for the call: the worker records it as
    /// an immediate call failure.
    async fn submit(&self, call: &CallRecord) -> Result<String>;

    /// Whether outcomes can be observed through [`poll`](Self::poll).
    ///
    /// Push-based executors return false; the worker then never polls and
    /// completions arrive through the webhook endpoint instead.
    fn supports_polling(&self) -> bool {
        true
    }

    /// Report the status of a previously submitted job.
    async fn poll(&self, job_handle: &str) -> Result<JobStatus>;

    /// Diagnostic counters.
    fn stats(&self) -> ExecutorStats;
}
