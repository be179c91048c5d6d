// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for reprise-core.
//!
//! This module provides [`EngineRuntime`] which allows embedding the
//! orchestrator into an existing tokio application: it wires the service,
//! spawns the worker loop, and optionally serves the webhook endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reprise_core::runtime::EngineRuntime;
//! use reprise_core::store::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::from_path(".data/reprise.db").await?);
//!
//!     let runtime = EngineRuntime::builder()
//!         .store(store)
//!         .interpreter(interpreter)
//!         .executor(executor)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let id = runtime
//!         .service()
//!         .start_execution("1 + 2", &[], None)
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::executor::Executor;
use crate::interpreter::Interpreter;
use crate::server::{AppState, serve};
use crate::service::Orchestrator;
use crate::store::Store;
use crate::worker::Worker;

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    interpreter: Option<Arc<dyn Interpreter>>,
    executor: Option<Arc<dyn Executor>>,
    poll_interval: Duration,
    call_batch_limit: i64,
    webhook_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for EngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("interpreter", &self.interpreter.as_ref().map(|_| "..."))
            .field("executor", &self.executor.as_ref().map(|_| "..."))
            .field("poll_interval", &self.poll_interval)
            .field("call_batch_limit", &self.call_batch_limit)
            .field("webhook_addr", &self.webhook_addr)
            .finish()
    }
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            interpreter: None,
            executor: None,
            poll_interval: Duration::from_secs(1),
            call_batch_limit: 50,
            webhook_addr: None,
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the interpreter adapter (required).
    pub fn interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    /// Set the executor (required).
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the worker poll interval.
    ///
    /// Default: 1s
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set how many calls each worker scan picks up.
    ///
    /// Default: 50
    pub fn call_batch_limit(mut self, limit: i64) -> Self {
        self.call_batch_limit = limit;
        self
    }

    /// Serve the webhook endpoint on this address.
    ///
    /// Default: disabled
    pub fn webhook_addr(mut self, addr: SocketAddr) -> Self {
        self.webhook_addr = Some(addr);
        self
    }

    /// Seed pacing and the webhook address from a loaded [`Config`].
    pub fn from_config(mut self, config: &Config) -> Self {
        self.poll_interval = config.poll_interval;
        self.call_batch_limit = config.call_batch_limit;
        self.webhook_addr = config.webhook_addr;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let interpreter = self
            .interpreter
            .ok_or_else(|| anyhow::anyhow!("interpreter is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("executor is required"))?;

        Ok(EngineRuntimeConfig {
            store,
            interpreter,
            executor,
            poll_interval: self.poll_interval,
            call_batch_limit: self.call_batch_limit,
            webhook_addr: self.webhook_addr,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    store: Arc<dyn Store>,
    interpreter: Arc<dyn Interpreter>,
    executor: Arc<dyn Executor>,
    poll_interval: Duration,
    call_batch_limit: i64,
    webhook_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for EngineRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeConfig")
            .field("store", &"...")
            .field("interpreter", &"...")
            .field("executor", &"...")
            .field("poll_interval", &self.poll_interval)
            .field("call_batch_limit", &self.call_batch_limit)
            .field("webhook_addr", &self.webhook_addr)
            .finish()
    }
}

impl EngineRuntimeConfig {
    /// Start the runtime, spawning the worker (and webhook server, when
    /// configured).
    pub async fn start(self) -> Result<EngineRuntime> {
        let service = Arc::new(Orchestrator::new(
            self.store.clone(),
            self.interpreter.clone(),
        ));
        let worker = Worker::new(service.clone(), self.store.clone(), self.executor.clone())
            .with_poll_interval(self.poll_interval)
            .with_call_batch_limit(self.call_batch_limit);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker_handle = tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        });

        let server_handle = match self.webhook_addr {
            Some(addr) => {
                let state = AppState::new(service.clone());
                Some(tokio::spawn(async move {
                    if let Err(e) = serve(addr, state).await {
                        error!(error = %e, "webhook server error");
                    }
                }))
            }
            None => None,
        };

        info!(
            webhook = ?self.webhook_addr,
            poll_interval = ?self.poll_interval,
            "EngineRuntime started"
        );

        Ok(EngineRuntime {
            service,
            store: self.store,
            worker_handle,
            server_handle,
            shutdown_tx,
        })
    }
}

/// A running engine that can be embedded in an application.
///
/// The runtime manages:
/// - the worker loop driving executions forward
/// - the webhook HTTP server, when configured
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EngineRuntime {
    service: Arc<Orchestrator>,
    store: Arc<dyn Store>,
    worker_handle: JoinHandle<()>,
    server_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The orchestrator service, for starting and observing executions.
    pub fn service(&self) -> &Arc<Orchestrator> {
        &self.service
    }

    /// The store backing this runtime.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Check if the worker is still running.
    pub fn is_running(&self) -> bool {
        !self.worker_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the worker to stop after its current tick and waits for it.
    /// The webhook server task, if any, is aborted.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.worker_handle.await {
            error!("worker task panicked: {}", e);
            return Err(anyhow::anyhow!("worker task panicked: {}", e));
        }

        if let Some(server_handle) = self.server_handle {
            server_handle.abort();
            let _ = server_handle.await;
        }

        info!("EngineRuntime shutdown complete");
        Ok(())
    }
}
