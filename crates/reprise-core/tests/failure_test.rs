// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failure-path tests: call errors surfaced into the workflow, unhandled
//! failures, interpreter raises, and submission errors.

mod common;

use std::sync::Arc;

use serde_json::{Value, json};

use common::*;
use reprise_core::executor::{LocalExecutor, PushExecutor};
use reprise_core::interpreter::CallOutcome;
use reprise_core::registry::FunctionRegistry;

fn boom_registry() -> FunctionRegistry {
    FunctionRegistry::new().with("boom", |_: &[Value]| Err("boom".to_string()))
}

/// Workflow that awaits boom() inside a try/except and catches the failure.
fn catching_interpreter() -> ScriptedInterpreter {
    ScriptedInterpreter::new(|_| ScriptedOutcome::Suspend(vec![pending(0, "boom", vec![])]))
        .on_resume(|results| match results.get(&0) {
            Some(CallOutcome::Failed(_)) => ScriptedOutcome::Complete(json!("caught")),
            Some(CallOutcome::Completed(_)) => ScriptedOutcome::Complete(json!("ok")),
            None => ScriptedOutcome::Fail("missing result for call 0".to_string()),
        })
}

/// Workflow that awaits boom() bare, so the failure propagates.
fn propagating_interpreter() -> ScriptedInterpreter {
    ScriptedInterpreter::new(|_| ScriptedOutcome::Suspend(vec![pending(0, "boom", vec![])]))
        .on_resume(|results| match results.get(&0) {
            Some(CallOutcome::Failed(error)) => ScriptedOutcome::Fail(error.clone()),
            Some(CallOutcome::Completed(value)) => ScriptedOutcome::Complete(value.clone()),
            None => ScriptedOutcome::Fail("missing result for call 0".to_string()),
        })
}

#[tokio::test]
async fn test_call_failure_surfaces_to_workflow() {
    let ctx = TestContext::new().await;
    let service = ctx.service(Arc::new(catching_interpreter()));

    let execution_id = service
        .start_execution(
            "try: await boom(); return \"ok\"\nexcept: return \"caught\"",
            &["boom".to_string()],
            None,
        )
        .await
        .expect("failed to schedule");

    let worker = ctx.worker(
        service.clone(),
        Arc::new(LocalExecutor::new(boom_registry())),
    );
    worker.run_until_idle().await.expect("worker failed");

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "completed");
    assert_eq!(record.parsed_output().unwrap(), Some(json!("caught")));
    assert_eq!(record.error, None);

    let calls = ctx.all_call_rows(&execution_id).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, "failed");
    assert_eq!(calls[0].error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_unhandled_call_failure_fails_the_execution() {
    let ctx = TestContext::new().await;
    let service = ctx.service(Arc::new(propagating_interpreter()));

    let execution_id = service
        .start_execution("await boom()", &["boom".to_string()], None)
        .await
        .expect("failed to schedule");

    let worker = ctx.worker(
        service.clone(),
        Arc::new(LocalExecutor::new(boom_registry())),
    );
    worker.run_until_idle().await.expect("worker failed");

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "failed");
    assert_eq!(record.output, None);
    let error = record.error.expect("failed execution must carry an error");
    assert!(!error.is_empty());

    let err = service.get_result(&execution_id).await.unwrap_err();
    assert_eq!(err.error_code(), "EXECUTION_FAILED");
}

#[tokio::test]
async fn test_interpreter_raise_at_start_fails_the_execution() {
    let ctx = TestContext::new().await;
    let interpreter = ScriptedInterpreter::new(|_| {
        ScriptedOutcome::Fail("NameError: name 'frobnicate' is not defined".to_string())
    });
    let service = ctx.service(Arc::new(interpreter));

    let execution_id = service
        .start_execution("frobnicate()", &[], None)
        .await
        .expect("failed to schedule");
    service.advance(&execution_id).await.expect("advance failed");

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "failed");
    assert_eq!(
        record.error.as_deref(),
        Some("NameError: name 'frobnicate' is not defined")
    );
    assert_eq!(ctx.count_calls(&execution_id).await, 0);
}

#[tokio::test]
async fn test_submission_error_fails_the_call() {
    let ctx = TestContext::new().await;
    let service = ctx.service(Arc::new(catching_interpreter()));

    let execution_id = service
        .start_execution("await boom()", &["boom".to_string()], None)
        .await
        .expect("failed to schedule");

    // A push executor whose transport is gone rejects every submission.
    let (executor, receiver) = PushExecutor::channel();
    drop(receiver);

    let worker = ctx.worker(service.clone(), Arc::new(executor));
    worker.run_until_idle().await.expect("worker failed");

    let calls = ctx.all_call_rows(&execution_id).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, "failed");
    let error = calls[0].error.as_deref().unwrap_or_default();
    assert!(error.contains("Failed to submit"), "got: {error}");

    // The workflow caught the failure and still completed.
    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "completed");
    assert_eq!(record.parsed_output().unwrap(), Some(json!("caught")));
}

#[tokio::test]
async fn test_validation_rejects_empty_code() {
    let ctx = TestContext::new().await;
    let service = ctx.service(Arc::new(ScriptedInterpreter::completes(json!(null))));

    let err = service
        .start_execution("   ", &[], None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    let err = service
        .start_execution("1 + 2", &["".to_string()], None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}
