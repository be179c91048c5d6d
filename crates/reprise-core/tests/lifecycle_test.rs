// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end lifecycle tests: completion, single batch, nested batches.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};

use common::*;
use reprise_core::executor::LocalExecutor;
use reprise_core::interpreter::Interpreter;
use reprise_core::registry::FunctionRegistry;

#[tokio::test]
async fn test_immediate_completion() {
    let ctx = TestContext::new().await;
    let service = ctx.service(Arc::new(ScriptedInterpreter::completes(json!(3))));

    let execution_id = service
        .start_execution("1 + 2", &[], None)
        .await
        .expect("failed to schedule");
    assert_eq!(ctx.execution_status(&execution_id).await, "scheduled");

    // One advance runs scheduled -> running -> completed in one service call.
    assert!(service.advance(&execution_id).await.expect("advance failed"));

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "completed");
    assert_eq!(record.parsed_output().unwrap(), Some(json!(3)));
    assert_eq!(record.state, None);
    assert_eq!(record.current_resume_group_id, None);
    assert_eq!(ctx.count_calls(&execution_id).await, 0);

    assert_eq!(service.get_result(&execution_id).await.unwrap(), json!(3));
}

fn gather_interpreter() -> ScriptedInterpreter {
    ScriptedInterpreter::new(|_| {
        ScriptedOutcome::Suspend(vec![
            pending(0, "process", vec![json!("a")]),
            pending(1, "process", vec![json!("b")]),
            pending(2, "process", vec![json!("c")]),
        ])
    })
    .on_resume(|results| {
        ScriptedOutcome::Complete(json!([
            completed_value(results, 0),
            completed_value(results, 1),
            completed_value(results, 2),
        ]))
    })
}

fn process_registry() -> FunctionRegistry {
    FunctionRegistry::new().with("process", |args: &[Value]| {
        let x = args
            .first()
            .and_then(Value::as_str)
            .ok_or("process expects a string")?;
        Ok(json!(format!("p_{x}")))
    })
}

#[tokio::test]
async fn test_single_batch_of_three_parallel_calls() {
    let ctx = TestContext::new().await;
    let service = ctx.service(Arc::new(gather_interpreter()));

    let execution_id = service
        .start_execution(
            "gather(process('a'), process('b'), process('c'))",
            &["process".to_string()],
            None,
        )
        .await
        .expect("failed to schedule");

    // Drive to the first suspension without a worker.
    assert!(service.advance(&execution_id).await.expect("advance failed"));

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "waiting");
    assert!(record.state.is_some());
    let group = record
        .current_resume_group_id
        .clone()
        .expect("waiting execution must have a current batch");

    let calls = ctx.all_call_rows(&execution_id).await;
    assert_eq!(calls.len(), 3);
    for call in &calls {
        assert_eq!(call.status, "pending");
        assert_eq!(call.resume_group_id, group);
        assert_eq!(call.function_name, "process");
    }

    // A worker with the local executor completes the batch and resumes.
    let worker = ctx.worker(
        service.clone(),
        Arc::new(LocalExecutor::new(process_registry())),
    );
    worker.run_until_idle().await.expect("worker failed");

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "completed");
    assert_eq!(
        record.parsed_output().unwrap(),
        Some(json!(["p_a", "p_b", "p_c"]))
    );
    assert_eq!(record.state, None);
    assert_eq!(record.current_resume_group_id, None);

    let calls = ctx.all_call_rows(&execution_id).await;
    assert!(calls.iter().all(|c| c.status == "completed"));
}

#[tokio::test]
async fn test_nested_gather_uses_two_batches() {
    let ctx = TestContext::new().await;

    // xs = gather(f(1), f(2), f(3)); ys = gather(g(xs[0]), g(xs[1]), g(xs[2]))
    let interpreter = ScriptedInterpreter::new(|_| {
        ScriptedOutcome::Suspend(vec![
            pending(0, "f", vec![json!(1)]),
            pending(1, "f", vec![json!(2)]),
            pending(2, "f", vec![json!(3)]),
        ])
    })
    .on_resume(|results| {
        ScriptedOutcome::Suspend(
            (0..3)
                .map(|i| pending(i, "g", vec![completed_value(results, i)]))
                .collect(),
        )
    })
    .on_resume(|results| {
        ScriptedOutcome::Complete(json!([
            completed_value(results, 0),
            completed_value(results, 1),
            completed_value(results, 2),
        ]))
    });

    let registry = FunctionRegistry::new()
        .with("f", |args: &[Value]| {
            Ok(json!(args.first().and_then(Value::as_i64).ok_or("int")? + 1))
        })
        .with("g", |args: &[Value]| {
            Ok(json!(args.first().and_then(Value::as_i64).ok_or("int")? * 2))
        });

    let service = ctx.service(Arc::new(interpreter));
    let execution_id = service
        .start_execution(
            "xs = gather(f(1), f(2), f(3)); ys = gather(g(xs[0]), g(xs[1]), g(xs[2])); ys",
            &["f".to_string(), "g".to_string()],
            None,
        )
        .await
        .expect("failed to schedule");

    let worker = ctx.worker(service.clone(), Arc::new(LocalExecutor::new(registry)));
    worker.run_until_idle().await.expect("worker failed");

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "completed");
    assert_eq!(record.parsed_output().unwrap(), Some(json!([4, 6, 8])));

    // Two distinct resume groups were created in sequence.
    let calls = ctx.all_call_rows(&execution_id).await;
    assert_eq!(calls.len(), 6);
    let groups: HashSet<&str> = calls.iter().map(|c| c.resume_group_id.as_str()).collect();
    assert_eq!(groups.len(), 2);
    assert!(calls.iter().all(|c| c.status == "completed"));
}

#[tokio::test]
async fn test_zero_call_batch_resumes_immediately() {
    let ctx = TestContext::new().await;

    // A degenerate suspension with no calls must not strand the execution.
    let interpreter = ScriptedInterpreter::new(|_| ScriptedOutcome::Suspend(Vec::new()))
        .on_resume(|_| ScriptedOutcome::Complete(json!(42)));
    let service = ctx.service(Arc::new(interpreter));

    let execution_id = service
        .start_execution("noop()", &[], None)
        .await
        .expect("failed to schedule");

    // No worker: advance alone must carry the execution to completion.
    assert!(service.advance(&execution_id).await.expect("advance failed"));

    let record = ctx.execution(&execution_id).await;
    assert_eq!(record.status, "completed");
    assert_eq!(record.parsed_output().unwrap(), Some(json!(42)));
    assert_eq!(ctx.count_calls(&execution_id).await, 0);
}

#[tokio::test]
async fn test_inputs_reach_the_interpreter() {
    let ctx = TestContext::new().await;

    let interpreter = ScriptedInterpreter::new(|inputs: Option<&Value>| {
        let name = inputs
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("nobody");
        ScriptedOutcome::Complete(json!(format!("hello {name}")))
    });
    let service = ctx.service(Arc::new(interpreter));

    let execution_id = service
        .start_execution("greet(name)", &[], Some(json!({ "name": "ada" })))
        .await
        .expect("failed to schedule");
    service.advance(&execution_id).await.expect("advance failed");

    assert_eq!(
        service.get_result(&execution_id).await.unwrap(),
        json!("hello ada")
    );
}

#[tokio::test]
async fn test_snapshot_round_trip_matches_inline_run() {
    // Starting, then resuming from the emitted snapshot with the right
    // results, must be indistinguishable from an unbroken run.
    let interpreter = gather_interpreter();

    let outcome = interpreter
        .start("gather(...)", None, &["process".to_string()])
        .await
        .expect("start failed");

    let reprise_core::interpreter::Outcome::Suspended { snapshot, calls } = outcome else {
        panic!("expected suspension");
    };
    assert_eq!(calls.len(), 3);

    let results = calls
        .iter()
        .map(|call| {
            let x = call.args[0].as_str().unwrap();
            (
                call.call_id,
                reprise_core::interpreter::CallOutcome::Completed(json!(format!("p_{x}"))),
            )
        })
        .collect();

    let resumed = interpreter
        .resume(&snapshot, &results)
        .await
        .expect("resume failed");
    assert_eq!(
        resumed,
        reprise_core::interpreter::Outcome::Complete(json!(["p_a", "p_b", "p_c"]))
    );
}
