// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Interpreter adapter seam.
//!
//! The sandboxed interpreter is an external collaborator; this module defines
//! the contract the orchestrator consumes from it. The interpreter runs a
//! workflow program until it either produces a value or suspends with a
//! snapshot of its entire execution state plus the batch of external calls it
//! is waiting on. Snapshots are opaque byte strings: only the adapter that
//! produced one may interpret it, and only with the interpreter version that
//! wrote it.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

/// A single external function call requested at a suspension point.
///
/// Call ids are assigned by the interpreter and are unique only within one
/// [`Outcome`].
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    /// Interpreter-assigned id, unique within the batch.
    pub call_id: i64,
    /// Name of the external function; always one of the allowed functions
    /// the execution was started with.
    pub function_name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

/// Terminal outcome of one external call, as injected back on resume.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The call produced a value.
    Completed(Value),
    /// The call failed; the interpreter may catch or propagate.
    Failed(String),
}

/// Result of driving the interpreter forward.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The workflow ran to completion and produced its final value.
    Complete(Value),
    /// The workflow suspended waiting on a batch of external calls.
    Suspended {
        /// Opaque serialized execution state to resume from later.
        snapshot: Vec<u8>,
        /// The calls that must terminate before the workflow can continue.
        /// May be empty, in which case the workflow is immediately resumable.
        calls: Vec<PendingCall>,
    },
}

/// Error raised by the interpreter while running workflow code.
///
/// Covers both user-code exceptions and snapshots the current interpreter
/// cannot restore. Either way the execution is failed without retry.
#[derive(Debug, Clone)]
pub struct InterpreterError {
    /// Human-readable description, stored on the failed execution.
    pub message: String,
}

impl InterpreterError {
    /// Create a new interpreter error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for InterpreterError {}

/// The sandboxed interpreter, presented as a pure function over
/// (code, state, inputs, results).
///
/// Both operations may take arbitrary time; the orchestrator never invokes
/// them while holding a database transaction.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Run `code` from the beginning.
    ///
    /// Stubs are installed for every name in `allowed_functions`; invoking
    /// one records a pending call and suspends at the next concurrency
    /// boundary instead of executing anything.
    async fn start(
        &self,
        code: &str,
        inputs: Option<&Value>,
        allowed_functions: &[String],
    ) -> Result<Outcome, InterpreterError>;

    /// Restore from `snapshot`, inject one [`CallOutcome`] per call id, and
    /// drive execution to the next outcome.
    ///
    /// A [`CallOutcome::Failed`] entry surfaces inside the workflow as an
    /// in-language exception; whether the workflow catches it decides whether
    /// the execution eventually completes or fails.
    async fn resume(
        &self,
        snapshot: &[u8],
        results: &BTreeMap<i64, CallOutcome>,
    ) -> Result<Outcome, InterpreterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_error_display() {
        let err = InterpreterError::new("NameError: name 'x' is not defined");
        assert_eq!(err.to_string(), "NameError: name 'x' is not defined");
    }

    #[test]
    fn test_outcome_equality() {
        let a = Outcome::Suspended {
            snapshot: vec![1, 2, 3],
            calls: vec![PendingCall {
                call_id: 0,
                function_name: "process".to_string(),
                args: vec![Value::from("a")],
            }],
        };
        assert_eq!(a, a.clone());
        assert_ne!(a, Outcome::Complete(Value::Null));
    }
}
