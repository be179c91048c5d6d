// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for reprise-core.
//!
//! Provides a unified error type shared by the store, the orchestrator
//! service, and the HTTP surface.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while driving executions.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Execution was not found in the database.
    ExecutionNotFound {
        /// The execution ID that was not found.
        execution_id: String,
    },

    /// A call row was not found for the given coordinates.
    CallNotFound {
        /// The owning execution ID.
        execution_id: String,
        /// The interpreter-assigned call ID.
        call_id: i64,
    },

    /// A conditional status transition lost its race or found the row in an
    /// unexpected state. Benign for callers that merely lost a claim.
    StatusConflict {
        /// The execution ID.
        execution_id: String,
        /// The status the transition required.
        expected: String,
        /// The status actually observed.
        actual: String,
    },

    /// A call was already terminated with a different outcome.
    CallConflict {
        /// The owning execution ID.
        execution_id: String,
        /// The interpreter-assigned call ID.
        call_id: i64,
        /// Description of the mismatch.
        reason: String,
    },

    /// The execution has not reached a terminal status yet.
    ExecutionNotTerminal {
        /// The execution ID.
        execution_id: String,
        /// The status actually observed.
        status: String,
    },

    /// The execution terminated in failure.
    ExecutionFailed {
        /// The execution ID.
        execution_id: String,
        /// The stored error text.
        error: String,
    },

    /// An executor rejected a call at submission time.
    SubmitFailed {
        /// The function the call targets.
        function_name: String,
        /// The reason submission failed.
        reason: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ExecutionNotFound { .. } => "EXECUTION_NOT_FOUND",
            Self::CallNotFound { .. } => "CALL_NOT_FOUND",
            Self::StatusConflict { .. } => "STATUS_CONFLICT",
            Self::CallConflict { .. } => "CALL_CONFLICT",
            Self::ExecutionNotTerminal { .. } => "EXECUTION_NOT_TERMINAL",
            Self::ExecutionFailed { .. } => "EXECUTION_FAILED",
            Self::SubmitFailed { .. } => "SUBMIT_FAILED",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error is a lost optimistic claim rather than a fault.
    ///
    /// Callers racing on conditional transitions treat these as no-ops: the
    /// winning caller is already handling the transition.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::StatusConflict { .. } | Self::CallConflict { .. }
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "Execution '{}' not found", execution_id)
            }
            Self::CallNotFound {
                execution_id,
                call_id,
            } => {
                write!(
                    f,
                    "Call {} not found for execution '{}'",
                    call_id, execution_id
                )
            }
            Self::StatusConflict {
                execution_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Execution '{}' is in conflicting state: expected '{}', got '{}'",
                    execution_id, expected, actual
                )
            }
            Self::CallConflict {
                execution_id,
                call_id,
                reason,
            } => {
                write!(
                    f,
                    "Call {} of execution '{}' already terminated differently: {}",
                    call_id, execution_id, reason
                )
            }
            Self::ExecutionNotTerminal {
                execution_id,
                status,
            } => {
                write!(
                    f,
                    "Execution '{}' has no result yet (status '{}')",
                    execution_id, status
                )
            }
            Self::ExecutionFailed {
                execution_id,
                error,
            } => {
                write!(f, "Execution '{}' failed: {}", execution_id, error)
            }
            Self::SubmitFailed {
                function_name,
                reason,
            } => {
                write!(f, "Failed to submit call to '{}': {}", function_name, reason)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
