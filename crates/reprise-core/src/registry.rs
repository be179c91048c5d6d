// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-local function registry for in-process executors.
//!
//! The registry maps external function names to host callables. It is built
//! explicitly by the application before the worker runs and handed to the
//! executors that run user functions in this process. The orchestrator never
//! consults it; the capability list an execution carries is the only thing
//! the engine knows about external functions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// A host function callable from workflows.
///
/// Takes the positional arguments the interpreter recorded and returns a
/// structured value or an error message.
pub type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Explicit mapping from external function name to callable.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, HostFunction>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under the given name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    /// Look up a function by name.
    pub fn get(&self, name: &str) -> Option<HostFunction> {
        self.functions.get(name).cloned()
    }

    /// Whether a function with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Run the named function, or fail when it is not registered.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, String> {
        match self.get(name) {
            Some(function) => function(args),
            None => Err(format!("function '{}' is not registered", name)),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
