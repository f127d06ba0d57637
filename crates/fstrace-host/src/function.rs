// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Callable members and the call frames they receive

use std::fmt;
use std::sync::Arc;

use crate::error::HostResult;
use crate::object::Object;
use crate::value::Value;

type Body = dyn Fn(Call) -> HostResult<Value> + Send + Sync;

/// A named host function.
///
/// Cloning shares the body; [`Function::ptr_eq`] tells whether two handles
/// refer to the same implementation, which is how a restored member is
/// checked against the one it replaced.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    body: Arc<Body>,
}

impl Function {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Call) -> HostResult<Value> + Send + Sync + 'static,
    {
        Function {
            name: Arc::from(name.into()),
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, call: Call) -> HostResult<Value> {
        (self.body)(call)
    }

    /// Plain function call without a receiver.
    pub fn apply(&self, args: Vec<Value>) -> HostResult<Value> {
        self.call(Call::function(args))
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

/// How a function was reached.
#[derive(Clone, Debug, Default)]
pub enum Receiver {
    /// Called as a free function.
    #[default]
    Unbound,
    /// Called as a method; the object is the implicit receiver.
    Method(Object),
}

/// Arguments of a single invocation.
#[derive(Clone, Debug, Default)]
pub struct Call {
    pub receiver: Receiver,
    pub args: Vec<Value>,
}

static UNDEFINED: Value = Value::Undefined;

impl Call {
    pub fn function(args: Vec<Value>) -> Self {
        Call {
            receiver: Receiver::Unbound,
            args,
        }
    }

    pub fn method(receiver: Object, args: Vec<Value>) -> Self {
        Call {
            receiver: Receiver::Method(receiver),
            args,
        }
    }

    /// Positional argument, `Undefined` when absent.
    pub fn arg(&self, index: usize) -> &Value {
        self.args.get(index).unwrap_or(&UNDEFINED)
    }

    pub fn last_arg(&self) -> &Value {
        self.args.last().unwrap_or(&UNDEFINED)
    }

    pub fn receiver_object(&self) -> Option<&Object> {
        match &self.receiver {
            Receiver::Method(object) => Some(object),
            Receiver::Unbound => None,
        }
    }
}
