// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared, cloneable completion of an asynchronous host call

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{HostError, HostResult};
use crate::value::Value;

/// Eventual result of an asynchronous host call.
///
/// The underlying work runs when the promise is first polled; every clone
/// observes the same settlement.
#[derive(Clone)]
pub struct Promise(Shared<BoxFuture<'static, HostResult<Value>>>);

impl Promise {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = HostResult<Value>> + Send + 'static,
    {
        Promise(future.boxed().shared())
    }

    pub fn resolve(value: Value) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    pub fn reject(error: HostError) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    pub fn settle(result: HostResult<Value>) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// Settlement, if it already happened.
    pub fn peek(&self) -> Option<&HostResult<Value>> {
        self.0.peek()
    }

    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }

    /// Drive the promise to settlement on the current thread.
    pub fn wait(&self) -> HostResult<Value> {
        futures::executor::block_on(self.clone())
    }
}

impl Future for Promise {
    type Output = HostResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx)
    }
}
