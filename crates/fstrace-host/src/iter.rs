// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Asynchronous iteration over host-provided sources

use std::sync::Arc;

use crate::error::HostResult;
use crate::promise::Promise;
use crate::value::Value;

/// Producer behind an [`AsyncIter`].
pub trait AsyncSource: Send + Sync {
    /// Next item; settles to `Null` once the source is exhausted.
    fn next(&self) -> Promise;

    /// Stop early and release the underlying resource.
    fn close(&self) -> Promise;
}

#[derive(Clone)]
pub struct AsyncIter(Arc<dyn AsyncSource>);

impl AsyncIter {
    pub fn new(source: impl AsyncSource + 'static) -> Self {
        AsyncIter(Arc::new(source))
    }

    /// `None` once exhausted.
    pub async fn next(&self) -> Option<HostResult<Value>> {
        match self.0.next().await {
            Ok(Value::Null) => None,
            other => Some(other),
        }
    }

    pub async fn close(&self) -> HostResult<Value> {
        self.0.close().await
    }

    /// Drain every item, stopping at the first error.
    pub async fn collect(&self) -> HostResult<Vec<Value>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}
