// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Cooperative single-threaded task queue for completion delivery

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

type Task = Box<dyn FnOnce() + Send>;

/// FIFO of deferred tasks.
///
/// Hosts queue completion callbacks and stream I/O here instead of running
/// them inline, so a caller always returns before its completion fires.
#[derive(Clone, Default)]
pub struct EventLoop(Arc<Mutex<VecDeque<Task>>>);

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue().push_back(Box::new(task));
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Run one task. Returns false when the queue was empty.
    pub fn turn(&self) -> bool {
        let task = self.queue().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks, including ones queued along the way, until none are left.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.turn() {
            ran += 1;
        }
        ran
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}
