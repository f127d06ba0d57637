// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! A filesystem surface backed by `std::fs`
//!
//! [`StdHost`] exposes the flat callback and synchronous operations, a
//! `promises` sub-surface whose `open` yields file handles, directory handles
//! with asynchronous iteration, read and write streams, and `exists`. All
//! completions are delivered through the host's [`EventLoop`], so callers
//! drive them with [`EventLoop::run_until_idle`].

mod dir;
mod handle;
mod ops;
mod state;
mod surface;

use std::sync::Arc;

use fstrace_host::{EventLoop, Object};

pub use dir::{close_slot, read_slot};

use crate::state::HostState;

pub struct StdHost {
    state: Arc<HostState>,
    fs: Object,
}

impl StdHost {
    pub fn new(event_loop: EventLoop) -> Self {
        let state = HostState::new(event_loop);
        let fs = surface::build(&state);
        StdHost { state, fs }
    }

    /// The surface object to instrument.
    pub fn fs(&self) -> &Object {
        &self.fs
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.state.event_loop
    }

    pub fn open_descriptors(&self) -> usize {
        self.state.open_descriptors()
    }

    pub fn open_dirs(&self) -> usize {
        self.state.open_dirs()
    }
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new(EventLoop::new())
    }
}
