// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory tracer for assertions in tests

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::span::{Span, Tracer};
use crate::tags::Tags;

/// What a [`RecordingTracer`] saw of one span.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub tags: Tags,
    pub error: Option<String>,
    pub finished: bool,
    pub started_seq: u64,
    pub finished_seq: Option<u64>,
}

#[derive(Default)]
struct RecorderState {
    spans: Vec<SpanRecord>,
    seq: u64,
}

impl RecorderState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Records every span it opens.
///
/// Span starts, span finishes, and [`RecordingTracer::mark`] calls draw from
/// one sequence counter, so tests can assert the relative order of a span's
/// lifetime and the completion they observe.
#[derive(Clone)]
pub struct RecordingTracer {
    service: String,
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingTracer {
    pub fn new(service: impl Into<String>) -> Self {
        RecordingTracer {
            service: service.into(),
            state: Arc::new(Mutex::new(RecorderState::default())),
        }
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.state().spans.clone()
    }

    pub fn named(&self, name: &str) -> Vec<SpanRecord> {
        self.state().spans.iter().filter(|s| s.name == name).cloned().collect()
    }

    pub fn last(&self) -> Option<SpanRecord> {
        self.state().spans.last().cloned()
    }

    pub fn open_spans(&self) -> Vec<SpanRecord> {
        self.state().spans.iter().filter(|s| !s.finished).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take a sequence number from the shared counter.
    pub fn mark(&self) -> u64 {
        self.state().next_seq()
    }

    pub fn clear(&self) {
        self.state().spans.clear();
    }

    fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new("recording")
    }
}

impl Tracer for RecordingTracer {
    fn service_name(&self) -> String {
        self.service.clone()
    }

    fn start_span(&self, name: &str, tags: &Tags) -> Box<dyn Span> {
        let mut state = self.state();
        let started_seq = state.next_seq();
        state.spans.push(SpanRecord {
            name: name.to_string(),
            tags: tags.clone(),
            error: None,
            finished: false,
            started_seq,
            finished_seq: None,
        });
        Box::new(RecordingSpan {
            index: state.spans.len() - 1,
            state: self.state.clone(),
        })
    }
}

struct RecordingSpan {
    index: usize,
    state: Arc<Mutex<RecorderState>>,
}

impl RecordingSpan {
    fn with_record(&self, f: impl FnOnce(&mut RecorderState, usize)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.index < state.spans.len() {
            f(&mut state, self.index);
        }
    }
}

impl Span for RecordingSpan {
    fn set_tag(&mut self, key: &str, value: &str) {
        self.with_record(|state, i| {
            state.spans[i].tags.insert(key, value);
        });
    }

    fn set_error(&mut self, message: &str) {
        self.with_record(|state, i| state.spans[i].error = Some(message.to_string()));
    }

    fn finish(self: Box<Self>) {
        self.with_record(|state, i| {
            let seq = state.next_seq();
            let record = &mut state.spans[i];
            record.finished = true;
            record.finished_seq = Some(seq);
        });
    }
}
