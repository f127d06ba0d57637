// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tracer that reports spans through the `tracing` ecosystem

use std::time::Instant;

use tracing::{debug, info_span};

use crate::span::{Span, Tracer};
use crate::tags::Tags;

pub const SPAN_TARGET: &str = "fstrace::span";

/// Emits one `tracing` span per traced call, plus a debug event carrying the
/// elapsed time and error (if any) when the call completes.
#[derive(Clone, Debug)]
pub struct TracingTracer {
    service: String,
}

impl TracingTracer {
    pub fn new(service: impl Into<String>) -> Self {
        TracingTracer {
            service: service.into(),
        }
    }
}

impl Tracer for TracingTracer {
    fn service_name(&self) -> String {
        self.service.clone()
    }

    fn start_span(&self, name: &str, tags: &Tags) -> Box<dyn Span> {
        let span = info_span!(
            target: SPAN_TARGET,
            "fs_call",
            otel.name = %name,
            service = %tags.get("service.name").unwrap_or(self.service.as_str()),
            resource = %tags.get("resource.name").unwrap_or(""),
            tags = %tags,
        );
        debug!(target: SPAN_TARGET, parent: &span, "span started");
        Box::new(TracingSpan {
            span,
            name: name.to_string(),
            extra: Tags::new(),
            error: None,
            started: Instant::now(),
        })
    }
}

struct TracingSpan {
    span: tracing::Span,
    name: String,
    extra: Tags,
    error: Option<String>,
    started: Instant,
}

impl Span for TracingSpan {
    fn set_tag(&mut self, key: &str, value: &str) {
        self.extra.insert(key, value);
    }

    fn set_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    fn finish(self: Box<Self>) {
        let elapsed_us = self.started.elapsed().as_micros() as u64;
        debug!(
            target: SPAN_TARGET,
            parent: &self.span,
            span = %self.name,
            elapsed_us,
            error = self.error.as_deref(),
            extra = %self.extra,
            "span finished"
        );
    }
}
