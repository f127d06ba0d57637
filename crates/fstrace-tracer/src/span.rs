// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tracer contract consumed by the instrumentation

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::tags::Tags;

/// An open span.
pub trait Span: Send {
    fn set_tag(&mut self, key: &str, value: &str);
    fn set_error(&mut self, message: &str);
    /// Close the span. Consumes it, so a span can only be finished once.
    fn finish(self: Box<Self>);
}

/// Span factory.
///
/// Sampling, context propagation, and export all live behind this trait; the
/// instrumentation only opens spans and closes them.
pub trait Tracer: Send + Sync {
    /// The tracer's own service identity.
    fn service_name(&self) -> String;

    fn start_span(&self, name: &str, tags: &Tags) -> Box<dyn Span>;
}

#[derive(Clone, Debug, Default)]
pub struct SpanOptions {
    pub tags: Tags,
}

impl SpanOptions {
    pub fn with_tags(tags: Tags) -> Self {
        SpanOptions { tags }
    }
}

/// Completion handle for an open span.
///
/// Clones share the span. Whichever clone finishes first closes it; every
/// later call is a no-op.
#[derive(Clone)]
pub struct Done(Arc<Mutex<Option<Box<dyn Span>>>>);

impl Done {
    pub fn new(span: Box<dyn Span>) -> Self {
        Done(Arc::new(Mutex::new(Some(span))))
    }

    /// Returns false when the span was already closed.
    pub fn finish(&self) -> bool {
        self.close(None)
    }

    pub fn finish_with_error(&self, error: &dyn fmt::Display) -> bool {
        self.close(Some(error.to_string()))
    }

    /// Finish, marking the span as failed when `result` is an error.
    pub fn finish_result<T, E: fmt::Display>(&self, result: &Result<T, E>) -> bool {
        match result {
            Ok(_) => self.finish(),
            Err(err) => self.finish_with_error(err),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    fn close(&self, error: Option<String>) -> bool {
        let span = self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
        match span {
            Some(mut span) => {
                if let Some(message) = error {
                    span.set_error(&message);
                }
                span.finish();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done").field("finished", &self.is_finished()).finish()
    }
}

/// `trace(name, { tags }, body)` on any tracer.
pub trait TracerExt {
    /// Open a span and hand its completion handle to `body`. The span stays
    /// open until `body`, or whoever it passes the handle to, finishes it.
    fn trace<R, F>(&self, name: &str, options: SpanOptions, body: F) -> R
    where
        F: FnOnce(Done) -> R;
}

impl<T: Tracer + ?Sized> TracerExt for T {
    fn trace<R, F>(&self, name: &str, options: SpanOptions, body: F) -> R
    where
        F: FnOnce(Done) -> R,
    {
        let span = self.start_span(name, &options.tags);
        body(Done::new(span))
    }
}
