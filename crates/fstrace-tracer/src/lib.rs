// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Span tracer contract
//!
//! The instrumentation talks to a tracer only through [`Tracer`] and
//! [`TracerExt::trace`]: open a named span with [`Tags`], then close it
//! through the [`Done`] handle exactly once.

pub mod recording;
pub mod span;
pub mod tags;
pub mod tracing_tracer;

pub use recording::{RecordingTracer, SpanRecord};
pub use span::{Done, Span, SpanOptions, Tracer, TracerExt};
pub use tags::Tags;
pub use tracing_tracer::TracingTracer;
