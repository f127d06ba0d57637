// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Span instrumentation for filesystem API surfaces
//!
//! [`FsInstrumentation::patch`] replaces every recognised operation of a
//! filesystem surface with a wrapper that opens a span tagged from the
//! call's arguments and closes it when the call completes, whether the
//! operation is synchronous, callback-based, promise-based, or stream-based.
//! [`FsInstrumentation::unpatch`] puts the original functions back.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod patch;
pub mod plan;
pub mod registry;
pub mod tags;

pub use config::FsTraceConfig;
pub use discovery::{DirSlotKeys, HandleKeyCache};
pub use engine::Interceptor;
pub use error::{FsTraceError, FsTraceResult};
pub use patch::{FsInstrumentation, PatchReport};
pub use plan::{PlannedWrap, SurfacePlan, WrapKind};
pub use registry::{Convention, OperationDescriptor};
pub use tags::{make_fs_tags, RuleInput, Subject, TagContext, TagRule};
