// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Capability probe
//!
//! Walks a filesystem surface once and lists every member that will be
//! wrapped, before anything is modified. Members that are absent or not
//! functions are left out of the plan rather than failing it.

use std::fmt;
use std::path::Path;

use fstrace_host::{HostError, HostResult, MemberKey, Object, StreamKind, Symbol, Value};
use tracing::{debug, warn};

use crate::config::FsTraceConfig;
use crate::registry::{OperationDescriptor, DIR_METHODS};

/// What a planned wrap installs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WrapKind {
    Operation(OperationDescriptor),
    /// Asynchronous-iteration entry point of the directory-handle prototype.
    DirIterator,
}

#[derive(Clone, Debug)]
pub struct PlannedWrap {
    pub target: Object,
    pub key: MemberKey,
    pub kind: WrapKind,
}

impl fmt::Display for PlannedWrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            WrapKind::Operation(op) => f.write_str(&op.span_name),
            WrapKind::DirIterator => write!(f, "fs.dir{}", self.key),
        }
    }
}

/// Ordered list of wraps for one surface.
#[derive(Clone, Debug, Default)]
pub struct SurfacePlan {
    pub entries: Vec<PlannedWrap>,
}

impl SurfacePlan {
    pub fn probe(fs: &Object, config: &FsTraceConfig) -> SurfacePlan {
        let mut plan = SurfacePlan::default();

        for name in fs.enumerable_names() {
            if let Some(op) = OperationDescriptor::flat(&name) {
                plan.push_operation(fs, &name, op);
            }
        }

        if let Some(Value::Object(promises)) = fs.get_own("promises") {
            if let Some(prototype) = probe_file_handle_prototype(&promises, config) {
                for key in prototype.own_keys() {
                    let Some(method) = key.as_name() else {
                        continue;
                    };
                    if let Some(op) = OperationDescriptor::file_handle(method) {
                        plan.push_operation(&prototype, method, op);
                    }
                }
            }
            for name in promises.enumerable_names() {
                if let Some(op) = OperationDescriptor::promises(&name) {
                    plan.push_operation(&promises, &name, op);
                }
            }
        }

        if let Some(prototype) = dir_prototype(fs) {
            for method in DIR_METHODS {
                if let Some(op) = OperationDescriptor::dir(method) {
                    plan.push_operation(&prototype, method, op);
                }
            }
            plan.push(&prototype, Symbol::async_iterator(), WrapKind::DirIterator);
        }

        plan.push_operation(fs, "createReadStream", OperationDescriptor::stream(StreamKind::Readable));
        plan.push_operation(fs, "createWriteStream", OperationDescriptor::stream(StreamKind::Writable));
        plan.push_operation(fs, "existsSync", OperationDescriptor::exists_sync());
        plan.push_operation(fs, "exists", OperationDescriptor::exists());

        debug!(members = plan.entries.len(), "probed filesystem surface");
        plan
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_operation(&mut self, target: &Object, name: &str, op: OperationDescriptor) {
        self.push(target, name, WrapKind::Operation(op));
    }

    fn push(&mut self, target: &Object, key: impl Into<MemberKey>, kind: WrapKind) {
        let key = key.into();
        let callable = matches!(target.get_own(&key), Some(Value::Function(_)));
        if callable {
            self.entries.push(PlannedWrap {
                target: target.clone(),
                key,
                kind,
            });
        }
    }
}

fn dir_prototype(fs: &Object) -> Option<Object> {
    let class = fs.get_own("Dir")?;
    match class.as_object()?.get_own("prototype")? {
        Value::Object(prototype) => Some(prototype),
        _ => None,
    }
}

/// Open a file through the surface's own `open`, take the prototype of the
/// handle it yields, and close the handle again.
fn probe_file_handle_prototype(promises: &Object, config: &FsTraceConfig) -> Option<Object> {
    let Some(path) = config.resolved_probe_path() else {
        warn!("no probe path available; file handle methods left untraced");
        return None;
    };
    match open_probe_handle(promises, &path) {
        Ok(handle) => {
            let prototype = handle.prototype().cloned();
            if let Err(err) = handle.invoke("close", vec![]).and_then(settled) {
                debug!(%err, "closing probe handle failed");
            }
            if prototype.is_none() {
                warn!("probe handle has no prototype; file handle methods left untraced");
            }
            prototype
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "file handle probe failed; file handle methods left untraced");
            None
        }
    }
}

fn open_probe_handle(promises: &Object, path: &Path) -> HostResult<Object> {
    let opened = promises.invoke(
        "open",
        vec![Value::from(path.to_string_lossy().into_owned()), Value::from("r")],
    )?;
    match settled(opened)? {
        Value::Object(handle) => Ok(handle),
        other => Err(HostError::invalid_argument(format!(
            "open resolved to {}",
            other.type_name()
        ))),
    }
}

/// Block until a returned promise settles; other values are already final.
fn settled(value: Value) -> HostResult<Value> {
    match value {
        Value::Promise(promise) => promise.wait(),
        other => Ok(other),
    }
}
