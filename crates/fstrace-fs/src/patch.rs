// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Patch coordinator
//!
//! Applies a [`SurfacePlan`] to a filesystem surface and reverses it later.
//! Patching the same surface again only raises its patch depth; the members
//! are restored when the depth falls back to zero.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use fstrace_host::{shimmer, MemberKey, Object};
use fstrace_tracer::Tracer;
use tracing::{debug, info, warn};

use crate::config::FsTraceConfig;
use crate::discovery::HandleKeyCache;
use crate::engine::Interceptor;
use crate::plan::{SurfacePlan, WrapKind};
use crate::tags::TagContext;

/// Outcome of a [`FsInstrumentation::patch`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Members wrapped by this call, by span name.
    pub wrapped: Vec<String>,
    /// Members that were planned but could not be wrapped.
    pub skipped: Vec<String>,
    /// Patch depth of the surface after this call. Zero when disabled.
    pub depth: usize,
}

struct AppliedPatch {
    depth: usize,
    members: Vec<(Object, MemberKey)>,
    // Keeps the surface alive so its id stays unique while tracked.
    _surface: Object,
}

/// Filesystem instrumentation bound to one tracer.
pub struct FsInstrumentation {
    interceptor: Interceptor,
    config: FsTraceConfig,
    applied: Mutex<HashMap<u64, AppliedPatch>>,
}

impl FsInstrumentation {
    pub fn new(tracer: Arc<dyn Tracer>, config: FsTraceConfig) -> Self {
        Self::with_key_cache(tracer, config, HandleKeyCache::process())
    }

    pub fn with_key_cache(tracer: Arc<dyn Tracer>, config: FsTraceConfig, keys: Arc<HandleKeyCache>) -> Self {
        let ctx = TagContext::new(config.service_name(&tracer.service_name()));
        FsInstrumentation {
            interceptor: Interceptor::new(tracer, ctx, keys),
            config,
            applied: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FsTraceConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        self.interceptor.context().service()
    }

    pub fn depth(&self, fs: &Object) -> usize {
        self.applied().get(&fs.id()).map_or(0, |a| a.depth)
    }

    pub fn is_patched(&self, fs: &Object) -> bool {
        self.depth(fs) > 0
    }

    /// Install span wrappers on every planned member of `fs`.
    pub fn patch(&self, fs: &Object) -> PatchReport {
        if !self.config.enabled {
            debug!("filesystem instrumentation disabled");
            return PatchReport::default();
        }
        let mut applied = self.applied();
        if let Some(existing) = applied.get_mut(&fs.id()) {
            existing.depth += 1;
            debug!(object = fs.id(), depth = existing.depth, "surface already patched");
            return PatchReport {
                depth: existing.depth,
                ..PatchReport::default()
            };
        }

        let plan = SurfacePlan::probe(fs, &self.config);
        let mut report = PatchReport {
            depth: 1,
            ..PatchReport::default()
        };
        let mut members = Vec::with_capacity(plan.len());
        for entry in plan.entries {
            let label = entry.to_string();
            let wrapped = match &entry.kind {
                WrapKind::Operation(op) => {
                    shimmer::wrap(&entry.target, &entry.key, |original| self.interceptor.wrap(op, original))
                }
                WrapKind::DirIterator => shimmer::wrap(&entry.target, &entry.key, |original| {
                    self.interceptor.wrap_dir_iterator(original)
                }),
            };
            match wrapped {
                Ok(()) => {
                    members.push((entry.target, entry.key));
                    report.wrapped.push(label);
                }
                Err(err) => {
                    warn!(member = %label, %err, "skipping member");
                    report.skipped.push(label);
                }
            }
        }

        info!(
            object = fs.id(),
            service = self.service_name(),
            wrapped = report.wrapped.len(),
            skipped = report.skipped.len(),
            "patched filesystem surface"
        );
        applied.insert(
            fs.id(),
            AppliedPatch {
                depth: 1,
                members,
                _surface: fs.clone(),
            },
        );
        report
    }

    /// Undo one [`patch`](Self::patch). Returns false when `fs` was not
    /// patched.
    pub fn unpatch(&self, fs: &Object) -> bool {
        let mut applied = self.applied();
        let Some(existing) = applied.get_mut(&fs.id()) else {
            warn!(object = fs.id(), "unpatch of a surface that is not patched");
            return false;
        };
        existing.depth -= 1;
        if existing.depth > 0 {
            debug!(object = fs.id(), depth = existing.depth, "surface still patched");
            return true;
        }
        let Some(removed) = applied.remove(&fs.id()) else {
            return false;
        };
        for (target, key) in removed.members.iter().rev() {
            if let Err(err) = shimmer::unwrap(target, key) {
                warn!(member = %key, %err, "failed to restore member");
            }
        }
        info!(object = fs.id(), restored = removed.members.len(), "unpatched filesystem surface");
        true
    }

    fn applied(&self) -> MutexGuard<'_, HashMap<u64, AppliedPatch>> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner())
    }
}
