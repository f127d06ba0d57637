// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared fixture for the end-to-end tests: a `std::fs` backed surface
//! instrumented with a recording tracer inside a scratch directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fstrace_fs::{FsInstrumentation, FsTraceConfig, PatchReport};
use fstrace_host::{EventLoop, Function, Object, Value};
use fstrace_std_host::StdHost;
use fstrace_tracer::RecordingTracer;
use tempfile::TempDir;

pub const SERVICE: &str = "e2e";

pub struct Fixture {
    pub host: StdHost,
    pub tracer: RecordingTracer,
    pub instrumentation: FsInstrumentation,
    pub report: PatchReport,
    scratch: TempDir,
}

impl Fixture {
    /// Patched surface with the default configuration.
    pub fn patched() -> Self {
        Self::with_config(FsTraceConfig::default())
    }

    pub fn with_config(config: FsTraceConfig) -> Self {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let probe = scratch.path().join(".probe");
        std::fs::write(&probe, b"probe").expect("probe file");
        let config = FsTraceConfig {
            probe_path: config.probe_path.or(Some(probe)),
            ..config
        };

        let host = StdHost::new(EventLoop::new());
        let tracer = RecordingTracer::new(SERVICE);
        let instrumentation = FsInstrumentation::new(Arc::new(tracer.clone()), config);
        let report = instrumentation.patch(host.fs());
        Fixture {
            host,
            tracer,
            instrumentation,
            report,
            scratch,
        }
    }

    pub fn fs(&self) -> &Object {
        self.host.fs()
    }

    pub fn promises(&self) -> Object {
        self.fs()
            .get("promises")
            .and_then(|p| p.as_object().cloned())
            .expect("promises surface")
    }

    pub fn dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Create `name` in the scratch directory with `contents`.
    pub fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir().join(name);
        std::fs::write(&path, contents).expect("fixture file");
        path
    }

    pub fn run_loop(&self) -> usize {
        self.host.event_loop().run_until_idle()
    }
}

pub fn path_value(path: &Path) -> Value {
    Value::from(path.to_string_lossy().into_owned())
}

pub fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A completion callback that stores its arguments and the number of spans
/// still open on `tracer` at the moment it ran.
#[derive(Clone)]
pub struct Probe {
    pub seen: Arc<Mutex<Option<(Vec<Value>, usize)>>>,
    tracer: RecordingTracer,
}

impl Probe {
    pub fn new(tracer: &RecordingTracer) -> Self {
        Probe {
            seen: Arc::default(),
            tracer: tracer.clone(),
        }
    }

    pub fn callback(&self) -> Value {
        let seen = self.seen.clone();
        let tracer = self.tracer.clone();
        Value::Function(Function::new("probe", move |call| {
            let open = tracer.open_spans().len();
            *seen.lock().expect("probe lock") = Some((call.args.clone(), open));
            Ok(Value::Undefined)
        }))
    }

    pub fn args(&self) -> Option<Vec<Value>> {
        self.seen.lock().expect("probe lock").as_ref().map(|(args, _)| args.clone())
    }

    pub fn open_spans_at_call(&self) -> Option<usize> {
        self.seen.lock().expect("probe lock").as_ref().map(|(_, open)| *open)
    }
}
