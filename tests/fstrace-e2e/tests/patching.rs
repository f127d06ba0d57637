// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Installing and removing the instrumentation.

use std::sync::Arc;

use fstrace_e2e::{path_value, Fixture, SERVICE};
use fstrace_fs::{FsInstrumentation, FsTraceConfig};
use fstrace_host::{EventLoop, Function, MemberKey, Object, Value};
use fstrace_std_host::StdHost;
use fstrace_logging::test_utils;
use fstrace_tracer::RecordingTracer;

/// Every function-valued own member of the objects instrumentation touches.
fn snapshot(host: &StdHost) -> Vec<(Object, MemberKey, Function)> {
    let fs = host.fs();
    let promises = fs.get("promises").and_then(|p| p.as_object().cloned()).expect("promises");
    let dir_prototype = fs
        .get("Dir")
        .and_then(|d| d.as_object().and_then(|d| d.get("prototype")))
        .and_then(|p| p.as_object().cloned())
        .expect("Dir.prototype");
    let scratch = tempfile::NamedTempFile::new().expect("scratch file");
    let handle = promises
        .invoke("open", vec![path_value(scratch.path())])
        .ok()
        .and_then(|p| p.as_promise().and_then(|p| p.wait().ok()))
        .and_then(|h| h.as_object().cloned())
        .expect("file handle");
    let handle_prototype = handle.prototype().cloned().expect("handle prototype");
    if let Some(Value::Promise(closing)) = handle.invoke("close", vec![]).ok() {
        closing.wait().expect("close");
    }

    let mut members = Vec::new();
    for object in [fs.clone(), promises, dir_prototype, handle_prototype] {
        for key in object.own_keys() {
            if let Some(Value::Function(function)) = object.get_own(key.clone()) {
                members.push((object.clone(), key, function));
            }
        }
    }
    members
}

fn changed(members: &[(Object, MemberKey, Function)]) -> usize {
    members
        .iter()
        .filter(|(object, key, function)| {
            !object
                .get_own(key.clone())
                .and_then(|live| live.as_function().map(|live| live.ptr_eq(function)))
                .unwrap_or(false)
        })
        .count()
}

#[test]
fn unpatch_restores_every_member() {
    let host = StdHost::new(EventLoop::new());
    let before = snapshot(&host);
    let instrumentation = FsInstrumentation::new(Arc::new(RecordingTracer::new(SERVICE)), FsTraceConfig::default());

    let report = instrumentation.patch(host.fs());
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(changed(&before), report.wrapped.len());

    assert!(instrumentation.unpatch(host.fs()));
    assert_eq!(changed(&before), 0);
}

#[test]
fn repeated_patch_is_reference_counted() {
    let fx = Fixture::patched();
    let path = fx.file("rc.txt", "x");
    let read = || {
        fx.fs()
            .invoke("readFileSync", vec![path_value(&path)])
            .expect("read");
    };

    assert_eq!(fx.instrumentation.patch(fx.fs()).depth, 2);
    read();
    assert_eq!(fx.tracer.len(), 1, "second patch must not double-wrap");

    assert!(fx.instrumentation.unpatch(fx.fs()));
    read();
    assert_eq!(fx.tracer.len(), 2);

    assert!(fx.instrumentation.unpatch(fx.fs()));
    read();
    assert_eq!(fx.tracer.len(), 2);
    assert!(!fx.instrumentation.is_patched(fx.fs()));
}

#[test]
fn disabled_config_installs_nothing() {
    let fx = Fixture::with_config(FsTraceConfig {
        enabled: false,
        ..FsTraceConfig::default()
    });
    let path = fx.file("off.txt", "x");

    assert_eq!(fx.report.depth, 0);
    assert!(fx.report.wrapped.is_empty());
    fx.fs().invoke("readFileSync", vec![path_value(&path)]).expect("read");
    assert!(fx.tracer.is_empty());
}

#[test]
fn configured_service_overrides_the_derived_one() {
    let fx = Fixture::with_config(FsTraceConfig {
        service: Some("storage".to_string()),
        ..FsTraceConfig::default()
    });
    let path = fx.file("svc.txt", "x");

    fx.fs().invoke("statSync", vec![path_value(&path)]).expect("stat");
    assert_eq!(fx.tracer.last().expect("span").tags.get("service.name"), Some("storage"));
}

#[test]
fn unusable_probe_path_leaves_handles_untraced() {
    let fx = Fixture::with_config(FsTraceConfig {
        probe_path: Some("/definitely/not/here".into()),
        ..FsTraceConfig::default()
    });

    assert!(!fx.report.wrapped.iter().any(|name| name.starts_with("fs.filehandle.")));
    assert!(fx.report.wrapped.iter().any(|name| name == "fs.promises.open"));
}

#[test]
fn patch_and_unpatch_are_logged() {
    let (logs, _guard) = test_utils::capture("fstrace_fs=debug");
    let fx = Fixture::patched();
    assert!(logs.contains("patched filesystem surface"));

    assert!(fx.instrumentation.unpatch(fx.fs()));
    assert!(!fx.instrumentation.unpatch(fx.fs()));
    assert!(logs.contains("unpatched filesystem surface"));
    assert!(logs.contains("unpatch of a surface that is not patched"));
}
