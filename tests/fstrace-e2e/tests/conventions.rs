// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One traced call per completion style, against real files.

use fstrace_e2e::{path_text, path_value, Fixture, Probe};
use fstrace_host::{HostError, StreamEvent, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn sync_read_file_is_tagged_with_path_and_flag() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let path = fx.file("notes.txt", "hello");

    let contents = fx.fs().invoke("readFileSync", vec![path_value(&path), Value::from("utf8")])?;
    assert_eq!(contents, Value::from("hello"));

    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.readfilesync");
    assert!(span.finished);
    assert_eq!(span.error, None);
    assert_eq!(span.tags.get("component"), Some("fs"));
    assert_eq!(span.tags.get("service.name"), Some("e2e-fs"));
    assert_eq!(span.tags.get("resource.name"), Some(path_text(&path).as_str()));
    assert_eq!(span.tags.get("file.path"), Some(path_text(&path).as_str()));
    assert_eq!(span.tags.get("file.flag"), Some("r"));
    Ok(())
}

#[test]
fn sync_failure_is_recorded_and_returned() {
    let fx = Fixture::patched();
    let missing = fx.dir().join("missing");

    let err = fx.fs().invoke("readFileSync", vec![path_value(&missing)]).unwrap_err();
    assert_eq!(err.code(), Some("ENOENT"));

    let span = fx.tracer.last().expect("span");
    assert!(span.finished);
    assert!(span.error.expect("error").contains("ENOENT"));
}

#[test]
fn copy_reports_source_and_destination() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let src = fx.file("a.txt", "a");
    let dest = fx.dir().join("b.txt");

    fx.fs().invoke("copyFileSync", vec![path_value(&src), path_value(&dest)])?;
    assert!(dest.exists());

    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.copyfilesync");
    assert_eq!(span.tags.get("file.src"), Some(path_text(&src).as_str()));
    assert_eq!(span.tags.get("file.dest"), Some(path_text(&dest).as_str()));
    assert_eq!(span.tags.get("resource.name"), Some(path_text(&src).as_str()));
    assert!(!span.tags.contains_key("file.path"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn chmod_mode_is_reported_in_octal() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let path = fx.file("mode.txt", "");

    fx.fs().invoke("chmodSync", vec![path_value(&path), Value::from(0o644)])?;

    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.chmodsync");
    assert_eq!(span.tags.get("file.mode"), Some("644"));
    Ok(())
}

#[test]
fn malformed_mode_runs_untraced() {
    let fx = Fixture::patched();
    let path = fx.file("mode.txt", "");

    let _ = fx.fs().invoke("chmodSync", vec![path_value(&path), Value::from("644")]);
    assert!(fx.tracer.is_empty());
}

#[test]
fn descriptor_operations_tag_the_descriptor() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let path = fx.file("fd.txt", "abc");

    let fd = fx.fs().invoke("openSync", vec![path_value(&path), Value::from("r")])?;
    let fd_text = fd.as_integer().expect("descriptor").to_string();
    fx.fs().invoke("fstatSync", vec![fd.clone()])?;
    fx.fs().invoke("closeSync", vec![fd])?;

    let names: Vec<_> = fx.tracer.spans().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["fs.opensync", "fs.fstatsync", "fs.closesync"]);
    let fstat = &fx.tracer.named("fs.fstatsync")[0];
    assert_eq!(fstat.tags.get("file.descriptor"), Some(fd_text.as_str()));
    assert_eq!(fstat.tags.get("resource.name"), Some(fd_text.as_str()));
    assert_eq!(fx.tracer.named("fs.opensync")[0].tags.get("file.flag"), Some("r"));
    assert_eq!(fx.host.open_descriptors(), 0);
    Ok(())
}

#[test]
fn callback_span_closes_before_the_callback_runs() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let path = fx.file("cb.txt", "payload");
    let probe = Probe::new(&fx.tracer);

    fx.fs()
        .invoke("readFile", vec![path_value(&path), Value::from("utf8"), probe.callback()])?;
    assert_eq!(fx.tracer.open_spans().len(), 1);
    assert!(probe.args().is_none());

    fx.run_loop();
    assert_eq!(probe.args(), Some(vec![Value::Null, Value::from("payload")]));
    assert_eq!(probe.open_spans_at_call(), Some(0));
    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.readfile");
    assert_eq!(span.error, None);
    Ok(())
}

#[test]
fn callback_error_marks_the_span() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let probe = Probe::new(&fx.tracer);

    fx.fs()
        .invoke("stat", vec![path_value(&fx.dir().join("nope")), probe.callback()])?;
    fx.run_loop();

    let args = probe.args().expect("callback ran");
    assert!(matches!(&args[0], Value::Error(HostError::Io { code, .. }) if code == "ENOENT"));
    let span = fx.tracer.last().expect("span");
    assert!(span.finished);
    assert!(span.error.is_some());
    Ok(())
}

#[test]
fn missing_callback_runs_untraced() {
    let fx = Fixture::patched();
    let path = fx.file("x.txt", "");

    assert!(fx.fs().invoke("readFile", vec![path_value(&path)]).is_err());
    assert!(fx.tracer.is_empty());
}

#[test]
fn promise_span_closes_on_settlement() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let path = fx.file("p.txt", "promised");

    let pending = fx
        .promises()
        .invoke("readFile", vec![path_value(&path), Value::from("utf8")])?;
    let promise = pending.as_promise().expect("promise");
    assert_eq!(fx.tracer.open_spans().len(), 1);

    assert_eq!(promise.wait()?, Value::from("promised"));
    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.promises.readfile");
    assert!(span.finished);
    assert_eq!(span.tags.get("file.flag"), Some("r"));
    Ok(())
}

#[test]
fn rejected_promise_marks_the_span() -> anyhow::Result<()> {
    let fx = Fixture::patched();

    let pending = fx.promises().invoke("stat", vec![path_value(&fx.dir().join("nope"))])?;
    let outcome = futures::executor::block_on(pending.as_promise().expect("promise").clone());
    assert!(outcome.is_err());

    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.promises.stat");
    assert!(span.error.is_some());
    Ok(())
}

#[test]
fn read_stream_span_ends_once() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let path = fx.file("s.txt", "streamed");

    let stream = fx.fs().invoke("createReadStream", vec![path_value(&path)])?;
    let stream = stream.as_stream().expect("stream").clone();
    let chunks = Arc::new(AtomicUsize::new(0));
    let counter = chunks.clone();
    stream.on(StreamEvent::Data, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fx.tracer.open_spans().len(), 1);

    fx.run_loop();
    assert_eq!(chunks.load(Ordering::SeqCst), 1);
    let spans = fx.tracer.named("fs.readstream");
    assert_eq!(spans.len(), 1);
    assert!(spans[0].finished);
    assert_eq!(spans[0].error, None);
    assert_eq!(spans[0].tags.get("file.flag"), Some("r"));

    // A late error after the end must not touch the finished span.
    stream.emit(StreamEvent::Error, &Value::Error(HostError::StreamEnded));
    assert_eq!(fx.tracer.named("fs.readstream")[0].error, None);
    Ok(())
}

#[test]
fn write_stream_span_ends_on_finish() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let path = fx.dir().join("out.txt");

    let stream = fx
        .fs()
        .invoke("createWriteStream", vec![path_value(&path)])?
        .as_stream()
        .expect("stream")
        .clone();
    stream.write(b"written")?;
    stream.end();
    fx.run_loop();

    assert_eq!(std::fs::read_to_string(&path)?, "written");
    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.writestream");
    assert!(span.finished);
    assert_eq!(span.tags.get("file.flag"), Some("w"));
    Ok(())
}

#[test]
fn read_stream_error_marks_the_span() -> anyhow::Result<()> {
    let fx = Fixture::patched();

    fx.fs()
        .invoke("createReadStream", vec![path_value(&fx.dir().join("gone"))])?;
    fx.run_loop();

    let span = fx.tracer.last().expect("span");
    assert!(span.finished);
    assert!(span.error.expect("error").contains("ENOENT"));
    Ok(())
}

#[test]
fn exists_reports_without_error() -> anyhow::Result<()> {
    let fx = Fixture::patched();
    let probe = Probe::new(&fx.tracer);

    fx.fs()
        .invoke("exists", vec![path_value(&fx.dir().join("absent")), probe.callback()])?;
    fx.run_loop();

    assert_eq!(probe.args(), Some(vec![Value::from(false)]));
    assert_eq!(probe.open_spans_at_call(), Some(0));
    let span = fx.tracer.last().expect("span");
    assert_eq!(span.name, "fs.exists");
    assert_eq!(span.error, None);
    Ok(())
}

#[test]
fn exists_without_callback_is_not_traced() {
    let fx = Fixture::patched();

    let _ = fx.fs().invoke("exists", vec![path_value(fx.dir())]);
    assert!(fx.tracer.is_empty());
}

#[test]
fn exists_sync_is_traced() -> anyhow::Result<()> {
    let fx = Fixture::patched();

    assert_eq!(fx.fs().invoke("existsSync", vec![path_value(fx.dir())])?, Value::from(true));
    assert_eq!(fx.tracer.last().expect("span").name, "fs.existssync");
    Ok(())
}
