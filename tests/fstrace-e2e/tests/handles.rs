// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! File handles and directory handles.

use fstrace_e2e::{path_text, path_value, Fixture};
use fstrace_host::{shimmer, Object, Symbol, Value};
use fstrace_std_host::{close_slot, read_slot};

fn settle(value: Value) -> Value {
    match value {
        Value::Promise(promise) => promise.wait().expect("settled"),
        other => other,
    }
}

#[test]
fn file_handle_methods_are_traced_with_the_handle_descriptor() {
    let fx = Fixture::patched();
    let path = fx.file("h.txt", "handle");
    assert!(fx.report.wrapped.iter().any(|name| name == "fs.filehandle.stat"));

    let handle = settle(
        fx.promises()
            .invoke("open", vec![path_value(&path), Value::from("r")])
            .unwrap(),
    );
    let handle = handle.as_object().expect("handle").clone();
    let fd = handle.get("fd").and_then(|fd| fd.as_integer()).expect("fd").to_string();

    settle(handle.invoke("stat", vec![]).unwrap());
    settle(handle.invoke("close", vec![]).unwrap());

    let open = &fx.tracer.named("fs.promises.open")[0];
    assert_eq!(open.tags.get("file.path"), Some(path_text(&path).as_str()));
    assert_eq!(open.tags.get("file.flag"), Some("r"));

    let stat = &fx.tracer.named("fs.filehandle.stat")[0];
    assert!(stat.finished);
    assert_eq!(stat.tags.get("file.descriptor"), Some(fd.as_str()));
    assert_eq!(fx.tracer.named("fs.filehandle.close").len(), 1);
    assert_eq!(fx.host.open_descriptors(), 0);
}

#[test]
fn file_handle_internals_are_not_wrapped() {
    let fx = Fixture::patched();
    for skipped in ["fs.filehandle.constructor", "fs.filehandle.getasyncid", "fs.filehandle.fd"] {
        assert!(!fx.report.wrapped.iter().any(|name| name == skipped), "{skipped}");
    }
}

#[test]
fn dir_methods_are_traced_with_the_handle_path() {
    let fx = Fixture::patched();
    fx.file("one", "1");

    let dir = fx.fs().invoke("opendirSync", vec![path_value(fx.dir())]).unwrap();
    let dir = dir.as_object().expect("dir").clone();
    assert_eq!(dir.invoke("readSync", vec![]).unwrap(), Value::from(".probe"));
    dir.invoke("closeSync", vec![]).unwrap();

    let dir_path = path_text(fx.dir());
    let read = &fx.tracer.named("fs.dir.readsync")[0];
    assert_eq!(read.tags.get("file.path"), Some(dir_path.as_str()));
    assert_eq!(fx.tracer.named("fs.dir.closesync").len(), 1);
    assert_eq!(fx.tracer.named("fs.opendirsync").len(), 1);
    assert_eq!(fx.host.open_dirs(), 0);
}

fn slot(dir: &Object, key: Symbol) -> fstrace_host::Function {
    dir.get_own(key)
        .and_then(|slot| slot.as_function().cloned())
        .expect("slot function")
}

#[test]
fn async_iteration_traces_slots_and_restores_them() {
    let fx = Fixture::patched();
    fx.file("a", "");
    fx.file("b", "");

    let dir = fx.fs().invoke("opendirSync", vec![path_value(fx.dir())]).unwrap();
    let dir = dir.as_object().expect("dir").clone();
    let (read_before, close_before) = (slot(&dir, read_slot()), slot(&dir, close_slot()));

    let iter = dir.invoke(Symbol::async_iterator(), vec![]).unwrap();
    assert!(shimmer::is_wrapped(&dir, read_slot()));
    let entries = futures::executor::block_on(iter.as_iterator().expect("iterator").collect()).unwrap();
    assert_eq!(entries, vec![Value::from(".probe"), Value::from("a"), Value::from("b")]);

    // Three entries plus the read that reports the end.
    assert_eq!(fx.tracer.named("fs.dir.read").len(), 4);
    assert_eq!(fx.tracer.named("fs.dir.close").len(), 1);
    assert!(fx.tracer.open_spans().is_empty());

    assert!(slot(&dir, read_slot()).ptr_eq(&read_before));
    assert!(slot(&dir, close_slot()).ptr_eq(&close_before));
    assert_eq!(fx.host.open_dirs(), 0);
}

#[test]
fn early_close_of_an_iteration_restores_slots() {
    let fx = Fixture::patched();
    fx.file("a", "");

    let dir = fx.fs().invoke("opendirSync", vec![path_value(fx.dir())]).unwrap();
    let dir = dir.as_object().expect("dir").clone();
    let read_before = slot(&dir, read_slot());

    let iter = dir.invoke(Symbol::async_iterator(), vec![]).unwrap();
    let iter = iter.as_iterator().expect("iterator").clone();
    futures::executor::block_on(async {
        iter.next().await.expect("entry").expect("read");
        iter.close().await.expect("close");
    });

    assert_eq!(fx.tracer.named("fs.dir.read").len(), 1);
    assert_eq!(fx.tracer.named("fs.dir.close").len(), 1);
    assert!(!shimmer::is_wrapped(&dir, read_slot()));
    assert!(slot(&dir, read_slot()).ptr_eq(&read_before));
}
