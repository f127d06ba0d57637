// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Assembly of the filesystem surface object

use std::sync::Arc;

use fstrace_host::{FileStream, Function, HostError, HostResult, Object, Promise, StreamEvent, Value};
use tracing::warn;

use crate::ops::{self, OpBody, OPERATIONS, PROMISE_OPERATIONS};
use crate::state::{arg, path_arg, FileOptions, HostState};
use crate::{dir, handle};

/// Queue `callback(err)` or `callback(null, value)` on the event loop.
pub(crate) fn defer_completion(state: &HostState, callback: Function, outcome: HostResult<Value>) {
    state.event_loop.defer(move || {
        let args = match outcome {
            Ok(value) => vec![Value::Null, value],
            Err(err) => vec![Value::Error(err)],
        };
        if let Err(err) = callback.apply(args) {
            warn!(callback = callback.name(), %err, "completion callback failed");
        }
    });
}

pub(crate) fn build(state: &Arc<HostState>) -> Object {
    dir::install_prototype(state);
    handle::install_prototype(state);

    let fs = Object::new();
    for (name, body) in OPERATIONS {
        fs.set(*name, callback_flavour(state, name, *body));
        fs.set(format!("{name}Sync"), sync_flavour(state, name, *body));
    }
    fs.set("exists", exists(state));
    fs.set("existsSync", Function::new("existsSync", |call| {
        Ok(Value::from(path_arg(arg(&call.args, 0)).map_or(false, |p| p.exists())))
    }));
    fs.set("createReadStream", create_read_stream(state));
    fs.set("createWriteStream", create_write_stream(state));
    fs.set("promises", promises(state));

    let dir_class = Object::new();
    dir_class.set("prototype", state.dir_prototype.clone());
    fs.set("Dir", dir_class);
    fs
}

fn sync_flavour(state: &Arc<HostState>, name: &str, body: OpBody) -> Function {
    let state = state.clone();
    Function::new(format!("{name}Sync"), move |call| body(&state, &call.args))
}

/// Trailing callback required; the body runs now and the callback fires on
/// a later turn of the event loop.
fn callback_flavour(state: &Arc<HostState>, name: &str, body: OpBody) -> Function {
    let state = state.clone();
    let label = name.to_string();
    Function::new(name, move |call| {
        let Some(callback) = call.last_arg().as_function().cloned() else {
            return Err(HostError::invalid_argument(format!("{label}: callback must be a function")));
        };
        let args = &call.args[..call.args.len() - 1];
        defer_completion(&state, callback, body(&state, args));
        Ok(Value::Undefined)
    })
}

fn promise_flavour(state: &Arc<HostState>, name: &str, body: OpBody) -> Function {
    let state = state.clone();
    Function::new(name, move |call| Ok(Value::Promise(Promise::settle(body(&state, &call.args)))))
}

fn promises(state: &Arc<HostState>) -> Object {
    let promises = Object::new();
    promises.set("open", promise_flavour(state, "open", handle::open));
    for name in PROMISE_OPERATIONS {
        if let Some(body) = ops::body(name) {
            promises.set(*name, promise_flavour(state, name, body));
        }
    }
    promises
}

/// `exists(path, callback)`: the callback receives a single boolean.
fn exists(state: &Arc<HostState>) -> Function {
    let state = state.clone();
    Function::new("exists", move |call| {
        let Some(callback) = call.arg(1).as_function().cloned() else {
            return Err(HostError::invalid_argument("exists: callback must be a function"));
        };
        let found = path_arg(call.arg(0)).map_or(false, |p| p.exists());
        state.event_loop.defer(move || {
            if let Err(err) = callback.apply(vec![Value::from(found)]) {
                warn!(%err, "exists callback failed");
            }
        });
        Ok(Value::Undefined)
    })
}

/// The whole file is read on the next loop turn and delivered as one chunk.
fn create_read_stream(state: &Arc<HostState>) -> Function {
    let state = state.clone();
    Function::new("createReadStream", move |call| {
        let path = path_arg(call.arg(0))?;
        let stream = FileStream::readable(Some(path.to_string_lossy().into_owned()));
        let emitter = stream.clone();
        state.event_loop.defer(move || match std::fs::read(&path) {
            Ok(bytes) => {
                emitter.emit(StreamEvent::Open, &Value::Undefined);
                emitter.emit(StreamEvent::Data, &Value::Bytes(bytes));
                emitter.emit(StreamEvent::End, &Value::Undefined);
                emitter.emit(StreamEvent::Close, &Value::Undefined);
            }
            Err(err) => {
                emitter.emit(StreamEvent::Error, &Value::Error(err.into()));
                emitter.emit(StreamEvent::Close, &Value::Undefined);
            }
        });
        Ok(Value::Stream(stream))
    })
}

/// Chunks are buffered until `end`, then written on the next loop turn.
fn create_write_stream(state: &Arc<HostState>) -> Function {
    let state = state.clone();
    Function::new("createWriteStream", move |call| {
        let path = path_arg(call.arg(0))?;
        let flag = FileOptions::parse(call.arg(1)).flag.unwrap_or_else(|| "w".to_string());
        let options = crate::state::open_options(&flag)?;
        let event_loop = state.event_loop.clone();
        let target = path.clone();
        let stream = FileStream::writable(Some(path.to_string_lossy().into_owned()), move |stream, bytes| {
            event_loop.defer(move || {
                let written = options
                    .open(&target)
                    .and_then(|mut file| std::io::Write::write_all(&mut file, &bytes));
                match written {
                    Ok(()) => {
                        stream.emit(StreamEvent::Finish, &Value::Undefined);
                    }
                    Err(err) => {
                        stream.emit(StreamEvent::Error, &Value::Error(err.into()));
                    }
                }
                stream.emit(StreamEvent::Close, &Value::Undefined);
            });
        });
        Ok(Value::Stream(stream))
    })
}
