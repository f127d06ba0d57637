// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! File handles returned by the promise surface's `open`

use std::sync::{Arc, Weak};

use fstrace_host::{Function, HostError, HostResult, Object, Promise, Value};

use crate::ops::{self, OpBody};
use crate::state::{arg, upgrade, HostState};

/// Handle methods and the descriptor operation each one forwards to.
const METHODS: &[(&str, OpBody)] = &[
    ("stat", ops::fstat),
    ("chmod", ops::fchmod),
    ("chown", ops::fchown),
    ("truncate", ops::ftruncate),
    ("sync", ops::fsync),
    ("datasync", ops::fdatasync),
    ("read", ops::read),
    ("write", ops::write),
    ("readFile", ops::read_file),
    ("writeFile", ops::write_file),
    ("appendFile", ops::append_file),
    ("utimes", ops::futimes),
    ("close", ops::close),
];

pub(crate) fn install_prototype(state: &Arc<HostState>) {
    let proto = &state.file_handle_prototype;
    for (name, body) in METHODS {
        proto.set(*name, handle_method(state, name, *body));
    }
    proto.set(
        "getAsyncId",
        Function::new("getAsyncId", |call| {
            Ok(call.receiver_object().map_or(Value::Undefined, |h| Value::from(h.id())))
        }),
    );
    proto.set(
        "constructor",
        Function::new("FileHandle", |_| {
            Err(HostError::invalid_argument("file handles are created by open"))
        }),
    );
}

/// `handle.m(args)` runs the descriptor operation as `op(handle.fd, args)`
/// and returns a promise.
fn handle_method(state: &Arc<HostState>, name: &str, body: OpBody) -> Function {
    let weak: Weak<HostState> = Arc::downgrade(state);
    Function::new(name, move |call| {
        let state = upgrade(&weak)?;
        let fd = call
            .receiver_object()
            .and_then(|handle| handle.get("fd"))
            .ok_or_else(|| HostError::invalid_argument("file handle method called without a handle"))?;
        let mut args = Vec::with_capacity(call.args.len() + 1);
        args.push(fd);
        args.extend(call.args.iter().cloned());
        Ok(Value::Promise(Promise::settle(body(&state, &args))))
    })
}

/// `promises.open(path, flag?)` resolves to a handle owning a fresh descriptor.
pub(crate) fn open(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let fd = ops::open(state, &[arg(args, 0).clone(), arg(args, 1).clone()])?;
    let handle = Object::with_prototype(&state.file_handle_prototype);
    handle.set("fd", fd);
    Ok(Value::Object(handle))
}
