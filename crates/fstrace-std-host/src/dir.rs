// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory handles
//!
//! `opendir` snapshots the entry names of a directory into host state and
//! returns a handle whose prototype offers `read`/`readSync`,
//! `close`/`closeSync`, and asynchronous iteration. Each handle also carries
//! two hidden symbol-keyed slots, the promisified read and close, which the
//! iterator goes through.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Weak};

use fstrace_host::{AsyncIter, AsyncSource, Call, Function, HostError, HostResult, Object, Promise, Symbol, Value};
use once_cell::sync::Lazy;

use crate::state::{arg, path_arg, upgrade, HostState};
use crate::surface::defer_completion;

static READ_SLOT: Lazy<Symbol> = Lazy::new(|| Symbol::new("kDirReadPromisified"));
static CLOSE_SLOT: Lazy<Symbol> = Lazy::new(|| Symbol::new("kDirClosePromisified"));

/// Key of the hidden promisified-read slot on every directory handle.
pub fn read_slot() -> Symbol {
    READ_SLOT.clone()
}

/// Key of the hidden promisified-close slot on every directory handle.
pub fn close_slot() -> Symbol {
    CLOSE_SLOT.clone()
}

pub(crate) fn entry_names(path: &Path) -> HostResult<Vec<String>> {
    let mut names = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names)
}

pub(crate) fn opendir(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let path = path_arg(arg(args, 0))?;
    let entries: VecDeque<String> = entry_names(&path)?.into();

    let dir = Object::with_prototype(&state.dir_prototype);
    dir.set("path", path.to_string_lossy().into_owned());
    let weak = Arc::downgrade(state);
    dir.define_hidden(
        read_slot(),
        Function::new("read", move |call| {
            let entry = read_entry(&*upgrade(&weak)?, &receiver(&call)?);
            Ok(Value::Promise(Promise::settle(entry)))
        }),
    );
    let weak = Arc::downgrade(state);
    dir.define_hidden(
        close_slot(),
        Function::new("close", move |call| {
            let closed = close_dir(&*upgrade(&weak)?, &receiver(&call)?);
            Ok(Value::Promise(Promise::settle(closed)))
        }),
    );
    state.register_dir(&dir, entries);
    Ok(Value::Object(dir))
}

fn receiver(call: &Call) -> HostResult<Object> {
    call.receiver_object()
        .cloned()
        .ok_or_else(|| HostError::invalid_argument("directory method called without a handle"))
}

fn read_entry(state: &HostState, dir: &Object) -> HostResult<Value> {
    Ok(state
        .next_dir_entry(dir)?
        .map(Value::from)
        .unwrap_or(Value::Null))
}

fn close_dir(state: &HostState, dir: &Object) -> HostResult<Value> {
    state.close_dir(dir)?;
    Ok(Value::Undefined)
}

/// Prototype methods shared by every handle. `async_completion` picks the
/// callback or promise flavour from the trailing argument.
fn dir_method(
    state: &Arc<HostState>,
    name: &str,
    body: fn(&HostState, &Object) -> HostResult<Value>,
    async_completion: bool,
) -> Function {
    let weak: Weak<HostState> = Arc::downgrade(state);
    Function::new(name, move |call| {
        let state = upgrade(&weak)?;
        let dir = receiver(&call)?;
        if !async_completion {
            return body(&state, &dir);
        }
        match call.last_arg().as_function() {
            Some(callback) => {
                defer_completion(&state, callback.clone(), body(&state, &dir));
                Ok(Value::Undefined)
            }
            None => Ok(Value::Promise(Promise::settle(body(&state, &dir)))),
        }
    })
}

/// Populate the directory-handle prototype of `state`.
pub(crate) fn install_prototype(state: &Arc<HostState>) {
    let proto = &state.dir_prototype;
    proto.set("read", dir_method(state, "read", read_entry, true));
    proto.set("readSync", dir_method(state, "readSync", read_entry, false));
    proto.set("close", dir_method(state, "close", close_dir, true));
    proto.set("closeSync", dir_method(state, "closeSync", close_dir, false));
    proto.define_hidden(
        Symbol::async_iterator(),
        Function::new("entries", |call| {
            let dir = receiver(&call)?;
            Ok(Value::Iterator(AsyncIter::new(DirEntries { dir })))
        }),
    );
}

/// Iteration source going through the handle's promisified slots. The handle
/// is closed once the entries run out.
struct DirEntries {
    dir: Object,
}

async fn settled(value: HostResult<Value>) -> HostResult<Value> {
    match value? {
        Value::Promise(promise) => promise.await,
        other => Ok(other),
    }
}

impl AsyncSource for DirEntries {
    fn next(&self) -> Promise {
        let dir = self.dir.clone();
        Promise::new(async move {
            let entry = settled(dir.invoke(read_slot(), vec![])).await?;
            if entry == Value::Null {
                settled(dir.invoke(close_slot(), vec![])).await?;
            }
            Ok(entry)
        })
    }

    fn close(&self) -> Promise {
        let dir = self.dir.clone();
        Promise::new(async move { settled(dir.invoke(close_slot(), vec![])).await })
    }
}
