// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host state shared by every surface function

use std::collections::{HashMap, VecDeque};
use std::fs::{File, Metadata, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::UNIX_EPOCH;

use fstrace_host::{EventLoop, HostError, HostResult, Object, Value};

/// First descriptor handed out; 0 to 2 stay reserved for stdio.
const FIRST_FD: i64 = 3;

pub(crate) struct HostState {
    pub(crate) event_loop: EventLoop,
    pub(crate) dir_prototype: Object,
    pub(crate) file_handle_prototype: Object,
    files: Mutex<FdTable>,
    dirs: Mutex<HashMap<u64, VecDeque<String>>>,
}

struct FdTable {
    next: i64,
    open: HashMap<i64, File>,
}

impl HostState {
    pub(crate) fn new(event_loop: EventLoop) -> Arc<Self> {
        Arc::new(HostState {
            event_loop,
            dir_prototype: Object::new(),
            file_handle_prototype: Object::new(),
            files: Mutex::new(FdTable {
                next: FIRST_FD,
                open: HashMap::new(),
            }),
            dirs: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn insert_file(&self, file: File) -> i64 {
        let mut table = self.files();
        let fd = table.next;
        table.next += 1;
        table.open.insert(fd, file);
        fd
    }

    pub(crate) fn remove_file(&self, fd: i64) -> HostResult<File> {
        self.files().open.remove(&fd).ok_or(HostError::BadDescriptor(fd))
    }

    /// Run `f` against the open file behind `fd`.
    pub(crate) fn with_file<T>(&self, fd: i64, f: impl FnOnce(&mut File) -> HostResult<T>) -> HostResult<T> {
        let mut table = self.files();
        let file = table.open.get_mut(&fd).ok_or(HostError::BadDescriptor(fd))?;
        f(file)
    }

    pub(crate) fn open_descriptors(&self) -> usize {
        self.files().open.len()
    }

    pub(crate) fn register_dir(&self, dir: &Object, entries: VecDeque<String>) {
        self.dirs().insert(dir.id(), entries);
    }

    /// Next entry of an open directory, `None` when exhausted.
    pub(crate) fn next_dir_entry(&self, dir: &Object) -> HostResult<Option<String>> {
        let mut dirs = self.dirs();
        let entries = dirs.get_mut(&dir.id()).ok_or(HostError::DirClosed)?;
        Ok(entries.pop_front())
    }

    pub(crate) fn close_dir(&self, dir: &Object) -> HostResult<()> {
        self.dirs().remove(&dir.id()).map(|_| ()).ok_or(HostError::DirClosed)
    }

    pub(crate) fn open_dirs(&self) -> usize {
        self.dirs().len()
    }

    fn files(&self) -> MutexGuard<'_, FdTable> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dirs(&self) -> MutexGuard<'_, HashMap<u64, VecDeque<String>>> {
        self.dirs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Prototype members hold the state weakly, the surface holds it strongly.
pub(crate) fn upgrade(state: &Weak<HostState>) -> HostResult<Arc<HostState>> {
    state
        .upgrade()
        .ok_or_else(|| HostError::invalid_argument("filesystem host has been dropped"))
}

static UNDEFINED: Value = Value::Undefined;

pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&UNDEFINED)
}

pub(crate) fn path_arg(value: &Value) -> HostResult<PathBuf> {
    match value {
        Value::String(path) => Ok(PathBuf::from(path)),
        Value::Bytes(bytes) => Ok(PathBuf::from(String::from_utf8_lossy(bytes).into_owned())),
        Value::Object(url) => match url.get_str("href") {
            Some(href) => Ok(PathBuf::from(href.strip_prefix("file://").unwrap_or(&href))),
            None => Err(HostError::invalid_argument("path must be a string, buffer, or file URL")),
        },
        other => Err(HostError::invalid_argument(format!(
            "path must be a string, buffer, or file URL, got {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn fd_arg(value: &Value) -> HostResult<i64> {
    value
        .as_integer()
        .ok_or_else(|| HostError::invalid_argument(format!("fd must be an integer, got {}", value.type_name())))
}

pub(crate) fn number_arg(value: &Value, what: &str) -> HostResult<f64> {
    value
        .as_number()
        .ok_or_else(|| HostError::invalid_argument(format!("{what} must be a number")))
}

/// Bytes of a data argument; text is written as UTF-8.
pub(crate) fn data_arg(value: &Value) -> HostResult<Vec<u8>> {
    match value {
        Value::String(text) => Ok(text.clone().into_bytes()),
        Value::Bytes(bytes) => Ok(bytes.clone()),
        other => Err(HostError::invalid_argument(format!(
            "data must be a string or buffer, got {}",
            other.type_name()
        ))),
    }
}

/// `options` given either as an encoding name or as an object.
pub(crate) struct FileOptions {
    pub(crate) encoding: Option<String>,
    pub(crate) flag: Option<String>,
    pub(crate) recursive: bool,
}

impl FileOptions {
    pub(crate) fn parse(value: &Value) -> Self {
        match value {
            Value::String(encoding) => FileOptions {
                encoding: Some(encoding.clone()),
                flag: None,
                recursive: false,
            },
            Value::Object(options) => FileOptions {
                encoding: options.get_str("encoding"),
                flag: options.get_str("flag"),
                recursive: options.get("recursive").map_or(false, |v| v.is_truthy()),
            },
            _ => FileOptions {
                encoding: None,
                flag: None,
                recursive: false,
            },
        }
    }

    /// File contents as text when an encoding was requested.
    pub(crate) fn decode(&self, bytes: Vec<u8>) -> Value {
        match self.encoding {
            Some(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            None => Value::Bytes(bytes),
        }
    }
}

/// Open options for a flag string such as `r`, `w+`, or `ax`.
pub(crate) fn open_options(flag: &str) -> HostResult<OpenOptions> {
    let mut options = OpenOptions::new();
    match flag {
        "r" | "rs" | "sr" => options.read(true),
        "r+" | "rs+" | "sr+" => options.read(true).write(true),
        "w" => options.write(true).create(true).truncate(true),
        "wx" | "xw" => options.write(true).create_new(true),
        "w+" => options.read(true).write(true).create(true).truncate(true),
        "wx+" | "xw+" => options.read(true).write(true).create_new(true),
        "a" | "as" | "sa" => options.append(true).create(true),
        "ax" | "xa" => options.append(true).create_new(true),
        "a+" | "as+" | "sa+" => options.read(true).append(true).create(true),
        "ax+" | "xa+" => options.read(true).append(true).create_new(true),
        other => return Err(HostError::invalid_argument(format!("unknown file flag {other:?}"))),
    };
    Ok(options)
}

pub(crate) fn stat_object(metadata: &Metadata) -> Value {
    let stats = Object::new();
    stats.set("size", metadata.len());
    stats.set("mode", mode_bits(metadata));
    stats.set("isFile", metadata.is_file());
    stats.set("isDirectory", metadata.is_dir());
    stats.set("isSymbolicLink", metadata.file_type().is_symlink());
    let mtime_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
    stats.set("mtimeMs", mtime_ms);
    Value::Object(stats)
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}
