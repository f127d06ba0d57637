// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation bodies
//!
//! Each body runs synchronously against `std::fs` and is shared by the
//! synchronous, callback, and promise flavours of its operation.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fstrace_host::{HostError, HostResult, Value};

use crate::dir;
use crate::state::{arg, data_arg, fd_arg, number_arg, open_options, path_arg, stat_object, FileOptions, HostState};

pub(crate) type OpBody = fn(&Arc<HostState>, &[Value]) -> HostResult<Value>;

pub(crate) static OPERATIONS: &[(&str, OpBody)] = &[
    ("open", open),
    ("close", close),
    ("read", read),
    ("write", write),
    ("readFile", read_file),
    ("writeFile", write_file),
    ("appendFile", append_file),
    ("access", access),
    ("copyFile", copy_file),
    ("stat", stat),
    ("lstat", lstat),
    ("fstat", fstat),
    ("readdir", readdir),
    ("opendir", dir::opendir),
    ("chmod", chmod),
    ("fchmod", fchmod),
    ("chown", chown),
    ("lchown", lchown),
    ("fchown", fchown),
    ("realpath", realpath),
    ("readlink", readlink),
    ("unlink", unlink),
    ("symlink", symlink),
    ("link", link),
    ("rmdir", rmdir),
    ("rename", rename),
    ("fsync", fsync),
    ("fdatasync", fdatasync),
    ("mkdir", mkdir),
    ("truncate", truncate),
    ("ftruncate", ftruncate),
    ("utimes", utimes),
    ("futimes", futimes),
    ("mkdtemp", mkdtemp),
];

/// Members of the promise surface. Descriptor operations live on file
/// handles there instead.
pub(crate) const PROMISE_OPERATIONS: &[&str] = &[
    "access",
    "appendFile",
    "chmod",
    "chown",
    "copyFile",
    "lchown",
    "link",
    "lstat",
    "mkdir",
    "mkdtemp",
    "opendir",
    "readdir",
    "readFile",
    "readlink",
    "realpath",
    "rename",
    "rmdir",
    "stat",
    "symlink",
    "truncate",
    "unlink",
    "utimes",
    "writeFile",
];

pub(crate) fn body(name: &str) -> Option<OpBody> {
    OPERATIONS.iter().find(|(n, _)| *n == name).map(|(_, body)| *body)
}

fn done() -> HostResult<Value> {
    Ok(Value::Undefined)
}

fn path_text(path: &Path) -> Value {
    Value::from(path.to_string_lossy().into_owned())
}

pub(crate) fn open(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let path = path_arg(arg(args, 0))?;
    let flag = arg(args, 1).as_str().unwrap_or("r");
    let file = open_options(flag)?.open(path)?;
    Ok(Value::from(state.insert_file(file)))
}

pub(crate) fn close(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    state.remove_file(fd_arg(arg(args, 0))?)?;
    done()
}

/// `(fd, length?, position?)` resolves to the bytes read.
pub(crate) fn read(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let fd = fd_arg(arg(args, 0))?;
    let length = arg(args, 1).as_integer().filter(|n| *n >= 0);
    let position = arg(args, 2).as_integer().filter(|n| *n >= 0);
    state.with_file(fd, |file| {
        if let Some(position) = position {
            file.seek(SeekFrom::Start(position as u64))?;
        }
        let mut buffer = Vec::new();
        match length {
            Some(length) => {
                file.take(length as u64).read_to_end(&mut buffer)?;
            }
            None => {
                file.read_to_end(&mut buffer)?;
            }
        }
        Ok(Value::Bytes(buffer))
    })
}

/// `(fd, data)` resolves to the number of bytes written.
pub(crate) fn write(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let fd = fd_arg(arg(args, 0))?;
    let data = data_arg(arg(args, 1))?;
    state.with_file(fd, |file| {
        file.write_all(&data)?;
        Ok(Value::from(data.len() as u64))
    })
}

pub(crate) fn read_file(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let options = FileOptions::parse(arg(args, 1));
    let mut bytes = Vec::new();
    match arg(args, 0) {
        Value::Number(_) => {
            let fd = fd_arg(arg(args, 0))?;
            state.with_file(fd, |file| Ok(file.read_to_end(&mut bytes)?))?;
        }
        subject => {
            let flag = options.flag.as_deref().unwrap_or("r");
            open_options(flag)?.open(path_arg(subject)?)?.read_to_end(&mut bytes)?;
        }
    }
    Ok(options.decode(bytes))
}

fn store(state: &Arc<HostState>, args: &[Value], default_flag: &str) -> HostResult<Value> {
    let data = data_arg(arg(args, 1))?;
    let options = FileOptions::parse(arg(args, 2));
    match arg(args, 0) {
        Value::Number(_) => {
            let fd = fd_arg(arg(args, 0))?;
            state.with_file(fd, |file| Ok(file.write_all(&data)?))?;
        }
        subject => {
            let flag = options.flag.as_deref().unwrap_or(default_flag);
            open_options(flag)?.open(path_arg(subject)?)?.write_all(&data)?;
        }
    }
    done()
}

pub(crate) fn write_file(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    store(state, args, "w")
}

pub(crate) fn append_file(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    store(state, args, "a")
}

pub(crate) fn access(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    fs::metadata(path_arg(arg(args, 0))?)?;
    done()
}

pub(crate) fn copy_file(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    fs::copy(path_arg(arg(args, 0))?, path_arg(arg(args, 1))?)?;
    done()
}

pub(crate) fn stat(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    Ok(stat_object(&fs::metadata(path_arg(arg(args, 0))?)?))
}

pub(crate) fn lstat(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    Ok(stat_object(&fs::symlink_metadata(path_arg(arg(args, 0))?)?))
}

pub(crate) fn fstat(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let fd = fd_arg(arg(args, 0))?;
    state.with_file(fd, |file| Ok(stat_object(&file.metadata()?)))
}

/// Entry names, sorted.
pub(crate) fn readdir(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let names = dir::entry_names(&path_arg(arg(args, 0))?)?;
    Ok(Value::Array(names.into_iter().map(Value::from).collect()))
}

fn mode_arg(value: &Value) -> HostResult<u32> {
    value
        .as_integer()
        .and_then(|mode| u32::try_from(mode).ok())
        .ok_or_else(|| HostError::invalid_argument("mode must be a non-negative integer"))
}

#[cfg(unix)]
fn permissions(mode: u32) -> HostResult<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn permissions(_mode: u32) -> HostResult<fs::Permissions> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
}

pub(crate) fn chmod(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let mode = mode_arg(arg(args, 1))?;
    fs::set_permissions(path_arg(arg(args, 0))?, permissions(mode)?)?;
    done()
}

pub(crate) fn fchmod(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let fd = fd_arg(arg(args, 0))?;
    let permissions = permissions(mode_arg(arg(args, 1))?)?;
    state.with_file(fd, |file| Ok(file.set_permissions(permissions)?))?;
    done()
}

/// Owner ids; -1 leaves the id unchanged.
fn owner_args(args: &[Value]) -> HostResult<(Option<u32>, Option<u32>)> {
    let id = |value: &Value, what: &str| -> HostResult<Option<u32>> {
        let n = number_arg(value, what)?;
        Ok(if n < 0.0 { None } else { Some(n as u32) })
    };
    Ok((id(arg(args, 1), "uid")?, id(arg(args, 2), "gid")?))
}

#[cfg(unix)]
pub(crate) fn chown(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let (uid, gid) = owner_args(args)?;
    std::os::unix::fs::chown(path_arg(arg(args, 0))?, uid, gid)?;
    done()
}

#[cfg(unix)]
pub(crate) fn lchown(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let (uid, gid) = owner_args(args)?;
    std::os::unix::fs::lchown(path_arg(arg(args, 0))?, uid, gid)?;
    done()
}

#[cfg(unix)]
pub(crate) fn fchown(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let fd = fd_arg(arg(args, 0))?;
    let (uid, gid) = owner_args(args)?;
    state.with_file(fd, |file| Ok(std::os::unix::fs::fchown(&*file, uid, gid)?))?;
    done()
}

#[cfg(not(unix))]
pub(crate) fn chown(_: &Arc<HostState>, _: &[Value]) -> HostResult<Value> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
}

#[cfg(not(unix))]
pub(crate) fn lchown(_: &Arc<HostState>, _: &[Value]) -> HostResult<Value> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
}

#[cfg(not(unix))]
pub(crate) fn fchown(_: &Arc<HostState>, _: &[Value]) -> HostResult<Value> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
}

pub(crate) fn realpath(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    Ok(path_text(&fs::canonicalize(path_arg(arg(args, 0))?)?))
}

pub(crate) fn readlink(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    Ok(path_text(&fs::read_link(path_arg(arg(args, 0))?)?))
}

pub(crate) fn unlink(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    fs::remove_file(path_arg(arg(args, 0))?)?;
    done()
}

#[cfg(unix)]
pub(crate) fn symlink(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    std::os::unix::fs::symlink(path_arg(arg(args, 0))?, path_arg(arg(args, 1))?)?;
    done()
}

#[cfg(not(unix))]
pub(crate) fn symlink(_: &Arc<HostState>, _: &[Value]) -> HostResult<Value> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
}

pub(crate) fn link(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    fs::hard_link(path_arg(arg(args, 0))?, path_arg(arg(args, 1))?)?;
    done()
}

pub(crate) fn rmdir(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    fs::remove_dir(path_arg(arg(args, 0))?)?;
    done()
}

pub(crate) fn rename(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    fs::rename(path_arg(arg(args, 0))?, path_arg(arg(args, 1))?)?;
    done()
}

pub(crate) fn fsync(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    state.with_file(fd_arg(arg(args, 0))?, |file| Ok(file.sync_all()?))?;
    done()
}

pub(crate) fn fdatasync(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    state.with_file(fd_arg(arg(args, 0))?, |file| Ok(file.sync_data()?))?;
    done()
}

pub(crate) fn mkdir(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let path = path_arg(arg(args, 0))?;
    if FileOptions::parse(arg(args, 1)).recursive {
        fs::create_dir_all(&path)?;
    } else {
        fs::create_dir(&path)?;
    }
    done()
}

pub(crate) fn truncate(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let len = arg(args, 1).as_integer().unwrap_or(0).max(0) as u64;
    fs::OpenOptions::new()
        .write(true)
        .open(path_arg(arg(args, 0))?)?
        .set_len(len)?;
    done()
}

pub(crate) fn ftruncate(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let len = arg(args, 1).as_integer().unwrap_or(0).max(0) as u64;
    state.with_file(fd_arg(arg(args, 0))?, |file| Ok(file.set_len(len)?))?;
    done()
}

/// Seconds since the epoch, fractional allowed.
fn time_arg(value: &Value, what: &str) -> HostResult<SystemTime> {
    let secs = number_arg(value, what)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(HostError::invalid_argument(format!("{what} must be a non-negative time")));
    }
    Ok(UNIX_EPOCH + Duration::from_secs_f64(secs))
}

fn file_times(args: &[Value]) -> HostResult<fs::FileTimes> {
    Ok(fs::FileTimes::new()
        .set_accessed(time_arg(arg(args, 1), "atime")?)
        .set_modified(time_arg(arg(args, 2), "mtime")?))
}

pub(crate) fn utimes(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let times = file_times(args)?;
    fs::File::options()
        .write(true)
        .open(path_arg(arg(args, 0))?)?
        .set_times(times)?;
    done()
}

pub(crate) fn futimes(state: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let times = file_times(args)?;
    state.with_file(fd_arg(arg(args, 0))?, |file| Ok(file.set_times(times)?))?;
    done()
}

/// `(prefix)` creates `<prefix>XXXXXX` and resolves to its path.
pub(crate) fn mkdtemp(_: &Arc<HostState>, args: &[Value]) -> HostResult<Value> {
    let prefix = path_arg(arg(args, 0))?;
    let parent = prefix
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let stem = prefix
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let created = tempfile::Builder::new()
        .prefix(&stem)
        .rand_bytes(6)
        .keep(true)
        .tempdir_in(parent)?;
    Ok(path_text(created.path()))
}
