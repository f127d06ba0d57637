// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation registry
//!
//! Static table from base operation name to the rule that tags it, plus the
//! naming and completion-convention decisions for every traced surface.

use fstrace_host::StreamKind;

use crate::tags::TagRule;

pub const SYNC_SUFFIX: &str = "Sync";

/// Members of a file-handle prototype that are never traced.
pub const FILE_HANDLE_EXCLUDED: &[&str] = &["constructor", "fd", "getAsyncId"];

/// Directory-handle methods traced on the prototype.
pub const DIR_METHODS: &[&str] = &["close", "closeSync", "read", "readSync"];

static OPERATIONS: &[(&str, TagRule)] = &[
    ("open", TagRule::Open),
    ("close", TagRule::Close),
    ("readFile", TagRule::ReadFile),
    ("writeFile", TagRule::WriteFile),
    ("appendFile", TagRule::AppendFile),
    ("access", TagRule::Path),
    ("copyFile", TagRule::CopyLike),
    ("stat", TagRule::Path),
    ("lstat", TagRule::Path),
    ("fstat", TagRule::Descriptor),
    ("readdir", TagRule::Path),
    ("opendir", TagRule::Path),
    ("read", TagRule::Descriptor),
    ("write", TagRule::Descriptor),
    ("writev", TagRule::Descriptor),
    ("chmod", TagRule::Chmod),
    ("lchmod", TagRule::Chmod),
    ("fchmod", TagRule::Fchmod),
    ("chown", TagRule::Chown),
    ("lchown", TagRule::Chown),
    ("fchown", TagRule::Fchown),
    ("realpath", TagRule::Path),
    ("readlink", TagRule::Path),
    ("unlink", TagRule::Path),
    ("symlink", TagRule::CopyLike),
    ("link", TagRule::CopyLike),
    ("rmdir", TagRule::Path),
    ("rename", TagRule::CopyLike),
    ("fsync", TagRule::Descriptor),
    ("fdatasync", TagRule::Descriptor),
    ("mkdir", TagRule::Path),
    ("truncate", TagRule::Path),
    ("ftruncate", TagRule::Descriptor),
    ("utimes", TagRule::Path),
    ("futimes", TagRule::Descriptor),
    ("mkdtemp", TagRule::Path),
];

/// Rule registered for a base operation name.
pub fn rule_for(name: &str) -> Option<TagRule> {
    OPERATIONS
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, rule)| *rule)
}

/// Every registered base name, in table order.
pub fn operation_names() -> impl Iterator<Item = &'static str> {
    OPERATIONS.iter().map(|(name, _)| *name)
}

/// Split a trailing `Sync` off `name`.
pub fn base_name(name: &str) -> (&str, bool) {
    match name.strip_suffix(SYNC_SUFFIX) {
        Some(base) => (base, true),
        None => (name, false),
    }
}

/// File-handle method `m` uses the rule of the descriptor operation `fm`,
/// falling back to the plain descriptor rule.
pub fn file_handle_rule(method: &str) -> TagRule {
    rule_for(&format!("f{method}")).unwrap_or(TagRule::Descriptor)
}

/// How a traced call reports completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convention {
    /// Returns or fails immediately.
    Sync,
    /// Last argument is a completion callback taking an error first.
    Callback,
    /// Returns a promise, or takes a completion callback when the last
    /// argument is a function.
    Promise,
    /// Returns a stream that ends with a terminal event.
    Stream(StreamKind),
    /// Second argument is a completion callback taking a single boolean.
    Exists,
}

/// A traced operation: span name, tag rule, completion convention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub name: String,
    pub span_name: String,
    pub convention: Convention,
    pub rule: TagRule,
}

impl OperationDescriptor {
    fn new(name: &str, span_name: String, convention: Convention, rule: TagRule) -> Self {
        OperationDescriptor {
            name: name.to_string(),
            span_name,
            convention,
            rule,
        }
    }

    /// A member of the flat callback/synchronous surface.
    pub fn flat(name: &str) -> Option<Self> {
        let (base, sync) = base_name(name);
        let rule = rule_for(base)?;
        let convention = if sync {
            Convention::Sync
        } else {
            Convention::Callback
        };
        Some(Self::new(name, format!("fs.{}", name.to_lowercase()), convention, rule))
    }

    /// A member of the promise-returning surface.
    pub fn promises(name: &str) -> Option<Self> {
        let rule = rule_for(name)?;
        Some(Self::new(
            name,
            format!("fs.promises.{}", name.to_lowercase()),
            Convention::Promise,
            rule,
        ))
    }

    /// A method of the file-handle prototype.
    pub fn file_handle(method: &str) -> Option<Self> {
        if FILE_HANDLE_EXCLUDED.contains(&method) {
            return None;
        }
        Some(Self::new(
            method,
            format!("fs.filehandle.{}", method.to_lowercase()),
            Convention::Promise,
            file_handle_rule(method),
        ))
    }

    /// A method of the directory-handle prototype, or one of its hidden
    /// promisified slots (`read`, `close`).
    pub fn dir(method: &str) -> Option<Self> {
        if !DIR_METHODS.contains(&method) {
            return None;
        }
        let (_, sync) = base_name(method);
        let convention = if sync {
            Convention::Sync
        } else {
            Convention::Promise
        };
        Some(Self::new(
            method,
            format!("fs.dir.{}", method.to_lowercase()),
            convention,
            TagRule::ReceiverPath,
        ))
    }

    pub fn stream(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Readable => Self::new(
                "createReadStream",
                "fs.readstream".to_string(),
                Convention::Stream(kind),
                TagRule::ReadStream,
            ),
            StreamKind::Writable => Self::new(
                "createWriteStream",
                "fs.writestream".to_string(),
                Convention::Stream(kind),
                TagRule::WriteStream,
            ),
        }
    }

    pub fn exists() -> Self {
        Self::new("exists", "fs.exists".to_string(), Convention::Exists, TagRule::Existence)
    }

    pub fn exists_sync() -> Self {
        Self::new("existsSync", "fs.existssync".to_string(), Convention::Sync, TagRule::Path)
    }
}
