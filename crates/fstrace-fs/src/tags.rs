// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tag derivation
//!
//! Every traced operation maps its arguments to a tag set through one of the
//! [`TagRule`]s below. A rule that cannot make sense of its arguments yields
//! `None`, and the call then runs untraced. Rules never fail and never touch
//! the arguments they read.

use std::borrow::Cow;

use fstrace_host::{Call, Object, Receiver, Value};
use fstrace_tracer::Tags;

pub const COMPONENT: &str = "fs";

pub mod keys {
    pub const COMPONENT: &str = "component";
    pub const SERVICE: &str = "service.name";
    pub const RESOURCE: &str = "resource.name";
    pub const PATH: &str = "file.path";
    pub const DESCRIPTOR: &str = "file.descriptor";
    pub const SRC: &str = "file.src";
    pub const DEST: &str = "file.dest";
    pub const FLAG: &str = "file.flag";
    pub const MODE: &str = "file.mode";
    pub const UID: &str = "file.uid";
    pub const GID: &str = "file.gid";
}

/// Values shared by every tag set produced by one instrumentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagContext {
    service: String,
}

impl TagContext {
    pub fn new(service: impl Into<String>) -> Self {
        TagContext {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

/// What an operation acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    Descriptor(i64),
    Path(String),
    Transfer {
        src: Option<String>,
        dest: Option<String>,
    },
}

impl Subject {
    /// Classify a raw subject argument.
    ///
    /// Integral numbers are descriptors, text and byte buffers are paths, and
    /// objects carrying `src`/`dest` describe a transfer. An object with only a
    /// string `href` is a URL path. Anything else has no subject.
    pub fn from_value(value: &Value) -> Option<Subject> {
        match value {
            Value::Number(_) => value.as_integer().map(Subject::Descriptor),
            Value::String(path) => Some(Subject::Path(path.clone())),
            Value::Bytes(bytes) => Some(Subject::Path(String::from_utf8_lossy(bytes).into_owned())),
            Value::Object(object) => {
                let src = object.get_own("src").filter(Value::is_truthy);
                let dest = object.get_own("dest").filter(Value::is_truthy);
                if src.is_some() || dest.is_some() {
                    return Some(Subject::Transfer {
                        src: src.as_ref().and_then(path_text),
                        dest: dest.as_ref().and_then(path_text),
                    });
                }
                object.get_str("href").map(Subject::Path)
            }
            _ => None,
        }
    }

    fn apply(&self, tags: &mut Tags) {
        match self {
            Subject::Descriptor(fd) => {
                let fd = fd.to_string();
                tags.insert(keys::RESOURCE, fd.clone());
                tags.insert(keys::DESCRIPTOR, fd);
            }
            Subject::Path(path) => {
                tags.insert(keys::RESOURCE, path.clone());
                tags.insert(keys::PATH, path.clone());
            }
            Subject::Transfer { src, dest } => {
                if let Some(src) = src {
                    tags.insert(keys::SRC, src.clone());
                }
                if let Some(dest) = dest {
                    tags.insert(keys::DEST, dest.clone());
                }
                if let Some(resource) = src.as_ref().or(dest.as_ref()) {
                    tags.insert(keys::RESOURCE, resource.clone());
                }
            }
        }
    }
}

/// Textual form of a path-like argument.
fn path_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Number(n) => Some(number_text(*n)),
        Value::Object(object) => object.get_str("href"),
        _ => None,
    }
}

fn number_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn flag_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(number_text(*n)),
        _ => None,
    }
}

/// Build the tag set for `subject`.
///
/// When `options` is an object with an own `fd` member, that value replaces
/// `subject`. A `default_flag` turns on flag reporting: the options' `flag`,
/// else their `flags`, else the default.
pub fn make_fs_tags(
    ctx: &TagContext,
    subject: &Value,
    options: Option<&Value>,
    default_flag: Option<&str>,
) -> Option<Tags> {
    let options = options.and_then(Value::as_object);
    let substituted = options.and_then(|o| o.get_own("fd"));
    let subject = substituted.as_ref().unwrap_or(subject);
    let flag = default_flag.map(|default| resolve_flag(options, default));
    tags_with_flag(ctx, subject, flag)
}

fn resolve_flag(options: Option<&Object>, default: &str) -> String {
    options
        .and_then(|o| {
            ["flag", "flags"]
                .into_iter()
                .filter_map(|key| o.get(key).filter(Value::is_truthy))
                .find_map(|v| flag_text(&v))
        })
        .unwrap_or_else(|| default.to_string())
}

fn tags_with_flag(ctx: &TagContext, subject: &Value, flag: Option<String>) -> Option<Tags> {
    Subject::from_value(subject).map(|subject| subject_tags(ctx, &subject, flag))
}

fn subject_tags(ctx: &TagContext, subject: &Subject, flag: Option<String>) -> Tags {
    let mut tags = Tags::new();
    tags.insert(keys::COMPONENT, COMPONENT);
    tags.insert(keys::SERVICE, ctx.service());
    if let Some(flag) = flag {
        tags.insert(keys::FLAG, flag);
    }
    subject.apply(&mut tags);
    tags
}

/// Arguments as a tag rule sees them.
#[derive(Clone, Debug)]
pub enum RuleInput<'a> {
    /// Called as a free function; every subject is positional.
    Function(&'a [Value]),
    /// Called on a handle. A truthy `fd` on the receiver acts as an implicit
    /// first argument for descriptor rules.
    Method {
        receiver: &'a Object,
        descriptor: Option<Value>,
        args: &'a [Value],
    },
}

static UNDEFINED: Value = Value::Undefined;

impl<'a> RuleInput<'a> {
    pub fn from_call(call: &'a Call) -> Self {
        match &call.receiver {
            Receiver::Method(receiver) => RuleInput::Method {
                receiver,
                descriptor: receiver.get("fd").filter(Value::is_truthy),
                args: &call.args,
            },
            Receiver::Unbound => RuleInput::Function(&call.args),
        }
    }

    pub fn args(&self) -> &'a [Value] {
        match self {
            RuleInput::Function(args) => *args,
            RuleInput::Method { args, .. } => *args,
        }
    }

    pub fn receiver(&self) -> Option<&'a Object> {
        match self {
            RuleInput::Method { receiver, .. } => Some(*receiver),
            RuleInput::Function(_) => None,
        }
    }

    /// Positional arguments with the receiver's descriptor prepended.
    fn descriptor_args(&self) -> Cow<'a, [Value]> {
        match self {
            RuleInput::Method {
                descriptor: Some(fd),
                args,
                ..
            } => {
                let mut shifted = Vec::with_capacity(args.len() + 1);
                shifted.push(fd.clone());
                shifted.extend(args.iter().cloned());
                Cow::Owned(shifted)
            }
            _ => Cow::Borrowed(self.args()),
        }
    }
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&UNDEFINED)
}

/// Tag derivation rules, one per argument shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagRule {
    /// `(path, flag?)`, flag defaults to `r`.
    Open,
    /// `(fd)` with an integral descriptor.
    Close,
    /// `(path | fd, options?)`, flag defaults to `r`.
    ReadFile,
    /// `(path | fd, data, options?)`, flag defaults to `w`.
    WriteFile,
    /// `(path | fd, data, options?)`, flag defaults to `a`.
    AppendFile,
    /// `(path, ...)` where the path is not a number.
    Path,
    /// `(fd, ...)` where the descriptor may come from the receiver.
    Descriptor,
    /// `(src, dest, ...)`, both present.
    CopyLike,
    Chmod,
    Fchmod,
    Chown,
    Fchown,
    /// The receiver's own `path` member.
    ReceiverPath,
    /// `(path, options?)`, flag defaults to `r`.
    ReadStream,
    /// `(path, options?)`, flag defaults to `w`.
    WriteStream,
    /// `(path | fd)` without flag.
    Existence,
}

impl TagRule {
    pub fn derive(self, ctx: &TagContext, input: &RuleInput<'_>) -> Option<Tags> {
        let args = input.args();
        match self {
            TagRule::Open => {
                let flag = arg(args, 1);
                let flag = if flag.is_truthy() && !flag.is_function() {
                    flag_text(flag)
                } else {
                    None
                };
                tags_with_flag(ctx, arg(args, 0), Some(flag.unwrap_or_else(|| "r".to_string())))
            }
            TagRule::Close => {
                let fd = arg(args, 0);
                fd.as_integer()?;
                tags_with_flag(ctx, fd, None)
            }
            TagRule::ReadFile => make_fs_tags(ctx, arg(args, 0), Some(arg(args, 1)), Some("r")),
            TagRule::WriteFile => make_fs_tags(ctx, arg(args, 0), Some(arg(args, 2)), Some("w")),
            TagRule::AppendFile => make_fs_tags(ctx, arg(args, 0), Some(arg(args, 2)), Some("a")),
            TagRule::Path => {
                let path = arg(args, 0);
                if matches!(path, Value::Number(_)) {
                    return None;
                }
                make_fs_tags(ctx, path, None, None)
            }
            TagRule::Descriptor => {
                let args = input.descriptor_args();
                let fd = arg(&args, 0);
                if !matches!(fd, Value::Number(_)) {
                    return None;
                }
                make_fs_tags(ctx, fd, None, None)
            }
            TagRule::CopyLike => {
                let (src, dest) = (arg(args, 0), arg(args, 1));
                if !src.is_truthy() || !dest.is_truthy() {
                    return None;
                }
                let transfer = Subject::Transfer {
                    src: path_text(src),
                    dest: path_text(dest),
                };
                Some(subject_tags(ctx, &transfer, None))
            }
            TagRule::Chmod | TagRule::Chown => {
                if matches!(arg(args, 0), Value::Number(_)) {
                    return None;
                }
                if self == TagRule::Chmod {
                    mode_tags(ctx, args)
                } else {
                    owner_tags(ctx, args)
                }
            }
            TagRule::Fchmod | TagRule::Fchown => {
                let args = input.descriptor_args();
                if !matches!(arg(&args, 0), Value::Number(_)) {
                    return None;
                }
                if self == TagRule::Fchmod {
                    mode_tags(ctx, &args)
                } else {
                    owner_tags(ctx, &args)
                }
            }
            TagRule::ReceiverPath => {
                let path = input.receiver()?.get("path")?;
                make_fs_tags(ctx, &path, None, None)
            }
            TagRule::ReadStream => make_fs_tags(ctx, arg(args, 0), Some(arg(args, 1)), Some("r")),
            TagRule::WriteStream => make_fs_tags(ctx, arg(args, 0), Some(arg(args, 1)), Some("w")),
            TagRule::Existence => make_fs_tags(ctx, arg(args, 0), None, None),
        }
    }
}

/// `(path | fd, mode)`: the mode must be a non-negative integer and is
/// reported in octal.
fn mode_tags(ctx: &TagContext, args: &[Value]) -> Option<Tags> {
    let mode = arg(args, 1).as_integer().filter(|m| *m >= 0)?;
    let mut tags = make_fs_tags(ctx, arg(args, 0), None, None)?;
    tags.insert(keys::MODE, format!("{mode:o}"));
    Some(tags)
}

/// `(path | fd, uid, gid)`: both ids must be numbers.
fn owner_tags(ctx: &TagContext, args: &[Value]) -> Option<Tags> {
    let uid = arg(args, 1).as_number()?;
    let gid = arg(args, 2).as_number()?;
    let mut tags = make_fs_tags(ctx, arg(args, 0), None, None)?;
    tags.insert(keys::UID, number_text(uid));
    tags.insert(keys::GID, number_text(gid));
    Some(tags)
}
