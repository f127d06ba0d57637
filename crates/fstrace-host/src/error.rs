// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types raised by host operations

use std::io;

/// Failure of a host operation.
///
/// Instrumentation never constructs these for its own purposes; they are the
/// errors of the wrapped call and are handed back to the caller untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{code}: {message}")]
    Io { code: String, message: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("bad file descriptor: {0}")]
    BadDescriptor(i64),
    #[error("{0} is not a function")]
    NotCallable(String),
    #[error("directory handle already closed")]
    DirClosed,
    #[error("write after end")]
    StreamEnded,
}

impl HostError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        HostError::InvalidArgument(message.into())
    }

    /// errno-style code, when the error originated from the operating system.
    pub fn code(&self) -> Option<&str> {
        match self {
            HostError::Io { code, .. } => Some(code),
            HostError::BadDescriptor(_) => Some("EBADF"),
            _ => None,
        }
    }
}

impl From<io::Error> for HostError {
    fn from(err: io::Error) -> Self {
        HostError::Io {
            code: errno_code(&err).to_string(),
            message: err.to_string(),
        }
    }
}

fn errno_code(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::NotFound => "ENOENT",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::AlreadyExists => "EEXIST",
        io::ErrorKind::InvalidInput => "EINVAL",
        io::ErrorKind::Unsupported => "ENOTSUP",
        io::ErrorKind::UnexpectedEof => "EOF",
        _ => "EIO",
    }
}

pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_carry_errno_code() {
        let err: HostError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code(), Some("ENOENT"));
        assert_eq!(err.to_string(), "ENOENT: gone");
    }

    #[test]
    fn bad_descriptor_maps_to_ebadf() {
        assert_eq!(HostError::BadDescriptor(9).code(), Some("EBADF"));
        assert_eq!(HostError::DirClosed.code(), None);
    }
}
