// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the instrumentation layer

use std::io;
use std::path::PathBuf;

/// Configuration failures.
///
/// Patching and intercepted calls never fail on the instrumentation's
/// account: unwrappable members are skipped and logged, and host errors pass
/// through to the caller unchanged.
#[derive(thiserror::Error, Debug)]
pub enum FsTraceError {
    #[error("failed to read {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),
}

pub type FsTraceResult<T> = Result<T, FsTraceError>;
