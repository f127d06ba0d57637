// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Instrumentation settings
//!
//! Settings come from a TOML file, from `FSTRACE_*` environment variables,
//! or both, with the environment taking precedence:
//!
//! ```toml
//! enabled = true
//! service = "billing-fs"
//! probe-path = "/etc/hostname"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FsTraceError, FsTraceResult};

/// Prefix of the environment overlay (`FSTRACE_SERVICE`, `FSTRACE_PROBE_PATH`, ...).
pub const ENV_PREFIX: &str = "FSTRACE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FsTraceConfig {
    /// When false, patching is a no-op.
    pub enabled: bool,
    /// Service name put on every span. Defaults to `<tracer service>-fs`.
    pub service: Option<String>,
    /// File opened once per patch to discover the file-handle prototype.
    /// Defaults to the running executable.
    pub probe_path: Option<PathBuf>,
}

impl Default for FsTraceConfig {
    fn default() -> Self {
        FsTraceConfig {
            enabled: true,
            service: None,
            probe_path: None,
        }
    }
}

impl FsTraceConfig {
    pub fn from_toml_str(text: &str) -> FsTraceResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> FsTraceResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| FsTraceError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults overlaid with `FSTRACE_*` variables only.
    pub fn from_env() -> FsTraceResult<Self> {
        Self::load(None)
    }

    /// Defaults, then the optional TOML file, then the environment.
    pub fn load(path: Option<&Path>) -> FsTraceResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(FsTraceError::ConfigIo {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                });
            }
            builder = builder
                .add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let built = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .convert_case(config::Case::Kebab),
            )
            .build()?;
        Ok(built.try_deserialize()?)
    }

    /// Service tag value for a tracer identifying itself as `tracer_service`.
    pub fn service_name(&self, tracer_service: &str) -> String {
        match &self.service {
            Some(service) => service.clone(),
            None => format!("{tracer_service}-fs"),
        }
    }

    pub fn resolved_probe_path(&self) -> Option<PathBuf> {
        self.probe_path.clone().or_else(|| std::env::current_exe().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_enable_instrumentation() {
        let config = FsTraceConfig::default();
        assert!(config.enabled);
        assert_eq!(config.service_name("api"), "api-fs");
        assert!(config.resolved_probe_path().is_some());
    }

    #[test]
    fn toml_uses_kebab_case_keys() {
        let config = FsTraceConfig::from_toml_str(
            r#"
            enabled = false
            service = "storage"
            probe-path = "/tmp/probe"
            "#,
        )
        .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.service_name("api"), "storage");
        assert_eq!(config.probe_path, Some(PathBuf::from("/tmp/probe")));
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = FsTraceConfig::from_toml_str("service = \"x\"").unwrap();
        assert!(config.enabled);
        assert_eq!(config.probe_path, None);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = FsTraceConfig::from_toml_str("enabled = \"maybe").unwrap_err();
        assert!(matches!(err, FsTraceError::ConfigParse(_)));
    }

    #[test]
    fn from_file_reports_the_path() {
        let missing = Path::new("/definitely/not/here.toml");
        match FsTraceConfig::from_file(missing).unwrap_err() {
            FsTraceError::ConfigIo { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn load_reads_the_file_and_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "service = \"from-file\"\nenabled = true").unwrap();

        std::env::set_var("FSTRACE_PROBE_PATH", "/from/env");
        let config = FsTraceConfig::load(Some(file.path())).unwrap();
        std::env::remove_var("FSTRACE_PROBE_PATH");

        assert_eq!(config.service.as_deref(), Some("from-file"));
        assert_eq!(config.probe_path, Some(PathBuf::from("/from/env")));
    }
}
