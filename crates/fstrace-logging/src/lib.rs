// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for fstrace binaries
//!
//! Diagnostics about patching go through `tracing`; so do the spans emitted by
//! the tracing-backed tracer. This crate installs the subscriber that renders
//! both, either on the console or in a log file, as plaintext or JSON.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use fstrace_tracer::tracing_tracer::SPAN_TARGET;
pub use tracing::Level;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plaintext,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plaintext" => Ok(LogFormat::Plaintext),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {s}. Use 'plaintext' or 'json'")),
        }
    }
}

/// Log level accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

/// Logging flags for `#[command(flatten)]`.
///
/// Output goes to stdout unless `--log-file` is given.
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    #[arg(long, value_enum, help = "Log verbosity level (default: info)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    #[arg(long, value_enum, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// A bare file name lands in the standard log directory.
    #[arg(long, help = "Log filename")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,

    #[arg(long, help = "Report every finished filesystem span")]
    #[serde(default)]
    pub log_spans: bool,
}

impl CliLoggingArgs {
    pub fn init(self, component: &str) -> anyhow::Result<()> {
        self.init_with_default_level(component, CliLogLevel::Info)
    }

    pub fn init_with_default_level(self, component: &str, default_level: CliLogLevel) -> anyhow::Result<()> {
        let settings = LogSettings {
            component: component.to_string(),
            level: self.log_level.unwrap_or(default_level).into(),
            format: self.log_format.unwrap_or_default(),
            spans: self.log_spans,
        };
        match self.log_file.as_deref() {
            Some(file) => init_to_file(&settings, &resolve_log_path(file)),
            None => init_with_writer(&settings, io::stdout),
        }
    }
}

/// Everything the subscriber needs besides its writer.
#[derive(Clone, Debug)]
pub struct LogSettings {
    pub component: String,
    pub level: Level,
    pub format: LogFormat,
    /// Lift [`SPAN_TARGET`] to debug so finished spans are reported.
    pub spans: bool,
}

impl LogSettings {
    pub fn new(component: impl Into<String>, level: Level) -> Self {
        LogSettings {
            component: component.into(),
            level,
            format: LogFormat::Plaintext,
            spans: false,
        }
    }

    /// `RUST_LOG` wins when set.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    fn directives(&self) -> String {
        let component = self.component.replace('-', "_");
        let mut directives = format!("{level},{component}={level}", level = self.level);
        if self.spans {
            directives.push_str(&format!(",{SPAN_TARGET}=debug"));
        }
        directives
    }
}

fn resolve_log_path(file: &str) -> PathBuf {
    let path = Path::new(file);
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => path.to_path_buf(),
        _ => standard_log_dir().join(file),
    }
}

/// Platform log directory: `~/Library/Logs/fstrace` on macOS, the data
/// directory elsewhere.
pub fn standard_log_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    let base = dirs::home_dir().map(|home| home.join("Library").join("Logs"));
    #[cfg(not(target_os = "macos"))]
    let base = dirs::data_dir().or_else(dirs::home_dir);

    base.unwrap_or_else(std::env::temp_dir).join("fstrace")
}

pub fn standard_log_path(component: &str) -> PathBuf {
    standard_log_dir().join(format!("{component}.log"))
}

pub fn init(component: &str, level: Level, format: LogFormat) -> anyhow::Result<()> {
    let settings = LogSettings {
        format,
        ..LogSettings::new(component, level)
    };
    init_with_writer(&settings, io::stdout)
}

pub fn init_to_file(settings: &LogSettings, log_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    init_with_writer(settings, log_file)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_with_writer<W>(settings: &LogSettings, writer: W) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = settings.filter();
    match settings.format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }
    Ok(())
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    //! Thread-local log capture for assertions.

    use std::io::Write;
    use std::sync::{Arc, Mutex, MutexGuard};

    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::EnvFilter;

    #[derive(Clone, Default)]
    pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.lock()).into_owned()
        }

        pub fn contains(&self, needle: &str) -> bool {
            self.contents().contains(needle)
        }

        fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
            self.0.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    pub struct CaptureWriter<'a>(MutexGuard<'a, Vec<u8>>);

    impl Write for CaptureWriter<'_> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CaptureWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            CaptureWriter(self.lock())
        }
    }

    /// Capture everything at `directives` on the current thread until the
    /// guard drops.
    pub fn capture(directives: &str) -> (CapturedLogs, DefaultGuard) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::registry().with(EnvFilter::new(directives)).with(
            tracing_subscriber::fmt::layer()
                .with_writer(logs.clone())
                .with_ansi(false),
        );
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_component_and_optional_spans() {
        let mut settings = LogSettings::new("fstrace-demo", Level::WARN);
        assert_eq!(settings.directives(), "WARN,fstrace_demo=WARN");
        settings.spans = true;
        assert_eq!(settings.directives(), "WARN,fstrace_demo=WARN,fstrace::span=debug");
    }

    #[test]
    fn bare_file_names_land_in_the_standard_directory() {
        assert_eq!(resolve_log_path("run.log"), standard_log_dir().join("run.log"));
        let tmp = tempfile::tempdir().unwrap();
        let explicit = tmp.path().join("x.log");
        assert_eq!(resolve_log_path(explicit.to_str().unwrap()), explicit);
        assert!(standard_log_path("demo").ends_with("fstrace/demo.log"));
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(Level::from(CliLogLevel::default()), Level::INFO);
    }

    #[test]
    fn capture_collects_events_on_this_thread() {
        let (logs, _guard) = test_utils::capture("debug");
        tracing::info!(object = 7, "patched filesystem surface");
        assert!(logs.contains("patched filesystem surface"));
        assert!(logs.contains("object=7"));
    }
}
