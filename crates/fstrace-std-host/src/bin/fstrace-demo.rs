// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use fstrace_fs::{FsInstrumentation, FsTraceConfig};
use fstrace_host::{EventLoop, Function, Object, Symbol, Value};
use fstrace_logging::{CliLogLevel, CliLoggingArgs};
use fstrace_std_host::StdHost;
use fstrace_tracer::TracingTracer;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a few traced filesystem calls against std::fs")]
struct Cli {
    /// TOML file with `enabled`, `service` and `probe-path`
    #[arg(long, env = "FSTRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Service name of the tracer
    #[arg(long, default_value = "fstrace-demo")]
    service: String,

    /// Scratch directory for the calls (default: a fresh temporary directory)
    #[arg(long)]
    workdir: Option<PathBuf>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.logging.init_with_default_level("fstrace-demo", CliLogLevel::Info)?;

    let config = FsTraceConfig::load(cli.config.as_deref()).context("loading instrumentation config")?;
    let scratch = tempfile::tempdir()?;
    let workdir = cli.workdir.unwrap_or_else(|| scratch.path().to_path_buf());
    std::fs::create_dir_all(&workdir).with_context(|| format!("creating {}", workdir.display()))?;

    let host = StdHost::new(EventLoop::new());
    let instrumentation = FsInstrumentation::new(Arc::new(TracingTracer::new(cli.service)), config);
    let report = instrumentation.patch(host.fs());
    info!(
        wrapped = report.wrapped.len(),
        skipped = report.skipped.len(),
        service = instrumentation.service_name(),
        "instrumentation installed"
    );

    exercise(&host, &workdir)?;

    instrumentation.unpatch(host.fs());
    info!(
        descriptors = host.open_descriptors(),
        dirs = host.open_dirs(),
        "instrumentation removed"
    );
    Ok(())
}

fn text(path: &std::path::Path) -> Value {
    Value::from(path.to_string_lossy().into_owned())
}

fn object(value: Value, what: &str) -> Result<Object> {
    value.as_object().cloned().ok_or_else(|| anyhow!("{what} is not an object"))
}

/// One call per calling convention.
fn exercise(host: &StdHost, workdir: &std::path::Path) -> Result<()> {
    let fs = host.fs();
    let notes = workdir.join("notes.txt");

    fs.invoke("writeFileSync", vec![text(&notes), Value::from("hello\n")])?;
    fs.invoke("appendFileSync", vec![text(&notes), Value::from("again\n")])?;
    fs.invoke("copyFileSync", vec![text(&notes), text(&workdir.join("copy.txt"))])?;

    fs.invoke(
        "readFile",
        vec![
            text(&notes),
            Value::from("utf8"),
            Value::Function(Function::new("done", |call| {
                info!(contents = ?call.arg(1), "readFile completed");
                Ok(Value::Undefined)
            })),
        ],
    )?;
    fs.invoke(
        "exists",
        vec![
            text(&workdir.join("missing")),
            Value::Function(Function::new("done", |call| {
                info!(found = ?call.arg(0), "exists completed");
                Ok(Value::Undefined)
            })),
        ],
    )?;

    let stream = fs.invoke("createReadStream", vec![text(&notes)])?;
    if let Some(stream) = stream.as_stream() {
        stream.on(fstrace_host::StreamEvent::Data, |chunk| {
            info!(bytes = chunk.as_bytes().map_or(0, <[u8]>::len), "stream chunk");
        });
    }
    host.event_loop().run_until_idle();

    let promises = object(fs.get("promises").unwrap_or(Value::Undefined), "fs.promises")?;
    let stats = promises
        .invoke("stat", vec![text(&notes)])?
        .as_promise()
        .ok_or_else(|| anyhow!("promises.stat did not return a promise"))?
        .wait()?;
    info!(size = ?object(stats, "stats")?.get("size"), "promises.stat completed");

    let handle = promises
        .invoke("open", vec![text(&notes), Value::from("r")])?
        .as_promise()
        .ok_or_else(|| anyhow!("promises.open did not return a promise"))?
        .wait()?;
    let handle = object(handle, "file handle")?;
    for method in ["stat", "close"] {
        if let Some(promise) = handle.invoke(method, vec![])?.as_promise() {
            promise.wait()?;
        }
    }

    let dir = object(fs.invoke("opendirSync", vec![text(workdir)])?, "directory handle")?;
    let entries = dir.invoke(Symbol::async_iterator(), vec![])?;
    if let Some(iter) = entries.as_iterator() {
        let names = futures::executor::block_on(iter.collect())?;
        info!(entries = names.len(), "directory iterated");
    }
    host.event_loop().run_until_idle();
    Ok(())
}
