//! Log sinks
//!
//! Every line goes to stderr, to the durable log file, and optionally to a
//! serial/console device, as `<UTC timestamp> <LEVEL> <message> <fields>`.
//! Events on [`lereprise::SUCCESS_TARGET`] are tagged `SUCCESS`.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use lereprise::SUCCESS_TARGET;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::HostConfig;

/// Where log lines go.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Debug level unless `RUST_LOG` says otherwise
    pub verbose: bool,
    /// Durable append-only file
    pub log_file: Option<PathBuf>,
    /// Serial or console device
    pub console_device: Option<PathBuf>,
}

impl LogConfig {
    /// Sinks configured for a host.
    pub fn for_host(host: &HostConfig, verbose: bool) -> Self {
        Self {
            verbose,
            log_file: Some(host.log_file.clone()),
            console_device: host.console_device.clone(),
        }
    }

    fn filter(&self) -> EnvFilter {
        let default = if self.verbose { "debug" } else { "info" };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    }
}

/// Which sinks were actually opened.
#[derive(Debug, Clone, Default)]
pub struct LogHandle {
    log_file: Option<PathBuf>,
    console_device: Option<PathBuf>,
}

impl LogHandle {
    /// Durable log file, if it could be opened.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Console device, if it could be opened.
    pub fn console_device(&self) -> Option<&Path> {
        self.console_device.as_deref()
    }
}

/// Line format shared by every sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl LineFormat {
    fn label(event: &Event<'_>) -> &'static str {
        let meta = event.metadata();
        if meta.target() == SUCCESS_TARGET {
            return "SUCCESS";
        }
        match *meta.level() {
            Level::ERROR => "ERROR",
            Level::WARN => "WARN",
            Level::INFO => "INFO",
            Level::DEBUG => "DEBUG",
            Level::TRACE => "TRACE",
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} {:<7} ",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            Self::label(event)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn open_append(path: &Path, create_parent: bool) -> std::io::Result<File> {
    if create_parent {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber.
///
/// A sink that cannot be opened is reported on stderr and skipped. Calling
/// this twice keeps the first subscriber.
pub fn init_logging(config: &LogConfig) -> LogHandle {
    let mut handle = LogHandle::default();

    let file = config.log_file.as_deref().and_then(|path| {
        match open_append(path, true) {
            Ok(file) => {
                handle.log_file = Some(path.to_path_buf());
                Some(file)
            }
            Err(err) => {
                eprintln!("warning: cannot open log file {}: {err}", path.display());
                None
            }
        }
    });

    let console = config.console_device.as_deref().and_then(|path| {
        match open_append(path, false) {
            Ok(device) => {
                handle.console_device = Some(path.to_path_buf());
                Some(device)
            }
            Err(err) => {
                eprintln!("warning: cannot open console device {}: {err}", path.display());
                None
            }
        }
    });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .event_format(LineFormat)
        .with_ansi(false)
        .with_writer(std::io::stderr);

    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .event_format(LineFormat)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    let console_layer = console.map(|device| {
        tracing_subscriber::fmt::layer()
            .event_format(LineFormat)
            .with_ansi(false)
            .with_writer(Mutex::new(device))
    });

    let _ = tracing_subscriber::registry()
        .with(config.filter())
        .with(stderr_layer)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    handle
}
