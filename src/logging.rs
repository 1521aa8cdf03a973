//! `tracing` subscriber setup for the `pbchat` binary.
//!
//! `pbchat demo --log-dir DIR` calls [`init_production`] so the scripted
//! session is also recorded as JSON lines under `DIR`. `check`, `services`
//! and a demo without `--log-dir` call [`init_cli`]. Both honour `RUST_LOG`
//! and fall back to `info`.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Prefix of the daily log files; the date is appended by the appender.
pub const LOG_FILE_PREFIX: &str = "pbchat.log";

/// Keeps the background log writer alive; drop it last to flush.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log account, attach and group activity to stderr and to a JSON file in
/// `logs_dir` rotated daily.
///
/// The directory is created first, so it exists even when another
/// subscriber is already installed and this call fails.
///
/// # Errors
///
/// The directory cannot be created, or a global subscriber is already set.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Plain stderr logging. Calling it again, or after [`init_production`],
/// leaves the installed subscriber in place.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init();
}
