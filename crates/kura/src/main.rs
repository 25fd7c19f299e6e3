pub(crate) mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;

use cli::{Cli, Command};
use kura_config::Settings;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;

    // Initialize logging
    let configured = cli
        .log_level
        .as_deref()
        .or(settings.logging.level.as_deref())
        .unwrap_or("info");
    let level = match cli.verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_file = cli.log_file.as_deref().or(settings.logging.file.as_deref());

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = init_logging(env_filter, log_file)?;

    kura_config::dirs::ensure_data_dir();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "kura starting");

    match &cli.command {
        Command::Install(args) => commands::install::install(&cli, &settings, args),
        Command::RenewPrepare { nickname } => {
            commands::renew::prepare(&cli, &settings, nickname)
        }
        Command::Renew { nickname } => commands::renew::renew(&cli, &settings, nickname),
        Command::WaitReady { timeout } => {
            commands::status::wait_ready(&cli, &settings, *timeout)
        }
        Command::Status => commands::status::status(&cli, &settings),
    }
}

// ── Logging setup ───────────────────────────────────────────────────

/// Initialize tracing with stderr + optional file output.
/// Returns guards that must be held for the lifetime of the program
/// to ensure the non-blocking writers flush on shutdown.
pub(crate) fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    // stdout carries command output (and `--json`), so logs go to stderr.
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (nb_file, file_guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(nb_file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        Ok(vec![stderr_guard, file_guard])
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();

        Ok(vec![stderr_guard])
    }
}
