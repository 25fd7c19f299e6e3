//! `kura status` and `kura wait-ready`.

use std::process::ExitCode;
use std::time::Duration;

use kura_ca::error::readiness_code;
use kura_config::Settings;
use kura_readiness::{ReadinessGate, SubsystemStatus};
use serde::Serialize;

use super::{exit_status, print_json, print_json_error};
use crate::cli::Cli;

#[derive(Serialize)]
struct StatusOutput<'a> {
    version: &'static str,
    url: &'a str,
    state: SubsystemStatus,
}

pub fn status(cli: &Cli, settings: &Settings) -> anyhow::Result<ExitCode> {
    let poller = super::readiness_poller(settings)?;
    let state = poller.status_once().state();

    if cli.json {
        print_json(&StatusOutput {
            version: env!("CARGO_PKG_VERSION"),
            url: &settings.subsystem.status_url,
            state,
        });
    } else {
        println!("Kura v{}", env!("CARGO_PKG_VERSION"));
        println!("  Endpoint:  {}", settings.subsystem.status_url);
        println!("  Subsystem: {}", state);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn wait_ready(cli: &Cli, settings: &Settings, timeout: Option<u64>) -> anyhow::Result<ExitCode> {
    let poller = super::readiness_poller(settings)?;
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| super::readiness_timeout(settings));

    match poller.wait_until_running(timeout) {
        Ok(()) => {
            if cli.json {
                print_json(&serde_json::json!({ "ok": true, "state": "running" }));
            } else {
                println!("Subsystem is running");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let code = readiness_code(&e);
            tracing::error!(error = %e, "Subsystem did not become ready");
            if cli.json {
                print_json_error(code, &e.to_string());
            } else {
                eprintln!("Error: {e}");
            }
            Ok(exit_status(code))
        }
    }
}
