//! `kura install`.

use std::io::{IsTerminal, Write};
use std::process::ExitCode;

use kura_ca::csconfig::CsConfig;
use kura_ca::install::config::{InstallOptions, Secret};
use kura_ca::pkispawn::PkispawnInstaller;
use kura_ca::{InstallContext, InstallError, InstallOutcome, Operator};
use kura_common::error::ErrorCode;
use kura_common::paths;
use kura_config::Settings;
use kura_truststore::CertutilStore;

use super::{exit_status, print_json, print_json_error};
use crate::cli::{Cli, InstallArgs};

/// Prompts on the controlling terminal. Without one every prompt is
/// answered negatively.
struct ConsoleOperator {
    interactive: bool,
}

impl ConsoleOperator {
    fn new() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
        }
    }
}

fn prompt_line(prompt: &str) -> std::io::Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}

impl Operator for ConsoleOperator {
    fn confirm(&self, summary: &str) -> bool {
        if !self.interactive {
            return false;
        }
        println!("\n{summary}");
        match prompt_line("Continue to configure the CA with these values? [no]: ") {
            Ok(answer) => matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read confirmation");
                false
            }
        }
    }

    fn password(&self, prompt: &str) -> Option<Secret> {
        if !self.interactive {
            return None;
        }
        match prompt_line(&format!("{prompt}: ")) {
            Ok(answer) if !answer.is_empty() => Some(Secret::new(answer)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read password");
                None
            }
        }
    }
}

pub fn install(cli: &Cli, settings: &Settings, args: &InstallArgs) -> anyhow::Result<ExitCode> {
    let config = args.to_config(settings.host.realm.as_deref());
    let options = InstallOptions {
        unattended: args.unattended,
    };

    let hostname = super::resolve_hostname(settings)?;
    let directory = super::ldap_directory(settings, config.realm.as_deref())?;
    let subsystem = CsConfig::new(&settings.subsystem.cs_cfg, &settings.subsystem.password_conf);
    let installer = PkispawnInstaller::new(&settings.install.pkispawn, &settings.subsystem.instance);
    let readiness = super::readiness_poller(settings)?;
    let host_store = CertutilStore::new(&settings.host.trust_db);
    let operator = ConsoleOperator::new();

    let ctx = InstallContext {
        hostname,
        csr_path: settings.install.csr_path.clone(),
        preferred_peer: settings.install.preferred_peer.clone(),
        readiness_timeout: super::readiness_timeout(settings),
        record_path: Some(paths::kura_state_dir().join("install.json")),
        directory: &directory,
        subsystem: &subsystem,
        installer: &installer,
        readiness: &readiness,
        host_store: &host_store,
        operator: &operator,
    };

    match kura_ca::install(&ctx, &config, &options) {
        Ok(outcome) => {
            if cli.json {
                print_json(&outcome);
            } else {
                print_outcome(&outcome);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report_failure(cli, settings, &e)),
    }
}

fn print_outcome(outcome: &InstallOutcome) {
    match outcome {
        InstallOutcome::Installed {
            role,
            subject_base,
            ca_subject,
            peer,
        } => {
            println!("CA installed ({role})");
            println!("  Subject base:  {subject_base}");
            println!("  CA subject:    {ca_subject}");
            if let Some(peer) = peer {
                println!("  Replicated from: {peer}");
            }
        }
        InstallOutcome::CsrPending { csr_path } => {
            println!("The next step is to get {} signed by your CA", csr_path.display());
            println!("and re-run kura install with --external-cert-file pointing at");
            println!("the signed certificate and the external CA chain.");
        }
    }
}

fn report_failure(cli: &Cli, settings: &Settings, e: &InstallError) -> ExitCode {
    let code = ErrorCode::from(e);
    tracing::error!(error = %e, ?code, "Install failed");
    if cli.json {
        print_json_error(code, &e.to_string());
    } else {
        eprintln!("Error: {e}");
        if code != ErrorCode::Aborted {
            eprintln!("The CA installation did not complete. To clean up before retrying, run:");
            eprintln!("  {}", settings.install.cleanup_hint);
        }
    }
    exit_status(code)
}
