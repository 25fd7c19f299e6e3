//! `kura renew-prepare` and `kura renew`.
//!
//! The renewal tracker calls `renew-prepare` before it saves a renewed
//! certificate and `renew` afterwards. Both run unattended, so output is
//! logs only unless `--json` asks for the report.

use std::process::ExitCode;

use kura_ca::csconfig::CsConfig;
use kura_ca::history::History;
use kura_ca::renewal::DEFAULT_CA_ALIAS;
use kura_ca::service::SystemdService;
use kura_ca::subsystem::ServiceControl;
use kura_ca::{FileLock, HeldLock, RenewalContext, RenewalError, RenewalEvent, RENEWAL_LOCK_NAME};
use kura_common::error::ErrorCode;
use kura_config::Settings;
use kura_directory::LdapDirectory;
use kura_readiness::{HttpStatusSource, Poller};
use kura_truststore::CertutilStore;

use super::{exit_status, print_json, print_json_error};
use crate::cli::Cli;

/// Production collaborators of a renewal run.
struct Collaborators {
    hostname: String,
    directory: LdapDirectory,
    readiness: Poller<HttpStatusSource>,
    store: CertutilStore,
    subsystem: CsConfig,
}

impl Collaborators {
    fn build(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            hostname: super::resolve_hostname(settings)?,
            directory: super::ldap_directory(settings, None)?,
            readiness: super::readiness_poller(settings)?,
            store: CertutilStore::new(&settings.subsystem.nss_db)
                .with_password_file(settings.subsystem.nss_password_file.clone()),
            subsystem: CsConfig::new(&settings.subsystem.cs_cfg, &settings.subsystem.password_conf),
        })
    }
}

fn renewal_lock(settings: &Settings) -> FileLock {
    FileLock::new(RENEWAL_LOCK_NAME, settings.lock_path())
}

pub fn prepare(cli: &Cli, settings: &Settings, nickname: &str) -> anyhow::Result<ExitCode> {
    let lock = renewal_lock(settings);
    let service = SystemdService::new(&settings.subsystem.unit);
    tracing::info!(nickname, lock = %lock.path().display(), "Preparing renewal");

    match kura_ca::prepare(&service, &lock) {
        Ok(()) => {
            if cli.json {
                print_json(&serde_json::json!({ "ok": true, "nickname": nickname }));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let e = RenewalError::from(e);
            let code = ErrorCode::from(&e);
            tracing::error!(nickname, error = %e, "Renewal preparation failed");
            if cli.json {
                print_json_error(code, &e.to_string());
            }
            Ok(exit_status(code))
        }
    }
}

pub fn renew(cli: &Cli, settings: &Settings, nickname: &str) -> anyhow::Result<ExitCode> {
    let lock = renewal_lock(settings);
    let held = match HeldLock::adopt_or_acquire(&lock) {
        Ok(held) => held,
        Err(e) => return Ok(fail(cli, nickname, &RenewalError::from(e))),
    };

    let service = SystemdService::new(&settings.subsystem.unit);
    let parts = match Collaborators::build(settings) {
        Ok(parts) => parts,
        Err(e) => {
            // `renew-prepare` stopped the subsystem; bring it back before
            // giving up.
            tracing::error!(nickname, error = %e, "Cannot set up renewal");
            if let Err(e) = service.start() {
                tracing::error!(error = %e, "Could not restart the subsystem");
            }
            drop(held);
            return Err(e);
        }
    };

    let history = History::new(settings.history_log_path());

    let ctx = RenewalContext {
        hostname: parts.hostname,
        ca_alias: DEFAULT_CA_ALIAS.to_string(),
        readiness_timeout: super::readiness_timeout(settings),
        store: &parts.store,
        subsystem: &parts.subsystem,
        service: &service,
        readiness: &parts.readiness,
        directory: &parts.directory,
        history: Some(&history),
    };

    match kura_ca::renew(&ctx, &RenewalEvent::new(nickname), held) {
        Ok(report) => {
            let failed = report.failed_steps().count();
            if failed > 0 {
                tracing::warn!(nickname, failed, "Renewal finished with failed steps");
            } else {
                tracing::info!(nickname, "Renewal finished");
            }
            if cli.json {
                print_json(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(fail(cli, nickname, &e)),
    }
}

fn fail(cli: &Cli, nickname: &str, e: &RenewalError) -> ExitCode {
    let code = ErrorCode::from(e);
    tracing::error!(nickname, error = %e, ?code, "Renewal failed");
    if cli.json {
        print_json_error(code, &e.to_string());
    }
    exit_status(code)
}
