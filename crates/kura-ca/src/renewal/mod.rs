//! Renewal trust synchronizer.
//!
//! Runs after the renewal daemon saved a renewed certificate into the
//! subsystem's store. Only two conditions abort a run: the renewed
//! certificate is missing, or its hardware token has no password. Every
//! other step is attempted, logged and reported. Whatever happens, the
//! subsystem is started again and the renewal lock is released once.

pub mod class;
pub mod trust;

use std::fmt;
use std::io::Write;
use std::time::Duration;

use serde::Serialize;

use kura_directory::DirectoryConnector;
use kura_readiness::ReadinessGate;
use kura_truststore::cert::CertInfo;
use kura_truststore::{CertStore, TokenAccess, TrustFlags};

use crate::dn::Dn;
use crate::error::RenewalError;
use crate::history::History;
use crate::lock::{HeldLock, LockError, NamedLock};
use crate::subsystem::{ServiceControl, SubsystemConfig};
pub use class::{CertClass, RenewalEvent};

/// Local nickname of the domain's own CA certificate.
pub const DEFAULT_CA_ALIAS: &str = "caSigningCert cert-pki-ca";

/// Certificate the subsystem uses to bind to the directory.
pub const SUBSYSTEM_NICKNAME: &str = "subsystemCert cert-pki-ca";

/// Directory person entry carrying [`SUBSYSTEM_NICKNAME`].
pub const SUBSYSTEM_USER: &str = "pkidbuser";

pub struct RenewalContext<'a> {
    pub hostname: String,
    pub ca_alias: String,
    pub readiness_timeout: Duration,
    pub store: &'a dyn CertStore,
    pub subsystem: &'a dyn SubsystemConfig,
    pub service: &'a dyn ServiceControl,
    pub readiness: &'a dyn ReadinessGate,
    pub directory: &'a dyn DirectoryConnector,
    pub history: Option<&'a History>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: &'static str,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewalReport {
    pub nickname: String,
    pub class: CertClass,
    pub steps: Vec<StepOutcome>,
    pub restarted: bool,
    pub ready: bool,
}

impl RenewalReport {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn step(&self, name: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == name).map(|s| &s.status)
    }
}

/// Ordered record of the best-effort steps of one run.
#[derive(Debug, Default)]
pub struct Steps(Vec<StepOutcome>);

impl Steps {
    /// Run `f` as `step`, recording and logging its outcome.
    pub fn run<E: fmt::Display>(&mut self, step: &'static str, f: impl FnOnce() -> Result<(), E>) -> bool {
        match f() {
            Ok(()) => {
                self.done(step);
                true
            }
            Err(e) => {
                self.fail(step, &e);
                false
            }
        }
    }

    pub fn done(&mut self, step: &'static str) {
        tracing::info!(step, "Renewal step done");
        self.push(step, StepStatus::Done);
    }

    pub fn skip(&mut self, step: &'static str, reason: &str) {
        tracing::info!(step, reason, "Renewal step skipped");
        self.push(step, StepStatus::Skipped(reason.to_string()));
    }

    pub fn fail(&mut self, step: &'static str, error: &dyn fmt::Display) {
        tracing::warn!(step, error = %error, "Renewal step failed");
        self.push(step, StepStatus::Failed(error.to_string()));
    }

    fn push(&mut self, step: &'static str, status: StepStatus) {
        self.0.push(StepOutcome { step, status });
    }

    pub fn into_inner(self) -> Vec<StepOutcome> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Restart {
    restarted: bool,
    ready: bool,
}

/// Restarts the subsystem and releases the lock, from `finish` or, when
/// a run unwinds, from `Drop`.
struct RestartGuard<'a, 'l> {
    service: &'a dyn ServiceControl,
    readiness: &'a dyn ReadinessGate,
    timeout: Duration,
    lock: Option<HeldLock<'l>>,
}

impl<'a, 'l> RestartGuard<'a, 'l> {
    fn new(ctx: &RenewalContext<'a>, lock: HeldLock<'l>) -> Self {
        Self {
            service: ctx.service,
            readiness: ctx.readiness,
            timeout: ctx.readiness_timeout,
            lock: Some(lock),
        }
    }

    fn finish(mut self) -> Restart {
        self.restart()
    }

    fn restart(&mut self) -> Restart {
        let Some(lock) = self.lock.take() else {
            return Restart::default();
        };
        let restarted = match self.service.start() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Could not start the subsystem");
                false
            }
        };
        let ready = restarted
            && match self.readiness.wait_until_running(self.timeout) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Subsystem did not become ready after renewal");
                    false
                }
            };
        // Failures are logged by `release`.
        let _ = lock.release();
        Restart { restarted, ready }
    }
}

impl Drop for RestartGuard<'_, '_> {
    fn drop(&mut self) {
        if self.lock.is_some() {
            tracing::warn!("Renewal interrupted, restarting the subsystem");
            self.restart();
        }
    }
}

/// Pre-renewal hook: take the lock, stop the subsystem and leave the lock
/// held for [`renew`].
pub fn prepare(service: &dyn ServiceControl, lock: &dyn NamedLock) -> Result<(), LockError> {
    let held = HeldLock::acquire(lock)?;
    match service.is_running() {
        Ok(false) => tracing::info!("Subsystem already stopped"),
        _ => {
            if let Err(e) = service.stop() {
                tracing::warn!(error = %e, "Could not stop the subsystem");
            }
        }
    }
    held.hand_off();
    Ok(())
}

pub fn renew(
    ctx: &RenewalContext<'_>,
    event: &RenewalEvent,
    lock: HeldLock<'_>,
) -> Result<RenewalReport, RenewalError> {
    let class = event.class();
    tracing::info!(nickname = %event.nickname, %class, "Renewal started");

    let guard = RestartGuard::new(ctx, lock);
    let mut steps = Steps::default();
    let result = run_steps(ctx, event, class, &mut steps);
    let restart = guard.finish();

    let report = RenewalReport {
        nickname: event.nickname.clone(),
        class,
        steps: steps.into_inner(),
        restarted: restart.restarted,
        ready: restart.ready,
    };
    let failed = report.failed_steps().count();
    match &result {
        Ok(()) => tracing::info!(nickname = %report.nickname, failed, ready = report.ready, "Renewal finished"),
        Err(e) => tracing::error!(nickname = %report.nickname, error = %e, "Renewal aborted"),
    }
    if let Some(history) = ctx.history {
        let failed = failed.to_string();
        let outcome = match &result {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("aborted: {e}"),
        };
        history.record(
            "renewal",
            &[
                ("nickname", report.nickname.as_str()),
                ("class", class.as_str()),
                ("outcome", outcome.as_str()),
                ("failed_steps", failed.as_str()),
                ("restarted", if report.restarted { "true" } else { "false" }),
                ("ready", if report.ready { "true" } else { "false" }),
            ],
        );
    }
    result.map(|()| report)
}

fn run_steps(
    ctx: &RenewalContext<'_>,
    event: &RenewalEvent,
    class: CertClass,
    steps: &mut Steps,
) -> Result<(), RenewalError> {
    let nickname = event.nickname.as_str();

    match ctx.service.is_running() {
        Ok(false) => steps.skip("stop_subsystem", "not running"),
        _ => {
            steps.run("stop_subsystem", || ctx.service.stop());
        }
    }

    // Lives until the end of the run.
    let (token, _password_file) = resolve_token(ctx, nickname)?;

    let der = match ctx.store.get(nickname, &token) {
        Ok(Some(der)) => der,
        Ok(None) => return Err(RenewalError::MissingCertificate(nickname.to_string())),
        Err(e) => {
            tracing::error!(nickname, error = %e, "Could not read the renewed certificate");
            return Err(RenewalError::MissingCertificate(nickname.to_string()));
        }
    };

    match ctx.subsystem.update_cert(nickname, &der) {
        Ok(true) => steps.done("update_subsystem_config"),
        Ok(false) => steps.skip("update_subsystem_config", "no configuration reference"),
        Err(e) => steps.fail("update_subsystem_config", &e),
    }

    let mut session = match ctx.directory.connect() {
        Ok(session) => Some(session),
        Err(e) => {
            steps.fail("connect_directory", &e);
            None
        }
    };
    let is_master = match session.as_mut().map(|s| s.renewal_master()) {
        None => false,
        Some(Ok(master)) => master.is_some_and(|m| m.eq_ignore_ascii_case(&ctx.hostname)),
        Some(Err(e)) => {
            steps.fail("find_renewal_master", &e);
            false
        }
    };
    tracing::debug!(is_master, "Renewal master resolved");

    if let (Some(session), true) = (session.as_mut(), is_master) {
        if nickname == SUBSYSTEM_NICKNAME {
            steps.run("update_person_entry", || {
                let description = person_description(&der)?;
                session
                    .update_person_cert(SUBSYSTEM_USER, &der, &description)
                    .map(drop)
                    .map_err(|e| e.to_string())
            });
        }
        if class == CertClass::CaSigning {
            steps.run("update_authority_serial", || {
                let info = CertInfo::parse(&der).map_err(|e| e.to_string())?;
                session
                    .update_authority_serial(&info.serial)
                    .map(drop)
                    .map_err(|e| e.to_string())
            });
        }
    }

    match class {
        CertClass::AuditSigning => {
            steps.run("audit_signing_trust", || {
                ctx.store.set_trust(nickname, &TrustFlags::audit_signing(), &token)
            });
        }
        CertClass::CaSigning => trust::sync_ca_signing(
            ctx.store,
            session.as_mut(),
            is_master,
            nickname,
            &der,
            &token,
            &ctx.ca_alias,
            steps,
        ),
        CertClass::Ordinary => {}
    }

    if let Some(session) = session {
        if let Err(e) = session.close() {
            steps.fail("disconnect_directory", &e);
        }
    }
    Ok(())
}

/// `2;<serial>;<issuer>;<subject>`, DNs in LDAP order.
fn person_description(der: &[u8]) -> Result<String, String> {
    let info = CertInfo::parse(der).map_err(|e| e.to_string())?;
    let ldap_order = |s: &str| {
        Dn::from_certificate_subject(s)
            .map(|dn| dn.to_string())
            .unwrap_or_else(|_| s.to_string())
    };
    Ok(format!(
        "2;{};{};{}",
        info.serial,
        ldap_order(&info.issuer),
        ldap_order(&info.subject)
    ))
}

/// Token access for `nickname`, with a password file for hardware tokens.
fn resolve_token(
    ctx: &RenewalContext<'_>,
    nickname: &str,
) -> Result<(TokenAccess, Option<tempfile::NamedTempFile>), RenewalError> {
    let token = match ctx.subsystem.token_for(nickname) {
        Ok(Some(token)) => token,
        Ok(None) => return Ok((TokenAccess::internal(), None)),
        Err(e) => {
            tracing::warn!(nickname, error = %e, "Could not resolve the key token, assuming internal");
            return Ok((TokenAccess::internal(), None));
        }
    };
    let unavailable = |reason: String| RenewalError::TokenUnavailable {
        token: token.clone(),
        reason,
    };

    let password = ctx
        .subsystem
        .token_password(&token)
        .map_err(|e| unavailable(e.to_string()))?
        .filter(|p| !p.is_empty())
        .ok_or_else(|| unavailable("no password configured".to_string()))?;

    let mut file = tempfile::Builder::new()
        .prefix("kura-token-")
        .tempfile()
        .map_err(|e| unavailable(e.to_string()))?;
    file.write_all(password.expose().as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| unavailable(e.to_string()))?;
    tracing::debug!(token = %token, "Token password file written");

    let access = TokenAccess::hardware(&token, file.path().to_path_buf());
    Ok((access, Some(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_record_in_order() {
        let mut steps = Steps::default();
        assert!(steps.run("one", || Ok::<(), String>(())));
        assert!(!steps.run("two", || Err("boom".to_string())));
        steps.skip("three", "not needed");
        let steps = steps.into_inner();
        assert_eq!(steps[0].status, StepStatus::Done);
        assert_eq!(steps[1].status, StepStatus::Failed("boom".to_string()));
        assert_eq!(steps[2].status, StepStatus::Skipped("not needed".to_string()));
    }

    #[test]
    fn person_description_uses_ldap_order() {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "CA Subsystem");
        params.distinguished_name.push(rcgen::DnType::OrganizationName, "EXAMPLE.COM");
        params.serial_number = Some(rcgen::SerialNumber::from(vec![0x01, 0x00]));
        let cert = params.self_signed(&key).unwrap();

        let description = person_description(cert.der()).unwrap();
        assert_eq!(
            description,
            "2;256;CN=CA Subsystem,O=EXAMPLE.COM;CN=CA Subsystem,O=EXAMPLE.COM"
        );
    }
}
