//! CLI command handlers.
//!
//! - `install` - installation orchestrator.
//! - `renew` - the two renewal hooks around the external trigger.
//! - `status` - status polls against the subsystem.
//!
//! Production collaborators are built here from [`Settings`]; the
//! orchestrators themselves only see traits.

pub mod install;
pub mod renew;
pub mod status;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use kura_common::error::ErrorCode;
use kura_config::settings::{realm_to_base_dn, BindMethod};
use kura_config::Settings;
use kura_directory::{LdapDirectory, LdapSettings};
use kura_readiness::{HttpStatusSource, Poller};

/// Print a serializable value as JSON, handling serialization errors
/// gracefully instead of panicking.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: failed to serialize response: {e}"),
    }
}

/// JSON body for a failed command.
pub(crate) fn print_json_error(code: ErrorCode, message: &str) {
    print_json(&serde_json::json!({
        "ok": false,
        "error": code,
        "message": message,
    }));
}

pub(crate) fn exit_status(code: ErrorCode) -> ExitCode {
    u8::try_from(code.exit_code())
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE)
}

/// This host's fully-qualified name: `[host] hostname`, else the OS name.
pub(crate) fn resolve_hostname(settings: &Settings) -> anyhow::Result<String> {
    if let Some(name) = &settings.host.hostname {
        return Ok(name.clone());
    }
    let name = hostname::get().context("could not determine the host name")?;
    Ok(name.to_string_lossy().into_owned())
}

/// Status poller for the configured endpoint.
pub(crate) fn readiness_poller(settings: &Settings) -> anyhow::Result<Poller<HttpStatusSource>> {
    let section = &settings.readiness;
    let extra_root = match &settings.subsystem.ca_cert {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?,
        ),
        None => None,
    };
    let source = HttpStatusSource::new(
        &settings.subsystem.status_url,
        extra_root.as_deref(),
        Duration::from_secs(section.request_timeout_secs),
    )?;
    Ok(Poller::new(source).interval(Duration::from_secs(section.interval_secs)))
}

pub(crate) fn readiness_timeout(settings: &Settings) -> Duration {
    Duration::from_secs(settings.readiness.timeout_secs)
}

/// LDAP directory for the domain.
///
/// The suffix comes from `[directory] base_dn`, else from `realm`. With
/// neither, the directory is left without a suffix and every lookup
/// fails, which the orchestrators already handle.
pub(crate) fn ldap_directory(
    settings: &Settings,
    realm: Option<&str>,
) -> anyhow::Result<LdapDirectory> {
    let section = &settings.directory;
    let base_dn = settings
        .base_dn()
        .or_else(|| realm.map(realm_to_base_dn))
        .unwrap_or_default();
    if base_dn.is_empty() {
        tracing::warn!("No directory suffix configured; set [host] realm or [directory] base_dn");
    }
    let bind_dn = match section.bind {
        BindMethod::External => None,
        BindMethod::Simple => Some(
            section
                .bind_dn
                .clone()
                .context("[directory] bind = \"simple\" requires bind_dn")?,
        ),
    };
    Ok(LdapDirectory::new(LdapSettings {
        uri: section.uri.clone(),
        base_dn,
        bind_dn,
        password_file: section.password_file.clone(),
        timeout: Duration::from_secs(section.timeout_secs),
    }))
}
