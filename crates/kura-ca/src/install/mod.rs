//! Installation orchestrator.
//!
//! Fail-fast: the first violated precondition aborts the run. Nothing is
//! rolled back; a failed install is cleaned up by the separate uninstall
//! procedure.

pub mod config;
pub mod external;
pub mod validate;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use kura_directory::{CaServer, DirectoryAnchor, DirectoryConnector, SerialBackend};
use kura_readiness::ReadinessGate;
use kura_truststore::CertStore;

use crate::dn::{Dn, SubjectKind};
use crate::error::InstallError;
use crate::subsystem::{SubsystemConfig, SubsystemInstaller};
use config::{
    ExternalCaRequest, ExternalCaType, HardwareToken, InstallConfig, InstallOptions, InstallPlan,
    Role, RoleRequest, Secret, SerialMode, TokenOptions,
};
use external::{MsCsTemplate, DEFAULT_MSCS_TEMPLATE};

/// The person running the install.
pub trait Operator {
    /// Show `summary` and ask whether to proceed.
    fn confirm(&self, summary: &str) -> bool;
    fn password(&self, prompt: &str) -> Option<Secret>;
}

/// Collaborators and host facts for one install run.
pub struct InstallContext<'a> {
    pub hostname: String,
    /// Where the first external-CA pass writes the signing request.
    pub csr_path: PathBuf,
    pub preferred_peer: Option<String>,
    pub readiness_timeout: Duration,
    /// Where the install record is written on success.
    pub record_path: Option<PathBuf>,
    pub directory: &'a dyn DirectoryConnector,
    pub subsystem: &'a dyn SubsystemConfig,
    pub installer: &'a dyn SubsystemInstaller,
    pub readiness: &'a dyn ReadinessGate,
    /// Host-wide store refreshed from the directory's trust anchors.
    pub host_store: &'a dyn CertStore,
    pub operator: &'a dyn Operator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed {
        role: Role,
        subject_base: String,
        ca_subject: String,
        peer: Option<String>,
    },
    /// First external-CA pass done; sign the request and run again with
    /// the resulting certificates.
    CsrPending { csr_path: PathBuf },
}

/// Written to the state directory after a successful install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallRecord {
    pub role: Role,
    pub hostname: String,
    pub subject_base: String,
    pub ca_subject: String,
    pub serial_mode: SerialMode,
    pub peer: Option<String>,
    pub installed_at: DateTime<Utc>,
}

pub fn install(
    ctx: &InstallContext<'_>,
    config: &InstallConfig,
    options: &InstallOptions,
) -> Result<InstallOutcome, InstallError> {
    validate::validate(config, options, ctx.subsystem)?;

    let mut session = ctx.directory.connect()?;
    let servers = session.ca_servers()?;
    let domain = session.config()?;
    session.close()?;

    let role = determine_role(config.role, &servers)?;
    tracing::info!(%role, providers = servers.len(), "Role determined");

    // An explicit join was checked by `validate`; a discovered one is
    // checked here, before anything is asked of the operator.
    if role == Role::Join && config.role == RoleRequest::Auto {
        validate::check_join_conflicts(config)?;
    }

    let token = resolve_token(&config.token, options, ctx.operator)?;
    let plan = match role {
        Role::First => {
            let realm = config.realm.clone().or(domain.realm);
            plan_first(ctx, config, options, realm, token)?
        }
        Role::Join => plan_join(ctx, config, options, token)?,
    };

    if config.external_ca {
        ctx.installer.generate_csr(&plan, &ctx.csr_path)?;
        tracing::info!(csr = %ctx.csr_path.display(), "Certificate signing request written");
        return Ok(InstallOutcome::CsrPending {
            csr_path: ctx.csr_path.clone(),
        });
    }
    if !config.external_cert_files.is_empty() {
        let ca_subject = Dn::parse(&plan.ca_subject).map_err(|e| InstallError::InvalidSubject {
            field: "CA subject",
            reason: e.to_string(),
        })?;
        let chain = external::load_chain(&config.external_cert_files, &ca_subject)?;
        tracing::info!(length = chain.len(), "External chain validated");
        ctx.installer.install_external_chain(&plan, &chain)?;
    } else {
        ctx.installer.install_check(&plan)?;
        ctx.installer.install(&plan)?;
    }
    tracing::info!(role = %plan.role, "Subsystem installed");

    ctx.readiness.wait_until_running(ctx.readiness_timeout)?;

    match refresh_host_trust(ctx) {
        Ok(count) => tracing::info!(count, "Host trust store refreshed"),
        Err(e) => tracing::warn!(error = %e, "Could not refresh host trust store"),
    }
    write_record(ctx, &plan);

    Ok(InstallOutcome::Installed {
        role: plan.role,
        subject_base: plan.subject_base,
        ca_subject: plan.ca_subject,
        peer: plan.peer,
    })
}

fn determine_role(request: RoleRequest, servers: &[CaServer]) -> Result<Role, InstallError> {
    match (request, servers.first()) {
        (RoleRequest::First, Some(existing)) => Err(InstallError::RoleMismatch(format!(
            "a CA is already provided by {}; join it instead",
            existing.hostname
        ))),
        (RoleRequest::Join, None) => Err(InstallError::RoleMismatch(
            "no CA exists in the domain yet; there is nothing to join".to_string(),
        )),
        (_, None) => Ok(Role::First),
        (_, Some(_)) => Ok(Role::Join),
    }
}

fn checked(field: &'static str, dn: Dn, kind: SubjectKind) -> Result<Dn, InstallError> {
    dn.check_attributes(kind)
        .map_err(|e| InstallError::InvalidSubject {
            field,
            reason: e.to_string(),
        })?;
    Ok(dn)
}

fn plan_first(
    ctx: &InstallContext<'_>,
    config: &InstallConfig,
    options: &InstallOptions,
    realm: Option<String>,
    token: Option<HardwareToken>,
) -> Result<InstallPlan, InstallError> {
    let subject_base = match &config.subject_base {
        Some(base) => validate::check_subject("subject base", base, SubjectKind::SubjectBase)?,
        None => {
            let realm = realm.as_deref().ok_or_else(|| InstallError::InvalidSubject {
                field: "subject base",
                reason: "no realm to derive a default from; pass --realm or --subject-base".to_string(),
            })?;
            checked("subject base", Dn::default_subject_base(realm), SubjectKind::SubjectBase)?
        }
    };
    let ca_subject = match &config.ca_subject {
        Some(subject) => validate::check_subject("CA subject", subject, SubjectKind::CaSubject)?,
        None => checked("CA subject", Dn::default_ca_subject(&subject_base), SubjectKind::CaSubject)?,
    };

    if config.serial_mode == SerialMode::Random && ctx.subsystem.has_legacy_serial_data()? {
        return Err(InstallError::SerialModeRejected(
            "this host has CA data in the legacy serial number format".to_string(),
        ));
    }

    let plan = InstallPlan {
        role: Role::First,
        hostname: ctx.hostname.clone(),
        realm,
        subject_base: subject_base.to_string(),
        ca_subject: ca_subject.to_string(),
        serial_mode: config.serial_mode,
        peer: None,
        token,
        admin_password: config.admin_password.clone(),
        external_ca: external_request(config)?,
    };

    if !options.unattended && !ctx.operator.confirm(&summary(&plan, ctx)) {
        return Err(InstallError::Aborted);
    }
    Ok(plan)
}

fn plan_join(
    ctx: &InstallContext<'_>,
    config: &InstallConfig,
    options: &InstallOptions,
    token: Option<HardwareToken>,
) -> Result<InstallPlan, InstallError> {
    let admin_password = match &config.admin_password {
        Some(password) => Some(password.clone()),
        None if !options.unattended => ctx.operator.password("Administrator password"),
        None => None,
    }
    .filter(|p| !p.is_empty())
    .ok_or(InstallError::MissingCredentials)?;

    // The domain may have become CA-capable after this host last refreshed.
    let count = refresh_host_trust(ctx)?;
    tracing::info!(count, "Host trust store refreshed from the domain");

    let mut session = ctx.directory.connect()?;
    let domain = session.config()?;
    let servers = session.ca_servers()?;
    session.close()?;

    let subject_base = domain
        .subject_base
        .ok_or_else(|| InstallError::InvalidSubject {
            field: "subject base",
            reason: "the directory holds no certificate subject base".to_string(),
        })?;
    let ca_subject = match domain.ca_subject {
        Some(subject) => subject,
        None => {
            let base = Dn::parse(&subject_base).map_err(|e| InstallError::InvalidSubject {
                field: "subject base",
                reason: e.to_string(),
            })?;
            Dn::default_ca_subject(&base).to_string()
        }
    };

    let preferred = config.peer.as_deref().or(ctx.preferred_peer.as_deref());
    let peer = select_peer(&servers, &ctx.hostname, preferred).ok_or(InstallError::NoPeerAvailable)?;
    tracing::info!(peer = %peer.hostname, "Peer selected");

    if config.serial_mode == SerialMode::Random && peer.serial_backend == SerialBackend::Legacy {
        return Err(InstallError::SerialModeRejected(format!(
            "{} stores serial numbers in a backend that cannot serve random serials",
            peer.hostname
        )));
    }

    Ok(InstallPlan {
        role: Role::Join,
        hostname: ctx.hostname.clone(),
        realm: config.realm.clone().or(domain.realm),
        subject_base,
        ca_subject,
        serial_mode: config.serial_mode,
        peer: Some(peer.hostname.clone()),
        token,
        admin_password: Some(admin_password),
        external_ca: None,
    })
}

/// The preferred host when it provides the CA role, else the first
/// provider that is not this host.
pub fn select_peer<'s>(
    servers: &'s [CaServer],
    hostname: &str,
    preferred: Option<&str>,
) -> Option<&'s CaServer> {
    if let Some(preferred) = preferred {
        match servers.iter().find(|s| s.hostname.eq_ignore_ascii_case(preferred)) {
            Some(server) => return Some(server),
            None => tracing::warn!(preferred, "Preferred peer does not provide the CA role"),
        }
    }
    let mut candidates: Vec<&CaServer> = servers
        .iter()
        .filter(|s| !s.hostname.eq_ignore_ascii_case(hostname))
        .collect();
    candidates.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    candidates.into_iter().next()
}

fn external_request(config: &InstallConfig) -> Result<Option<ExternalCaRequest>, InstallError> {
    if !config.external_ca && config.external_cert_files.is_empty() {
        return Ok(None);
    }
    let ca_type = config.external_ca_type.unwrap_or_default();
    let template = match (config.external_ca, ca_type) {
        (true, ExternalCaType::MsCs) => {
            let profile = config
                .external_ca_profile
                .as_deref()
                .unwrap_or(DEFAULT_MSCS_TEMPLATE);
            Some(MsCsTemplate::parse(profile)?)
        }
        _ => None,
    };
    Ok(Some(ExternalCaRequest { ca_type, template }))
}

fn resolve_token(
    options_token: &TokenOptions,
    options: &InstallOptions,
    operator: &dyn Operator,
) -> Result<Option<HardwareToken>, InstallError> {
    let (Some(name), Some(library_path)) = (&options_token.name, &options_token.library_path) else {
        return Ok(None);
    };
    let password = if let Some(password) = &options_token.password {
        password.clone()
    } else if let Some(path) = &options_token.password_file {
        let raw = zeroize::Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            InstallError::InvalidTokenOptions(format!("cannot read {}: {e}", path.display()))
        })?);
        Secret::new(raw.trim_end_matches(['\r', '\n']))
    } else if !options.unattended {
        operator
            .password(&format!("Password for token {name}"))
            .ok_or_else(|| InstallError::InvalidTokenOptions(format!("no password for token {name}")))?
    } else {
        return Err(InstallError::InvalidTokenOptions(format!("no password for token {name}")));
    };
    Ok(Some(HardwareToken {
        name: name.clone(),
        library_path: library_path.clone(),
        password,
    }))
}

/// Add every directory anchor to the host store.
fn refresh_host_trust(ctx: &InstallContext<'_>) -> Result<usize, InstallError> {
    let mut session = ctx.directory.connect()?;
    let anchors: Vec<DirectoryAnchor> = session.trust_anchors()?;
    session.close()?;
    for anchor in &anchors {
        ctx.host_store.add(&anchor.cert_der, &anchor.nickname, &anchor.flags)?;
    }
    Ok(anchors.len())
}

fn summary(plan: &InstallPlan, ctx: &InstallContext<'_>) -> String {
    let serial = match plan.serial_mode {
        SerialMode::Sequential => "sequential",
        SerialMode::Random => "random",
    };
    let external = match &plan.external_ca {
        None => "no".to_string(),
        Some(request) => {
            let kind = match request.ca_type {
                ExternalCaType::Generic => "generic",
                ExternalCaType::MsCs => "ms-cs",
            };
            match &request.template {
                Some(template) => format!("{kind}, template {template}, CSR to {}", ctx.csr_path.display()),
                None => kind.to_string(),
            }
        }
    };
    let token = plan.token.as_ref().map_or("internal", |t| t.name.as_str());
    format!(
        "The CA will be configured with:\n\
         Role:           {}\n\
         Hostname:       {}\n\
         Subject base:   {}\n\
         CA subject:     {}\n\
         Serial numbers: {serial}\n\
         External CA:    {external}\n\
         Key token:      {token}\n",
        plan.role, plan.hostname, plan.subject_base, plan.ca_subject
    )
}

fn write_record(ctx: &InstallContext<'_>, plan: &InstallPlan) {
    let Some(path) = &ctx.record_path else {
        return;
    };
    let record = InstallRecord {
        role: plan.role,
        hostname: plan.hostname.clone(),
        subject_base: plan.subject_base.clone(),
        ca_subject: plan.ca_subject.clone(),
        serial_mode: plan.serial_mode,
        peer: plan.peer.clone(),
        installed_at: Utc::now(),
    };
    if let Err(e) = kura_common::persist::write_json_pretty(path, &record) {
        tracing::warn!(path = %path.display(), error = %e, "Could not write install record");
    }
}
