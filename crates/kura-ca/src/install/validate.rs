//! Checks run before the orchestrator touches the network or the host.

use crate::dn::{Dn, SubjectKind};
use crate::error::InstallError;
use crate::install::config::{ExternalCaType, InstallConfig, InstallOptions, RoleRequest, TokenOptions};
use crate::install::external::MsCsTemplate;
use crate::subsystem::SubsystemConfig;

/// Run every static check, in order.
pub fn validate(
    config: &InstallConfig,
    options: &InstallOptions,
    subsystem: &dyn SubsystemConfig,
) -> Result<(), InstallError> {
    if subsystem.is_installed()? {
        return Err(InstallError::AlreadyInstalled);
    }
    check_token(&config.token, options)?;
    if config.role == RoleRequest::Join {
        check_join_conflicts(config)?;
    }
    check_subjects(config)?;
    check_external(config)?;
    Ok(())
}

pub fn check_token(token: &TokenOptions, options: &InstallOptions) -> Result<(), InstallError> {
    if !token.is_requested() {
        return Ok(());
    }
    let invalid = |reason: &str| Err(InstallError::InvalidTokenOptions(reason.to_string()));

    match (&token.name, &token.library_path) {
        (Some(_), None) => return invalid("--token-name requires --token-library-path"),
        (None, Some(_)) => return invalid("--token-library-path requires --token-name"),
        (None, None) => {
            return invalid("--token-password and --token-password-file require --token-name")
        }
        (Some(_), Some(_)) => {}
    }
    if token.password.is_some() && token.password_file.is_some() {
        return invalid("--token-password and --token-password-file are mutually exclusive");
    }
    if options.unattended && token.password.is_none() && token.password_file.is_none() {
        return invalid("unattended installation with a token requires --token-password or --token-password-file");
    }
    Ok(())
}

/// A joining CA inherits its subjects and its certificate from the domain.
pub fn check_join_conflicts(config: &InstallConfig) -> Result<(), InstallError> {
    let mut conflicts = Vec::new();
    if config.subject_base.is_some() {
        conflicts.push("--subject-base");
    }
    if config.ca_subject.is_some() {
        conflicts.push("--ca-subject");
    }
    if config.external_ca {
        conflicts.push("--external-ca");
    }
    if !config.external_cert_files.is_empty() {
        conflicts.push("--external-cert-file");
    }
    if conflicts.is_empty() {
        return Ok(());
    }
    Err(InstallError::ConflictingOptions(format!(
        "{} cannot be used when joining an existing CA",
        conflicts.join(", ")
    )))
}

pub fn check_subject(field: &'static str, value: &str, kind: SubjectKind) -> Result<Dn, InstallError> {
    let dn = Dn::parse(value).map_err(|e| InstallError::InvalidSubject {
        field,
        reason: e.to_string(),
    })?;
    dn.check_attributes(kind)
        .map_err(|e| InstallError::InvalidSubject {
            field,
            reason: e.to_string(),
        })?;
    Ok(dn)
}

fn check_subjects(config: &InstallConfig) -> Result<(), InstallError> {
    if let Some(base) = &config.subject_base {
        check_subject("subject base", base, SubjectKind::SubjectBase)?;
    }
    if let Some(subject) = &config.ca_subject {
        check_subject("CA subject", subject, SubjectKind::CaSubject)?;
    }
    Ok(())
}

fn check_external(config: &InstallConfig) -> Result<(), InstallError> {
    let second_pass = !config.external_cert_files.is_empty();
    if config.external_ca && second_pass {
        return Err(InstallError::ConflictingOptions(
            "--external-ca and --external-cert-file are separate passes and cannot be combined"
                .to_string(),
        ));
    }
    if !config.external_ca && (config.external_ca_type.is_some() || config.external_ca_profile.is_some()) {
        return Err(InstallError::ConflictingOptions(
            "--external-ca-type and --external-ca-profile require --external-ca".to_string(),
        ));
    }
    if let Some(profile) = &config.external_ca_profile {
        if config.external_ca_type != Some(ExternalCaType::MsCs) {
            return Err(InstallError::ConflictingOptions(
                "--external-ca-profile requires --external-ca-type=ms-cs".to_string(),
            ));
        }
        MsCsTemplate::parse(profile)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::install::config::Secret;

    #[test]
    fn join_conflicts_name_every_offending_option() {
        let config = InstallConfig {
            role: RoleRequest::Join,
            subject_base: Some("O=EXAMPLE.COM".to_string()),
            external_ca: true,
            ..Default::default()
        };
        match check_join_conflicts(&config) {
            Err(InstallError::ConflictingOptions(message)) => {
                assert!(message.contains("--subject-base"));
                assert!(message.contains("--external-ca"));
                assert!(!message.contains("--ca-subject"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn token_combinations() {
        let attended = InstallOptions { unattended: false };
        let unattended = InstallOptions { unattended: true };
        let full = TokenOptions {
            name: Some("lunasa".to_string()),
            library_path: Some(PathBuf::from("/usr/lib/libCryptoki2_64.so")),
            ..Default::default()
        };

        assert!(check_token(&TokenOptions::default(), &unattended).is_ok());
        assert!(check_token(&full, &attended).is_ok());
        assert!(check_token(&full, &unattended).is_err());

        let with_password = TokenOptions {
            password: Some(Secret::new("pin")),
            ..full.clone()
        };
        assert!(check_token(&with_password, &unattended).is_ok());

        let both = TokenOptions {
            password_file: Some(PathBuf::from("/root/pin")),
            ..with_password.clone()
        };
        assert!(matches!(
            check_token(&both, &attended),
            Err(InstallError::InvalidTokenOptions(_))
        ));

        let name_only = TokenOptions {
            library_path: None,
            ..full.clone()
        };
        assert!(check_token(&name_only, &attended).is_err());

        let password_only = TokenOptions {
            password: Some(Secret::new("pin")),
            ..Default::default()
        };
        assert!(check_token(&password_only, &attended).is_err());
    }

    #[test]
    fn subjects_are_checked_against_their_attribute_sets() {
        assert!(check_subject("subject base", "O=EXAMPLE.COM", SubjectKind::SubjectBase).is_ok());
        match check_subject("subject base", "CN=x,O=EXAMPLE.COM", SubjectKind::SubjectBase) {
            Err(InstallError::InvalidSubject { field, .. }) => assert_eq!(field, "subject base"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_subject("CA subject", "CN=CA,O=EXAMPLE.COM", SubjectKind::CaSubject).is_ok());
        assert!(check_subject("CA subject", "garbage", SubjectKind::CaSubject).is_err());
    }

    #[test]
    fn external_option_consistency() {
        let both_passes = InstallConfig {
            external_ca: true,
            external_cert_files: vec![PathBuf::from("/root/ca.pem")],
            ..Default::default()
        };
        assert!(matches!(
            check_external(&both_passes),
            Err(InstallError::ConflictingOptions(_))
        ));

        let generic_profile = InstallConfig {
            external_ca: true,
            external_ca_type: Some(ExternalCaType::Generic),
            external_ca_profile: Some("SubCA".to_string()),
            ..Default::default()
        };
        assert!(check_external(&generic_profile).is_err());

        let ms_cs = InstallConfig {
            external_ca: true,
            external_ca_type: Some(ExternalCaType::MsCs),
            external_ca_profile: Some("SubCA".to_string()),
            ..Default::default()
        };
        assert!(check_external(&ms_cs).is_ok());

        let bad_profile = InstallConfig {
            external_ca_profile: Some("1.2.3:x".to_string()),
            ..ms_cs.clone()
        };
        assert!(matches!(
            check_external(&bad_profile),
            Err(InstallError::InvalidExternalCa(_))
        ));

        let type_without_flag = InstallConfig {
            external_ca_type: Some(ExternalCaType::MsCs),
            ..Default::default()
        };
        assert!(check_external(&type_without_flag).is_err());
    }
}
