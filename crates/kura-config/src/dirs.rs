//! kura data directory initialization.
//!
//! Ensures the data directory exists and contains a commented default
//! `config.toml` when none is present.

use kura_common::paths;

/// Default content for a freshly created config.toml.
pub const DEFAULT_CONFIG_TOML: &str = "\
# kura configuration
# Every key is optional; the values shown are the defaults.

# [host]
# realm = \"EXAMPLE.COM\"
# trust_db = \"/etc/pki/nssdb\"

# [subsystem]
# unit = \"pki-tomcatd@pki-tomcat.service\"
# status_url = \"https://localhost:8443/ca/admin/ca/getStatus\"

# [readiness]
# timeout_secs = 300
# interval_secs = 1

# [directory]
# uri = \"ldapi://%2frun%2fslapd.socket\"
";

/// Ensure the kura data directory structure exists.
///
/// Creates the data root, `state/`, `logs/` and a default `config.toml`.
/// Errors are logged, not returned: the commands can run with settings
/// supplied entirely on the command line.
pub fn ensure_data_dir() {
    let data_dir = paths::kura_data_dir();

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(
            path = %data_dir.display(),
            error = %e,
            "Could not create data directory"
        );
        return;
    }

    for subdir in &["state", "logs"] {
        let path = data_dir.join(subdir);
        if let Err(e) = std::fs::create_dir_all(&path) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Could not create subdirectory"
            );
        }
    }

    let config_path = paths::kura_config_path();
    if !config_path.exists() {
        match std::fs::write(&config_path, DEFAULT_CONFIG_TOML) {
            Ok(()) => tracing::debug!(path = %config_path.display(), "Created default config"),
            Err(e) => tracing::warn!(
                path = %config_path.display(),
                error = %e,
                "Could not write default config"
            ),
        }
    }

    tracing::debug!(path = %data_dir.display(), "Data directory ready");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_toml() {
        let parsed: Result<toml::Value, _> = DEFAULT_CONFIG_TOML.parse();
        assert!(parsed.is_ok(), "Default config.toml should be valid TOML");
    }

    #[test]
    fn default_config_parses_into_default_settings() {
        let settings: crate::Settings = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(settings, crate::Settings::default());
    }
}
